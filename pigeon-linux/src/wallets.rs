//! Wallets from the config table.

use std::collections::HashMap;

use pigeon_core::{Wallet, WalletLookup};

pub struct ConfiguredWallets {
    addresses: HashMap<String, String>,
}

impl ConfiguredWallets {
    pub fn new(addresses: HashMap<String, String>) -> Self {
        Self { addresses }
    }
}

struct ConfiguredWallet(String);

impl Wallet for ConfiguredWallet {
    fn address(&self) -> Option<String> {
        Some(self.0.clone()).filter(|a| !a.is_empty())
    }
}

impl WalletLookup for ConfiguredWallets {
    fn find_wallet(&self, scope: &str) -> Option<Box<dyn Wallet>> {
        self.addresses
            .get(scope)
            .map(|a| Box::new(ConfiguredWallet(a.clone())) as Box<dyn Wallet>)
    }
}
