//! Host collaborators: the engine does no I/O itself. The host supplies the inbox transport,
//! metadata and key storage, the confirmation prompt and wallet lookup.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::session::PairingSession;
use crate::wire::InboxEntry;

/// Store-and-forward inbox service. Calls block within the current work unit.
pub trait Transport: Send {
    /// Entries with cursor after `cursor` (all entries if None), ascending.
    fn fetch_inbox(&mut self, cursor: Option<&str>) -> Result<Vec<InboxEntry>, HostError>;
    fn send_ack(&mut self, cursors: &[String]) -> Result<(), HostError>;
    fn send_envelope(&mut self, bytes: &[u8]) -> Result<(), HostError>;
    /// Register the local pairing public key so the remote can address this wallet.
    fn register_key(&mut self, public_key: &[u8]) -> Result<(), HostError>;
    fn fetch_service(&mut self, name: &str) -> Result<ServiceDescription, HostError>;
}

/// Key-value metadata store for the pairing session and inbox cursor.
/// Writes must be durable when they return.
pub trait MetadataStore: Send {
    fn get_pairing_session(&self, public_key: &[u8]) -> Result<Option<PairingSession>, HostError>;
    /// Replaces any stored session.
    fn put_pairing_session(&mut self, session: &PairingSession) -> Result<(), HostError>;
    fn remove_pairing_session(&mut self, public_key: &[u8]) -> Result<(), HostError>;
    fn get_last_cursor(&self) -> Result<Option<String>, HostError>;
    fn put_last_cursor(&mut self, cursor: &str) -> Result<(), HostError>;
}

/// Secure storage holding the wallet's long-lived auth key.
pub trait KeyStore: Send {
    fn auth_key(&self) -> Result<Vec<u8>, HostError>;
}

/// UI asked to approve or deny a pairing. The decision comes back later as a separate
/// work item; there is no timeout.
pub trait ConfirmationPrompt: Send {
    fn request_confirmation(&mut self, request: ConfirmationRequest);
    /// Best-effort; failures are the host's to log.
    fn open_url(&mut self, url: &str);
}

/// Wallet lookup for account requests.
pub trait WalletLookup: Send {
    /// Wallet for a currency code, if this device has one.
    fn find_wallet(&self, scope: &str) -> Option<Box<dyn Wallet>>;
}

pub trait Wallet {
    fn address(&self) -> Option<String>;
}

/// What the remote service says about itself; shown to the user before approving.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceDescription {
    pub name: String,
    pub url: String,
    pub domains: Vec<String>,
    pub capabilities: Vec<String>,
}

impl ServiceDescription {
    pub fn named(name: &str) -> Self {
        ServiceDescription {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationRequest {
    pub remote_id: String,
    pub service: ServiceDescription,
    pub return_url: Option<String>,
}

/// Failure reported by a host collaborator.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("key store: {0}")]
    KeyStore(String),
}

#[derive(Debug, Default)]
struct MemoryState {
    session: Option<PairingSession>,
    last_cursor: Option<String>,
}

/// In-memory metadata store. Clones share state, so a host (or a test) can keep a handle
/// after giving one to the engine.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored session regardless of key.
    pub fn session(&self) -> Option<PairingSession> {
        self.lock().ok().and_then(|s| s.session.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, HostError> {
        self.state
            .lock()
            .map_err(|_| HostError::Storage("poisoned".into()))
    }
}

impl MetadataStore for MemoryStore {
    fn get_pairing_session(&self, public_key: &[u8]) -> Result<Option<PairingSession>, HostError> {
        let state = self.lock()?;
        Ok(state
            .session
            .as_ref()
            .filter(|s| s.matches_key(public_key))
            .cloned())
    }

    fn put_pairing_session(&mut self, session: &PairingSession) -> Result<(), HostError> {
        self.lock()?.session = Some(session.clone());
        Ok(())
    }

    fn remove_pairing_session(&mut self, public_key: &[u8]) -> Result<(), HostError> {
        let mut state = self.lock()?;
        if state
            .session
            .as_ref()
            .map(|s| s.matches_key(public_key))
            .unwrap_or(false)
        {
            state.session = None;
        }
        Ok(())
    }

    fn get_last_cursor(&self) -> Result<Option<String>, HostError> {
        Ok(self.lock()?.last_cursor.clone())
    }

    fn put_last_cursor(&mut self, cursor: &str) -> Result<(), HostError> {
        self.lock()?.last_cursor = Some(cursor.to_string());
        Ok(())
    }
}

/// Key store holding a fixed auth key.
#[derive(Clone)]
pub struct StaticKeyStore {
    key: Vec<u8>,
}

impl StaticKeyStore {
    pub fn new(key: Vec<u8>) -> Self {
        Self { key }
    }
}

impl KeyStore for StaticKeyStore {
    fn auth_key(&self) -> Result<Vec<u8>, HostError> {
        if self.key.is_empty() {
            return Err(HostError::KeyStore("no auth key".into()));
        }
        Ok(self.key.clone())
    }
}
