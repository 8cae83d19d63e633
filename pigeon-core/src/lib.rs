//! Pigeon peer-pairing and encrypted message exchange.
//! Host-driven: no I/O; the host supplies transport, storage and UI collaborators and feeds
//! work units to the engine.

pub mod identity;
pub mod protocol;
pub mod session;
pub mod wire;

pub use identity::{CryptoError, EncryptedMessage, PairingKey};
pub use protocol::{MessageType, NONCE_SIZE, PROTOCOL_VERSION, SERVICE_PWB};
pub use session::{PairingSession, PairingState, SessionError};
pub use wire::{decode, encode, Envelope, EnvelopeDecodeError, InboxEntry};
pub use crate::core::{ExchangeConfig, ExchangeError, Host, MessageExchange, WorkItem};
pub use host::{
    ConfirmationPrompt, ConfirmationRequest, HostError, KeyStore, MemoryStore, MetadataStore,
    ServiceDescription, StaticKeyStore, Transport, Wallet, WalletLookup,
};
pub use inbox::PollReport;
pub use worker::{WorkQueue, WorkerHandle};

pub mod core;
pub mod dispatch;
pub mod host;
pub mod inbox;
pub mod worker;
