//! Pairing state: the single active pairing session and the handshake states.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::protocol::SERVICE_PWB;

/// The one active pairing with a remote service. Created from a scanned pairing link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingSession {
    /// Remote entity id; input to pairing key derivation.
    pub id: String,
    pub service: String,
    /// Remote ephemeral public key presented in the pairing link (hex).
    pub public_key_hex: String,
    /// Opened on approval.
    pub return_url: Option<String>,
    /// The user approved this pairing. Pending sessions are stored too, so this is what
    /// tells them apart after a restart.
    #[serde(default)]
    pub approved: bool,
}

impl PairingSession {
    pub fn new(id: &str, service: &str, public_key_hex: &str, return_url: Option<&str>) -> Self {
        let mut session = PairingSession {
            id: id.to_string(),
            service: service.to_string(),
            public_key_hex: public_key_hex.to_string(),
            return_url: return_url.map(str::to_string),
            approved: false,
        };
        session.default_service();
        session
    }

    /// Parse a pairing link (QR code / deep link). Query: `publicKey`, `id`, `service`, `return-to`.
    pub fn from_link(link: &str) -> Result<Self, SessionError> {
        let url = Url::parse(link).map_err(|e| SessionError::InvalidLink(e.to_string()))?;
        let mut id = None;
        let mut public_key_hex = None;
        let mut service = None;
        let mut return_url = None;
        for (k, v) in url.query_pairs() {
            match k.as_ref() {
                "id" => id = Some(v.into_owned()),
                "publicKey" => public_key_hex = Some(v.into_owned()),
                "service" => service = Some(v.into_owned()),
                "return-to" => return_url = Some(v.into_owned()),
                _ => {}
            }
        }
        let id = id
            .filter(|s| !s.is_empty())
            .ok_or(SessionError::MissingField("id"))?;
        let public_key_hex = public_key_hex
            .filter(|s| !s.is_empty())
            .ok_or(SessionError::MissingField("publicKey"))?;
        let session = PairingSession::new(
            &id,
            service.as_deref().unwrap_or_default(),
            &public_key_hex,
            return_url.as_deref().filter(|s| !s.is_empty()),
        );
        session.remote_public_key()?;
        Ok(session)
    }

    /// Only one service is supported; an empty name means that one.
    pub fn default_service(&mut self) {
        if self.service.is_empty() {
            self.service = SERVICE_PWB.to_string();
        }
    }

    pub fn remote_public_key(&self) -> Result<Vec<u8>, SessionError> {
        hex::decode(&self.public_key_hex).map_err(|_| SessionError::InvalidPublicKeyHex)
    }

    /// Whether `public_key` is the key this session was created for.
    pub fn matches_key(&self, public_key: &[u8]) -> bool {
        self.remote_public_key()
            .map(|k| k == public_key)
            .unwrap_or(false)
    }
}

/// Handshake progress of the local side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    Unpaired,
    /// Session saved from a scanned request; waiting for the user's decision.
    AwaitingConfirmation,
    /// Approved, LINK sent, key registered.
    Paired,
    /// Denied, rejection LINK sent, session discarded.
    Declined,
}

/// Holder of the active session and its state. Owned by the engine; at most one session.
#[derive(Debug)]
pub struct Pairing {
    session: Option<PairingSession>,
    state: PairingState,
}

impl Pairing {
    pub fn new() -> Self {
        Self {
            session: None,
            state: PairingState::Unpaired,
        }
    }

    pub fn state(&self) -> PairingState {
        self.state
    }

    pub fn session(&self) -> Option<&PairingSession> {
        self.session.as_ref()
    }

    /// A pairing request was scanned. Replaces any prior session.
    pub fn begin(&mut self, session: PairingSession) {
        self.session = Some(session);
        self.state = PairingState::AwaitingConfirmation;
    }

    /// Session loaded from the metadata store. Paired only if the user approved it.
    pub fn restore(&mut self, session: PairingSession) {
        self.state = if session.approved {
            PairingState::Paired
        } else {
            PairingState::AwaitingConfirmation
        };
        self.session = Some(session);
    }

    /// User approved the held session. Returns it, marked approved, for persisting.
    pub fn approve(&mut self) -> Option<&PairingSession> {
        let session = self.session.as_mut()?;
        session.approved = true;
        self.state = PairingState::Paired;
        Some(session)
    }

    /// Denied: drop the session and return it so the caller can clean up storage.
    pub fn decline(&mut self) -> Option<PairingSession> {
        self.state = PairingState::Declined;
        self.session.take()
    }
}

impl Default for Pairing {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid pairing link: {0}")]
    InvalidLink(String),
    #[error("pairing link missing {0}")]
    MissingField(&'static str),
    #[error("invalid public key hex")]
    InvalidPublicKeyHex,
}
