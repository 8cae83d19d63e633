//! Host-driven engine: MessageExchange runs one work unit at a time against the host's
//! collaborators.

use prost::Message;
use tracing::{error, info, warn};

use crate::dispatch::Dispatcher;
use crate::host::{
    ConfirmationPrompt, ConfirmationRequest, HostError, KeyStore, MetadataStore,
    ServiceDescription, Transport, WalletLookup,
};
use crate::identity::{self, CryptoError, PairingKey};
use crate::protocol::{ErrorCode, Link, MessageType};
use crate::session::{Pairing, PairingSession, PairingState, SessionError};
use crate::wire;

/// Local identity used in outgoing messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeConfig {
    /// Sent as the envelope identifier on messages this side originates.
    pub device_id: String,
    /// Wallet identifier sent in the accepting LINK.
    pub wallet_id: String,
}

/// Collaborators supplied by the host.
pub struct Host {
    pub transport: Box<dyn Transport>,
    pub store: Box<dyn MetadataStore>,
    pub keys: Box<dyn KeyStore>,
    pub prompt: Box<dyn ConfirmationPrompt>,
    pub wallets: Box<dyn WalletLookup>,
}

/// One unit of protocol work. Units never run concurrently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    /// User scanned a pairing link.
    RequestToPair(PairingSession),
    /// User approved or denied the pending pairing.
    PairingDecided { approved: bool },
    /// Poll the inbox.
    RetrieveMessages,
}

/// Main coordinator. Owns the pairing session; the host owns everything else.
pub struct MessageExchange {
    pub(crate) config: ExchangeConfig,
    pub(crate) host: Host,
    pub(crate) pairing: Pairing,
}

impl MessageExchange {
    pub fn new(config: ExchangeConfig, host: Host) -> Self {
        Self {
            config,
            host,
            pairing: Pairing::new(),
        }
    }

    pub fn state(&self) -> PairingState {
        self.pairing.state()
    }

    pub fn session(&self) -> Option<&PairingSession> {
        self.pairing.session()
    }

    /// Run one work unit.
    pub fn handle(&mut self, item: WorkItem) -> Result<(), ExchangeError> {
        match item {
            WorkItem::RequestToPair(session) => self.request_to_pair(session),
            WorkItem::PairingDecided { approved } => self.decide_pairing(approved),
            WorkItem::RetrieveMessages => self.retrieve_messages().map(|_| ()),
        }
    }

    /// Save the scanned session and ask the user to confirm.
    pub fn request_to_pair(&mut self, mut session: PairingSession) -> Result<(), ExchangeError> {
        session.default_service();
        session.remote_public_key()?;
        self.host.store.put_pairing_session(&session)?;
        info!(remote_id = %session.id, service = %session.service, "pairing requested");

        let service = match self.host.transport.fetch_service(&session.service) {
            Ok(desc) => desc,
            Err(e) => {
                warn!(service = %session.service, error = %e, "service lookup failed");
                ServiceDescription::named(&session.service)
            }
        };
        let request = ConfirmationRequest {
            remote_id: session.id.clone(),
            service,
            return_url: session.return_url.clone(),
        };
        self.pairing.begin(session);
        self.host.prompt.request_confirmation(request);
        Ok(())
    }

    /// User decided on the pending pairing: send the accepting or rejecting LINK.
    pub fn decide_pairing(&mut self, approved: bool) -> Result<(), ExchangeError> {
        let session = self
            .pairing
            .session()
            .cloned()
            .ok_or(ExchangeError::PairingAbsent)?;
        let ephemeral_key = session.remote_public_key()?;
        let pairing_key = self.pairing_key(&session)?;

        let link = if approved {
            match session.return_url.as_deref() {
                Some(url) if !url.is_empty() => self.host.prompt.open_url(url),
                _ => warn!("no return url to open"),
            }
            let link = Link::accepted(
                pairing_key.public_key_bytes(),
                self.config.wallet_id.as_bytes().to_vec(),
            );
            self.host
                .transport
                .register_key(&pairing_key.public_key_bytes())?;
            link
        } else {
            Link::rejected(ErrorCode::UserDenied)
        };

        let envelope = Dispatcher::new(
            &session,
            &pairing_key,
            self.host.wallets.as_ref(),
            &self.config.device_id,
        )
        .originate(MessageType::Link, &ephemeral_key, &link.encode_to_vec())?;
        self.host.transport.send_envelope(&wire::encode(&envelope))?;

        if approved {
            if let Some(session) = self.pairing.approve() {
                self.host.store.put_pairing_session(session)?;
            }
            info!(remote_id = %session.id, "pairing approved, link sent");
        } else {
            self.pairing.decline();
            self.host.store.remove_pairing_session(&ephemeral_key)?;
            info!(remote_id = %session.id, "pairing denied, link sent");
        }
        Ok(())
    }

    /// Session for `sender_public_key`: the one held, or else the one stored for that key.
    pub(crate) fn resolve_session(
        &mut self,
        sender_public_key: &[u8],
    ) -> Result<Option<PairingSession>, ExchangeError> {
        if let Some(s) = self.pairing.session() {
            if s.matches_key(sender_public_key) {
                return Ok(Some(s.clone()));
            }
        }
        let Some(stored) = self.host.store.get_pairing_session(sender_public_key)? else {
            return Ok(None);
        };
        info!(remote_id = %stored.id, "pairing session loaded from store");
        self.pairing.restore(stored.clone());
        Ok(Some(stored))
    }

    /// Re-derive the pairing key for a session from the auth key.
    pub(crate) fn pairing_key(&self, session: &PairingSession) -> Result<PairingKey, ExchangeError> {
        let auth_key = self.host.keys.auth_key()?;
        identity::derive_pairing_key(&auth_key, session.id.as_bytes()).map_err(|e| {
            error!("pairing key derivation failed");
            ExchangeError::Crypto(e)
        })
    }

    /// Inbound LINK confirmed the session: persist it. Only the user's approval pairs; a
    /// LINK arriving before that changes nothing.
    pub(crate) fn confirm_pairing(&mut self, session: &PairingSession) -> Result<(), ExchangeError> {
        if self.pairing.state() != PairingState::Paired {
            warn!(remote_id = %session.id, state = ?self.pairing.state(), "link before approval ignored");
            return Ok(());
        }
        self.host.store.put_pairing_session(session)?;
        info!(remote_id = %session.id, "pairing confirmed by remote");
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("no pairing session")]
    PairingAbsent,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Host(#[from] HostError),
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::protocol::Status;

    #[test]
    fn request_to_pair_saves_session_and_prompts() {
        let (mut ex, fake, store) = engine();
        let remote = Remote::new("peer1");
        ex.handle(WorkItem::RequestToPair(remote.session.clone()))
            .unwrap();

        assert_eq!(ex.state(), PairingState::AwaitingConfirmation);
        assert_eq!(store.session(), Some(remote.session.clone()));
        fake.with(|r| {
            assert_eq!(r.confirmations.len(), 1);
            assert_eq!(r.confirmations[0].remote_id, "peer1");
            assert_eq!(r.confirmations[0].service.url, "https://checkout.example");
            assert!(r.sent.is_empty());
        });
    }

    #[test]
    fn service_lookup_failure_still_prompts() {
        let (mut ex, fake, _) = engine();
        fake.with(|r| r.fail_service = true);
        let remote = Remote::new("peer1");
        ex.request_to_pair(remote.session.clone()).unwrap();
        fake.with(|r| {
            assert_eq!(r.confirmations[0].service, ServiceDescription::named("PWB"));
        });
    }

    #[test]
    fn empty_service_defaults_to_pwb() {
        let (mut ex, _, store) = engine();
        let mut session = Remote::new("peer1").session;
        session.service.clear();
        ex.request_to_pair(session).unwrap();
        assert_eq!(store.session().unwrap().service, "PWB");
    }

    #[test]
    fn approve_sends_accepting_link() {
        let (mut ex, fake, _) = engine();
        let remote = Remote::new("peer1");
        ex.request_to_pair(remote.session.clone()).unwrap();
        ex.handle(WorkItem::PairingDecided { approved: true })
            .unwrap();

        assert_eq!(ex.state(), PairingState::Paired);
        let wallet_pub = remote.wallet_key().public_key_bytes();
        fake.with(|r| {
            assert_eq!(r.opened, vec!["https://checkout.example/return".to_string()]);
            assert_eq!(r.registered, vec![wallet_pub.clone()]);
            assert_eq!(r.sent.len(), 1);
            let (env, plain) = remote.open(&r.sent[0]);
            assert_eq!(env.kind(), Some(MessageType::Link));
            assert_eq!(env.identifier, "device-1");
            assert_eq!(env.service, "PWB");
            assert_eq!(env.sender_public_key, wallet_pub);
            assert_eq!(env.receiver_public_key, remote.key.public_key_bytes());
            let link = Link::decode(plain.as_slice()).unwrap();
            assert_eq!(link.status(), Status::Accepted);
            assert_eq!(link.public_key, wallet_pub);
            assert_eq!(link.id, b"wallet-abc");
        });
    }

    #[test]
    fn approval_is_persisted() {
        let (mut ex, _, store) = engine();
        let remote = Remote::new("peer1");
        ex.request_to_pair(remote.session.clone()).unwrap();
        assert!(!store.session().unwrap().approved);
        ex.decide_pairing(true).unwrap();
        assert!(store.session().unwrap().approved);
        assert!(ex.session().unwrap().approved);
    }

    #[test]
    fn link_confirmation_needs_user_approval() {
        let (mut ex, _, store) = engine();
        let remote = Remote::new("peer1");
        ex.request_to_pair(remote.session.clone()).unwrap();
        ex.confirm_pairing(&remote.session).unwrap();
        assert_eq!(ex.state(), PairingState::AwaitingConfirmation);
        assert!(!store.session().unwrap().approved);
    }

    #[test]
    fn pending_session_restores_as_pending() {
        let (mut ex, _, store) = engine();
        let remote = Remote::new("peer1");
        ex.request_to_pair(remote.session.clone()).unwrap();

        let (mut restarted, _, _) = engine_on(store);
        let key = remote.key.public_key_bytes();
        let session = restarted.resolve_session(&key).unwrap().unwrap();
        assert!(!session.approved);
        assert_eq!(restarted.state(), PairingState::AwaitingConfirmation);
    }

    #[test]
    fn approve_without_return_url_is_not_fatal() {
        let (mut ex, fake, _) = engine();
        let mut session = Remote::new("peer1").session;
        session.return_url = None;
        ex.request_to_pair(session).unwrap();
        ex.decide_pairing(true).unwrap();
        assert_eq!(ex.state(), PairingState::Paired);
        fake.with(|r| {
            assert!(r.opened.is_empty());
            assert_eq!(r.sent.len(), 1);
        });
    }

    #[test]
    fn deny_sends_rejecting_link_and_discards_session() {
        let (mut ex, fake, store) = engine();
        let remote = Remote::new("peer1");
        ex.request_to_pair(remote.session.clone()).unwrap();
        ex.decide_pairing(false).unwrap();

        assert_eq!(ex.state(), PairingState::Declined);
        assert!(ex.session().is_none());
        assert!(store.session().is_none());
        fake.with(|r| {
            assert!(r.registered.is_empty());
            assert!(r.opened.is_empty());
            let (_, plain) = remote.open(&r.sent[0]);
            let link = Link::decode(plain.as_slice()).unwrap();
            assert_eq!(link.status(), Status::Rejected);
            assert_eq!(link.error(), ErrorCode::UserDenied);
        });
    }

    #[test]
    fn decision_without_request_fails() {
        let (mut ex, fake, _) = engine();
        assert!(matches!(
            ex.decide_pairing(true),
            Err(ExchangeError::PairingAbsent)
        ));
        fake.with(|r| assert!(r.sent.is_empty()));
    }

    #[test]
    fn bad_session_key_rejected_on_request() {
        let (mut ex, _, store) = engine();
        let mut session = Remote::new("peer1").session;
        session.public_key_hex = "not-hex".into();
        assert!(matches!(
            ex.request_to_pair(session),
            Err(ExchangeError::Session(SessionError::InvalidPublicKeyHex))
        ));
        assert!(store.session().is_none());
        assert_eq!(ex.state(), PairingState::Unpaired);
    }
}
