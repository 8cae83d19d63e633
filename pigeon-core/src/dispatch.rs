//! Message dispatch: route a verified, decrypted envelope by message type and build the
//! sealed response, if any.

use prost::Message;
use tracing::{debug, info, warn};

use crate::host::WalletLookup;
use crate::identity::{self, CryptoError, PairingKey};
use crate::protocol::{
    AccountRequest, AccountResponse, ErrorCode, Link, MessageType, Ping, Pong, PROTOCOL_VERSION,
};
use crate::session::PairingSession;
use crate::wire::Envelope;

/// Result of handling one inbound message.
#[derive(Debug)]
pub enum Dispatch {
    /// Signed response envelope to send to the requester.
    Respond(Envelope),
    /// Inbound LINK carried the id of the active session.
    LinkConfirmed,
    /// Nothing to do (response-type message, or unknown type).
    Ignored,
}

/// Why an envelope was dropped before decryption.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("unsupported envelope version {0}")]
    Version(i32),
    #[error("envelope for service {0:?}, paired with another")]
    Service(String),
    #[error("unknown message type {0:?}")]
    UnknownType(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("malformed {kind} payload: {source}")]
    Payload {
        kind: MessageType,
        #[source]
        source: prost::DecodeError,
    },
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Routes messages for the active session.
pub struct Dispatcher<'a> {
    session: &'a PairingSession,
    pairing_key: &'a PairingKey,
    wallets: &'a dyn WalletLookup,
    /// Local device identifier; used when this side originates a message.
    identifier: &'a str,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        session: &'a PairingSession,
        pairing_key: &'a PairingKey,
        wallets: &'a dyn WalletLookup,
        identifier: &'a str,
    ) -> Self {
        Self {
            session,
            pairing_key,
            wallets,
            identifier,
        }
    }

    /// Header checks done before any decryption: version, service, known type.
    pub fn accepts(&self, envelope: &Envelope) -> Result<MessageType, Rejection> {
        if envelope.version != PROTOCOL_VERSION {
            return Err(Rejection::Version(envelope.version));
        }
        if envelope.service != self.session.service {
            return Err(Rejection::Service(envelope.service.clone()));
        }
        envelope
            .kind()
            .ok_or_else(|| Rejection::UnknownType(envelope.message_type.clone()))
    }

    /// Handle a decrypted message of type `kind` carried by `request`.
    pub fn dispatch(
        &self,
        kind: MessageType,
        request: &Envelope,
        plaintext: &[u8],
    ) -> Result<Dispatch, DispatchError> {
        let payload = |source| DispatchError::Payload { kind, source };
        let reply = match kind {
            MessageType::Link => {
                let link = Link::decode(plaintext).map_err(payload)?;
                match self.check_link(&link) {
                    None => return Ok(Dispatch::LinkConfirmed),
                    Some(rejection) => rejection.encode_to_vec(),
                }
            }
            MessageType::Ping => {
                let ping = Ping::decode(plaintext).map_err(payload)?;
                debug!("ping");
                Pong { pong: ping.ping }.encode_to_vec()
            }
            MessageType::AccountRequest => {
                let req = AccountRequest::decode(plaintext).map_err(payload)?;
                self.account_response(&req.scope).encode_to_vec()
            }
            MessageType::Pong | MessageType::AccountResponse => {
                debug!(%kind, "response-type message, nothing to do");
                return Ok(Dispatch::Ignored);
            }
        };
        let Some(response_kind) = kind.response_type() else {
            return Ok(Dispatch::Ignored);
        };
        let envelope = self.respond_to(request, response_kind, &reply)?;
        Ok(Dispatch::Respond(envelope))
    }

    /// LINK reply from the remote: its id must match the session we paired with.
    fn check_link(&self, link: &Link) -> Option<Link> {
        if link.id == self.session.id.as_bytes() {
            info!(remote_id = %self.session.id, "pairing confirmed by remote");
            None
        } else {
            warn!(
                expected = %self.session.id,
                got = %String::from_utf8_lossy(&link.id),
                "remote id mismatch on LINK"
            );
            Some(Link::rejected(ErrorCode::RemoteIdMismatch))
        }
    }

    fn account_response(&self, scope: &str) -> AccountResponse {
        let Some(wallet) = self.wallets.find_wallet(scope) else {
            info!(scope, "account request for unknown scope");
            return AccountResponse::rejected(ErrorCode::ScopeUnknown);
        };
        match wallet.address() {
            Some(address) if !address.is_empty() => AccountResponse::accepted(scope, &address),
            _ => {
                info!(scope, "no address for wallet");
                AccountResponse::rejected(ErrorCode::NoAddressFound)
            }
        }
    }

    /// Response to `request`: same identifier, addressed to the request's sender, freshly
    /// encrypted and signed.
    pub fn respond_to(
        &self,
        request: &Envelope,
        kind: MessageType,
        payload: &[u8],
    ) -> Result<Envelope, CryptoError> {
        self.seal(
            kind,
            &request.sender_public_key,
            &request.identifier,
            payload,
        )
    }

    /// Message originated by this side (handshake LINK).
    pub fn originate(
        &self,
        kind: MessageType,
        receiver_public_key: &[u8],
        payload: &[u8],
    ) -> Result<Envelope, CryptoError> {
        self.seal(kind, receiver_public_key, self.identifier, payload)
    }

    fn seal(
        &self,
        kind: MessageType,
        receiver_public_key: &[u8],
        identifier: &str,
        payload: &[u8],
    ) -> Result<Envelope, CryptoError> {
        let sealed = identity::encrypt(self.pairing_key, receiver_public_key, payload)?;
        let mut envelope = Envelope::new(
            kind,
            &self.session.service,
            sealed,
            self.pairing_key.public_key_bytes(),
            receiver_public_key.to_vec(),
            identifier,
        );
        identity::seal_envelope(&mut envelope, self.pairing_key)?;
        Ok(envelope)
    }
}
