//! Envelope codec: protobuf envelope + base64 inbox entries.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use prost::Message;
use serde::{Deserialize, Serialize};

use crate::identity::EncryptedMessage;
use crate::protocol::{MessageType, NONCE_SIZE, PROTOCOL_VERSION};

/// Signed, versioned wire unit. `signature` covers the encoding of the envelope with
/// `signature` cleared.
#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    #[prost(int32, tag = "1")]
    pub version: i32,
    #[prost(string, tag = "2")]
    pub service: String,
    #[prost(string, tag = "3")]
    pub message_type: String,
    #[prost(bytes = "vec", tag = "4")]
    pub encrypted_message: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub sender_public_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "6")]
    pub receiver_public_key: Vec<u8>,
    #[prost(string, tag = "7")]
    pub identifier: String,
    #[prost(bytes = "vec", tag = "8")]
    pub signature: Vec<u8>,
    #[prost(bytes = "vec", tag = "9")]
    pub nonce: Vec<u8>,
}

impl Envelope {
    /// Unsigned envelope at the current protocol version.
    pub fn new(
        kind: MessageType,
        service: &str,
        sealed: EncryptedMessage,
        sender_public_key: Vec<u8>,
        receiver_public_key: Vec<u8>,
        identifier: &str,
    ) -> Self {
        Envelope {
            version: PROTOCOL_VERSION,
            service: service.to_string(),
            message_type: kind.as_str().to_string(),
            encrypted_message: sealed.ciphertext,
            sender_public_key,
            receiver_public_key,
            identifier: identifier.to_string(),
            signature: Vec::new(),
            nonce: sealed.nonce.to_vec(),
        }
    }

    /// Parsed message type, or None if the sender used a name this side doesn't know.
    pub fn kind(&self) -> Option<MessageType> {
        self.message_type.parse().ok()
    }

    /// Copy of this envelope with the signature cleared: the bytes that get signed.
    pub fn unsigned(&self) -> Envelope {
        Envelope {
            signature: Vec::new(),
            ..self.clone()
        }
    }

    pub fn nonce_array(&self) -> Option<[u8; NONCE_SIZE]> {
        self.nonce.as_slice().try_into().ok()
    }
}

/// Serialize an envelope.
pub fn encode(envelope: &Envelope) -> Vec<u8> {
    envelope.encode_to_vec()
}

/// Deserialize and structurally validate an envelope.
pub fn decode(bytes: &[u8]) -> Result<Envelope, EnvelopeDecodeError> {
    let envelope = Envelope::decode(bytes)?;
    if envelope.nonce.len() != NONCE_SIZE {
        return Err(EnvelopeDecodeError::BadNonce(envelope.nonce.len()));
    }
    if envelope.sender_public_key.is_empty() {
        return Err(EnvelopeDecodeError::MissingSender);
    }
    Ok(envelope)
}

/// Decode the base64 `message` of an inbox entry into an envelope.
pub fn decode_inbox_message(message: &str) -> Result<Envelope, EnvelopeDecodeError> {
    let bytes = STANDARD.decode(message.trim())?;
    decode(&bytes)
}

/// Base64 form of an envelope as it appears in an inbox entry.
pub fn encode_inbox_message(envelope: &Envelope) -> String {
    STANDARD.encode(encode(envelope))
}

/// Item fetched from the inbox. Cursor is server-assigned and ordered per sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxEntry {
    pub cursor: String,
    pub message: String,
}

impl InboxEntry {
    pub fn decode_envelope(&self) -> Result<Envelope, EnvelopeDecodeError> {
        decode_inbox_message(&self.message)
    }
}

/// Malformed envelope: bad base64, bad protobuf, or missing required fields.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeDecodeError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("nonce must be {NONCE_SIZE} bytes, got {0}")]
    BadNonce(usize),
    #[error("missing sender public key")]
    MissingSender,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_envelope() -> Envelope {
        Envelope::new(
            MessageType::Ping,
            "PWB",
            EncryptedMessage {
                ciphertext: vec![9u8; 40],
                nonce: [7u8; NONCE_SIZE],
            },
            vec![2u8; 33],
            vec![3u8; 33],
            "device-1",
        )
    }

    #[test]
    fn roundtrip_envelope() {
        let env = sample_envelope();
        let decoded = decode(&encode(&env)).unwrap();
        assert_eq!(decoded, env);
        assert_eq!(decoded.kind(), Some(MessageType::Ping));
        assert_eq!(decoded.version, PROTOCOL_VERSION);
        assert_eq!(decoded.nonce_array(), Some([7u8; NONCE_SIZE]));
    }

    #[test]
    fn truncated_envelope_is_malformed() {
        let bytes = encode(&sample_envelope());
        for cut in [1usize, 5, 20, bytes.len() / 2] {
            assert!(decode(&bytes[..bytes.len() - cut]).is_err(), "cut {cut}");
        }
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(decode(&[0xff, 0xff, 0xff, 0xff]).is_err());
        assert!(matches!(
            decode(&[]),
            Err(EnvelopeDecodeError::BadNonce(0))
        ));
    }

    #[test]
    fn missing_sender_is_malformed() {
        let mut env = sample_envelope();
        env.sender_public_key.clear();
        assert!(matches!(
            decode(&encode(&env)),
            Err(EnvelopeDecodeError::MissingSender)
        ));
    }

    #[test]
    fn unknown_message_type_still_decodes() {
        let mut env = sample_envelope();
        env.message_type = "CALL_REQUEST".into();
        let decoded = decode(&encode(&env)).unwrap();
        assert_eq!(decoded.kind(), None);
    }

    #[test]
    fn inbox_message_base64() {
        let env = sample_envelope();
        let entry = InboxEntry {
            cursor: "c1".into(),
            message: encode_inbox_message(&env),
        };
        assert_eq!(entry.decode_envelope().unwrap(), env);

        let bad = InboxEntry {
            cursor: "c2".into(),
            message: "not base64!!".into(),
        };
        assert!(matches!(
            bad.decode_envelope(),
            Err(EnvelopeDecodeError::Base64(_))
        ));
    }

    #[test]
    fn unsigned_clears_only_signature() {
        let mut env = sample_envelope();
        env.signature = vec![1u8; 65];
        let unsigned = env.unsigned();
        assert!(unsigned.signature.is_empty());
        assert_eq!(unsigned.identifier, env.identifier);
        assert_eq!(unsigned.nonce, env.nonce);
    }
}
