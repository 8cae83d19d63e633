//! Pigeon message types and the plaintext payload records carried inside envelopes.
//! Payloads are protobuf (prost derive); see wire module for the envelope itself.

use std::fmt;
use std::str::FromStr;

use prost::Message;

/// Current envelope version.
pub const PROTOCOL_VERSION: i32 = 1;

/// Nonce size for envelope encryption (ChaCha20-Poly1305).
pub const NONCE_SIZE: usize = 12;

/// The one supported service (Participate With BRD / secure checkout).
pub const SERVICE_PWB: &str = "PWB";

/// Envelope message type. Encoded on the wire by its symbolic name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Link,
    Ping,
    Pong,
    AccountRequest,
    AccountResponse,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Link => "LINK",
            MessageType::Ping => "PING",
            MessageType::Pong => "PONG",
            MessageType::AccountRequest => "ACCOUNT_REQUEST",
            MessageType::AccountResponse => "ACCOUNT_RESPONSE",
        }
    }

    /// Message type used when answering a request of this type. None for types that are
    /// themselves responses.
    pub fn response_type(&self) -> Option<MessageType> {
        match self {
            MessageType::Link => Some(MessageType::Link),
            MessageType::Ping => Some(MessageType::Pong),
            MessageType::AccountRequest => Some(MessageType::AccountResponse),
            MessageType::Pong | MessageType::AccountResponse => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown message type: {0}")]
pub struct UnknownMessageType(pub String);

impl FromStr for MessageType {
    type Err = UnknownMessageType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LINK" => Ok(MessageType::Link),
            "PING" => Ok(MessageType::Ping),
            "PONG" => Ok(MessageType::Pong),
            "ACCOUNT_REQUEST" => Ok(MessageType::AccountRequest),
            "ACCOUNT_RESPONSE" => Ok(MessageType::AccountResponse),
            other => Err(UnknownMessageType(other.to_string())),
        }
    }
}

/// Request outcome carried by Link and AccountResponse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Status {
    Unknown = 0,
    Accepted = 1,
    Rejected = 2,
}

/// Error code carried by rejected Link and AccountResponse messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ErrorCode {
    NoError = 0,
    UnknownService = 1,
    UnknownVersion = 2,
    ScopeUnknown = 3,
    NoAddressFound = 4,
    UserDenied = 5,
    RemoteIdMismatch = 6,
}

/// Handshake message. Accepted links carry the sender's pairing public key and id.
#[derive(Clone, PartialEq, Message)]
pub struct Link {
    #[prost(bytes = "vec", tag = "1")]
    pub public_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub id: Vec<u8>,
    #[prost(enumeration = "Status", tag = "3")]
    pub status: i32,
    #[prost(enumeration = "ErrorCode", tag = "4")]
    pub error: i32,
}

impl Link {
    pub fn accepted(public_key: Vec<u8>, id: Vec<u8>) -> Self {
        Link {
            public_key,
            id,
            status: Status::Accepted as i32,
            error: ErrorCode::NoError as i32,
        }
    }

    pub fn rejected(error: ErrorCode) -> Self {
        Link {
            public_key: Vec::new(),
            id: Vec::new(),
            status: Status::Rejected as i32,
            error: error as i32,
        }
    }
}

/// Liveness request.
#[derive(Clone, PartialEq, Message)]
pub struct Ping {
    #[prost(string, tag = "1")]
    pub ping: String,
}

/// Liveness response; echoes the ping value.
#[derive(Clone, PartialEq, Message)]
pub struct Pong {
    #[prost(string, tag = "1")]
    pub pong: String,
}

/// Request for the receive address of the wallet identified by `scope` (currency code).
#[derive(Clone, PartialEq, Message)]
pub struct AccountRequest {
    #[prost(string, tag = "1")]
    pub scope: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct AccountResponse {
    #[prost(string, tag = "1")]
    pub scope: String,
    #[prost(string, tag = "2")]
    pub address: String,
    #[prost(enumeration = "Status", tag = "3")]
    pub status: i32,
    #[prost(enumeration = "ErrorCode", tag = "4")]
    pub error: i32,
}

impl AccountResponse {
    pub fn accepted(scope: &str, address: &str) -> Self {
        AccountResponse {
            scope: scope.to_string(),
            address: address.to_string(),
            status: Status::Accepted as i32,
            error: ErrorCode::NoError as i32,
        }
    }

    pub fn rejected(error: ErrorCode) -> Self {
        AccountResponse {
            scope: String::new(),
            address: String::new(),
            status: Status::Rejected as i32,
            error: error as i32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_names_roundtrip() {
        for t in [
            MessageType::Link,
            MessageType::Ping,
            MessageType::Pong,
            MessageType::AccountRequest,
            MessageType::AccountResponse,
        ] {
            assert_eq!(t.as_str().parse::<MessageType>().unwrap(), t);
        }
        assert!("CHAT".parse::<MessageType>().is_err());
        assert!("link".parse::<MessageType>().is_err());
    }

    #[test]
    fn response_types() {
        assert_eq!(MessageType::Ping.response_type(), Some(MessageType::Pong));
        assert_eq!(
            MessageType::AccountRequest.response_type(),
            Some(MessageType::AccountResponse)
        );
        assert_eq!(MessageType::Link.response_type(), Some(MessageType::Link));
        assert_eq!(MessageType::Pong.response_type(), None);
    }

    #[test]
    fn rejected_link_has_no_key_material() {
        let bytes = Link::rejected(ErrorCode::UserDenied).encode_to_vec();
        let link = Link::decode(bytes.as_slice()).unwrap();
        assert_eq!(link.status(), Status::Rejected);
        assert_eq!(link.error(), ErrorCode::UserDenied);
        assert!(link.public_key.is_empty());
        assert!(link.id.is_empty());
    }
}
