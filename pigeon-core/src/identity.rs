//! Crypto engine: pairing key derivation, envelope encryption, recoverable envelope signatures.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;
use hkdf::Hkdf;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use prost::Message;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::protocol::NONCE_SIZE;
use crate::wire::Envelope;

/// Compact recoverable signature: header byte + r + s.
pub const COMPACT_SIGNATURE_SIZE: usize = 65;

const COMPACT_HEADER_BASE: u8 = 27;
const COMPACT_HEADER_COMPRESSED: u8 = 4;
const PAIRING_KEY_INFO: &[u8] = b"pigeon-pairing-key-v1";

/// Session-scoped secp256k1 key derived from the local auth key and the remote id.
/// Signs envelopes and is the private half of the encryption key agreement.
pub struct PairingKey {
    secret: SecretKey,
}

impl PairingKey {
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let secret = SecretKey::from_slice(bytes).map_err(|_| CryptoError::KeyDerivation)?;
        Ok(PairingKey { secret })
    }

    /// Compressed SEC1 public key (33 bytes), as sent in envelopes and links.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.secret
            .public_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec()
    }

    /// Shared secret with a remote public key, hashed into a ChaCha20-Poly1305 key.
    fn session_key(&self, remote_public_key: &[u8]) -> Result<[u8; 32], CryptoError> {
        let remote =
            PublicKey::from_sec1_bytes(remote_public_key).map_err(|_| CryptoError::InvalidPublicKey)?;
        let shared = k256::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), remote.as_affine());
        Ok(derive_session_key(shared.raw_secret_bytes().as_slice()))
    }
}

impl std::fmt::Debug for PairingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingKey")
            .field("public", &hex::encode(self.public_key_bytes()))
            .finish()
    }
}

/// Derive the pairing key for a remote entity. Deterministic in both inputs; not persisted.
pub fn derive_pairing_key(auth_key: &[u8], remote_id: &[u8]) -> Result<PairingKey, CryptoError> {
    if auth_key.is_empty() || remote_id.is_empty() {
        return Err(CryptoError::KeyDerivation);
    }
    // Reject auth keys that aren't valid scalars up front.
    SecretKey::from_slice(auth_key).map_err(|_| CryptoError::KeyDerivation)?;
    let salt = Sha256::digest(remote_id);
    let hk = Hkdf::<Sha256>::new(Some(salt.as_slice()), auth_key);
    let mut okm = [0u8; 32];
    hk.expand(PAIRING_KEY_INFO, &mut okm)
        .map_err(|_| CryptoError::KeyDerivation)?;
    PairingKey::from_secret_bytes(&okm)
}

fn derive_session_key(shared_secret: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"pigeon-session-v1");
    hasher.update(shared_secret);
    hasher.finalize().into()
}

/// Fresh random nonce from the OS RNG. Never reused.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Ciphertext and the nonce it was sealed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedMessage {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
}

/// Encrypt for the remote public key with a freshly generated nonce.
pub fn encrypt(
    pairing_key: &PairingKey,
    remote_public_key: &[u8],
    plaintext: &[u8],
) -> Result<EncryptedMessage, CryptoError> {
    encrypt_with_nonce(pairing_key, remote_public_key, plaintext, generate_nonce())
}

fn encrypt_with_nonce(
    pairing_key: &PairingKey,
    remote_public_key: &[u8],
    plaintext: &[u8],
    nonce: [u8; NONCE_SIZE],
) -> Result<EncryptedMessage, CryptoError> {
    let key = pairing_key.session_key(remote_public_key)?;
    let cipher = ChaCha20Poly1305::new_from_slice(&key).map_err(|_| CryptoError::Encryption)?;
    let nonce_arr = chacha20poly1305::Nonce::from_slice(&nonce);
    let ciphertext = cipher
        .encrypt(nonce_arr, plaintext)
        .map_err(|_| CryptoError::Encryption)?;
    Ok(EncryptedMessage { ciphertext, nonce })
}

/// Decrypt a message from the remote public key. Fails if the tag doesn't verify.
pub fn decrypt(
    pairing_key: &PairingKey,
    remote_public_key: &[u8],
    ciphertext: &[u8],
    nonce: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::Decryption);
    }
    let key = pairing_key.session_key(remote_public_key)?;
    let cipher = ChaCha20Poly1305::new_from_slice(&key).map_err(|_| CryptoError::Decryption)?;
    cipher
        .decrypt(chacha20poly1305::Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Decryption)
}

/// Decrypt the payload of an envelope sent by `envelope.sender_public_key`.
pub fn decrypt_envelope(pairing_key: &PairingKey, envelope: &Envelope) -> Result<Vec<u8>, CryptoError> {
    decrypt(
        pairing_key,
        &envelope.sender_public_key,
        &envelope.encrypted_message,
        &envelope.nonce,
    )
}

pub fn double_sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(bytes)).into()
}

/// Compact recoverable signature over double-SHA-256 of the envelope with signature cleared.
pub fn sign_envelope(envelope: &Envelope, pairing_key: &PairingKey) -> Result<Vec<u8>, CryptoError> {
    let digest = double_sha256(&envelope.unsigned().encode_to_vec());
    let signing_key = SigningKey::from(&pairing_key.secret);
    let (signature, recovery_id) = signing_key
        .sign_prehash_recoverable(&digest)
        .map_err(|_| CryptoError::Signing)?;
    let mut out = Vec::with_capacity(COMPACT_SIGNATURE_SIZE);
    out.push(COMPACT_HEADER_BASE + COMPACT_HEADER_COMPRESSED + recovery_id.to_byte());
    out.extend_from_slice(&signature.to_bytes());
    Ok(out)
}

/// Sign the envelope in place.
pub fn seal_envelope(envelope: &mut Envelope, pairing_key: &PairingKey) -> Result<(), CryptoError> {
    envelope.signature = sign_envelope(envelope, pairing_key)?;
    Ok(())
}

/// True iff a public key recovers from the signature and equals `sender_public_key`.
pub fn verify_envelope(envelope: &Envelope) -> bool {
    let sig = &envelope.signature;
    if sig.len() != COMPACT_SIGNATURE_SIZE {
        return false;
    }
    let header = sig[0];
    if !(COMPACT_HEADER_BASE..COMPACT_HEADER_BASE + 8).contains(&header) {
        return false;
    }
    let flags = header - COMPACT_HEADER_BASE;
    let compressed = flags & COMPACT_HEADER_COMPRESSED != 0;
    let Some(recovery_id) = RecoveryId::from_byte(flags & 0x03) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&sig[1..]) else {
        return false;
    };
    let digest = double_sha256(&envelope.unsigned().encode_to_vec());
    let Ok(recovered) = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id) else {
        return false;
    };
    let recovered = PublicKey::from(&recovered).to_encoded_point(compressed);
    recovered.as_bytes() == envelope.sender_public_key.as_slice()
}

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("pairing key derivation failed")]
    KeyDerivation,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("encryption failed")]
    Encryption,
    #[error("decryption failed")]
    Decryption,
    #[error("signing failed")]
    Signing,
}
