//! Node identity: long-term key pair (Ed25519 signing + X25519 exchange), public keys,
//! fingerprints, and the per-conversation session key.

use std::fmt;

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

/// Length of a public key as carried in directory files and snapshots.
pub const PUBLIC_KEY_LEN: usize = 64;

/// A contact's public key: Ed25519 verifying key followed by X25519 exchange key.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PublicKey {
    verifying: [u8; 32],
    exchange: [u8; 32],
}

impl PublicKey {
    /// Create a `PublicKey` from its 64-byte encoding, rejecting an invalid verifying key.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != PUBLIC_KEY_LEN {
            return Err(KeyError::Length {
                expected: PUBLIC_KEY_LEN,
                got: bytes.len(),
            });
        }
        let mut verifying = [0u8; 32];
        verifying.copy_from_slice(&bytes[..32]);
        let mut exchange = [0u8; 32];
        exchange.copy_from_slice(&bytes[32..]);
        let key = PublicKey {
            verifying,
            exchange,
        };
        key.validate()?;
        Ok(key)
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s.trim())?;
        Self::from_bytes(&bytes)
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        let mut out = [0u8; PUBLIC_KEY_LEN];
        out[..32].copy_from_slice(&self.verifying);
        out[32..].copy_from_slice(&self.exchange);
        out
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Check that the signing half decodes to a curve point.
    pub fn validate(&self) -> Result<(), KeyError> {
        VerifyingKey::from_bytes(&self.verifying).map_err(|_| KeyError::InvalidVerifyingKey)?;
        Ok(())
    }

    pub(crate) fn verifying_key(&self) -> Result<VerifyingKey, KeyError> {
        VerifyingKey::from_bytes(&self.verifying).map_err(|_| KeyError::InvalidVerifyingKey)
    }

    pub(crate) fn exchange_key(&self) -> X25519PublicKey {
        X25519PublicKey::from(self.exchange)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::from_public_key(self)
    }
}

/// Short, deterministic hash of a public key. Shown in directory listings.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Fingerprint([u8; 8]);

impl Fingerprint {
    pub fn from_public_key(public: &PublicKey) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(public.to_bytes());
        let digest = hasher.finalize();
        let mut id = [0u8; 8];
        id.copy_from_slice(&digest[..8]);
        Fingerprint(id)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Long-term key pair. Keep the secrets private; expose only the public key.
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
    exchange: StaticSecret,
    public: PublicKey,
}

impl Keypair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        let exchange = StaticSecret::random_from_rng(OsRng);
        Self::from_secrets(signing, exchange)
    }

    /// Rebuild a key pair from the two 32-byte secrets stored in an identity file.
    pub fn from_secret_bytes(signing: [u8; 32], exchange: [u8; 32]) -> Self {
        Self::from_secrets(SigningKey::from_bytes(&signing), StaticSecret::from(exchange))
    }

    fn from_secrets(signing: SigningKey, exchange: StaticSecret) -> Self {
        let public = PublicKey {
            verifying: signing.verifying_key().to_bytes(),
            exchange: X25519PublicKey::from(&exchange).to_bytes(),
        };
        Self {
            signing,
            exchange,
            public,
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.public.fingerprint()
    }

    /// (signing secret, exchange secret), for writing an identity file.
    pub fn secret_bytes(&self) -> ([u8; 32], [u8; 32]) {
        (self.signing.to_bytes(), self.exchange.to_bytes())
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    pub(crate) fn exchange_secret(&self) -> &StaticSecret {
        &self.exchange
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &self.public.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Symmetric key shared by all members of one conversation (ChaCha20-Poly1305).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        SessionKey(key)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        SessionKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("invalid key length: expected {expected}, got {got}")]
    Length { expected: usize, got: usize },
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("invalid verifying key")]
    InvalidVerifyingKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_derivation() {
        let kp = Keypair::generate();
        let fp = Fingerprint::from_public_key(kp.public_key());
        assert_eq!(fp, kp.fingerprint());
        assert_eq!(fp.to_string().len(), 16);
    }

    #[test]
    fn secret_bytes_rebuild_same_public_key() {
        let kp = Keypair::generate();
        let (signing, exchange) = kp.secret_bytes();
        let again = Keypair::from_secret_bytes(signing, exchange);
        assert_eq!(again.public_key(), kp.public_key());
    }

    #[test]
    fn public_key_hex_roundtrip() {
        let kp = Keypair::generate();
        let hex = kp.public_key().to_hex();
        assert_eq!(hex.len(), 2 * PUBLIC_KEY_LEN);
        assert_eq!(&PublicKey::from_hex(&hex).unwrap(), kp.public_key());
    }

    #[test]
    fn public_key_wrong_length_rejected() {
        assert!(matches!(
            PublicKey::from_bytes(&[0u8; 32]),
            Err(KeyError::Length { .. })
        ));
        assert!(matches!(PublicKey::from_hex("zz"), Err(KeyError::Hex(_))));
    }

    #[test]
    fn session_keys_are_random() {
        assert_ne!(SessionKey::generate(), SessionKey::generate());
        assert_eq!(format!("{:?}", SessionKey::generate()), "SessionKey(..)");
    }
}
