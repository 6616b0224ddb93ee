//! Security pipeline: Ed25519 signatures over envelope bodies, and whole-buffer
//! confidentiality with either the conversation's session key or a peer's long-term key.
//!
//! The transforms are stateless; callers pick the keys.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use ed25519_dalek::{Signature, Signer, Verifier};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};

use crate::envelope::{Envelope, EnvelopeError};
use crate::identity::{KeyError, Keypair, PublicKey, SessionKey};
use crate::wire::Frame;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const EPHEMERAL_LEN: usize = 32;
const HKDF_INFO: &[u8] = b"pigeon-seal-v1";

/// Which protections a node applies. Both default to on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecuritySettings {
    pub sign: bool,
    pub encrypt: bool,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            sign: true,
            encrypt: true,
        }
    }
}

/// Key used to hide an outbound envelope.
#[derive(Debug, Clone, Copy)]
pub enum SealKey<'a> {
    /// Recipient is a member: shared session cipher.
    Session(&'a SessionKey),
    /// Recipient is not a member: its long-term public key.
    Peer(&'a PublicKey),
}

/// Key used to recover an inbound envelope.
#[derive(Debug, Clone, Copy)]
pub enum OpenKey<'a> {
    /// Sender is a member: shared session cipher.
    Session(&'a SessionKey),
    /// Sender is not a member: our own private key.
    Local(&'a Keypair),
}

/// Replace any signature with one computed over the body.
pub fn sign_envelope(envelope: &Envelope, keypair: &Keypair) -> Envelope {
    let signature = keypair.signing_key().sign(envelope.body_slice());
    envelope.with_signature(&signature.to_bytes())
}

/// Check the embedded signature against the claimed sender's public key.
pub fn verify_envelope(envelope: &Envelope, sender: &PublicKey) -> Result<(), SecurityError> {
    let verifying = sender.verifying_key()?;
    let signature = Signature::from_slice(&envelope.signature())
        .map_err(|_| SecurityError::InvalidSignature)?;
    verifying
        .verify(envelope.body_slice(), &signature)
        .map_err(|_| SecurityError::VerificationFailed)
}

/// Encrypt the whole envelope buffer (header, body, signature) into an opaque frame payload.
pub fn seal(envelope: &Envelope, key: SealKey<'_>) -> Result<Frame, SecurityError> {
    let payload = match key {
        SealKey::Session(k) => encrypt_session(k, envelope.raw_buffer())?,
        SealKey::Peer(p) => encrypt_for(p, envelope.raw_buffer())?,
    };
    Ok(Frame {
        sender: envelope.sender().to_owned(),
        recipient: envelope.recipient().to_owned(),
        payload,
    })
}

/// Decrypt a frame payload and parse the envelope inside.
pub fn open(frame: Frame, key: OpenKey<'_>) -> Result<Envelope, SecurityError> {
    let plaintext = match key {
        OpenKey::Session(k) => decrypt_session(k, &frame.payload)?,
        OpenKey::Local(kp) => decrypt_with(kp, &frame.payload)?,
    };
    Ok(Envelope::from_buffer(frame.sender, frame.recipient, plaintext)?)
}

/// Session cipher. Output: nonce (12) || ciphertext+tag.
pub fn encrypt_session(key: &SessionKey, plaintext: &[u8]) -> Result<Vec<u8>, SecurityError> {
    let cipher =
        ChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| SecurityError::Key)?;
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| SecurityError::Encrypt)?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub fn decrypt_session(key: &SessionKey, data: &[u8]) -> Result<Vec<u8>, SecurityError> {
    if data.len() < NONCE_LEN + TAG_LEN {
        return Err(SecurityError::CiphertextTooShort);
    }
    let cipher =
        ChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| SecurityError::Key)?;
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| SecurityError::Decrypt)
}

/// Asymmetric cipher: ephemeral X25519 against the recipient's exchange key, HKDF-SHA256,
/// then ChaCha20-Poly1305. Output: ephemeral public (32) || nonce (12) || ciphertext+tag.
pub fn encrypt_for(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, SecurityError> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = X25519PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&recipient.exchange_key());
    let key = derive_key(shared.as_bytes(), ephemeral_public.as_bytes())?;
    let sealed = encrypt_session(&key, plaintext)?;
    let mut out = Vec::with_capacity(EPHEMERAL_LEN + sealed.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&sealed);
    Ok(out)
}

pub fn decrypt_with(keypair: &Keypair, data: &[u8]) -> Result<Vec<u8>, SecurityError> {
    if data.len() < EPHEMERAL_LEN + NONCE_LEN + TAG_LEN {
        return Err(SecurityError::CiphertextTooShort);
    }
    let (ephemeral, sealed) = data.split_at(EPHEMERAL_LEN);
    let mut ephemeral_bytes = [0u8; EPHEMERAL_LEN];
    ephemeral_bytes.copy_from_slice(ephemeral);
    let ephemeral_public = X25519PublicKey::from(ephemeral_bytes);
    let shared = keypair.exchange_secret().diffie_hellman(&ephemeral_public);
    let key = derive_key(shared.as_bytes(), &ephemeral_bytes)?;
    decrypt_session(&key, sealed)
}

fn derive_key(shared: &[u8; 32], ephemeral_public: &[u8; 32]) -> Result<SessionKey, SecurityError> {
    let hk = Hkdf::<Sha256>::new(Some(&ephemeral_public[..]), shared);
    let mut key = [0u8; 32];
    hk.expand(HKDF_INFO, &mut key)
        .map_err(|_| SecurityError::KeyDerivation)?;
    Ok(SessionKey::from_bytes(key))
}

#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("invalid key")]
    Key,
    #[error("public key: {0}")]
    PublicKey(#[from] KeyError),
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
    #[error("ciphertext too short")]
    CiphertextTooShort,
    #[error("malformed signature")]
    InvalidSignature,
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("decrypted envelope: {0}")]
    Envelope(#[from] EnvelopeError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;

    fn text(body: &[u8]) -> Envelope {
        Envelope::new("alice", "bob", 77, MessageType::Text.tag(), body, &[])
    }

    #[test]
    fn sign_then_verify() {
        let kp = Keypair::generate();
        let signed = sign_envelope(&text(b"hello"), &kp);
        assert_eq!(signed.signature_len(), 64);
        assert_eq!(signed.sequence(), 77);
        assert!(verify_envelope(&signed, kp.public_key()).is_ok());
    }

    #[test]
    fn verify_rejects_other_key() {
        let kp = Keypair::generate();
        let signed = sign_envelope(&text(b"hello"), &kp);
        let other = Keypair::generate();
        assert!(matches!(
            verify_envelope(&signed, other.public_key()),
            Err(SecurityError::VerificationFailed)
        ));
    }

    #[test]
    fn verify_rejects_tampered_body() {
        let kp = Keypair::generate();
        let signed = sign_envelope(&text(b"hello"), &kp);
        let forged = Envelope::new(
            "alice",
            "bob",
            77,
            MessageType::Text.tag(),
            b"hellO",
            &signed.signature(),
        );
        assert!(verify_envelope(&forged, kp.public_key()).is_err());
    }

    #[test]
    fn verify_rejects_missing_signature() {
        let kp = Keypair::generate();
        assert!(matches!(
            verify_envelope(&text(b"x"), kp.public_key()),
            Err(SecurityError::InvalidSignature)
        ));
    }

    #[test]
    fn session_seal_open() {
        let key = SessionKey::generate();
        let env = text(b"over the session");
        let frame = seal(&env, SealKey::Session(&key)).unwrap();
        assert_eq!(frame.sender, "alice");
        assert_ne!(frame.payload, env.raw_buffer());
        let opened = open(frame, OpenKey::Session(&key)).unwrap();
        assert_eq!(opened, env);
    }

    #[test]
    fn peer_seal_open() {
        let bob = Keypair::generate();
        let env = sign_envelope(&text(b"handshake"), &Keypair::generate());
        let frame = seal(&env, SealKey::Peer(bob.public_key())).unwrap();
        let opened = open(frame, OpenKey::Local(&bob)).unwrap();
        assert_eq!(opened, env);
    }

    #[test]
    fn wrong_keys_fail_to_open() {
        let bob = Keypair::generate();
        let env = text(b"secret");
        let frame = seal(&env, SealKey::Peer(bob.public_key())).unwrap();
        let eve = Keypair::generate();
        assert!(matches!(
            open(frame.clone(), OpenKey::Local(&eve)),
            Err(SecurityError::Decrypt)
        ));
        assert!(open(frame, OpenKey::Session(&SessionKey::generate())).is_err());
    }

    #[test]
    fn short_ciphertext_rejected() {
        let key = SessionKey::generate();
        assert!(matches!(
            decrypt_session(&key, &[0u8; 10]),
            Err(SecurityError::CiphertextTooShort)
        ));
        let kp = Keypair::generate();
        assert!(matches!(
            decrypt_with(&kp, &[0u8; 40]),
            Err(SecurityError::CiphertextTooShort)
        ));
    }
}
