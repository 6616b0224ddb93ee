//! Envelope: the unit exchanged between nodes.
//!
//! The payload buffer is laid out big-endian as
//! `seq (4) | signature length N (4) | type (1) | body | signature (N)`,
//! so `body length = buffer length - 9 - N`.

use crate::protocol::MessageType;

/// Fixed header: sequence number, signature length, type tag.
pub const HEADER_LEN: usize = 4 + 4 + 1;

const SEQ_OFFSET: usize = 0;
const SIG_LEN_OFFSET: usize = 4;
const TYPE_OFFSET: usize = 8;

/// Sender, recipient and a validated payload buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    sender: String,
    recipient: String,
    buffer: Vec<u8>,
}

impl Envelope {
    /// Build an envelope with every field explicit. Offsets and total length are computed here.
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        seq: i32,
        kind: u8,
        body: &[u8],
        signature: &[u8],
    ) -> Self {
        let mut buffer = Vec::with_capacity(HEADER_LEN + body.len() + signature.len());
        buffer.extend_from_slice(&seq.to_be_bytes());
        buffer.extend_from_slice(&(signature.len() as i32).to_be_bytes());
        buffer.push(kind);
        buffer.extend_from_slice(body);
        buffer.extend_from_slice(signature);
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            buffer,
        }
    }

    /// Sequence number 0, no signature. The transport hook fills in both later.
    pub fn unsigned(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        kind: MessageType,
        body: &[u8],
    ) -> Self {
        Self::new(sender, recipient, 0, kind.tag(), body, &[])
    }

    /// Wrap a received buffer, checking the header and the signature-length invariant.
    pub fn from_buffer(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        buffer: Vec<u8>,
    ) -> Result<Self, EnvelopeError> {
        if buffer.len() < HEADER_LEN {
            return Err(EnvelopeError::Truncated(buffer.len()));
        }
        let sig_len = read_i32(&buffer, SIG_LEN_OFFSET);
        if sig_len < 0 {
            return Err(EnvelopeError::NegativeSignatureLength(sig_len));
        }
        if HEADER_LEN + sig_len as usize > buffer.len() {
            return Err(EnvelopeError::SignatureOverrun {
                signature: sig_len as usize,
                available: buffer.len() - HEADER_LEN,
            });
        }
        Ok(Self {
            sender: sender.into(),
            recipient: recipient.into(),
            buffer,
        })
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn sequence(&self) -> i32 {
        read_i32(&self.buffer, SEQ_OFFSET)
    }

    /// Overwrite the sequence number; body and signature are untouched.
    pub fn set_sequence(&mut self, seq: i32) {
        self.buffer[SEQ_OFFSET..SEQ_OFFSET + 4].copy_from_slice(&seq.to_be_bytes());
    }

    pub fn signature_len(&self) -> usize {
        read_i32(&self.buffer, SIG_LEN_OFFSET) as usize
    }

    /// Raw type tag; see [`MessageType::from_tag`].
    pub fn kind(&self) -> u8 {
        self.buffer[TYPE_OFFSET]
    }

    pub fn body_len(&self) -> usize {
        self.buffer.len() - HEADER_LEN - self.signature_len()
    }

    /// Copy of the body.
    pub fn body(&self) -> Vec<u8> {
        self.body_slice().to_vec()
    }

    /// Copy of the signature; empty when unsigned.
    pub fn signature(&self) -> Vec<u8> {
        let start = self.buffer.len() - self.signature_len();
        self.buffer[start..].to_vec()
    }

    /// Same sequence, type and body with `signature` replacing any previous one.
    pub fn with_signature(&self, signature: &[u8]) -> Self {
        Self::new(
            self.sender.clone(),
            self.recipient.clone(),
            self.sequence(),
            self.kind(),
            self.body_slice(),
            signature,
        )
    }

    /// Live backing storage, for whole-buffer cryptographic transforms.
    pub fn raw_buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_parts(self) -> (String, String, Vec<u8>) {
        (self.sender, self.recipient, self.buffer)
    }

    pub(crate) fn body_slice(&self) -> &[u8] {
        &self.buffer[HEADER_LEN..self.buffer.len() - self.signature_len()]
    }
}

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    i32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

/// Error wrapping a buffer that does not satisfy the envelope layout.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("envelope too short: {0} bytes")]
    Truncated(usize),
    #[error("negative signature length {0}")]
    NegativeSignatureLength(i32),
    #[error("signature of {signature} bytes overruns {available} payload bytes")]
    SignatureOverrun { signature: usize, available: usize },
}
