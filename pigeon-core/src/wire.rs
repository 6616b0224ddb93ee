//! Datagram framing: sender and recipient names (1-byte length prefix each) + opaque payload.
//!
//! The payload is either a plaintext envelope buffer or its ciphertext; names always
//! travel in clear because the receiver needs them to choose a key.

use crate::envelope::{Envelope, EnvelopeError};

/// Largest UDP payload a node will emit or accept (65535 minus an 8-byte reservation).
pub const MAX_DATAGRAM_LEN: usize = 0xFFFF - 8;

const NAME_LEN_SIZE: usize = 1;

/// One datagram as seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sender: String,
    pub recipient: String,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Parse the payload as a plaintext envelope.
    pub fn into_envelope(self) -> Result<Envelope, EnvelopeError> {
        Envelope::from_buffer(self.sender, self.recipient, self.payload)
    }
}

impl From<Envelope> for Frame {
    fn from(envelope: Envelope) -> Self {
        let (sender, recipient, payload) = envelope.into_parts();
        Frame {
            sender,
            recipient,
            payload,
        }
    }
}

/// Encode a frame into a single datagram.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, FrameEncodeError> {
    let sender = frame.sender.as_bytes();
    let recipient = frame.recipient.as_bytes();
    if sender.len() > u8::MAX as usize || recipient.len() > u8::MAX as usize {
        return Err(FrameEncodeError::NameTooLong);
    }
    let len = 2 * NAME_LEN_SIZE + sender.len() + recipient.len() + frame.payload.len();
    if len > MAX_DATAGRAM_LEN {
        return Err(FrameEncodeError::TooLarge(len));
    }
    let mut out = Vec::with_capacity(len);
    out.push(sender.len() as u8);
    out.extend_from_slice(sender);
    out.push(recipient.len() as u8);
    out.extend_from_slice(recipient);
    out.extend_from_slice(&frame.payload);
    Ok(out)
}

/// Error encoding a frame (name or total size out of range).
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("name longer than 255 bytes")]
    NameTooLong,
    #[error("datagram of {0} bytes exceeds the UDP limit")]
    TooLarge(usize),
}

/// Decode one datagram into a frame.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, FrameDecodeError> {
    if bytes.len() > MAX_DATAGRAM_LEN {
        return Err(FrameDecodeError::TooLarge(bytes.len()));
    }
    let (sender, rest) = split_name(bytes)?;
    let (recipient, payload) = split_name(rest)?;
    Ok(Frame {
        sender,
        recipient,
        payload: payload.to_vec(),
    })
}

fn split_name(bytes: &[u8]) -> Result<(String, &[u8]), FrameDecodeError> {
    let (&len, rest) = bytes.split_first().ok_or(FrameDecodeError::Truncated)?;
    let len = len as usize;
    if rest.len() < len {
        return Err(FrameDecodeError::Truncated);
    }
    let name = std::str::from_utf8(&rest[..len]).map_err(|_| FrameDecodeError::InvalidName)?;
    Ok((name.to_owned(), &rest[len..]))
}

/// Error decoding a datagram (truncated, oversized, or names not UTF-8).
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("datagram truncated")]
    Truncated,
    #[error("datagram of {0} bytes exceeds the UDP limit")]
    TooLarge(usize),
    #[error("name is not valid UTF-8")]
    InvalidName,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;

    #[test]
    fn frame_carries_envelope() {
        let env = Envelope::new("alice", "bob", 1234, MessageType::Text.tag(), b"hi", &[5; 64]);
        let bytes = encode_frame(&Frame::from(env.clone())).unwrap();
        assert_eq!(bytes[0] as usize, "alice".len());
        let decoded = decode_frame(&bytes).unwrap().into_envelope().unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn truncated_names_rejected() {
        assert!(matches!(decode_frame(&[]), Err(FrameDecodeError::Truncated)));
        assert!(matches!(
            decode_frame(&[5, b'a', b'b']),
            Err(FrameDecodeError::Truncated)
        ));
        assert!(matches!(
            decode_frame(&[1, b'a']),
            Err(FrameDecodeError::Truncated)
        ));
    }

    #[test]
    fn invalid_utf8_name_rejected() {
        assert!(matches!(
            decode_frame(&[1, 0xFF, 1, b'b', 0, 0]),
            Err(FrameDecodeError::InvalidName)
        ));
    }

    #[test]
    fn oversized_payload_rejected() {
        let frame = Frame {
            sender: "a".into(),
            recipient: "b".into(),
            payload: vec![0; MAX_DATAGRAM_LEN],
        };
        assert!(matches!(
            encode_frame(&frame),
            Err(FrameEncodeError::TooLarge(_))
        ));
    }

    #[test]
    fn opaque_payload_survives() {
        let frame = Frame {
            sender: "a".into(),
            recipient: "b".into(),
            payload: vec![0xEE; 3],
        };
        let decoded = decode_frame(&encode_frame(&frame).unwrap()).unwrap();
        assert_eq!(decoded, frame);
        assert!(decoded.into_envelope().is_err());
    }
}
