//! Sequence hooks backed by the node session: seal on the way out, open on the way in.

use std::sync::Arc;

use parking_lot::Mutex;
use pigeon_core::{decode_frame, SealError, SessionState};
use tracing::warn;

use crate::transport::{InPacket, OutPacket, SequenceHooks};

/// Bridges transport and session. The session lock is taken only for the duration of
/// one seal or open.
pub struct EnvelopeSealer {
    session: Arc<Mutex<SessionState>>,
}

impl EnvelopeSealer {
    pub fn new(session: Arc<Mutex<SessionState>>) -> Self {
        Self { session }
    }
}

impl SequenceHooks for EnvelopeSealer {
    fn insert_sequence_number(&mut self, packet: &mut OutPacket) -> anyhow::Result<i32> {
        let (seq, sealed) = self.session.lock().seal_outbound(&packet.payload)?;
        packet.payload = sealed;
        Ok(seq)
    }

    fn extract_sequence_number(&mut self, packet: &mut InPacket) -> anyhow::Result<i32> {
        let opened = self.session.lock().open_inbound(&packet.payload);
        let (seq, opened) = match opened {
            Ok(r) => r,
            Err(e) => {
                if let Some(sender) = offender(&e, &packet.payload) {
                    warn!(peer = %sender, origin = %packet.origin, error = %e, "datagram discarded");
                }
                return Err(e.into());
            }
        };
        packet.payload = opened;
        Ok(seq)
    }
}

/// Claimed sender to report for a datagram that could not be opened. Datagrams for
/// another recipient are dropped quietly.
fn offender(error: &SealError, datagram: &[u8]) -> Option<String> {
    match error {
        SealError::Misaddressed(_) => None,
        _ => Some(
            decode_frame(datagram)
                .map(|f| f.sender)
                .unwrap_or_else(|_| String::from("?")),
        ),
    }
}
