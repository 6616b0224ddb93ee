//! Pigeon protocol core: envelope codec, security pipeline and conversation state.
//! Host-driven: no I/O; the host feeds datagrams in and prints the events that come out.

pub mod contact;
pub mod directory;
pub mod envelope;
pub mod event;
pub mod identity;
pub mod protocol;
pub mod security;
pub mod session;
pub mod snapshot;
pub mod wire;

pub use contact::{Contact, ContactError, Endpoint};
pub use directory::{ContactBook, Directory};
pub use envelope::{Envelope, EnvelopeError};
pub use event::{Event, Rejection};
pub use identity::{Fingerprint, KeyError, Keypair, PublicKey, SessionKey};
pub use protocol::{MessageType, PROTOCOL_VERSION};
pub use security::{SecurityError, SecuritySettings};
pub use session::{AcceptError, SealError, SequenceCounter, SessionState, Welcome};
pub use wire::{decode_frame, encode_frame, Frame, FrameDecodeError, FrameEncodeError, MAX_DATAGRAM_LEN};
