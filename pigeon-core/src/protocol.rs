//! Pigeon wire protocol: message type tags and record format version.

use std::fmt;

/// Version byte prepended to membership snapshots carried by OK and ADD.
pub const PROTOCOL_VERSION: u8 = 1;

/// Request to start or join a dialogue (SYN).
pub const SYN: u8 = 0x80;
/// Acceptance: carries the session key and membership snapshot.
pub const OK: u8 = 0x40;
/// Gossip of a newly joined member to the existing members.
pub const ADD: u8 = 0x20;
/// Chat text.
pub const TEXT: u8 = 0x10;
/// Graceful leave.
pub const FIN: u8 = 0x08;

/// The five message types understood by a node. The tag travels as one byte in the envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Syn = SYN,
    Ok = OK,
    Add = ADD,
    Text = TEXT,
    Fin = FIN,
}

impl MessageType {
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Map a header tag back to a message type. Unknown tags are protocol violations.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            SYN => Some(MessageType::Syn),
            OK => Some(MessageType::Ok),
            ADD => Some(MessageType::Add),
            TEXT => Some(MessageType::Text),
            FIN => Some(MessageType::Fin),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageType::Syn => "SYN",
            MessageType::Ok => "OK",
            MessageType::Add => "ADD",
            MessageType::Text => "TEXT",
            MessageType::Fin => "FIN",
        };
        f.write_str(s)
    }
}
