//! Pigeon node: reliable UDP transport, protocol engine and the pieces `main` wires together.

pub mod commands;
pub mod config;
pub mod engine;
pub mod keys;
pub mod sealer;
pub mod transport;

pub use commands::{Command, CommandSource, StdinCommands};
pub use engine::Engine;
pub use transport::{InPacket, OutPacket, ReliableSocket, SequenceHooks, TransportConfig};
