//! Events a node reports to its user. `Display` renders the console line.

use std::fmt;

use crate::contact::{Contact, Endpoint};
use crate::protocol::MessageType;

/// Why an inbound message was discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Envelope or frame failed to parse.
    Malformed(String),
    /// Sender has no known public key.
    UnknownSender,
    /// Signature missing or not matching the sender's key.
    BadSignature,
    /// OK from someone we never invited.
    NotInvited,
    /// OK while a conversation is already running.
    AlreadyInConversation,
    /// ADD or TEXT from someone outside the conversation.
    NotMember(MessageType),
    /// Type tag outside the protocol.
    UnknownType(u8),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Malformed(why) => write!(f, "malformed message ({})", why),
            Rejection::UnknownSender => f.write_str("message from unknown sender"),
            Rejection::BadSignature => f.write_str("invalid signature"),
            Rejection::NotInvited => f.write_str("OK without a pending invite"),
            Rejection::AlreadyInConversation => {
                f.write_str("OK refused, a conversation is already in progress")
            }
            Rejection::NotMember(kind) => write!(f, "{} from a non-member", kind),
            Rejection::UnknownType(tag) => write!(f, "illegal message type 0x{:02X}", tag),
        }
    }
}

/// Something the user should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    InviteReceived { from: String, origin: Endpoint },
    Joined { from: String, origin: Endpoint },
    Left { from: String, origin: Endpoint },
    Message { from: String, text: String },
    Members(Vec<String>),
    Pending { sent: Vec<String>, received: Vec<String> },
    Rejected {
        from: String,
        origin: Endpoint,
        reason: Rejection,
    },
    UnknownContact(String),
    AlreadyMember(String),
    InviteSent {
        to: String,
        delivered: usize,
        total: usize,
    },
    NoInviteFrom(String),
    Accepted(String),
    AcceptFailed(String),
    Gossiped { delivered: usize, total: usize },
    NoConversation,
    Closed { delivered: usize, total: usize },
    Sent {
        from: String,
        text: String,
        delivered: usize,
        total: usize,
    },
    Directory(Vec<Contact>),
    Help,
}

const HELP: &str = " ? , help           - show this help
 *                  - show the contact directory
 > , <              - list members / pending invites
 >name              - invite [name]
 <name              - accept the invite from [name]
 .                  - leave the conversation
 bye,exit,quit,stop - quit
 anything else      - send text to the conversation";

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::InviteReceived { from, origin } => write!(f, " <<<SYN from {}@{}>>>", from, origin),
            Event::Joined { from, origin } => write!(f, " <<<OK from {}@{}>>>", from, origin),
            Event::Left { from, origin } => write!(f, " <<<FIN from {}@{}>>>", from, origin),
            Event::Message { from, text } => write!(f, "[{}] {}", from, text),
            Event::Members(names) => {
                f.write_str(" Members:\n ========")?;
                for n in names {
                    write!(f, "\n {}", n)?;
                }
                Ok(())
            }
            Event::Pending { sent, received } => write!(
                f,
                " Invited: {}\n Waiting for you: {}",
                sent.join(", "),
                received.join(", ")
            ),
            Event::Rejected {
                from,
                origin,
                reason,
            } => write!(f, " !!! {} from {}@{} !!!", reason, from, origin),
            Event::UnknownContact(name) => write!(f, " \"{}\" unknown.", name),
            Event::AlreadyMember(name) => write!(f, " \"{}\" is already a member.", name),
            Event::InviteSent {
                to,
                delivered,
                total,
            } => write!(f, " Delivered {} SYN of {} for \"{}\".", delivered, total, to),
            Event::NoInviteFrom(name) => write!(f, " No SYN received from \"{}\".", name),
            Event::Accepted(name) => write!(f, " OK delivered to \"{}\".", name),
            Event::AcceptFailed(name) => write!(f, " Could not deliver OK to \"{}\".", name),
            Event::Gossiped { delivered, total } => {
                write!(f, " Notified {} members of {}.", delivered, total)
            }
            Event::NoConversation => f.write_str(" No conversation in progress."),
            Event::Closed { delivered, total } => {
                write!(f, " Closed {} conversations of {}.", delivered, total)
            }
            Event::Sent {
                from,
                text,
                delivered,
                total,
            } => write!(f, "[{}] {} {{{}/{}}}", from, text, delivered, total),
            Event::Directory(contacts) => {
                let mut first = true;
                for c in contacts {
                    if !first {
                        f.write_str("\n")?;
                    }
                    first = false;
                    write!(f, "{} ({})", c, c.public_key().fingerprint())?;
                }
                Ok(())
            }
            Event::Help => f.write_str(HELP),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_line_format() {
        let e = Event::Message {
            from: "A".into(),
            text: "hi".into(),
        };
        assert_eq!(e.to_string(), "[A] hi");
    }

    #[test]
    fn sent_line_shows_delivery_ratio() {
        let e = Event::Sent {
            from: "A".into(),
            text: "hi".into(),
            delivered: 1,
            total: 2,
        };
        assert_eq!(e.to_string(), "[A] hi {1/2}");
    }

    #[test]
    fn rejection_names_sender_and_origin() {
        let e = Event::Rejected {
            from: "mallory".into(),
            origin: "10.0.0.9:2001".parse().unwrap(),
            reason: Rejection::UnknownType(0x03),
        };
        assert_eq!(
            e.to_string(),
            " !!! illegal message type 0x03 from mallory@10.0.0.9:2001 !!!"
        );
    }
}
