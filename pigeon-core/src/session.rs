//! Node session state and the conversation state machine.
//!
//! No I/O: the host hands datagrams in and gets [`Event`]s back. Outbound datagrams are
//! built in plaintext by [`SessionState::datagram`] and protected by
//! [`SessionState::seal_outbound`] when the transport stamps their sequence number;
//! inbound ones are unwrapped by [`SessionState::open_inbound`] before dedup and then
//! dispatched by [`SessionState::handle_datagram`].

use std::collections::BTreeSet;

use rand::Rng;
use tracing::{debug, warn};

use crate::contact::{validate_name, Contact, ContactError, Endpoint};
use crate::directory::{ContactBook, Directory};
use crate::envelope::{Envelope, EnvelopeError};
use crate::event::{Event, Rejection};
use crate::identity::{Keypair, PublicKey, SessionKey};
use crate::protocol::MessageType;
use crate::security::{self, OpenKey, SealKey, SecurityError, SecuritySettings};
use crate::snapshot::{self, SnapshotError};
use crate::wire::{decode_frame, encode_frame, Frame, FrameDecodeError, FrameEncodeError};

const SEED_SPAN: i32 = 0xffff;
const MAX_STEP: i32 = 0xffff;

/// Per-node sequence numbers: random seed near `i32::MIN`, random positive steps.
#[derive(Debug, Clone)]
pub struct SequenceCounter {
    current: i32,
}

impl SequenceCounter {
    pub fn new() -> Self {
        let offset = rand::thread_rng().gen_range(0..SEED_SPAN);
        Self::seeded(i32::MIN.wrapping_add(offset))
    }

    pub fn seeded(seed: i32) -> Self {
        Self { current: seed }
    }

    /// Step forward by 1..=0xffff (wrapping) and return the new value.
    pub fn advance(&mut self) -> i32 {
        let step = rand::thread_rng().gen_range(1..=MAX_STEP);
        self.current = self.current.wrapping_add(step);
        self.current
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// A pending invite ready to be answered with OK.
#[derive(Debug, Clone)]
pub struct Welcome {
    pub contact: Contact,
    pub session_key: SessionKey,
    /// OK body: session key plus the current members.
    pub body: Vec<u8>,
}

/// Everything one node knows: identity, directory, invites, membership and keys.
pub struct SessionState {
    name: String,
    keypair: Keypair,
    directory: Box<dyn Directory>,
    invites_sent: BTreeSet<String>,
    invites_received: ContactBook,
    members: ContactBook,
    session_key: Option<SessionKey>,
    /// Key of the conversation that ended last; opens late retransmissions from it.
    retired_key: Option<SessionKey>,
    sequence: SequenceCounter,
    settings: SecuritySettings,
}

impl SessionState {
    /// The local name is dropped from the directory so a node never invites itself.
    pub fn new(
        name: impl Into<String>,
        keypair: Keypair,
        directory: impl Directory + 'static,
        settings: SecuritySettings,
    ) -> Result<Self, ContactError> {
        let name = name.into();
        validate_name(&name)?;
        let mut directory: Box<dyn Directory> = Box::new(directory);
        directory.remove(&name);
        Ok(Self {
            name,
            keypair,
            directory,
            invites_sent: BTreeSet::new(),
            invites_received: ContactBook::new(),
            members: ContactBook::new(),
            session_key: None,
            retired_key: None,
            sequence: SequenceCounter::new(),
            settings,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn public_key(&self) -> &PublicKey {
        self.keypair.public_key()
    }

    pub fn settings(&self) -> SecuritySettings {
        self.settings
    }

    pub fn directory(&self) -> &dyn Directory {
        self.directory.as_ref()
    }

    /// For contacts learned after startup.
    pub fn directory_mut(&mut self) -> &mut (dyn Directory + 'static) {
        self.directory.as_mut()
    }

    pub fn members(&self) -> &ContactBook {
        &self.members
    }

    pub fn pending_inbound(&self) -> &ContactBook {
        &self.invites_received
    }

    pub fn invites_sent(&self) -> Vec<String> {
        self.invites_sent.iter().cloned().collect()
    }

    /// Defined exactly while membership is non-empty.
    pub fn session_key(&self) -> Option<&SessionKey> {
        self.session_key.as_ref()
    }

    pub fn is_member(&self, name: &str) -> bool {
        self.members.contains(name)
    }

    pub fn in_conversation(&self) -> bool {
        !self.members.is_empty()
    }

    /// Current members, cloned so the caller can release the lock before sending.
    pub fn member_contacts(&self) -> Vec<Contact> {
        self.members.iter().cloned().collect()
    }

    pub fn lookup(&self, name: &str) -> Option<Contact> {
        self.directory.lookup(name).cloned()
    }

    /// Public key for `name`: members first, then pending invites, then the directory.
    pub fn key_for(&self, name: &str) -> Option<&PublicKey> {
        self.members
            .lookup(name)
            .or_else(|| self.invites_received.lookup(name))
            .or_else(|| self.directory.lookup(name))
            .map(Contact::public_key)
    }

    pub fn record_invite_sent(&mut self, name: &str) {
        self.invites_sent.insert(name.to_owned());
    }

    /// Plaintext datagram from us to `to`; sequence, signature and cipher are applied later
    /// by [`seal_outbound`](Self::seal_outbound).
    pub fn datagram(
        &self,
        to: &str,
        kind: MessageType,
        body: &[u8],
    ) -> Result<Vec<u8>, SealError> {
        let envelope = Envelope::unsigned(self.name.as_str(), to, kind, body);
        Ok(encode_frame(&Frame::from(envelope))?)
    }

    /// Build the OK answering `name`'s invite. State is untouched until [`admit`](Self::admit).
    pub fn prepare_welcome(&self, name: &str) -> Result<Welcome, AcceptError> {
        if self.members.contains(name) {
            return Err(AcceptError::AlreadyMember(name.to_owned()));
        }
        let contact = self
            .invites_received
            .lookup(name)
            .cloned()
            .ok_or_else(|| AcceptError::NoInvite(name.to_owned()))?;
        let session_key = self
            .session_key
            .clone()
            .unwrap_or_else(SessionKey::generate);
        let body = snapshot::encode_welcome(&session_key, self.members.iter())?;
        Ok(Welcome {
            contact,
            session_key,
            body,
        })
    }

    /// Make a delivered welcome effective. Returns the members that were already present,
    /// who still need an ADD for the newcomer.
    pub fn admit(&mut self, welcome: Welcome) -> Vec<Contact> {
        let existing = self.member_contacts();
        if self.members.is_empty() {
            self.session_key = Some(welcome.session_key);
        }
        self.invites_received.remove(welcome.contact.name());
        self.members.upsert(welcome.contact);
        existing
    }

    /// Drop every member and the session key.
    pub fn clear_members(&mut self) {
        self.members.clear();
        self.retire_key();
    }

    fn retire_key(&mut self) {
        if let Some(key) = self.session_key.take() {
            self.retired_key = Some(key);
        }
    }

    fn remove_member(&mut self, name: &str) -> Option<Contact> {
        let removed = self.members.remove(name);
        if self.members.is_empty() {
            self.retire_key();
        }
        removed
    }

    fn merge_members(&mut self, contacts: Vec<Contact>) {
        for c in contacts {
            if c.name() == self.name {
                continue;
            }
            match self.members.remove(c.name()) {
                Some(mut known) => {
                    for e in c.endpoints() {
                        known.add_endpoint(*e);
                    }
                    self.members.upsert(known);
                }
                None => self.members.upsert(c),
            }
        }
    }

    /// Outbound hook body: stamp a fresh sequence number, sign, encrypt, re-frame.
    pub fn seal_outbound(&mut self, datagram: &[u8]) -> Result<(i32, Vec<u8>), SealError> {
        let mut envelope = decode_frame(datagram)?.into_envelope()?;
        let seq = self.sequence.advance();
        envelope.set_sequence(seq);
        if self.settings.sign {
            envelope = security::sign_envelope(&envelope, &self.keypair);
        }
        let frame = if self.settings.encrypt {
            let recipient = envelope.recipient();
            let key = if self.members.contains(recipient) {
                SealKey::Session(self.session_key.as_ref().ok_or(SealError::NoSessionKey)?)
            } else {
                SealKey::Peer(
                    self.key_for(recipient)
                        .ok_or_else(|| SealError::UnknownRecipient(recipient.to_owned()))?,
                )
            };
            security::seal(&envelope, key)?
        } else {
            Frame::from(envelope)
        };
        Ok((seq, encode_frame(&frame)?))
    }

    /// Inbound hook body: decrypt and return the sequence number plus the plaintext datagram.
    pub fn open_inbound(&self, datagram: &[u8]) -> Result<(i32, Vec<u8>), SealError> {
        let frame = decode_frame(datagram)?;
        if frame.recipient != self.name {
            return Err(SealError::Misaddressed(frame.recipient));
        }
        let envelope = if self.settings.encrypt {
            self.open_frame(frame)?
        } else {
            frame.into_envelope()?
        };
        let seq = envelope.sequence();
        Ok((seq, encode_frame(&Frame::from(envelope))?))
    }

    /// Membership picks the first key to try. A retransmission may have been sealed before
    /// its sender joined or left, so the remaining keys are tried after it.
    fn open_frame(&self, frame: Frame) -> Result<Envelope, SealError> {
        let local = std::iter::once(OpenKey::Local(&self.keypair));
        let shared = self
            .session_key
            .iter()
            .chain(&self.retired_key)
            .map(OpenKey::Session);
        let keys: Vec<OpenKey<'_>> = if self.members.contains(&frame.sender) {
            shared.chain(local).collect()
        } else {
            local.chain(shared).collect()
        };
        let mut failure = SealError::NoSessionKey;
        for key in keys {
            match security::open(frame.clone(), key) {
                Ok(envelope) => return Ok(envelope),
                Err(e) => failure = e.into(),
            }
        }
        Err(failure)
    }

    /// Dispatch one plaintext datagram received from `origin`.
    pub fn handle_datagram(&mut self, datagram: &[u8], origin: Endpoint) -> Vec<Event> {
        let envelope = match decode_frame(datagram)
            .map_err(|e| e.to_string())
            .and_then(|f| f.into_envelope().map_err(|e| e.to_string()))
        {
            Ok(env) => env,
            Err(why) => {
                warn!(%origin, error = %why, "malformed datagram");
                return vec![Event::Rejected {
                    from: String::from("?"),
                    origin,
                    reason: Rejection::Malformed(why),
                }];
            }
        };
        if envelope.recipient() != self.name {
            debug!(%origin, recipient = envelope.recipient(), "datagram for someone else");
            return Vec::new();
        }
        let from = envelope.sender().to_owned();
        if self.settings.sign {
            let verified = match self.key_for(&from) {
                None => Err(Rejection::UnknownSender),
                Some(key) => security::verify_envelope(&envelope, key)
                    .map_err(|_| Rejection::BadSignature),
            };
            if let Err(reason) = verified {
                return vec![reject(from, origin, reason)];
            }
        }
        let body = envelope.body();
        match MessageType::from_tag(envelope.kind()) {
            Some(MessageType::Syn) => self.on_syn(from, origin),
            Some(MessageType::Ok) => self.on_ok(from, origin, &body),
            Some(MessageType::Add) => self.on_add(from, origin, &body),
            Some(MessageType::Text) => {
                if !self.members.contains(&from) {
                    return vec![reject(from, origin, Rejection::NotMember(MessageType::Text))];
                }
                let text = String::from_utf8_lossy(&body).into_owned();
                vec![Event::Message { from, text }]
            }
            Some(MessageType::Fin) => {
                if self.remove_member(&from).is_none() {
                    debug!(peer = %from, %origin, "FIN from non-member ignored");
                    return Vec::new();
                }
                vec![Event::Left { from, origin }]
            }
            None => vec![reject(from, origin, Rejection::UnknownType(envelope.kind()))],
        }
    }

    fn on_syn(&mut self, from: String, origin: Endpoint) -> Vec<Event> {
        let Some(known) = self.directory.lookup(&from) else {
            return vec![reject(from, origin, Rejection::UnknownSender)];
        };
        let endpoints = std::iter::once(origin).chain(known.endpoints().iter().copied());
        match Contact::with_endpoints(from.as_str(), *known.public_key(), endpoints) {
            Ok(contact) => {
                self.invites_received.upsert(contact);
                vec![Event::InviteReceived { from, origin }]
            }
            Err(e) => vec![reject(from, origin, Rejection::Malformed(e.to_string()))],
        }
    }

    fn on_ok(&mut self, from: String, origin: Endpoint, body: &[u8]) -> Vec<Event> {
        if !self.invites_sent.contains(&from) {
            return vec![reject(from, origin, Rejection::NotInvited)];
        }
        if self.in_conversation() {
            return vec![reject(from, origin, Rejection::AlreadyInConversation)];
        }
        let Some(key) = self.directory.lookup(&from).map(|c| *c.public_key()) else {
            return vec![reject(from, origin, Rejection::UnknownSender)];
        };
        let snapshot = match snapshot::decode(body) {
            Ok(s) => s,
            Err(e) => return vec![reject(from, origin, Rejection::Malformed(e.to_string()))],
        };
        let Some(session_key) = snapshot.session_key else {
            return vec![reject(
                from,
                origin,
                Rejection::Malformed("OK without session key".into()),
            )];
        };
        let sender = match Contact::new(from.as_str(), key, origin) {
            Ok(c) => c,
            Err(e) => return vec![reject(from, origin, Rejection::Malformed(e.to_string()))],
        };
        self.members.upsert(sender);
        self.merge_members(snapshot.contacts);
        self.session_key = Some(session_key);
        self.invites_sent.remove(&from);
        vec![
            Event::Joined { from, origin },
            Event::Members(self.members.names()),
        ]
    }

    fn on_add(&mut self, from: String, origin: Endpoint, body: &[u8]) -> Vec<Event> {
        if !self.members.contains(&from) {
            return vec![reject(from, origin, Rejection::NotMember(MessageType::Add))];
        }
        match snapshot::decode(body) {
            Ok(s) => {
                self.merge_members(s.contacts);
                vec![Event::Members(self.members.names())]
            }
            Err(e) => vec![reject(from, origin, Rejection::Malformed(e.to_string()))],
        }
    }
}

fn reject(from: String, origin: Endpoint, reason: Rejection) -> Event {
    warn!(peer = %from, %origin, %reason, "message rejected");
    Event::Rejected {
        from,
        origin,
        reason,
    }
}

/// Failure inside the sequence-number hooks.
#[derive(Debug, thiserror::Error)]
pub enum SealError {
    #[error("frame: {0}")]
    FrameDecode(#[from] FrameDecodeError),
    #[error("frame: {0}")]
    FrameEncode(#[from] FrameEncodeError),
    #[error("envelope: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error(transparent)]
    Security(#[from] SecurityError),
    #[error("no public key for recipient {0}")]
    UnknownRecipient(String),
    #[error("member traffic without a session key")]
    NoSessionKey,
    #[error("datagram addressed to {0}")]
    Misaddressed(String),
}

/// Why an accept could not be prepared.
#[derive(Debug, thiserror::Error)]
pub enum AcceptError {
    #[error("no SYN received from {0}")]
    NoInvite(String),
    #[error("{0} is already a member")]
    AlreadyMember(String),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}
