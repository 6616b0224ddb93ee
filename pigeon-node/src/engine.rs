//! Protocol engine: turns commands into batches for the transport and inbound datagrams
//! into session updates.
//!
//! The session guard is never held across a transport call; the hooks take it themselves.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pigeon_core::{
    snapshot, AcceptError, Contact, Endpoint, Event, MessageType, SealError, SessionKey,
    SessionState,
};
use tracing::{debug, info, warn};

use crate::commands::{Command, CommandSource};
use crate::sealer::EnvelopeSealer;
use crate::transport::{OutPacket, ReliableSocket, TransportConfig};

/// Idle pause of the polling loop when there was neither a command nor a datagram.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// One running node. Cheap to clone; clones share state and socket.
#[derive(Clone)]
pub struct Engine {
    session: Arc<Mutex<SessionState>>,
    transport: Arc<ReliableSocket<EnvelopeSealer>>,
}

impl Engine {
    pub async fn bind(
        state: SessionState,
        addr: SocketAddr,
        config: TransportConfig,
    ) -> io::Result<Self> {
        let session = Arc::new(Mutex::new(state));
        let transport =
            ReliableSocket::bind(addr, EnvelopeSealer::new(session.clone()), config).await?;
        Ok(Self {
            session,
            transport: Arc::new(transport),
        })
    }

    pub fn local_endpoint(&self) -> Endpoint {
        self.transport.local_endpoint()
    }

    pub fn session(&self) -> Arc<Mutex<SessionState>> {
        self.session.clone()
    }

    pub fn members(&self) -> Vec<String> {
        self.session.lock().members().names()
    }

    pub fn session_key(&self) -> Option<SessionKey> {
        self.session.lock().session_key().cloned()
    }

    /// `>name`: SYN to every endpoint of `name`.
    pub async fn invite(&self, name: &str) -> io::Result<Event> {
        let (contact, datagram) = {
            let mut s = self.session.lock();
            let Some(contact) = s.lookup(name) else {
                return Ok(Event::UnknownContact(name.to_owned()));
            };
            if s.is_member(name) {
                return Ok(Event::AlreadyMember(name.to_owned()));
            }
            s.record_invite_sent(name);
            (contact, s.datagram(name, MessageType::Syn, b"").map_err(invalid)?)
        };
        let packets: Vec<OutPacket> = contact
            .endpoints()
            .iter()
            .map(|e| OutPacket {
                destination: *e,
                payload: datagram.clone(),
            })
            .collect();
        let total = packets.len();
        let delivered = self.transport.send(packets).await?;
        info!(peer = name, delivered, total, "SYN sent");
        Ok(Event::InviteSent {
            to: name.to_owned(),
            delivered,
            total,
        })
    }

    /// `<name`: OK to the inviter; on delivery admit them and gossip ADD to the others.
    pub async fn accept(&self, name: &str) -> io::Result<Vec<Event>> {
        let (welcome, datagram) = {
            let s = self.session.lock();
            let welcome = match s.prepare_welcome(name) {
                Ok(w) => w,
                Err(AcceptError::NoInvite(n)) => return Ok(vec![Event::NoInviteFrom(n)]),
                Err(AcceptError::AlreadyMember(n)) => return Ok(vec![Event::AlreadyMember(n)]),
                Err(e) => return Err(invalid(e)),
            };
            let datagram = s
                .datagram(name, MessageType::Ok, &welcome.body)
                .map_err(invalid)?;
            (welcome, datagram)
        };
        let packet = OutPacket {
            destination: welcome.contact.primary_endpoint(),
            payload: datagram,
        };
        if self.transport.send(vec![packet]).await? == 0 {
            warn!(peer = name, "OK not acknowledged");
            return Ok(vec![Event::AcceptFailed(name.to_owned())]);
        }
        let joiner = welcome.contact.clone();
        let (existing, add) = {
            let mut s = self.session.lock();
            let existing = s.admit(welcome);
            let body = snapshot::encode_joiner(&joiner).map_err(invalid)?;
            let add = datagrams_for(&s, &existing, MessageType::Add, &body).map_err(invalid)?;
            (existing, add)
        };
        let mut events = vec![Event::Accepted(name.to_owned())];
        if !existing.is_empty() {
            let total = add.len();
            let delivered = self.transport.send(add).await?;
            debug!(peer = name, delivered, total, "ADD gossiped");
            events.push(Event::Gossiped { delivered, total });
        }
        events.push(self.list_members());
        Ok(events)
    }

    /// `.`: FIN to every member, then drop the conversation whatever the acks say.
    pub async fn leave(&self) -> io::Result<Event> {
        let fins = {
            let s = self.session.lock();
            if !s.in_conversation() {
                return Ok(Event::NoConversation);
            }
            datagrams_for(&s, &s.member_contacts(), MessageType::Fin, b"").map_err(invalid)?
        };
        let total = fins.len();
        let result = self.transport.send(fins).await;
        self.session.lock().clear_members();
        let delivered = result?;
        info!(delivered, total, "conversation closed");
        Ok(Event::Closed { delivered, total })
    }

    /// Broadcast TEXT to the conversation and echo it locally.
    pub async fn say(&self, text: &str) -> io::Result<Event> {
        let (me, packets) = {
            let s = self.session.lock();
            if !s.in_conversation() {
                return Ok(Event::NoConversation);
            }
            let packets = datagrams_for(&s, &s.member_contacts(), MessageType::Text, text.as_bytes())
                .map_err(invalid)?;
            (s.name().to_owned(), packets)
        };
        let total = packets.len();
        let delivered = self.transport.send(packets).await?;
        Ok(Event::Sent {
            from: me,
            text: text.to_owned(),
            delivered,
            total,
        })
    }

    pub fn list_members(&self) -> Event {
        Event::Members(self.members())
    }

    pub fn list_pending(&self) -> Event {
        let s = self.session.lock();
        Event::Pending {
            sent: s.invites_sent(),
            received: s.pending_inbound().names(),
        }
    }

    pub fn show_directory(&self) -> Event {
        let s = self.session.lock();
        Event::Directory(s.directory().contacts().into_iter().cloned().collect())
    }

    /// Run one command. [`Command::Quit`] leaves the conversation but keeps the socket open;
    /// [`run`](Self::run) closes it.
    pub async fn execute(&self, command: Command) -> io::Result<Vec<Event>> {
        let events = match command {
            Command::Invite(name) => vec![self.invite(&name).await?],
            Command::Accept(name) => self.accept(&name).await?,
            Command::Leave => vec![self.leave().await?],
            Command::Say(text) => vec![self.say(&text).await?],
            Command::ListMembers => vec![self.list_members()],
            Command::ListPending => vec![self.list_pending()],
            Command::ShowDirectory => vec![self.show_directory()],
            Command::Help => vec![Event::Help],
            Command::Quit => {
                let active = self.session.lock().in_conversation();
                if active {
                    vec![self.leave().await?]
                } else {
                    Vec::new()
                }
            }
        };
        Ok(events)
    }

    /// Handle at most one queued inbound datagram. Never blocks on the network.
    pub async fn poll_inbound(&self) -> io::Result<Vec<Event>> {
        if self.transport.available().await? == 0 {
            return Ok(Vec::new());
        }
        let packet = self.transport.receive_one().await?;
        Ok(self
            .session
            .lock()
            .handle_datagram(&packet.payload, packet.origin))
    }

    /// Single-threaded loop: one command, then one inbound datagram, per iteration.
    /// Returns after [`Command::Quit`], with the transport closed.
    pub async fn run<S, F>(&self, commands: &mut S, mut on_event: F) -> io::Result<()>
    where
        S: CommandSource,
        F: FnMut(&Event),
    {
        loop {
            let mut busy = false;
            if let Some(command) = commands.next_command() {
                busy = true;
                let quit = command == Command::Quit;
                match self.execute(command).await {
                    Ok(events) => events.iter().for_each(&mut on_event),
                    Err(e) => warn!(error = %e, "command failed"),
                }
                if quit {
                    self.transport.close().await;
                    return Ok(());
                }
            }
            match self.poll_inbound().await {
                Ok(events) => {
                    busy |= !events.is_empty();
                    events.iter().for_each(&mut on_event);
                }
                Err(e) if e.kind() == io::ErrorKind::NotConnected => return Err(e),
                Err(e) => warn!(error = %e, "receive failed"),
            }
            if !busy {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }

    /// Leave any conversation and release the socket.
    pub async fn shutdown(&self) -> io::Result<Vec<Event>> {
        let events = self.execute(Command::Quit).await;
        self.transport.close().await;
        events
    }
}

/// One plaintext datagram per contact, addressed to its primary endpoint.
fn datagrams_for(
    state: &SessionState,
    to: &[Contact],
    kind: MessageType,
    body: &[u8],
) -> Result<Vec<OutPacket>, SealError> {
    to.iter()
        .map(|c| {
            Ok(OutPacket {
                destination: c.primary_endpoint(),
                payload: state.datagram(c.name(), kind, body)?,
            })
        })
        .collect()
}

fn invalid<E>(e: E) -> io::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    io::Error::new(io::ErrorKind::InvalidData, e)
}
