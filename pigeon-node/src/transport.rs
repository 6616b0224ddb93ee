//! Reliable delivery over UDP: sequence-numbered datagrams, 4-byte acks, bounded retries,
//! per-endpoint duplicate suppression.
//!
//! The transport never looks inside a payload. A [`SequenceHooks`] implementation stamps
//! the sequence number on the way out and reads it back on the way in; a datagram of
//! exactly [`ACK_LEN`] bytes is an ack, anything longer is application data.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use pigeon_core::Endpoint;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace, warn};

/// Length of an acknowledgment: one big-endian sequence number.
pub const ACK_LEN: usize = 4;

const RECV_BUFFER_LEN: usize = 64 * 1024;

/// Retry and dedup limits. Defaults: 3 attempts, 10 s ack window, 4096 remembered endpoints.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub attempts: u32,
    /// Wait per attempt, shared by the whole batch.
    pub ack_timeout: Duration,
    pub history_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            ack_timeout: Duration::from_secs(10),
            history_capacity: 4096,
        }
    }
}

/// Datagram waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutPacket {
    pub destination: Endpoint,
    pub payload: Vec<u8>,
}

/// Application datagram received and not yet consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InPacket {
    pub origin: Endpoint,
    pub payload: Vec<u8>,
}

/// Protocol-specific sequence handling injected into the transport.
///
/// Both hooks may rewrite the payload. A failing insert skips that packet; a failing
/// extract drops the datagram without acknowledging it.
pub trait SequenceHooks: Send {
    fn insert_sequence_number(&mut self, packet: &mut OutPacket) -> anyhow::Result<i32>;

    fn extract_sequence_number(&mut self, packet: &mut InPacket) -> anyhow::Result<i32>;
}

/// Highest sequence number delivered per endpoint, least recently used evicted first.
#[derive(Debug)]
pub struct DedupHistory {
    last_seen: IndexMap<Endpoint, i32>,
    capacity: usize,
}

impl DedupHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            last_seen: IndexMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// True when `seq` is new for `origin`; repeats and anything older are refused.
    pub fn accept(&mut self, origin: Endpoint, seq: i32) -> bool {
        let fresh = match self.last_seen.shift_remove(&origin) {
            Some(last) if seq <= last => {
                self.last_seen.insert(origin, last);
                false
            }
            _ => {
                self.last_seen.insert(origin, seq);
                true
            }
        };
        while self.last_seen.len() > self.capacity {
            self.last_seen.shift_remove_index(0);
        }
        fresh
    }

    pub fn last_seen(&self, origin: &Endpoint) -> Option<i32> {
        self.last_seen.get(origin).copied()
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

struct Outstanding {
    seq: i32,
    packet: OutPacket,
    acked: bool,
}

struct Inner<H> {
    socket: Option<Arc<UdpSocket>>,
    hooks: H,
    history: DedupHistory,
    inbox: VecDeque<InPacket>,
    buf: Vec<u8>,
}

impl<H: SequenceHooks> Inner<H> {
    fn socket(&self) -> io::Result<Arc<UdpSocket>> {
        self.socket
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport closed"))
    }

    /// Read everything the socket has without blocking. Returns how many outstanding
    /// packets got acknowledged.
    fn drain(&mut self, socket: &UdpSocket, outstanding: &mut [Outstanding]) -> io::Result<usize> {
        let mut acked = 0;
        loop {
            let (n, from) = match socket.try_recv_from(&mut self.buf) {
                Ok(r) => r,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(acked),
                Err(e) if is_transient(&e) => {
                    debug!(error = %e, "ignoring socket error");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let origin = Endpoint::from(from);
            if n < ACK_LEN {
                trace!(%origin, len = n, "discarding runt datagram");
            } else if n == ACK_LEN {
                let seq = i32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
                acked += match_ack(outstanding, seq, origin);
            } else {
                let packet = InPacket {
                    origin,
                    payload: self.buf[..n].to_vec(),
                };
                self.accept_data(socket, packet);
            }
        }
    }

    fn accept_data(&mut self, socket: &UdpSocket, mut packet: InPacket) {
        let seq = match self.hooks.extract_sequence_number(&mut packet) {
            Ok(seq) => seq,
            Err(e) => {
                debug!(origin = %packet.origin, error = %e, "dropping unreadable datagram");
                return;
            }
        };
        if let Err(e) = socket.try_send_to(&seq.to_be_bytes(), packet.origin.socket_addr()) {
            debug!(origin = %packet.origin, seq, error = %e, "ack not sent");
        }
        if self.history.accept(packet.origin, seq) {
            self.inbox.push_back(packet);
        } else {
            debug!(origin = %packet.origin, seq, "duplicate dropped");
        }
    }
}

fn match_ack(outstanding: &mut [Outstanding], seq: i32, origin: Endpoint) -> usize {
    match outstanding
        .iter_mut()
        .find(|o| !o.acked && o.seq == seq && o.packet.destination == origin)
    {
        Some(o) => {
            o.acked = true;
            1
        }
        None => {
            trace!(%origin, seq, "unmatched ack");
            0
        }
    }
}

/// ICMP feedback some platforms surface on unconnected UDP sockets.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset | io::ErrorKind::Interrupted
    )
}

/// UDP socket with ARQ and dedup. All mutable state sits behind one lock, held for the
/// whole of a send-with-retry.
pub struct ReliableSocket<H> {
    inner: Mutex<Inner<H>>,
    local: Endpoint,
    config: TransportConfig,
}

impl<H: SequenceHooks> ReliableSocket<H> {
    pub async fn bind(addr: SocketAddr, hooks: H, config: TransportConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let local = Endpoint::from(socket.local_addr()?);
        debug!(%local, "transport bound");
        Ok(Self {
            inner: Mutex::new(Inner {
                socket: Some(Arc::new(socket)),
                hooks,
                history: DedupHistory::new(config.history_capacity),
                inbox: VecDeque::new(),
                buf: vec![0u8; RECV_BUFFER_LEN],
            }),
            local,
            config,
        })
    }

    pub fn local_endpoint(&self) -> Endpoint {
        self.local
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Send a batch and return how many packets were acknowledged. Exhausting the retry
    /// budget is not an error; socket faults are.
    pub async fn send(&self, packets: Vec<OutPacket>) -> io::Result<usize> {
        let mut inner = self.inner.lock().await;
        let socket = inner.socket()?;
        let mut outstanding = Vec::with_capacity(packets.len());
        for mut packet in packets {
            match inner.hooks.insert_sequence_number(&mut packet) {
                Ok(seq) => outstanding.push(Outstanding {
                    seq,
                    packet,
                    acked: false,
                }),
                Err(e) => warn!(destination = %packet.destination, error = %e, "packet not sent"),
            }
        }
        let total = outstanding.len();
        let mut delivered = 0;
        for attempt in 1..=self.config.attempts {
            for o in outstanding.iter().filter(|o| !o.acked) {
                socket
                    .send_to(&o.packet.payload, o.packet.destination.socket_addr())
                    .await?;
            }
            let deadline = Instant::now() + self.config.ack_timeout;
            while delivered < total {
                match timeout_at(deadline, socket.readable()).await {
                    Ok(ready) => ready?,
                    Err(_) => break,
                }
                delivered += inner.drain(&socket, &mut outstanding)?;
            }
            if delivered == total {
                break;
            }
            debug!(attempt, delivered, total, "ack window closed");
        }
        Ok(delivered)
    }

    /// Oldest undelivered application datagram, waiting for one if necessary.
    pub async fn receive_one(&self) -> io::Result<InPacket> {
        loop {
            let socket = {
                let mut inner = self.inner.lock().await;
                let socket = inner.socket()?;
                inner.drain(&socket, &mut [])?;
                if let Some(packet) = inner.inbox.pop_front() {
                    return Ok(packet);
                }
                socket
            };
            socket.readable().await?;
        }
    }

    /// Queue depth after a non-blocking drain.
    pub async fn available(&self) -> io::Result<usize> {
        let mut inner = self.inner.lock().await;
        if let Some(socket) = inner.socket.clone() {
            inner.drain(&socket, &mut [])?;
        }
        Ok(inner.inbox.len())
    }

    /// Release the socket. Later sends and receives fail with `NotConnected`.
    pub async fn close(&self) {
        if self.inner.lock().await.socket.take().is_some() {
            debug!(local = %self.local, "transport closed");
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.socket.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(port: u16) -> Endpoint {
        Endpoint::new([127, 0, 0, 1].into(), port)
    }

    #[test]
    fn repeats_and_older_sequences_refused() {
        let mut h = DedupHistory::new(8);
        assert!(h.accept(ep(1), 10));
        assert!(!h.accept(ep(1), 10));
        assert!(!h.accept(ep(1), 3));
        assert!(h.accept(ep(1), 11));
        assert_eq!(h.last_seen(&ep(1)), Some(11));
    }

    #[test]
    fn endpoints_tracked_separately() {
        let mut h = DedupHistory::new(8);
        assert!(h.accept(ep(1), 10));
        assert!(h.accept(ep(2), 10));
        assert!(!h.accept(ep(2), -5));
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn least_recently_used_endpoint_evicted() {
        let mut h = DedupHistory::new(2);
        h.accept(ep(1), 1);
        h.accept(ep(2), 1);
        // touching 1 makes 2 the oldest
        assert!(!h.accept(ep(1), 1));
        h.accept(ep(3), 1);
        assert_eq!(h.len(), 2);
        assert_eq!(h.last_seen(&ep(2)), None);
        assert_eq!(h.last_seen(&ep(1)), Some(1));
        assert_eq!(h.last_seen(&ep(3)), Some(1));
    }

    #[test]
    fn ack_matches_sequence_and_endpoint() {
        let packet = |port| OutPacket {
            destination: ep(port),
            payload: vec![0; 8],
        };
        let mut out = vec![
            Outstanding {
                seq: 7,
                packet: packet(1),
                acked: false,
            },
            Outstanding {
                seq: 7,
                packet: packet(2),
                acked: false,
            },
        ];
        assert_eq!(match_ack(&mut out, 7, ep(3)), 0);
        assert_eq!(match_ack(&mut out, 8, ep(2)), 0);
        assert_eq!(match_ack(&mut out, 7, ep(2)), 1);
        assert!(out[1].acked && !out[0].acked);
        // stale repeat of the same ack
        assert_eq!(match_ack(&mut out, 7, ep(2)), 0);
    }
}
