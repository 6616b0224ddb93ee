use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use pigeon_core::Endpoint;
use pigeon_node::transport::ACK_LEN;
use pigeon_node::{InPacket, OutPacket, ReliableSocket, SequenceHooks, TransportConfig};
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout, Instant};

/// Sequence number in the first four payload bytes; a `!` right after it makes the
/// datagram unreadable.
#[derive(Default)]
struct PrefixHooks {
    next: i32,
}

impl SequenceHooks for PrefixHooks {
    fn insert_sequence_number(&mut self, packet: &mut OutPacket) -> anyhow::Result<i32> {
        self.next += 1;
        packet.payload[..4].copy_from_slice(&self.next.to_be_bytes());
        Ok(self.next)
    }

    fn extract_sequence_number(&mut self, packet: &mut InPacket) -> anyhow::Result<i32> {
        if packet.payload.get(4) == Some(&b'!') {
            anyhow::bail!("unreadable");
        }
        Ok(i32::from_be_bytes(packet.payload[..4].try_into()?))
    }
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn quick(attempts: u32, ack_ms: u64) -> TransportConfig {
    TransportConfig {
        attempts,
        ack_timeout: Duration::from_millis(ack_ms),
        history_capacity: 64,
    }
}

async fn reliable(config: TransportConfig) -> ReliableSocket<PrefixHooks> {
    ReliableSocket::bind(loopback(), PrefixHooks::default(), config)
        .await
        .unwrap()
}

async fn raw() -> (UdpSocket, Endpoint) {
    let s = UdpSocket::bind(loopback()).await.unwrap();
    let ep = Endpoint::from(s.local_addr().unwrap());
    (s, ep)
}

fn data(seq: i32, body: &[u8]) -> Vec<u8> {
    let mut v = seq.to_be_bytes().to_vec();
    v.extend_from_slice(body);
    v
}

fn packet(to: Endpoint, body: &[u8]) -> OutPacket {
    OutPacket {
        destination: to,
        payload: data(0, body),
    }
}

async fn wait_available<H: SequenceHooks>(s: &ReliableSocket<H>, n: usize) -> usize {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let got = s.available().await.unwrap();
        if got >= n || Instant::now() > deadline {
            return got;
        }
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn batch_is_acknowledged_and_delivered_in_order() {
    let a = reliable(quick(3, 1000)).await;
    let b = std::sync::Arc::new(reliable(quick(3, 1000)).await);
    let to = b.local_endpoint();

    let receiver = {
        let b = b.clone();
        tokio::spawn(async move {
            let first = b.receive_one().await.unwrap();
            let second = b.receive_one().await.unwrap();
            (first, second)
        })
    };
    let delivered = a
        .send(vec![packet(to, b"one"), packet(to, b"two")])
        .await
        .unwrap();
    assert_eq!(delivered, 2);

    let (first, second) = timeout(Duration::from_secs(2), receiver)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&first.payload[4..], b"one");
    assert_eq!(&second.payload[4..], b"two");
    assert_eq!(first.origin, a.local_endpoint());
}

#[tokio::test]
async fn repeated_and_older_sequences_delivered_once() {
    let b = reliable(quick(3, 1000)).await;
    let (sender, _) = raw().await;
    let to = b.local_endpoint().socket_addr();

    for seq in [5, 5, 3, 9] {
        sender.send_to(&data(seq, b"payload"), to).await.unwrap();
    }
    sleep(Duration::from_millis(100)).await;
    assert_eq!(wait_available(&b, 2).await, 2);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(b.available().await.unwrap(), 2);

    let first = b.receive_one().await.unwrap();
    let second = b.receive_one().await.unwrap();
    assert_eq!(&first.payload[..4], &5i32.to_be_bytes());
    assert_eq!(&second.payload[..4], &9i32.to_be_bytes());

    // every copy is still acknowledged
    let mut buf = [0u8; 16];
    let mut acks = Vec::new();
    for _ in 0..4 {
        let (n, _) = timeout(Duration::from_secs(1), sender.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, ACK_LEN);
        acks.push(i32::from_be_bytes(buf[..4].try_into().unwrap()));
    }
    assert_eq!(acks, vec![5, 5, 3, 9]);
}

#[tokio::test]
async fn silent_destination_exhausts_retries() {
    let a = reliable(quick(3, 100)).await;
    let (silent, to) = raw().await;

    let started = Instant::now();
    let delivered = a.send(vec![packet(to, b"anyone?")]).await.unwrap();
    let elapsed = started.elapsed();
    assert_eq!(delivered, 0);
    assert!(elapsed >= Duration::from_millis(300), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(2), "{:?}", elapsed);

    let mut buf = [0u8; 64];
    let mut copies = 0;
    while let Ok(Ok(_)) = timeout(Duration::from_millis(50), silent.recv_from(&mut buf)).await {
        copies += 1;
    }
    assert_eq!(copies, 3);
}

#[tokio::test]
async fn acks_matched_by_sequence_and_endpoint() {
    let a = reliable(quick(1, 300)).await;
    let (honest, honest_ep) = raw().await;
    let (liar, liar_ep) = raw().await;
    let (_mute, mute_ep) = raw().await;

    tokio::spawn(async move {
        let mut buf = [0u8; 64];
        let (_, from) = honest.recv_from(&mut buf).await.unwrap();
        honest.send_to(&buf[..4], from).await.unwrap();
    });
    tokio::spawn(async move {
        let mut buf = [0u8; 64];
        let (_, from) = liar.recv_from(&mut buf).await.unwrap();
        let wrong = i32::from_be_bytes(buf[..4].try_into().unwrap()).wrapping_add(1);
        liar.send_to(&wrong.to_be_bytes(), from).await.unwrap();
    });

    let delivered = a
        .send(vec![
            packet(honest_ep, b"x"),
            packet(liar_ep, b"x"),
            packet(mute_ep, b"x"),
        ])
        .await
        .unwrap();
    assert_eq!(delivered, 1);
}

#[tokio::test]
async fn runts_and_stray_acks_are_not_data() {
    let b = reliable(quick(1, 100)).await;
    let (sender, _) = raw().await;
    let to = b.local_endpoint().socket_addr();
    sender.send_to(&[1, 2], to).await.unwrap();
    sender.send_to(&[0, 0, 0, 7], to).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(b.available().await.unwrap(), 0);
}

#[tokio::test]
async fn unreadable_datagram_dropped_without_ack() {
    let b = reliable(quick(1, 100)).await;
    let (sender, _) = raw().await;
    sender
        .send_to(&data(1, b"!garbled"), b.local_endpoint().socket_addr())
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(b.available().await.unwrap(), 0);
    let mut buf = [0u8; 16];
    assert!(timeout(Duration::from_millis(100), sender.recv_from(&mut buf))
        .await
        .is_err());
}

#[tokio::test]
async fn close_is_idempotent() {
    let a = reliable(quick(1, 100)).await;
    let to = a.local_endpoint();
    a.close().await;
    a.close().await;
    assert!(a.is_closed().await);
    let err = a.send(vec![packet(to, b"late")]).await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    let err = a.receive_one().await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    assert_eq!(a.available().await.unwrap(), 0);
}
