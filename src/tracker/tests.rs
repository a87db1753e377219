use super::*;
use super::manager::first_unused;
use super::wire::{decode_response, PROTOCOL_ID};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::net::UdpSocket;

#[test]
fn test_first_unused_prefers_drawn_id() {
    let slots: HashMap<u32, ()> = HashMap::new();
    assert_eq!(first_unused(&slots, 42), Some(42));
}

#[test]
fn test_first_unused_scans_past_collisions() {
    let slots: HashMap<u32, ()> = [5, 6, 7, 9].into_iter().map(|id| (id, ())).collect();

    assert_eq!(first_unused(&slots, 6), Some(8));
    assert_eq!(first_unused(&slots, 5), Some(8));
    assert_eq!(first_unused(&slots, 9), Some(10));
    assert_eq!(first_unused(&slots, 4), Some(4));
}

#[test]
fn test_first_unused_falls_back_downward() {
    let slots: HashMap<u32, ()> = [u32::MAX - 1, u32::MAX]
        .into_iter()
        .map(|id| (id, ()))
        .collect();

    assert_eq!(first_unused(&slots, u32::MAX - 1), Some(u32::MAX - 2));
}

#[test]
fn test_connect_request_encoding() {
    let packet = TrackerRequest::Connect.encode(PROTOCOL_ID, 0x01020304);

    assert_eq!(packet.len(), 16);
    assert_eq!(&packet[..8], &PROTOCOL_ID.to_be_bytes());
    assert_eq!(&packet[8..12], &0u32.to_be_bytes());
    assert_eq!(&packet[12..16], &[1, 2, 3, 4]);
}

#[test]
fn test_announce_request_encoding() {
    let mut query = AnnounceQuery::new([0xAB; 20], [0xCD; 20], 6881);
    query.left = 1000;
    query.event = TrackerEvent::Started;

    let packet = TrackerRequest::Announce(query).encode(0x1122334455667788, 7);

    assert_eq!(packet.len(), 98);
    assert_eq!(&packet[..8], &0x1122334455667788u64.to_be_bytes());
    assert_eq!(&packet[8..12], &1u32.to_be_bytes());
    assert_eq!(&packet[12..16], &7u32.to_be_bytes());
    assert_eq!(&packet[16..36], &[0xAB; 20]);
    assert_eq!(&packet[36..56], &[0xCD; 20]);
    // event = started (2) sits after the three 8-byte counters
    assert_eq!(&packet[80..84], &2u32.to_be_bytes());
    assert_eq!(&packet[96..98], &6881u16.to_be_bytes());
}

#[test]
fn test_decode_announce_response() {
    let (transaction_id, response) =
        decode_response(&reply_announced(9, 1800, 2, 3, &[([1, 2, 3, 4], 6881)])).unwrap();

    assert_eq!(transaction_id, 9);
    let TrackerResponse::Announced(info) = response else {
        panic!("expected announce response");
    };
    assert_eq!(info.interval, 1800);
    assert_eq!(info.leechers, 2);
    assert_eq!(info.seeders, 3);
    assert_eq!(info.peers, vec!["1.2.3.4:6881".parse::<SocketAddr>().unwrap()]);
}

#[test]
fn test_decode_rejects_junk() {
    assert!(decode_response(&[]).is_none());
    assert!(decode_response(&[0u8; 7]).is_none());
    // Unknown action.
    assert!(decode_response(&[0, 0, 0, 9, 0, 0, 0, 1]).is_none());
    // Connect response missing its connection id.
    assert!(decode_response(&[0, 0, 0, 0, 0, 0, 0, 1, 0, 0]).is_none());
}

#[tokio::test]
async fn test_uri_resolution_errors() {
    let manager = UdpTrackerManager::bind(TrackerOptions::default()).await.unwrap();
    let query = AnnounceQuery::new([0; 20], [0; 20], 6881);

    assert!(matches!(
        manager.announce("http://tracker.example.com/announce", &query).await,
        Err(TrackerError::UnrecognizedScheme(_))
    ));
    assert!(matches!(
        manager.announce("udp://", &query).await,
        Err(TrackerError::HostUnknown(_))
    ));
    assert!(matches!(
        manager.announce("udp://tracker.invalid.:6969", &query).await,
        Err(TrackerError::HostLookupFailed(_))
    ));

    manager.close().await;
}

#[tokio::test]
async fn test_connect_announce_happy_path() {
    let connects = Arc::new(AtomicUsize::new(0));
    let connects_seen = connects.clone();

    let addr = spawn_tracker(move |packet| {
        let (action, transaction_id) = parse_header(packet);
        match action {
            0 => {
                connects_seen.fetch_add(1, Ordering::SeqCst);
                Some(reply_connected(transaction_id, 0xC0FFEE))
            }
            1 => Some(reply_announced(
                transaction_id,
                1800,
                2,
                3,
                &[([1, 2, 3, 4], 6881)],
            )),
            _ => None,
        }
    })
    .await;

    let manager = UdpTrackerManager::bind(TrackerOptions::default()).await.unwrap();
    let uri = format!("udp://{addr}");
    let query = AnnounceQuery::new([7; 20], [9; 20], 6881);

    let info = manager.announce(&uri, &query).await.unwrap();
    assert_eq!(info.interval, 1800);
    assert_eq!(info.leechers, 2);
    assert_eq!(info.seeders, 3);
    assert_eq!(info.peers, vec!["1.2.3.4:6881".parse::<SocketAddr>().unwrap()]);

    // The connection id is cached, so a second announce performs no
    // second connect exchange.
    manager.announce(&uri, &query).await.unwrap();
    assert_eq!(connects.load(Ordering::SeqCst), 1);

    manager.close().await;
}

#[tokio::test]
async fn test_scrape_happy_path() {
    let addr = spawn_tracker(|packet| {
        let (action, transaction_id) = parse_header(packet);
        match action {
            0 => Some(reply_connected(transaction_id, 1)),
            2 => Some(reply_scraped(transaction_id, &[(3, 12, 2), (0, 0, 1)])),
            _ => None,
        }
    })
    .await;

    let manager = UdpTrackerManager::bind(TrackerOptions::default()).await.unwrap();
    let infos = manager
        .scrape(&format!("udp://{addr}"), &[[1; 20], [2; 20]])
        .await
        .unwrap();

    assert_eq!(
        infos,
        vec![
            ScrapeInfo { info_hash: [1; 20], seeders: 3, completed: 12, leechers: 2 },
            ScrapeInfo { info_hash: [2; 20], seeders: 0, completed: 0, leechers: 1 },
        ]
    );

    manager.close().await;
}

#[tokio::test]
async fn test_tracker_error_message_surfaces() {
    let addr = spawn_tracker(|packet| {
        let (_, transaction_id) = parse_header(packet);
        Some(reply_error(transaction_id, "banned"))
    })
    .await;

    let manager = UdpTrackerManager::bind(TrackerOptions::default()).await.unwrap();
    let query = AnnounceQuery::new([0; 20], [0; 20], 6881);

    match manager.announce(&format!("udp://{addr}"), &query).await {
        Err(TrackerError::QueryFailed(message)) => assert_eq!(message, "banned"),
        other => panic!("expected QueryFailed, got {other:?}"),
    }

    manager.close().await;
}

#[tokio::test]
async fn test_wrong_response_kind_is_rejected() {
    let addr = spawn_tracker(|packet| {
        let (action, transaction_id) = parse_header(packet);
        match action {
            0 => Some(reply_connected(transaction_id, 1)),
            // Answer the announce with a scrape-shaped response.
            1 => Some(reply_scraped(transaction_id, &[(1, 1, 1)])),
            _ => None,
        }
    })
    .await;

    let manager = UdpTrackerManager::bind(TrackerOptions::default()).await.unwrap();
    let query = AnnounceQuery::new([0; 20], [0; 20], 6881);

    assert!(matches!(
        manager.announce(&format!("udp://{addr}"), &query).await,
        Err(TrackerError::UnexpectedResponse { expected: "announce", actual: "scrape" })
    ));

    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_retransmission_schedule() {
    // A tracker that never answers.
    let addr = spawn_tracker(|_| None).await;

    let options = TrackerOptions {
        min_timeout: 1,
        max_timeout: 4,
        multiplier: 2,
        ..TrackerOptions::default()
    };
    let manager = UdpTrackerManager::bind(options).await.unwrap();
    let query = AnnounceQuery::new([0; 20], [0; 20], 6881);

    let started = tokio::time::Instant::now();
    let result = manager.announce(&format!("udp://{addr}"), &query).await;

    // Waits of 1, 2 and 4 seconds elapse before the doubled timeout
    // exceeds the maximum.
    assert!(matches!(result, Err(TrackerError::TimeoutExpired(8))));
    assert_eq!(started.elapsed(), Duration::from_secs(7));

    manager.close().await;
}

#[tokio::test]
async fn test_close_unblocks_pending_calls() {
    let addr = spawn_tracker(|_| None).await;

    let manager = Arc::new(UdpTrackerManager::bind(TrackerOptions::default()).await.unwrap());
    let uri = format!("udp://{addr}");

    let pending = {
        let manager = manager.clone();
        let uri = uri.clone();
        tokio::spawn(async move {
            let query = AnnounceQuery::new([0; 20], [0; 20], 6881);
            manager.announce(&uri, &query).await
        })
    };

    // Let the RPC get in flight, then shut down underneath it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    manager.close().await;

    assert!(matches!(
        pending.await.unwrap(),
        Err(TrackerError::ManagerClosed)
    ));

    // The manager refuses new work once closed.
    let query = AnnounceQuery::new([0; 20], [0; 20], 6881);
    assert!(matches!(
        manager.announce(&uri, &query).await,
        Err(TrackerError::ManagerClosed)
    ));
}

// ---------------------------------------------------------------------
// In-process fake tracker
// ---------------------------------------------------------------------

async fn spawn_tracker<F>(behavior: F) -> SocketAddr
where
    F: Fn(&[u8]) -> Option<Vec<u8>> + Send + 'static,
{
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = vec![0u8; 2048];
        while let Ok((len, from)) = socket.recv_from(&mut buf).await {
            if let Some(reply) = behavior(&buf[..len]) {
                let _ = socket.send_to(&reply, from).await;
            }
        }
    });

    addr
}

// Every BEP-15 request carries its action at bytes 8..12 and its
// transaction id at bytes 12..16.
fn parse_header(packet: &[u8]) -> (u32, u32) {
    let action = u32::from_be_bytes(packet[8..12].try_into().unwrap());
    let transaction_id = u32::from_be_bytes(packet[12..16].try_into().unwrap());
    (action, transaction_id)
}

fn reply_connected(transaction_id: u32, connection_id: u64) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(16);
    buf.put_u32(0);
    buf.put_u32(transaction_id);
    buf.put_u64(connection_id);
    buf.to_vec()
}

fn reply_announced(
    transaction_id: u32,
    interval: u32,
    leechers: u32,
    seeders: u32,
    peers: &[([u8; 4], u16)],
) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(20 + 6 * peers.len());
    buf.put_u32(1);
    buf.put_u32(transaction_id);
    buf.put_u32(interval);
    buf.put_u32(leechers);
    buf.put_u32(seeders);
    for (ip, port) in peers {
        buf.put_slice(ip);
        buf.put_u16(*port);
    }
    buf.to_vec()
}

fn reply_scraped(transaction_id: u32, records: &[(u32, u32, u32)]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(8 + 12 * records.len());
    buf.put_u32(2);
    buf.put_u32(transaction_id);
    for (seeders, completed, leechers) in records {
        buf.put_u32(*seeders);
        buf.put_u32(*completed);
        buf.put_u32(*leechers);
    }
    buf.to_vec()
}

fn reply_error(transaction_id: u32, message: &str) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(8 + message.len());
    buf.put_u32(3);
    buf.put_u32(transaction_id);
    buf.put_slice(message.as_bytes());
    buf.to_vec()
}
