use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use rand::Rng as _;

/// Event reported with an announce ([BEP-15] wire ids).
///
/// [BEP-15]: http://bittorrent.org/beps/bep_0015.html
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackerEvent {
    #[default]
    None,
    Completed,
    Started,
    Stopped,
}

impl TrackerEvent {
    pub fn as_udp_id(&self) -> u32 {
        match self {
            TrackerEvent::None => 0,
            TrackerEvent::Completed => 1,
            TrackerEvent::Started => 2,
            TrackerEvent::Stopped => 3,
        }
    }
}

/// Parameters of an announce request.
#[derive(Debug, Clone)]
pub struct AnnounceQuery {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub downloaded: u64,
    pub left: u64,
    pub uploaded: u64,
    pub event: TrackerEvent,
    /// Our address as seen by the tracker; 0 lets the tracker use the
    /// datagram's source.
    pub ip: u32,
    /// Random key letting the tracker match announces across address
    /// changes.
    pub key: u32,
    /// Number of peers wanted; -1 for the tracker's default.
    pub num_want: i32,
    pub port: u16,
}

impl AnnounceQuery {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20], port: u16) -> Self {
        Self {
            info_hash,
            peer_id,
            downloaded: 0,
            left: 0,
            uploaded: 0,
            event: TrackerEvent::None,
            ip: 0,
            key: rand::rng().random(),
            num_want: -1,
            port,
        }
    }
}

/// What a tracker answers an announce with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceInfo {
    /// Seconds to wait before the next announce.
    pub interval: u32,
    pub leechers: u32,
    pub seeders: u32,
    pub peers: Vec<SocketAddr>,
}

/// Per-torrent counters from a scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeInfo {
    pub info_hash: [u8; 20],
    pub seeders: u32,
    pub completed: u32,
    pub leechers: u32,
}

/// Parses compact IPv4 peers: 4 bytes address + 2 bytes port each.
pub(crate) fn parse_compact_peers(data: &[u8]) -> Vec<SocketAddr> {
    data.chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddr::new(IpAddr::V4(ip), port)
        })
        .collect()
}
