use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::response::{parse_compact_peers, AnnounceInfo, AnnounceQuery};

/// Magic constant identifying a connect request (BEP-15).
pub const PROTOCOL_ID: u64 = 0x41727101980;

const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_SCRAPE: u32 = 2;
const ACTION_ERROR: u32 = 3;

/// A request the manager can put on the wire.
#[derive(Debug, Clone)]
pub enum TrackerRequest {
    Connect,
    Announce(AnnounceQuery),
    Scrape(Vec<[u8; 20]>),
}

impl TrackerRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            TrackerRequest::Connect => "connect",
            TrackerRequest::Announce(_) => "announce",
            TrackerRequest::Scrape(_) => "scrape",
        }
    }

    /// Serializes the request datagram.
    ///
    /// For `Connect` the connection id slot carries the protocol magic;
    /// every other request carries a live connection id.
    pub fn encode(&self, connection_id: u64, transaction_id: u32) -> Bytes {
        match self {
            TrackerRequest::Connect => {
                let mut buf = BytesMut::with_capacity(16);
                buf.put_u64(PROTOCOL_ID);
                buf.put_u32(ACTION_CONNECT);
                buf.put_u32(transaction_id);
                buf.freeze()
            }
            TrackerRequest::Announce(query) => {
                let mut buf = BytesMut::with_capacity(98);
                buf.put_u64(connection_id);
                buf.put_u32(ACTION_ANNOUNCE);
                buf.put_u32(transaction_id);
                buf.put_slice(&query.info_hash);
                buf.put_slice(&query.peer_id);
                buf.put_u64(query.downloaded);
                buf.put_u64(query.left);
                buf.put_u64(query.uploaded);
                buf.put_u32(query.event.as_udp_id());
                buf.put_u32(query.ip);
                buf.put_u32(query.key);
                buf.put_i32(query.num_want);
                buf.put_u16(query.port);
                buf.freeze()
            }
            TrackerRequest::Scrape(info_hashes) => {
                let mut buf = BytesMut::with_capacity(16 + 20 * info_hashes.len());
                buf.put_u64(connection_id);
                buf.put_u32(ACTION_SCRAPE);
                buf.put_u32(transaction_id);
                for hash in info_hashes {
                    buf.put_slice(hash);
                }
                buf.freeze()
            }
        }
    }
}

/// A decoded response datagram, minus its transaction id.
#[derive(Debug, Clone)]
pub enum TrackerResponse {
    Connected { connection_id: u64 },
    Announced(AnnounceInfo),
    Scraped(Vec<ScrapeStats>),
    Failed(String),
}

/// One scrape record; pairing with the requested info hash happens at
/// the manager, since the wire carries counters only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeStats {
    pub seeders: u32,
    pub completed: u32,
    pub leechers: u32,
}

impl TrackerResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            TrackerResponse::Connected { .. } => "connect",
            TrackerResponse::Announced(_) => "announce",
            TrackerResponse::Scraped(_) => "scrape",
            TrackerResponse::Failed(_) => "error",
        }
    }
}

/// Decodes a response datagram into its transaction id and payload.
///
/// Returns `None` for datagrams that do not parse; the listener drops
/// those silently.
pub fn decode_response(datagram: &[u8]) -> Option<(u32, TrackerResponse)> {
    if datagram.len() < 8 {
        return None;
    }

    let mut buf = datagram;
    let action = buf.get_u32();
    let transaction_id = buf.get_u32();

    let response = match action {
        ACTION_CONNECT => {
            if buf.remaining() < 8 {
                return None;
            }
            TrackerResponse::Connected {
                connection_id: buf.get_u64(),
            }
        }
        ACTION_ANNOUNCE => {
            if buf.remaining() < 12 {
                return None;
            }
            let interval = buf.get_u32();
            let leechers = buf.get_u32();
            let seeders = buf.get_u32();
            TrackerResponse::Announced(AnnounceInfo {
                interval,
                leechers,
                seeders,
                peers: parse_compact_peers(buf),
            })
        }
        ACTION_SCRAPE => {
            let records = buf
                .chunks_exact(12)
                .map(|mut chunk| ScrapeStats {
                    seeders: chunk.get_u32(),
                    completed: chunk.get_u32(),
                    leechers: chunk.get_u32(),
                })
                .collect();
            TrackerResponse::Scraped(records)
        }
        ACTION_ERROR => TrackerResponse::Failed(String::from_utf8_lossy(buf).into_owned()),
        _ => return None,
    };

    Some((transaction_id, response))
}
