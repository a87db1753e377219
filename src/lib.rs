//! riptide - BitTorrent client core
//!
//! This library implements the engine of a BitTorrent client: the pieces
//! that move bytes between disk, trackers and peers while preserving the
//! protocol invariants.
//!
//! # Modules
//!
//! - [`storage`] - Memory-mapped file layout with a contiguous logical
//!   address space over the torrent's files
//! - [`piece`] - Piece verification, block assembly and bitfield
//!   accounting on top of the storage map
//! - [`tracker`] - BEP-15 UDP tracker RPC, multiplexed over one socket
//!   with retransmission and connection-id caching
//! - [`peer`] - BEP-3/BEP-6 peer wire protocol and the per-connection
//!   event state machine
//!
//! Metainfo parsing, DHT, HTTP trackers and session scheduling live
//! outside this crate; their touch points are plain values (`info_hash`,
//! piece hashes, file layouts, peer addresses) passed in by the caller.

pub mod peer;
pub mod piece;
pub mod storage;
pub mod tracker;

pub use peer::{
    ChokingState, Event, ExchangeConfig, Extensions, Handshake, Message, PeerError, PeerExchange,
    PeerId, PeerTransport,
};
pub use piece::{Bitfield, Block, BlockRequest, PieceStore, BLOCK_SIZE};
pub use storage::{OpenMode, StorageError, StorageMap};
pub use tracker::{
    AnnounceInfo, AnnounceQuery, ScrapeInfo, TrackerError, TrackerEvent, TrackerOptions,
    UdpTrackerManager,
};
