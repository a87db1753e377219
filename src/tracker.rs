//! UDP tracker protocol ([BEP-15]).
//!
//! Trackers are servers that help peers find each other. A client
//! "announces" to register itself in the swarm, fetch addresses of other
//! peers, and report transfer statistics; a "scrape" fetches seed/leech
//! counts without a peer list.
//!
//! BEP-15 is connectionless: every RPC is a single request datagram
//! answered by a single response datagram, correlated by a client-chosen
//! transaction id. [`UdpTrackerManager`] multiplexes any number of
//! concurrent RPCs to any number of trackers over one socket: a
//! background listener demultiplexes responses to the awaiting callers,
//! connection ids are cached per tracker for their 60 second lifetime,
//! and lost datagrams are retransmitted with exponential backoff.
//!
//! ```no_run
//! use riptide::tracker::{AnnounceQuery, TrackerOptions, UdpTrackerManager};
//!
//! # async fn example() -> Result<(), riptide::tracker::TrackerError> {
//! let manager = UdpTrackerManager::bind(TrackerOptions::default()).await?;
//!
//! let query = AnnounceQuery::new([0u8; 20], [0u8; 20], 6881);
//! let info = manager
//!     .announce("udp://tracker.example.com:6969", &query)
//!     .await?;
//!
//! println!("{} seeders, next announce in {}s", info.seeders, info.interval);
//! for peer in &info.peers {
//!     println!("peer: {peer}");
//! }
//!
//! manager.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! [BEP-15]: http://bittorrent.org/beps/bep_0015.html

mod error;
mod manager;
mod response;
mod wire;

pub use error::TrackerError;
pub use manager::{TrackerOptions, UdpTrackerManager};
pub use response::{AnnounceInfo, AnnounceQuery, ScrapeInfo, TrackerEvent};
pub use wire::{TrackerRequest, TrackerResponse};

#[cfg(test)]
mod tests;
