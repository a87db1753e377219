//! Peer wire protocol (BEP-3, BEP-6).
//!
//! This module implements the BitTorrent peer wire protocol: the 68-byte
//! handshake, length-prefixed message framing, and the per-connection
//! state machine that turns the message stream into the three semantic
//! events ([`Event::Available`], [`Event::Want`], [`Event::Fragment`])
//! driving the piece-selection loop.

mod error;
mod exchange;
mod message;
mod peer_id;
mod transport;

pub use error::PeerError;
pub use exchange::{ChokingState, Event, ExchangeConfig, Extensions, PeerExchange};
pub use message::{Handshake, Message, MessageId, HANDSHAKE_LEN};
pub use peer_id::PeerId;
pub use transport::PeerTransport;
