use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::PeerError;

/// The BitTorrent protocol identifier.
pub const PROTOCOL: &[u8] = b"BitTorrent protocol";
/// Length of the handshake message in bytes.
pub const HANDSHAKE_LEN: usize = 68;

/// Message type identifiers in the peer wire protocol.
///
/// Each message (except KeepAlive) has a one-byte ID following the
/// length prefix. IDs 0..=9 are BEP-3, 13..=17 the fast extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
    Port = 9,
    // Fast extension (BEP-6)
    Suggest = 13,
    HaveAll = 14,
    HaveNone = 15,
    Reject = 16,
    AllowedFast = 17,
}

impl MessageId {
    /// Exact payload length after the ID byte, or `None` for the two
    /// variable-length messages (Bitfield and Piece).
    fn fixed_payload_len(self) -> Option<usize> {
        match self {
            MessageId::Choke
            | MessageId::Unchoke
            | MessageId::Interested
            | MessageId::NotInterested
            | MessageId::HaveAll
            | MessageId::HaveNone => Some(0),
            MessageId::Port => Some(2),
            MessageId::Have | MessageId::Suggest | MessageId::AllowedFast => Some(4),
            MessageId::Request | MessageId::Cancel | MessageId::Reject => Some(12),
            MessageId::Bitfield | MessageId::Piece => None,
        }
    }
}

impl TryFrom<u8> for MessageId {
    type Error = PeerError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        use MessageId::*;

        // The two contiguous ID ranges index straight into their tables.
        match byte {
            0..=9 => Ok([
                Choke,
                Unchoke,
                Interested,
                NotInterested,
                Have,
                Bitfield,
                Request,
                Piece,
                Cancel,
                Port,
            ][byte as usize]),
            13..=17 => Ok([Suggest, HaveAll, HaveNone, Reject, AllowedFast][byte as usize - 13]),
            other => Err(PeerError::InvalidMessageId(other)),
        }
    }
}

/// The BitTorrent handshake message.
///
/// The handshake is the first message exchanged between peers:
/// protocol identifier, eight reserved capability bytes, the torrent's
/// info hash and the sender's peer ID.
///
/// Reserved bits used here: byte 7 bit 2 flags the fast extension
/// ([BEP-6]), byte 7 bit 0 flags DHT support ([BEP-5]).
///
/// [BEP-5]: http://bittorrent.org/beps/bep_0005.html
/// [BEP-6]: http://bittorrent.org/beps/bep_0006.html
#[derive(Debug, Clone)]
pub struct Handshake {
    /// The torrent's info hash.
    pub info_hash: [u8; 20],
    /// The sender's peer ID.
    pub peer_id: [u8; 20],
    /// Reserved bytes for protocol extensions.
    pub reserved: [u8; 8],
}

impl Handshake {
    /// Creates a new handshake advertising the fast extension.
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        let mut reserved = [0u8; 8];
        reserved[7] |= 0x04; // Fast extension (BEP-6)
        Self {
            info_hash,
            peer_id,
            reserved,
        }
    }

    /// Returns `true` if the sender supports the fast extension.
    pub fn supports_fast_extension(&self) -> bool {
        (self.reserved[7] & 0x04) != 0
    }

    /// Returns `true` if the sender supports DHT.
    pub fn supports_dht(&self) -> bool {
        (self.reserved[7] & 0x01) != 0
    }

    /// Encodes the handshake to bytes for transmission.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u8(PROTOCOL.len() as u8);
        buf.put_slice(PROTOCOL);
        buf.put_slice(&self.reserved);
        buf.put_slice(&self.info_hash);
        buf.put_slice(&self.peer_id);
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        if data.len() < HANDSHAKE_LEN {
            return Err(PeerError::InvalidHandshake);
        }

        let (header, rest) = data.split_at(1 + PROTOCOL.len());
        if header[0] as usize != PROTOCOL.len() || &header[1..] != PROTOCOL {
            return Err(PeerError::InvalidHandshake);
        }

        let mut handshake = Self {
            info_hash: [0u8; 20],
            peer_id: [0u8; 20],
            reserved: [0u8; 8],
        };
        handshake.reserved.copy_from_slice(&rest[..8]);
        handshake.info_hash.copy_from_slice(&rest[8..28]);
        handshake.peer_id.copy_from_slice(&rest[28..48]);
        Ok(handshake)
    }
}

/// A peer wire protocol message.
///
/// Messages are length-prefixed: a 4-byte big-endian length followed by
/// a 1-byte message ID (except KeepAlive which has length 0) and payload.
///
/// # Examples
///
/// ```
/// use riptide::peer::Message;
///
/// // Create a request for piece 0, offset 0, 16KB
/// let request = Message::Request {
///     index: 0,
///     begin: 0,
///     length: 16384,
/// };
///
/// // Encode to bytes
/// let bytes = request.encode();
/// assert_eq!(bytes.len(), 17); // 4-byte length + 1-byte ID + 12-byte payload
/// ```
#[derive(Debug, Clone)]
pub enum Message {
    /// Empty message to keep the connection alive.
    KeepAlive,
    /// We are choking the peer (not sending data).
    Choke,
    /// We are unchoking the peer (ready to send data).
    Unchoke,
    /// We are interested in the peer's data.
    Interested,
    /// We are not interested in the peer's data.
    NotInterested,
    /// Announce that we have a piece.
    Have { piece: u32 },
    /// Bitfield of all pieces we have.
    Bitfield(Bytes),
    /// Request a block of data.
    Request { index: u32, begin: u32, length: u32 },
    /// Send piece data.
    Piece { index: u32, begin: u32, data: Bytes },
    /// Cancel a pending request.
    Cancel { index: u32, begin: u32, length: u32 },
    /// DHT port announcement.
    Port(u16),
    // Fast extension
    /// Suggest a piece to download (fast extension).
    Suggest { piece: u32 },
    /// Peer has all pieces (fast extension, seeder shortcut).
    HaveAll,
    /// Peer has no pieces (fast extension).
    HaveNone,
    /// Reject a block request (fast extension).
    Reject { index: u32, begin: u32, length: u32 },
    /// Allow downloading this piece while choked (fast extension).
    AllowedFast { piece: u32 },
}

impl Message {
    /// The wire ID of this message, or `None` for KeepAlive.
    pub fn id(&self) -> Option<MessageId> {
        Some(match self {
            Message::KeepAlive => return None,
            Message::Choke => MessageId::Choke,
            Message::Unchoke => MessageId::Unchoke,
            Message::Interested => MessageId::Interested,
            Message::NotInterested => MessageId::NotInterested,
            Message::Have { .. } => MessageId::Have,
            Message::Bitfield(_) => MessageId::Bitfield,
            Message::Request { .. } => MessageId::Request,
            Message::Piece { .. } => MessageId::Piece,
            Message::Cancel { .. } => MessageId::Cancel,
            Message::Port(_) => MessageId::Port,
            Message::Suggest { .. } => MessageId::Suggest,
            Message::HaveAll => MessageId::HaveAll,
            Message::HaveNone => MessageId::HaveNone,
            Message::Reject { .. } => MessageId::Reject,
            Message::AllowedFast { .. } => MessageId::AllowedFast,
        })
    }

    /// Encodes the message to bytes for transmission.
    ///
    /// The output includes the 4-byte length prefix.
    pub fn encode(&self) -> Bytes {
        let Some(id) = self.id() else {
            return Bytes::from_static(&[0, 0, 0, 0]);
        };

        let mut payload = BytesMut::new();
        match self {
            Message::Have { piece }
            | Message::Suggest { piece }
            | Message::AllowedFast { piece } => payload.put_u32(*piece),
            Message::Bitfield(bits) => payload.put_slice(bits),
            Message::Request {
                index,
                begin,
                length,
            }
            | Message::Cancel {
                index,
                begin,
                length,
            }
            | Message::Reject {
                index,
                begin,
                length,
            } => {
                payload.put_u32(*index);
                payload.put_u32(*begin);
                payload.put_u32(*length);
            }
            Message::Piece { index, begin, data } => {
                payload.put_u32(*index);
                payload.put_u32(*begin);
                payload.put_slice(data);
            }
            Message::Port(port) => payload.put_u16(*port),
            _ => {}
        }

        let mut frame = BytesMut::with_capacity(5 + payload.len());
        frame.put_u32(1 + payload.len() as u32);
        frame.put_u8(id as u8);
        frame.put_slice(&payload);
        frame.freeze()
    }

    /// Decodes one frame, length prefix included.
    ///
    /// Payload lengths are validated against the ID's table before any
    /// field is parsed, so the per-message arms below read their fields
    /// unconditionally.
    pub fn decode(mut frame: Bytes) -> Result<Self, PeerError> {
        if frame.len() < 4 {
            return Err(PeerError::InvalidMessage(
                "frame shorter than its length prefix".into(),
            ));
        }

        let length = frame.get_u32() as usize;
        if length == 0 {
            return Ok(Message::KeepAlive);
        }
        if frame.remaining() < length {
            return Err(PeerError::InvalidMessage(format!(
                "frame announces {length} bytes but carries {}",
                frame.remaining()
            )));
        }

        let id = MessageId::try_from(frame.get_u8())?;
        let mut payload = frame.copy_to_bytes(length - 1);

        if let Some(expected) = id.fixed_payload_len() {
            if payload.len() != expected {
                return Err(PeerError::InvalidMessage(format!(
                    "{id:?} carries {} payload bytes, expected {expected}",
                    payload.len()
                )));
            }
        }

        Ok(match id {
            MessageId::Choke => Message::Choke,
            MessageId::Unchoke => Message::Unchoke,
            MessageId::Interested => Message::Interested,
            MessageId::NotInterested => Message::NotInterested,
            MessageId::Have => Message::Have {
                piece: payload.get_u32(),
            },
            MessageId::Bitfield => Message::Bitfield(payload),
            MessageId::Request => Message::Request {
                index: payload.get_u32(),
                begin: payload.get_u32(),
                length: payload.get_u32(),
            },
            MessageId::Piece => {
                if payload.len() < 8 {
                    return Err(PeerError::InvalidMessage(
                        "piece missing its index and offset".into(),
                    ));
                }
                let index = payload.get_u32();
                let begin = payload.get_u32();
                Message::Piece {
                    index,
                    begin,
                    data: payload,
                }
            }
            MessageId::Cancel => Message::Cancel {
                index: payload.get_u32(),
                begin: payload.get_u32(),
                length: payload.get_u32(),
            },
            MessageId::Port => Message::Port(payload.get_u16()),
            MessageId::Suggest => Message::Suggest {
                piece: payload.get_u32(),
            },
            MessageId::HaveAll => Message::HaveAll,
            MessageId::HaveNone => Message::HaveNone,
            MessageId::Reject => Message::Reject {
                index: payload.get_u32(),
                begin: payload.get_u32(),
                length: payload.get_u32(),
            },
            MessageId::AllowedFast => Message::AllowedFast {
                piece: payload.get_u32(),
            },
        })
    }
}
