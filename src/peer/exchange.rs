use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::error::PeerError;
use super::message::{Handshake, Message};
use super::peer_id::PeerId;
use super::transport::PeerTransport;
use crate::piece::{Bitfield, Block, BlockRequest, PieceStore};

/// A semantic event distilled from the wire protocol.
///
/// `await_event` reads frames until one of these falls out; `yield_event`
/// turns one back into wire traffic (or a swarm notification).
#[derive(Debug, Clone)]
pub enum Event {
    /// Pieces the peer can serve us right now.
    Available(Bitfield),
    /// The peer asked us for a block.
    Want(BlockRequest),
    /// The peer sent us a block.
    Fragment(Block),
}

/// Choke and interest flags, ours and the peer's (BEP-3 defaults).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChokingState {
    pub am_choking: bool,
    pub am_interested: bool,
    pub peer_choking: bool,
    pub peer_interested: bool,
}

impl Default for ChokingState {
    fn default() -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
        }
    }
}

/// Extensions negotiated in the handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Extensions {
    /// Fast extension (BEP-6): HaveAll/HaveNone/Suggest/Reject/AllowedFast.
    pub fast: bool,
    /// The peer claims DHT support (we only ever discard its Port messages).
    pub dht: bool,
}

/// Per-connection policy.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeConfig {
    /// Serve blocks to this peer.
    pub can_upload: bool,
    /// Fetch blocks from this peer.
    pub can_download: bool,
    /// Treat a `Piece` frame for a block we never requested as a
    /// protocol violation instead of quietly ignoring it.
    pub strict_pieces: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            can_upload: true,
            can_download: true,
            strict_pieces: false,
        }
    }
}

/// The per-connection protocol state machine.
///
/// One `PeerExchange` runs per peer connection, usually as its own task.
/// It owns the framed transport, the peer's bitfield and choke/interest
/// flags, and a handle to the shared [`PieceStore`]. Newly completed
/// pieces are broadcast through the availability channel so the rest of
/// the swarm session learns about them; everything else stays on this
/// connection's wire.
///
/// Set notation used throughout (all sets of piece indices):
///
/// - `client_want` = peer's pieces minus ours (what we could fetch)
/// - `peer_want` = our pieces minus the peer's (what we could serve)
/// - `peer_offer` = `client_want` gated on [`ExchangeConfig::can_download`]
/// - `client_offer` = `peer_want` gated on [`ExchangeConfig::can_upload`]
pub struct PeerExchange<S> {
    transport: PeerTransport<S>,
    store: Arc<PieceStore>,
    config: ExchangeConfig,
    extensions: Extensions,
    status: ChokingState,
    peer_bitfield: Bitfield,
    /// Messages queued for the next flush, in emission order.
    outgoing: Vec<Message>,
    /// Requests sent and not yet answered.
    outstanding: HashSet<BlockRequest>,
    availability: mpsc::UnboundedSender<Bitfield>,
    peer_id: Option<PeerId>,
}

impl PeerExchange<TcpStream> {
    /// Dials a peer and performs the handshake.
    pub async fn connect(
        addr: SocketAddr,
        info_hash: [u8; 20],
        our_peer_id: PeerId,
        store: Arc<PieceStore>,
        config: ExchangeConfig,
        availability: mpsc::UnboundedSender<Bitfield>,
    ) -> Result<Self, PeerError> {
        let stream = TcpStream::connect(addr).await?;
        let mut transport = PeerTransport::new(stream);

        let ours = Handshake::new(info_hash, *our_peer_id.as_bytes());
        transport.send_handshake(&ours).await?;
        let theirs = transport.receive_handshake().await?;

        Self::from_handshake(transport, theirs, info_hash, store, config, availability)
    }

    /// Performs the handshake on an accepted incoming connection.
    pub async fn accept(
        stream: TcpStream,
        info_hash: [u8; 20],
        our_peer_id: PeerId,
        store: Arc<PieceStore>,
        config: ExchangeConfig,
        availability: mpsc::UnboundedSender<Bitfield>,
    ) -> Result<Self, PeerError> {
        let mut transport = PeerTransport::new(stream);

        let theirs = transport.receive_handshake().await?;
        let ours = Handshake::new(info_hash, *our_peer_id.as_bytes());
        transport.send_handshake(&ours).await?;

        Self::from_handshake(transport, theirs, info_hash, store, config, availability)
    }

    fn from_handshake(
        transport: PeerTransport<TcpStream>,
        theirs: Handshake,
        info_hash: [u8; 20],
        store: Arc<PieceStore>,
        config: ExchangeConfig,
        availability: mpsc::UnboundedSender<Bitfield>,
    ) -> Result<Self, PeerError> {
        if theirs.info_hash != info_hash {
            return Err(PeerError::InfoHashMismatch);
        }

        let extensions = Extensions {
            fast: theirs.supports_fast_extension(),
            dht: theirs.supports_dht(),
        };
        let peer_id = PeerId::from_bytes(&theirs.peer_id);
        tracing::debug!(?peer_id, ?extensions, "peer handshake complete");

        let mut exchange = Self::new(transport, store, config, extensions, availability);
        exchange.peer_id = peer_id;
        Ok(exchange)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> PeerExchange<S> {
    /// Builds an exchange over an already-handshaken stream.
    pub fn new(
        transport: PeerTransport<S>,
        store: Arc<PieceStore>,
        config: ExchangeConfig,
        extensions: Extensions,
        availability: mpsc::UnboundedSender<Bitfield>,
    ) -> Self {
        let piece_count = store.piece_count();
        Self {
            transport,
            store,
            config,
            extensions,
            status: ChokingState::default(),
            peer_bitfield: Bitfield::new(piece_count),
            outgoing: Vec::new(),
            outstanding: HashSet::new(),
            availability,
            peer_id: None,
        }
    }

    pub fn choking(&self) -> ChokingState {
        self.status
    }

    pub fn extensions(&self) -> Extensions {
        self.extensions
    }

    pub fn peer_bitfield(&self) -> &Bitfield {
        &self.peer_bitfield
    }

    pub fn peer_id(&self) -> Option<PeerId> {
        self.peer_id
    }

    /// Pieces we want that this peer has.
    fn client_want(&self) -> Bitfield {
        self.peer_bitfield.difference(&self.store.client_bitfield())
    }

    /// Pieces this peer wants that we have.
    fn peer_want(&self) -> Bitfield {
        self.store.client_bitfield().difference(&self.peer_bitfield)
    }

    /// What the peer has on offer for us, if downloading is on.
    fn peer_offer(&self) -> Bitfield {
        if self.config.can_download {
            self.client_want()
        } else {
            Bitfield::new(self.store.piece_count())
        }
    }

    /// What we have on offer for the peer, if uploading is on.
    fn client_offer(&self) -> Bitfield {
        if self.config.can_upload {
            self.peer_want()
        } else {
            Bitfield::new(self.store.piece_count())
        }
    }

    /// Reads frames until one produces a semantic event.
    ///
    /// Bookkeeping frames (choke, interest, keep-alives, fast-extension
    /// no-ops) are absorbed here; interest updates they trigger are
    /// flushed before the next read.
    pub async fn await_event(&mut self) -> Result<Event, PeerError> {
        loop {
            let message = self.transport.receive_message().await?;
            let event = self.handle_message(message)?;
            self.flush().await?;
            if let Some(event) = event {
                return Ok(event);
            }
        }
    }

    /// Acts on an event produced by the piece-selection loop.
    ///
    /// `Available` fans out to the swarm; `Want` becomes a `Request` if
    /// the piece is on offer from the peer; `Fragment` becomes a `Piece`
    /// if the piece is on offer to the peer. Anything else is dropped.
    pub async fn yield_event(&mut self, event: Event) -> Result<(), PeerError> {
        match event {
            Event::Available(bitfield) => {
                if self.availability.send(bitfield).is_err() {
                    tracing::trace!("availability bus closed, dropping update");
                }
            }
            Event::Want(request) => {
                if self.peer_offer().has(request.piece_index as usize)
                    && self.outstanding.insert(request)
                {
                    self.outgoing.push(Message::Request {
                        index: request.piece_index,
                        begin: request.offset,
                        length: request.length,
                    });
                }
            }
            Event::Fragment(block) => {
                if self.client_offer().has(block.piece_index as usize) {
                    self.outgoing.push(Message::Piece {
                        index: block.piece_index,
                        begin: block.offset,
                        data: block.data,
                    });
                }
            }
        }
        self.flush().await
    }

    /// The default piece-selection loop: announce our bitfield, then
    /// translate every event against the piece store until the peer
    /// disconnects or violates the protocol.
    pub async fn run(&mut self) -> Result<(), PeerError> {
        self.outgoing
            .push(Message::Bitfield(self.store.client_bitfield().to_bytes()));
        self.flush().await?;

        loop {
            let event = self.await_event().await?;
            self.handle(event).await?;
        }
    }

    /// One turn of the default loop.
    pub async fn handle(&mut self, event: Event) -> Result<(), PeerError> {
        match event {
            Event::Available(bitfield) => self.request_blocks(&bitfield).await,
            Event::Want(request) => {
                let block = self.store.get_block(&request)?;
                self.yield_event(Event::Fragment(block)).await
            }
            Event::Fragment(block) => {
                let piece = block.piece_index;
                if !self.store.put_block(&block)? {
                    return Ok(());
                }

                // Piece complete and verified: tell the peer, tell the
                // swarm, then keep draining whatever the peer still has.
                self.outgoing.push(Message::Have { piece });
                self.revise_interest();
                self.flush().await?;

                let mut completed = Bitfield::new(self.store.piece_count());
                completed.set(piece as usize);
                self.yield_event(Event::Available(completed)).await?;

                let offer = self.peer_offer();
                if !offer.is_empty() {
                    self.request_blocks(&offer).await?;
                }
                Ok(())
            }
        }
    }

    /// Requests every missing block of the lowest-indexed available piece.
    async fn request_blocks(&mut self, available: &Bitfield) -> Result<(), PeerError> {
        if let Some(piece) = available.first_set() {
            for request in self.store.select_block(piece as u32) {
                self.yield_event(Event::Want(request)).await?;
            }
        }
        Ok(())
    }

    fn handle_message(&mut self, message: Message) -> Result<Option<Event>, PeerError> {
        match message {
            Message::KeepAlive => Ok(None),
            Message::Choke => {
                self.status.peer_choking = true;
                Ok(None)
            }
            Message::Unchoke => {
                self.status.peer_choking = false;
                Ok(self.pending_offer())
            }
            Message::Interested => {
                self.status.peer_interested = true;
                Ok(None)
            }
            Message::NotInterested => {
                self.status.peer_interested = false;
                Ok(None)
            }
            Message::Have { piece } => {
                self.peer_bitfield.set(piece as usize);
                self.revise_interest();
                Ok(self.pending_offer())
            }
            Message::Bitfield(bits) => {
                self.peer_bitfield = Bitfield::from_bytes(bits, self.store.piece_count());
                self.revise_interest();
                Ok(self.pending_offer())
            }
            Message::Request {
                index,
                begin,
                length,
            } => {
                if self.client_offer().has(index as usize) {
                    Ok(Some(Event::Want(BlockRequest::new(index, begin, length))))
                } else {
                    tracing::trace!(piece = index, "ignoring request for piece not on offer");
                    Ok(None)
                }
            }
            Message::Piece { index, begin, data } => {
                let block = Block::new(index, begin, data);
                let solicited = self.outstanding.remove(&block.request());
                if self.config.strict_pieces && !solicited {
                    return Err(PeerError::Protocol(format!(
                        "piece {index} for a block never requested"
                    )));
                }
                if self.client_want().has(index as usize) {
                    Ok(Some(Event::Fragment(block)))
                } else {
                    tracing::trace!(piece = index, "ignoring block for unwanted piece");
                    Ok(None)
                }
            }
            Message::HaveAll => {
                self.require_fast("have_all")?;
                self.peer_bitfield = Bitfield::full(self.store.piece_count());
                self.revise_interest();
                Ok(None)
            }
            Message::HaveNone => {
                self.require_fast("have_none")?;
                self.peer_bitfield = Bitfield::new(self.store.piece_count());
                self.revise_interest();
                Ok(None)
            }
            Message::Suggest { piece } => {
                self.require_fast("suggest_piece")?;
                if (piece as usize) < self.store.piece_count()
                    && !self.peer_bitfield.has(piece as usize)
                {
                    let mut suggested = Bitfield::new(self.store.piece_count());
                    suggested.set(piece as usize);
                    Ok(Some(Event::Available(suggested)))
                } else {
                    Ok(None)
                }
            }
            Message::Reject { .. } => {
                self.require_fast("reject_request")?;
                Ok(None)
            }
            Message::AllowedFast { .. } => {
                self.require_fast("allowed_fast")?;
                Ok(None)
            }
            // Recognized but not acted on.
            Message::Cancel { .. } | Message::Port(_) => Ok(None),
        }
    }

    fn require_fast(&self, message: &str) -> Result<(), PeerError> {
        if self.extensions.fast {
            Ok(())
        } else {
            Err(PeerError::Protocol(format!(
                "{message} received but the fast extension is not enabled"
            )))
        }
    }

    /// The current peer offer as an `Available` event, if non-empty.
    fn pending_offer(&self) -> Option<Event> {
        let offer = self.peer_offer();
        (!offer.is_empty()).then_some(Event::Available(offer))
    }

    /// Re-evaluates `client_want`; when its emptiness flips, queues the
    /// matching Interested/NotInterested and updates our flag.
    fn revise_interest(&mut self) {
        let interested = !self.client_want().is_empty();
        if interested != self.status.am_interested {
            self.status.am_interested = interested;
            self.outgoing.push(if interested {
                Message::Interested
            } else {
                Message::NotInterested
            });
        }
    }

    /// Sends every queued message, in queue order.
    async fn flush(&mut self) -> Result<(), PeerError> {
        for message in std::mem::take(&mut self.outgoing) {
            self.transport.send_message(&message).await?;
        }
        Ok(())
    }
}
