use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng as _;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::error::TrackerError;
use super::response::{AnnounceInfo, AnnounceQuery, ScrapeInfo};
use super::wire::{self, TrackerRequest, TrackerResponse, PROTOCOL_ID};

/// How long a tracker honours a connection id (BEP-15).
const CONNECTION_TTL: Duration = Duration::from_secs(60);

/// Tuning knobs for the manager.
#[derive(Debug, Clone)]
pub struct TrackerOptions {
    /// Receive buffer size; responses longer than this are truncated by
    /// the OS and will fail to parse.
    pub max_packet_size: usize,
    /// First retransmission timeout, in seconds.
    pub min_timeout: u64,
    /// Give up once the doubling schedule passes this, in seconds.
    pub max_timeout: u64,
    /// Timeout growth factor between attempts.
    pub multiplier: u64,
}

impl Default for TrackerOptions {
    /// BEP-15 schedule: 15 · 2ⁿ seconds for n = 0..=8.
    fn default() -> Self {
        Self {
            max_packet_size: 2048,
            min_timeout: 15,
            max_timeout: 15 * (1 << 8),
            multiplier: 2,
        }
    }
}

impl TrackerOptions {
    fn validate(&self) -> Result<(), TrackerError> {
        if self.max_packet_size == 0 {
            return Err(TrackerError::InvalidOptions("max_packet_size must be > 0"));
        }
        if self.min_timeout == 0 {
            return Err(TrackerError::InvalidOptions("min_timeout must be > 0"));
        }
        if self.max_timeout <= self.min_timeout {
            return Err(TrackerError::InvalidOptions(
                "max_timeout must exceed min_timeout",
            ));
        }
        if self.multiplier == 0 {
            return Err(TrackerError::InvalidOptions("multiplier must be > 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Connection {
    id: u64,
    established_at: Instant,
}

impl Connection {
    fn expired(&self) -> bool {
        self.established_at.elapsed() >= CONNECTION_TTL
    }
}

type SlotTable = HashMap<SocketAddr, HashMap<u32, oneshot::Sender<TrackerResponse>>>;

struct Shared {
    options: TrackerOptions,
    /// Outstanding RPCs: address → transaction id → response slot.
    pending: Mutex<SlotTable>,
    /// Cached connection ids, refreshed on expiry.
    connections: DashMap<SocketAddr, Connection>,
    closed: AtomicBool,
}

impl Shared {
    /// Picks a transaction id and registers the slot, atomically under
    /// the pending lock.
    fn register(
        &self,
        addr: SocketAddr,
        tx: oneshot::Sender<TrackerResponse>,
    ) -> Result<u32, TrackerError> {
        let mut pending = self.pending.lock();
        let slots = pending.entry(addr).or_default();
        let transaction_id = first_unused(slots, rand::rng().random())
            .ok_or_else(|| TrackerError::QueryFailed("transaction id space exhausted".into()))?;
        slots.insert(transaction_id, tx);
        Ok(transaction_id)
    }

    fn unregister(&self, addr: SocketAddr, transaction_id: u32) {
        let mut pending = self.pending.lock();
        if let Some(slots) = pending.get_mut(&addr) {
            slots.remove(&transaction_id);
            if slots.is_empty() {
                pending.remove(&addr);
            }
        }
    }
}

/// The nearest id to `start` not present in `slots`: scan upward first,
/// then downward from `start`.
pub(super) fn first_unused<V>(slots: &HashMap<u32, V>, start: u32) -> Option<u32> {
    let mut id = start;
    loop {
        if !slots.contains_key(&id) {
            return Some(id);
        }
        match id.checked_add(1) {
            Some(next) => id = next,
            None => break,
        }
    }

    let mut id = start;
    while let Some(next) = id.checked_sub(1) {
        id = next;
        if !slots.contains_key(&id) {
            return Some(id);
        }
    }
    None
}

// Unregisters the slot when the awaiting caller unwinds (cancellation,
// timeout, error); a removal that already happened is a no-op.
struct SlotGuard<'a> {
    shared: &'a Shared,
    addr: SocketAddr,
    transaction_id: u32,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.shared.unregister(self.addr, self.transaction_id);
    }
}

/// Multiplexes UDP tracker RPCs for any number of trackers over a single
/// socket.
///
/// Cheap to share behind an [`Arc`]; every method takes `&self`. A
/// background task reads the socket and hands responses to the awaiting
/// callers; [`close`](UdpTrackerManager::close) stops it and fails every
/// RPC still in flight.
pub struct UdpTrackerManager {
    socket: Arc<UdpSocket>,
    shared: Arc<Shared>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl UdpTrackerManager {
    /// Binds an ephemeral socket and starts the listener.
    pub async fn bind(options: TrackerOptions) -> Result<Self, TrackerError> {
        options.validate()?;

        let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
        let shared = Arc::new(Shared {
            options,
            pending: Mutex::new(HashMap::new()),
            connections: DashMap::new(),
            closed: AtomicBool::new(false),
        });

        let listener = tokio::spawn(listen(socket.clone(), Arc::downgrade(&shared)));

        Ok(Self {
            socket,
            shared,
            listener: Mutex::new(Some(listener)),
        })
    }

    /// Announces to the tracker at `uri` (`udp://host:port`).
    pub async fn announce(
        &self,
        uri: &str,
        query: &AnnounceQuery,
    ) -> Result<AnnounceInfo, TrackerError> {
        let addr = resolve(uri).await?;
        let connection_id = self.connection_id(addr).await?;
        match self
            .request(addr, connection_id, TrackerRequest::Announce(query.clone()))
            .await?
        {
            TrackerResponse::Announced(info) => Ok(info),
            TrackerResponse::Failed(message) => Err(TrackerError::QueryFailed(message)),
            other => Err(TrackerError::UnexpectedResponse {
                expected: "announce",
                actual: other.kind(),
            }),
        }
    }

    /// Scrapes seed/leech counters for `info_hashes` from the tracker at
    /// `uri`, pairing each hash with its record.
    pub async fn scrape(
        &self,
        uri: &str,
        info_hashes: &[[u8; 20]],
    ) -> Result<Vec<ScrapeInfo>, TrackerError> {
        let addr = resolve(uri).await?;
        let connection_id = self.connection_id(addr).await?;
        match self
            .request(
                addr,
                connection_id,
                TrackerRequest::Scrape(info_hashes.to_vec()),
            )
            .await?
        {
            TrackerResponse::Scraped(records) => Ok(info_hashes
                .iter()
                .zip(records)
                .map(|(hash, stats)| ScrapeInfo {
                    info_hash: *hash,
                    seeders: stats.seeders,
                    completed: stats.completed,
                    leechers: stats.leechers,
                })
                .collect()),
            TrackerResponse::Failed(message) => Err(TrackerError::QueryFailed(message)),
            other => Err(TrackerError::UnexpectedResponse {
                expected: "scrape",
                actual: other.kind(),
            }),
        }
    }

    /// Stops the listener and fails every outstanding RPC with
    /// [`TrackerError::ManagerClosed`]. No RPC may be issued afterwards.
    pub async fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);

        let handle = self.listener.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }

        // Dropping the senders wakes every awaiting caller.
        let drained: SlotTable = std::mem::take(&mut *self.shared.pending.lock());
        drop(drained);

        tracing::debug!("tracker manager closed");
    }

    /// Returns a live connection id for `addr`, running a fresh connect
    /// exchange when the cache is empty or the entry passed its TTL.
    async fn connection_id(&self, addr: SocketAddr) -> Result<u64, TrackerError> {
        if let Some(entry) = self.shared.connections.get(&addr) {
            if !entry.expired() {
                return Ok(entry.id);
            }
        }

        match self.request(addr, PROTOCOL_ID, TrackerRequest::Connect).await? {
            TrackerResponse::Connected { connection_id } => {
                self.shared.connections.insert(
                    addr,
                    Connection {
                        id: connection_id,
                        established_at: Instant::now(),
                    },
                );
                Ok(connection_id)
            }
            TrackerResponse::Failed(message) => Err(TrackerError::QueryFailed(message)),
            other => Err(TrackerError::UnexpectedResponse {
                expected: "connect",
                actual: other.kind(),
            }),
        }
    }

    /// One RPC: register a slot, send, await the listener's delivery,
    /// retransmitting on the exponential schedule.
    async fn request(
        &self,
        addr: SocketAddr,
        connection_id: u64,
        request: TrackerRequest,
    ) -> Result<TrackerResponse, TrackerError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TrackerError::ManagerClosed);
        }

        let (tx, mut rx) = oneshot::channel();
        let transaction_id = self.shared.register(addr, tx)?;
        let _guard = SlotGuard {
            shared: &self.shared,
            addr,
            transaction_id,
        };
        // A close between the entry check and registration would miss
        // this slot in its drain; the guard removes it on return.
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TrackerError::ManagerClosed);
        }
        let packet = request.encode(connection_id, transaction_id);

        let mut wait = self.shared.options.min_timeout;
        loop {
            self.socket.send_to(&packet, addr).await?;
            if wait > self.shared.options.max_timeout {
                return Err(TrackerError::TimeoutExpired(wait));
            }

            match timeout(Duration::from_secs(wait), &mut rx).await {
                Ok(Ok(response)) => return Ok(response),
                // The only way the sender is dropped undelivered is the
                // close() drain.
                Ok(Err(_)) => return Err(TrackerError::ManagerClosed),
                Err(_) => {
                    wait *= self.shared.options.multiplier;
                    tracing::debug!(
                        %addr,
                        transaction_id,
                        kind = request.kind(),
                        next_timeout = wait,
                        "tracker request timed out, retransmitting"
                    );
                }
            }
        }
    }
}

impl Drop for UdpTrackerManager {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for UdpTrackerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTrackerManager")
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Resolves a `udp://host:port` tracker URI to a socket address.
async fn resolve(uri: &str) -> Result<SocketAddr, TrackerError> {
    let rest = match uri.strip_prefix("udp://") {
        Some(rest) => rest,
        None => {
            let scheme = uri.split(':').next().unwrap_or(uri);
            return Err(TrackerError::UnrecognizedScheme(scheme.to_string()));
        }
    };

    let authority = rest.split('/').next().unwrap_or("");
    if authority.is_empty() {
        return Err(TrackerError::HostUnknown(uri.to_string()));
    }

    tokio::net::lookup_host(authority)
        .await
        .map_err(|_| TrackerError::HostLookupFailed(authority.to_string()))?
        .next()
        .ok_or_else(|| TrackerError::HostLookupFailed(authority.to_string()))
}

/// Socket read loop: decode each datagram and hand it to the slot it
/// answers. Unparseable packets and late or unsolicited responses are
/// dropped.
async fn listen(socket: Arc<UdpSocket>, shared: Weak<Shared>) {
    let max_packet_size = match shared.upgrade() {
        Some(shared) => shared.options.max_packet_size,
        None => return,
    };
    let mut buf = vec![0u8; max_packet_size];

    loop {
        let (len, addr) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(error) => {
                tracing::debug!(%error, "tracker socket read failed, listener exiting");
                return;
            }
        };

        // The manager going away (or closing) ends the loop.
        let Some(shared) = shared.upgrade() else { return };
        if shared.closed.load(Ordering::Acquire) {
            return;
        }

        let Some((transaction_id, response)) = wire::decode_response(&buf[..len]) else {
            tracing::trace!(%addr, len, "dropping unparseable tracker packet");
            continue;
        };

        let slot = {
            let mut pending = shared.pending.lock();
            pending
                .get_mut(&addr)
                .and_then(|slots| slots.remove(&transaction_id))
        };
        match slot {
            Some(tx) => {
                // A receiver dropped between lookup and send lost
                // interest; nothing to do.
                let _ = tx.send(response);
            }
            None => {
                tracing::trace!(%addr, transaction_id, "dropping response for unknown transaction");
            }
        }
    }
}
