//! Node lifecycle and the public whisper surface.
//!
//! [`Murmur`] is a cheaply cloneable handle around the node's shared
//! state. Peers hold the same handle indirectly: each attached link
//! gets a pool view onto the node, while the peer registry keeps only
//! ids and quit handles — never the sessions themselves — so peer
//! lifetime stays scoped to its link.
//!
//! # State machine
//!
//! ```text
//! Created ──start()──▶ Running ──stop()──▶ Stopped
//! ```
//!
//! - `Created` — registries exist, no background tasks.
//! - `Running` — expiration engine ticking, peers attachable.
//! - `Stopped` — shutdown signal sent; terminal.
//!
//! Double-start is rejected; `stop` is idempotent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use murmur_crypto::keys::{KeyPair, PublicKey};
use murmur_net::link::{PacketReader, PacketWriter};
use murmur_net::peer::{EnvelopePool, PeerHandle, PeerSession};
use murmur_protocol::envelope::Envelope;
use murmur_protocol::filter::{Filter, FilterKey, FilterRegistry};
use murmur_protocol::message::Message;
use murmur_types::config::NodeConfig;
use murmur_types::time::unix_now;
use murmur_types::{MurmurError, PeerId, Result, CAPABILITY_LEN, PROTOCOL_NAME, PROTOCOL_VERSION};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::pool::Pool;

// ---------------------------------------------------------------------------
// NodeState
// ---------------------------------------------------------------------------

/// Lifecycle state of the node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeState {
    /// Constructed, expiration engine not yet running.
    Created,
    /// Expiration engine active, peers attachable.
    Running,
    /// Shutdown signalled; terminal.
    Stopped,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeInner
// ---------------------------------------------------------------------------

/// Shared state behind every [`Murmur`] handle and peer pool view.
struct NodeInner {
    config: NodeConfig,
    pool: Pool,
    filters: FilterRegistry,
    identities: RwLock<HashMap<PublicKey, KeyPair>>,
    peers: RwLock<HashMap<u64, PeerHandle>>,
    next_peer_id: AtomicU64,
    state: Mutex<NodeState>,
    shutdown_tx: watch::Sender<bool>,
}

impl NodeInner {
    /// Tries to open an envelope with every configured identity.
    ///
    /// With no identities configured the payload is assumed cleartext.
    /// Otherwise each identity is tried in turn; a successful decrypt
    /// stamps the message's `to` field. An invalid embedded ephemeral
    /// key short-circuits the loop — no identity can ever open that
    /// envelope.
    fn open_envelope(&self, envelope: &Envelope) -> Option<Message> {
        let identities: Vec<KeyPair> = self
            .identities_read()
            .values()
            .cloned()
            .collect();

        if identities.is_empty() {
            return envelope.open(None).ok();
        }

        for identity in &identities {
            match envelope.open(Some(identity)) {
                Ok(mut message) => {
                    message.to = Some(identity.public_key());
                    return Some(message);
                }
                Err(MurmurError::InvalidPublicKey) => return None,
                Err(_) => continue,
            }
        }
        None
    }

    /// Opens a fresh envelope and notifies matching filters.
    fn deliver(&self, envelope: &Envelope) {
        if let Some(message) = self.open_envelope(envelope) {
            let key = FilterKey::for_message(&message, &envelope.topics);
            self.filters.notify(&key, &message);
        }
    }

    /// Pools an envelope; on freshness, dispatches the asynchronous
    /// filter-notification task. Notification never runs under the
    /// pool lock.
    fn add_envelope(self: &Arc<Self>, envelope: &Envelope) -> Result<bool> {
        let fresh = self.pool.add(envelope)?;
        if fresh {
            let inner = Arc::clone(self);
            let envelope = envelope.clone();
            tokio::spawn(async move {
                inner.deliver(&envelope);
            });
        }
        Ok(fresh)
    }

    fn remove_peer(&self, id: PeerId) {
        self.peers_write().remove(&id.value());
        tracing::debug!(peer = %id, "peer deregistered");
    }

    fn identities_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<PublicKey, KeyPair>> {
        match self.identities.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("identity registry lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    fn identities_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<PublicKey, KeyPair>> {
        match self.identities.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("identity registry lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    fn peers_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<u64, PeerHandle>> {
        match self.peers.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("peer registry lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    fn peers_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<u64, PeerHandle>> {
        match self.peers.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("peer registry lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    fn state_locked(&self) -> std::sync::MutexGuard<'_, NodeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("node state lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Peer pool view
// ---------------------------------------------------------------------------

/// The pool contract handed to each peer session.
struct PoolView {
    inner: Arc<NodeInner>,
}

impl EnvelopePool for PoolView {
    fn add(&self, envelope: Envelope) -> Result<bool> {
        self.inner.add_envelope(&envelope)
    }

    fn envelopes(&self) -> Vec<Envelope> {
        self.inner.pool.envelopes()
    }
}

// ---------------------------------------------------------------------------
// Murmur
// ---------------------------------------------------------------------------

/// The murmur node handle.
///
/// Clone freely; all clones share one node. Construction wires the
/// registries, [`Murmur::start`] launches the expiration engine, and
/// [`Murmur::stop`] signals every background task — the expiration
/// engine and all peer sessions — to exit promptly.
#[derive(Clone)]
pub struct Murmur {
    inner: Arc<NodeInner>,
}

impl Murmur {
    /// Creates a node with the given configuration.
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Creates a node with default configuration.
    pub fn with_defaults() -> Self {
        Self::build(NodeConfig::default())
    }

    fn build(config: NodeConfig) -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            inner: Arc::new(NodeInner {
                config,
                pool: Pool::new(),
                filters: FilterRegistry::new(),
                identities: RwLock::new(HashMap::new()),
                peers: RwLock::new(HashMap::new()),
                next_peer_id: AtomicU64::new(0),
                state: Mutex::new(NodeState::Created),
                shutdown_tx,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Starts the expiration engine.
    ///
    /// Must be called from within a tokio runtime. Returns the engine's
    /// task handle; it resolves after [`Murmur::stop`].
    ///
    /// # Errors
    ///
    /// `NodeError` unless the node is in the `Created` state.
    pub fn start(&self) -> Result<JoinHandle<()>> {
        {
            let mut state = self.inner.state_locked();
            if *state != NodeState::Created {
                return Err(MurmurError::NodeError {
                    reason: format!("cannot start node in state '{state}'"),
                });
            }
            *state = NodeState::Running;
        }

        let inner = Arc::clone(&self.inner);
        let shutdown_rx = self.inner.shutdown_tx.subscribe();
        let cycle = Duration::from_millis(self.inner.config.expiration_cycle_ms);

        tracing::info!(
            protocol = PROTOCOL_NAME,
            version = PROTOCOL_VERSION,
            "murmur node started"
        );
        Ok(tokio::spawn(expiration_loop(inner, cycle, shutdown_rx)))
    }

    /// Signals every background task to stop. Idempotent.
    pub fn stop(&self) {
        {
            let mut state = self.inner.state_locked();
            if *state == NodeState::Stopped {
                return;
            }
            *state = NodeState::Stopped;
        }

        let _ = self.inner.shutdown_tx.send(true);
        tracing::info!("murmur node stopped");
    }

    /// Current lifecycle state.
    pub fn state(&self) -> NodeState {
        *self.inner.state_locked()
    }

    // -----------------------------------------------------------------------
    // Protocol surface
    // -----------------------------------------------------------------------

    /// Sub-protocol name announced to the transport.
    pub fn protocol_name(&self) -> &'static str {
        PROTOCOL_NAME
    }

    /// Sub-protocol version.
    pub fn protocol_version(&self) -> u32 {
        PROTOCOL_VERSION
    }

    /// Number of packet codes the sub-protocol occupies.
    pub fn capability_len(&self) -> u8 {
        CAPABILITY_LEN
    }

    // -----------------------------------------------------------------------
    // Identities
    // -----------------------------------------------------------------------

    /// Generates a fresh identity and injects it into the registry.
    pub fn new_identity(&self) -> KeyPair {
        let identity = KeyPair::generate();
        self.inject_identity(identity.clone());
        identity
    }

    /// Injects an existing identity for inbound decryption.
    pub fn inject_identity(&self, identity: KeyPair) {
        let public = identity.public_key();
        self.inner.identities_write().insert(public, identity);
        tracing::debug!(identity = %public, "identity injected");
    }

    /// Returns `true` when the node holds the private key for `public`.
    pub fn has_identity(&self, public: &PublicKey) -> bool {
        self.inner.identities_read().contains_key(public)
    }

    /// Retrieves the private key for `public`, if held.
    pub fn identity(&self, public: &PublicKey) -> Option<KeyPair> {
        self.inner.identities_read().get(public).cloned()
    }

    // -----------------------------------------------------------------------
    // Filters
    // -----------------------------------------------------------------------

    /// Installs a message filter; returns its id.
    pub fn watch(&self, filter: Filter) -> usize {
        self.inner.filters.install(filter)
    }

    /// Removes an installed filter. Returns `false` for unknown ids.
    pub fn unwatch(&self, id: usize) -> bool {
        self.inner.filters.uninstall(id)
    }

    /// Re-opens every pooled envelope against the installed filter
    /// `id`, returning the messages it accepts.
    pub fn messages(&self, id: usize) -> Vec<Message> {
        let Some(filter) = self.inner.filters.get(id) else {
            return Vec::new();
        };

        self.inner
            .pool
            .envelopes()
            .iter()
            .filter_map(|envelope| {
                let message = self.inner.open_envelope(envelope)?;
                let key = FilterKey::for_message(&message, &envelope.topics);
                filter.accepts(&key).then_some(message)
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Envelopes
    // -----------------------------------------------------------------------

    /// Injects an envelope into the pool for gossip in the coming
    /// transmission cycles. Fresh envelopes are matched against the
    /// installed filters asynchronously.
    ///
    /// # Errors
    ///
    /// `NodeError` after [`Murmur::stop`]; `EnvelopeError` when the
    /// pool's validator rejects the envelope.
    pub fn post(&self, envelope: &Envelope) -> Result<()> {
        self.ensure_not_stopped()?;
        self.inner.add_envelope(envelope)?;
        Ok(())
    }

    /// Snapshot of the currently pooled envelopes.
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.inner.pool.envelopes()
    }

    // -----------------------------------------------------------------------
    // Peers
    // -----------------------------------------------------------------------

    /// Attaches a negotiated peer link and runs the sub-protocol over
    /// it in a background task.
    ///
    /// The peer is registered immediately and deregistered when its
    /// session ends for any reason — link failure, protocol violation,
    /// disconnect, or node shutdown.
    pub fn attach_peer<R, W>(&self, reader: R, writer: W) -> Result<PeerId>
    where
        R: PacketReader + 'static,
        W: PacketWriter + 'static,
    {
        self.ensure_not_stopped()?;

        let id = PeerId::new(self.inner.next_peer_id.fetch_add(1, Ordering::Relaxed));
        let pool: Arc<dyn EnvelopePool> = Arc::new(PoolView {
            inner: Arc::clone(&self.inner),
        });

        let (session, handle) = PeerSession::new(
            id,
            pool,
            reader,
            writer,
            Duration::from_millis(self.inner.config.transmission_cycle_ms),
            self.inner.config.known_cache_capacity,
            self.inner.shutdown_tx.subscribe(),
        );

        self.inner.peers_write().insert(id.value(), handle);
        tracing::debug!(peer = %id, "peer attached");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(e) = session.run().await {
                tracing::info!(peer = %id, error = %e, "peer session ended with error");
            }
            inner.remove_peer(id);
        });

        Ok(id)
    }

    /// Disconnects an attached peer. Returns `false` for unknown ids.
    pub fn disconnect_peer(&self, id: PeerId) -> bool {
        let peers = self.inner.peers_read();
        match peers.get(&id.value()) {
            Some(handle) => {
                handle.disconnect();
                true
            }
            None => false,
        }
    }

    /// Number of currently attached peers.
    pub fn peer_count(&self) -> usize {
        self.inner.peers_read().len()
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn ensure_not_stopped(&self) -> Result<()> {
        if *self.inner.state_locked() == NodeState::Stopped {
            return Err(MurmurError::NodeError {
                reason: "node is stopped".into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Expiration engine
// ---------------------------------------------------------------------------

/// Sweeps the pool on a fixed cadence until shutdown.
async fn expiration_loop(
    inner: Arc<NodeInner>,
    cycle: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(cycle);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                inner.pool.expire(unix_now());
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    tracing::debug!("expiration engine stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
