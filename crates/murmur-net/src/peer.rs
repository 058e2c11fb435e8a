//! The per-peer protocol state machine.
//!
//! A peer session moves through `opening → handshaking → running →
//! closing`; closure is terminal, there is no reconnect state. While
//! running, two cooperating tasks share the link:
//!
//! - the **inbound** task reads packets, merges envelope batches into
//!   the node's pool and records each hash as known to the peer;
//! - the **outbound** task wakes every transmission cycle and ships the
//!   pool contents the peer has not seen yet as one batch.
//!
//! Both tasks observe the per-peer quit signal and the node-wide
//! shutdown signal on every iteration and exit promptly. No locks are
//! held across await points.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use murmur_protocol::envelope::Envelope;
use murmur_types::{
    EnvelopeHash, MurmurError, PeerId, Result, MESSAGES_CODE, PROTOCOL_VERSION, STATUS_CODE,
};
use tokio::sync::watch;

use crate::known::KnownCache;
use crate::link::{PacketReader, PacketWriter};
use crate::packet::Packet;

// ---------------------------------------------------------------------------
// EnvelopePool
// ---------------------------------------------------------------------------

/// The node-side pool a peer session merges traffic into.
///
/// Implemented by the node crate; kept as a trait here so the state
/// machine depends on the pool's contract, not its wiring.
pub trait EnvelopePool: Send + Sync {
    /// Inserts an envelope. Returns `Ok(true)` for a fresh envelope,
    /// `Ok(false)` for a duplicate, and an error when validation
    /// rejects it.
    fn add(&self, envelope: Envelope) -> Result<bool>;

    /// Snapshot of the current pool contents.
    fn envelopes(&self) -> Vec<Envelope>;
}

// ---------------------------------------------------------------------------
// Peer
// ---------------------------------------------------------------------------

/// Shared per-peer state: identity and the known-envelope cache.
pub struct Peer {
    id: PeerId,
    known: Mutex<KnownCache>,
}

impl Peer {
    /// Creates peer state with a known-cache of the given capacity.
    pub fn new(id: PeerId, known_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            id,
            known: Mutex::new(KnownCache::new(known_capacity)),
        })
    }

    /// The node-local peer id.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Marks an envelope hash as seen by this peer. Returns `true` when
    /// it was not already tracked.
    pub fn mark_known(&self, hash: EnvelopeHash) -> bool {
        self.known_locked().insert(hash)
    }

    /// Returns `true` when the peer is known to have seen `hash`.
    pub fn knows(&self, hash: &EnvelopeHash) -> bool {
        self.known_locked().contains(hash)
    }

    /// Number of hashes currently tracked for this peer.
    pub fn known_len(&self) -> usize {
        self.known_locked().len()
    }

    fn known_locked(&self) -> std::sync::MutexGuard<'_, KnownCache> {
        match self.known.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!(peer = %self.id, "known cache lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// PeerHandle
// ---------------------------------------------------------------------------

/// Registry-side handle to a running peer session.
///
/// Dropping the handle also terminates the session (the quit channel
/// closes), so a registry entry going away can never leak the tasks.
pub struct PeerHandle {
    id: PeerId,
    quit: watch::Sender<bool>,
}

impl PeerHandle {
    /// The node-local peer id.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Signals both peer tasks to stop.
    pub fn disconnect(&self) {
        let _ = self.quit.send(true);
    }
}

// ---------------------------------------------------------------------------
// PeerSession
// ---------------------------------------------------------------------------

/// A peer link plus everything needed to run the protocol over it.
pub struct PeerSession<R, W> {
    peer: Arc<Peer>,
    pool: Arc<dyn EnvelopePool>,
    reader: R,
    writer: W,
    transmission_cycle: Duration,
    quit_rx: watch::Receiver<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<R, W> PeerSession<R, W>
where
    R: PacketReader,
    W: PacketWriter + 'static,
{
    /// Creates a session and its registry handle.
    ///
    /// `shutdown_rx` is the node-wide shutdown signal; the returned
    /// handle carries the per-peer quit signal.
    pub fn new(
        id: PeerId,
        pool: Arc<dyn EnvelopePool>,
        reader: R,
        writer: W,
        transmission_cycle: Duration,
        known_capacity: usize,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (Self, PeerHandle) {
        let (quit_tx, quit_rx) = watch::channel(false);
        let session = Self {
            peer: Peer::new(id, known_capacity),
            pool,
            reader,
            writer,
            transmission_cycle,
            quit_rx,
            shutdown_rx,
        };
        let handle = PeerHandle { id, quit: quit_tx };
        (session, handle)
    }

    /// Shared peer state (exposed for tests and diagnostics).
    pub fn peer(&self) -> Arc<Peer> {
        Arc::clone(&self.peer)
    }

    /// Runs the session to completion: handshake, then both protocol
    /// tasks until the link fails, a protocol violation occurs, or a
    /// quit/shutdown signal arrives.
    pub async fn run(mut self) -> Result<()> {
        self.handshake().await?;

        let mut transmitter = tokio::spawn(transmit_loop(
            self.writer,
            Arc::clone(&self.peer),
            Arc::clone(&self.pool),
            self.transmission_cycle,
            self.quit_rx.clone(),
            self.shutdown_rx.clone(),
        ));

        let result = tokio::select! {
            inbound = read_loop(
                &mut self.reader,
                &self.peer,
                self.pool.as_ref(),
                self.quit_rx.clone(),
                self.shutdown_rx.clone(),
            ) => {
                // Inbound finished first; the transmitter's in-flight
                // write (if any) is abandoned.
                transmitter.abort();
                inbound
            }
            outbound = &mut transmitter => {
                match outbound {
                    Ok(result) => result,
                    Err(_) => Err(MurmurError::LinkError {
                        reason: "transmitter task aborted".into(),
                    }),
                }
            }
        };

        match &result {
            Ok(()) => tracing::debug!(peer = %self.peer.id(), "peer session closed"),
            Err(e) => tracing::debug!(peer = %self.peer.id(), error = %e, "peer session failed"),
        }
        result
    }

    /// Exchanges status packets and verifies the protocol version.
    ///
    /// Any read/write failure, wrong packet code, or version mismatch
    /// is fatal for the link.
    async fn handshake(&mut self) -> Result<()> {
        self.writer.write_packet(Packet::status()).await?;

        let packet = self.reader.read_packet().await?;
        let version = packet.decode_status()?;
        if version != PROTOCOL_VERSION {
            return Err(MurmurError::ProtocolError {
                reason: format!(
                    "protocol version mismatch: ours {PROTOCOL_VERSION}, theirs {version}"
                ),
            });
        }

        tracing::debug!(peer = %self.peer.id(), version, "handshake complete");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Inbound task
// ---------------------------------------------------------------------------

async fn read_loop<R: PacketReader>(
    reader: &mut R,
    peer: &Peer,
    pool: &dyn EnvelopePool,
    mut quit_rx: watch::Receiver<bool>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        if *quit_rx.borrow() || *shutdown_rx.borrow() {
            return Ok(());
        }

        tokio::select! {
            changed = quit_rx.changed() => {
                if changed.is_err() || *quit_rx.borrow() {
                    return Ok(());
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return Ok(());
                }
            }
            packet = reader.read_packet() => {
                let packet = packet?;
                match packet.code {
                    MESSAGES_CODE => handle_batch(&packet, peer, pool),
                    STATUS_CODE => {
                        return Err(MurmurError::ProtocolError {
                            reason: "unexpected status packet after handshake".into(),
                        });
                    }
                    code => {
                        return Err(MurmurError::ProtocolError {
                            reason: format!("unknown packet code {code:#04x}"),
                        });
                    }
                }
            }
        }
    }
}

/// Merges one envelope batch into the pool.
///
/// A whole-packet decode failure is logged and the packet skipped; the
/// peer stays connected. Individual pool rejections are logged per
/// envelope.
fn handle_batch(packet: &Packet, peer: &Peer, pool: &dyn EnvelopePool) {
    let batch = match packet.decode_envelopes() {
        Ok(batch) => batch,
        Err(e) => {
            tracing::info!(peer = %peer.id(), error = %e, "failed to decode envelope batch");
            return;
        }
    };
    if batch.malformed > 0 {
        tracing::info!(
            peer = %peer.id(),
            malformed = batch.malformed,
            "peer sent malformed envelopes"
        );
    }

    for envelope in batch.envelopes {
        let hash = envelope.hash();
        if let Err(e) = pool.add(envelope) {
            tracing::debug!(peer = %peer.id(), %hash, error = %e, "failed to pool envelope");
        }
        peer.mark_known(hash);
    }
}

// ---------------------------------------------------------------------------
// Outbound task
// ---------------------------------------------------------------------------

async fn transmit_loop<W: PacketWriter>(
    mut writer: W,
    peer: Arc<Peer>,
    pool: Arc<dyn EnvelopePool>,
    cycle: Duration,
    mut quit_rx: watch::Receiver<bool>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let mut ticker = tokio::time::interval(cycle);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        if *quit_rx.borrow() || *shutdown_rx.borrow() {
            return Ok(());
        }

        tokio::select! {
            changed = quit_rx.changed() => {
                if changed.is_err() || *quit_rx.borrow() {
                    return Ok(());
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return Ok(());
                }
            }
            _ = ticker.tick() => {
                let batch: Vec<Envelope> = pool
                    .envelopes()
                    .into_iter()
                    .filter(|envelope| !peer.knows(&envelope.hash()))
                    .collect();
                if batch.is_empty() {
                    continue;
                }

                writer.write_packet(Packet::messages(&batch)).await?;
                for envelope in &batch {
                    peer.mark_known(envelope.hash());
                }
                tracing::trace!(
                    peer = %peer.id(),
                    count = batch.len(),
                    "transmitted envelope batch"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
