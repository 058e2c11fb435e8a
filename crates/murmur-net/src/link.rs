//! The peer link abstraction.
//!
//! The transport collaborator hands the core two halves per connection:
//! a [`PacketReader`] and a [`PacketWriter`]. How packets are framed on
//! a socket is the transport's concern; the core only sees typed
//! `(code, payload)` units.
//!
//! [`memory_link`] builds a connected pair of in-process links, used by
//! the integration tests and by embedders that run several nodes in one
//! process. The channels are bounded, so a peer that stops draining its
//! inbox eventually backpressures the sender instead of ballooning
//! memory.

use async_trait::async_trait;
use murmur_types::{MurmurError, Result};
use tokio::sync::mpsc;

use crate::packet::Packet;

/// Packets buffered per direction in an in-memory link.
const MEMORY_LINK_DEPTH: usize = 64;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Read half of a peer link.
#[async_trait]
pub trait PacketReader: Send {
    /// Reads the next packet. Errors are terminal for the link.
    async fn read_packet(&mut self) -> Result<Packet>;
}

/// Write half of a peer link.
#[async_trait]
pub trait PacketWriter: Send {
    /// Writes one packet. Errors are terminal for the link.
    async fn write_packet(&mut self, packet: Packet) -> Result<()>;
}

// ---------------------------------------------------------------------------
// In-memory link
// ---------------------------------------------------------------------------

/// Read half of an in-memory link.
pub struct MemoryReader {
    rx: mpsc::Receiver<Packet>,
}

/// Write half of an in-memory link.
pub struct MemoryWriter {
    tx: mpsc::Sender<Packet>,
}

/// Builds a connected pair of in-memory links.
///
/// Returns `(a, b)` where everything written to `a`'s writer arrives at
/// `b`'s reader and vice versa.
pub fn memory_link() -> ((MemoryReader, MemoryWriter), (MemoryReader, MemoryWriter)) {
    let (a_to_b_tx, a_to_b_rx) = mpsc::channel(MEMORY_LINK_DEPTH);
    let (b_to_a_tx, b_to_a_rx) = mpsc::channel(MEMORY_LINK_DEPTH);

    let a = (MemoryReader { rx: b_to_a_rx }, MemoryWriter { tx: a_to_b_tx });
    let b = (MemoryReader { rx: a_to_b_rx }, MemoryWriter { tx: b_to_a_tx });
    (a, b)
}

#[async_trait]
impl PacketReader for MemoryReader {
    async fn read_packet(&mut self) -> Result<Packet> {
        self.rx.recv().await.ok_or_else(|| MurmurError::LinkError {
            reason: "link closed by remote".into(),
        })
    }
}

#[async_trait]
impl PacketWriter for MemoryWriter {
    async fn write_packet(&mut self, packet: Packet) -> Result<()> {
        self.tx
            .send(packet)
            .await
            .map_err(|_| MurmurError::LinkError {
                reason: "link closed by remote".into(),
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
