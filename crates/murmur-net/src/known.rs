//! Bounded cache of envelope hashes a peer has seen.
//!
//! Each peer tracks which envelopes the remote side already has — either
//! because it sent them to us or because we sent them to it — to
//! suppress redundant re-sends. The cache is FIFO-bounded: when full,
//! the oldest hash is evicted. Evicting a live hash costs at most one
//! redundant transmission (the pool still deduplicates on arrival), so
//! correctness never depends on retention.

use std::collections::{HashSet, VecDeque};

use murmur_types::EnvelopeHash;

/// FIFO-bounded set of envelope hashes.
pub struct KnownCache {
    seen: HashSet<EnvelopeHash>,
    order: VecDeque<EnvelopeHash>,
    capacity: usize,
}

impl KnownCache {
    /// Creates a cache holding at most `capacity` hashes. A capacity of
    /// zero is treated as one so at least one hash can be tracked.
    pub fn new(capacity: usize) -> Self {
        let cap = capacity.max(1);
        Self {
            seen: HashSet::with_capacity(cap),
            order: VecDeque::with_capacity(cap),
            capacity: cap,
        }
    }

    /// Marks `hash` as seen.
    ///
    /// Returns `true` when the hash was not already present. Evicts the
    /// oldest entry when at capacity.
    pub fn insert(&mut self, hash: EnvelopeHash) -> bool {
        if self.seen.contains(&hash) {
            return false;
        }

        if self.seen.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }

        self.seen.insert(hash);
        self.order.push_back(hash);
        true
    }

    /// Returns `true` when `hash` is currently tracked.
    pub fn contains(&self, hash: &EnvelopeHash) -> bool {
        self.seen.contains(hash)
    }

    /// Number of tracked hashes.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Returns `true` when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
