//! The deduplicated envelope pool with its expiration index.
//!
//! Two tables live under one reader/writer lock:
//!
//! - `messages` — envelope hash → envelope, the authoritative set of
//!   live envelopes;
//! - `expirations` — expiry second → set of hashes, consumed by the
//!   periodic sweep.
//!
//! Invariants: every hash in any expiry bucket appears in `messages`,
//! and every `messages` entry appears in exactly one bucket. The
//! bucket map is keyed by integer second rather than ordered, because
//! expirations are coarse-grained and many envelopes share timestamps.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use murmur_protocol::envelope::Envelope;
use murmur_types::{EnvelopeHash, MurmurError, Result};

/// Deduplicated set of live envelopes, indexed by expiry second.
#[derive(Default)]
pub struct Pool {
    inner: RwLock<PoolInner>,
}

#[derive(Default)]
struct PoolInner {
    messages: HashMap<EnvelopeHash, Envelope>,
    expirations: HashMap<u32, HashSet<EnvelopeHash>>,
}

impl Pool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an envelope, deduplicating by hash.
    ///
    /// Returns `Ok(true)` for a fresh envelope and `Ok(false)` for a
    /// duplicate. An already-expired envelope is accepted — the next
    /// sweep removes it — but a zero-TTL envelope is rejected outright.
    pub fn add(&self, envelope: &Envelope) -> Result<bool> {
        if envelope.ttl == 0 {
            return Err(MurmurError::EnvelopeError {
                reason: "envelope has a zero TTL".into(),
            });
        }

        let hash = envelope.hash();
        let mut inner = self.write_locked();

        if inner.messages.contains_key(&hash) {
            tracing::trace!(%hash, "envelope already pooled");
            return Ok(false);
        }

        inner.messages.insert(hash, envelope.clone());
        inner
            .expirations
            .entry(envelope.expiry)
            .or_default()
            .insert(hash);

        tracing::trace!(%hash, expiry = envelope.expiry, "pooled envelope");
        Ok(true)
    }

    /// Consistent snapshot of the current pool contents.
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.read_locked().messages.values().cloned().collect()
    }

    /// Returns `true` when `hash` is currently pooled.
    pub fn contains(&self, hash: &EnvelopeHash) -> bool {
        self.read_locked().messages.contains_key(hash)
    }

    /// Number of pooled envelopes.
    pub fn len(&self) -> usize {
        self.read_locked().messages.len()
    }

    /// Returns `true` when the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.read_locked().messages.is_empty()
    }

    /// Removes every envelope whose expiry bucket is at or before `now`.
    pub fn expire(&self, now: u32) {
        let mut inner = self.write_locked();

        let due: Vec<u32> = inner
            .expirations
            .keys()
            .copied()
            .filter(|&then| then <= now)
            .collect();

        let mut removed = 0;
        for then in due {
            if let Some(bucket) = inner.expirations.remove(&then) {
                for hash in bucket {
                    inner.messages.remove(&hash);
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            tracing::debug!(removed, now, "expired envelopes");
        }
    }

    fn read_locked(&self) -> std::sync::RwLockReadGuard<'_, PoolInner> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("envelope pool lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_locked(&self) -> std::sync::RwLockWriteGuard<'_, PoolInner> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("envelope pool lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_types::Topic;

    fn envelope(expiry: u32, seed: u8) -> Envelope {
        Envelope {
            expiry,
            ttl: 50,
            topics: vec![Topic::from_bytes([seed; 4])],
            data: vec![seed],
            nonce: seed as u64,
        }
    }

    #[test]
    fn add_reports_freshness() {
        let pool = Pool::new();
        let env = envelope(1000, 1);

        assert!(pool.add(&env).unwrap());
        assert!(!pool.add(&env).unwrap());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn semantically_equal_envelopes_collapse() {
        let pool = Pool::new();
        let a = envelope(1000, 1);
        let b = envelope(1000, 1);

        pool.add(&a).unwrap();
        assert!(!pool.add(&b).unwrap());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn zero_ttl_rejected() {
        let pool = Pool::new();
        let mut env = envelope(1000, 1);
        env.ttl = 0;

        assert!(matches!(
            pool.add(&env),
            Err(MurmurError::EnvelopeError { .. })
        ));
        assert!(pool.is_empty());
    }

    #[test]
    fn already_expired_envelope_accepted_until_sweep() {
        let pool = Pool::new();
        let env = envelope(99, 1);

        assert!(pool.add(&env).unwrap());
        assert_eq!(pool.len(), 1);

        pool.expire(100);
        assert!(pool.is_empty());
        assert!(pool.envelopes().is_empty());
    }

    #[test]
    fn expire_removes_only_due_buckets() {
        let pool = Pool::new();
        let stale = envelope(100, 1);
        let live = envelope(200, 2);
        pool.add(&stale).unwrap();
        pool.add(&live).unwrap();

        pool.expire(150);

        assert!(!pool.contains(&stale.hash()));
        assert!(pool.contains(&live.hash()));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn expire_at_exact_boundary() {
        let pool = Pool::new();
        let env = envelope(100, 1);
        pool.add(&env).unwrap();

        pool.expire(99);
        assert_eq!(pool.len(), 1);

        pool.expire(100);
        assert!(pool.is_empty());
    }

    #[test]
    fn expired_hash_absent_from_every_bucket() {
        let pool = Pool::new();
        let env = envelope(100, 1);
        let hash = env.hash();
        pool.add(&env).unwrap();
        pool.expire(100);

        let inner = pool.inner.read().unwrap();
        assert!(!inner.messages.contains_key(&hash));
        assert!(inner
            .expirations
            .values()
            .all(|bucket| !bucket.contains(&hash)));
    }

    #[test]
    fn bucket_invariants_hold_after_mixed_traffic() {
        let pool = Pool::new();
        for seed in 0..20u8 {
            pool.add(&envelope(100 + (seed as u32 % 3), seed)).unwrap();
        }
        pool.expire(101);

        let inner = pool.inner.read().unwrap();
        // Every bucket hash is in messages.
        for bucket in inner.expirations.values() {
            for hash in bucket {
                assert!(inner.messages.contains_key(hash));
            }
        }
        // Every message is in exactly one bucket.
        for (hash, env) in &inner.messages {
            let holding: usize = inner
                .expirations
                .values()
                .filter(|bucket| bucket.contains(hash))
                .count();
            assert_eq!(holding, 1, "envelope {} expiry {}", hash, env.expiry);
        }
    }

    #[test]
    fn snapshot_is_detached_from_pool() {
        let pool = Pool::new();
        pool.add(&envelope(1000, 1)).unwrap();

        let snapshot = pool.envelopes();
        pool.expire(2000);

        assert_eq!(snapshot.len(), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn envelopes_sharing_an_expiry_second_share_a_bucket() {
        let pool = Pool::new();
        pool.add(&envelope(500, 1)).unwrap();
        pool.add(&envelope(500, 2)).unwrap();

        {
            let inner = pool.inner.read().unwrap();
            assert_eq!(inner.expirations.len(), 1);
            assert_eq!(inner.expirations[&500].len(), 2);
        }

        pool.expire(500);
        assert!(pool.is_empty());
    }
}
