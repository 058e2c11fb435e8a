//! Node configuration with sensible defaults.
//!
//! All operational parameters are centralized here. Every value has a
//! documented default matching the wire protocol's reference timings.

use serde::{Deserialize, Serialize};

use crate::{MurmurError, Result};

/// Node configuration.
///
/// Defaults reproduce the reference protocol timings. Cycle values are
/// knobs, not protocol constants: two peers with different cycles still
/// interoperate, they just gossip at different rates.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Interval between expiration sweeps of the envelope pool, in
    /// milliseconds.
    pub expiration_cycle_ms: u64,

    /// Interval between outbound envelope batches per peer, in
    /// milliseconds.
    pub transmission_cycle_ms: u64,

    /// Default envelope lifetime in seconds, used when the sealer does
    /// not specify one.
    pub default_ttl_secs: u32,

    /// Default proof-of-work budget in milliseconds, used when the
    /// sealer does not specify one.
    pub default_pow_ms: u64,

    /// Capacity of the per-peer known-envelope cache. When full, the
    /// oldest hash is evicted, which may cause a redundant re-send but
    /// never incorrect behavior.
    pub known_cache_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            expiration_cycle_ms: 800,
            transmission_cycle_ms: 300,
            default_ttl_secs: 50,
            default_pow_ms: 50,
            known_cache_capacity: 4096,
        }
    }
}

impl NodeConfig {
    /// Validates all configuration values.
    ///
    /// Returns an error if any value is outside its acceptable range.
    pub fn validate(&self) -> Result<()> {
        if self.expiration_cycle_ms == 0 {
            return Err(MurmurError::ConfigError {
                reason: "expiration_cycle_ms must be greater than 0".into(),
            });
        }

        if self.transmission_cycle_ms == 0 {
            return Err(MurmurError::ConfigError {
                reason: "transmission_cycle_ms must be greater than 0".into(),
            });
        }

        if self.default_ttl_secs == 0 {
            return Err(MurmurError::ConfigError {
                reason: "default_ttl_secs must be greater than 0".into(),
            });
        }

        if self.known_cache_capacity == 0 {
            return Err(MurmurError::ConfigError {
                reason: "known_cache_capacity must be greater than 0".into(),
            });
        }

        Ok(())
    }
}
