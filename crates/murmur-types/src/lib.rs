//! Core shared types for the murmur gossip messaging node.
//!
//! This crate defines the identifiers, wire constants, error taxonomy
//! and configuration used across the workspace. No other crate should
//! define shared types — everything lives here.

pub mod config;
pub mod time;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Protocol constants
// ---------------------------------------------------------------------------

/// Sub-protocol name announced to the transport layer.
pub const PROTOCOL_NAME: &str = "shh";

/// Sub-protocol version. Peers with a different version are disconnected
/// during the handshake.
pub const PROTOCOL_VERSION: u32 = 2;

/// Number of packet codes the sub-protocol claims on the wire.
pub const CAPABILITY_LEN: u8 = 2;

/// Packet code for the handshake status packet.
pub const STATUS_CODE: u8 = 0x00;

/// Packet code for an envelope batch.
pub const MESSAGES_CODE: u8 = 0x01;

/// Bit 7 of the message flags byte: set when a signature follows.
pub const SIGNATURE_FLAG: u8 = 1 << 7;

/// Length in bytes of a recoverable signature (r ‖ s ‖ recovery id).
pub const SIGNATURE_LENGTH: usize = 65;

// ---------------------------------------------------------------------------
// EnvelopeHash
// ---------------------------------------------------------------------------

/// SHA3-256 digest of an envelope's wire serialization.
///
/// This is the identity of an envelope everywhere in the node: the pool
/// deduplicates on it and peers track which hashes the remote side has
/// already seen.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct EnvelopeHash([u8; 32]);

impl EnvelopeHash {
    /// The fixed byte length of an envelope hash.
    pub const LEN: usize = 32;

    /// Creates a new `EnvelopeHash` from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for EnvelopeHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for EnvelopeHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for EnvelopeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for EnvelopeHash {
    type Err = MurmurError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| MurmurError::EnvelopeError {
            reason: "invalid hex encoding for envelope hash".into(),
        })?;
        if bytes.len() != Self::LEN {
            return Err(MurmurError::EnvelopeError {
                reason: format!("expected 32 bytes for envelope hash, got {}", bytes.len()),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

// ---------------------------------------------------------------------------
// Topic
// ---------------------------------------------------------------------------

/// 4-byte topic tag attached to an envelope for probabilistic filtering.
///
/// A topic is the truncated SHA3-256 digest of an arbitrary byte string,
/// so two nodes agreeing on a channel name derive the same tag without
/// revealing the name on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Topic([u8; 4]);

impl Topic {
    /// The fixed byte length of a topic tag.
    pub const LEN: usize = 4;

    /// Creates a `Topic` from raw tag bytes.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Returns the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl From<[u8; 4]> for Topic {
    fn from(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Topic {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// ---------------------------------------------------------------------------
// PeerId
// ---------------------------------------------------------------------------

/// Node-local identifier for a connected peer.
///
/// Assigned sequentially when a link is attached. Purely local — it is
/// never transmitted and carries no identity meaning.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PeerId(u64);

impl PeerId {
    /// Creates a `PeerId` from a raw counter value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw counter value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// MurmurError
// ---------------------------------------------------------------------------

/// Error taxonomy for the murmur workspace.
#[derive(Debug, Error)]
pub enum MurmurError {
    /// An envelope failed validation (expired on arrival, zero TTL,
    /// inconsistent fields).
    #[error("envelope error: {reason}")]
    EnvelopeError {
        /// Human-readable description of the envelope problem.
        reason: String,
    },

    /// Sealing a message into an envelope failed (empty payload, zero TTL).
    #[error("seal error: {reason}")]
    SealError {
        /// Human-readable description of the sealing failure.
        reason: String,
    },

    /// A cryptographic operation failed (signing, recovery, encryption,
    /// decryption). Decryption failures against envelopes not addressed
    /// to us land here and are treated as "not for us" by callers.
    #[error("crypto error: {reason}")]
    CryptoError {
        /// Human-readable description of the cryptographic failure.
        reason: String,
    },

    /// The ephemeral public key embedded in an envelope is not a valid
    /// curve point. Distinct from `CryptoError` so the identity loop can
    /// short-circuit: no identity will ever decrypt this envelope.
    #[error("invalid ephemeral public key in envelope")]
    InvalidPublicKey,

    /// Wire-level decode failure (truncated record, bad length prefix).
    #[error("wire error: {reason}")]
    WireError {
        /// Human-readable description of the decode failure.
        reason: String,
    },

    /// Protocol violation by a peer (version mismatch, unknown packet
    /// code). Fatal for the peer link.
    #[error("protocol error: {reason}")]
    ProtocolError {
        /// Human-readable description of the violation.
        reason: String,
    },

    /// The underlying peer link failed (read/write error, closed).
    #[error("link error: {reason}")]
    LinkError {
        /// Human-readable description of the link failure.
        reason: String,
    },

    /// A configuration value is invalid.
    #[error("config error: {reason}")]
    ConfigError {
        /// Human-readable description of the configuration problem.
        reason: String,
    },

    /// The node is not in a state that allows the requested operation.
    #[error("node error: {reason}")]
    NodeError {
        /// Human-readable description of the lifecycle problem.
        reason: String,
    },
}

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, MurmurError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_hash_display_is_hex() {
        let hash = EnvelopeHash::new([0xAB; 32]);
        assert_eq!(hash.to_string(), "ab".repeat(32));
    }

    #[test]
    fn envelope_hash_from_str_roundtrip() {
        let hash = EnvelopeHash::new([0x42; 32]);
        let parsed: EnvelopeHash = hash.to_string().parse().unwrap();
        assert_eq!(parsed, hash);
    }

    #[test]
    fn envelope_hash_from_str_rejects_short_input() {
        let result = "abcd".parse::<EnvelopeHash>();
        assert!(result.is_err());
    }

    #[test]
    fn envelope_hash_from_str_rejects_non_hex() {
        let result = "zz".repeat(32).parse::<EnvelopeHash>();
        assert!(result.is_err());
    }

    #[test]
    fn topic_roundtrips_raw_bytes() {
        let topic = Topic::from_bytes([1, 2, 3, 4]);
        assert_eq!(topic.as_bytes(), &[1, 2, 3, 4]);
    }

    #[test]
    fn peer_id_display() {
        assert_eq!(PeerId::new(7).to_string(), "peer-7");
    }

    #[test]
    fn signature_flag_is_bit_seven() {
        assert_eq!(SIGNATURE_FLAG, 0x80);
        assert_eq!(SIGNATURE_FLAG & 0x7F, 0);
    }

    #[test]
    fn invalid_public_key_is_matchable() {
        let err = MurmurError::InvalidPublicKey;
        assert!(matches!(err, MurmurError::InvalidPublicKey));
    }
}
