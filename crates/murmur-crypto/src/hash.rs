//! SHA3-256 hashing.
//!
//! All digests in murmur use SHA3-256: envelope identities, proof-of-work
//! scoring, signature pre-hashes, and topic tag derivation.

use sha3::{Digest, Sha3_256};

/// Computes the SHA3-256 hash of arbitrary data.
///
/// Deterministic: identical inputs always produce identical outputs.
pub fn sha3_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

/// Computes SHA3-256 over a list of segments without concatenating them.
///
/// Equivalent to hashing the concatenation of all segments in order.
pub fn sha3_256_concat(segments: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    for segment in segments {
        hasher.update(segment);
    }
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// NIST SHA3-256 test vector: empty input.
    #[test]
    fn sha3_256_empty_input() {
        let hash = sha3_256(b"");
        let expected =
            hex::decode("a7ffc6f8bf1ed76651c14756a061d662f580ff4de43b49fa82d80a4b80f8434a")
                .unwrap();
        assert_eq!(hash.as_slice(), expected.as_slice());
    }

    /// NIST SHA3-256 test vector: "abc".
    #[test]
    fn sha3_256_abc() {
        let hash = sha3_256(b"abc");
        let expected =
            hex::decode("3a985da74fe225b2045c172d6bd390bd855f086e3e9d525b46bfe24511431532")
                .unwrap();
        assert_eq!(hash.as_slice(), expected.as_slice());
    }

    #[test]
    fn concat_matches_single_shot() {
        let joined = sha3_256(b"hello world");
        let segmented = sha3_256_concat(&[b"hello", b" ", b"world"]);
        assert_eq!(joined, segmented);
    }

    #[test]
    fn different_inputs_differ() {
        assert_ne!(sha3_256(b"a"), sha3_256(b"b"));
    }
}
