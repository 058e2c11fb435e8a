//! Cryptographic primitives for the murmur node.
//!
//! Everything identity-related runs on secp256k1: one keypair both
//! decrypts envelopes addressed to it and produces recoverable
//! signatures, so a recipient can learn the sender's public key from
//! the signature alone.
//!
//! # Modules
//!
//! - [`keys`] — `KeyPair` / `PublicKey`, recoverable ECDSA sign + recover
//! - [`ecies`] — ephemeral-ECDH recipient encryption (HKDF-SHA256 +
//!   XChaCha20-Poly1305)
//! - [`hash`] — SHA3-256 digests

pub mod ecies;
pub mod hash;
pub mod keys;
