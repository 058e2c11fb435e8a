//! The murmur node runtime.
//!
//! [`Murmur`](node::Murmur) owns the envelope pool, the identity and
//! filter registries, the peer registry and the expiration engine, and
//! exposes the whisper-style surface: generate identities, install
//! filters, seal-and-post envelopes, attach peer links.
//!
//! # Modules
//!
//! - [`pool`] — deduplicated, expiry-indexed envelope pool
//! - [`node`] — node lifecycle and public API

pub mod node;
pub mod pool;
