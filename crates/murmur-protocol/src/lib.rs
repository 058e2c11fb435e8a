//! Envelope protocol for the murmur gossip network.
//!
//! Defines the wire-level [`Envelope`](envelope::Envelope), the decrypted
//! [`Message`](message::Message) form, proof-of-work sealing, topic
//! derivation and matching, and the filter registry that routes decoded
//! messages to subscribers.
//!
//! # Modules
//!
//! - [`envelope`] — wire codec, hashing, sealing, opening
//! - [`message`] — plaintext form, signing, sender recovery
//! - [`pow`] — leading-zero-bits proof-of-work scoring
//! - [`topic`] — topic derivation and the alternative-set matcher
//! - [`filter`] — installed subscriptions and notification dispatch

pub mod envelope;
pub mod filter;
pub mod message;
pub mod pow;
pub mod topic;
