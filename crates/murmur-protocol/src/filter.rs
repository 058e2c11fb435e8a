//! Installed subscriptions and notification dispatch.
//!
//! A [`Filter`] combines an optional recipient identity, an optional
//! expected signer, a topic matcher and a callback. The
//! [`FilterRegistry`] holds installed filters behind an interior lock;
//! callbacks are cloned out and invoked *after* the lock is released so
//! a slow subscriber can never stall installation or other
//! notifications.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use murmur_crypto::keys::PublicKey;
use murmur_types::Topic;

use crate::message::Message;
use crate::topic::TopicMatcher;

/// Callback invoked with each matching decoded message.
pub type FilterCallback = Arc<dyn Fn(&Message) + Send + Sync>;

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// An installed subscription.
#[derive(Clone)]
pub struct Filter {
    /// Recipient identity to match; `None` matches any.
    pub to: Option<PublicKey>,
    /// Expected signer to match; `None` matches any.
    pub from: Option<PublicKey>,
    /// Topic conditions; an empty matcher matches any envelope.
    pub topics: TopicMatcher,
    /// Invoked with the decoded message on match.
    pub callback: FilterCallback,
}

impl Filter {
    /// Returns `true` when this filter accepts `key`.
    ///
    /// `to` and `from` each match when unset or equal; every topic row
    /// must find one of its alternatives among the key's topics.
    pub fn accepts(&self, key: &FilterKey) -> bool {
        key_field_matches(&self.to, &key.to)
            && key_field_matches(&self.from, &key.from)
            && self.topics.matches(&key.topics)
    }
}

/// An unset constraint matches anything; a set constraint requires the
/// incoming side to be present and equal.
fn key_field_matches(constraint: &Option<PublicKey>, incoming: &Option<PublicKey>) -> bool {
    match (constraint, incoming) {
        (None, _) => true,
        (Some(want), Some(have)) => want == have,
        (Some(_), None) => false,
    }
}

// ---------------------------------------------------------------------------
// FilterKey
// ---------------------------------------------------------------------------

/// Match key built from a successfully opened envelope: the identity
/// that decrypted it, the recovered signer (if any), and the envelope's
/// topics.
#[derive(Clone, Debug)]
pub struct FilterKey {
    /// Identity whose key decrypted the envelope.
    pub to: Option<PublicKey>,
    /// Signer recovered from the message signature.
    pub from: Option<PublicKey>,
    /// Topics carried by the envelope.
    pub topics: Vec<Topic>,
}

impl FilterKey {
    /// Builds the match key for an opened message and its envelope
    /// topics.
    pub fn for_message(message: &Message, topics: &[Topic]) -> Self {
        Self {
            to: message.to,
            from: message.recover(),
            topics: topics.to_vec(),
        }
    }
}

// ---------------------------------------------------------------------------
// FilterRegistry
// ---------------------------------------------------------------------------

/// Thread-safe registry of installed filters.
#[derive(Default)]
pub struct FilterRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: usize,
    filters: HashMap<usize, Filter>,
}

impl FilterRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the registry lock, recovering from poisoning.
    ///
    /// Callbacks never run under the lock, so the inner map can't be
    /// left mid-mutation by a panicking subscriber.
    fn locked(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("filter registry lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Installs a filter, returning its id.
    pub fn install(&self, filter: Filter) -> usize {
        let mut inner = self.locked();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.filters.insert(id, filter);
        id
    }

    /// Removes a filter by id. Returns `false` for unknown ids.
    pub fn uninstall(&self, id: usize) -> bool {
        self.locked().filters.remove(&id).is_some()
    }

    /// Returns the installed filter with the given id, if any.
    pub fn get(&self, id: usize) -> Option<Filter> {
        self.locked().filters.get(&id).cloned()
    }

    /// Number of installed filters.
    pub fn len(&self) -> usize {
        self.locked().filters.len()
    }

    /// Returns `true` when no filters are installed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes every filter accepting `key` with `message`.
    ///
    /// Matching callbacks are collected under the lock and invoked after
    /// it is released. Notification order across filters is unspecified.
    pub fn notify(&self, key: &FilterKey, message: &Message) {
        let callbacks: Vec<FilterCallback> = self
            .locked()
            .filters
            .values()
            .filter(|f| f.accepts(key))
            .map(|f| Arc::clone(&f.callback))
            .collect();

        for callback in callbacks {
            callback(message);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
