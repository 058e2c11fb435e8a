//! Topic derivation and matching.
//!
//! A [`Topic`] is a 4-byte tag derived from an arbitrary byte string;
//! envelopes carry zero or more of them. The [`TopicMatcher`] expresses
//! a conjunction of alternatives: one row per required condition, where
//! a row is satisfied if any of its topics appears among the envelope's
//! topics.

use murmur_crypto::hash::sha3_256;
use murmur_types::Topic;

/// Derives the topic tag for a byte string: the first four bytes of its
/// SHA3-256 digest.
pub fn topic(data: &[u8]) -> Topic {
    let digest = sha3_256(data);
    Topic::from_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Derives topic tags for a list of byte strings.
pub fn topics<T: AsRef<[u8]>>(items: &[T]) -> Vec<Topic> {
    items.iter().map(|item| topic(item.as_ref())).collect()
}

// ---------------------------------------------------------------------------
// TopicMatcher
// ---------------------------------------------------------------------------

/// Matrix of alternative topics.
///
/// Matches a set of envelope topics iff every row contains at least one
/// topic present in the envelope. An empty matcher matches everything.
#[derive(Clone, Debug, Default)]
pub struct TopicMatcher {
    conditions: Vec<Vec<Topic>>,
}

impl TopicMatcher {
    /// Creates a matcher from explicit rows of alternatives.
    pub fn new(conditions: Vec<Vec<Topic>>) -> Self {
        Self { conditions }
    }

    /// Creates a matcher requiring every one of `topics`: each topic
    /// becomes its own single-element row.
    pub fn from_topics(topics: &[Topic]) -> Self {
        Self {
            conditions: topics.iter().map(|t| vec![*t]).collect(),
        }
    }

    /// Returns `true` when every row finds at least one of its topics
    /// among `envelope_topics`.
    pub fn matches(&self, envelope_topics: &[Topic]) -> bool {
        self.conditions
            .iter()
            .all(|row| row.iter().any(|t| envelope_topics.contains(t)))
    }

    /// Returns `true` when the matcher has no conditions.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_is_digest_prefix() {
        let tag = topic(b"announcements");
        let digest = sha3_256(b"announcements");
        assert_eq!(tag.as_bytes(), &digest[..4]);
    }

    #[test]
    fn topic_is_deterministic() {
        assert_eq!(topic(b"channel"), topic(b"channel"));
        assert_ne!(topic(b"channel-a"), topic(b"channel-b"));
    }

    #[test]
    fn empty_matcher_matches_anything() {
        let matcher = TopicMatcher::default();
        assert!(matcher.matches(&[]));
        assert!(matcher.matches(&[topic(b"x")]));
    }

    #[test]
    fn single_row_alternative_match() {
        let matcher = TopicMatcher::new(vec![vec![topic(b"a"), topic(b"b")]]);
        assert!(matcher.matches(&[topic(b"b")]));
        assert!(matcher.matches(&[topic(b"a"), topic(b"c")]));
        assert!(!matcher.matches(&[topic(b"c")]));
    }

    #[test]
    fn all_rows_must_be_satisfied() {
        let matcher = TopicMatcher::new(vec![vec![topic(b"a")], vec![topic(b"b")]]);
        assert!(matcher.matches(&[topic(b"a"), topic(b"b")]));
        assert!(!matcher.matches(&[topic(b"a")]));
        assert!(!matcher.matches(&[topic(b"b")]));
    }

    #[test]
    fn from_topics_requires_each() {
        let required = [topic(b"a"), topic(b"b")];
        let matcher = TopicMatcher::from_topics(&required);
        assert!(matcher.matches(&[topic(b"b"), topic(b"a"), topic(b"extra")]));
        assert!(!matcher.matches(&[topic(b"a"), topic(b"extra")]));
    }

    #[test]
    fn row_order_does_not_matter() {
        let matcher = TopicMatcher::new(vec![vec![topic(b"b")], vec![topic(b"a")]]);
        assert!(matcher.matches(&[topic(b"a"), topic(b"b")]));
    }

    #[test]
    fn matcher_against_empty_envelope_topics() {
        let matcher = TopicMatcher::from_topics(&[topic(b"a")]);
        assert!(!matcher.matches(&[]));
    }
}
