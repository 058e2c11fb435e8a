//! End-to-end delivery scenarios on a single node.
//!
//! Exercises the public surface the way an embedding application uses
//! it: generate an identity, install a filter, seal-and-post, observe
//! the callback.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use murmur_crypto::keys::{KeyPair, PublicKey};
use murmur_node::node::Murmur;
use murmur_protocol::envelope::{Envelope, SealOptions};
use murmur_protocol::filter::Filter;
use murmur_protocol::message::Message;
use murmur_protocol::topic::{topic, TopicMatcher};
use murmur_types::config::NodeConfig;
use murmur_types::time::unix_now;
use murmur_types::Topic;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// What a filter callback observed about one delivery.
#[derive(Clone, Debug)]
struct Delivered {
    payload: Vec<u8>,
    to: Option<PublicKey>,
    recovered: Option<PublicKey>,
}

type DeliveryLog = Arc<Mutex<Vec<Delivered>>>;

fn recording_filter(to: Option<PublicKey>, topics: TopicMatcher) -> (Filter, DeliveryLog) {
    let log: DeliveryLog = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let filter = Filter {
        to,
        from: None,
        topics,
        callback: Arc::new(move |message: &Message| {
            sink.lock().unwrap().push(Delivered {
                payload: message.payload.clone(),
                to: message.to,
                recovered: message.recover(),
            });
        }),
    };
    (filter, log)
}

fn seal(
    payload: &[u8],
    from: Option<&KeyPair>,
    to: Option<&PublicKey>,
    topics: Vec<Topic>,
) -> Envelope {
    Envelope::seal(
        Message::new(payload.to_vec()),
        SealOptions {
            from,
            to,
            ttl: 50,
            topics,
            pow_budget: Duration::from_millis(50),
        },
    )
    .expect("sealing must succeed")
}

async fn wait_for<F: Fn() -> bool>(what: &str, predicate: F) {
    for _ in 0..150 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// Seal to our own identity, post, and expect the filter to deliver the
/// payload with the sender recoverable from the signature.
#[tokio::test]
async fn self_encrypted_round_trip() {
    let node = Murmur::with_defaults();
    let engine = node.start().unwrap();

    let identity = node.new_identity();
    let public = identity.public_key();

    let (filter, log) = recording_filter(Some(public), TopicMatcher::default());
    node.watch(filter);

    let envelope = seal(b"hello", Some(&identity), Some(&public), vec![topic(b"self")]);
    node.post(&envelope).unwrap();

    wait_for("self-addressed delivery", || !log.lock().unwrap().is_empty()).await;

    let deliveries = log.lock().unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].payload, b"hello");
    assert_eq!(deliveries[0].to, Some(public));
    assert_eq!(deliveries[0].recovered, Some(public));
    drop(deliveries);

    node.stop();
    engine.await.unwrap();
}

/// Posting the same envelope twice pools it once and notifies once.
#[tokio::test]
async fn duplicate_post_is_a_noop() {
    let node = Murmur::with_defaults();
    let identity = node.new_identity();
    let public = identity.public_key();

    let (filter, log) = recording_filter(Some(public), TopicMatcher::default());
    node.watch(filter);

    let envelope = seal(b"just once", Some(&identity), Some(&public), vec![]);
    node.post(&envelope).unwrap();
    node.post(&envelope).unwrap();

    wait_for("single delivery", || !log.lock().unwrap().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(node.envelopes().len(), 1);
    assert_eq!(log.lock().unwrap().len(), 1);
}

/// A stale envelope is accepted and then swept by the expiration
/// engine; the pool snapshot ends up empty.
#[tokio::test]
async fn stale_envelope_is_swept() {
    let config = NodeConfig {
        expiration_cycle_ms: 50,
        ..NodeConfig::default()
    };
    let node = Murmur::new(config).unwrap();
    let engine = node.start().unwrap();

    let envelope = Envelope {
        expiry: unix_now() - 1,
        ttl: 1,
        topics: vec![],
        data: vec![0xAB, 0xCD],
        nonce: 7,
    };
    node.post(&envelope).unwrap();

    wait_for("expiration sweep", || node.envelopes().is_empty()).await;

    node.stop();
    engine.await.unwrap();
}

/// An envelope sealed to a different identity opens to nothing here:
/// no filter keyed on our identity fires.
#[tokio::test]
async fn wrong_recipient_is_silent() {
    let node = Murmur::with_defaults();
    let ours = node.new_identity();
    let elsewhere = KeyPair::generate();

    let (filter, log) = recording_filter(Some(ours.public_key()), TopicMatcher::default());
    node.watch(filter);

    let envelope = seal(b"ciphertext for J", None, Some(&elsewhere.public_key()), vec![]);
    node.post(&envelope).unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(log.lock().unwrap().is_empty());
}

/// Topic conditions gate delivery: only envelopes carrying the watched
/// topic reach the callback.
#[tokio::test]
async fn topic_filter_gates_delivery() {
    let node = Murmur::with_defaults();
    let identity = node.new_identity();
    let public = identity.public_key();

    let (filter, log) = recording_filter(
        Some(public),
        TopicMatcher::from_topics(&[topic(b"alerts")]),
    );
    node.watch(filter);

    let off_topic = seal(b"chatter", None, Some(&public), vec![topic(b"noise")]);
    let on_topic = seal(b"alert!", None, Some(&public), vec![topic(b"alerts")]);
    node.post(&off_topic).unwrap();
    node.post(&on_topic).unwrap();

    wait_for("on-topic delivery", || !log.lock().unwrap().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let deliveries = log.lock().unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].payload, b"alert!");
}

/// A `from` constraint only passes messages whose recovered signer
/// matches.
#[tokio::test]
async fn sender_filter_requires_matching_signature() {
    let node = Murmur::with_defaults();
    let identity = node.new_identity();
    let public = identity.public_key();

    let friend = KeyPair::from_bytes(&[0x77; 32]).unwrap();
    let stranger = KeyPair::from_bytes(&[0x88; 32]).unwrap();

    let log: DeliveryLog = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    node.watch(Filter {
        to: Some(public),
        from: Some(friend.public_key()),
        topics: TopicMatcher::default(),
        callback: Arc::new(move |message: &Message| {
            sink.lock().unwrap().push(Delivered {
                payload: message.payload.clone(),
                to: message.to,
                recovered: message.recover(),
            });
        }),
    });

    node.post(&seal(b"from stranger", Some(&stranger), Some(&public), vec![]))
        .unwrap();
    node.post(&seal(b"from friend", Some(&friend), Some(&public), vec![]))
        .unwrap();

    wait_for("friend's message", || !log.lock().unwrap().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let deliveries = log.lock().unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].payload, b"from friend");
    assert_eq!(deliveries[0].recovered, Some(friend.public_key()));
}
