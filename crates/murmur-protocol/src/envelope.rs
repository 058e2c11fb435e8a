//! The wire-level envelope: codec, hashing, sealing and opening.
//!
//! An envelope is the unit flooded between peers. Its identity is the
//! SHA3-256 digest of its wire serialization, so equal envelopes
//! collapse to one pool entry no matter how many peers deliver them.
//!
//! # Wire layout
//!
//! ```text
//! expiry       u32 BE   absolute UNIX seconds
//! ttl          u32 BE   requested lifetime in seconds
//! topic_count  u16 BE
//! topics       topic_count × 4 bytes
//! data_len     u32 BE
//! data         data_len bytes (ciphertext or cleartext plaintext)
//! nonce        u64 BE   proof-of-work nonce
//! ```
//!
//! The proof-of-work preimage is the serialization up to and excluding
//! the nonce (the "header") followed by the 8 nonce bytes — which is
//! exactly the full serialization, so the envelope hash doubles as the
//! work digest.

use std::time::{Duration, Instant};

use murmur_crypto::ecies;
use murmur_crypto::hash::sha3_256;
use murmur_crypto::keys::{KeyPair, PublicKey};
use murmur_types::time::unix_now;
use murmur_types::{EnvelopeHash, MurmurError, Result, Topic};

use crate::message::Message;
use crate::pow;

/// Nonce attempts between deadline checks during sealing.
const POW_BATCH: u64 = 512;

// ---------------------------------------------------------------------------
// SealOptions
// ---------------------------------------------------------------------------

/// Options controlling how a message is sealed into an envelope.
pub struct SealOptions<'a> {
    /// Sender identity; when present the payload is signed and the
    /// recipient can recover this identity's public key.
    pub from: Option<&'a KeyPair>,
    /// Recipient public key; when present the plaintext is encrypted so
    /// only the holder of the matching private key can open it.
    pub to: Option<&'a PublicKey>,
    /// Envelope lifetime in seconds. Zero is a seal error.
    pub ttl: u32,
    /// Topic tags to attach.
    pub topics: Vec<Topic>,
    /// Wall-clock budget for the proof-of-work nonce search.
    pub pow_budget: Duration,
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Wire-level envelope. Immutable once sealed; compared by hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Absolute UNIX second after which the envelope is stale.
    pub expiry: u32,
    /// Originally requested lifetime in seconds.
    pub ttl: u32,
    /// Ordered topic tags (zero or more).
    pub topics: Vec<Topic>,
    /// Opaque payload blob: ECIES ciphertext or raw plaintext.
    pub data: Vec<u8>,
    /// Proof-of-work nonce.
    pub nonce: u64,
}

impl Envelope {
    /// Seals `message` into an envelope.
    ///
    /// Signs when `options.from` is present, encrypts when `options.to`
    /// is present, then runs the proof-of-work search for
    /// `options.pow_budget`.
    ///
    /// # Errors
    ///
    /// `SealError` for an empty payload or a zero TTL. The proof-of-work
    /// search itself never fails — an exhausted budget adopts the best
    /// nonce seen.
    pub fn seal(mut message: Message, options: SealOptions<'_>) -> Result<Self> {
        if message.payload.is_empty() {
            return Err(MurmurError::SealError {
                reason: "refusing to seal an empty payload".into(),
            });
        }
        if options.ttl == 0 {
            return Err(MurmurError::SealError {
                reason: "refusing to seal with a zero TTL".into(),
            });
        }

        if let Some(identity) = options.from {
            message.sign(identity)?;
        }

        let plaintext = message.plaintext();
        let data = match options.to {
            Some(recipient) => ecies::encrypt(recipient, &plaintext)?,
            None => plaintext,
        };

        let mut envelope = Self {
            expiry: unix_now().saturating_add(options.ttl),
            ttl: options.ttl,
            topics: options.topics,
            data,
            nonce: 0,
        };
        envelope.run_pow(options.pow_budget);

        tracing::trace!(
            hash = %envelope.hash(),
            work = envelope.work(),
            ttl = envelope.ttl,
            "sealed envelope"
        );
        Ok(envelope)
    }

    /// Searches for the nonce with the best work score within `budget`.
    ///
    /// At least one batch of nonces is always tried, so a zero budget
    /// still yields a valid (if weak) nonce.
    fn run_pow(&mut self, budget: Duration) {
        let header = self.header_bytes();
        let deadline = Instant::now() + budget;

        let mut best_score = 0;
        let mut best_nonce = 0;
        let mut nonce = 0u64;

        loop {
            for _ in 0..POW_BATCH {
                let candidate = pow::score(&header, nonce);
                if candidate > best_score {
                    best_score = candidate;
                    best_nonce = nonce;
                }
                nonce = nonce.wrapping_add(1);
            }
            if Instant::now() >= deadline {
                break;
            }
        }

        self.nonce = best_nonce;
    }

    /// Opens the envelope, reversing [`Envelope::seal`].
    ///
    /// With `key = None` the payload is treated as cleartext plaintext.
    /// Otherwise the payload is ECIES-decrypted with `key`;
    /// [`MurmurError::InvalidPublicKey`] propagates distinctly so
    /// callers can stop trying further identities.
    ///
    /// The message's `sent` field is reconstructed as `expiry - ttl`.
    pub fn open(&self, key: Option<&KeyPair>) -> Result<Message> {
        let plaintext = match key {
            Some(identity) => ecies::decrypt(identity, &self.data)?,
            None => self.data.clone(),
        };
        Message::from_plaintext(&plaintext, self.expiry.saturating_sub(self.ttl))
    }

    /// The envelope's identity: SHA3-256 of its wire serialization.
    pub fn hash(&self) -> EnvelopeHash {
        EnvelopeHash::new(sha3_256(&self.encode()))
    }

    /// Current proof-of-work score (leading zero bits of the hash
    /// preimage with the sealed nonce).
    pub fn work(&self) -> u32 {
        pow::score(&self.header_bytes(), self.nonce)
    }

    /// Returns `true` once the envelope's expiry has passed.
    pub fn is_expired(&self, now: u32) -> bool {
        self.expiry <= now
    }

    // -----------------------------------------------------------------------
    // Wire codec
    // -----------------------------------------------------------------------

    /// Serializes the envelope into its wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.header_bytes();
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out
    }

    /// Serialization without the trailing nonce — the proof-of-work
    /// header.
    fn header_bytes(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(4 + 4 + 2 + self.topics.len() * Topic::LEN + 4 + self.data.len());
        out.extend_from_slice(&self.expiry.to_be_bytes());
        out.extend_from_slice(&self.ttl.to_be_bytes());
        out.extend_from_slice(&(self.topics.len() as u16).to_be_bytes());
        for topic in &self.topics {
            out.extend_from_slice(topic.as_bytes());
        }
        out.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    /// Parses an envelope from its wire form.
    ///
    /// The entire input must be consumed; trailing bytes are an error.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);

        let expiry = cursor.read_u32("expiry")?;
        let ttl = cursor.read_u32("ttl")?;

        let topic_count = cursor.read_u16("topic count")? as usize;
        let mut topics = Vec::with_capacity(topic_count);
        for _ in 0..topic_count {
            let raw = cursor.read_bytes(Topic::LEN, "topic tag")?;
            topics.push(Topic::from_bytes([raw[0], raw[1], raw[2], raw[3]]));
        }

        let data_len = cursor.read_u32("data length")? as usize;
        let data = cursor.read_bytes(data_len, "data")?.to_vec();

        let nonce = cursor.read_u64("nonce")?;

        if !cursor.is_exhausted() {
            return Err(MurmurError::WireError {
                reason: format!("{} trailing bytes after envelope", cursor.remaining()),
            });
        }

        Ok(Self {
            expiry,
            ttl,
            topics,
            data,
            nonce,
        })
    }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Bounds-checked reader over a byte slice.
struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn read_bytes(&mut self, len: usize, field: &str) -> Result<&'a [u8]> {
        let end = self.offset.checked_add(len).filter(|&e| e <= self.bytes.len());
        match end {
            Some(end) => {
                let slice = &self.bytes[self.offset..end];
                self.offset = end;
                Ok(slice)
            }
            None => Err(MurmurError::WireError {
                reason: format!(
                    "truncated envelope: {field} needs {len} bytes at offset {}, {} available",
                    self.offset,
                    self.bytes.len() - self.offset
                ),
            }),
        }
    }

    fn read_u16(&mut self, field: &str) -> Result<u16> {
        let raw = self.read_bytes(2, field)?;
        Ok(u16::from_be_bytes([raw[0], raw[1]]))
    }

    fn read_u32(&mut self, field: &str) -> Result<u32> {
        let raw = self.read_bytes(4, field)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn read_u64(&mut self, field: &str) -> Result<u64> {
        let raw = self.read_bytes(8, field)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(u64::from_be_bytes(buf))
    }

    fn is_exhausted(&self) -> bool {
        self.offset == self.bytes.len()
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
