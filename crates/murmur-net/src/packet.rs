//! Packet codes and payload codecs for the "shh" sub-protocol.
//!
//! Two packet codes exist:
//!
//! - `0x00` **status** — handshake packet; payload is the protocol
//!   version as `u32 BE`.
//! - `0x01` **messages** — an envelope batch; payload is a `u16 BE`
//!   count followed by `u32 BE`-length-prefixed envelope records.
//!
//! Framing below the packet level (how a `(code, payload)` pair crosses
//! a socket) belongs to the transport collaborator.

use murmur_protocol::envelope::Envelope;
use murmur_types::{MurmurError, Result, MESSAGES_CODE, PROTOCOL_VERSION, STATUS_CODE};

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// A typed unit handed to or received from a peer link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    /// Packet code (`0x00` status, `0x01` messages).
    pub code: u8,
    /// Code-specific payload bytes.
    pub payload: Vec<u8>,
}

impl Packet {
    /// Builds the handshake status packet announcing our version.
    pub fn status() -> Self {
        Self {
            code: STATUS_CODE,
            payload: PROTOCOL_VERSION.to_be_bytes().to_vec(),
        }
    }

    /// Builds a messages packet carrying `envelopes`.
    pub fn messages(envelopes: &[Envelope]) -> Self {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(envelopes.len() as u16).to_be_bytes());
        for envelope in envelopes {
            let bytes = envelope.encode();
            payload.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            payload.extend_from_slice(&bytes);
        }
        Self {
            code: MESSAGES_CODE,
            payload,
        }
    }

    /// Decodes a status payload into the announced protocol version.
    pub fn decode_status(&self) -> Result<u32> {
        if self.code != STATUS_CODE {
            return Err(MurmurError::ProtocolError {
                reason: format!("expected status packet, got code {:#04x}", self.code),
            });
        }
        let raw: [u8; 4] = self
            .payload
            .as_slice()
            .try_into()
            .map_err(|_| MurmurError::WireError {
                reason: format!("status payload must be 4 bytes, got {}", self.payload.len()),
            })?;
        Ok(u32::from_be_bytes(raw))
    }

    /// Decodes a messages payload into its envelopes.
    ///
    /// Framing errors (bad count, truncated length prefix or record)
    /// fail the whole packet. An envelope whose record decodes to
    /// garbage *within* intact framing is logged and skipped, and the
    /// skip is reflected in [`EnvelopeBatch::malformed`] so the caller
    /// can penalize the peer if it wants to.
    pub fn decode_envelopes(&self) -> Result<EnvelopeBatch> {
        if self.code != MESSAGES_CODE {
            return Err(MurmurError::ProtocolError {
                reason: format!("expected messages packet, got code {:#04x}", self.code),
            });
        }

        let payload = &self.payload;
        if payload.len() < 2 {
            return Err(MurmurError::WireError {
                reason: "messages payload shorter than its count field".into(),
            });
        }
        let count = u16::from_be_bytes([payload[0], payload[1]]) as usize;

        let mut envelopes = Vec::with_capacity(count);
        let mut malformed = 0;
        let mut offset = 2;

        for index in 0..count {
            if payload.len() - offset < 4 {
                return Err(MurmurError::WireError {
                    reason: format!("truncated length prefix for envelope {index}"),
                });
            }
            let len = u32::from_be_bytes([
                payload[offset],
                payload[offset + 1],
                payload[offset + 2],
                payload[offset + 3],
            ]) as usize;
            offset += 4;

            if payload.len() - offset < len {
                return Err(MurmurError::WireError {
                    reason: format!(
                        "envelope {index} claims {len} bytes, {} available",
                        payload.len() - offset
                    ),
                });
            }

            match Envelope::decode(&payload[offset..offset + len]) {
                Ok(envelope) => envelopes.push(envelope),
                Err(e) => {
                    tracing::debug!(index, error = %e, "skipping malformed envelope in batch");
                    malformed += 1;
                }
            }
            offset += len;
        }

        if offset != payload.len() {
            return Err(MurmurError::WireError {
                reason: format!("{} trailing bytes after envelope batch", payload.len() - offset),
            });
        }

        Ok(EnvelopeBatch {
            envelopes,
            malformed,
        })
    }
}

/// Result of decoding a messages packet.
#[derive(Clone, Debug)]
pub struct EnvelopeBatch {
    /// Envelopes that decoded cleanly, in wire order.
    pub envelopes: Vec<Envelope>,
    /// Number of records skipped as malformed.
    pub malformed: usize,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
