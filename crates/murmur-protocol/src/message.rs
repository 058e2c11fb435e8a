//! The decrypted plaintext form of an envelope.
//!
//! A [`Message`] is never transmitted as-is: sealing folds it into an
//! envelope's encrypted `data` field, and opening an envelope produces
//! one. The plaintext layout is
//!
//! ```text
//! flags     1 byte        (bit 7 set ⇒ a signature follows)
//! signature 65 bytes      (only when bit 7 is set)
//! payload   remaining bytes
//! ```
//!
//! Bit 7 of `flags` is authoritative for signature presence; the
//! remaining seven bits are random padding chosen at construction and
//! carry no meaning.

use murmur_crypto::hash::sha3_256;
use murmur_crypto::keys::{recover, KeyPair, PublicKey};
use murmur_types::time::unix_now;
use murmur_types::{MurmurError, Result, SIGNATURE_FLAG, SIGNATURE_LENGTH};

/// Decrypted message carried inside an envelope.
#[derive(Clone, Debug)]
pub struct Message {
    /// Flags byte; bit 7 indicates a signature is present.
    pub flags: u8,
    /// Recoverable signature over the payload digest, when signed.
    pub signature: Option<[u8; SIGNATURE_LENGTH]>,
    /// Application payload.
    pub payload: Vec<u8>,
    /// UNIX second at which the sender began sealing. Reconstructed on
    /// open as `expiry - ttl`; not carried in the plaintext.
    pub sent: u32,
    /// Identity that decrypted the envelope, populated by the open loop.
    pub to: Option<PublicKey>,
}

impl Message {
    /// Creates a fresh unsigned message around `payload`.
    ///
    /// The flags byte is random with bit 7 cleared, so identical
    /// payloads sealed twice produce distinct plaintexts.
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            flags: rand::random::<u8>() & !SIGNATURE_FLAG,
            signature: None,
            payload,
            sent: unix_now(),
            to: None,
        }
    }

    /// Returns `true` when bit 7 of the flags byte is set.
    pub fn is_signed(&self) -> bool {
        self.flags & SIGNATURE_FLAG != 0
    }

    /// Signs the payload with `identity`, setting bit 7.
    ///
    /// The signature covers `SHA3-256(payload)` and is recoverable: any
    /// recipient can reconstruct the signer's public key via
    /// [`Message::recover`].
    pub fn sign(&mut self, identity: &KeyPair) -> Result<()> {
        let digest = sha3_256(&self.payload);
        self.signature = Some(identity.sign_recoverable(&digest)?);
        self.flags |= SIGNATURE_FLAG;
        Ok(())
    }

    /// Recovers the signer's public key from the signature.
    ///
    /// Deterministic and idempotent. Returns `None` for unsigned
    /// messages and for signatures that fail recovery.
    pub fn recover(&self) -> Option<PublicKey> {
        if !self.is_signed() {
            return None;
        }
        let signature = self.signature.as_ref()?;
        let digest = sha3_256(&self.payload);
        recover(signature, &digest).ok()
    }

    /// Serializes the message into the plaintext that gets encrypted
    /// into an envelope's `data` field.
    pub fn plaintext(&self) -> Vec<u8> {
        let sig_len = self.signature.map_or(0, |_| SIGNATURE_LENGTH);
        let mut out = Vec::with_capacity(1 + sig_len + self.payload.len());
        out.push(self.flags);
        if let Some(signature) = &self.signature {
            out.extend_from_slice(signature);
        }
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parses a plaintext blob back into a message.
    ///
    /// `sent` is supplied by the caller (the envelope reconstructs it as
    /// `expiry - ttl`). Fails when the blob is empty or bit 7 promises a
    /// signature the blob is too short to hold.
    pub fn from_plaintext(bytes: &[u8], sent: u32) -> Result<Self> {
        let (&flags, rest) = bytes.split_first().ok_or_else(|| MurmurError::WireError {
            reason: "message plaintext is empty".into(),
        })?;

        let (signature, payload) = if flags & SIGNATURE_FLAG != 0 {
            if rest.len() < SIGNATURE_LENGTH {
                return Err(MurmurError::WireError {
                    reason: format!(
                        "signature flag set but only {} bytes follow the flags byte",
                        rest.len()
                    ),
                });
            }
            let mut sig = [0u8; SIGNATURE_LENGTH];
            sig.copy_from_slice(&rest[..SIGNATURE_LENGTH]);
            (Some(sig), rest[SIGNATURE_LENGTH..].to_vec())
        } else {
            (None, rest.to_vec())
        };

        Ok(Self {
            flags,
            signature,
            payload,
            sent,
            to: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_has_signature_bit_clear() {
        for _ in 0..32 {
            let msg = Message::new(b"payload".to_vec());
            assert!(!msg.is_signed());
            assert!(msg.signature.is_none());
        }
    }

    #[test]
    fn sign_sets_bit_seven() -> Result<()> {
        let identity = KeyPair::generate();
        let mut msg = Message::new(b"payload".to_vec());
        msg.sign(&identity)?;
        assert!(msg.is_signed());
        assert!(msg.signature.is_some());
        Ok(())
    }

    #[test]
    fn recover_returns_signer() -> Result<()> {
        let identity = KeyPair::from_bytes(&[0x11; 32])?;
        let mut msg = Message::new(b"attributed".to_vec());
        msg.sign(&identity)?;

        assert_eq!(msg.recover(), Some(identity.public_key()));
        Ok(())
    }

    #[test]
    fn recover_is_idempotent() -> Result<()> {
        let identity = KeyPair::generate();
        let mut msg = Message::new(b"twice".to_vec());
        msg.sign(&identity)?;

        assert_eq!(msg.recover(), msg.recover());
        Ok(())
    }

    #[test]
    fn recover_on_unsigned_is_none() {
        let msg = Message::new(b"anonymous".to_vec());
        assert!(msg.recover().is_none());
    }

    #[test]
    fn plaintext_roundtrip_unsigned() -> Result<()> {
        let msg = Message::new(b"round and round".to_vec());
        let parsed = Message::from_plaintext(&msg.plaintext(), msg.sent)?;

        assert_eq!(parsed.flags, msg.flags);
        assert_eq!(parsed.payload, msg.payload);
        assert!(parsed.signature.is_none());
        Ok(())
    }

    #[test]
    fn plaintext_roundtrip_signed() -> Result<()> {
        let identity = KeyPair::generate();
        let mut msg = Message::new(b"signed cargo".to_vec());
        msg.sign(&identity)?;

        let parsed = Message::from_plaintext(&msg.plaintext(), msg.sent)?;
        assert_eq!(parsed.payload, msg.payload);
        assert_eq!(parsed.signature, msg.signature);
        assert_eq!(parsed.recover(), Some(identity.public_key()));
        Ok(())
    }

    #[test]
    fn empty_plaintext_rejected() {
        assert!(Message::from_plaintext(&[], 0).is_err());
    }

    #[test]
    fn truncated_signature_rejected() {
        // Flags promise a signature but only 10 bytes follow.
        let mut blob = vec![SIGNATURE_FLAG];
        blob.extend_from_slice(&[0u8; 10]);
        assert!(Message::from_plaintext(&blob, 0).is_err());
    }

    #[test]
    fn empty_payload_with_signature_parses() -> Result<()> {
        let identity = KeyPair::generate();
        let mut msg = Message::new(Vec::new());
        msg.sign(&identity)?;

        let parsed = Message::from_plaintext(&msg.plaintext(), msg.sent)?;
        assert!(parsed.payload.is_empty());
        assert!(parsed.is_signed());
        Ok(())
    }
}
