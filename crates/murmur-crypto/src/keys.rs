//! secp256k1 identity keypairs and recoverable ECDSA.
//!
//! A murmur identity is a secp256k1 private key. Its public half travels
//! as the 33-byte SEC1-compressed encoding, which also serves as the
//! identity registry key. Signatures are the 65-byte recoverable form
//! (r ‖ s ‖ recovery id) so the verifier can reconstruct the signer's
//! public key from the signature and digest alone.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use murmur_types::{MurmurError, Result, SIGNATURE_LENGTH};
use rand::rngs::OsRng;
use zeroize::Zeroize;

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

/// Compressed secp256k1 public key (33 bytes, leading 0x02 or 0x03).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; 33]);

impl PublicKey {
    /// The fixed byte length of a compressed public key.
    pub const LEN: usize = 33;

    /// Creates a `PublicKey` from compressed SEC1 bytes, validating that
    /// they encode a point on the curve.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key = VerifyingKey::from_sec1_bytes(bytes).map_err(|_| MurmurError::CryptoError {
            reason: "invalid compressed secp256k1 public key".into(),
        })?;
        Ok(Self::from_verifying_key(&key))
    }

    /// Returns the compressed SEC1 bytes.
    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

    pub(crate) fn from_verifying_key(key: &VerifyingKey) -> Self {
        let sec1 = key.to_sec1_bytes();
        let mut bytes = [0u8; 33];
        bytes.copy_from_slice(&sec1);
        Self(bytes)
    }

    pub(crate) fn to_verifying_key(self) -> Result<VerifyingKey> {
        VerifyingKey::from_sec1_bytes(&self.0).map_err(|_| MurmurError::CryptoError {
            reason: "stored public key is not a valid curve point".into(),
        })
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", hex_prefix(&self.0))
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex_prefix(&self.0))
    }
}

/// Renders the first 8 bytes of key material as hex for log output.
fn hex_prefix(bytes: &[u8]) -> String {
    bytes[..8].iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// KeyPair
// ---------------------------------------------------------------------------

/// secp256k1 identity keypair.
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generates a fresh keypair from OS entropy.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Restores a keypair from raw 32-byte secret scalar material.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let signing_key =
            SigningKey::from_bytes(bytes.into()).map_err(|_| MurmurError::CryptoError {
                reason: "invalid secp256k1 secret key".into(),
            })?;
        Ok(Self { signing_key })
    }

    /// Returns the raw secret scalar (for key-file persistence by the
    /// embedding application).
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }

    /// Returns the compressed public half.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_verifying_key(self.signing_key.verifying_key())
    }

    /// Signs a 32-byte digest, producing a 65-byte recoverable signature.
    pub fn sign_recoverable(&self, digest: &[u8; 32]) -> Result<[u8; SIGNATURE_LENGTH]> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| MurmurError::CryptoError {
                reason: format!("recoverable signing failed: {e}"),
            })?;

        let mut out = [0u8; SIGNATURE_LENGTH];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = recovery_id.to_byte();
        Ok(out)
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self {
            signing_key: self.signing_key.clone(),
        }
    }
}

// KeyPair does not implement Debug to prevent secret leakage.

impl Drop for KeyPair {
    fn drop(&mut self) {
        let mut bytes: [u8; 32] = self.signing_key.to_bytes().into();
        bytes.zeroize();
    }
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

/// Recovers the signer's public key from a 65-byte recoverable signature
/// and the digest it was produced over.
///
/// Deterministic: the same signature and digest always recover the same
/// key.
pub fn recover(signature: &[u8; SIGNATURE_LENGTH], digest: &[u8; 32]) -> Result<PublicKey> {
    let sig = Signature::from_slice(&signature[..64]).map_err(|_| MurmurError::CryptoError {
        reason: "malformed signature body".into(),
    })?;
    let recovery_id =
        RecoveryId::from_byte(signature[64]).ok_or_else(|| MurmurError::CryptoError {
            reason: format!("invalid recovery id {}", signature[64]),
        })?;

    let key = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id).map_err(|_| {
        MurmurError::CryptoError {
            reason: "public key recovery failed".into(),
        }
    })?;

    Ok(PublicKey::from_verifying_key(&key))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
