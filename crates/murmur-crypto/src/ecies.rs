//! Recipient encryption for envelope payloads.
//!
//! Every sealed envelope generates a fresh ephemeral secp256k1 keypair,
//! performs Diffie-Hellman with the recipient's public key, derives a
//! symmetric key via HKDF-SHA256, and encrypts the plaintext with
//! XChaCha20-Poly1305.
//!
//! # Wire layout of the encrypted blob
//!
//! ```text
//! ephemeral_pubkey   33 bytes (compressed SEC1)
//! nonce              24 bytes
//! ciphertext + tag   plaintext length + 16 bytes
//! ```
//!
//! # Decryption error contract
//!
//! A blob whose embedded ephemeral key is not a valid curve point can
//! never decrypt under *any* identity, so that case surfaces as the
//! distinct [`MurmurError::InvalidPublicKey`]; callers iterating over
//! identities stop immediately. Every other failure (wrong recipient,
//! tampered ciphertext) is an ordinary [`MurmurError::CryptoError`].

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use k256::ecdh::EphemeralSecret;
use murmur_types::{MurmurError, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::keys::{KeyPair, PublicKey};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Fixed HKDF salt; domain-separates envelope keys from any other use of
/// the same shared secret.
const HKDF_SALT: &[u8] = b"murmur-envelope";

/// Byte length of the XChaCha20-Poly1305 nonce.
const NONCE_LEN: usize = 24;

/// Byte length of the Poly1305 authentication tag.
const TAG_LEN: usize = 16;

/// Minimum length of a well-formed blob: ephemeral key + nonce + tag.
const MIN_BLOB_LEN: usize = PublicKey::LEN + NONCE_LEN + TAG_LEN;

// ---------------------------------------------------------------------------
// Encrypt
// ---------------------------------------------------------------------------

/// Encrypts `plaintext` to `recipient`, producing a self-contained blob.
///
/// A fresh ephemeral keypair is generated per call, so repeated
/// encryptions of the same plaintext to the same recipient never share
/// key material.
pub fn encrypt(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let recipient_point =
        k256::PublicKey::from_sec1_bytes(recipient.as_bytes()).map_err(|_| {
            MurmurError::CryptoError {
                reason: "recipient public key is not a valid curve point".into(),
            }
        })?;

    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let ephemeral_pub = PublicKey::from_bytes(&ephemeral.public_key().to_sec1_bytes())?;

    let shared = ephemeral.diffie_hellman(&recipient_point);
    let key = derive_key(shared.raw_secret_bytes(), &ephemeral_pub, recipient)?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key));
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|e| MurmurError::CryptoError {
            reason: format!("envelope encryption failed: {e}"),
        })?;

    let mut blob = Vec::with_capacity(PublicKey::LEN + NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(ephemeral_pub.as_bytes());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

// ---------------------------------------------------------------------------
// Decrypt
// ---------------------------------------------------------------------------

/// Attempts to decrypt a blob produced by [`encrypt`] with `identity`.
///
/// # Errors
///
/// - [`MurmurError::InvalidPublicKey`] when the embedded ephemeral key
///   does not parse — no identity can decrypt this blob.
/// - [`MurmurError::CryptoError`] for every other failure (truncated
///   blob, wrong recipient, tampered ciphertext).
pub fn decrypt(identity: &KeyPair, blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < MIN_BLOB_LEN {
        return Err(MurmurError::CryptoError {
            reason: format!(
                "encrypted blob too short: need at least {MIN_BLOB_LEN} bytes, got {}",
                blob.len()
            ),
        });
    }

    let ephemeral_point = k256::PublicKey::from_sec1_bytes(&blob[..PublicKey::LEN])
        .map_err(|_| MurmurError::InvalidPublicKey)?;
    let ephemeral_pub = PublicKey::from_bytes(&blob[..PublicKey::LEN])
        .map_err(|_| MurmurError::InvalidPublicKey)?;
    let nonce = &blob[PublicKey::LEN..PublicKey::LEN + NONCE_LEN];
    let ciphertext = &blob[PublicKey::LEN + NONCE_LEN..];

    let shared = k256::ecdh::diffie_hellman(
        identity.signing_key().as_nonzero_scalar(),
        ephemeral_point.as_affine(),
    );
    let key = derive_key(
        shared.raw_secret_bytes(),
        &ephemeral_pub,
        &identity.public_key(),
    )?;

    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key));
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| MurmurError::CryptoError {
            reason: "envelope decryption failed".into(),
        })
}

// ---------------------------------------------------------------------------
// Key derivation
// ---------------------------------------------------------------------------

/// Derives the 32-byte AEAD key from the raw ECDH shared secret.
///
/// The HKDF info binds the key to the ephemeral and recipient public
/// keys, so a blob re-targeted at a different recipient derives a
/// different key even under a colliding shared secret.
fn derive_key(
    shared_secret: &[u8],
    ephemeral_pub: &PublicKey,
    recipient: &PublicKey,
) -> Result<[u8; 32]> {
    let mut info = Vec::with_capacity(PublicKey::LEN * 2);
    info.extend_from_slice(ephemeral_pub.as_bytes());
    info.extend_from_slice(recipient.as_bytes());

    let hkdf = Hkdf::<Sha256>::new(Some(HKDF_SALT), shared_secret);
    let mut key = [0u8; 32];
    hkdf.expand(&info, &mut key)
        .map_err(|_| MurmurError::CryptoError {
            reason: "HKDF expansion failed".into(),
        })?;
    info.zeroize();
    Ok(key)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() -> Result<()> {
        let recipient = KeyPair::from_bytes(&[0xBB; 32])?;
        let plaintext = b"hello from the dark";

        let blob = encrypt(&recipient.public_key(), plaintext)?;
        let decrypted = decrypt(&recipient, &blob)?;

        assert_eq!(decrypted.as_slice(), plaintext.as_slice());
        Ok(())
    }

    #[test]
    fn wrong_recipient_fails() -> Result<()> {
        let recipient = KeyPair::from_bytes(&[0xBB; 32])?;
        let eavesdropper = KeyPair::from_bytes(&[0xCC; 32])?;

        let blob = encrypt(&recipient.public_key(), b"secret")?;
        let result = decrypt(&eavesdropper, &blob);

        assert!(matches!(result, Err(MurmurError::CryptoError { .. })));
        Ok(())
    }

    #[test]
    fn tampered_ciphertext_fails() -> Result<()> {
        let recipient = KeyPair::generate();
        let mut blob = encrypt(&recipient.public_key(), b"secret")?;

        let last = blob.len() - 1;
        blob[last] ^= 0xFF;

        assert!(decrypt(&recipient, &blob).is_err());
        Ok(())
    }

    #[test]
    fn invalid_ephemeral_key_is_distinct_error() -> Result<()> {
        let recipient = KeyPair::generate();
        let blob = encrypt(&recipient.public_key(), b"secret")?;

        // Overwrite the embedded ephemeral key with a non-point.
        let mut mangled = blob;
        mangled[..PublicKey::LEN].copy_from_slice(&[0u8; PublicKey::LEN]);

        let result = decrypt(&recipient, &mangled);
        assert!(matches!(result, Err(MurmurError::InvalidPublicKey)));
        Ok(())
    }

    #[test]
    fn truncated_blob_rejected() {
        let recipient = KeyPair::generate();
        let result = decrypt(&recipient, &[0u8; MIN_BLOB_LEN - 1]);
        assert!(matches!(result, Err(MurmurError::CryptoError { .. })));
    }

    #[test]
    fn ephemeral_keys_unique_per_call() -> Result<()> {
        let recipient = KeyPair::generate();
        let blob_a = encrypt(&recipient.public_key(), b"msg")?;
        let blob_b = encrypt(&recipient.public_key(), b"msg")?;
        assert_ne!(&blob_a[..PublicKey::LEN], &blob_b[..PublicKey::LEN]);
        Ok(())
    }

    #[test]
    fn empty_plaintext_roundtrip() -> Result<()> {
        let recipient = KeyPair::generate();
        let blob = encrypt(&recipient.public_key(), b"")?;
        assert_eq!(blob.len(), MIN_BLOB_LEN);
        let decrypted = decrypt(&recipient, &blob)?;
        assert!(decrypted.is_empty());
        Ok(())
    }
}
