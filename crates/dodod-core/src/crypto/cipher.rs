//! Authenticated encryption with XChaCha20-Poly1305.
//!
//! Sealed frames are `nonce || ciphertext`, with a random 24-byte nonce per
//! call, so callers can seal many values under one key without tracking
//! counters.

use chacha20poly1305::aead::generic_array::GenericArray;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::XChaCha20Poly1305;
use rand::rngs::OsRng;
use rand::RngCore;

use super::key::SecretKey;
use crate::error::{DododError, Result};

/// Length of the nonce prefix of every sealed frame.
pub const NONCE_LENGTH: usize = 24;

/// Fill an array with bytes from the operating system RNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Encrypt `plaintext` under `key`.
///
/// # Errors
///
/// Returns `Crypto` if the AEAD rejects the input.
pub fn seal(key: &SecretKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));

    let nonce = random_bytes::<NONCE_LENGTH>();
    let ciphertext = cipher
        .encrypt(GenericArray::from_slice(&nonce), plaintext)
        .map_err(|e| DododError::Crypto(format!("XChaCha20-Poly1305 encryption failed: {}", e)))?;

    let mut sealed = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt a frame produced by [`seal`].
///
/// # Errors
///
/// Returns `Crypto` if the frame is truncated, was sealed under another key
/// or was tampered with.
pub fn unseal(key: &SecretKey, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LENGTH {
        return Err(DododError::Crypto(
            "data too short for XChaCha20-Poly1305".to_string(),
        ));
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_LENGTH);
    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));
    cipher
        .decrypt(GenericArray::from_slice(nonce), ciphertext)
        .map_err(|e| DododError::Crypto(format!("XChaCha20-Poly1305 decryption failed: {}", e)))
}
