//! Cryptographic operations for dodod.
//!
//! This module provides key derivation and sealing services using
//! well-audited libraries:
//! - **Argon2id**: memory-hard password hashing, producing the secret key
//!   and the self-describing encoded key stored in the config record
//! - **XChaCha20-Poly1305**: authenticated encryption of key registries,
//!   records and index snapshots
//!
//! ## Security Model
//!
//! - The secret key is derived from the password and never persisted
//! - Each engine encrypts its data with a random data key; only the key
//!   registry holding that data key is sealed with the secret key
//! - Key material is zeroized from memory on drop
//!
//! ## Threat Model
//!
//! We defend against:
//! - Theft of the database directory
//! - Offline brute-force attacks on the password
//!
//! We do NOT defend against:
//! - Compromised OS / keylogger
//! - Access to an open database handle or its memory

pub mod cipher;
pub mod key;

pub use cipher::{random_bytes, seal, unseal, NONCE_LENGTH};
pub use key::{Argon2idHasher, KdfParams, PasswordHasher, SecretKey, KEY_LENGTH, SALT_LENGTH};

use crate::error::{DododError, Result};

/// Validate that a password was supplied.
///
/// Passwords are opaque to the store; only emptiness is rejected.
///
/// # Errors
///
/// Returns `EmptyPassword` for an empty string.
pub fn validate_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(DododError::EmptyPassword);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_password() {
        assert!(validate_password("secret").is_ok());
        assert!(validate_password(" ").is_ok());
        assert!(matches!(
            validate_password(""),
            Err(DododError::EmptyPassword)
        ));
    }
}
