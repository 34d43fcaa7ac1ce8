//! Password hashing and key derivation using Argon2id.
//!
//! A single Argon2id run produces 64 bytes. The first half is the secret
//! key used to unlock the key registries; the second half is a verifier
//! stored inside the PHC-formatted encoded key. The encoded key therefore
//! carries salt, parameters and verifier but never the secret key itself.

use argon2::password_hash::{Output, ParamsString, PasswordHash, Salt, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{DododError, Result};

/// Argon2id defaults.
///
/// These values balance security and usability:
/// - Memory: 64 MB (64 * 1024 KB)
/// - Iterations: 3
/// - Parallelism: 1 (single-threaded for simplicity)
const ARGON2_MEMORY_KB: u32 = 64 * 1024;
const ARGON2_ITERATIONS: u32 = 3;
const ARGON2_PARALLELISM: u32 = 1;

/// Length of a secret or data key in bytes (256 bits).
pub const KEY_LENGTH: usize = 32;

/// Length of the random salt mixed into every password hash.
pub const SALT_LENGTH: usize = 16;

/// Argon2 output: secret key followed by verifier.
const OUTPUT_LENGTH: usize = KEY_LENGTH * 2;

/// Raw symmetric key material held only in memory.
///
/// This type ensures that key material is securely zeroized from memory
/// when dropped, reducing the window of exposure.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SecretKey {
    key: [u8; KEY_LENGTH],
}

impl SecretKey {
    /// Create a key from raw bytes.
    ///
    /// # Security
    ///
    /// The caller is responsible for ensuring the bytes come from a secure source.
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self { key: bytes }
    }

    /// Create a key from a slice, failing unless it is exactly [`KEY_LENGTH`] long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LENGTH] = bytes
            .try_into()
            .map_err(|_| DododError::Crypto(format!("Key must be {} bytes", KEY_LENGTH)))?;
        Ok(Self { key })
    }

    /// Generate a fresh random key.
    pub fn generate() -> Self {
        Self::from_bytes(super::random_bytes::<KEY_LENGTH>())
    }

    /// Get a reference to the raw key bytes.
    ///
    /// # Security
    ///
    /// Avoid storing or logging this value. Use only for immediate encryption operations.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Argon2id cost parameters used when encoding a new password.
///
/// Verification always uses the parameters recorded in the encoded key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kb: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kb: ARGON2_MEMORY_KB,
            iterations: ARGON2_ITERATIONS,
            parallelism: ARGON2_PARALLELISM,
        }
    }
}

/// Password hashing primitive used by the credential manager.
pub trait PasswordHasher: Send + Sync {
    /// Hash `password` with `salt`, returning the secret key and the
    /// self-describing encoded key to persist.
    fn encode(&self, password: &str, salt: &[u8]) -> Result<(SecretKey, String)>;

    /// Check `password` against a previously encoded key and re-derive the
    /// secret key.
    ///
    /// # Errors
    ///
    /// Returns `WrongPassword` when the password does not match.
    fn verify(&self, password: &str, encoded_key: &str) -> Result<SecretKey>;
}

/// Default [`PasswordHasher`] backed by Argon2id.
#[derive(Debug, Clone, Default)]
pub struct Argon2idHasher {
    params: KdfParams,
}

impl Argon2idHasher {
    pub fn new(params: KdfParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> KdfParams {
        self.params
    }

    fn derive(
        params: KdfParams,
        password: &str,
        salt: &[u8],
    ) -> Result<zeroize::Zeroizing<[u8; OUTPUT_LENGTH]>> {
        let params = Params::new(
            params.memory_kb,
            params.iterations,
            params.parallelism,
            Some(OUTPUT_LENGTH),
        )
        .map_err(|e| DododError::Crypto(format!("Failed to create Argon2 params: {}", e)))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut output = zeroize::Zeroizing::new([0u8; OUTPUT_LENGTH]);
        argon2
            .hash_password_into(password.as_bytes(), salt, output.as_mut())
            .map_err(|e| DododError::Crypto(format!("Key derivation failed: {}", e)))?;
        Ok(output)
    }

    fn split(output: &[u8; OUTPUT_LENGTH]) -> Result<(SecretKey, Output)> {
        let key = SecretKey::from_slice(&output[..KEY_LENGTH])?;
        let verifier = Output::new(&output[KEY_LENGTH..])
            .map_err(|e| DododError::Crypto(format!("Invalid verifier: {}", e)))?;
        Ok((key, verifier))
    }
}

impl PasswordHasher for Argon2idHasher {
    fn encode(&self, password: &str, salt: &[u8]) -> Result<(SecretKey, String)> {
        super::validate_password(password)?;
        if salt.len() < SALT_LENGTH {
            return Err(DododError::Crypto(format!(
                "Salt must be at least {} bytes",
                SALT_LENGTH
            )));
        }

        let output = Self::derive(self.params, password, salt)?;
        let (key, verifier) = Self::split(&output)?;

        let salt_string = SaltString::encode_b64(salt)
            .map_err(|e| DododError::Crypto(format!("Salt encoding failed: {}", e)))?;

        let mut params = ParamsString::new();
        for (name, value) in [
            ("m", self.params.memory_kb),
            ("t", self.params.iterations),
            ("p", self.params.parallelism),
        ] {
            params
                .add_decimal(name, value)
                .map_err(|e| DododError::Crypto(format!("Params encoding failed: {}", e)))?;
        }

        let phc = PasswordHash {
            algorithm: argon2::ARGON2ID_IDENT,
            version: Some(Version::V0x13.into()),
            params,
            salt: Some(salt_string.as_salt()),
            hash: Some(verifier),
        };

        Ok((key, phc.to_string()))
    }

    fn verify(&self, password: &str, encoded_key: &str) -> Result<SecretKey> {
        super::validate_password(password)?;

        let phc = PasswordHash::new(encoded_key)
            .map_err(|e| DododError::Crypto(format!("Malformed encoded key: {}", e)))?;
        if phc.algorithm != argon2::ARGON2ID_IDENT {
            return Err(DododError::Crypto(format!(
                "Unsupported password hash algorithm: {}",
                phc.algorithm
            )));
        }

        let decimal = |name: &str| {
            phc.params.get_decimal(name).ok_or_else(|| {
                DododError::Crypto(format!("Encoded key is missing parameter '{}'", name))
            })
        };
        let params = KdfParams {
            memory_kb: decimal("m")?,
            iterations: decimal("t")?,
            parallelism: decimal("p")?,
        };

        let salt: Salt<'_> = phc
            .salt
            .ok_or_else(|| DododError::Crypto("Encoded key is missing its salt".to_string()))?;
        let mut salt_buf = [0u8; Salt::MAX_LENGTH];
        let salt_bytes = salt
            .decode_b64(&mut salt_buf)
            .map_err(|e| DododError::Crypto(format!("Salt decoding failed: {}", e)))?;

        let stored = phc
            .hash
            .ok_or_else(|| DododError::Crypto("Encoded key is missing its hash".to_string()))?;

        let output = Self::derive(params, password, salt_bytes)?;
        salt_buf.zeroize();
        let (key, verifier) = Self::split(&output)?;

        // Output equality is constant time.
        if verifier != stored {
            return Err(DododError::WrongPassword);
        }
        Ok(key)
    }
}

#[cfg(test)]
pub(crate) fn test_hasher() -> Argon2idHasher {
    Argon2idHasher::new(KdfParams {
        memory_kb: 64,
        iterations: 1,
        parallelism: 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: &[u8; 16] = b"unique-salt-1234";

    #[test]
    fn test_encode_verify_round_trip() {
        let hasher = test_hasher();
        let (key, encoded) = hasher.encode("test-password", SALT).unwrap();

        assert!(encoded.starts_with("$argon2id$v=19$m=64,t=1,p=1$"));

        let verified = hasher.verify("test-password", &encoded).unwrap();
        assert_eq!(key.as_bytes(), verified.as_bytes());
    }

    #[test]
    fn test_wrong_password_rejected() {
        let hasher = test_hasher();
        let (_, encoded) = hasher.encode("test-password", SALT).unwrap();

        let result = hasher.verify("other-password", &encoded);
        assert!(matches!(result, Err(DododError::WrongPassword)));
    }

    #[test]
    fn test_encoded_key_does_not_contain_secret_key() {
        let hasher = test_hasher();
        let (key, encoded) = hasher.encode("test-password", SALT).unwrap();

        assert!(!encoded.contains(&hex::encode(key.as_bytes())));
    }

    #[test]
    fn test_different_salt_different_key() {
        let hasher = test_hasher();
        let (key1, _) = hasher.encode("test-password", b"salt1-1234567890").unwrap();
        let (key2, _) = hasher.encode("test-password", b"salt2-1234567890").unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_verify_uses_recorded_params() {
        let (key, encoded) = test_hasher().encode("test-password", SALT).unwrap();

        // A hasher configured with other costs still verifies older keys.
        let other = Argon2idHasher::new(KdfParams {
            memory_kb: 128,
            iterations: 2,
            parallelism: 1,
        });
        let verified = other.verify("test-password", &encoded).unwrap();
        assert_eq!(key.as_bytes(), verified.as_bytes());
    }

    #[test]
    fn test_short_salt_rejected() {
        assert!(test_hasher().encode("test-password", b"short").is_err());
    }

    #[test]
    fn test_empty_password_rejected() {
        let result = test_hasher().encode("", SALT);
        assert!(matches!(result, Err(DododError::EmptyPassword)));
    }

    #[test]
    fn test_malformed_encoded_key() {
        let result = test_hasher().verify("test-password", "not-a-phc-string");
        assert!(matches!(result, Err(DododError::Crypto(_))));
    }

    #[test]
    fn test_secret_key_debug_redacted() {
        let key = SecretKey::from_bytes([7u8; KEY_LENGTH]);
        let debug = format!("{:?}", key);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("7, 7"));
    }
}
