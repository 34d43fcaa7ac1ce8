//! Per-engine key registries.
//!
//! Each persisted engine directory holds a `KEYREGISTRY` file carrying the
//! engine's random data key. When the store is password protected the data
//! key is sealed with the secret key; otherwise it is stored as is. Password
//! rotation rewrites only this file, so engine data never needs
//! re-encryption.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{seal, unseal, SecretKey};
use crate::error::{DododError, Result};

/// Registry file name inside an engine directory.
pub const KEY_REGISTRY_FILE: &str = "KEYREGISTRY";

/// Backup written before a rotation rewrites the registry.
pub const KEY_REGISTRY_BACKUP_FILE: &str = "KEYREGISTRY.backup";

const KEY_REGISTRY_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyRegistryFile {
    version: u32,
    encrypted: bool,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rotated_at: Option<DateTime<Utc>>,
    /// Base64 of the sealed or raw data key.
    data_key: String,
}

/// Path of the registry inside `dir`.
pub fn registry_path(dir: &Path) -> PathBuf {
    dir.join(KEY_REGISTRY_FILE)
}

/// Whether `dir` holds a key registry.
pub fn exists(dir: &Path) -> bool {
    registry_path(dir).is_file()
}

/// Read the data key of `dir`, creating the registry if it does not exist.
///
/// # Errors
///
/// Returns `WrongPassword` if the registry does not open under `secret_key`.
pub fn open_or_create(dir: &Path, secret_key: Option<&SecretKey>) -> Result<SecretKey> {
    if exists(dir) {
        return open_read_only(dir, secret_key);
    }

    fs::create_dir_all(dir)?;
    let data_key = SecretKey::generate();
    write(dir, &data_key, secret_key, Utc::now(), None)?;
    Ok(data_key)
}

/// Read the data key of an existing registry without modifying it.
///
/// # Errors
///
/// - `NotFound` if the registry is missing
/// - `WrongPassword` if it does not open under `secret_key`
/// - `Storage` if the file is malformed
pub fn open_read_only(dir: &Path, secret_key: Option<&SecretKey>) -> Result<SecretKey> {
    let file = read(dir)?;
    decode_data_key(&file, secret_key)
}

/// Re-seal the registry of `dir` from `old_key` to `new_key`.
///
/// The data key itself is unchanged.
pub fn rewrite(dir: &Path, old_key: Option<&SecretKey>, new_key: Option<&SecretKey>) -> Result<()> {
    let file = read(dir)?;
    let data_key = decode_data_key(&file, old_key)?;
    write(dir, &data_key, new_key, file.created_at, Some(Utc::now()))
}

fn read(dir: &Path) -> Result<KeyRegistryFile> {
    let path = registry_path(dir);
    if !path.is_file() {
        return Err(DododError::NotFound(format!(
            "key registry {}",
            path.display()
        )));
    }
    let data = fs::read(&path)?;
    let file: KeyRegistryFile = serde_json::from_slice(&data)
        .map_err(|e| DododError::Storage(format!("Malformed key registry: {}", e)))?;
    if file.version != KEY_REGISTRY_VERSION {
        return Err(DododError::Storage(format!(
            "Unsupported key registry version {}",
            file.version
        )));
    }
    Ok(file)
}

fn decode_data_key(file: &KeyRegistryFile, secret_key: Option<&SecretKey>) -> Result<SecretKey> {
    let stored = STANDARD
        .decode(&file.data_key)
        .map_err(|e| DododError::Storage(format!("Malformed key registry: {}", e)))?;

    match (file.encrypted, secret_key) {
        (true, Some(key)) => {
            let raw = zeroize::Zeroizing::new(
                unseal(key, &stored).map_err(|_| DododError::WrongPassword)?,
            );
            SecretKey::from_slice(&raw)
        }
        (true, None) => Err(DododError::WrongPassword),
        (false, None) => SecretKey::from_slice(&stored),
        (false, Some(_)) => Err(DododError::Crypto(
            "key registry is not encrypted but a secret key was supplied".to_string(),
        )),
    }
}

fn write(
    dir: &Path,
    data_key: &SecretKey,
    secret_key: Option<&SecretKey>,
    created_at: DateTime<Utc>,
    rotated_at: Option<DateTime<Utc>>,
) -> Result<()> {
    let stored = match secret_key {
        Some(key) => seal(key, data_key.as_bytes())?,
        None => data_key.as_bytes().to_vec(),
    };
    let file = KeyRegistryFile {
        version: KEY_REGISTRY_VERSION,
        encrypted: secret_key.is_some(),
        created_at,
        rotated_at,
        data_key: STANDARD.encode(stored),
    };
    let data = serde_json::to_vec_pretty(&file)?;
    crate::fs::write_atomic(&registry_path(dir), &data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_then_open() {
        let dir = tempdir().unwrap();
        let secret = SecretKey::generate();

        let created = open_or_create(dir.path(), Some(&secret)).unwrap();
        let opened = open_read_only(dir.path(), Some(&secret)).unwrap();

        assert_eq!(created.as_bytes(), opened.as_bytes());
    }

    #[test]
    fn test_sealed_registry_hides_data_key() {
        let dir = tempdir().unwrap();
        let secret = SecretKey::generate();
        let data_key = open_or_create(dir.path(), Some(&secret)).unwrap();

        let content = fs::read_to_string(registry_path(dir.path())).unwrap();
        assert!(!content.contains(&STANDARD.encode(data_key.as_bytes())));
        assert!(!content.contains(&hex::encode(data_key.as_bytes())));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let dir = tempdir().unwrap();
        open_or_create(dir.path(), Some(&SecretKey::generate())).unwrap();

        let result = open_read_only(dir.path(), Some(&SecretKey::generate()));
        assert!(matches!(result, Err(DododError::WrongPassword)));
        let result = open_read_only(dir.path(), None);
        assert!(matches!(result, Err(DododError::WrongPassword)));
    }

    #[test]
    fn test_unprotected_registry() {
        let dir = tempdir().unwrap();
        let created = open_or_create(dir.path(), None).unwrap();
        let opened = open_read_only(dir.path(), None).unwrap();
        assert_eq!(created.as_bytes(), opened.as_bytes());
    }

    #[test]
    fn test_rewrite_keeps_data_key() {
        let dir = tempdir().unwrap();
        let old = SecretKey::generate();
        let new = SecretKey::generate();
        let data_key = open_or_create(dir.path(), Some(&old)).unwrap();

        rewrite(dir.path(), Some(&old), Some(&new)).unwrap();

        let reopened = open_read_only(dir.path(), Some(&new)).unwrap();
        assert_eq!(data_key.as_bytes(), reopened.as_bytes());
        assert!(open_read_only(dir.path(), Some(&old)).is_err());
    }

    #[test]
    fn test_open_missing_registry() {
        let dir = tempdir().unwrap();
        let result = open_read_only(dir.path(), None);
        assert!(matches!(result, Err(DododError::NotFound(_))));
        assert!(!exists(dir.path()));
    }
}
