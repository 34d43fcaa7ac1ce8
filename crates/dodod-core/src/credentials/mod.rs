//! Credential and key management.
//!
//! The config record `<root>/dodod.json` is the single source of truth for
//! whether a store is password protected. On first open it is written from
//! the supplied password; afterwards the password is verified against it.

pub mod key_registry;
mod rotation;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::Span;

use crate::crypto::{random_bytes, PasswordHasher, SecretKey, SALT_LENGTH};
use crate::error::{DododError, Result};
use crate::index::IndexStoreKind;

pub use rotation::{RotationJournal, RotationStep, ROTATION_JOURNAL_FILE};

/// Config record file name.
pub const CONFIG_FILE: &str = "dodod.json";

/// Copy of the config taken before a rotation, for the record store.
pub const DATABASE_BACKUP_FILE: &str = "database.dodod.json.backup";

/// Copy of the config taken before a rotation, for the index store.
pub const INDEX_STORE_BACKUP_FILE: &str = "indexstore.dodod.json.backup";

/// On-disk config record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CredentialsRecord {
    pub encoded_key: String,
    pub is_password_protected: bool,
    pub index_store_name: String,
}

impl CredentialsRecord {
    /// Read a record from `path`.
    ///
    /// # Errors
    ///
    /// - `InvalidConfigFile` if the file is missing or empty
    /// - `JsonParseFailed` if it is not a JSON object
    pub fn read(path: &Path) -> Result<Self> {
        let data = fs::read(path).unwrap_or_default();
        if data.is_empty() {
            return Err(DododError::InvalidConfigFile);
        }
        serde_json::from_slice(&data).map_err(|e| DododError::JsonParseFailed(e.to_string()))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec(self)?;
        crate::fs::write_atomic(path, &data)
    }

    /// Index store kind recorded in the config.
    pub fn index_store_kind(&self) -> Result<IndexStoreKind> {
        if self.index_store_name.is_empty() {
            return Ok(IndexStoreKind::default());
        }
        self.index_store_name
            .parse()
            .map_err(|_| DododError::InvalidConfigFile)
    }
}

/// Result of unlocking a store.
#[derive(Debug)]
pub struct Credentials {
    pub record: CredentialsRecord,
    /// Present only for password protected stores.
    pub secret_key: Option<SecretKey>,
    pub index_store_kind: IndexStoreKind,
}

/// Reads, writes and verifies the config record of one store root.
#[derive(Clone)]
pub struct CredentialManager {
    root: PathBuf,
    hasher: Arc<dyn PasswordHasher>,
    span: Span,
}

impl CredentialManager {
    pub fn new(root: impl Into<PathBuf>, hasher: Arc<dyn PasswordHasher>, span: Span) -> Self {
        Self {
            root: root.into(),
            hasher,
            span,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn config_exists(&self) -> bool {
        self.config_path().is_file()
    }

    /// Verify `password` against the existing config, or write a new config.
    ///
    /// # Arguments
    ///
    /// * `password` - empty or absent for an unprotected store
    /// * `kind` - index store kind used when the config is created
    ///
    /// # Errors
    ///
    /// - `WrongPassword` if the password does not match a protected config
    /// - `EmptyPassword` if a protected config is opened without a password
    /// - `InvalidConfigFile` / `JsonParseFailed` for an unreadable config
    pub fn load_or_init(&self, password: Option<&str>, kind: IndexStoreKind) -> Result<Credentials> {
        let password = password.filter(|p| !p.is_empty());

        if self.config_exists() {
            let record = CredentialsRecord::read(&self.config_path())?;
            let index_store_kind = record.index_store_kind()?;

            let secret_key = if record.is_password_protected {
                if record.encoded_key.is_empty() {
                    return Err(DododError::InvalidConfigFile);
                }
                let password = password.ok_or(DododError::EmptyPassword)?;
                Some(self.hasher.verify(password, &record.encoded_key)?)
            } else {
                if password.is_some() {
                    tracing::warn!(
                        parent: &self.span,
                        "store is not password protected; ignoring the supplied password"
                    );
                }
                None
            };

            tracing::debug!(
                parent: &self.span,
                protected = record.is_password_protected,
                index_store = %index_store_kind,
                "config verified"
            );
            return Ok(Credentials {
                record,
                secret_key,
                index_store_kind,
            });
        }

        let (record, secret_key) = match password {
            Some(password) => {
                let (key, encoded_key) = self.encode(password)?;
                let record = CredentialsRecord {
                    encoded_key,
                    is_password_protected: true,
                    index_store_name: kind.to_string(),
                };
                (record, Some(key))
            }
            None => (
                CredentialsRecord {
                    encoded_key: String::new(),
                    is_password_protected: false,
                    index_store_name: kind.to_string(),
                },
                None,
            ),
        };
        record.write(&self.config_path())?;

        tracing::info!(
            parent: &self.span,
            protected = record.is_password_protected,
            index_store = %kind,
            "config created"
        );
        Ok(Credentials {
            record,
            secret_key,
            index_store_kind: kind,
        })
    }

    /// Interrupted rotation, if any.
    pub fn pending_rotation(&self) -> Result<Option<RotationJournal>> {
        RotationJournal::load(&self.root)
    }

    /// Rotate the store from `current` to `new`, resuming an interrupted
    /// rotation when one is recorded. Returns the new secret key.
    pub fn change_password(&self, current: &str, new: &str) -> Result<SecretKey> {
        rotation::run(self, current, new)
    }

    fn encode(&self, password: &str) -> Result<(SecretKey, String)> {
        let salt = random_bytes::<SALT_LENGTH>();
        self.hasher.encode(password, &salt)
    }

    fn verify(&self, password: &str, record: &CredentialsRecord) -> Result<SecretKey> {
        self.hasher.verify(password, &record.encoded_key)
    }

    fn span(&self) -> &Span {
        &self.span
    }
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager")
            .field("root", &self.root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key::test_hasher;
    use tempfile::tempdir;

    fn manager(root: &Path) -> CredentialManager {
        CredentialManager::new(root, Arc::new(test_hasher()), Span::none())
    }

    #[test]
    fn test_first_open_writes_protected_config() {
        let dir = tempdir().unwrap();
        let creds = manager(dir.path())
            .load_or_init(Some("secret"), IndexStoreKind::Snapshot)
            .unwrap();

        assert!(creds.secret_key.is_some());
        let record = CredentialsRecord::read(&dir.path().join(CONFIG_FILE)).unwrap();
        assert!(record.is_password_protected);
        assert!(record.encoded_key.starts_with("$argon2id$"));
        assert_eq!(record.index_store_name, "snapshot");
    }

    #[test]
    fn test_config_uses_camel_case_keys() {
        let dir = tempdir().unwrap();
        manager(dir.path())
            .load_or_init(None, IndexStoreKind::Memory)
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(dir.path().join(CONFIG_FILE)).unwrap()).unwrap();
        assert_eq!(raw["encodedKey"], "");
        assert_eq!(raw["isPasswordProtected"], false);
        assert_eq!(raw["indexStoreName"], "memory");
    }

    #[test]
    fn test_reopen_derives_same_key() {
        let dir = tempdir().unwrap();
        let m = manager(dir.path());
        let first = m.load_or_init(Some("secret"), IndexStoreKind::Snapshot).unwrap();
        let second = m.load_or_init(Some("secret"), IndexStoreKind::Memory).unwrap();

        assert_eq!(
            first.secret_key.unwrap().as_bytes(),
            second.secret_key.unwrap().as_bytes()
        );
        // The recorded kind wins over the requested one.
        assert_eq!(second.index_store_kind, IndexStoreKind::Snapshot);
    }

    #[test]
    fn test_wrong_password() {
        let dir = tempdir().unwrap();
        let m = manager(dir.path());
        m.load_or_init(Some("secret"), IndexStoreKind::Snapshot).unwrap();

        let result = m.load_or_init(Some("other"), IndexStoreKind::Snapshot);
        assert!(matches!(result, Err(DododError::WrongPassword)));
        let result = m.load_or_init(None, IndexStoreKind::Snapshot);
        assert!(matches!(result, Err(DododError::EmptyPassword)));
    }

    #[test]
    fn test_unprotected_store_ignores_password() {
        let dir = tempdir().unwrap();
        let m = manager(dir.path());
        m.load_or_init(None, IndexStoreKind::Snapshot).unwrap();

        let creds = m.load_or_init(Some("anything"), IndexStoreKind::Snapshot).unwrap();
        assert!(creds.secret_key.is_none());
    }

    #[test]
    fn test_empty_config_is_invalid() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), b"").unwrap();

        let result = manager(dir.path()).load_or_init(Some("secret"), IndexStoreKind::Snapshot);
        assert!(matches!(result, Err(DododError::InvalidConfigFile)));
    }

    #[test]
    fn test_garbage_config_fails_to_parse() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), b"{not json").unwrap();

        let result = manager(dir.path()).load_or_init(Some("secret"), IndexStoreKind::Snapshot);
        assert!(matches!(result, Err(DododError::JsonParseFailed(_))));
    }

    #[test]
    fn test_unknown_index_store_name() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            br#"{"encodedKey":"","isPasswordProtected":false,"indexStoreName":"scorch"}"#,
        )
        .unwrap();

        let result = manager(dir.path()).load_or_init(None, IndexStoreKind::Snapshot);
        assert!(matches!(result, Err(DododError::InvalidConfigFile)));
    }
}
