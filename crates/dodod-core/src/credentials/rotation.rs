//! Password rotation saga.
//!
//! Rotation touches several files that cannot be replaced in one atomic
//! step: the config record and one key registry per persisted engine. Each
//! step is recorded in `<root>/rotation.journal.json` once complete, so an
//! interrupted rotation can be reported precisely and resumed by calling
//! `change_password` again with the same passwords. Steps already applied
//! are never undone; the `.backup` files are the manual recovery path.
//!
//! The config rewrite is announced in the journal before it happens, so a
//! crash between the write and its completion mark is recognised on resume.

use std::fmt;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::key_registry::{self, KEY_REGISTRY_BACKUP_FILE};
use super::{
    CredentialManager, CredentialsRecord, DATABASE_BACKUP_FILE, INDEX_STORE_BACKUP_FILE,
};
use crate::crypto::{validate_password, SecretKey};
use crate::error::{DododError, Result};
use crate::index::IndexStoreKind;
use crate::storage::RECORD_STORE_DIR;

/// Journal file name under the store root.
pub const ROTATION_JOURNAL_FILE: &str = "rotation.journal.json";

/// One step of a rotation, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStep {
    /// Config and key registries copied to their `.backup` files.
    Backup,
    /// Config rewritten under the new password.
    Config,
    /// Record store key registry re-sealed.
    Database,
    /// Index store key registry re-sealed.
    IndexStore,
}

impl fmt::Display for RotationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RotationStep::Backup => "backup",
            RotationStep::Config => "config",
            RotationStep::Database => "database",
            RotationStep::IndexStore => "index_store",
        };
        f.write_str(name)
    }
}

/// Persistent progress of a rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationJournal {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub index_store_name: String,
    pub completed: Vec<RotationStep>,
    /// Set while the config is being rewritten.
    #[serde(default)]
    pub config_pending: bool,
}

impl RotationJournal {
    fn new(index_store_kind: IndexStoreKind) -> Self {
        Self {
            id: Uuid::now_v7(),
            started_at: Utc::now(),
            index_store_name: index_store_kind.to_string(),
            completed: Vec::new(),
            config_pending: false,
        }
    }

    /// Load the journal under `root`, if a rotation is pending.
    pub fn load(root: &Path) -> Result<Option<Self>> {
        let path = root.join(ROTATION_JOURNAL_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let data = fs::read(&path)?;
        let journal = serde_json::from_slice(&data)
            .map_err(|e| DododError::Storage(format!("Malformed rotation journal: {}", e)))?;
        Ok(Some(journal))
    }

    fn save(&self, root: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        crate::fs::write_atomic(&root.join(ROTATION_JOURNAL_FILE), &data)
    }

    fn remove(root: &Path) -> Result<()> {
        fs::remove_file(root.join(ROTATION_JOURNAL_FILE))?;
        Ok(())
    }

    pub fn is_done(&self, step: RotationStep) -> bool {
        self.completed.contains(&step)
    }

    fn mark(&mut self, root: &Path, step: RotationStep) -> Result<()> {
        if !self.is_done(step) {
            self.completed.push(step);
        }
        self.save(root)
    }

    /// Completed steps, comma separated, followed by a started config write.
    pub fn completed_summary(&self) -> String {
        let mut summary = if self.completed.is_empty() {
            "none".to_string()
        } else {
            self.completed
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        };
        if self.config_pending && !self.is_done(RotationStep::Config) {
            summary.push_str(" (config write started)");
        }
        summary
    }

    fn index_store_kind(&self) -> Result<IndexStoreKind> {
        self.index_store_name
            .parse()
            .map_err(|_| DododError::Storage("Malformed rotation journal".to_string()))
    }
}

pub(super) fn run(manager: &CredentialManager, current: &str, new: &str) -> Result<SecretKey> {
    let root = manager.root();
    if root.as_os_str().is_empty() {
        return Err(DododError::EmptyPath);
    }
    validate_password(current)?;
    validate_password(new)?;

    let config_path = manager.config_path();
    let record = CredentialsRecord::read(&config_path)?;
    let span = manager.span();

    let (mut journal, old_key) = match RotationJournal::load(root)? {
        Some(journal) => {
            // Once backed up, the pre-rotation config is the backup; the live
            // config may already hold the new key.
            let old_record = if journal.is_done(RotationStep::Backup) {
                CredentialsRecord::read(&root.join(DATABASE_BACKUP_FILE))?
            } else {
                record.clone()
            };
            let old_key = manager.verify(current, &old_record)?;
            tracing::warn!(
                parent: span,
                rotation = %journal.id,
                completed = %journal.completed_summary(),
                "resuming interrupted password change"
            );
            (journal, old_key)
        }
        None => {
            if !record.is_password_protected {
                return Err(DododError::Crypto(
                    "store is not password protected".to_string(),
                ));
            }
            let old_key = manager.verify(current, &record)?;
            let journal = RotationJournal::new(record.index_store_kind()?);
            journal.save(root)?;
            tracing::info!(parent: span, rotation = %journal.id, "password change started");
            (journal, old_key)
        }
    };

    let kind = journal.index_store_kind()?;
    let database_dir = root.join(RECORD_STORE_DIR);
    let index_dir = kind.key_registry_dir(root);

    if !journal.is_done(RotationStep::Backup) {
        crate::fs::backup_file(&config_path, &root.join(DATABASE_BACKUP_FILE))?;
        if index_dir.is_some() {
            crate::fs::backup_file(&config_path, &root.join(INDEX_STORE_BACKUP_FILE))?;
        }
        for dir in std::iter::once(database_dir.as_path()).chain(index_dir.as_deref()) {
            if key_registry::exists(dir) {
                crate::fs::backup_file(
                    &key_registry::registry_path(dir),
                    &dir.join(KEY_REGISTRY_BACKUP_FILE),
                )?;
            }
        }
        journal.mark(root, RotationStep::Backup)?;
        tracing::debug!(parent: span, "config and key registries backed up");
    }

    let new_key = if journal.is_done(RotationStep::Config) {
        manager.verify(new, &CredentialsRecord::read(&config_path)?)?
    } else {
        let new_key = match written_config_key(manager, &journal, new)? {
            Some(new_key) => new_key,
            None => {
                journal.config_pending = true;
                journal.save(root)?;
                let (new_key, encoded_key) = manager.encode(new)?;
                let updated = CredentialsRecord {
                    encoded_key,
                    is_password_protected: true,
                    index_store_name: kind.to_string(),
                };
                updated.write(&config_path)?;
                new_key
            }
        };
        journal.config_pending = false;
        journal.mark(root, RotationStep::Config)?;
        tracing::debug!(parent: span, "config rewritten");
        new_key
    };

    if !journal.is_done(RotationStep::Database) {
        rotate_registry(&database_dir, &old_key, &new_key).map_err(|e| {
            tracing::error!(parent: span, error = %e, "record store key rotation failed");
            DododError::DatabasePasswordChangeFailed(e.to_string())
        })?;
        journal.mark(root, RotationStep::Database)?;
    }

    if let Some(dir) = index_dir.as_deref() {
        if !journal.is_done(RotationStep::IndexStore) {
            rotate_registry(dir, &old_key, &new_key).map_err(|e| {
                tracing::error!(parent: span, error = %e, "index store key rotation failed");
                DododError::IndexStorePasswordChangeFailed(e.to_string())
            })?;
            journal.mark(root, RotationStep::IndexStore)?;
        }
    }

    RotationJournal::remove(root)?;
    tracing::info!(parent: span, rotation = %journal.id, "password change completed");
    Ok(new_key)
}

/// The new key, when an interrupted config write already landed under `new`.
fn written_config_key(
    manager: &CredentialManager,
    journal: &RotationJournal,
    new: &str,
) -> Result<Option<SecretKey>> {
    if !journal.config_pending {
        return Ok(None);
    }
    let current = CredentialsRecord::read(&manager.config_path())?;
    match manager.verify(new, &current) {
        Ok(key) => Ok(Some(key)),
        Err(DododError::WrongPassword) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Re-seal one registry, treating a registry already under `new_key` as done.
fn rotate_registry(dir: &Path, old_key: &SecretKey, new_key: &SecretKey) -> Result<()> {
    if key_registry::open_read_only(dir, Some(new_key)).is_ok() {
        return Ok(());
    }
    key_registry::rewrite(dir, Some(old_key), Some(new_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::key_registry::registry_path;
    use crate::crypto::key::test_hasher;
    use std::sync::Arc;
    use tempfile::tempdir;
    use tracing::Span;

    struct Fixture {
        dir: tempfile::TempDir,
        manager: CredentialManager,
    }

    fn fixture(kind: IndexStoreKind) -> Fixture {
        let dir = tempdir().unwrap();
        let manager = CredentialManager::new(dir.path(), Arc::new(test_hasher()), Span::none());
        let creds = manager.load_or_init(Some("old-password"), kind).unwrap();
        let key = creds.secret_key.unwrap();
        key_registry::open_or_create(&dir.path().join(RECORD_STORE_DIR), Some(&key)).unwrap();
        if let Some(index_dir) = kind.key_registry_dir(dir.path()) {
            key_registry::open_or_create(&index_dir, Some(&key)).unwrap();
        }
        Fixture { dir, manager }
    }

    #[test]
    fn test_rotation_rewrites_config_and_registries() {
        let f = fixture(IndexStoreKind::Snapshot);
        let root = f.dir.path();

        let new_key = f.manager.change_password("old-password", "new-password").unwrap();

        assert!(root.join(DATABASE_BACKUP_FILE).is_file());
        assert!(root.join(INDEX_STORE_BACKUP_FILE).is_file());
        assert!(!root.join(ROTATION_JOURNAL_FILE).exists());
        let database_dir = root.join(RECORD_STORE_DIR);
        assert!(database_dir.join(KEY_REGISTRY_BACKUP_FILE).is_file());
        assert!(key_registry::open_read_only(&database_dir, Some(&new_key)).is_ok());

        let creds = f
            .manager
            .load_or_init(Some("new-password"), IndexStoreKind::Snapshot)
            .unwrap();
        assert_eq!(creds.secret_key.unwrap().as_bytes(), new_key.as_bytes());
        assert!(matches!(
            f.manager
                .load_or_init(Some("old-password"), IndexStoreKind::Snapshot),
            Err(DododError::WrongPassword)
        ));
    }

    #[test]
    fn test_memory_kind_skips_index_backup() {
        let f = fixture(IndexStoreKind::Memory);
        f.manager.change_password("old-password", "new-password").unwrap();

        assert!(f.dir.path().join(DATABASE_BACKUP_FILE).is_file());
        assert!(!f.dir.path().join(INDEX_STORE_BACKUP_FILE).exists());
    }

    #[test]
    fn test_wrong_current_password_changes_nothing() {
        let f = fixture(IndexStoreKind::Snapshot);
        let before = fs::read(f.manager.config_path()).unwrap();

        let result = f.manager.change_password("bad-password", "new-password");

        assert!(matches!(result, Err(DododError::WrongPassword)));
        assert_eq!(fs::read(f.manager.config_path()).unwrap(), before);
        assert!(!f.dir.path().join(DATABASE_BACKUP_FILE).exists());
        assert!(f.manager.pending_rotation().unwrap().is_none());
    }

    #[test]
    fn test_empty_passwords_rejected() {
        let f = fixture(IndexStoreKind::Snapshot);
        assert!(matches!(
            f.manager.change_password("", "new-password"),
            Err(DododError::EmptyPassword)
        ));
        assert!(matches!(
            f.manager.change_password("old-password", ""),
            Err(DododError::EmptyPassword)
        ));
    }

    #[test]
    fn test_failed_index_step_is_resumable() {
        let f = fixture(IndexStoreKind::Snapshot);
        let root = f.dir.path();
        let index_dir = IndexStoreKind::Snapshot.key_registry_dir(root).unwrap();
        let registry = registry_path(&index_dir);
        let saved = fs::read(&registry).unwrap();
        fs::write(&registry, b"corrupted").unwrap();

        let result = f.manager.change_password("old-password", "new-password");
        assert!(matches!(
            result,
            Err(DododError::IndexStorePasswordChangeFailed(_))
        ));

        let journal = f.manager.pending_rotation().unwrap().unwrap();
        assert!(journal.is_done(RotationStep::Config));
        assert!(journal.is_done(RotationStep::Database));
        assert!(!journal.is_done(RotationStep::IndexStore));
        assert_eq!(journal.completed_summary(), "backup,config,database");

        // Restore the registry from its pre-rotation copy and resume.
        fs::write(&registry, saved).unwrap();
        let new_key = f.manager.change_password("old-password", "new-password").unwrap();

        assert!(f.manager.pending_rotation().unwrap().is_none());
        assert!(key_registry::open_read_only(&index_dir, Some(&new_key)).is_ok());
        assert!(key_registry::open_read_only(&root.join(RECORD_STORE_DIR), Some(&new_key)).is_ok());
    }

    #[test]
    fn test_crash_after_config_write_is_resumable() {
        let f = fixture(IndexStoreKind::Snapshot);
        let root = f.dir.path();
        let config_path = f.manager.config_path();
        let original = fs::read(&config_path).unwrap();

        // A completed rotation leaves the new config in place; rewind the
        // journal and registries to the moment just after the config write.
        f.manager.change_password("old-password", "new-password").unwrap();
        let rotated = fs::read(&config_path).unwrap();
        assert_ne!(rotated, original);
        let database_dir = root.join(RECORD_STORE_DIR);
        let index_dir = IndexStoreKind::Snapshot.key_registry_dir(root).unwrap();
        for dir in [&database_dir, &index_dir] {
            fs::copy(dir.join(KEY_REGISTRY_BACKUP_FILE), registry_path(dir)).unwrap();
        }
        let mut journal = RotationJournal::new(IndexStoreKind::Snapshot);
        journal.completed.push(RotationStep::Backup);
        journal.config_pending = true;
        journal.save(root).unwrap();
        assert_eq!(
            f.manager.pending_rotation().unwrap().unwrap().completed_summary(),
            "backup (config write started)"
        );

        let new_key = f.manager.change_password("old-password", "new-password").unwrap();

        assert!(f.manager.pending_rotation().unwrap().is_none());
        // The config written before the crash is kept, not re-salted.
        assert_eq!(fs::read(&config_path).unwrap(), rotated);
        assert!(key_registry::open_read_only(&database_dir, Some(&new_key)).is_ok());
        assert!(key_registry::open_read_only(&index_dir, Some(&new_key)).is_ok());
    }

    #[test]
    fn test_crash_before_config_write_is_resumable() {
        let f = fixture(IndexStoreKind::Memory);
        let root = f.dir.path();
        crate::fs::backup_file(&f.manager.config_path(), &root.join(DATABASE_BACKUP_FILE))
            .unwrap();
        let mut journal = RotationJournal::new(IndexStoreKind::Memory);
        journal.completed.push(RotationStep::Backup);
        journal.config_pending = true;
        journal.save(root).unwrap();

        let new_key = f.manager.change_password("old-password", "new-password").unwrap();

        assert!(f.manager.pending_rotation().unwrap().is_none());
        let creds = f
            .manager
            .load_or_init(Some("new-password"), IndexStoreKind::Memory)
            .unwrap();
        assert_eq!(creds.secret_key.unwrap().as_bytes(), new_key.as_bytes());
    }

    #[test]
    fn test_failed_database_step_reports_engine() {
        let f = fixture(IndexStoreKind::Memory);
        let registry = registry_path(&f.dir.path().join(RECORD_STORE_DIR));
        fs::remove_file(&registry).unwrap();

        let result = f.manager.change_password("old-password", "new-password");
        assert!(matches!(
            result,
            Err(DododError::DatabasePasswordChangeFailed(_))
        ));
    }

    #[test]
    fn test_unprotected_store_cannot_rotate() {
        let dir = tempdir().unwrap();
        let manager = CredentialManager::new(dir.path(), Arc::new(test_hasher()), Span::none());
        manager.load_or_init(None, IndexStoreKind::Memory).unwrap();

        assert!(manager.change_password("any", "new-password").is_err());
    }
}
