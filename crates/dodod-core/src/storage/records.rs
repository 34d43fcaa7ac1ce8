//! SQLite-backed record store.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension};
use tracing::Span;

use crate::credentials::key_registry;
use crate::crypto::{seal, unseal, SecretKey};
use crate::error::{DododError, Result};

/// Database file inside the record store directory.
pub const RECORD_STORE_FILE: &str = "records.sqlite";

/// Length prefix of the id inside a sealed record.
const ID_PREFIX: usize = 4;

#[derive(Debug)]
enum RecordOp {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

/// Writes staged for one transaction.
///
/// Staging seals values immediately; nothing touches the database until
/// [`RecordStore::commit`].
#[derive(Debug, Default)]
pub struct RecordBatch {
    ops: Vec<RecordOp>,
}

impl RecordBatch {
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Encrypted record store.
pub struct RecordStore {
    path: PathBuf,
    conn: Mutex<Connection>,
    data_key: SecretKey,
    span: Span,
}

impl RecordStore {
    /// Open or create the record store in `dir`.
    ///
    /// # Errors
    ///
    /// Returns `WrongPassword` if the directory's key registry does not open
    /// under `secret_key`.
    pub fn open(dir: &Path, secret_key: Option<&SecretKey>, span: Span) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let data_key = key_registry::open_or_create(dir, secret_key)?;

        let path = dir.join(RECORD_STORE_FILE);
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            );
            "#,
        )?;

        let store = Self {
            path,
            conn: Mutex::new(conn),
            data_key,
            span,
        };
        tracing::debug!(
            parent: &store.span,
            path = %store.path.display(),
            records = store.count()?,
            "record store opened"
        );
        Ok(store)
    }

    /// Lock the database connection, returning an error if the mutex is poisoned.
    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DododError::Storage("SQLite connection poisoned".to_string()))
    }

    fn record_key(&self, id: &str) -> String {
        blake3::keyed_hash(self.data_key.as_bytes(), id.as_bytes())
            .to_hex()
            .to_string()
    }

    fn seal_record(&self, id: &str, envelope: &[u8]) -> Result<Vec<u8>> {
        let id_len = u32::try_from(id.len())
            .map_err(|_| DododError::InvalidDocument("document id is too long".to_string()))?;
        let mut frame = Vec::with_capacity(ID_PREFIX + id.len() + envelope.len());
        frame.extend_from_slice(&id_len.to_be_bytes());
        frame.extend_from_slice(id.as_bytes());
        frame.extend_from_slice(envelope);
        seal(&self.data_key, &frame)
    }

    fn unseal_record(&self, sealed: &[u8]) -> Result<(String, Vec<u8>)> {
        let frame = unseal(&self.data_key, sealed)?;
        if frame.len() < ID_PREFIX {
            return Err(DododError::Storage("Record frame is truncated".to_string()));
        }
        let mut prefix = [0u8; ID_PREFIX];
        prefix.copy_from_slice(&frame[..ID_PREFIX]);
        let id_end = ID_PREFIX + u32::from_be_bytes(prefix) as usize;
        if id_end > frame.len() {
            return Err(DododError::Storage("Record frame is truncated".to_string()));
        }
        let id = std::str::from_utf8(&frame[ID_PREFIX..id_end])
            .map_err(|_| DododError::Storage("Record id is not UTF-8".to_string()))?
            .to_string();
        Ok((id, frame[id_end..].to_vec()))
    }

    /// Stage a write of `envelope` under `id`.
    pub fn stage_put(&self, batch: &mut RecordBatch, id: &str, envelope: &[u8]) -> Result<()> {
        let value = self.seal_record(id, envelope)?;
        batch.ops.push(RecordOp::Put {
            key: self.record_key(id),
            value,
        });
        Ok(())
    }

    /// Stage removal of `id`.
    pub fn stage_delete(&self, batch: &mut RecordBatch, id: &str) {
        batch.ops.push(RecordOp::Delete {
            key: self.record_key(id),
        });
    }

    /// Apply every staged write in one transaction.
    pub fn commit(&self, batch: RecordBatch) -> Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        {
            let mut put = tx.prepare_cached(
                "INSERT INTO records (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )?;
            let mut delete = tx.prepare_cached("DELETE FROM records WHERE key = ?1")?;
            for op in &batch.ops {
                match op {
                    RecordOp::Put { key, value } => {
                        put.execute((key, value))?;
                    }
                    RecordOp::Delete { key } => {
                        delete.execute([key])?;
                    }
                }
            }
        }
        tx.commit()?;
        tracing::debug!(parent: &self.span, ops = batch.ops.len(), "record batch committed");
        Ok(())
    }

    /// Envelope stored under `id`.
    pub fn get(&self, id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get_many(&[id])?.pop().flatten())
    }

    /// Envelopes of `ids`, one slot per id, read in one transaction.
    pub fn get_many(&self, ids: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let mut found = Vec::with_capacity(ids.len());
        {
            let mut stmt = tx.prepare_cached("SELECT value FROM records WHERE key = ?1")?;
            for id in ids {
                let sealed: Option<Vec<u8>> = stmt
                    .query_row([self.record_key(id)], |row| row.get(0))
                    .optional()?;
                let envelope = match sealed {
                    Some(sealed) => {
                        let (stored_id, envelope) = self.unseal_record(&sealed)?;
                        if stored_id != *id {
                            return Err(DododError::Storage(format!(
                                "Record key collision for '{}'",
                                id
                            )));
                        }
                        Some(envelope)
                    }
                    None => None,
                };
                found.push(envelope);
            }
        }
        tx.commit()?;
        Ok(found)
    }

    /// Every stored `(id, envelope)` pair.
    pub fn scan(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT value FROM records ORDER BY key")?;
        let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;
        let mut records = Vec::new();
        for sealed in rows {
            records.push(self.unseal_record(&sealed?)?);
        }
        Ok(records)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn close(self) -> Result<()> {
        let conn = self
            .conn
            .into_inner()
            .map_err(|_| DododError::Storage("SQLite connection poisoned".to_string()))?;
        conn.close().map_err(|(_, e)| DododError::from(e))?;
        Ok(())
    }
}
