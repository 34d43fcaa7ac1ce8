//! SQLite backed index store.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use rusqlite::serialize::OwnedData;
use rusqlite::{params, Connection, DatabaseName, OptionalExtension, Transaction};
use serde_json::Value;
use tracing::Span;

use super::analysis::{analyze, AnalyzedDocument};
use super::executor::Executor;
use super::request::SearchRequest;
use super::result::SearchResult;
use super::{facets, hits, IndexOpenRequest, IndexStoreKind};
use crate::credentials::key_registry;
use crate::crypto::{seal, unseal, SecretKey};
use crate::error::{DododError, Result};
use crate::mapping::IndexMapping;

/// Sealed index snapshot under the index store directory.
pub const SNAPSHOT_FILE: &str = "index.snapshot";

const MAPPING_FINGERPRINT_KEY: &str = "mapping_fingerprint";

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS docs (
        id TEXT PRIMARY KEY,
        doc_type TEXT NOT NULL,
        stored TEXT NOT NULL
    );

    CREATE VIRTUAL TABLE IF NOT EXISTS text_fields USING fts5(
        doc_id UNINDEXED,
        field UNINDEXED,
        in_all UNINDEXED,
        content,
        tokenize = 'unicode61 remove_diacritics 0'
    );
    CREATE VIRTUAL TABLE IF NOT EXISTS text_vocab USING fts5vocab(text_fields, 'row');
    CREATE VIRTUAL TABLE IF NOT EXISTS text_terms USING fts5vocab(text_fields, 'instance');

    CREATE TABLE IF NOT EXISTS keyword_fields (
        doc_id TEXT NOT NULL,
        field TEXT NOT NULL,
        in_all INTEGER NOT NULL,
        term TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS keyword_fields_term ON keyword_fields(field, term);
    CREATE INDEX IF NOT EXISTS keyword_fields_doc ON keyword_fields(doc_id);

    CREATE TABLE IF NOT EXISTS numeric_fields (
        doc_id TEXT NOT NULL,
        field TEXT NOT NULL,
        in_all INTEGER NOT NULL,
        kind TEXT NOT NULL,
        value REAL NOT NULL
    );
    CREATE INDEX IF NOT EXISTS numeric_fields_value ON numeric_fields(field, kind, value);
    CREATE INDEX IF NOT EXISTS numeric_fields_doc ON numeric_fields(doc_id);

    CREATE TABLE IF NOT EXISTS geo_fields (
        doc_id TEXT NOT NULL,
        field TEXT NOT NULL,
        lat REAL NOT NULL,
        lon REAL NOT NULL
    );
    CREATE INDEX IF NOT EXISTS geo_fields_field ON geo_fields(field);
    CREATE INDEX IF NOT EXISTS geo_fields_doc ON geo_fields(doc_id);
"#;

/// Cancels a running search from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(DododError::SearchCancelled);
        }
        Ok(())
    }
}

#[derive(Debug)]
enum IndexOp {
    Index(AnalyzedDocument),
    Delete(String),
}

/// Index mutations applied together by [`IndexStore::apply`].
#[derive(Debug)]
pub struct IndexBatch<'a> {
    mapping: &'a IndexMapping,
    ops: Vec<IndexOp>,
}

impl IndexBatch<'_> {
    /// Analyse `payload` and stage it under `id`, replacing any earlier copy.
    pub fn index(&mut self, id: &str, doc_type: &str, payload: &Value) -> Result<()> {
        let analyzed = analyze(id, doc_type, payload, self.mapping)?;
        self.ops.push(IndexOp::Index(analyzed));
        Ok(())
    }

    pub fn delete(&mut self, id: &str) {
        self.ops.push(IndexOp::Delete(id.to_string()));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

struct Snapshot {
    path: PathBuf,
    data_key: SecretKey,
}

/// Search index over an in-memory SQLite database.
pub struct IndexStore {
    conn: Mutex<Connection>,
    mapping: IndexMapping,
    kind: IndexStoreKind,
    snapshot: Option<Snapshot>,
    span: Span,
}

impl IndexStore {
    /// Open the index for `request.root`, loading the snapshot if one exists.
    ///
    /// # Errors
    ///
    /// - `WrongPassword` if the index key registry is sealed with another key
    /// - `Index` if the snapshot cannot be decrypted or loaded
    pub fn open(request: IndexOpenRequest<'_>) -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;

        let snapshot = match request.kind.key_registry_dir(request.root) {
            Some(dir) => {
                fs::create_dir_all(&dir)?;
                let data_key = key_registry::open_or_create(&dir, request.secret_key)?;
                let path = dir.join(SNAPSHOT_FILE);
                if path.is_file() {
                    load_snapshot(&mut conn, &path, &data_key)?;
                }
                Some(Snapshot { path, data_key })
            }
            None => None,
        };
        conn.execute_batch(SCHEMA)?;

        let fingerprint = request.mapping.fingerprint()?;
        let recorded: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                [MAPPING_FINGERPRINT_KEY],
                |row| row.get(0),
            )
            .optional()?;
        match recorded {
            None => record_fingerprint(&conn, &fingerprint)?,
            Some(recorded) if recorded != fingerprint => {
                tracing::warn!(
                    parent: &request.span,
                    "index mapping changed since the index was built; run reindex to apply it"
                );
            }
            Some(_) => {}
        }

        tracing::info!(
            parent: &request.span,
            kind = %request.kind,
            "index store opened"
        );
        Ok(Self {
            conn: Mutex::new(conn),
            mapping: request.mapping,
            kind: request.kind,
            snapshot,
            span: request.span,
        })
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DododError::Index("index connection poisoned".to_string()))
    }

    pub fn kind(&self) -> IndexStoreKind {
        self.kind
    }

    pub fn mapping(&self) -> &IndexMapping {
        &self.mapping
    }

    pub fn batch(&self) -> IndexBatch<'_> {
        IndexBatch {
            mapping: &self.mapping,
            ops: Vec::new(),
        }
    }

    /// Apply `batch` in one transaction, then persist the snapshot.
    pub fn apply(&self, batch: IndexBatch<'_>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.write(batch, false)
    }

    /// Replace the whole index with `batch` and record the current mapping.
    pub fn rebuild(&self, batch: IndexBatch<'_>) -> Result<()> {
        self.write(batch, true)
    }

    /// Remove every document from the index.
    pub fn clear(&self) -> Result<()> {
        self.rebuild(self.batch())
    }

    /// Apply `batch` and persist it. When the snapshot cannot be written the
    /// in-memory index is rolled back to the last persisted image, so the
    /// live index never serves a batch that a reopen would lose.
    fn write(&self, batch: IndexBatch<'_>, replace: bool) -> Result<()> {
        let count = batch.len();
        let mut conn = self.lock_conn()?;

        let previous = match self.snapshot {
            Some(_) => Some(conn.serialize(DatabaseName::Main)?.to_vec()),
            None => None,
        };

        let tx = conn.transaction()?;
        if replace {
            for table in [
                "docs",
                "text_fields",
                "keyword_fields",
                "numeric_fields",
                "geo_fields",
            ] {
                tx.execute(&format!("DELETE FROM {}", table), [])?;
            }
            record_fingerprint(&tx, &self.mapping.fingerprint()?)?;
        }
        for op in batch.ops {
            match op {
                IndexOp::Index(doc) => {
                    remove_document(&tx, &doc.id)?;
                    insert_document(&tx, &doc)?;
                }
                IndexOp::Delete(id) => remove_document(&tx, &id)?,
            }
        }
        tx.commit()?;

        if let Err(err) = self.persist(&conn) {
            if let Some(previous) = previous {
                if let Err(restore) = restore_image(&mut conn, &previous) {
                    tracing::error!(
                        parent: &self.span,
                        error = %restore,
                        "index could not be rolled back after a failed snapshot write"
                    );
                }
            }
            return Err(err);
        }
        tracing::debug!(parent: &self.span, ops = count, replace, "index batch applied");
        Ok(())
    }

    fn persist(&self, conn: &Connection) -> Result<()> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(());
        };
        let data = conn.serialize(DatabaseName::Main)?;
        let sealed = seal(&snapshot.data_key, data.as_ref())?;
        crate::fs::write_atomic(&snapshot.path, &sealed)
    }

    pub fn doc_count(&self) -> Result<u64> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM docs", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Every indexed id, sorted.
    pub fn indexed_ids(&self) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT id FROM docs ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Run `request`, checking `cancel` between execution stages.
    ///
    /// # Errors
    ///
    /// - `InvalidSearchRequest` for option combinations that cannot be honoured
    /// - `SearchCancelled` if `cancel` fires before the search completes
    pub fn search(
        &self,
        request: &SearchRequest,
        cancel: Option<&CancelToken>,
    ) -> Result<SearchResult> {
        let started = Instant::now();
        request.validate()?;
        let check = || cancel.map_or(Ok(()), CancelToken::check);

        let conn = self.lock_conn()?;
        let mut executor = Executor::new(&conn, cancel, request.explain);
        let matches = executor.execute(&request.query)?;
        let terms = executor.into_terms();
        check()?;

        let mut facet_results = BTreeMap::new();
        if !request.facets.is_empty() {
            let matched: HashSet<&str> = matches.keys().map(String::as_str).collect();
            for facet in &request.facets {
                facet_results.insert(
                    facet.name.clone(),
                    facets::compute(&conn, facet, &matched, &self.span)?,
                );
                check()?;
            }
        }

        let page = hits::collect(&conn, request, matches, &terms)?;
        check()?;

        tracing::debug!(
            parent: &self.span,
            total = page.total,
            returned = page.hits.len(),
            "search executed"
        );
        Ok(SearchResult {
            total: page.total,
            max_score: page.max_score,
            took: started.elapsed(),
            hits: page.hits,
            facets: facet_results,
        })
    }

    /// Release the connection. The snapshot is already current.
    pub fn close(self) -> Result<()> {
        let span = self.span;
        let conn = self
            .conn
            .into_inner()
            .map_err(|_| DododError::Index("index connection poisoned".to_string()))?;
        conn.close().map_err(|(_, e)| DododError::Sqlite(e))?;
        tracing::info!(parent: &span, "index store closed");
        Ok(())
    }
}

impl std::fmt::Debug for IndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexStore")
            .field("kind", &self.kind)
            .field("snapshot", &self.snapshot.as_ref().map(|s| &s.path))
            .finish()
    }
}

fn record_fingerprint(conn: &Connection, fingerprint: &str) -> Result<()> {
    conn.execute(
        r#"
            INSERT INTO meta (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        params![MAPPING_FINGERPRINT_KEY, fingerprint],
    )?;
    Ok(())
}

fn remove_document(tx: &Transaction<'_>, id: &str) -> Result<()> {
    for table in ["text_fields", "keyword_fields", "numeric_fields", "geo_fields"] {
        tx.execute(&format!("DELETE FROM {} WHERE doc_id = ?1", table), [id])?;
    }
    tx.execute("DELETE FROM docs WHERE id = ?1", [id])?;
    Ok(())
}

fn insert_document(tx: &Transaction<'_>, doc: &AnalyzedDocument) -> Result<()> {
    let stored = serde_json::to_string(&doc.stored)?;
    tx.execute(
        "INSERT INTO docs (id, doc_type, stored) VALUES (?1, ?2, ?3)",
        params![doc.id, doc.doc_type, stored],
    )?;

    let mut text = tx.prepare_cached(
        "INSERT INTO text_fields (doc_id, field, in_all, content) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for entry in &doc.text {
        text.execute(params![doc.id, entry.field, entry.in_all, entry.content])?;
    }

    let mut keyword = tx.prepare_cached(
        "INSERT INTO keyword_fields (doc_id, field, in_all, term) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for entry in &doc.keywords {
        keyword.execute(params![doc.id, entry.field, entry.in_all, entry.term])?;
    }

    let mut numeric = tx.prepare_cached(
        "INSERT INTO numeric_fields (doc_id, field, in_all, kind, value) VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for entry in &doc.numbers {
        numeric.execute(params![
            doc.id,
            entry.field,
            entry.in_all,
            entry.kind.as_str(),
            entry.value
        ])?;
    }

    let mut geo = tx.prepare_cached(
        "INSERT INTO geo_fields (doc_id, field, lat, lon) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for entry in &doc.geo {
        geo.execute(params![doc.id, entry.field, entry.point.lat, entry.point.lon])?;
    }
    Ok(())
}

fn restore_image(conn: &mut Connection, image: &[u8]) -> Result<()> {
    let owned = owned_data_from_bytes(image)?;
    conn.deserialize(DatabaseName::Main, owned, false)?;
    Ok(())
}

fn load_snapshot(conn: &mut Connection, path: &Path, data_key: &SecretKey) -> Result<()> {
    let sealed = fs::read(path)?;
    let plaintext = unseal(data_key, &sealed)
        .map_err(|_| DododError::Index("index snapshot could not be decrypted".to_string()))?;
    restore_image(conn, &plaintext)
}

fn owned_data_from_bytes(bytes: &[u8]) -> Result<OwnedData> {
    if bytes.is_empty() {
        return Err(DododError::Index("index snapshot is empty".to_string()));
    }

    let size: i32 = bytes
        .len()
        .try_into()
        .map_err(|_| DododError::Index("index snapshot too large".to_string()))?;

    // SAFETY: sqlite3_malloc returns a valid pointer or null; null is checked
    // immediately below. The size fits in i32.
    let raw = unsafe { rusqlite::ffi::sqlite3_malloc(size) as *mut u8 };
    let ptr = NonNull::new(raw)
        .ok_or_else(|| DododError::Index("SQLite allocation failed".to_string()))?;

    // SAFETY:
    // - `ptr` was allocated above by sqlite3_malloc with exactly `bytes.len()` bytes
    // - `bytes` is valid for reads of `bytes.len()` bytes and does not overlap
    //   the fresh allocation
    // - `OwnedData::from_raw_nonnull` takes ownership of the sqlite3_malloc'd
    //   buffer, which SQLite frees when it is dropped or consumed
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len());
        Ok(OwnedData::from_raw_nonnull(ptr, bytes.len()))
    }
}
