//! Storage coordinator.
//!
//! A [`Database`] owns the schema registry, the credential manager and,
//! while open, both engines: the encrypted record store under
//! `<root>/database/` and the search index. Every mutation writes the record
//! store first and the index second; there is no rollback between the two.
//! A failed index batch after a committed record transaction surfaces as
//! `IndexStoreTransactionFailed` and is reconciled by re-running the
//! index-only mutation or by [`Database::reindex`].

mod mutation;
mod options;
mod read;
mod search;

use std::collections::BTreeMap;

use tracing::Span;

use crate::credentials::CredentialManager;
use crate::document::{Document, Model};
use crate::envelope;
use crate::error::{DododError, Result};
use crate::index::{IndexOpenRequest, IndexStore, IndexStoreKind};
use crate::registry::SchemaRegistry;
use crate::storage::{RecordStore, RECORD_STORE_DIR};

pub use options::{Options, DEFAULT_SEARCH_RESULT_LIMIT};
pub use search::{OutputType, SearchOutput, SimpleSearchResult};

/// Both engines of an open store.
struct Engines {
    records: RecordStore,
    index: IndexStore,
    kind: IndexStoreKind,
}

/// An embedded, optionally encrypted document store with a search index.
pub struct Database {
    options: Options,
    registry: SchemaRegistry,
    credentials: CredentialManager,
    engines: Option<Engines>,
    span: Span,
}

impl Database {
    pub fn new(options: Options) -> Self {
        let span = options.span();
        let credentials = CredentialManager::new(options.path(), options.hasher(), span.clone());
        Self {
            options,
            registry: SchemaRegistry::new(),
            credentials,
            engines: None,
            span,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Whether both engines are open.
    pub fn is_ready(&self) -> bool {
        self.engines.is_some()
    }

    /// Kind of the open index, as recorded in the store's config.
    pub fn index_store_kind(&self) -> Option<IndexStoreKind> {
        self.engines.as_ref().map(|engines| engines.kind)
    }

    pub fn set_search_result_limit(&mut self, limit: usize) {
        self.options.set_search_result_limit(limit);
    }

    /// Register a document type. Registrations made after [`open`](Self::open)
    /// reach the index mapping on the next open.
    ///
    /// # Errors
    ///
    /// - `DocumentTypeAlreadyRegistered` for a repeated type name
    /// - `FieldTypeMismatch` when a field name is reused with another kind
    /// - mapping errors from compiling the type's fields
    pub fn register<T: Model>(&mut self) -> Result<()> {
        self.registry.register::<T>()?;
        if self.is_ready() {
            tracing::warn!(
                parent: &self.span,
                doc_type = T::TYPE_NAME,
                "type registered while open; its mapping applies from the next open"
            );
        }
        Ok(())
    }

    /// Names of every registered field, sorted.
    pub fn registered_fields(&self) -> Vec<String> {
        self.registry.registered_fields()
    }

    /// A zero value of every registered type, by name.
    pub fn registered_types(&self) -> BTreeMap<String, Box<dyn Document>> {
        self.registry.registered_types()
    }

    pub fn encode_document(&self, document: &dyn Document) -> Result<Vec<u8>> {
        envelope::encode(document)
    }

    pub fn decode_document(&self, bytes: &[u8]) -> Result<Box<dyn Document>> {
        envelope::decode(bytes, &self.registry)
    }

    pub fn decode_document_into(&self, bytes: &[u8], target: &mut dyn Document) -> Result<()> {
        envelope::decode_into(bytes, target)
    }

    fn engines(&self) -> Result<&Engines> {
        self.engines.as_ref().ok_or(DododError::DatabaseNotOpen)
    }

    /// Open both engines and mark the store ready.
    ///
    /// The config record is created on first open. A `memory` index is
    /// rebuilt from the record store.
    ///
    /// # Errors
    ///
    /// - `EmptyPath` if no root directory was given
    /// - `PasswordChangeIncomplete` while an interrupted rotation is pending
    /// - `WrongPassword` / `EmptyPassword` for a protected store
    /// - `InvalidConfigFile` / `JsonParseFailed` for an unreadable config
    /// - engine errors from opening the index or the record store
    pub fn open(&mut self) -> Result<()> {
        if self.options.path().as_os_str().is_empty() {
            return Err(DododError::EmptyPath);
        }
        if self.is_ready() {
            return Ok(());
        }
        if let Some(journal) = self.credentials.pending_rotation()? {
            return Err(DododError::PasswordChangeIncomplete {
                completed: journal.completed_summary(),
            });
        }

        let root = self.options.path().to_path_buf();
        std::fs::create_dir_all(root.join(RECORD_STORE_DIR))?;

        let credentials = self
            .credentials
            .load_or_init(self.options.password(), self.options.index_store_kind())?;
        let kind = credentials.index_store_kind;

        let index = self.options.index_opener().open(IndexOpenRequest {
            root: &root,
            mapping: self.registry.index_mapping(),
            kind,
            secret_key: credentials.secret_key.as_ref(),
            span: self.span.clone(),
        })?;

        let records = match RecordStore::open(
            &root.join(RECORD_STORE_DIR),
            credentials.secret_key.as_ref(),
            self.span.clone(),
        ) {
            Ok(records) => records,
            Err(err) => {
                if let Err(close_err) = index.close() {
                    tracing::warn!(parent: &self.span, error = %close_err, "index close failed");
                }
                return Err(err);
            }
        };

        self.engines = Some(Engines {
            records,
            index,
            kind,
        });

        if kind == IndexStoreKind::Memory {
            if let Err(err) = self.reindex() {
                if let Err(close_err) = self.close() {
                    tracing::warn!(parent: &self.span, error = %close_err, "close failed");
                }
                return Err(err);
            }
        }

        tracing::info!(
            parent: &self.span,
            protected = credentials.record.is_password_protected,
            index_store = %kind,
            types = self.registry.registered_types().len(),
            "database opened"
        );
        Ok(())
    }

    /// Close both engines. Closing a closed store does nothing.
    ///
    /// Both engines are closed even when the first fails; the first error
    /// is returned.
    pub fn close(&mut self) -> Result<()> {
        let Some(engines) = self.engines.take() else {
            return Ok(());
        };

        let records = engines.records.close();
        let index = engines.index.close();
        tracing::info!(parent: &self.span, "database closed");
        records.and(index)
    }

    /// Change the store's password from the one in [`Options`] to
    /// `new_password`, resuming an interrupted rotation if one is pending.
    ///
    /// # Errors
    ///
    /// - `EmptyPath` / `EmptyPassword` for missing inputs
    /// - `WrongPassword` if the current password does not verify
    /// - `DatabasePasswordChangeFailed` / `IndexStorePasswordChangeFailed`
    ///   when rewriting an engine's key registry fails; the rotation can be
    ///   resumed by calling this again
    pub fn change_password(&mut self, new_password: &str) -> Result<()> {
        if self.options.path().as_os_str().is_empty() {
            return Err(DododError::EmptyPath);
        }
        let current = self.options.password().unwrap_or_default().to_string();
        self.credentials.change_password(&current, new_password)?;
        self.options.set_password(new_password.to_string());
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(parent: &self.span, error = %err, "close on drop failed");
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("options", &self.options)
            .field("ready", &self.is_ready())
            .finish()
    }
}
