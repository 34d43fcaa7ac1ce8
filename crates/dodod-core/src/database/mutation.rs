//! Create, update and delete across both engines.

use crate::document::Document;
use crate::envelope;
use crate::error::{DododError, Result};
use crate::storage::RecordBatch;

use super::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Put,
    Replace,
    Remove,
}

/// Which engines a mutation reaches.
#[derive(Debug, Clone, Copy)]
struct Targets {
    records: bool,
    index: bool,
}

const BOTH: Targets = Targets {
    records: true,
    index: true,
};
const INDEX_ONLY: Targets = Targets {
    records: false,
    index: true,
};
const RECORDS_ONLY: Targets = Targets {
    records: true,
    index: false,
};

impl Database {
    /// Store `documents` in the record store and the index.
    ///
    /// The record transaction commits before the index batch applies. When
    /// the index fails afterwards the records are already durable and the
    /// call returns `IndexStoreTransactionFailed`.
    pub fn create(&self, documents: &[&dyn Document]) -> Result<()> {
        self.write(documents, Operation::Put, BOTH)
    }

    /// Replace `documents` in both engines (delete, then insert).
    pub fn update(&self, documents: &[&dyn Document]) -> Result<()> {
        self.write(documents, Operation::Replace, BOTH)
    }

    /// Remove `documents` from both engines by id.
    pub fn delete(&self, documents: &[&dyn Document]) -> Result<()> {
        self.write(documents, Operation::Remove, BOTH)
    }

    pub fn create_index(&self, documents: &[&dyn Document]) -> Result<()> {
        self.write(documents, Operation::Put, INDEX_ONLY)
    }

    pub fn update_index(&self, documents: &[&dyn Document]) -> Result<()> {
        self.write(documents, Operation::Replace, INDEX_ONLY)
    }

    pub fn delete_index(&self, documents: &[&dyn Document]) -> Result<()> {
        self.write(documents, Operation::Remove, INDEX_ONLY)
    }

    pub fn create_document(&self, documents: &[&dyn Document]) -> Result<()> {
        self.write(documents, Operation::Put, RECORDS_ONLY)
    }

    pub fn update_document(&self, documents: &[&dyn Document]) -> Result<()> {
        self.write(documents, Operation::Replace, RECORDS_ONLY)
    }

    pub fn delete_document(&self, documents: &[&dyn Document]) -> Result<()> {
        self.write(documents, Operation::Remove, RECORDS_ONLY)
    }

    fn write(&self, documents: &[&dyn Document], op: Operation, targets: Targets) -> Result<()> {
        let engines = self.engines()?;
        let mut records = RecordBatch::default();
        let mut index = engines.index.batch();

        for document in documents {
            let id = document.document_id();
            if id.is_empty() {
                return Err(DododError::IdCanNotBeEmpty);
            }
            if document.document_type().is_empty() {
                return Err(DododError::InvalidDocument(format!(
                    "document '{}' has no type name",
                    id
                )));
            }

            if targets.records {
                if op != Operation::Put {
                    engines.records.stage_delete(&mut records, id);
                }
                if op != Operation::Remove {
                    engines
                        .records
                        .stage_put(&mut records, id, &envelope::encode(*document)?)?;
                }
            }

            if targets.index {
                match op {
                    Operation::Remove => index.delete(id),
                    Operation::Put | Operation::Replace => {
                        if op == Operation::Replace {
                            index.delete(id);
                        }
                        index.index(id, document.document_type(), &document.to_value()?)?;
                    }
                }
            }
        }

        if !records.is_empty() {
            engines
                .records
                .commit(records)
                .map_err(|e| DododError::DatabaseTransactionFailed(e.to_string()))?;
        }

        if let Err(err) = engines.index.apply(index) {
            tracing::error!(
                parent: &self.span,
                error = %err,
                documents = documents.len(),
                records_committed = targets.records,
                "index batch failed; run the index mutation again or reindex"
            );
            return Err(DododError::IndexStoreTransactionFailed(err.to_string()));
        }

        tracing::debug!(
            parent: &self.span,
            op = ?op,
            documents = documents.len(),
            records = targets.records,
            index = targets.index,
            "mutation applied"
        );
        Ok(())
    }
}
