//! Record store.
//!
//! Durable key-value storage of document envelopes under `<root>/database/`.
//! Neither identifiers nor payloads are stored in plaintext: keys are keyed
//! hashes of document ids and values are sealed with the store's data key.

mod records;

pub use records::{RecordBatch, RecordStore, RECORD_STORE_FILE};

/// Record store directory under the store root.
pub const RECORD_STORE_DIR: &str = "database";
