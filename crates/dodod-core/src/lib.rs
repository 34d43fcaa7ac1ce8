//! # Dodod Core
//!
//! An embedded document store that keeps an encrypted key-value record
//! store and a full-text, faceted search index in sync.
//!
//! ## Architecture
//!
//! - **document**: the traits application types implement to be stored
//! - **envelope**: the length-prefixed binary framing of stored documents
//! - **registry**: registered document types and their field kinds
//! - **mapping**: index mappings compiled from field descriptors
//! - **crypto**: password hashing, secret keys and sealing
//! - **credentials**: the on-disk config record, key registries and password rotation
//! - **storage**: the encrypted record store
//! - **index**: the search index, its query language and facets
//! - **database**: the coordinator tying both engines together
//!
//! ## On disk
//!
//! ```text
//! <root>/dodod.json              config record
//! <root>/database/               record store and its key registry
//! <root>/store/                  index snapshot and its key registry (snapshot kind)
//! ```

pub mod credentials;
pub mod crypto;
pub mod database;
pub mod document;
pub mod envelope;
pub mod error;
pub mod fs;
pub mod index;
pub mod mapping;
pub mod registry;
pub mod storage;

pub use crypto::{KdfParams, PasswordHasher};
pub use database::{Database, Options, OutputType, SearchOutput, SimpleSearchResult};
pub use document::{Document, DocumentSchema, FieldDescriptor, FieldKind, Model};
pub use error::{DododError, Result};
pub use index::{CancelToken, IndexStoreKind, Query, SearchRequest, SearchResult};

/// Core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
