//! Search index.
//!
//! The index is an in-memory SQLite database: analysed text lives in an
//! FTS5 table, exact terms, numbers, dates and geo points in plain tables,
//! and each document's stored fields as JSON. For the `snapshot` kind the
//! database is serialized, sealed with the index data key and written
//! atomically under `<root>/store/` after every applied batch. For the
//! `memory` kind nothing is persisted and the coordinator rebuilds the
//! index from the record store on open.

mod analysis;
mod executor;
mod facets;
mod geo;
mod hits;
mod query;
mod query_string;
mod request;
mod result;
mod store;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::Span;

use crate::crypto::SecretKey;
use crate::error::{DododError, Result};
use crate::mapping::IndexMapping;

pub use analysis::tokenize;
pub use geo::{decode_geohash, haversine_distance, parse_distance, GeoPoint};
pub use query::{MatchOperator, Query};
pub use query_string::parse_query_string;
pub use request::{
    DateRangeRequest, FacetRequest, HighlightRequest, HighlightStyle, NumericRangeRequest,
    SearchRequest, DEFAULT_SIZE,
};
pub use result::{
    DateRangeFacet, Explanation, FacetResult, Location, NumericRangeFacet, SearchHit,
    SearchResult, TermFacet,
};
pub use store::{CancelToken, IndexBatch, IndexStore, SNAPSHOT_FILE};

/// Index store directory under the store root.
pub const INDEX_STORE_DIR: &str = "store";

/// How the index is kept between sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum IndexStoreKind {
    /// Encrypted snapshot under `<root>/store/`, with its own key registry.
    #[default]
    Snapshot,
    /// Memory only; rebuilt from the record store on open.
    Memory,
}

impl IndexStoreKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IndexStoreKind::Snapshot => "snapshot",
            IndexStoreKind::Memory => "memory",
        }
    }

    /// Directory holding the index key registry, for kinds that persist.
    pub fn key_registry_dir(self, root: &Path) -> Option<PathBuf> {
        match self {
            IndexStoreKind::Snapshot => Some(root.join(INDEX_STORE_DIR)),
            IndexStoreKind::Memory => None,
        }
    }
}

impl fmt::Display for IndexStoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexStoreKind {
    type Err = DododError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "snapshot" => Ok(IndexStoreKind::Snapshot),
            "memory" => Ok(IndexStoreKind::Memory),
            other => Err(DododError::Index(format!(
                "unknown index store kind '{}'",
                other
            ))),
        }
    }
}

/// Everything needed to open an index for one store root.
#[derive(Debug, Clone)]
pub struct IndexOpenRequest<'a> {
    pub root: &'a Path,
    pub mapping: IndexMapping,
    pub kind: IndexStoreKind,
    pub secret_key: Option<&'a SecretKey>,
    pub span: Span,
}

/// Opens the search index for the coordinator.
pub trait IndexOpener: Send + Sync {
    fn open(&self, request: IndexOpenRequest<'_>) -> Result<IndexStore>;
}

/// Default opener backed by [`IndexStore::open`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteIndexOpener;

impl IndexOpener for SqliteIndexOpener {
    fn open(&self, request: IndexOpenRequest<'_>) -> Result<IndexStore> {
        IndexStore::open(request)
    }
}
