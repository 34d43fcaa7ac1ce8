//! Search, reindex and integrity checks.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::document::Document;
use crate::envelope::{self, Envelope};
use crate::error::{DododError, Result};
use crate::index::{CancelToken, Query, SearchRequest, SearchResult};

use super::Database;

/// Page of documents returned by [`Database::simple_search`].
#[derive(Debug)]
pub struct SimpleSearchResult {
    /// Every matching document, regardless of paging.
    pub total: u64,
    pub took: Duration,
    pub documents: Vec<Box<dyn Document>>,
}

/// Shape of the value returned by [`Database::search`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputType {
    /// JSON-encoded result.
    Bytes,
    /// Result as a JSON value.
    Map,
    /// Result as a JSON value whose hits carry their stored document.
    MapIncludeData,
    /// The native result.
    #[default]
    Native,
}

impl OutputType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bytes => "bytes",
            Self::Map => "map",
            Self::MapIncludeData => "map_include_data",
            Self::Native => "native",
        }
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputType {
    type Err = DododError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "" | "native" => Ok(Self::Native),
            "bytes" => Ok(Self::Bytes),
            "map" => Ok(Self::Map),
            "mapincludedata" => Ok(Self::MapIncludeData),
            other => Err(DododError::InvalidSearchRequest(format!(
                "unknown output type '{}'",
                other
            ))),
        }
    }
}

/// Result of [`Database::search`] in the requested [`OutputType`].
#[derive(Debug)]
pub enum SearchOutput {
    Bytes(Vec<u8>),
    Map(Value),
    Native(SearchResult),
}

impl SearchOutput {
    pub fn into_native(self) -> Option<SearchResult> {
        match self {
            Self::Native(result) => Some(result),
            _ => None,
        }
    }

    pub fn into_map(self) -> Option<Value> {
        match self {
            Self::Map(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl Database {
    /// Run a query-string search and load a page of matching documents.
    ///
    /// The page size is the configured search result limit; `offset` skips
    /// that many hits. Hits whose record is gone are skipped.
    pub fn simple_search(&self, query: &str, offset: usize) -> Result<SimpleSearchResult> {
        let started = Instant::now();
        let engines = self.engines()?;
        let request = SearchRequest::new(Query::query_string(query)?)
            .with_size(self.options.search_result_limit())
            .with_from(offset);
        let result = engines.index.search(&request, None)?;

        let ids: Vec<&str> = result.hits.iter().map(|hit| hit.id.as_str()).collect();
        let found = engines.records.get_many(&ids)?;
        let mut documents = Vec::with_capacity(found.len());
        for (id, bytes) in ids.iter().zip(found) {
            match bytes {
                Some(bytes) => documents.push(envelope::decode(&bytes, &self.registry)?),
                None => tracing::warn!(
                    parent: &self.span,
                    id = %id,
                    "indexed document has no record; skipped"
                ),
            }
        }

        Ok(SimpleSearchResult {
            total: result.total,
            took: started.elapsed(),
            documents,
        })
    }

    /// Run a map-shaped search request.
    ///
    /// ```no_run
    /// use dodod_core::{Database, Options, OutputType};
    /// use serde_json::json;
    ///
    /// # fn main() -> dodod_core::Result<()> {
    /// let mut db = Database::new(Options::new("/tmp/notes"));
    /// db.open()?;
    /// let output = db.search(
    ///     &json!({
    ///         "query": {"name": "QueryString", "p": {"q": "+title:rust"}},
    ///         "size": 5,
    ///         "facets": [{"name": "tags", "field": "tags", "size": 3}],
    ///     }),
    ///     OutputType::Map,
    /// )?;
    /// println!("{:?}", output.into_map());
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// - `DatabaseNotOpen` if the store is closed
    /// - `InvalidSearchRequest` for malformed requests or queries
    pub fn search(&self, input: &Value, output: OutputType) -> Result<SearchOutput> {
        let request = SearchRequest::from_value(input)?;
        let result = self.search_request(&request)?;

        match output {
            OutputType::Native => Ok(SearchOutput::Native(result)),
            OutputType::Map => Ok(SearchOutput::Map(serde_json::to_value(&result)?)),
            OutputType::Bytes => Ok(SearchOutput::Bytes(serde_json::to_vec(&result)?)),
            OutputType::MapIncludeData => {
                let result = self.hydrate(result)?;
                Ok(SearchOutput::Map(serde_json::to_value(&result)?))
            }
        }
    }

    /// Run a native search request.
    pub fn search_request(&self, request: &SearchRequest) -> Result<SearchResult> {
        self.engines()?.index.search(request, None)
    }

    /// Run a native search request that stops with `SearchCancelled` once
    /// `cancel` fires.
    pub fn search_in_context(
        &self,
        request: &SearchRequest,
        cancel: &CancelToken,
    ) -> Result<SearchResult> {
        self.engines()?.index.search(request, Some(cancel))
    }

    /// Attach each hit's stored payload, one record lookup per hit.
    fn hydrate(&self, mut result: SearchResult) -> Result<SearchResult> {
        let engines = self.engines()?;
        for hit in &mut result.hits {
            match engines.records.get(&hit.id)? {
                Some(bytes) => {
                    let envelope = Envelope::parse(&bytes)?;
                    hit.data = Some(serde_json::from_slice(envelope.payload)?);
                }
                None => tracing::warn!(
                    parent: &self.span,
                    id = %hit.id,
                    "indexed document has no record; no data attached"
                ),
            }
        }
        Ok(result)
    }

    /// Clear the index and rebuild it from every stored record.
    ///
    /// Returns the number of documents indexed.
    pub fn reindex(&self) -> Result<u64> {
        let engines = self.engines()?;
        let records = engines.records.scan()?;

        let mut batch = engines.index.batch();
        for (id, bytes) in &records {
            let envelope = Envelope::parse(bytes)?;
            let payload: Value = serde_json::from_slice(envelope.payload)?;
            batch.index(id, envelope.type_name, &payload)?;
        }
        engines.index.rebuild(batch)?;

        tracing::info!(parent: &self.span, documents = records.len(), "index rebuilt");
        Ok(records.len() as u64)
    }

    /// Verify that every record is a valid envelope and that the record
    /// store and the index hold the same ids.
    ///
    /// # Errors
    ///
    /// Returns `Storage` naming the first discrepancy found.
    pub fn check_integrity(&self) -> Result<()> {
        let engines = self.engines()?;

        let mut record_ids = BTreeSet::new();
        for (id, bytes) in engines.records.scan()? {
            Envelope::parse(&bytes).map_err(|e| {
                DododError::Storage(format!("record '{}' is not a valid envelope: {}", id, e))
            })?;
            record_ids.insert(id);
        }
        let indexed_ids: BTreeSet<String> = engines.index.indexed_ids()?.into_iter().collect();

        if let Some(id) = record_ids.difference(&indexed_ids).next() {
            return Err(DododError::Storage(format!(
                "record '{}' is missing from the index",
                id
            )));
        }
        if let Some(id) = indexed_ids.difference(&record_ids).next() {
            return Err(DododError::Storage(format!(
                "indexed document '{}' has no record",
                id
            )));
        }

        tracing::debug!(parent: &self.span, documents = record_ids.len(), "integrity verified");
        Ok(())
    }
}
