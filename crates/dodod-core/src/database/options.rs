//! Runtime configuration of a [`Database`](super::Database).

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tracing::Span;

use crate::crypto::{Argon2idHasher, KdfParams, PasswordHasher};
use crate::index::{IndexOpener, IndexStoreKind, SqliteIndexOpener};

/// Documents returned per page by [`Database::simple_search`](super::Database::simple_search).
pub const DEFAULT_SEARCH_RESULT_LIMIT: usize = 20;

/// Options for opening a store.
///
/// ```
/// use dodod_core::{IndexStoreKind, Options};
///
/// let options = Options::new("/tmp/notes")
///     .with_password("correct horse")
///     .with_index_store_kind(IndexStoreKind::Memory)
///     .with_search_result_limit(50);
/// assert_eq!(options.search_result_limit(), 50);
/// ```
pub struct Options {
    path: PathBuf,
    password: Option<SecretString>,
    index_store_kind: IndexStoreKind,
    search_result_limit: usize,
    kdf_params: KdfParams,
    hasher: Option<Arc<dyn PasswordHasher>>,
    index_opener: Arc<dyn IndexOpener>,
    span: Option<Span>,
}

impl Options {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            password: None,
            index_store_kind: IndexStoreKind::default(),
            search_result_limit: DEFAULT_SEARCH_RESULT_LIMIT,
            kdf_params: KdfParams::default(),
            hasher: None,
            index_opener: Arc::new(SqliteIndexOpener),
            span: None,
        }
    }

    /// Protect a new store with `password`, or unlock an existing one.
    /// An empty password means no protection.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.set_password(password.into());
        self
    }

    /// Kind used when the store is created; an existing config keeps its own.
    pub fn with_index_store_kind(mut self, kind: IndexStoreKind) -> Self {
        self.index_store_kind = kind;
        self
    }

    pub fn with_search_result_limit(mut self, limit: usize) -> Self {
        self.search_result_limit = limit;
        self
    }

    /// Argon2id cost of the default hasher.
    pub fn with_kdf_params(mut self, params: KdfParams) -> Self {
        self.kdf_params = params;
        self
    }

    /// Replace the default Argon2id hasher.
    pub fn with_password_hasher(mut self, hasher: Arc<dyn PasswordHasher>) -> Self {
        self.hasher = Some(hasher);
        self
    }

    pub fn with_index_opener(mut self, opener: Arc<dyn IndexOpener>) -> Self {
        self.index_opener = opener;
        self
    }

    /// Span every event of the store is emitted under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn index_store_kind(&self) -> IndexStoreKind {
        self.index_store_kind
    }

    pub fn search_result_limit(&self) -> usize {
        self.search_result_limit
    }

    pub fn kdf_params(&self) -> KdfParams {
        self.kdf_params
    }

    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    pub(crate) fn password(&self) -> Option<&str> {
        self.password.as_ref().map(|p| p.expose_secret())
    }

    pub(crate) fn set_password(&mut self, password: String) {
        self.password = if password.is_empty() {
            None
        } else {
            Some(SecretString::from(password))
        };
    }

    pub(crate) fn set_search_result_limit(&mut self, limit: usize) {
        self.search_result_limit = limit;
    }

    pub(crate) fn hasher(&self) -> Arc<dyn PasswordHasher> {
        match &self.hasher {
            Some(hasher) => Arc::clone(hasher),
            None => Arc::new(Argon2idHasher::new(self.kdf_params)),
        }
    }

    pub(crate) fn index_opener(&self) -> &dyn IndexOpener {
        self.index_opener.as_ref()
    }

    pub(crate) fn span(&self) -> Span {
        match &self.span {
            Some(span) => span.clone(),
            None => tracing::info_span!("dodod", path = %self.path.display()),
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("path", &self.path)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("index_store_kind", &self.index_store_kind)
            .field("search_result_limit", &self.search_result_limit)
            .field("kdf_params", &self.kdf_params)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = Options::new("/tmp/db");
        assert_eq!(options.path(), Path::new("/tmp/db"));
        assert_eq!(options.index_store_kind(), IndexStoreKind::Snapshot);
        assert_eq!(options.search_result_limit(), DEFAULT_SEARCH_RESULT_LIMIT);
        assert_eq!(options.kdf_params(), KdfParams::default());
        assert!(!options.has_password());
    }

    #[test]
    fn test_empty_password_means_unprotected() {
        let options = Options::new("/tmp/db").with_password("");
        assert!(options.password().is_none());
    }

    #[test]
    fn test_debug_redacts_password() {
        let options = Options::new("/tmp/db").with_password("hunter2");
        let rendered = format!("{:?}", options);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("REDACTED"));
        assert_eq!(options.password(), Some("hunter2"));
    }
}
