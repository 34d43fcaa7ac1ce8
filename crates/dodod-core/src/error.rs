//! Error types for dodod core operations.
//!
//! Every failure the store can report is a variant of [`DododError`]. The
//! variants follow the failure classes of the store: validation, lifecycle,
//! data integrity, cryptography and the two transactional engines.

use thiserror::Error;

/// Result type alias for dodod operations.
pub type Result<T> = std::result::Result<T, DododError>;

/// Core error type for dodod operations.
#[derive(Debug, Error)]
pub enum DododError {
    // --- validation ---
    /// The database root path was empty
    #[error("path can not be empty")]
    EmptyPath,

    /// A password was required but empty
    #[error("password can not be empty")]
    EmptyPassword,

    /// A document without an identifier was passed to a mutation
    #[error("document id can not be empty")]
    IdCanNotBeEmpty,

    /// The value does not expose a usable identity, type name or payload
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// The envelope type name is not known to the registry
    #[error("document type is not registered: {0}")]
    DocumentTypeNotRegistered(String),

    /// The type name was registered before
    #[error("document type is already registered: {0}")]
    DocumentTypeAlreadyRegistered(String),

    /// Two registered types disagree on the kind of a shared field
    #[error("field type mismatch for '{field}': registered as {registered}, found {requested}")]
    FieldTypeMismatch {
        field: String,
        registered: String,
        requested: String,
    },

    /// A boolean mapping option carried a non-boolean literal
    #[error("non boolean value '{value}' for boolean field '{key}'")]
    NonBooleanValueForBooleanField { key: String, value: String },

    /// A mapping option could not be applied
    #[error("invalid index mapping: {0}")]
    InvalidMapping(String),

    /// The search request could not be turned into a query
    #[error("invalid search request: {0}")]
    InvalidSearchRequest(String),

    // --- lifecycle ---
    /// The operation requires an open database
    #[error("database is not open")]
    DatabaseNotOpen,

    /// A password change was interrupted and must be resumed first
    #[error("password change is incomplete (completed steps: {completed})")]
    PasswordChangeIncomplete { completed: String },

    /// A search was cancelled through its token
    #[error("search cancelled")]
    SearchCancelled,

    // --- data integrity ---
    /// An envelope buffer violates its framing
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The config record is missing or empty
    #[error("invalid config file")]
    InvalidConfigFile,

    /// The config record is not valid JSON
    #[error("failed to parse JSON: {0}")]
    JsonParseFailed(String),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    // --- cryptography ---
    /// The password does not match the encoded key
    #[error("wrong password")]
    WrongPassword,

    /// Encryption or decryption error
    #[error("encryption error: {0}")]
    Crypto(String),

    // --- transactional ---
    /// The record store transaction failed to commit
    #[error("database transaction failed: {0}")]
    DatabaseTransactionFailed(String),

    /// The index batch failed to apply after the record store committed
    #[error("index store transaction failed: {0}")]
    IndexStoreTransactionFailed(String),

    /// The record store key registry could not be re-encrypted
    #[error("database password change failed: {0}")]
    DatabasePasswordChangeFailed(String),

    /// The index store key registry could not be re-encrypted
    #[error("index store password change failed: {0}")]
    IndexStorePasswordChangeFailed(String),

    // --- engines ---
    /// Storage backend error
    #[error("storage error: {0}")]
    Storage(String),

    /// Index backend error
    #[error("index error: {0}")]
    Index(String),

    /// SQLite engine error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload serialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DododError {
    /// Name of the error variant, stable across message changes.
    pub fn kind(&self) -> &'static str {
        match self {
            DododError::EmptyPath => "EmptyPath",
            DododError::EmptyPassword => "EmptyPassword",
            DododError::IdCanNotBeEmpty => "IdCanNotBeEmpty",
            DododError::InvalidDocument(_) => "InvalidDocument",
            DododError::DocumentTypeNotRegistered(_) => "DocumentTypeNotRegistered",
            DododError::DocumentTypeAlreadyRegistered(_) => "DocumentTypeAlreadyRegistered",
            DododError::FieldTypeMismatch { .. } => "FieldTypeMismatch",
            DododError::NonBooleanValueForBooleanField { .. } => "NonBooleanValueForBooleanField",
            DododError::InvalidMapping(_) => "InvalidMapping",
            DododError::InvalidSearchRequest(_) => "InvalidSearchRequest",
            DododError::DatabaseNotOpen => "DatabaseNotOpen",
            DododError::PasswordChangeIncomplete { .. } => "PasswordChangeIncomplete",
            DododError::SearchCancelled => "SearchCancelled",
            DododError::InvalidData(_) => "InvalidData",
            DododError::InvalidConfigFile => "InvalidConfigFile",
            DododError::JsonParseFailed(_) => "JsonParseFailed",
            DododError::NotFound(_) => "NotFound",
            DododError::WrongPassword => "WrongPassword",
            DododError::Crypto(_) => "Crypto",
            DododError::DatabaseTransactionFailed(_) => "DatabaseTransactionFailed",
            DododError::IndexStoreTransactionFailed(_) => "IndexStoreTransactionFailed",
            DododError::DatabasePasswordChangeFailed(_) => "DatabasePasswordChangeFailed",
            DododError::IndexStorePasswordChangeFailed(_) => "IndexStorePasswordChangeFailed",
            DododError::Storage(_) => "Storage",
            DododError::Index(_) => "Index",
            DododError::Sqlite(_) => "Sqlite",
            DododError::Io(_) => "Io",
            DododError::Json(_) => "Json",
        }
    }
}
