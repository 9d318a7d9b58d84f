//! Error types for KINDCACHE operations

use thiserror::Error;

/// Key construction, encoding and resolution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Missing key: {context}")]
    Missing { context: String },

    #[error("Failed to decode key: {reason}")]
    Decode { reason: String },

    #[error("Incomplete key of kind {kind} cannot be used here")]
    Incomplete { kind: String },
}

/// Schema registration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Record type {type_name} is not registered")]
    UnregisteredType { type_name: String },

    #[error("Record type {type_name} registered more than once")]
    DuplicateType { type_name: String },

    #[error("Field {field} declared more than once on {type_name}")]
    DuplicateField { type_name: String, field: String },

    #[error("External name {external_name} used by more than one field on {type_name}")]
    DuplicateExternalName {
        type_name: String,
        external_name: String,
    },

    #[error("Field name {field} is reserved on {type_name}")]
    ReservedField { type_name: String, field: String },

    #[error("Field {field} on {type_name} references unregistered record type {nested}")]
    UnregisteredNestedType {
        type_name: String,
        field: String,
        nested: String,
    },
}

/// Conversion errors between records and their store or flat representations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Failed to serialize {type_name}: {reason}")]
    Serialization { type_name: String, reason: String },

    #[error("Failed to deserialize {type_name}: {reason}")]
    Deserialization { type_name: String, reason: String },

    #[error("Legacy field {field} is nested deeper than {max_depth} levels")]
    LegacyDepthExceeded { field: String, max_depth: usize },
}

/// Store collaborator errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Incomplete key of kind {kind} cannot be read or deleted")]
    IncompleteKey { kind: String },

    #[error("Unknown transaction: {transaction}")]
    UnknownTransaction { transaction: String },

    #[error("Invalid cursor: {reason}")]
    InvalidCursor { reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Backend error: {reason}")]
    Backend { reason: String },
}

/// Cache collaborator errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache connection is closed")]
    Closed,

    #[error("Cache lock poisoned")]
    LockPoisoned,

    #[error("Cache backend error: {reason}")]
    Backend { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Transaction orchestration errors raised by the data client itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("A transaction is already active on this client")]
    Nested,

    #[error("Transaction function panicked: {message}")]
    Panicked { message: String },
}

/// Master error type for all KINDCACHE errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KindError {
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
}

impl KindError {
    /// Whether this is a missing-key failure.
    pub fn is_missing_key(&self) -> bool {
        matches!(self, KindError::Key(KeyError::Missing { .. }))
    }

    /// Whether this is a malformed opaque key failure.
    pub fn is_decode_error(&self) -> bool {
        matches!(self, KindError::Key(KeyError::Decode { .. }))
    }
}

/// Result type alias for KINDCACHE operations.
pub type KindResult<T> = Result<T, KindError>;

// =============================================================================
// TESTS
// =============================================================================
