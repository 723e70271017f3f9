use std::io;
use thiserror::Error;

/// Unified error type for the table network.
///
/// Configuration problems (bad options, unsupported input) and invariant
/// violations (deleting something still referenced, wrong parent count) are
/// reported synchronously to the caller. A reset that interrupts an in-flight
/// iteration is never an error; the iteration simply stops.
#[derive(Debug, Error)]
pub enum OrigraphError {
    /// No table with this id exists in the model
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// No class with this id exists in the model
    #[error("Class not found: {0}")]
    ClassNotFound(String),

    /// No model with this id exists in the registry
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// The object is still referenced by derived tables or classes
    #[error("Can't delete in-use {kind} {id}: {reason}")]
    InUse {
        kind: &'static str,
        id: String,
        reason: String,
    },

    /// A table kind was constructed with the wrong number of parents
    #[error("{kind} requires exactly {expected} parent table(s), got {found}")]
    ParentCount {
        kind: &'static str,
        expected: usize,
        found: usize,
    },

    /// A required option was missing or malformed
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// An operation was applied to the wrong kind of class or item
    #[error("Invalid class kind: {0}")]
    InvalidClassKind(String),

    /// An edge side other than `source` or `target` was requested
    #[error("\"{0}\" is an invalid side")]
    InvalidSide(String),

    /// No parser is available for this extension
    #[error("Unsupported extension: {0}")]
    UnsupportedExtension(String),

    /// A file exceeded the in-memory size guard
    #[error("File is {size_mb:.1}MB, larger than the {limit_mb}MB limit; pass skip_size_check to load it anyway")]
    FileTooLarge { size_mb: f64, limit_mb: u64 },

    /// Text could not be parsed into rows
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// A shared lock was poisoned by a panicking holder
    #[error("Failed to acquire lock: {0}")]
    Lock(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl OrigraphError {
    /// True when the error is the deletion guard refusing an in-use object.
    pub fn is_in_use(&self) -> bool {
        matches!(self, OrigraphError::InUse { .. })
    }

    pub(crate) fn in_use(kind: &'static str, id: &str, reason: impl Into<String>) -> Self {
        OrigraphError::InUse {
            kind,
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

pub type OrigraphResult<T> = Result<T, OrigraphError>;
