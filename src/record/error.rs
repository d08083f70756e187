//! Record and database error types.

use thiserror::Error;

use super::field::DataType;

/// Errors raised by the record object model, dependency graph, and loader.
#[derive(Error, Debug)]
pub enum Error {
    /// A required argument or reference was absent.
    #[error("null argument: {0}")]
    NullArgument(&'static str),

    /// An internal invariant was violated.
    #[error("corrupt data structure: {0}")]
    CorruptDataStructure(String),

    /// A name or handle lookup failed.
    #[error("not found: {0}")]
    NotFound(String),

    /// A value was outside its declared range or dimensions.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// The operation would violate an ownership precondition.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Mismatched datatypes in an assignment or conversion.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Datatype the destination declares.
        expected: DataType,
        /// Datatype that was supplied.
        actual: DataType,
    },

    /// The requested conversion or feature is not implemented.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A fixed capacity would be exceeded.
    #[error("would exceed limit: {0}")]
    WouldExceedLimit(String),

    /// A database description line could not be parsed.
    #[error("unparseable description: {0}")]
    Syntax(String),

    /// File I/O failure while reading a database description.
    #[error("database file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for record-layer operations.
pub type Result<T> = std::result::Result<T, Error>;
