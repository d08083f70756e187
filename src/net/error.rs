//! Network error types and wire status codes.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::record;
use crate::record::DataType;

/// Numeric status carried in the `STATUS_CODE` header word.
///
/// 1000 means success; everything else is an error kind. Unknown codes are
/// preserved so newer peers can extend the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub u32);

impl StatusCode {
    /// Operation completed.
    pub const SUCCESS: Self = Self(1000);
    /// A required argument was absent.
    pub const NULL_ARGUMENT: Self = Self(1001);
    /// A value was outside its declared range.
    pub const ILLEGAL_ARGUMENT: Self = Self(1002);
    /// An invariant was violated on the server.
    pub const CORRUPT_DATA_STRUCTURE: Self = Self(1003);
    /// Name lookup failed.
    pub const NOT_FOUND: Self = Self(1007);
    /// A fixed capacity would be exceeded.
    pub const WOULD_EXCEED_LIMIT: Self = Self(1008);
    /// Transport or framing failure.
    pub const NETWORK_IO_ERROR: Self = Self(1016);
    /// The requested coercion or feature is not implemented.
    pub const UNSUPPORTED: Self = Self(1024);
    /// Allocation failure on the server.
    pub const OUT_OF_MEMORY: Self = Self(1025);
    /// The operation timed out.
    pub const TIMED_OUT: Self = Self(1038);
    /// Datatypes did not match and could not be coerced.
    pub const TYPE_MISMATCH: Self = Self(1040);
    /// The operation violates an access or ownership rule.
    pub const PERMISSION_DENIED: Self = Self(1041);
    /// A cached record/field handle is no longer valid.
    pub const BAD_HANDLE: Self = Self(1042);

    /// True for [`StatusCode::SUCCESS`].
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 == Self::SUCCESS.0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised by the wire protocol engine and the network field API.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport or framing failure.
    #[error("network I/O error: {0}")]
    NetworkIo(String),

    /// Underlying socket failure.
    #[error("network I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking wait expired.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// A received frame did not start with the magic sentinel.
    #[error("desynchronized: bad frame magic {found:#010x}")]
    BadMagic {
        /// The first word actually received.
        found: u32,
    },

    /// A frame was shorter than its header claims.
    #[error("truncated frame: need {needed} bytes, got {got}")]
    TruncatedFrame {
        /// Bytes the header requires.
        needed: usize,
        /// Bytes actually available.
        got: usize,
    },

    /// The reply datatype cannot be converted to what the caller asked for.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Datatype the caller requested.
        expected: DataType,
        /// Datatype the peer sent.
        actual: DataType,
    },

    /// The requested coercion, format, or option is not implemented.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A name lookup failed locally.
    #[error("not found: {0}")]
    NotFound(String),

    /// A request argument was malformed.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// The peer replied with an error status.
    #[error("server error {code}: {message}")]
    Server {
        /// Wire status code.
        code: StatusCode,
        /// Formatted message carried in the reply payload.
        message: String,
    },

    /// An error propagated from the record layer.
    #[error(transparent)]
    Record(#[from] record::Error),
}

impl Error {
    /// The wire status code this error maps to.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NetworkIo(_) | Self::Io(_) | Self::BadMagic { .. } | Self::TruncatedFrame { .. } => {
                StatusCode::NETWORK_IO_ERROR
            }
            Self::TimedOut(_) => StatusCode::TIMED_OUT,
            Self::TypeMismatch { .. } => StatusCode::TYPE_MISMATCH,
            Self::Unsupported(_) => StatusCode::UNSUPPORTED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::IllegalArgument(_) => StatusCode::ILLEGAL_ARGUMENT,
            Self::Server { code, .. } => *code,
            Self::Record(err) => match err {
                record::Error::NullArgument(_) => StatusCode::NULL_ARGUMENT,
                record::Error::CorruptDataStructure(_) => StatusCode::CORRUPT_DATA_STRUCTURE,
                record::Error::NotFound(_) => StatusCode::NOT_FOUND,
                record::Error::IllegalArgument(_) | record::Error::Syntax(_) => {
                    StatusCode::ILLEGAL_ARGUMENT
                }
                record::Error::PermissionDenied(_) => StatusCode::PERMISSION_DENIED,
                record::Error::TypeMismatch { .. } => StatusCode::TYPE_MISMATCH,
                record::Error::Unsupported(_) => StatusCode::UNSUPPORTED,
                record::Error::WouldExceedLimit(_) => StatusCode::WOULD_EXCEED_LIMIT,
                record::Error::Io(_) => StatusCode::NETWORK_IO_ERROR,
            },
        }
    }

    /// True for failures that a reconnect may clear.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NetworkIo(_) | Self::Io(_) | Self::TimedOut(_)
        )
    }
}

/// Result alias for network-layer operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_back_from_errors() {
        assert_eq!(
            Error::TimedOut(Duration::from_secs(1)).status_code(),
            StatusCode::TIMED_OUT
        );
        assert_eq!(
            Error::Record(record::Error::PermissionDenied("x".into())).status_code(),
            StatusCode::PERMISSION_DENIED
        );
        assert!(StatusCode::SUCCESS.is_success());
        assert!(!StatusCode::BAD_HANDLE.is_success());
    }
}
