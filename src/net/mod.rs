//! Wire protocol engine and the network field client API.
//!
//! Every frame starts with a fixed seven-word big-endian header; payload
//! encoding is negotiated per connection. [`ServerConnection`] drives one
//! synchronous request/response stream; [`NetworkField`] binds a local
//! `"record.field"` name to a remote field with cached handles.

mod callback;
mod connection;
mod error;
mod field;
mod format;
mod header;
mod message;

pub use callback::{CallbackHandler, CallbackType};
pub use connection::{ConnectionConfig, ServerConnection, TcpTransport, Transport};
pub use error::{Error, Result, StatusCode};
pub use field::NetworkField;
pub use format::{decode_value, decode_value_flat, encode_value, CodecOptions, DataFormat, NEGOTIATE};
pub use header::{read_frame, NetHeader};
pub use message::{base_type, is_response, MessageType};

/// Frame magic sentinel; a received frame not starting with this value
/// means the byte stream is desynchronized.
pub const MAGIC: u32 = 0xe7e9_fcfe;

/// Full header size: seven 32-bit words.
pub const HEADER_SIZE: usize = 28;

/// Upper bound on one frame, header plus payload. A peer claiming a
/// larger frame is rejected before any receive buffer is allocated.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Fixed width of the space-padded name field in PUT_ARRAY_BY_NAME
/// payloads: a 40-byte record name, a dot, and a 40-byte field name. The
/// value being written always starts at this offset.
pub const FIELD_NAME_WIDTH: usize = 81;

/// Bit set on `MESSAGE_TYPE` in server replies.
pub const RESPONSE_BIT: u32 = 1 << 27;

/// `MESSAGE_TYPE` bit reserved for error signaling.
pub const ERROR_BIT: u32 = 1 << 31;

/// Bit set on `MESSAGE_ID` when the frame is an asynchronous callback
/// rather than a reply to a pending request.
pub const CALLBACK_BIT: u32 = 1 << 31;

/// Mask selecting the 31-bit wrapping sequence number of `MESSAGE_ID`.
pub const SEQUENCE_MASK: u32 = CALLBACK_BIT - 1;

/// Connection-level option ids for GET_OPTION / SET_OPTION.
pub mod option {
    /// The payload format the server prefers (read-only).
    pub const NATIVE_DATAFMT: u32 = 1;
    /// The payload format in effect for this connection.
    pub const DATAFMT: u32 = 2;
    /// Transmit `long`/`ulong` values as 64-bit integers.
    pub const USE_64BIT_LONGS: u32 = 3;
    /// The server's native word size in bits (read-only).
    pub const WORDSIZE: u32 = 4;
}

/// Per-field attribute ids for GET_ATTRIBUTE / SET_ATTRIBUTE.
pub mod attribute {
    /// Minimum change that triggers a value-changed callback.
    pub const VALUE_CHANGE_THRESHOLD: u32 = 1;
    /// Whether the server polls the field for changes.
    pub const POLL: u32 = 2;
    /// Whether remote writes are rejected.
    pub const READ_ONLY: u32 = 3;
    /// Whether all remote access is rejected.
    pub const NO_ACCESS: u32 = 4;
}
