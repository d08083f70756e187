//! Record-and-network framework for instrument control systems.
//!
//! The record layer models instruments as named records with typed field
//! arrays, built from driver templates, linked into a bidirectional
//! dependency graph, and loaded from line-oriented database files with
//! two-pass forward-reference resolution. The network layer speaks a
//! framed binary protocol to remote servers: a seven-word big-endian
//! header, negotiated payload formats, cached field handles, and
//! value-change callbacks.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use recnet::net::{ConnectionConfig, NetworkField, ServerConnection};
//! use recnet::record::DataType;
//!
//! let server = Arc::new(ServerConnection::open(
//!     "localhost:9727",
//!     ConnectionConfig::default(),
//! )?);
//!
//! let mut position = NetworkField::new(Arc::clone(&server), "motor1.position");
//! let value = position.get(DataType::Double)?;
//! println!("motor1 is at {}", value.as_double()?);
//! # Ok::<(), recnet::net::Error>(())
//! ```
//!
//! # Layers
//!
//! - [`record`] — drivers, records, fields, the dependency graph, and the
//!   database loader. All state lives in an explicit [`record::Database`].
//! - [`net`] — the wire protocol engine ([`net::ServerConnection`]) and
//!   the client field API ([`net::NetworkField`]).

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod net;
pub mod record;

pub use net::{ConnectionConfig, NetworkField, ServerConnection};
pub use record::{Database, DataType, Driver, DriverTable, FieldValue, RecordId};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default server port.
pub const DEFAULT_PORT: u16 = 9727;
