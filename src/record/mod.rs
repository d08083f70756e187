//! Record/field object model, driver registry, dependency graph, and the
//! line-oriented database loader.
//!
//! A [`Database`] is an explicit context owning an arena of [`Record`]s.
//! Each record is built from a [`Driver`] template registered in a
//! [`DriverTable`] and exposes an ordered array of named, typed fields.

mod database;
mod driver;
mod error;
mod field;
mod graph;
mod loader;
#[allow(clippy::module_inception)]
mod record;

pub use database::{Database, FixupEntry, LoadPolicy};
pub use driver::{DefaultSupport, Driver, DriverTable, FieldTemplate, RecordSupport};
pub use error::{Error, Result};
pub use field::{DataType, FieldFlags, FieldRef, RecordField, ValueData, MAX_ELEMENTS};
pub use field::FieldValue;
pub use loader::split_tokens;
pub(crate) use loader::parse_elements;
pub use record::{Record, RecordData, RecordFlags};

slotmap::new_key_type! {
    /// Stable arena key identifying one record within a [`Database`].
    pub struct RecordId;
}

/// Three-level taxonomy: superclass -> class -> type.
///
/// Class and type codes are driver-assigned; superclasses are fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Superclass {
    /// Communication interfaces (serial ports, GPIB buses, ...).
    Interface = 20,
    /// Physical devices (motors, detectors, timers, MCAs, ...).
    Device = 30,
    /// Scan descriptions.
    Scan = 40,
    /// Process variables without hardware behind them.
    Variable = 50,
    /// Connections to remote servers.
    Server = 60,
    /// Standalone operations.
    Operation = 70,
}

impl Superclass {
    /// Parse the superclass token used in database descriptions.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "interface" => Some(Self::Interface),
            "device" => Some(Self::Device),
            "scan" => Some(Self::Scan),
            "variable" => Some(Self::Variable),
            "server" => Some(Self::Server),
            "operation" => Some(Self::Operation),
            _ => None,
        }
    }

    /// Token spelling used in database descriptions.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Interface => "interface",
            Self::Device => "device",
            Self::Scan => "scan",
            Self::Variable => "variable",
            Self::Server => "server",
            Self::Operation => "operation",
        }
    }
}
