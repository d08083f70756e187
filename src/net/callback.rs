//! Client-side callback subscriptions.

use crate::record::FieldValue;

/// Kinds of server-driven notification a client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CallbackType {
    /// Fired when a field's value changes by more than its threshold.
    ValueChanged = 1,
    /// Fired on every server poll of the field.
    Poll = 2,
}

impl CallbackType {
    /// Convert from the wire code.
    #[must_use]
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::ValueChanged),
            2 => Some(Self::Poll),
            _ => None,
        }
    }

    /// Convert to the wire code.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Handler invoked with the callback id and the decoded field value
/// whenever a matching notification frame arrives.
pub type CallbackHandler = Box<dyn FnMut(u32, FieldValue) + Send>;
