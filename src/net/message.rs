//! Message type codes and the response/callback bit conventions.

use std::fmt;

use super::{ERROR_BIT, RESPONSE_BIT};

/// Request-side message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    /// Read a field addressed by `"record.field"` name.
    GetArrayByName = 0x1001,
    /// Write a field addressed by `"record.field"` name.
    PutArrayByName = 0x1002,
    /// Read a field addressed by a cached handle pair.
    GetArrayByHandle = 0x1003,
    /// Write a field addressed by a cached handle pair.
    PutArrayByHandle = 0x1004,
    /// Translate a name into a handle pair without transferring data.
    GetNetworkHandle = 0x2001,
    /// Ask for the datatype and dimensions of a named field.
    GetFieldType = 0x2005,
    /// Read per-field metadata.
    GetAttribute = 0x2101,
    /// Write per-field metadata.
    SetAttribute = 0x2102,
    /// Report the client's username and program name.
    SetClientInfo = 0x3001,
    /// Read a connection-level option.
    GetOption = 0x3002,
    /// Write a connection-level option.
    SetOption = 0x3003,
    /// Subscribe to value-change notifications.
    AddCallback = 0x4001,
    /// Unsubscribe from value-change notifications.
    DeleteCallback = 0x4002,
    /// Unsolicited server-to-client notification.
    Callback = 0x9001,
}

impl MessageType {
    /// Convert from the wire code (request side, no response bit).
    #[must_use]
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x1001 => Some(Self::GetArrayByName),
            0x1002 => Some(Self::PutArrayByName),
            0x1003 => Some(Self::GetArrayByHandle),
            0x1004 => Some(Self::PutArrayByHandle),
            0x2001 => Some(Self::GetNetworkHandle),
            0x2005 => Some(Self::GetFieldType),
            0x2101 => Some(Self::GetAttribute),
            0x2102 => Some(Self::SetAttribute),
            0x3001 => Some(Self::SetClientInfo),
            0x3002 => Some(Self::GetOption),
            0x3003 => Some(Self::SetOption),
            0x4001 => Some(Self::AddCallback),
            0x4002 => Some(Self::DeleteCallback),
            0x9001 => Some(Self::Callback),
            _ => None,
        }
    }

    /// Convert to the wire code.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// The wire code of the server reply to this request.
    #[must_use]
    pub const fn response(self) -> u32 {
        self.as_u32() | RESPONSE_BIT
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GetArrayByName => "GET_ARRAY_BY_NAME",
            Self::PutArrayByName => "PUT_ARRAY_BY_NAME",
            Self::GetArrayByHandle => "GET_ARRAY_BY_HANDLE",
            Self::PutArrayByHandle => "PUT_ARRAY_BY_HANDLE",
            Self::GetNetworkHandle => "GET_NETWORK_HANDLE",
            Self::GetFieldType => "GET_FIELD_TYPE",
            Self::GetAttribute => "GET_ATTRIBUTE",
            Self::SetAttribute => "SET_ATTRIBUTE",
            Self::SetClientInfo => "SET_CLIENT_INFO",
            Self::GetOption => "GET_OPTION",
            Self::SetOption => "SET_OPTION",
            Self::AddCallback => "ADD_CALLBACK",
            Self::DeleteCallback => "DELETE_CALLBACK",
            Self::Callback => "CALLBACK",
        };
        write!(f, "{name}")
    }
}

/// Strip the response and error bits from a raw message type word.
#[must_use]
pub fn base_type(raw: u32) -> u32 {
    raw & !(RESPONSE_BIT | ERROR_BIT)
}

/// True if the raw message type word carries the server-response bit.
#[must_use]
pub fn is_response(raw: u32) -> bool {
    raw & RESPONSE_BIT != 0
}
