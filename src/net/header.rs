//! The fixed seven-word frame header.
//!
//! Wire layout, all words big-endian:
//!
//! ```text
//! MAGIC | HEADER_LENGTH | MESSAGE_LENGTH | MESSAGE_TYPE | STATUS_CODE | DATA_TYPE | MESSAGE_ID
//! ```
//!
//! Peers speaking an older protocol revision may send a shorter header;
//! missing trailing words default to zero and message-id matching is
//! disabled for such peers rather than failing.

use bytes::{BufMut, Bytes, BytesMut};

use super::error::{Error, Result, StatusCode};
use super::{CALLBACK_BIT, HEADER_SIZE, MAGIC, MAX_MESSAGE_SIZE, SEQUENCE_MASK};

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetHeader {
    /// Header length in bytes as sent by the peer.
    pub header_length: u32,
    /// Payload length in bytes.
    pub message_length: u32,
    /// Raw message type word, including response/error bits.
    pub message_type: u32,
    /// Wire status code.
    pub status_code: StatusCode,
    /// Datatype code of the payload, zero when not applicable.
    pub data_type: u32,
    /// Message id word; `None` when the peer's header is too short to
    /// carry one.
    pub message_id: Option<u32>,
}

impl NetHeader {
    /// Header for an outgoing full-length frame.
    #[must_use]
    pub fn new(message_type: u32, status_code: StatusCode, data_type: u32, message_id: u32) -> Self {
        Self {
            header_length: HEADER_SIZE as u32,
            message_length: 0,
            message_type,
            status_code,
            data_type,
            message_id: Some(message_id),
        }
    }

    /// True when the message-id callback bit is set.
    #[must_use]
    pub fn is_callback(&self) -> bool {
        self.message_id
            .is_some_and(|id| id & CALLBACK_BIT != 0)
    }

    /// The 31-bit sequence number (or callback id) of the message id.
    #[must_use]
    pub fn sequence(&self) -> Option<u32> {
        self.message_id.map(|id| id & SEQUENCE_MASK)
    }

    /// Encode a complete frame: this header plus `payload`.
    #[must_use]
    pub fn encode_frame(&self, payload: &[u8]) -> Bytes {
        let mut bytes = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        bytes.put_u32(MAGIC);
        bytes.put_u32(HEADER_SIZE as u32);
        bytes.put_u32(payload.len() as u32);
        bytes.put_u32(self.message_type);
        bytes.put_u32(self.status_code.0);
        bytes.put_u32(self.data_type);
        bytes.put_u32(self.message_id.unwrap_or(0));
        bytes.put_slice(payload);
        bytes.freeze()
    }

    /// Parse a header from the front of a frame.
    ///
    /// The magic sentinel is checked before anything else is interpreted.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 12 {
            return Err(Error::TruncatedFrame {
                needed: 12,
                got: bytes.len(),
            });
        }
        let magic = read_u32(bytes, 0);
        if magic != MAGIC {
            return Err(Error::BadMagic { found: magic });
        }
        let header_length = read_u32(bytes, 4);
        if header_length < 12 {
            return Err(Error::NetworkIo(format!(
                "peer claims a {header_length}-byte header"
            )));
        }
        let available = bytes.len().min(header_length as usize);
        let word = |offset: usize| -> u32 {
            if offset + 4 <= available {
                read_u32(bytes, offset)
            } else {
                0
            }
        };
        let message_length = read_u32(bytes, 8);
        let message_type = word(12);
        let status_code = if available >= 20 {
            StatusCode(read_u32(bytes, 16))
        } else {
            StatusCode::SUCCESS
        };
        let data_type = word(20);
        let message_id = if available >= 28 {
            Some(read_u32(bytes, 24))
        } else {
            None
        };
        Ok(Self {
            header_length,
            message_length,
            message_type,
            status_code,
            data_type,
            message_id,
        })
    }

    /// Split a complete frame into header and payload.
    pub fn split_frame(frame: &[u8]) -> Result<(Self, &[u8])> {
        let header = Self::parse(frame)?;
        let start = (header.header_length as usize).min(frame.len());
        let needed = header.header_length as usize + header.message_length as usize;
        if frame.len() < needed {
            return Err(Error::TruncatedFrame {
                needed,
                got: frame.len(),
            });
        }
        let payload = &frame[start..start + header.message_length as usize];
        Ok((header, payload))
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_be_bytes(word)
}

/// Read one complete frame from a byte stream.
///
/// Validates the magic sentinel as soon as the first word arrives, so a
/// desynchronized stream is rejected before any payload is read.
pub fn read_frame<R: std::io::Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut prefix = [0u8; 12];
    reader.read_exact(&mut prefix)?;
    let magic = read_u32(&prefix, 0);
    if magic != MAGIC {
        return Err(Error::BadMagic { found: magic });
    }
    let header_length = read_u32(&prefix, 4) as usize;
    let message_length = read_u32(&prefix, 8) as usize;
    if header_length < 12 {
        return Err(Error::NetworkIo(format!(
            "peer claims a {header_length}-byte header"
        )));
    }
    let total = header_length + message_length;
    if total > MAX_MESSAGE_SIZE {
        return Err(Error::NetworkIo(format!(
            "peer claims a {total}-byte frame, limit is {MAX_MESSAGE_SIZE}"
        )));
    }
    let mut frame = vec![0u8; total];
    frame[..12].copy_from_slice(&prefix);
    reader.read_exact(&mut frame[12..])?;
    Ok(frame)
}
