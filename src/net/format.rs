//! Negotiable payload encodings for field values.
//!
//! Four formats are defined: ASCII (self-describing numeric text), RAW
//! (native binary), XDR (portable big-endian binary with 4-byte
//! alignment), and BYTESWAP (native binary with every element
//! byte-reversed, for peers of the opposite endianness).

use bytes::{BufMut, Bytes, BytesMut};

use crate::record::{DataType, FieldValue, ValueData};

use super::error::{Error, Result};
use crate::record::split_tokens;

/// Wire value requesting the peer's preferred format during negotiation.
pub const NEGOTIATE: u32 = 0xffff_ffff;

/// Payload encoding negotiated per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DataFormat {
    /// Human-readable whitespace-separated text.
    Ascii = 1,
    /// Native binary; fastest, requires matching byte order and word size.
    Raw = 2,
    /// Portable big-endian binary with 4-byte alignment.
    Xdr = 3,
    /// Native binary with a forced endian flip on every element.
    ByteSwap = 4,
}

impl DataFormat {
    /// Convert from the wire option value.
    #[must_use]
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Ascii),
            2 => Some(Self::Raw),
            3 => Some(Self::Xdr),
            4 => Some(Self::ByteSwap),
            _ => None,
        }
    }

    /// Convert to the wire option value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Per-connection codec settings.
#[derive(Debug, Clone, Copy)]
pub struct CodecOptions {
    /// Payload encoding in effect.
    pub format: DataFormat,
    /// Transmit long/ulong/hex values as 64-bit integers.
    pub use_64bit_longs: bool,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            format: DataFormat::Ascii,
            use_64bit_longs: false,
        }
    }
}

fn long_width(opts: &CodecOptions) -> usize {
    if opts.use_64bit_longs {
        8
    } else {
        4
    }
}

fn num_elements(dims: &[u32]) -> usize {
    if dims.is_empty() {
        1
    } else {
        dims.iter().map(|d| *d as usize).product()
    }
}

/// Encode a field value under the connection's negotiated format.
pub fn encode_value(value: &FieldValue, opts: &CodecOptions) -> Result<Bytes> {
    match opts.format {
        DataFormat::Ascii => encode_ascii(value),
        DataFormat::Raw => encode_binary(value, opts, Endian::Native),
        DataFormat::ByteSwap => encode_binary(value, opts, Endian::Swapped),
        DataFormat::Xdr => encode_xdr(value, opts),
    }
}

/// Decode a payload into a value of known datatype and dimensions.
pub fn decode_value(
    bytes: &[u8],
    datatype: DataType,
    dims: &[u32],
    opts: &CodecOptions,
) -> Result<FieldValue> {
    let count = num_elements(dims);
    let data = match opts.format {
        DataFormat::Ascii => return decode_ascii(bytes, datatype, dims),
        DataFormat::Raw => decode_binary(bytes, datatype, count, opts, Endian::Native)?,
        DataFormat::ByteSwap => decode_binary(bytes, datatype, count, opts, Endian::Swapped)?,
        DataFormat::Xdr => decode_xdr(bytes, datatype, count, opts)?,
    };
    FieldValue::new(datatype, dims.to_vec(), data).map_err(Error::Record)
}

/// Decode a payload whose element count is not known in advance, as a
/// 1-D value. Used for callback frames, which carry no dimension info.
pub fn decode_value_flat(bytes: &[u8], datatype: DataType, opts: &CodecOptions) -> Result<FieldValue> {
    let count = match opts.format {
        DataFormat::Ascii => split_tokens(&ascii_text(bytes)?)?.len(),
        DataFormat::Raw | DataFormat::ByteSwap => {
            let width = fixed_width(datatype, opts).ok_or_else(|| {
                Error::Unsupported(format!(
                    "cannot infer the element count of a {datatype} payload"
                ))
            })?;
            if width == 0 || bytes.len() % width != 0 {
                return Err(Error::IllegalArgument(format!(
                    "payload length {} is not a multiple of the {datatype} element size",
                    bytes.len()
                )));
            }
            bytes.len() / width
        }
        DataFormat::Xdr => {
            let width = xdr_width(datatype, opts).ok_or_else(|| {
                Error::Unsupported(format!(
                    "cannot infer the element count of a {datatype} payload"
                ))
            })?;
            if width == 0 || bytes.len() % width != 0 {
                return Err(Error::IllegalArgument(format!(
                    "payload length {} is not a multiple of the {datatype} element size",
                    bytes.len()
                )));
            }
            bytes.len() / width
        }
    };
    let dims = [count as u32];
    decode_value(bytes, datatype, &dims, opts)
}

fn fixed_width(datatype: DataType, opts: &CodecOptions) -> Option<usize> {
    match datatype {
        DataType::Char | DataType::UChar => Some(1),
        DataType::Short | DataType::UShort => Some(2),
        DataType::Bool | DataType::Float => Some(4),
        DataType::Long | DataType::ULong | DataType::Hex => Some(long_width(opts)),
        DataType::Int64 | DataType::UInt64 | DataType::Double => Some(8),
        _ => None,
    }
}

fn xdr_width(datatype: DataType, opts: &CodecOptions) -> Option<usize> {
    match datatype {
        // Char arrays are opaques; inference only works for whole words.
        DataType::Char | DataType::UChar => Some(1),
        DataType::Short | DataType::UShort | DataType::Bool | DataType::Float => Some(4),
        DataType::Long | DataType::ULong | DataType::Hex => Some(long_width(opts)),
        DataType::Int64 | DataType::UInt64 | DataType::Double => Some(8),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Binary (RAW and BYTESWAP)

#[derive(Clone, Copy, PartialEq, Eq)]
enum Endian {
    Native,
    Swapped,
}

fn put_bytes(buf: &mut BytesMut, bytes: &[u8], endian: Endian) {
    match endian {
        Endian::Native => buf.put_slice(bytes),
        Endian::Swapped => {
            for b in bytes.iter().rev() {
                buf.put_u8(*b);
            }
        }
    }
}

fn put_long(buf: &mut BytesMut, v: i64, opts: &CodecOptions, endian: Endian) -> Result<()> {
    if opts.use_64bit_longs {
        put_bytes(buf, &v.to_ne_bytes(), endian);
    } else {
        let narrow = i32::try_from(v).map_err(|_| {
            Error::IllegalArgument(format!(
                "value {v} does not fit the negotiated 32-bit long"
            ))
        })?;
        put_bytes(buf, &narrow.to_ne_bytes(), endian);
    }
    Ok(())
}

fn put_ulong(buf: &mut BytesMut, v: u64, opts: &CodecOptions, endian: Endian) -> Result<()> {
    if opts.use_64bit_longs {
        put_bytes(buf, &v.to_ne_bytes(), endian);
    } else {
        let narrow = u32::try_from(v).map_err(|_| {
            Error::IllegalArgument(format!(
                "value {v} does not fit the negotiated 32-bit ulong"
            ))
        })?;
        put_bytes(buf, &narrow.to_ne_bytes(), endian);
    }
    Ok(())
}

fn encode_binary(value: &FieldValue, opts: &CodecOptions, endian: Endian) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    match value.data() {
        ValueData::Char(v) => {
            for x in v {
                buf.put_i8(*x);
            }
        }
        ValueData::UChar(v) => buf.put_slice(v),
        ValueData::Short(v) => {
            for x in v {
                put_bytes(&mut buf, &x.to_ne_bytes(), endian);
            }
        }
        ValueData::UShort(v) => {
            for x in v {
                put_bytes(&mut buf, &x.to_ne_bytes(), endian);
            }
        }
        ValueData::Bool(v) => {
            for x in v {
                put_bytes(&mut buf, &u32::from(*x).to_ne_bytes(), endian);
            }
        }
        ValueData::Long(v) => {
            if value.datatype() == DataType::Int64 {
                for x in v {
                    put_bytes(&mut buf, &x.to_ne_bytes(), endian);
                }
            } else {
                for x in v {
                    put_long(&mut buf, *x, opts, endian)?;
                }
            }
        }
        ValueData::ULong(v) => {
            if value.datatype() == DataType::UInt64 {
                for x in v {
                    put_bytes(&mut buf, &x.to_ne_bytes(), endian);
                }
            } else {
                for x in v {
                    put_ulong(&mut buf, *x, opts, endian)?;
                }
            }
        }
        ValueData::Float(v) => {
            for x in v {
                put_bytes(&mut buf, &x.to_ne_bytes(), endian);
            }
        }
        ValueData::Double(v) => {
            for x in v {
                put_bytes(&mut buf, &x.to_ne_bytes(), endian);
            }
        }
        ValueData::String(v) => {
            for s in v {
                put_bytes(&mut buf, &(s.len() as u32).to_ne_bytes(), endian);
                buf.put_slice(s.as_bytes());
                pad4(&mut buf);
            }
        }
        ValueData::Record(_) => {
            return Err(Error::Unsupported(
                "record references are not transmitted over the network".into(),
            ))
        }
    }
    Ok(buf.freeze())
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(Error::TruncatedFrame {
                needed: self.pos + n,
                got: self.bytes.len(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn skip_pad4(&mut self) -> Result<()> {
        let over = self.pos % 4;
        if over != 0 {
            self.take(4 - over)?;
        }
        Ok(())
    }
}

fn word<const N: usize>(slice: &[u8], endian: Endian) -> [u8; N] {
    let mut out = [0u8; N];
    match endian {
        Endian::Native => out.copy_from_slice(slice),
        Endian::Swapped => {
            for (i, b) in slice.iter().rev().enumerate() {
                out[i] = *b;
            }
        }
    }
    out
}

fn decode_binary(
    bytes: &[u8],
    datatype: DataType,
    count: usize,
    opts: &CodecOptions,
    endian: Endian,
) -> Result<ValueData> {
    let mut cur = Cursor::new(bytes);
    let data = match datatype {
        DataType::Char => {
            let raw = cur.take(count)?;
            ValueData::Char(raw.iter().map(|b| *b as i8).collect())
        }
        DataType::UChar => ValueData::UChar(cur.take(count)?.to_vec()),
        DataType::Short => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                out.push(i16::from_ne_bytes(word(cur.take(2)?, endian)));
            }
            ValueData::Short(out)
        }
        DataType::UShort => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                out.push(u16::from_ne_bytes(word(cur.take(2)?, endian)));
            }
            ValueData::UShort(out)
        }
        DataType::Bool => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                out.push(u32::from_ne_bytes(word(cur.take(4)?, endian)) != 0);
            }
            ValueData::Bool(out)
        }
        DataType::Long => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                if opts.use_64bit_longs {
                    out.push(i64::from_ne_bytes(word(cur.take(8)?, endian)));
                } else {
                    out.push(i64::from(i32::from_ne_bytes(word(cur.take(4)?, endian))));
                }
            }
            ValueData::Long(out)
        }
        DataType::ULong | DataType::Hex => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                if opts.use_64bit_longs {
                    out.push(u64::from_ne_bytes(word(cur.take(8)?, endian)));
                } else {
                    out.push(u64::from(u32::from_ne_bytes(word(cur.take(4)?, endian))));
                }
            }
            ValueData::ULong(out)
        }
        DataType::Int64 => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                out.push(i64::from_ne_bytes(word(cur.take(8)?, endian)));
            }
            ValueData::Long(out)
        }
        DataType::UInt64 => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                out.push(u64::from_ne_bytes(word(cur.take(8)?, endian)));
            }
            ValueData::ULong(out)
        }
        DataType::Float => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                out.push(f32::from_ne_bytes(word(cur.take(4)?, endian)));
            }
            ValueData::Float(out)
        }
        DataType::Double => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                out.push(f64::from_ne_bytes(word(cur.take(8)?, endian)));
            }
            ValueData::Double(out)
        }
        DataType::String => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                let len = u32::from_ne_bytes(word(cur.take(4)?, endian)) as usize;
                let raw = cur.take(len)?.to_vec();
                cur.skip_pad4()?;
                out.push(String::from_utf8(raw).map_err(|_| {
                    Error::IllegalArgument("string payload is not valid UTF-8".into())
                })?);
            }
            ValueData::String(out)
        }
        other => {
            return Err(Error::Unsupported(format!(
                "datatype {other} is not transmitted over the network"
            )))
        }
    };
    Ok(data)
}

// ---------------------------------------------------------------------------
// XDR

fn pad4(buf: &mut BytesMut) {
    while buf.len() % 4 != 0 {
        buf.put_u8(0);
    }
}

fn encode_xdr(value: &FieldValue, opts: &CodecOptions) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    match value.data() {
        // Byte arrays travel as a padded opaque.
        ValueData::Char(v) => {
            for x in v {
                buf.put_i8(*x);
            }
            pad4(&mut buf);
        }
        ValueData::UChar(v) => {
            buf.put_slice(v);
            pad4(&mut buf);
        }
        // Short integers are promoted to 4 bytes, as XDR requires.
        ValueData::Short(v) => {
            for x in v {
                buf.put_i32(i32::from(*x));
            }
        }
        ValueData::UShort(v) => {
            for x in v {
                buf.put_u32(u32::from(*x));
            }
        }
        ValueData::Bool(v) => {
            for x in v {
                buf.put_u32(u32::from(*x));
            }
        }
        ValueData::Long(v) => {
            let hyper = value.datatype() == DataType::Int64 || opts.use_64bit_longs;
            for x in v {
                if hyper {
                    buf.put_i64(*x);
                } else {
                    let narrow = i32::try_from(*x).map_err(|_| {
                        Error::IllegalArgument(format!(
                            "value {x} does not fit the negotiated 32-bit long"
                        ))
                    })?;
                    buf.put_i32(narrow);
                }
            }
        }
        ValueData::ULong(v) => {
            let hyper = value.datatype() == DataType::UInt64 || opts.use_64bit_longs;
            for x in v {
                if hyper {
                    buf.put_u64(*x);
                } else {
                    let narrow = u32::try_from(*x).map_err(|_| {
                        Error::IllegalArgument(format!(
                            "value {x} does not fit the negotiated 32-bit ulong"
                        ))
                    })?;
                    buf.put_u32(narrow);
                }
            }
        }
        ValueData::Float(v) => {
            for x in v {
                buf.put_f32(*x);
            }
        }
        ValueData::Double(v) => {
            for x in v {
                buf.put_f64(*x);
            }
        }
        ValueData::String(v) => {
            for s in v {
                buf.put_u32(s.len() as u32);
                buf.put_slice(s.as_bytes());
                pad4(&mut buf);
            }
        }
        ValueData::Record(_) => {
            return Err(Error::Unsupported(
                "record references are not transmitted over the network".into(),
            ))
        }
    }
    Ok(buf.freeze())
}

fn decode_xdr(bytes: &[u8], datatype: DataType, count: usize, opts: &CodecOptions) -> Result<ValueData> {
    let mut cur = Cursor::new(bytes);
    let be = |slice: &[u8]| -> [u8; 4] {
        let mut w = [0u8; 4];
        w.copy_from_slice(slice);
        w
    };
    let be8 = |slice: &[u8]| -> [u8; 8] {
        let mut w = [0u8; 8];
        w.copy_from_slice(slice);
        w
    };
    let data = match datatype {
        DataType::Char => {
            let raw = cur.take(count)?;
            let out = raw.iter().map(|b| *b as i8).collect();
            cur.skip_pad4()?;
            ValueData::Char(out)
        }
        DataType::UChar => {
            let out = cur.take(count)?.to_vec();
            cur.skip_pad4()?;
            ValueData::UChar(out)
        }
        DataType::Short => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                let wide = i32::from_be_bytes(be(cur.take(4)?));
                out.push(i16::try_from(wide).map_err(|_| {
                    Error::IllegalArgument(format!("value {wide} does not fit a short"))
                })?);
            }
            ValueData::Short(out)
        }
        DataType::UShort => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                let wide = u32::from_be_bytes(be(cur.take(4)?));
                out.push(u16::try_from(wide).map_err(|_| {
                    Error::IllegalArgument(format!("value {wide} does not fit a ushort"))
                })?);
            }
            ValueData::UShort(out)
        }
        DataType::Bool => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                out.push(u32::from_be_bytes(be(cur.take(4)?)) != 0);
            }
            ValueData::Bool(out)
        }
        DataType::Long => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                if opts.use_64bit_longs {
                    out.push(i64::from_be_bytes(be8(cur.take(8)?)));
                } else {
                    out.push(i64::from(i32::from_be_bytes(be(cur.take(4)?))));
                }
            }
            ValueData::Long(out)
        }
        DataType::ULong | DataType::Hex => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                if opts.use_64bit_longs {
                    out.push(u64::from_be_bytes(be8(cur.take(8)?)));
                } else {
                    out.push(u64::from(u32::from_be_bytes(be(cur.take(4)?))));
                }
            }
            ValueData::ULong(out)
        }
        DataType::Int64 => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                out.push(i64::from_be_bytes(be8(cur.take(8)?)));
            }
            ValueData::Long(out)
        }
        DataType::UInt64 => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                out.push(u64::from_be_bytes(be8(cur.take(8)?)));
            }
            ValueData::ULong(out)
        }
        DataType::Float => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                out.push(f32::from_be_bytes(be(cur.take(4)?)));
            }
            ValueData::Float(out)
        }
        DataType::Double => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                out.push(f64::from_be_bytes(be8(cur.take(8)?)));
            }
            ValueData::Double(out)
        }
        DataType::String => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                let len = u32::from_be_bytes(be(cur.take(4)?)) as usize;
                let raw = cur.take(len)?.to_vec();
                cur.skip_pad4()?;
                out.push(String::from_utf8(raw).map_err(|_| {
                    Error::IllegalArgument("string payload is not valid UTF-8".into())
                })?);
            }
            ValueData::String(out)
        }
        other => {
            return Err(Error::Unsupported(format!(
                "datatype {other} is not transmitted over the network"
            )))
        }
    };
    Ok(data)
}

// ---------------------------------------------------------------------------
// ASCII

fn ascii_text(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| Error::IllegalArgument("ASCII payload is not valid UTF-8".into()))
}

fn encode_ascii(value: &FieldValue) -> Result<Bytes> {
    let mut tokens: Vec<String> = Vec::with_capacity(value.len());
    match value.data() {
        ValueData::Char(v) => tokens.extend(v.iter().map(ToString::to_string)),
        ValueData::UChar(v) => tokens.extend(v.iter().map(ToString::to_string)),
        ValueData::Short(v) => tokens.extend(v.iter().map(ToString::to_string)),
        ValueData::UShort(v) => tokens.extend(v.iter().map(ToString::to_string)),
        ValueData::Bool(v) => tokens.extend(v.iter().map(|x| u8::from(*x).to_string())),
        ValueData::Long(v) => tokens.extend(v.iter().map(ToString::to_string)),
        ValueData::ULong(v) => {
            if value.datatype() == DataType::Hex {
                tokens.extend(v.iter().map(|x| format!("{x:#x}")));
            } else {
                tokens.extend(v.iter().map(ToString::to_string));
            }
        }
        ValueData::Float(v) => tokens.extend(v.iter().map(ToString::to_string)),
        ValueData::Double(v) => tokens.extend(v.iter().map(ToString::to_string)),
        ValueData::String(v) => {
            for s in v {
                if s.is_empty() || s.chars().any(char::is_whitespace) {
                    tokens.push(format!("\"{s}\""));
                } else {
                    tokens.push(s.clone());
                }
            }
        }
        ValueData::Record(_) => {
            return Err(Error::Unsupported(
                "record references are not transmitted over the network".into(),
            ))
        }
    }
    Ok(Bytes::from(tokens.join(" ").into_bytes()))
}

fn decode_ascii(bytes: &[u8], datatype: DataType, dims: &[u32]) -> Result<FieldValue> {
    let text = ascii_text(bytes)?;
    let tokens = split_tokens(&text)?;
    let count = num_elements(dims);
    if tokens.len() != count {
        return Err(Error::IllegalArgument(format!(
            "ASCII payload has {} token(s), dimensions {dims:?} require {count}",
            tokens.len()
        )));
    }
    crate::record::parse_elements(datatype, dims.to_vec(), &tokens, "network field")
        .map_err(Error::Record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(format: DataFormat) -> CodecOptions {
        CodecOptions {
            format,
            use_64bit_longs: false,
        }
    }

    fn roundtrip(value: &FieldValue, format: DataFormat) -> FieldValue {
        let o = opts(format);
        let bytes = encode_value(value, &o).unwrap();
        decode_value(&bytes, value.datatype(), value.dims(), &o).unwrap()
    }

    #[test]
    fn scalars_roundtrip_in_every_format() {
        for format in [
            DataFormat::Ascii,
            DataFormat::Raw,
            DataFormat::Xdr,
            DataFormat::ByteSwap,
        ] {
            assert_eq!(roundtrip(&FieldValue::long(-12345), format), FieldValue::long(-12345));
            assert_eq!(
                roundtrip(&FieldValue::double(2.5), format),
                FieldValue::double(2.5)
            );
            assert_eq!(
                roundtrip(&FieldValue::boolean(true), format),
                FieldValue::boolean(true)
            );
            assert_eq!(
                roundtrip(&FieldValue::string("shutter1"), format),
                FieldValue::string("shutter1")
            );
        }
    }

    #[test]
    fn arrays_roundtrip_in_every_format() {
        let one_d = FieldValue::long_array(vec![100, 200]);
        let two_d = FieldValue::new(
            DataType::Double,
            vec![2, 3],
            ValueData::Double(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
        )
        .unwrap();
        for format in [
            DataFormat::Ascii,
            DataFormat::Raw,
            DataFormat::Xdr,
            DataFormat::ByteSwap,
        ] {
            assert_eq!(roundtrip(&one_d, format), one_d);
            assert_eq!(roundtrip(&two_d, format), two_d);
        }
    }

    #[test]
    fn xdr_longs_are_big_endian_words() {
        let o = opts(DataFormat::Xdr);
        let bytes = encode_value(&FieldValue::long(0x0102_0304), &o).unwrap();
        assert_eq!(bytes.as_ref(), &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn byteswap_reverses_each_element() {
        let raw = encode_value(&FieldValue::long(7), &opts(DataFormat::Raw)).unwrap();
        let swapped = encode_value(&FieldValue::long(7), &opts(DataFormat::ByteSwap)).unwrap();
        let mut reversed: Vec<u8> = raw.to_vec();
        reversed.reverse();
        assert_eq!(swapped.as_ref(), reversed.as_slice());
    }

    #[test]
    fn negotiated_32bit_long_rejects_overflow() {
        let big = FieldValue::long(i64::from(i32::MAX) + 1);
        assert!(encode_value(&big, &opts(DataFormat::Raw)).is_err());
        let mut o = opts(DataFormat::Raw);
        o.use_64bit_longs = true;
        assert!(encode_value(&big, &o).is_ok());
    }

    #[test]
    fn sixty_four_bit_longs_roundtrip() {
        let value = FieldValue::long(i64::MIN + 3);
        for format in [DataFormat::Raw, DataFormat::Xdr, DataFormat::ByteSwap] {
            let o = CodecOptions {
                format,
                use_64bit_longs: true,
            };
            let bytes = encode_value(&value, &o).unwrap();
            assert_eq!(decode_value(&bytes, DataType::Long, &[], &o).unwrap(), value);
        }
    }

    #[test]
    fn flat_decode_infers_the_count() {
        let o = opts(DataFormat::Raw);
        let value = FieldValue::double_array(vec![1.5, 2.5, 3.5]);
        let bytes = encode_value(&value, &o).unwrap();
        let decoded = decode_value_flat(&bytes, DataType::Double, &o).unwrap();
        assert_eq!(decoded.dims(), &[3]);
        assert_eq!(decoded.data(), value.data());
    }

    #[test]
    fn ascii_strings_with_spaces_are_quoted() {
        let o = opts(DataFormat::Ascii);
        let value = FieldValue::string("two words");
        let bytes = encode_value(&value, &o).unwrap();
        assert_eq!(bytes.as_ref(), b"\"two words\"");
        assert_eq!(decode_value(&bytes, DataType::String, &[], &o).unwrap(), value);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn format_strategy() -> impl Strategy<Value = DataFormat> {
            prop_oneof![
                Just(DataFormat::Ascii),
                Just(DataFormat::Raw),
                Just(DataFormat::Xdr),
                Just(DataFormat::ByteSwap),
            ]
        }

        proptest! {
            #[test]
            fn prop_long_arrays_roundtrip(
                values in prop::collection::vec(i32::MIN..=i32::MAX, 0..64),
                format in format_strategy(),
            ) {
                let value = FieldValue::long_array(values.iter().map(|v| i64::from(*v)).collect());
                let o = CodecOptions { format, use_64bit_longs: false };
                let bytes = encode_value(&value, &o).unwrap();
                // Empty ASCII payloads decode from zero tokens.
                let decoded = decode_value(&bytes, DataType::Long, value.dims(), &o).unwrap();
                prop_assert_eq!(decoded, value);
            }

            #[test]
            fn prop_double_arrays_roundtrip_binary(
                values in prop::collection::vec(prop::num::f64::NORMAL, 1..32),
                format in prop_oneof![Just(DataFormat::Raw), Just(DataFormat::Xdr), Just(DataFormat::ByteSwap)],
            ) {
                let value = FieldValue::double_array(values);
                let o = CodecOptions { format, use_64bit_longs: false };
                let bytes = encode_value(&value, &o).unwrap();
                let decoded = decode_value(&bytes, DataType::Double, value.dims(), &o).unwrap();
                prop_assert_eq!(decoded, value);
            }
        }
    }
}
