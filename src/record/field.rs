//! Field datatypes, flags, and the typed value container.

use std::fmt;

use super::error::{Error, Result};
use super::RecordId;

/// Upper bound on the element count of a single field value. Dimension
/// arrays arrive from description files and remote peers, so a default
/// value is never allocated from them unchecked.
pub const MAX_ELEMENTS: usize = 16 * 1024 * 1024;

/// Field datatype tags.
///
/// The numeric codes are part of the wire protocol (`DATA_TYPE` header word)
/// and of driver field templates, so they are fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DataType {
    /// Text string.
    String = 1,
    /// 8-bit signed integer.
    Char = 2,
    /// 8-bit unsigned integer.
    UChar = 3,
    /// 16-bit signed integer.
    Short = 4,
    /// 16-bit unsigned integer.
    UShort = 5,
    /// Boolean, transmitted as a 32-bit unsigned integer.
    Bool = 6,
    /// Signed integer, 32 or 64 bits on the wire depending on negotiation.
    Long = 8,
    /// Unsigned integer, 32 or 64 bits on the wire depending on negotiation.
    ULong = 9,
    /// 32-bit IEEE 754.
    Float = 10,
    /// 64-bit IEEE 754.
    Double = 11,
    /// Unsigned integer displayed in hexadecimal, stored like [`DataType::ULong`].
    Hex = 12,
    /// 64-bit signed integer regardless of negotiation.
    Int64 = 14,
    /// 64-bit unsigned integer regardless of negotiation.
    UInt64 = 15,
    /// Reference to another record.
    Record = 31,
    /// Reference to a driver type.
    RecordType = 32,
    /// Reference to a record plus an address within it.
    Interface = 33,
    /// Reference to a field of a record.
    RecordField = 34,
}

impl DataType {
    /// Convert from the wire code.
    #[must_use]
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::String),
            2 => Some(Self::Char),
            3 => Some(Self::UChar),
            4 => Some(Self::Short),
            5 => Some(Self::UShort),
            6 => Some(Self::Bool),
            8 => Some(Self::Long),
            9 => Some(Self::ULong),
            10 => Some(Self::Float),
            11 => Some(Self::Double),
            12 => Some(Self::Hex),
            14 => Some(Self::Int64),
            15 => Some(Self::UInt64),
            31 => Some(Self::Record),
            32 => Some(Self::RecordType),
            33 => Some(Self::Interface),
            34 => Some(Self::RecordField),
            _ => None,
        }
    }

    /// Convert to the wire code.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// True for datatypes that hold numbers (including booleans).
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Char
                | Self::UChar
                | Self::Short
                | Self::UShort
                | Self::Bool
                | Self::Long
                | Self::ULong
                | Self::Float
                | Self::Double
                | Self::Hex
                | Self::Int64
                | Self::UInt64
        )
    }

    /// True for datatypes that reference other records.
    #[must_use]
    pub const fn is_reference(self) -> bool {
        matches!(
            self,
            Self::Record | Self::RecordType | Self::Interface | Self::RecordField
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Char => "char",
            Self::UChar => "uchar",
            Self::Short => "short",
            Self::UShort => "ushort",
            Self::Bool => "bool",
            Self::Long => "long",
            Self::ULong => "ulong",
            Self::Float => "float",
            Self::Double => "double",
            Self::Hex => "hex",
            Self::Int64 => "int64",
            Self::UInt64 => "uint64",
            Self::Record => "record",
            Self::RecordType => "record_type",
            Self::Interface => "interface",
            Self::RecordField => "record_field",
        };
        write!(f, "{name}")
    }
}

/// Per-field flag bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldFlags(u32);

impl FieldFlags {
    /// Field value appears in the textual database description.
    pub const IN_DESCRIPTION: u32 = 0x1;
    /// Field appears in one-line record summaries.
    pub const IN_SUMMARY: u32 = 0x2;
    /// Remote writes are rejected.
    pub const READ_ONLY: u32 = 0x4;
    /// Remote reads and writes are rejected.
    pub const NO_ACCESS: u32 = 0x8;
    /// The element count is supplied at runtime, not by the template.
    pub const VARARGS: u32 = 0x10;
    /// Clients should poll this field for value changes.
    pub const POLL: u32 = 0x40;

    /// Valid flag bits mask.
    pub const VALID_MASK: u32 = Self::IN_DESCRIPTION
        | Self::IN_SUMMARY
        | Self::READ_ONLY
        | Self::NO_ACCESS
        | Self::VARARGS
        | Self::POLL;

    /// Create empty flags.
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Create from raw bits, rejecting unknown bits.
    #[must_use]
    pub const fn from_bits(value: u32) -> Option<Self> {
        if value & !Self::VALID_MASK == 0 {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Set a flag.
    #[must_use]
    pub const fn with(mut self, flag: u32) -> Self {
        debug_assert!(flag & !Self::VALID_MASK == 0, "invalid flag bit");
        self.0 |= flag;
        self
    }

    /// Check if a flag is set.
    #[must_use]
    pub const fn has(self, flag: u32) -> bool {
        (self.0 & flag) != 0
    }
}

/// A reference field's target.
///
/// Forward references produced by the loader start out [`FieldRef::Pending`],
/// carrying the index of their entry in the database fixup table; the fixup
/// pass rewrites every pending entry to [`FieldRef::Resolved`] before the
/// database is marked active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRef {
    /// No target configured.
    Unset,
    /// Waiting on the fixup pass; the index locates the fixup entry.
    Pending(u32),
    /// Resolved to a live record.
    Resolved(RecordId),
}

impl FieldRef {
    /// The resolved record, or an error if the reference is still pending.
    pub fn resolved(&self) -> Result<RecordId> {
        match self {
            Self::Resolved(id) => Ok(*id),
            Self::Pending(index) => Err(Error::CorruptDataStructure(format!(
                "record reference still pending (fixup entry {index})"
            ))),
            Self::Unset => Err(Error::NullArgument("record reference is unset")),
        }
    }
}

/// Flat element storage for one field value.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueData {
    /// Text strings, one per element.
    String(Vec<String>),
    /// 8-bit signed integers.
    Char(Vec<i8>),
    /// 8-bit unsigned integers.
    UChar(Vec<u8>),
    /// 16-bit signed integers.
    Short(Vec<i16>),
    /// 16-bit unsigned integers.
    UShort(Vec<u16>),
    /// Booleans.
    Bool(Vec<bool>),
    /// Signed integers ([`DataType::Long`] or [`DataType::Int64`]).
    Long(Vec<i64>),
    /// Unsigned integers ([`DataType::ULong`], [`DataType::Hex`], or
    /// [`DataType::UInt64`]); the datatype tag is kept alongside.
    ULong(Vec<u64>),
    /// 32-bit floats.
    Float(Vec<f32>),
    /// 64-bit floats.
    Double(Vec<f64>),
    /// Record references.
    Record(Vec<FieldRef>),
}

/// A typed, dimensioned field value.
///
/// Elements are stored flat in row-major order; an empty `dims` vector means
/// a scalar with exactly one element.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValue {
    datatype: DataType,
    dims: Vec<u32>,
    data: ValueData,
}

impl FieldValue {
    /// Build a value from parts, validating the element count against `dims`.
    pub fn new(datatype: DataType, dims: Vec<u32>, data: ValueData) -> Result<Self> {
        let value = Self {
            datatype,
            dims,
            data,
        };
        let expected = value.num_elements();
        if value.len() != expected {
            return Err(Error::IllegalArgument(format!(
                "value holds {} elements but dimensions {:?} require {}",
                value.len(),
                value.dims,
                expected
            )));
        }
        if !value.tag_matches() {
            return Err(Error::TypeMismatch {
                expected: value.datatype,
                actual: value.storage_datatype(),
            });
        }
        Ok(value)
    }

    /// Scalar signed integer.
    #[must_use]
    pub fn long(value: i64) -> Self {
        Self {
            datatype: DataType::Long,
            dims: Vec::new(),
            data: ValueData::Long(vec![value]),
        }
    }

    /// Scalar unsigned integer.
    #[must_use]
    pub fn ulong(value: u64) -> Self {
        Self {
            datatype: DataType::ULong,
            dims: Vec::new(),
            data: ValueData::ULong(vec![value]),
        }
    }

    /// Scalar double.
    #[must_use]
    pub fn double(value: f64) -> Self {
        Self {
            datatype: DataType::Double,
            dims: Vec::new(),
            data: ValueData::Double(vec![value]),
        }
    }

    /// Scalar boolean.
    #[must_use]
    pub fn boolean(value: bool) -> Self {
        Self {
            datatype: DataType::Bool,
            dims: Vec::new(),
            data: ValueData::Bool(vec![value]),
        }
    }

    /// Scalar string.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            datatype: DataType::String,
            dims: Vec::new(),
            data: ValueData::String(vec![value.into()]),
        }
    }

    /// Scalar record reference.
    #[must_use]
    pub fn record_ref(target: FieldRef) -> Self {
        Self {
            datatype: DataType::Record,
            dims: Vec::new(),
            data: ValueData::Record(vec![target]),
        }
    }

    /// 1-D array of signed integers.
    #[must_use]
    pub fn long_array(values: Vec<i64>) -> Self {
        let dims = vec![values.len() as u32];
        Self {
            datatype: DataType::Long,
            dims,
            data: ValueData::Long(values),
        }
    }

    /// 1-D array of doubles.
    #[must_use]
    pub fn double_array(values: Vec<f64>) -> Self {
        let dims = vec![values.len() as u32];
        Self {
            datatype: DataType::Double,
            dims,
            data: ValueData::Double(values),
        }
    }

    /// A zero-filled value of the given shape, used for field defaults.
    pub fn zeroed(datatype: DataType, dims: &[u32]) -> Result<Self> {
        let n = if dims.is_empty() {
            1
        } else {
            dims.iter().map(|d| *d as usize).product()
        };
        if n > MAX_ELEMENTS {
            return Err(Error::WouldExceedLimit(format!(
                "{n} elements exceeds the per-field limit of {MAX_ELEMENTS}"
            )));
        }
        let data = match datatype {
            DataType::String => ValueData::String(vec![String::new(); n]),
            DataType::Char => ValueData::Char(vec![0; n]),
            DataType::UChar => ValueData::UChar(vec![0; n]),
            DataType::Short => ValueData::Short(vec![0; n]),
            DataType::UShort => ValueData::UShort(vec![0; n]),
            DataType::Bool => ValueData::Bool(vec![false; n]),
            DataType::Long | DataType::Int64 => ValueData::Long(vec![0; n]),
            DataType::ULong | DataType::Hex | DataType::UInt64 => ValueData::ULong(vec![0; n]),
            DataType::Float => ValueData::Float(vec![0.0; n]),
            DataType::Double => ValueData::Double(vec![0.0; n]),
            DataType::Record => ValueData::Record(vec![FieldRef::Unset; n]),
            other => {
                return Err(Error::Unsupported(format!(
                    "cannot build a default value for datatype {other}"
                )))
            }
        };
        Ok(Self {
            datatype,
            dims: dims.to_vec(),
            data,
        })
    }

    /// The datatype tag.
    #[must_use]
    pub fn datatype(&self) -> DataType {
        self.datatype
    }

    /// Per-dimension extents; empty for scalars.
    #[must_use]
    pub fn dims(&self) -> &[u32] {
        &self.dims
    }

    /// Element storage.
    #[must_use]
    pub fn data(&self) -> &ValueData {
        &self.data
    }

    /// Mutable element storage.
    pub fn data_mut(&mut self) -> &mut ValueData {
        &mut self.data
    }

    /// Number of elements the dimensions require.
    #[must_use]
    pub fn num_elements(&self) -> usize {
        if self.dims.is_empty() {
            1
        } else {
            self.dims.iter().map(|d| *d as usize).product()
        }
    }

    /// Number of elements actually stored.
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.data {
            ValueData::String(v) => v.len(),
            ValueData::Char(v) => v.len(),
            ValueData::UChar(v) => v.len(),
            ValueData::Short(v) => v.len(),
            ValueData::UShort(v) => v.len(),
            ValueData::Bool(v) => v.len(),
            ValueData::Long(v) => v.len(),
            ValueData::ULong(v) => v.len(),
            ValueData::Float(v) => v.len(),
            ValueData::Double(v) => v.len(),
            ValueData::Record(v) => v.len(),
        }
    }

    /// True if the value stores no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The scalar record reference, if this is a reference value.
    pub fn as_record_ref(&self) -> Result<FieldRef> {
        match &self.data {
            ValueData::Record(v) if v.len() == 1 => Ok(v[0]),
            ValueData::Record(_) => Err(Error::IllegalArgument(
                "record reference value is not a scalar".into(),
            )),
            _ => Err(Error::TypeMismatch {
                expected: DataType::Record,
                actual: self.datatype,
            }),
        }
    }

    /// The scalar i64 value, coercing numerics.
    pub fn as_long(&self) -> Result<i64> {
        let coerced = self.coerce_to(DataType::Long)?;
        match coerced.data {
            ValueData::Long(v) if v.len() == 1 => Ok(v[0]),
            _ => Err(Error::IllegalArgument("value is not a scalar".into())),
        }
    }

    /// The scalar f64 value, coercing numerics.
    pub fn as_double(&self) -> Result<f64> {
        let coerced = self.coerce_to(DataType::Double)?;
        match coerced.data {
            ValueData::Double(v) if v.len() == 1 => Ok(v[0]),
            _ => Err(Error::IllegalArgument("value is not a scalar".into())),
        }
    }

    /// The scalar string value.
    pub fn as_string(&self) -> Result<&str> {
        match &self.data {
            ValueData::String(v) if v.len() == 1 => Ok(&v[0]),
            _ => Err(Error::TypeMismatch {
                expected: DataType::String,
                actual: self.datatype,
            }),
        }
    }

    /// Convert every element to `target`, keeping the dimensions.
    ///
    /// Integer-to-integer conversions are exact and fail when a value does
    /// not fit the target's range; fractional values are truncated toward
    /// zero when converted to integers, matching the behavior remote peers
    /// expect. Conversions between references, strings, and numerics are
    /// rejected.
    pub fn coerce_to(&self, target: DataType) -> Result<Self> {
        if target == self.datatype {
            return Ok(self.clone());
        }
        // ULong/Hex/UInt64 and Long/Int64 share storage; retag without copy.
        if self.storage_compatible(target) {
            let mut out = self.clone();
            out.datatype = target;
            return Ok(out);
        }
        if !self.datatype.is_numeric() || !target.is_numeric() {
            return Err(Error::TypeMismatch {
                expected: target,
                actual: self.datatype,
            });
        }
        let data = match target {
            DataType::Char => ValueData::Char(self.integer_elements(target)?),
            DataType::UChar => ValueData::UChar(self.integer_elements(target)?),
            DataType::Short => ValueData::Short(self.integer_elements(target)?),
            DataType::UShort => ValueData::UShort(self.integer_elements(target)?),
            DataType::Long | DataType::Int64 => ValueData::Long(self.integer_elements(target)?),
            DataType::ULong | DataType::Hex | DataType::UInt64 => {
                ValueData::ULong(self.integer_elements(target)?)
            }
            DataType::Bool => {
                ValueData::Bool(self.to_f64_elements()?.iter().map(|v| *v != 0.0).collect())
            }
            DataType::Float => {
                ValueData::Float(self.to_f64_elements()?.iter().map(|v| *v as f32).collect())
            }
            DataType::Double => ValueData::Double(self.to_f64_elements()?),
            _ => {
                return Err(Error::TypeMismatch {
                    expected: target,
                    actual: self.datatype,
                })
            }
        };
        Ok(Self {
            datatype: target,
            dims: self.dims.clone(),
            data,
        })
    }

    /// Keep only the first `product(dims)` elements, reshaping to `dims`.
    ///
    /// Used by the network layer for dimension truncation; the caller is
    /// responsible for warning about dropped elements.
    pub fn truncate_to_dims(&self, dims: &[u32]) -> Result<Self> {
        let keep = if dims.is_empty() {
            1
        } else {
            dims.iter().map(|d| *d as usize).product()
        };
        if keep > self.len() {
            return Err(Error::IllegalArgument(format!(
                "requested dimensions {:?} need {} elements, value has {}",
                dims,
                keep,
                self.len()
            )));
        }
        let data = match &self.data {
            ValueData::String(v) => ValueData::String(v[..keep].to_vec()),
            ValueData::Char(v) => ValueData::Char(v[..keep].to_vec()),
            ValueData::UChar(v) => ValueData::UChar(v[..keep].to_vec()),
            ValueData::Short(v) => ValueData::Short(v[..keep].to_vec()),
            ValueData::UShort(v) => ValueData::UShort(v[..keep].to_vec()),
            ValueData::Bool(v) => ValueData::Bool(v[..keep].to_vec()),
            ValueData::Long(v) => ValueData::Long(v[..keep].to_vec()),
            ValueData::ULong(v) => ValueData::ULong(v[..keep].to_vec()),
            ValueData::Float(v) => ValueData::Float(v[..keep].to_vec()),
            ValueData::Double(v) => ValueData::Double(v[..keep].to_vec()),
            ValueData::Record(v) => ValueData::Record(v[..keep].to_vec()),
        };
        Ok(Self {
            datatype: self.datatype,
            dims: dims.to_vec(),
            data,
        })
    }

    /// Elements as exact target integers; integer sources never pass
    /// through floating point, so no precision is lost on 64-bit values.
    fn integer_elements<T: TryFrom<i128>>(&self, target: DataType) -> Result<Vec<T>> {
        self.to_i128_elements()?
            .into_iter()
            .map(|v| {
                T::try_from(v).map_err(|_| {
                    Error::IllegalArgument(format!(
                        "value {v} is out of range for datatype {target}"
                    ))
                })
            })
            .collect()
    }

    fn to_i128_elements(&self) -> Result<Vec<i128>> {
        // Floats truncate toward zero; the saturating cast is safe because
        // any value clipped at the i128 bounds still fails the target's
        // range check afterwards.
        fn whole(v: f64) -> Result<i128> {
            let t = v.trunc();
            if !t.is_finite() {
                return Err(Error::IllegalArgument(format!(
                    "cannot convert {v} to an integer"
                )));
            }
            Ok(t as i128)
        }
        let out = match &self.data {
            ValueData::Char(v) => v.iter().map(|x| i128::from(*x)).collect(),
            ValueData::UChar(v) => v.iter().map(|x| i128::from(*x)).collect(),
            ValueData::Short(v) => v.iter().map(|x| i128::from(*x)).collect(),
            ValueData::UShort(v) => v.iter().map(|x| i128::from(*x)).collect(),
            ValueData::Bool(v) => v.iter().map(|x| i128::from(u8::from(*x))).collect(),
            ValueData::Long(v) => v.iter().map(|x| i128::from(*x)).collect(),
            ValueData::ULong(v) => v.iter().map(|x| i128::from(*x)).collect(),
            ValueData::Float(v) => v
                .iter()
                .map(|x| whole(f64::from(*x)))
                .collect::<Result<_>>()?,
            ValueData::Double(v) => v.iter().map(|x| whole(*x)).collect::<Result<_>>()?,
            _ => {
                return Err(Error::TypeMismatch {
                    expected: DataType::Long,
                    actual: self.datatype,
                })
            }
        };
        Ok(out)
    }

    fn to_f64_elements(&self) -> Result<Vec<f64>> {
        let out = match &self.data {
            ValueData::Char(v) => v.iter().map(|x| f64::from(*x)).collect(),
            ValueData::UChar(v) => v.iter().map(|x| f64::from(*x)).collect(),
            ValueData::Short(v) => v.iter().map(|x| f64::from(*x)).collect(),
            ValueData::UShort(v) => v.iter().map(|x| f64::from(*x)).collect(),
            ValueData::Bool(v) => v.iter().map(|x| f64::from(u8::from(*x))).collect(),
            ValueData::Long(v) => v.iter().map(|x| *x as f64).collect(),
            ValueData::ULong(v) => v.iter().map(|x| *x as f64).collect(),
            ValueData::Float(v) => v.iter().map(|x| f64::from(*x)).collect(),
            ValueData::Double(v) => v.clone(),
            _ => {
                return Err(Error::TypeMismatch {
                    expected: DataType::Double,
                    actual: self.datatype,
                })
            }
        };
        Ok(out)
    }

    fn storage_datatype(&self) -> DataType {
        match &self.data {
            ValueData::String(_) => DataType::String,
            ValueData::Char(_) => DataType::Char,
            ValueData::UChar(_) => DataType::UChar,
            ValueData::Short(_) => DataType::Short,
            ValueData::UShort(_) => DataType::UShort,
            ValueData::Bool(_) => DataType::Bool,
            ValueData::Long(_) => DataType::Long,
            ValueData::ULong(_) => DataType::ULong,
            ValueData::Float(_) => DataType::Float,
            ValueData::Double(_) => DataType::Double,
            ValueData::Record(_) => DataType::Record,
        }
    }

    fn tag_matches(&self) -> bool {
        self.storage_compatible(self.datatype)
    }

    fn storage_compatible(&self, datatype: DataType) -> bool {
        matches!(
            (&self.data, datatype),
            (ValueData::String(_), DataType::String)
                | (ValueData::Char(_), DataType::Char)
                | (ValueData::UChar(_), DataType::UChar)
                | (ValueData::Short(_), DataType::Short)
                | (ValueData::UShort(_), DataType::UShort)
                | (ValueData::Bool(_), DataType::Bool)
                | (ValueData::Long(_), DataType::Long | DataType::Int64)
                | (
                    ValueData::ULong(_),
                    DataType::ULong | DataType::Hex | DataType::UInt64
                )
                | (ValueData::Float(_), DataType::Float)
                | (ValueData::Double(_), DataType::Double)
                | (
                    ValueData::Record(_),
                    DataType::Record
                        | DataType::RecordType
                        | DataType::Interface
                        | DataType::RecordField
                )
        )
    }
}

/// One field descriptor within a record's field array.
///
/// `label_value` is a stable small integer identifying the field
/// independently of its name; it is unique within a record and echoed
/// across the network. Datatype and dimensions never change after
/// construction.
#[derive(Debug, Clone)]
pub struct RecordField {
    name: String,
    label_value: u32,
    datatype: DataType,
    dims: Vec<u32>,
    flags: FieldFlags,
}

impl RecordField {
    /// Create a field descriptor.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        label_value: u32,
        datatype: DataType,
        dims: Vec<u32>,
        flags: FieldFlags,
    ) -> Self {
        Self {
            name: name.into(),
            label_value,
            datatype,
            dims,
            flags,
        }
    }

    /// Field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable name-independent field key.
    #[must_use]
    pub fn label_value(&self) -> u32 {
        self.label_value
    }

    /// Declared datatype.
    #[must_use]
    pub fn datatype(&self) -> DataType {
        self.datatype
    }

    /// Declared dimensions; a varargs field reports its current extent.
    #[must_use]
    pub fn dims(&self) -> &[u32] {
        &self.dims
    }

    /// Flag bits.
    #[must_use]
    pub fn flags(&self) -> FieldFlags {
        self.flags
    }

    pub(crate) fn set_dims(&mut self, dims: Vec<u32>) {
        self.dims = dims;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datatype_codes_roundtrip() {
        for code in [1, 2, 3, 4, 5, 6, 8, 9, 10, 11, 12, 14, 15, 31, 32, 33, 34] {
            let dt = DataType::from_u32(code).unwrap();
            assert_eq!(dt.as_u32(), code);
        }
        assert!(DataType::from_u32(7).is_none());
        assert!(DataType::from_u32(13).is_none());
    }

    #[test]
    fn scalar_has_one_element() {
        let v = FieldValue::long(42);
        assert_eq!(v.dims(), &[] as &[u32]);
        assert_eq!(v.num_elements(), 1);
        assert_eq!(v.as_long().unwrap(), 42);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let err = FieldValue::new(
            DataType::Long,
            vec![3],
            ValueData::Long(vec![1, 2]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::IllegalArgument(_)));
    }

    #[test]
    fn long_coerces_to_double() {
        let v = FieldValue::long_array(vec![100, 200]);
        let d = v.coerce_to(DataType::Double).unwrap();
        assert_eq!(d.datatype(), DataType::Double);
        assert_eq!(d.data(), &ValueData::Double(vec![100.0, 200.0]));
    }

    #[test]
    fn large_integers_coerce_exactly() {
        // Values above 2^53 are not representable as f64; the conversion
        // must not round them.
        let v = FieldValue::long(i64::MAX - 1);
        let u = v.coerce_to(DataType::ULong).unwrap();
        assert_eq!(u.data(), &ValueData::ULong(vec![9_223_372_036_854_775_806]));

        let back = u.coerce_to(DataType::Long).unwrap();
        assert_eq!(back.data(), &ValueData::Long(vec![i64::MAX - 1]));

        assert!(matches!(
            FieldValue::ulong(u64::MAX - 3).coerce_to(DataType::Long),
            Err(Error::IllegalArgument(_))
        ));
        assert!(FieldValue::long(-1).coerce_to(DataType::ULong).is_err());
    }

    #[test]
    fn float_to_integer_respects_the_exact_range() {
        // 2^63 is representable as f64 but does not fit an i64.
        let two_to_63 = 9_223_372_036_854_775_808.0_f64;
        assert!(FieldValue::double(two_to_63).coerce_to(DataType::Long).is_err());
        assert!(FieldValue::double(two_to_63).coerce_to(DataType::ULong).is_ok());
        assert!(FieldValue::double(f64::NAN).coerce_to(DataType::Long).is_err());
        assert!(FieldValue::double(f64::INFINITY).coerce_to(DataType::ULong).is_err());
        // Fractional values still truncate toward zero.
        assert_eq!(
            FieldValue::double(2.9).coerce_to(DataType::Long).unwrap().as_long().unwrap(),
            2
        );
        assert_eq!(
            FieldValue::double(-2.9).coerce_to(DataType::Long).unwrap().as_long().unwrap(),
            -2
        );
    }

    #[test]
    fn out_of_range_coercion_is_rejected() {
        let v = FieldValue::long(300);
        assert!(v.coerce_to(DataType::Char).is_err());
        assert!(FieldValue::long(-1).coerce_to(DataType::UChar).is_err());
    }

    #[test]
    fn string_to_numeric_is_a_type_mismatch() {
        let v = FieldValue::string("motor1");
        assert!(matches!(
            v.coerce_to(DataType::Long),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn truncation_keeps_leading_elements() {
        let v = FieldValue::long_array(vec![1, 2, 3, 4, 5, 6]);
        let t = v.truncate_to_dims(&[2, 2]).unwrap();
        assert_eq!(t.dims(), &[2, 2]);
        assert_eq!(t.data(), &ValueData::Long(vec![1, 2, 3, 4]));
    }

    #[test]
    fn absurd_element_counts_are_rejected() {
        let err = FieldValue::zeroed(DataType::Double, &[u32::MAX]).unwrap_err();
        assert!(matches!(err, Error::WouldExceedLimit(_)));
        // 2-D shapes are bounded by the product, not the extents.
        assert!(FieldValue::zeroed(DataType::Long, &[65_536, 65_536]).is_err());
        assert!(FieldValue::zeroed(DataType::Long, &[64, 64]).is_ok());
    }

    #[test]
    fn flags_reject_unknown_bits() {
        assert!(FieldFlags::from_bits(0x20).is_none());
        let flags = FieldFlags::new().with(FieldFlags::READ_ONLY);
        assert!(flags.has(FieldFlags::READ_ONLY));
        assert!(!flags.has(FieldFlags::POLL));
    }
}
