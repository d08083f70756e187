//! Record instances and their field storage.

use std::fmt;
use std::sync::Arc;

use super::driver::{Driver, RecordSupport};
use super::error::{Error, Result};
use super::field::{FieldFlags, FieldValue, RecordField};
use super::{RecordId, Superclass};

/// Per-record flag bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordFlags(u32);

impl RecordFlags {
    /// Record participates in scans and network access.
    pub const ENABLED: u32 = 0x1;
    /// Late initialization failed; the record is scheduled for deletion.
    pub const BROKEN: u32 = 0x2;
    /// `finish_initialization` has completed.
    pub const INITIALIZED: u32 = 0x4;
    /// The `open` hook has completed.
    pub const OPEN: u32 = 0x8;

    /// Create empty flags.
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Set a flag.
    pub fn set(&mut self, flag: u32) {
        self.0 |= flag;
    }

    /// Clear a flag.
    pub fn clear(&mut self, flag: u32) {
        self.0 &= !flag;
    }

    /// Check if a flag is set.
    #[must_use]
    pub const fn has(self, flag: u32) -> bool {
        (self.0 & flag) != 0
    }
}

/// Identity, fields, and graph membership of one record.
///
/// Split out from [`Record`] so lifecycle hooks can borrow the data while
/// the support instance is temporarily detached.
pub struct RecordData {
    name: String,
    driver: Arc<Driver>,
    handle: u32,
    fields: Vec<RecordField>,
    values: Vec<FieldValue>,
    pub(crate) parents: Vec<RecordId>,
    pub(crate) children: Vec<RecordId>,
    pub(crate) flags: RecordFlags,
}

impl RecordData {
    pub(crate) fn new(
        name: String,
        driver: Arc<Driver>,
        handle: u32,
        fields: Vec<RecordField>,
        values: Vec<FieldValue>,
    ) -> Self {
        let mut flags = RecordFlags::new();
        flags.set(RecordFlags::ENABLED);
        Self {
            name,
            driver,
            handle,
            fields,
            values,
            parents: Vec::new(),
            children: Vec::new(),
            flags,
        }
    }

    /// Record name, unique within its database.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The driver this record was built from.
    #[must_use]
    pub fn driver(&self) -> &Arc<Driver> {
        &self.driver
    }

    /// Superclass code.
    #[must_use]
    pub fn superclass(&self) -> Superclass {
        self.driver.superclass()
    }

    /// Numeric class code.
    #[must_use]
    pub fn class_code(&self) -> u32 {
        self.driver.class_code()
    }

    /// Numeric type code.
    #[must_use]
    pub fn type_code(&self) -> u32 {
        self.driver.type_code()
    }

    /// Process-wide record handle used by the network protocol.
    #[must_use]
    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// Record flag bits.
    #[must_use]
    pub fn flags(&self) -> RecordFlags {
        self.flags
    }

    /// Ordered field descriptors.
    #[must_use]
    pub fn fields(&self) -> &[RecordField] {
        &self.fields
    }

    /// Records this record depends on.
    #[must_use]
    pub fn parents(&self) -> &[RecordId] {
        &self.parents
    }

    /// Records depending on this record.
    #[must_use]
    pub fn children(&self) -> &[RecordId] {
        &self.children
    }

    /// Index of a field by name.
    pub fn find_field(&self, name: &str) -> Result<usize> {
        self.fields
            .iter()
            .position(|f| f.name() == name)
            .ok_or_else(|| Error::NotFound(format!("field '{}.{name}'", self.name)))
    }

    /// Index of a field by its label value.
    pub fn find_field_by_label(&self, label_value: u32) -> Result<usize> {
        self.fields
            .iter()
            .position(|f| f.label_value() == label_value)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "field with label {label_value} in record '{}'",
                    self.name
                ))
            })
    }

    /// Current value of a field.
    pub fn value(&self, field_index: usize) -> Result<&FieldValue> {
        self.values
            .get(field_index)
            .ok_or_else(|| Error::NotFound(format!("field index {field_index}")))
    }

    /// Current value of a field, looked up by name.
    pub fn value_by_name(&self, name: &str) -> Result<&FieldValue> {
        let index = self.find_field(name)?;
        self.value(index)
    }

    /// Replace a field's value.
    ///
    /// The datatype must match the descriptor; dimensions may change only
    /// on varargs fields. `NO_ACCESS` fields reject all stores and
    /// `READ_ONLY` fields reject remote stores (`remote = true`).
    pub fn set_value(&mut self, field_index: usize, value: FieldValue, remote: bool) -> Result<()> {
        let field = self
            .fields
            .get_mut(field_index)
            .ok_or_else(|| Error::NotFound(format!("field index {field_index}")))?;
        if field.flags().has(FieldFlags::NO_ACCESS)
            || (remote && field.flags().has(FieldFlags::READ_ONLY))
        {
            return Err(Error::PermissionDenied(format!(
                "field '{}.{}' is not writable",
                self.name,
                field.name()
            )));
        }
        if value.datatype() != field.datatype() {
            return Err(Error::TypeMismatch {
                expected: field.datatype(),
                actual: value.datatype(),
            });
        }
        if value.dims() != field.dims() {
            if field.flags().has(FieldFlags::VARARGS) {
                field.set_dims(value.dims().to_vec());
            } else {
                return Err(Error::IllegalArgument(format!(
                    "field '{}.{}' has dimensions {:?}, value has {:?}",
                    self.name,
                    field.name(),
                    field.dims(),
                    value.dims()
                )));
            }
        }
        self.values[field_index] = value;
        Ok(())
    }

    /// Store a field value bypassing access flags; for driver hooks.
    pub fn store_value(&mut self, field_index: usize, value: FieldValue) -> Result<()> {
        let field = self
            .fields
            .get_mut(field_index)
            .ok_or_else(|| Error::NotFound(format!("field index {field_index}")))?;
        if value.datatype() != field.datatype() {
            return Err(Error::TypeMismatch {
                expected: field.datatype(),
                actual: value.datatype(),
            });
        }
        if value.dims() != field.dims() {
            field.set_dims(value.dims().to_vec());
        }
        self.values[field_index] = value;
        Ok(())
    }
}

impl fmt::Debug for RecordData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordData")
            .field("name", &self.name)
            .field("type", &self.driver.type_name())
            .field("handle", &self.handle)
            .field("fields", &self.fields.len())
            .field("parents", &self.parents.len())
            .field("children", &self.children.len())
            .finish_non_exhaustive()
    }
}

/// One instantiated record: its data plus the driver support instance.
///
/// `support` is an `Option` only so the database can detach it while a
/// lifecycle hook borrows both the database and the record; it is always
/// present between hook calls.
pub struct Record {
    pub(crate) data: RecordData,
    pub(crate) support: Option<Box<dyn RecordSupport>>,
}

impl Record {
    pub(crate) fn new(data: RecordData, support: Box<dyn RecordSupport>) -> Self {
        Self {
            data,
            support: Some(support),
        }
    }

    /// Record data.
    #[must_use]
    pub fn data(&self) -> &RecordData {
        &self.data
    }

    /// Mutable record data.
    pub fn data_mut(&mut self) -> &mut RecordData {
        &mut self.data
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.data.fmt(f)
    }
}
