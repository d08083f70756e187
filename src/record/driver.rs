//! Driver descriptors, the record support trait, and the driver registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::database::Database;
use super::error::{Error, Result};
use super::field::{DataType, FieldFlags, FieldValue};
use super::{RecordId, Superclass};

/// Per-record lifecycle hooks.
///
/// One boxed instance is created for every record by its driver's factory;
/// device state lives inside the instance. All hooks default to no-ops so
/// that simple drivers only implement what they need.
///
/// `finish_initialization` runs only after every forward reference in the
/// whole database has been resolved, so hooks may look up referenced records
/// and register parent/child dependencies.
#[allow(unused_variables)]
pub trait RecordSupport: Send {
    /// Late initialization, run once per record after the fixup pass.
    fn finish_initialization(&mut self, db: &mut Database, record: RecordId) -> Result<()> {
        Ok(())
    }

    /// Hardware or network handshake.
    fn open(&mut self, db: &mut Database, record: RecordId) -> Result<()> {
        Ok(())
    }

    /// Orderly shutdown; runs in reverse load order.
    fn close(&mut self, db: &mut Database, record: RecordId) -> Result<()> {
        Ok(())
    }

    /// Re-establish contact with hardware after a fault.
    fn resynchronize(&mut self, db: &mut Database, record: RecordId) -> Result<()> {
        Ok(())
    }

    /// Release driver-held resources; runs as the record is deleted.
    fn delete(&mut self, db: &mut Database, record: RecordId) -> Result<()> {
        Ok(())
    }
}

/// Support instance for drivers with no device state and no hooks.
#[derive(Debug, Default)]
pub struct DefaultSupport;

impl RecordSupport for DefaultSupport {}

/// One ordered field descriptor in a driver's template.
#[derive(Clone)]
pub struct FieldTemplate {
    /// Field name, unique within the driver.
    pub name: String,
    /// Stable name-independent field key, unique within the driver.
    pub label_value: u32,
    /// Declared datatype.
    pub datatype: DataType,
    /// Declared dimensions; empty for scalars. Varargs fields declare the
    /// dimensionality only and take their extent from the description.
    pub dims: Vec<u32>,
    /// Flag bits.
    pub flags: FieldFlags,
    /// Initial value; `None` means zero-filled.
    pub default: Option<FieldValue>,
}

impl FieldTemplate {
    /// Template for a scalar field with no default.
    #[must_use]
    pub fn scalar(name: &str, label_value: u32, datatype: DataType, flags: FieldFlags) -> Self {
        Self {
            name: name.to_owned(),
            label_value,
            datatype,
            dims: Vec::new(),
            flags,
            default: None,
        }
    }

    /// Template for a 1-D array field.
    #[must_use]
    pub fn array(
        name: &str,
        label_value: u32,
        datatype: DataType,
        len: u32,
        flags: FieldFlags,
    ) -> Self {
        Self {
            name: name.to_owned(),
            label_value,
            datatype,
            dims: vec![len],
            flags,
            default: None,
        }
    }

    /// Attach an initial value.
    #[must_use]
    pub fn with_default(mut self, default: FieldValue) -> Self {
        self.default = Some(default);
        self
    }
}

impl fmt::Debug for FieldTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldTemplate")
            .field("name", &self.name)
            .field("label_value", &self.label_value)
            .field("datatype", &self.datatype)
            .field("dims", &self.dims)
            .finish_non_exhaustive()
    }
}

type SupportFactory = dyn Fn() -> Box<dyn RecordSupport> + Send + Sync;

/// Static template for one record type: identity codes, the ordered field
/// template, and the factory producing per-record support instances.
pub struct Driver {
    type_name: String,
    superclass: Superclass,
    class_name: String,
    class_code: u32,
    type_code: u32,
    fields: Vec<FieldTemplate>,
    factory: Box<SupportFactory>,
}

impl Driver {
    /// Create a driver descriptor with a [`DefaultSupport`] factory.
    pub fn new(
        type_name: &str,
        superclass: Superclass,
        class_name: &str,
        class_code: u32,
        type_code: u32,
        fields: Vec<FieldTemplate>,
    ) -> Result<Self> {
        let mut seen_labels = HashMap::new();
        for field in &fields {
            if let Some(other) = seen_labels.insert(field.label_value, field.name.clone()) {
                return Err(Error::CorruptDataStructure(format!(
                    "driver '{type_name}': fields '{other}' and '{}' share label value {}",
                    field.name, field.label_value
                )));
            }
        }
        Ok(Self {
            type_name: type_name.to_owned(),
            superclass,
            class_name: class_name.to_owned(),
            class_code,
            type_code,
            fields,
            factory: Box::new(|| Box::new(DefaultSupport)),
        })
    }

    /// Replace the support factory.
    #[must_use]
    pub fn with_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn RecordSupport> + Send + Sync + 'static,
    {
        self.factory = Box::new(factory);
        self
    }

    /// Driver type name (the fourth token of a description line).
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Superclass of records built from this driver.
    #[must_use]
    pub fn superclass(&self) -> Superclass {
        self.superclass
    }

    /// Class token spelling (the third token of a description line).
    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Numeric class code.
    #[must_use]
    pub fn class_code(&self) -> u32 {
        self.class_code
    }

    /// Numeric type code.
    #[must_use]
    pub fn type_code(&self) -> u32 {
        self.type_code
    }

    /// Ordered field template.
    #[must_use]
    pub fn fields(&self) -> &[FieldTemplate] {
        &self.fields
    }

    /// Build a fresh support instance for one record.
    #[must_use]
    pub fn create_support(&self) -> Box<dyn RecordSupport> {
        (self.factory)()
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("type_name", &self.type_name)
            .field("superclass", &self.superclass)
            .field("class_name", &self.class_name)
            .field("type_code", &self.type_code)
            .field("fields", &self.fields.len())
            .finish_non_exhaustive()
    }
}

/// Registry mapping a driver type name to its descriptor.
///
/// Populated at startup and read-only afterwards.
#[derive(Debug, Default)]
pub struct DriverTable {
    drivers: HashMap<String, Arc<Driver>>,
}

impl DriverTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver; the type name must be unused.
    pub fn register(&mut self, driver: Driver) -> Result<()> {
        let name = driver.type_name().to_owned();
        if self.drivers.contains_key(&name) {
            return Err(Error::IllegalArgument(format!(
                "driver type '{name}' is already registered"
            )));
        }
        self.drivers.insert(name, Arc::new(driver));
        Ok(())
    }

    /// Look up a driver by type name.
    pub fn lookup(&self, type_name: &str) -> Result<Arc<Driver>> {
        self.drivers
            .get(type_name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("driver type '{type_name}'")))
    }

    /// Number of registered drivers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// True if no drivers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}
