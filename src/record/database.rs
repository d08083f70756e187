//! The database context: record arena, name/handle lookup, fixup table,
//! and the lifecycle passes.

use std::collections::HashMap;

use slotmap::SlotMap;
use tracing::{debug, error, warn};

use super::driver::Driver;
use super::error::{Error, Result};
use super::field::{FieldRef, FieldValue, RecordField, ValueData};
use super::record::{Record, RecordData, RecordFlags};
use super::RecordId;
use std::sync::Arc;

/// Load-failure policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadPolicy {
    /// Delete records whose late initialization fails instead of aborting
    /// the whole load.
    pub delete_broken_records: bool,
}

/// One registered forward reference awaiting the fixup pass.
#[derive(Debug, Clone)]
pub struct FixupEntry {
    /// Record holding the unresolved reference.
    pub record: RecordId,
    /// Field index within that record.
    pub field_index: usize,
    /// Element index within the field value.
    pub element: usize,
    /// Name of the record being referenced.
    pub target_name: String,
}

/// A process context owning an arena of records.
///
/// Passed explicitly to every API that needs database access; there is no
/// hidden global. Lookup by handle and by name are both O(1).
pub struct Database {
    records: SlotMap<RecordId, Record>,
    order: Vec<RecordId>,
    by_name: HashMap<String, RecordId>,
    handles: Vec<Option<RecordId>>,
    fixups: Vec<Option<FixupEntry>>,
    policy: LoadPolicy,
    active: bool,
}

impl Database {
    /// Create an empty database with the default load policy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(LoadPolicy::default())
    }

    /// Create an empty database with an explicit load policy.
    #[must_use]
    pub fn with_policy(policy: LoadPolicy) -> Self {
        Self {
            records: SlotMap::with_key(),
            order: Vec::new(),
            by_name: HashMap::new(),
            handles: Vec::new(),
            fixups: Vec::new(),
            policy,
            active: false,
        }
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True if the database holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// True once [`Database::finish_load`] has completed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The load-failure policy this database was created with.
    #[must_use]
    pub fn load_policy(&self) -> LoadPolicy {
        self.policy
    }

    /// Records in load order.
    pub fn iter(&self) -> impl Iterator<Item = (RecordId, &RecordData)> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(*id).map(|r| (*id, &r.data)))
    }

    /// Instantiate a record from a driver template.
    ///
    /// Field values start from the template defaults (zero-filled when the
    /// template gives none). The record is assigned the next free handle.
    pub fn create_record(&mut self, name: &str, driver: &Arc<Driver>) -> Result<RecordId> {
        if name.is_empty() {
            return Err(Error::NullArgument("record name"));
        }
        if self.by_name.contains_key(name) {
            return Err(Error::IllegalArgument(format!(
                "a record named '{name}' already exists"
            )));
        }
        let mut fields = Vec::with_capacity(driver.fields().len());
        let mut values = Vec::with_capacity(driver.fields().len());
        for template in driver.fields() {
            let value = match &template.default {
                Some(v) => v.clone(),
                None => FieldValue::zeroed(template.datatype, &template.dims)?,
            };
            fields.push(RecordField::new(
                &template.name,
                template.label_value,
                template.datatype,
                value.dims().to_vec(),
                template.flags,
            ));
            values.push(value);
        }
        let handle = self.handles.len() as u32;
        let data = RecordData::new(name.to_owned(), Arc::clone(driver), handle, fields, values);
        let id = self
            .records
            .insert(Record::new(data, driver.create_support()));
        self.order.push(id);
        self.by_name.insert(name.to_owned(), id);
        self.handles.push(Some(id));
        debug!(record = name, handle, "created record");
        Ok(id)
    }

    /// Look up a record id by name.
    pub fn lookup(&self, name: &str) -> Result<RecordId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("record '{name}'")))
    }

    /// Look up a record id by handle.
    pub fn record_by_handle(&self, handle: u32) -> Result<RecordId> {
        self.handles
            .get(handle as usize)
            .copied()
            .flatten()
            .ok_or_else(|| Error::NotFound(format!("record handle {handle}")))
    }

    /// Borrow a record's data.
    pub fn record(&self, id: RecordId) -> Result<&RecordData> {
        self.records
            .get(id)
            .map(|r| &r.data)
            .ok_or_else(|| Error::NotFound("record id is stale".into()))
    }

    /// Mutably borrow a record's data.
    pub fn record_mut(&mut self, id: RecordId) -> Result<&mut RecordData> {
        self.records
            .get_mut(id)
            .map(|r| &mut r.data)
            .ok_or_else(|| Error::NotFound("record id is stale".into()))
    }

    /// Resolve `"record.field"` to a record id and field index.
    pub fn lookup_field(&self, full_name: &str) -> Result<(RecordId, usize)> {
        let (record_name, field_name) = full_name.split_once('.').ok_or_else(|| {
            Error::IllegalArgument(format!(
                "'{full_name}' is not of the form record.field"
            ))
        })?;
        let id = self.lookup(record_name)?;
        let field_index = self.record(id)?.find_field(field_name)?;
        Ok((id, field_index))
    }

    /// Read a field value.
    pub fn read_field(&self, id: RecordId, field_index: usize) -> Result<&FieldValue> {
        self.record(id)?.value(field_index)
    }

    /// Write a field value, honoring access flags when `remote` is set.
    pub fn write_field(
        &mut self,
        id: RecordId,
        field_index: usize,
        value: FieldValue,
        remote: bool,
    ) -> Result<()> {
        self.record_mut(id)?.set_value(field_index, value, remote)
    }

    /// Register a forward reference and return its fixup index.
    pub fn register_fixup(
        &mut self,
        record: RecordId,
        field_index: usize,
        element: usize,
        target_name: &str,
    ) -> u32 {
        let index = self.fixups.len() as u32;
        self.fixups.push(Some(FixupEntry {
            record,
            field_index,
            element,
            target_name: target_name.to_owned(),
        }));
        index
    }

    /// Pending fixup entries; drained by [`Database::finish_load`].
    #[must_use]
    pub fn pending_fixups(&self) -> usize {
        self.fixups.iter().filter(|f| f.is_some()).count()
    }

    /// Count of reference elements anywhere in the database that are still
    /// pending. Zero after a successful [`Database::finish_load`].
    #[must_use]
    pub fn pending_references(&self) -> usize {
        let mut pending = 0;
        for (_, data) in self.iter() {
            for index in 0..data.fields().len() {
                if let Ok(value) = data.value(index) {
                    if let ValueData::Record(refs) = value.data() {
                        pending += refs
                            .iter()
                            .filter(|r| matches!(r, FieldRef::Pending(_)))
                            .count();
                    }
                }
            }
        }
        pending
    }

    /// Rewrite every pending reference to its real record.
    ///
    /// Records still holding unresolvable references afterwards are
    /// reported and deleted; any such record makes the pass fail.
    fn resolve_fixups(&mut self) -> Result<()> {
        let fixups = std::mem::take(&mut self.fixups);
        let mut unresolved: Vec<FixupEntry> = Vec::new();
        for entry in fixups.into_iter().flatten() {
            match self.by_name.get(&entry.target_name).copied() {
                Some(target) => {
                    self.set_reference(&entry, FieldRef::Resolved(target))?;
                    debug!(
                        target = entry.target_name.as_str(),
                        "resolved forward reference"
                    );
                }
                None => unresolved.push(entry),
            }
        }
        if unresolved.is_empty() {
            return Ok(());
        }
        let mut names = Vec::new();
        for entry in &unresolved {
            if let Ok(data) = self.record(entry.record) {
                error!(
                    record = data.name(),
                    target = entry.target_name.as_str(),
                    "reference to a record that does not exist"
                );
            }
            names.push(entry.target_name.clone());
        }
        for entry in unresolved {
            // Referring records cannot be left with dangling references.
            let _ = self.force_delete(entry.record);
        }
        names.sort();
        names.dedup();
        if self.policy.delete_broken_records {
            warn!(
                targets = names.join(", ").as_str(),
                "deleted records with unresolvable references"
            );
            return Ok(());
        }
        Err(Error::CorruptDataStructure(format!(
            "unresolved record references after the fixup pass: {}",
            names.join(", ")
        )))
    }

    fn set_reference(&mut self, entry: &FixupEntry, target: FieldRef) -> Result<()> {
        let record = self
            .records
            .get_mut(entry.record)
            .ok_or_else(|| Error::NotFound("record id is stale".into()))?;
        let value = record
            .data
            .value(entry.field_index)
            .map_err(|_| Error::CorruptDataStructure("fixup entry names a missing field".into()))?
            .clone();
        let mut value = value;
        match value.data_mut() {
            ValueData::Record(refs) => {
                let slot = refs.get_mut(entry.element).ok_or_else(|| {
                    Error::CorruptDataStructure("fixup entry element out of range".into())
                })?;
                *slot = target;
            }
            _ => {
                return Err(Error::CorruptDataStructure(
                    "fixup entry names a non-reference field".into(),
                ))
            }
        }
        record.data.store_value(entry.field_index, value)
    }

    /// Run the fixup pass and then `finish_initialization` for every record.
    ///
    /// Only after the fixup pass has rewritten the entire database do the
    /// hooks run, so hooks may resolve references and register
    /// dependencies. A record whose hook fails is marked broken; broken
    /// records are deleted under [`LoadPolicy::delete_broken_records`],
    /// otherwise the first failure aborts the load.
    pub fn finish_load(&mut self) -> Result<()> {
        self.resolve_fixups()?;

        let mut first_error: Option<Error> = None;
        for id in self.order.clone() {
            match self.run_hook(id, |support, db, id| support.finish_initialization(db, id)) {
                Ok(()) => {
                    if let Ok(data) = self.record_mut(id) {
                        data.flags.set(RecordFlags::INITIALIZED);
                    }
                }
                Err(err) => {
                    let name = self
                        .record(id)
                        .map(|d| d.name().to_owned())
                        .unwrap_or_default();
                    if matches!(err, Error::CorruptDataStructure(_)) {
                        // Structural failure: abort regardless of policy.
                        return Err(err);
                    }
                    warn!(record = name.as_str(), %err, "late initialization failed");
                    if let Ok(data) = self.record_mut(id) {
                        data.flags.set(RecordFlags::BROKEN);
                    }
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        let broken: Vec<RecordId> = self
            .order
            .iter()
            .copied()
            .filter(|id| {
                self.records
                    .get(*id)
                    .is_some_and(|r| r.data.flags.has(RecordFlags::BROKEN))
            })
            .collect();
        if !broken.is_empty() {
            if self.policy.delete_broken_records {
                for id in broken {
                    let name = self
                        .record(id)
                        .map(|d| d.name().to_owned())
                        .unwrap_or_default();
                    warn!(record = name.as_str(), "deleting broken record");
                    self.force_delete(id)?;
                }
            } else if let Some(err) = first_error {
                return Err(err);
            }
        }

        self.active = true;
        Ok(())
    }

    /// Run the `open` hook for every enabled record, in load order.
    pub fn open_all(&mut self) -> Result<()> {
        for id in self.order.clone() {
            let skip = {
                let data = self.record(id)?;
                data.flags.has(RecordFlags::BROKEN) || !data.flags.has(RecordFlags::ENABLED)
            };
            if skip {
                continue;
            }
            match self.run_hook(id, |support, db, id| support.open(db, id)) {
                Ok(()) => {
                    self.record_mut(id)?.flags.set(RecordFlags::OPEN);
                }
                Err(err) => {
                    let name = self.record(id)?.name().to_owned();
                    warn!(record = name.as_str(), %err, "open failed");
                    self.record_mut(id)?.flags.set(RecordFlags::BROKEN);
                    if self.policy.delete_broken_records {
                        self.force_delete(id)?;
                    } else {
                        return Err(err);
                    }
                }
            }
        }
        Ok(())
    }

    /// Run the `close` hook for every open record, in reverse load order.
    pub fn close_all(&mut self) -> Result<()> {
        for id in self.order.clone().into_iter().rev() {
            let is_open = self
                .records
                .get(id)
                .is_some_and(|r| r.data.flags.has(RecordFlags::OPEN));
            if !is_open {
                continue;
            }
            self.run_hook(id, |support, db, id| support.close(db, id))?;
            self.record_mut(id)?.flags.clear(RecordFlags::OPEN);
        }
        Ok(())
    }

    /// Run the `resynchronize` hook for one record.
    pub fn resynchronize(&mut self, id: RecordId) -> Result<()> {
        self.run_hook(id, |support, db, id| support.resynchronize(db, id))
    }

    /// Delete a record.
    ///
    /// Fails with `PermissionDenied` while other records still depend on
    /// it; this is what prevents dangling children.
    pub fn delete_record(&mut self, id: RecordId) -> Result<()> {
        let (name, num_children) = {
            let data = self.record(id)?;
            (data.name().to_owned(), data.children.len())
        };
        if num_children > 0 {
            return Err(Error::PermissionDenied(format!(
                "record '{name}' still has {num_children} child record(s)"
            )));
        }
        self.remove_record(id)
    }

    /// Delete a record unconditionally, unlinking both graph directions.
    /// Used for broken-record cleanup during load.
    pub(crate) fn force_delete(&mut self, id: RecordId) -> Result<()> {
        let children = self.record(id)?.children.clone();
        for child in children {
            let _ = self.delete_parent_dependency(child, id, true);
        }
        self.remove_record(id)
    }

    fn remove_record(&mut self, id: RecordId) -> Result<()> {
        let parents = self.record(id)?.parents.clone();
        for parent in parents {
            let _ = self.delete_parent_dependency(id, parent, true);
        }
        let _ = self.run_hook(id, |support, db, id| support.delete(db, id));
        if let Some(record) = self.records.remove(id) {
            let name = record.data.name().to_owned();
            let handle = record.data.handle() as usize;
            self.by_name.remove(&name);
            self.order.retain(|other| *other != id);
            if let Some(slot) = self.handles.get_mut(handle) {
                *slot = None;
            }
            // Fixups registered by this record die with it; the fixup pass
            // must not chase references out of a deleted record.
            for slot in &mut self.fixups {
                if slot.as_ref().is_some_and(|entry| entry.record == id) {
                    *slot = None;
                }
            }
            debug!(record = name.as_str(), "deleted record");
        }
        Ok(())
    }

    fn run_hook<F>(&mut self, id: RecordId, f: F) -> Result<()>
    where
        F: FnOnce(&mut Box<dyn super::driver::RecordSupport>, &mut Database, RecordId) -> Result<()>,
    {
        let mut support = self
            .records
            .get_mut(id)
            .ok_or_else(|| Error::NotFound("record id is stale".into()))?
            .support
            .take()
            .ok_or_else(|| {
                Error::CorruptDataStructure("record has no support instance".into())
            })?;
        let result = f(&mut support, self, id);
        // The hook may have deleted the record; drop the support in that case.
        if let Some(record) = self.records.get_mut(id) {
            record.support = Some(support);
        }
        result
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}
