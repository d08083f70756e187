//! Parent/child dependency graph operations.
//!
//! Links are stored redundantly in both directions for O(1) local
//! traversal; every operation keeps the two sides consistent. The
//! reciprocal flag exists so the mirror call does not recurse forever.

use tracing::debug;

use super::database::Database;
use super::error::{Error, Result};
use super::RecordId;

impl Database {
    /// Record that `child` depends on `parent`.
    ///
    /// With `also_add_child` set (the normal case) the reciprocal child
    /// entry is added to `parent` as well.
    pub fn add_parent_dependency(
        &mut self,
        child: RecordId,
        parent: RecordId,
        also_add_child: bool,
    ) -> Result<()> {
        if child == parent {
            let name = self.record(child)?.name().to_owned();
            return Err(Error::IllegalArgument(format!(
                "record '{name}' cannot depend on itself"
            )));
        }
        // Both ends must be live before either side is touched.
        self.record(parent)?;
        let data = self.record_mut(child)?;
        if data.parents.contains(&parent) {
            return Err(Error::IllegalArgument(format!(
                "record '{}' already lists that parent",
                data.name()
            )));
        }
        data.parents.push(parent);
        if also_add_child {
            self.add_child_dependency(parent, child, false)?;
        }
        debug!(?child, ?parent, "added dependency");
        Ok(())
    }

    /// Remove `parent` from `child`'s parent array.
    pub fn delete_parent_dependency(
        &mut self,
        child: RecordId,
        parent: RecordId,
        also_delete_child: bool,
    ) -> Result<()> {
        let data = self.record_mut(child)?;
        let position = data
            .parents
            .iter()
            .position(|id| *id == parent)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "record '{}' does not list that parent",
                    data.name()
                ))
            })?;
        // Vec::remove compacts the survivors toward the front.
        data.parents.remove(position);
        if also_delete_child {
            self.delete_child_dependency(parent, child, false)?;
        }
        Ok(())
    }

    /// Record that `child` depends on `parent`, from the parent's side.
    pub fn add_child_dependency(
        &mut self,
        parent: RecordId,
        child: RecordId,
        also_add_parent: bool,
    ) -> Result<()> {
        if child == parent {
            let name = self.record(parent)?.name().to_owned();
            return Err(Error::IllegalArgument(format!(
                "record '{name}' cannot depend on itself"
            )));
        }
        self.record(child)?;
        let data = self.record_mut(parent)?;
        if data.children.contains(&child) {
            return Err(Error::IllegalArgument(format!(
                "record '{}' already lists that child",
                data.name()
            )));
        }
        data.children.push(child);
        if also_add_parent {
            self.add_parent_dependency(child, parent, false)?;
        }
        Ok(())
    }

    /// Remove `child` from `parent`'s child array.
    pub fn delete_child_dependency(
        &mut self,
        parent: RecordId,
        child: RecordId,
        also_delete_parent: bool,
    ) -> Result<()> {
        let data = self.record_mut(parent)?;
        let position = data
            .children
            .iter()
            .position(|id| *id == child)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "record '{}' does not list that child",
                    data.name()
                ))
            })?;
        data.children.remove(position);
        if also_delete_parent {
            self.delete_parent_dependency(child, parent, false)?;
        }
        Ok(())
    }

    /// Number of records `id` depends on.
    pub fn num_parents(&self, id: RecordId) -> Result<usize> {
        Ok(self.record(id)?.parents.len())
    }

    /// Number of records depending on `id`.
    pub fn num_children(&self, id: RecordId) -> Result<usize> {
        Ok(self.record(id)?.children.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::driver::Driver;
    use crate::record::Superclass;
    use std::sync::Arc;

    fn db_with(names: &[&str]) -> (Database, Vec<RecordId>) {
        let driver = Arc::new(
            Driver::new("soft_timer", Superclass::Device, "timer", 3, 300, vec![]).unwrap(),
        );
        let mut db = Database::new();
        let ids = names
            .iter()
            .map(|name| db.create_record(name, &driver).unwrap())
            .collect();
        (db, ids)
    }

    fn symmetric(db: &Database, a: RecordId, b: RecordId) -> bool {
        let a_lists_b = db.record(a).unwrap().children().contains(&b);
        let b_lists_a = db.record(b).unwrap().parents().contains(&a);
        a_lists_b == b_lists_a
    }

    #[test]
    fn links_are_symmetric() {
        let (mut db, ids) = db_with(&["a", "b"]);
        db.add_parent_dependency(ids[1], ids[0], true).unwrap();

        assert!(db.record(ids[0]).unwrap().children().contains(&ids[1]));
        assert!(db.record(ids[1]).unwrap().parents().contains(&ids[0]));
        assert!(symmetric(&db, ids[0], ids[1]));

        db.delete_parent_dependency(ids[1], ids[0], true).unwrap();
        assert_eq!(db.num_children(ids[0]).unwrap(), 0);
        assert_eq!(db.num_parents(ids[1]).unwrap(), 0);
    }

    #[test]
    fn symmetry_survives_interleaved_ops() {
        let (mut db, ids) = db_with(&["a", "b", "c", "d"]);
        db.add_parent_dependency(ids[1], ids[0], true).unwrap();
        db.add_child_dependency(ids[0], ids[2], true).unwrap();
        db.add_parent_dependency(ids[3], ids[1], true).unwrap();
        db.delete_child_dependency(ids[0], ids[1], true).unwrap();
        db.add_parent_dependency(ids[1], ids[0], true).unwrap();
        db.delete_parent_dependency(ids[2], ids[0], true).unwrap();

        for &a in &ids {
            for &b in &ids {
                assert!(symmetric(&db, a, b));
            }
        }
    }

    #[test]
    fn self_dependency_is_rejected() {
        let (mut db, ids) = db_with(&["a"]);
        assert!(matches!(
            db.add_parent_dependency(ids[0], ids[0], true),
            Err(Error::IllegalArgument(_))
        ));
    }

    #[test]
    fn duplicate_links_are_rejected() {
        let (mut db, ids) = db_with(&["a", "b"]);
        db.add_parent_dependency(ids[1], ids[0], true).unwrap();
        assert!(db.add_parent_dependency(ids[1], ids[0], true).is_err());
        // The failed add must not have broken symmetry.
        assert!(symmetric(&db, ids[0], ids[1]));
    }

    #[test]
    fn delete_with_children_is_rejected_and_graph_unchanged() {
        let (mut db, ids) = db_with(&["parent", "child"]);
        db.add_parent_dependency(ids[1], ids[0], true).unwrap();

        let err = db.delete_record(ids[0]).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
        assert_eq!(db.len(), 2);
        assert!(db.record(ids[0]).unwrap().children().contains(&ids[1]));

        // Removing the dependent first makes the delete legal.
        db.delete_record(ids[1]).unwrap();
        db.delete_record(ids[0]).unwrap();
        assert!(db.is_empty());
    }
}
