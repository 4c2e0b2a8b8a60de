//! In-memory table of tracked units.
//!
//! Not synchronized: the processor owning the store is driven by a single
//! dispatcher task.

use std::collections::HashMap;

use super::types::LifecycleRecord;
use super::types::UnitId;

#[derive(Debug, Default)]
pub struct LifecycleStore {
    records: HashMap<UnitId, LifecycleRecord>,
}

impl LifecycleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &UnitId) -> Option<&LifecycleRecord> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &UnitId) -> Option<&mut LifecycleRecord> {
        self.records.get_mut(id)
    }

    /// Inserts or replaces the record keyed by `id`, returning the previous one.
    pub fn upsert(&mut self, id: UnitId, record: LifecycleRecord) -> Option<LifecycleRecord> {
        self.records.insert(id, record)
    }

    /// Removes and returns the record for `id`.
    pub fn delete(&mut self, id: &UnitId) -> Option<LifecycleRecord> {
        self.records.remove(id)
    }

    pub fn contains(&self, id: &UnitId) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::domain::lifecycle::types::Unit;

    #[test]
    fn upsert_get_delete() {
        let mut store = LifecycleStore::new();
        let unit = Unit::new("uid-1", "ns", "pod").with_resource_version("1");
        let record = LifecycleRecord::new(&unit, Utc::now());

        assert!(store.upsert(unit.id.clone(), record.clone()).is_none());
        assert_eq!(store.get(&unit.id), Some(&record));
        assert_eq!(store.len(), 1);

        let mut replacement = record.clone();
        replacement.last_resource_version = "2".to_string();
        assert_eq!(store.upsert(unit.id.clone(), replacement), Some(record));

        assert!(store.delete(&unit.id).is_some());
        assert!(store.get(&unit.id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn delete_missing_is_none() {
        let mut store = LifecycleStore::new();
        assert!(store.delete(&UnitId::new("missing")).is_none());
        assert!(!store.contains(&UnitId::new("missing")));
    }
}
