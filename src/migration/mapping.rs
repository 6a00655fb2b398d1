use std::collections::HashMap;

use indexmap::IndexMap;

use super::entity::EntityKind;

/// legacy id -> destination id, in the order rows were imported.
pub type IdMap = IndexMap<i64, i64>;

/// Id-remapping tables for one run. Never persisted.
#[derive(Debug, Default, Clone)]
pub struct Mappings {
    maps: HashMap<EntityKind, IdMap>,
}

impl Mappings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: EntityKind, legacy_id: i64) -> Option<i64> {
        self.maps.get(&kind)?.get(&legacy_id).copied()
    }

    pub fn insert(&mut self, kind: EntityKind, legacy_id: i64, new_id: i64) {
        self.maps.entry(kind).or_default().insert(legacy_id, new_id);
    }

    /// Merge a kind's completed table.
    pub fn extend(&mut self, kind: EntityKind, ids: IdMap) {
        self.maps.entry(kind).or_default().extend(ids);
    }
}
