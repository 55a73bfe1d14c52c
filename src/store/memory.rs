use std::collections::{BTreeMap, BTreeSet};

use crate::{
    error::StoreError,
    store::{ChangeRecord, Entity, Store, stored_fields},
    value::{EntityId, Fields, same_value},
};

#[derive(Debug, Clone, Default)]
struct State {
    entities: BTreeMap<EntityId, Entity>,
    links: BTreeSet<(EntityId, String, EntityId)>,
    changes: Vec<ChangeRecord>,
    next_id: i64,
}

/// In-process store; each savepoint keeps a full snapshot to restore.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: State,
    savepoints: Vec<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.entities.is_empty()
    }
}

impl Store for MemoryStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        self.savepoints.push(self.state.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.savepoints
            .pop()
            .map(|_| ())
            .ok_or(StoreError::NoSavepoint("commit"))
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.state = self
            .savepoints
            .pop()
            .ok_or(StoreError::NoSavepoint("roll back"))?;
        Ok(())
    }

    fn depth(&self) -> usize {
        self.savepoints.len()
    }

    fn find(&self, kind: &str, key: &Fields) -> Result<Vec<Entity>, StoreError> {
        Ok(self
            .state
            .entities
            .values()
            .filter(|e| e.kind == kind)
            .filter(|e| key.iter().all(|(k, v)| same_value(e.fields.get(k), Some(v))))
            .cloned()
            .collect())
    }

    fn get(&self, id: EntityId) -> Result<Option<Entity>, StoreError> {
        Ok(self.state.entities.get(&id).cloned())
    }

    fn all(&self, kind: &str) -> Result<Vec<Entity>, StoreError> {
        self.find(kind, &Fields::new())
    }

    fn insert(&mut self, kind: &str, fields: Fields) -> Result<Entity, StoreError> {
        self.state.next_id += 1;
        let entity = Entity {
            id: EntityId(self.state.next_id),
            kind: kind.to_string(),
            fields: stored_fields(fields),
        };
        self.state.entities.insert(entity.id, entity.clone());
        Ok(entity)
    }

    fn update(&mut self, entity: &Entity) -> Result<(), StoreError> {
        let slot = self
            .state
            .entities
            .get_mut(&entity.id)
            .ok_or(StoreError::UnknownEntity(entity.id.0))?;
        slot.fields = stored_fields(entity.fields.clone());
        Ok(())
    }

    fn link(&mut self, from: EntityId, relation: &str, to: EntityId) -> Result<bool, StoreError> {
        for id in [from, to] {
            if !self.state.entities.contains_key(&id) {
                return Err(StoreError::UnknownEntity(id.0));
            }
        }
        Ok(self.state.links.insert((from, relation.to_string(), to)))
    }

    fn linked(&self, from: EntityId, relation: &str) -> Result<Vec<EntityId>, StoreError> {
        Ok(self
            .state
            .links
            .iter()
            .filter(|(f, r, _)| *f == from && r == relation)
            .map(|(_, _, to)| *to)
            .collect())
    }

    fn append_change(&mut self, record: &ChangeRecord) -> Result<(), StoreError> {
        if !self.state.entities.contains_key(&record.entity) {
            return Err(StoreError::UnknownEntity(record.entity.0));
        }
        self.state.changes.push(record.clone());
        Ok(())
    }

    fn changes(&self, entity: EntityId) -> Result<Vec<ChangeRecord>, StoreError> {
        Ok(self
            .state
            .changes
            .iter()
            .filter(|c| c.entity == entity)
            .cloned()
            .collect())
    }
}
