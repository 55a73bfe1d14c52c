pub mod memory;
pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::StoreError,
    value::{EntityId, FieldValue, Fields},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: String,
    pub fields: Fields,
}

impl Entity {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_text)
    }
}

/// Who caused a write: a named user, or else the command line that ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
    User(String),
    Command(String),
}

impl Actor {
    pub fn user(&self) -> Option<&str> {
        match self {
            Actor::User(name) => Some(name),
            Actor::Command(_) => None,
        }
    }

    pub fn command_line(&self) -> &str {
        match self {
            Actor::User(_) => "",
            Actor::Command(cmd) => cmd,
        }
    }

    pub fn from_parts(user: Option<String>, command_line: Option<String>) -> Self {
        match user.filter(|u| !u.is_empty()) {
            Some(user) => Actor::User(user),
            None => Actor::Command(command_line.unwrap_or_default()),
        }
    }
}

/// Audit entry appended together with every entity write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub entity: EntityId,
    pub kind: String,
    pub file: String,
    pub line: usize,
    pub actor: Actor,
    pub timestamp: DateTime<Utc>,
    pub created: bool,
    /// Field values as written.
    pub fields: Fields,
}

pub trait Store {
    /// Opens a nested savepoint.
    fn begin(&mut self) -> Result<(), StoreError>;
    /// Keeps the innermost savepoint's writes.
    fn commit(&mut self) -> Result<(), StoreError>;
    /// Discards the innermost savepoint's writes.
    fn rollback(&mut self) -> Result<(), StoreError>;
    /// Number of open savepoints.
    fn depth(&self) -> usize;

    /// All entities of `kind` whose fields equal every entry of `key`.
    ///
    /// A blank key value matches an absent or blank field.
    fn find(&self, kind: &str, key: &Fields) -> Result<Vec<Entity>, StoreError>;
    fn get(&self, id: EntityId) -> Result<Option<Entity>, StoreError>;
    fn all(&self, kind: &str) -> Result<Vec<Entity>, StoreError>;
    fn insert(&mut self, kind: &str, fields: Fields) -> Result<Entity, StoreError>;
    fn update(&mut self, entity: &Entity) -> Result<(), StoreError>;

    /// Adds a many-to-many association; returns false if it already existed.
    fn link(&mut self, from: EntityId, relation: &str, to: EntityId) -> Result<bool, StoreError>;
    fn linked(&self, from: EntityId, relation: &str) -> Result<Vec<EntityId>, StoreError>;

    fn append_change(&mut self, record: &ChangeRecord) -> Result<(), StoreError>;
    fn changes(&self, entity: EntityId) -> Result<Vec<ChangeRecord>, StoreError>;
}

/// Blank values are not persisted; an unset field is simply absent.
pub(crate) fn stored_fields(fields: Fields) -> Fields {
    fields.into_iter().filter(|(_, v)| !v.is_empty()).collect()
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every [`Store`] implementation must share.

    use super::*;

    fn fields(pairs: &[(&str, FieldValue)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    pub fn find_matches_all_key_fields(store: &mut dyn Store) {
        store
            .insert("run", fields(&[("serial", "A".into()), ("number", FieldValue::Integer(1))]))
            .expect("insert");
        store
            .insert("run", fields(&[("serial", "A".into()), ("number", FieldValue::Integer(2))]))
            .expect("insert");
        store
            .insert("week", fields(&[("number", FieldValue::Integer(1))]))
            .expect("insert");

        let hits = store
            .find("run", &fields(&[("serial", "A".into())]))
            .expect("find");
        assert_eq!(hits.len(), 2);
        let hits = store
            .find("run", &fields(&[("serial", "A".into()), ("number", FieldValue::Integer(2))]))
            .expect("find");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].get("number"), Some(&FieldValue::Integer(2)));
        let hits = store
            .find("run", &fields(&[("path", FieldValue::text(""))]))
            .expect("find blank");
        assert_eq!(hits.len(), 2);
        assert!(store.find("run", &fields(&[("serial", "B".into())])).expect("find").is_empty());
    }

    pub fn nested_savepoints_roll_back_independently(store: &mut dyn Store) {
        store.begin().expect("outer");
        let kept = store
            .insert("note", fields(&[("name", "kept".into())]))
            .expect("insert");
        store.begin().expect("inner");
        store
            .insert("note", fields(&[("name", "dropped".into())]))
            .expect("insert");
        assert_eq!(store.depth(), 2);
        store.rollback().expect("rollback inner");
        store.begin().expect("inner again");
        let mut updated = kept.clone();
        updated
            .fields
            .insert("text".into(), FieldValue::text("hello"));
        store.update(&updated).expect("update");
        store.commit().expect("commit inner");
        store.commit().expect("commit outer");
        assert_eq!(store.depth(), 0);

        let notes = store.all("note").expect("all");
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].text("text"), Some("hello"));
        assert!(store.rollback().is_err());
    }

    pub fn outer_rollback_discards_everything(store: &mut dyn Store) {
        store.begin().expect("outer");
        let note = store
            .insert("note", fields(&[("name", "n".into())]))
            .expect("insert");
        let other = store
            .insert("note", fields(&[("name", "m".into())]))
            .expect("insert");
        store.link(note.id, "see_also", other.id).expect("link");
        store.rollback().expect("rollback");
        assert!(store.all("note").expect("all").is_empty());
        assert!(store.get(note.id).expect("get").is_none());
    }

    pub fn links_are_additive(store: &mut dyn Store) {
        let a = store.insert("note", fields(&[("name", "a".into())])).expect("a");
        let b = store.insert("note", fields(&[("name", "b".into())])).expect("b");
        let c = store.insert("note", fields(&[("name", "c".into())])).expect("c");
        assert!(store.link(a.id, "see_also", b.id).expect("link"));
        assert!(!store.link(a.id, "see_also", b.id).expect("relink"));
        assert!(store.link(a.id, "see_also", c.id).expect("link"));
        assert_eq!(store.linked(a.id, "see_also").expect("linked"), vec![b.id, c.id]);
        assert!(store.linked(b.id, "see_also").expect("linked").is_empty());
    }

    pub fn change_records_round_trip(store: &mut dyn Store) {
        let note = store.insert("note", fields(&[("name", "a".into())])).expect("a");
        let record = ChangeRecord {
            entity: note.id,
            kind: "note".into(),
            file: "sheet.tsv".into(),
            line: 4,
            actor: Actor::Command("curation-loader load".into()),
            timestamp: DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
                .expect("ts")
                .with_timezone(&Utc),
            created: true,
            fields: note.fields.clone(),
        };
        store.append_change(&record).expect("append");
        assert_eq!(store.changes(note.id).expect("changes"), vec![record]);
    }

    pub fn blank_values_are_not_stored(store: &mut dyn Store) {
        let note = store
            .insert(
                "note",
                fields(&[("name", "a".into()), ("text", FieldValue::text(""))]),
            )
            .expect("insert");
        assert!(note.get("text").is_none());
        let reloaded = store.get(note.id).expect("get").expect("exists");
        assert_eq!(reloaded, note);
    }
}
