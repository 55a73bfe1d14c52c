use std::{path::Path, time::Duration};

use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use crate::{
    error::StoreError,
    store::{Actor, ChangeRecord, Entity, Store, stored_fields},
    value::{EntityId, FieldValue, Fields},
};

pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entity (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS entity_kind ON entity (kind);
CREATE TABLE IF NOT EXISTS entity_field (
    entity_id INTEGER NOT NULL REFERENCES entity (id),
    name TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (entity_id, name)
);
CREATE INDEX IF NOT EXISTS entity_field_lookup ON entity_field (name, value);
CREATE TABLE IF NOT EXISTS entity_link (
    from_id INTEGER NOT NULL REFERENCES entity (id),
    relation TEXT NOT NULL,
    to_id INTEGER NOT NULL REFERENCES entity (id),
    PRIMARY KEY (from_id, relation, to_id)
);
CREATE TABLE IF NOT EXISTS change_record (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id INTEGER NOT NULL REFERENCES entity (id),
    kind TEXT NOT NULL,
    file TEXT NOT NULL,
    line INTEGER NOT NULL,
    user TEXT,
    command_line TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    created INTEGER NOT NULL,
    fields TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS change_record_entity ON change_record (entity_id);
"#;

pub struct SqliteStore {
    conn: Connection,
    depth: usize,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        debug!("Opening SQLite store {path:?}");
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, depth: 0 })
    }

    fn load_fields(&self, id: EntityId) -> Result<Fields, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT name, value FROM entity_field WHERE entity_id = ?1")?;
        let rows = stmt.query_map(params![id.0], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut fields = Fields::new();
        for row in rows {
            let (name, raw) = row?;
            fields.insert(name, decode_value(&raw)?);
        }
        Ok(fields)
    }

    fn load_entities(&self, ids: Vec<i64>, kind: &str) -> Result<Vec<Entity>, StoreError> {
        ids.into_iter()
            .map(|id| {
                let id = EntityId(id);
                Ok(Entity {
                    id,
                    kind: kind.to_string(),
                    fields: self.load_fields(id)?,
                })
            })
            .collect()
    }

    fn write_fields(&self, id: EntityId, fields: &Fields) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM entity_field WHERE entity_id = ?1", params![id.0])?;
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO entity_field (entity_id, name, value) VALUES (?1, ?2, ?3)",
        )?;
        for (name, value) in fields {
            stmt.execute(params![id.0, name, encode_value(value)?])?;
        }
        Ok(())
    }

    fn exists(&self, id: EntityId) -> Result<bool, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT 1 FROM entity WHERE id = ?1", params![id.0], |_| Ok(()))
            .optional()?
            .is_some())
    }
}

fn encode_value(value: &FieldValue) -> Result<String, StoreError> {
    Ok(serde_json::to_string(value)?)
}

fn decode_value(raw: &str) -> Result<FieldValue, StoreError> {
    Ok(serde_json::from_str(raw)?)
}

impl Store for SqliteStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        self.depth += 1;
        self.conn
            .execute_batch(&format!("SAVEPOINT sp_{}", self.depth))?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.depth == 0 {
            return Err(StoreError::NoSavepoint("commit"));
        }
        self.conn
            .execute_batch(&format!("RELEASE sp_{}", self.depth))?;
        self.depth -= 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        if self.depth == 0 {
            return Err(StoreError::NoSavepoint("roll back"));
        }
        let name = format!("sp_{}", self.depth);
        self.conn
            .execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"))?;
        self.depth -= 1;
        Ok(())
    }

    fn depth(&self) -> usize {
        self.depth
    }

    fn find(&self, kind: &str, key: &Fields) -> Result<Vec<Entity>, StoreError> {
        let mut sql = String::from("SELECT e.id FROM entity e WHERE e.kind = ?");
        let mut args = vec![kind.to_string()];
        for (name, value) in key {
            if value.is_empty() {
                sql.push_str(
                    " AND NOT EXISTS (SELECT 1 FROM entity_field f \
                     WHERE f.entity_id = e.id AND f.name = ?)",
                );
                args.push(name.clone());
            } else {
                sql.push_str(
                    " AND EXISTS (SELECT 1 FROM entity_field f \
                     WHERE f.entity_id = e.id AND f.name = ? AND f.value = ?)",
                );
                args.push(name.clone());
                args.push(encode_value(value)?);
            }
        }
        sql.push_str(" ORDER BY e.id");
        let mut stmt = self.conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(args.iter()), |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        self.load_entities(ids, kind)
    }

    fn get(&self, id: EntityId) -> Result<Option<Entity>, StoreError> {
        let kind: Option<String> = self
            .conn
            .query_row("SELECT kind FROM entity WHERE id = ?1", params![id.0], |row| {
                row.get(0)
            })
            .optional()?;
        match kind {
            Some(kind) => Ok(Some(Entity {
                id,
                kind,
                fields: self.load_fields(id)?,
            })),
            None => Ok(None),
        }
    }

    fn all(&self, kind: &str) -> Result<Vec<Entity>, StoreError> {
        self.find(kind, &Fields::new())
    }

    fn insert(&mut self, kind: &str, fields: Fields) -> Result<Entity, StoreError> {
        self.conn
            .execute("INSERT INTO entity (kind) VALUES (?1)", params![kind])?;
        let id = EntityId(self.conn.last_insert_rowid());
        let fields = stored_fields(fields);
        self.write_fields(id, &fields)?;
        Ok(Entity {
            id,
            kind: kind.to_string(),
            fields,
        })
    }

    fn update(&mut self, entity: &Entity) -> Result<(), StoreError> {
        if !self.exists(entity.id)? {
            return Err(StoreError::UnknownEntity(entity.id.0));
        }
        self.write_fields(entity.id, &stored_fields(entity.fields.clone()))
    }

    fn link(&mut self, from: EntityId, relation: &str, to: EntityId) -> Result<bool, StoreError> {
        for id in [from, to] {
            if !self.exists(id)? {
                return Err(StoreError::UnknownEntity(id.0));
            }
        }
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO entity_link (from_id, relation, to_id) VALUES (?1, ?2, ?3)",
            params![from.0, relation, to.0],
        )?;
        Ok(inserted > 0)
    }

    fn linked(&self, from: EntityId, relation: &str) -> Result<Vec<EntityId>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT to_id FROM entity_link WHERE from_id = ?1 AND relation = ?2 ORDER BY to_id",
        )?;
        let ids = stmt
            .query_map(params![from.0, relation], |row| row.get::<_, i64>(0))?
            .map(|id| id.map(EntityId))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn append_change(&mut self, record: &ChangeRecord) -> Result<(), StoreError> {
        self.conn.execute(
            r#"
            INSERT INTO change_record (
                entity_id, kind, file, line, user, command_line, timestamp, created, fields
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                record.entity.0,
                record.kind,
                record.file,
                record.line as i64,
                record.actor.user(),
                record.actor.command_line(),
                record.timestamp.to_rfc3339(),
                record.created,
                serde_json::to_string(&record.fields)?,
            ],
        )?;
        Ok(())
    }

    fn changes(&self, entity: EntityId) -> Result<Vec<ChangeRecord>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT kind, file, line, user, command_line, timestamp, created, fields
            FROM change_record WHERE entity_id = ?1 ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map(params![entity.0], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, bool>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;
        let mut records = Vec::new();
        for row in rows {
            let (kind, file, line, user, command_line, timestamp, created, fields) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                .map_err(|e| StoreError::Corrupt(format!("timestamp '{timestamp}': {e}")))?
                .with_timezone(&Utc);
            records.push(ChangeRecord {
                entity,
                kind,
                file,
                line: usize::try_from(line)
                    .map_err(|_| StoreError::Corrupt(format!("line number {line}")))?,
                actor: Actor::from_parts(user, Some(command_line)),
                timestamp,
                created,
                fields: serde_json::from_str(&fields)?,
            });
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().expect("in-memory sqlite")
    }

    #[test]
    fn find_matches_all_key_fields() {
        contract::find_matches_all_key_fields(&mut store());
    }

    #[test]
    fn nested_savepoints_roll_back_independently() {
        contract::nested_savepoints_roll_back_independently(&mut store());
    }

    #[test]
    fn outer_rollback_discards_everything() {
        contract::outer_rollback_discards_everything(&mut store());
    }

    #[test]
    fn links_are_additive() {
        contract::links_are_additive(&mut store());
    }

    #[test]
    fn change_records_round_trip() {
        contract::change_records_round_trip(&mut store());
    }

    #[test]
    fn blank_values_are_not_stored() {
        contract::blank_values_are_not_stored(&mut store());
    }

    #[test]
    fn data_survives_reopening_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("curation.db");
        let id = {
            let mut store = SqliteStore::open(&path).expect("open");
            store.begin().expect("begin");
            let note = store
                .insert("note", Fields::from([("name".into(), FieldValue::text("kept"))]))
                .expect("insert");
            store.commit().expect("commit");
            note.id
        };
        let store = SqliteStore::open(&path).expect("reopen");
        let note = store.get(id).expect("get").expect("present");
        assert_eq!(note.text("name"), Some("kept"));
    }

    #[test]
    fn float_values_match_exactly() {
        let mut store = store();
        store
            .insert("sample", Fields::from([("ph".into(), FieldValue::Float(7.0))]))
            .expect("insert");
        let hits = store
            .find("sample", &Fields::from([("ph".into(), FieldValue::Float(7.0))]))
            .expect("find");
        assert_eq!(hits.len(), 1);
    }
}
