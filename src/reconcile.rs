//! Record reconciliation.
//!
//! A [`RowContext`] lives for exactly one input row. Format code calls
//! [`RowContext::get_or_create`] once per entity type, leaves before roots;
//! each call resolves the entity by its identifying fields, compares the
//! proposed values against what is stored and applies them under the
//! overwrite policy. Everything the row did is gathered in a [`RowOutcome`]
//! which the batch driver keeps only if the row succeeds.

use std::collections::BTreeMap;

use chrono::Utc;
use log::debug;
use serde::Serialize;

use crate::{
    error::LoadError,
    registry::Registry,
    rows::NormalizedRow,
    store::{Actor, ChangeRecord, Entity, Store},
    value::{EntityId, FieldValue, Fields, is_unset, same_value},
};

/// Where a write came from, for the audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditStamp {
    pub file: String,
    pub line: usize,
    pub actor: Actor,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcilePolicy {
    /// Apply conflicting changes instead of only reporting them.
    pub can_overwrite: bool,
    /// Treat an unparseable sample id as a data error instead of skipping it.
    pub strict_sample_id: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub old: Option<FieldValue>,
    pub new: FieldValue,
}

impl FieldChange {
    /// True if the stored value was unset, so nothing is overwritten.
    pub fn fills_blank(&self) -> bool {
        is_unset(self.old.as_ref())
    }
}

/// A conflicting change to an existing entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEntry {
    pub entity: EntityId,
    pub label: String,
    pub fields: Vec<FieldChange>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Unchanged,
    /// Every differing field was unset before.
    Consistent(Vec<FieldChange>),
    /// At least one differing field already holds data.
    Conflicting(Vec<FieldChange>),
}

/// Compares proposed values against an entity's stored fields.
///
/// Blank proposals never count as a difference; the loader only adds data.
pub fn compare(current: &Fields, proposed: &Fields) -> Comparison {
    let diff = proposed
        .iter()
        .filter(|(_, new)| !new.is_empty())
        .filter(|(field, new)| !same_value(current.get(*field), Some(new)))
        .map(|(field, new)| FieldChange {
            field: field.clone(),
            old: current.get(field).filter(|v| !v.is_empty()).cloned(),
            new: new.clone(),
        })
        .collect::<Vec<_>>();
    if diff.is_empty() {
        Comparison::Unchanged
    } else if diff.iter().all(FieldChange::fills_blank) {
        Comparison::Consistent(diff)
    } else {
        Comparison::Conflicting(diff)
    }
}

/// What one row did, by entity type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowOutcome {
    pub new: BTreeMap<String, usize>,
    pub added: BTreeMap<String, usize>,
    pub changed: BTreeMap<String, Vec<ChangeEntry>>,
}

impl RowOutcome {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.added.is_empty() && self.changed.is_empty()
    }
}

pub struct RowContext<'a> {
    store: &'a mut dyn Store,
    registry: &'a Registry,
    policy: ReconcilePolicy,
    audit: AuditStamp,
    row: NormalizedRow,
    rec: BTreeMap<String, Entity>,
    outcome: RowOutcome,
}

impl<'a> RowContext<'a> {
    pub fn new(
        store: &'a mut dyn Store,
        registry: &'a Registry,
        policy: ReconcilePolicy,
        audit: AuditStamp,
        row: NormalizedRow,
    ) -> Self {
        Self {
            store,
            registry,
            policy,
            audit,
            row,
            rec: BTreeMap::new(),
            outcome: RowOutcome::default(),
        }
    }

    pub fn row(&self) -> &NormalizedRow {
        &self.row
    }

    pub fn row_mut(&mut self) -> &mut NormalizedRow {
        &mut self.row
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.row.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.row.contains(key)
    }

    pub fn require(&self, key: &str) -> Result<&str, LoadError> {
        self.row
            .get(key)
            .ok_or_else(|| LoadError::UserData(format!("missing value for {key}")))
    }

    /// Row values for whichever of `keys` are present, as text fields.
    pub fn from_row(&self, keys: &[&str]) -> Fields {
        keys.iter()
            .filter_map(|k| self.row.get(k).map(|v| (k.to_string(), FieldValue::text(v))))
            .collect()
    }

    pub fn policy(&self) -> ReconcilePolicy {
        self.policy
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub fn line(&self) -> usize {
        self.audit.line
    }

    /// Entity already resolved under `key` earlier in this row.
    pub fn resolved(&self, key: &str) -> Option<&Entity> {
        self.rec.get(key)
    }

    pub fn remember(&mut self, key: &str, entity: Entity) {
        self.rec.insert(key.to_string(), entity);
    }

    /// Resolves an entity from its natural-key string, creating it if needed.
    pub fn get_or_create_natural(&mut self, kind: &str, natural: &str) -> Result<Entity, LoadError> {
        let identifiers = self.registry.natural_lookup(kind, natural)?;
        self.get_or_create(kind, identifiers, Fields::new())
    }

    /// Finds the single `kind` entity matching `identifiers`, or creates one.
    ///
    /// A new entity gets `identifiers` and `proposed` together. An existing
    /// one is compared against `proposed`: filling blank fields is applied
    /// and counted as an addition; overwriting data is recorded as a change
    /// and applied only when the policy allows it. The entity is remembered
    /// under `kind` for later steps of the row.
    pub fn get_or_create(
        &mut self,
        kind: &str,
        identifiers: Fields,
        proposed: Fields,
    ) -> Result<Entity, LoadError> {
        let identifiers = self.registry.coerce_fields(kind, identifiers)?;
        let proposed = self.registry.coerce_fields(kind, proposed)?;

        let mut found = self.store.find(kind, &identifiers)?;
        let entity = match found.len() {
            0 => {
                let mut fields = identifiers;
                fields.extend(proposed);
                self.create(kind, fields)?
            }
            1 => {
                let existing = found.remove(0);
                self.reconcile(existing, &proposed)?
            }
            _ => {
                return Err(LoadError::AmbiguousLookup {
                    kind: kind.to_string(),
                    query: describe(&identifiers),
                });
            }
        };
        self.remember(kind, entity.clone());
        Ok(entity)
    }

    /// Adds a many-to-many association; existing ones are never removed.
    pub fn add_link(&mut self, from: &Entity, relation: &str, to: &Entity) -> Result<bool, LoadError> {
        let ty = self.registry.get(&from.kind)?;
        match ty.get_field(relation).and_then(|f| f.target()) {
            Some(target) if ty.is_many(relation) && target == to.kind => {}
            _ => {
                return Err(LoadError::Configuration(format!(
                    "{}.{relation} is not a many-to-many relation to {}",
                    from.kind, to.kind
                )));
            }
        }
        Ok(self.store.link(from.id, relation, to.id)?)
    }

    pub fn into_outcome(self) -> RowOutcome {
        self.outcome
    }

    fn create(&mut self, kind: &str, fields: Fields) -> Result<Entity, LoadError> {
        self.registry.validate(&*self.store, kind, None, &fields)?;
        let entity = self.store.insert(kind, fields)?;
        self.record_change(&entity, true)?;
        *self.outcome.new.entry(kind.to_string()).or_default() += 1;
        debug!("line {}: new {kind} {}", self.audit.line, self.registry.label(&entity));
        Ok(entity)
    }

    fn reconcile(&mut self, existing: Entity, proposed: &Fields) -> Result<Entity, LoadError> {
        let kind = existing.kind.clone();
        let apply = match compare(&existing.fields, proposed) {
            Comparison::Unchanged => return Ok(existing),
            Comparison::Consistent(diff) => {
                *self.outcome.added.entry(kind.clone()).or_default() += 1;
                diff
            }
            Comparison::Conflicting(diff) => {
                self.outcome
                    .changed
                    .entry(kind.clone())
                    .or_default()
                    .push(ChangeEntry {
                        entity: existing.id,
                        label: self.registry.label(&existing),
                        fields: diff.clone(),
                    });
                if !self.policy.can_overwrite {
                    return Ok(existing);
                }
                diff
            }
        };
        if apply.is_empty() {
            return Ok(existing);
        }

        let mut updated = existing;
        for change in apply {
            updated.fields.insert(change.field, change.new);
        }
        self.registry
            .validate(&*self.store, &kind, Some(updated.id), &updated.fields)?;
        self.store.update(&updated)?;
        self.record_change(&updated, false)?;
        Ok(updated)
    }

    fn record_change(&mut self, entity: &Entity, created: bool) -> Result<(), LoadError> {
        let record = ChangeRecord {
            entity: entity.id,
            kind: entity.kind.clone(),
            file: self.audit.file.clone(),
            line: self.audit.line,
            actor: self.audit.actor.clone(),
            timestamp: Utc::now(),
            created,
            fields: entity.fields.clone(),
        };
        Ok(self.store.append_change(&record)?)
    }
}

fn describe(fields: &Fields) -> String {
    let parts = fields
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>();
    format!("{{{}}}", parts.join(", "))
}
