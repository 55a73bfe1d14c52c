use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// Surrogate identity of a stored entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub i64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Ref(EntityId),
}

/// Field name to value, ordered so diffs and reports are deterministic.
pub type Fields = BTreeMap<String, FieldValue>;

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    /// Blank text counts as unset; every other value is data.
    pub fn is_empty(&self) -> bool {
        matches!(self, FieldValue::Text(s) if s.trim().is_empty())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_ref_id(&self) -> Option<EntityId> {
        match self {
            FieldValue::Ref(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_display(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Integer(i) => i.to_string(),
            FieldValue::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{f:.1}")
                } else {
                    f.to_string()
                }
            }
            FieldValue::Boolean(b) => b.to_string(),
            FieldValue::Ref(id) => id.to_string(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<EntityId> for FieldValue {
    fn from(value: EntityId) -> Self {
        FieldValue::Ref(value)
    }
}

/// Treats a missing field and a blank one alike.
pub fn is_unset(value: Option<&FieldValue>) -> bool {
    value.is_none_or(FieldValue::is_empty)
}

/// Equality that does not distinguish an absent field from a blank one.
pub fn same_value(left: Option<&FieldValue>, right: Option<&FieldValue>) -> bool {
    match (left, right) {
        (Some(a), Some(b)) if !a.is_empty() || !b.is_empty() => a == b,
        _ => is_unset(left) && is_unset(right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_is_empty_but_zero_is_not() {
        assert!(FieldValue::text("  ").is_empty());
        assert!(!FieldValue::Integer(0).is_empty());
        assert!(is_unset(None));
    }

    #[test]
    fn same_value_ignores_absent_versus_blank() {
        let blank = FieldValue::text("");
        let v = FieldValue::text("v");
        assert!(same_value(None, Some(&blank)));
        assert!(!same_value(None, Some(&v)));
        assert!(same_value(Some(&v), Some(&FieldValue::text("v"))));
        assert!(!same_value(Some(&FieldValue::Integer(3)), Some(&FieldValue::text("3"))));
    }

    #[test]
    fn float_display_keeps_decimal_point() {
        assert_eq!(FieldValue::Float(7.0).as_display(), "7.0");
        assert_eq!(FieldValue::Float(6.5).as_display(), "6.5");
        assert_eq!(FieldValue::Ref(EntityId(4)).as_display(), "#4");
    }
}
