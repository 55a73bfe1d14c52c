use std::{collections::BTreeMap, fmt::Write as _};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness or foreign-key constraint rejected the write.
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("no open savepoint to {0}")]
    NoSavepoint(&'static str),
    #[error("unknown entity id {0}")]
    UnknownEntity(i64),
    #[error("database error: {0}")]
    Database(String),
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(failure, msg)
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Constraint(msg.unwrap_or_else(|| failure.to_string()))
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, Error)]
pub enum LoadError {
    /// Malformed loader setup, e.g. an empty or inconsistent column spec.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Bad or inconsistent input data.
    #[error("{0}")]
    UserData(String),
    /// The identifying fields matched more than one stored entity.
    #[error("{query} is not specific enough for {kind}")]
    AmbiguousLookup { kind: String, query: String },
    /// An entity failed its schema constraints before being saved.
    #[error("{kind}: {}", render_field_errors(.errors))]
    Validation { kind: String, errors: FieldErrors },
    /// The store refused a write because of a uniqueness constraint.
    #[error("integrity error: {0}")]
    Integrity(String),
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A fatal error with the offending input line attached.
    #[error("at line {line}: {source}, current row:\n{row}")]
    AtLine {
        line: usize,
        row: String,
        #[source]
        source: Box<LoadError>,
    },
}

impl From<StoreError> for LoadError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Constraint(msg) => LoadError::Integrity(msg),
            other => LoadError::Store(other),
        }
    }
}

impl LoadError {
    pub fn validation(kind: &str, field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![message.into()]);
        LoadError::Validation {
            kind: kind.to_string(),
            errors,
        }
    }

    /// True for errors caused by the input data rather than the program.
    pub fn is_user_error(&self) -> bool {
        match self {
            LoadError::UserData(_)
            | LoadError::AmbiguousLookup { .. }
            | LoadError::Validation { .. }
            | LoadError::Integrity(_) => true,
            LoadError::AtLine { source, .. } => source.is_user_error(),
            _ => false,
        }
    }

    /// Label used when reporting the error inside a warning.
    pub fn kind_name(&self) -> &'static str {
        match self {
            LoadError::Configuration(_) => "ConfigurationError",
            LoadError::UserData(_) => "UserDataError",
            LoadError::AmbiguousLookup { .. } => "AmbiguousLookupError",
            LoadError::Validation { .. } => "ValidationError",
            LoadError::Integrity(_) => "IntegrityError",
            LoadError::Store(_) => "StoreError",
            LoadError::Io(_) => "IoError",
            LoadError::AtLine { source, .. } => source.kind_name(),
        }
    }

    pub(crate) fn at_line(self, line: usize, row: String) -> Self {
        LoadError::AtLine {
            line,
            row,
            source: Box::new(self),
        }
    }
}

fn render_field_errors(errors: &FieldErrors) -> String {
    let mut out = String::new();
    for (idx, (field, messages)) in errors.iter().enumerate() {
        if idx > 0 {
            out.push_str("; ");
        }
        let _ = write!(out, "{field}: {}", messages.join(", "));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_lists_fields_in_order() {
        let mut errors = FieldErrors::new();
        errors.insert("week".into(), vec!["required".into()]);
        errors.insert("number".into(), vec!["not an integer".into(), "too big".into()]);
        let err = LoadError::Validation {
            kind: "fecalsample".into(),
            errors,
        };
        assert_eq!(
            err.to_string(),
            "fecalsample: number: not an integer, too big; week: required"
        );
    }

    #[test]
    fn constraint_store_errors_become_integrity_errors() {
        let err: LoadError = StoreError::Constraint("UNIQUE failed".into()).into();
        assert!(matches!(err, LoadError::Integrity(_)));
        assert!(err.is_user_error());
        let err: LoadError = StoreError::Database("disk".into()).into();
        assert!(!err.is_user_error());
    }

    #[test]
    fn line_context_keeps_kind_of_source() {
        let err = LoadError::UserData("bad".into()).at_line(7, "{a: b}".into());
        assert_eq!(err.kind_name(), "UserDataError");
        assert!(err.is_user_error());
        assert_eq!(err.to_string(), "at line 7: bad, current row:\n{a: b}");
    }
}
