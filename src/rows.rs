use std::{collections::BTreeMap, fmt};

use crate::{
    column_spec::{ColumnSpec, HeaderMapping},
    error::LoadError,
    missing::MissingValues,
};

/// Semantic key to non-empty value for a single input line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedRow {
    values: BTreeMap<String, String>,
}

impl NormalizedRow {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for NormalizedRow {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl fmt::Display for NormalizedRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (idx, (key, value)) in self.values.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{key}: {value:?}")?;
        }
        write!(f, "}}")
    }
}

pub fn split_line(line: &str, separator: char) -> Vec<String> {
    line.trim_end_matches(['\n', '\r'])
        .split(separator)
        .map(|field| field.trim().to_string())
        .collect()
}

pub struct RowParser<'s> {
    spec: &'s ColumnSpec,
    separator: char,
    targets: Vec<Option<String>>,
    missing: MissingValues,
    line: usize,
}

impl<'s> RowParser<'s> {
    /// `first_line` is the line number of the header, or 0 if there is none.
    pub fn new(
        spec: &'s ColumnSpec,
        mapping: &HeaderMapping,
        separator: char,
        missing: MissingValues,
        first_line: usize,
    ) -> Self {
        Self {
            spec,
            separator,
            targets: mapping.targets.clone(),
            missing,
            line: first_line,
        }
    }

    /// Number of the line most recently handed to [`RowParser::parse_line`].
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn is_blank(line: &str) -> bool {
        line.trim().is_empty()
    }

    /// Counts a line that is skipped without parsing.
    pub fn skip_line(&mut self) {
        self.line += 1;
    }

    pub fn parse_line(&mut self, line: &str) -> Result<NormalizedRow, LoadError> {
        self.line += 1;
        let fields = split_line(line, self.separator);
        let mut row = NormalizedRow::default();
        for (target, value) in self.targets.iter().zip(fields) {
            let Some(key) = target else {
                continue;
            };
            if self.missing.is_missing(&value) {
                continue;
            }
            let value = match self.spec.converter(key) {
                Some(convert) => convert(&value).map_err(|err| {
                    LoadError::UserData(format!(
                        "Failed parsing value \"{value}\" in column {key}: {err}"
                    ))
                })?,
                None => value,
            };
            row.insert(key.clone(), value);
        }
        Ok(row)
    }
}
