use std::collections::{HashMap, HashSet};

use crate::error::LoadError;

/// Converts a raw cell before it enters the normalized row.
pub type Converter = fn(&str) -> Result<String, String>;

#[derive(Debug, Clone)]
pub enum ColumnDescriptor {
    Header {
        header: String,
        key: Option<String>,
        converter: Option<Converter>,
    },
    Positional {
        key: Option<String>,
    },
}

impl ColumnDescriptor {
    pub fn header(header: &str, key: &str) -> Self {
        ColumnDescriptor::Header {
            header: header.to_string(),
            key: Some(key.to_string()),
            converter: None,
        }
    }

    pub fn header_with(header: &str, key: &str, converter: Converter) -> Self {
        ColumnDescriptor::Header {
            header: header.to_string(),
            key: Some(key.to_string()),
            converter: Some(converter),
        }
    }

    pub fn ignored_header(header: &str) -> Self {
        ColumnDescriptor::Header {
            header: header.to_string(),
            key: None,
            converter: None,
        }
    }

    pub fn positional(key: Option<&str>) -> Self {
        ColumnDescriptor::Positional {
            key: key.map(str::to_string),
        }
    }

    fn key(&self) -> Option<&str> {
        match self {
            ColumnDescriptor::Header { key, .. } | ColumnDescriptor::Positional { key } => {
                key.as_deref()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColumnSpec {
    has_header: bool,
    all_headers: Vec<String>,
    all_keys: Vec<Option<String>>,
    keys: Vec<String>,
    converters: HashMap<String, Converter>,
    by_folded_header: HashMap<String, Option<String>>,
}

/// Where each column of an actual input file goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMapping {
    /// One entry per input column: the semantic key, or `None` if discarded.
    pub targets: Vec<Option<String>>,
    /// Input headers that matched no declared column, in file order.
    pub ignored: Vec<String>,
}

impl ColumnSpec {
    pub fn new(descriptors: Vec<ColumnDescriptor>) -> Result<Self, LoadError> {
        let first = descriptors.first().ok_or_else(|| {
            LoadError::Configuration("at least one column needs to be declared".into())
        })?;
        let has_header = matches!(first, ColumnDescriptor::Header { .. });

        let mut all_headers = Vec::new();
        let mut all_keys = Vec::with_capacity(descriptors.len());
        let mut keys = Vec::new();
        let mut converters = HashMap::new();
        let mut by_folded_header = HashMap::new();
        let mut seen = HashSet::new();

        for descriptor in &descriptors {
            if let Some(key) = descriptor.key() {
                if !seen.insert(key.to_string()) {
                    return Err(LoadError::Configuration(format!(
                        "semantic key '{key}' is declared more than once"
                    )));
                }
            }
            match descriptor {
                ColumnDescriptor::Header {
                    header,
                    key,
                    converter,
                } => {
                    if !has_header {
                        return Err(LoadError::Configuration(
                            "cannot mix header and positional column declarations".into(),
                        ));
                    }
                    let folded = casefold(header);
                    if by_folded_header.insert(folded, key.clone()).is_some() {
                        return Err(LoadError::Configuration(format!(
                            "header '{header}' is declared more than once"
                        )));
                    }
                    all_headers.push(header.clone());
                    if let (Some(key), Some(conv)) = (key, converter) {
                        converters.insert(key.clone(), *conv);
                    }
                }
                ColumnDescriptor::Positional { .. } => {
                    if has_header {
                        return Err(LoadError::Configuration(
                            "cannot mix header and positional column declarations".into(),
                        ));
                    }
                }
            }
            let key = descriptor.key().map(str::to_string);
            if let Some(k) = &key {
                keys.push(k.clone());
            }
            all_keys.push(key);
        }

        Ok(Self {
            has_header,
            all_headers,
            all_keys,
            keys,
            converters,
            by_folded_header,
        })
    }

    pub fn has_header(&self) -> bool {
        self.has_header
    }

    /// Declared header names, empty for positional formats.
    pub fn headers(&self) -> &[String] {
        &self.all_headers
    }

    /// One entry per declared column, `None` where the column is ignored.
    pub fn all_keys(&self) -> &[Option<String>] {
        &self.all_keys
    }

    /// Keys of the columns that are kept.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn converter(&self, key: &str) -> Option<Converter> {
        self.converters.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.all_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all_keys.is_empty()
    }

    /// Values of the kept columns of `row`, in declaration order.
    pub fn cut<'r, S: AsRef<str>>(&'r self, row: &'r [S]) -> impl Iterator<Item = &'r str> + 'r {
        self.all_keys
            .iter()
            .zip(row.iter())
            .filter(|(key, _)| key.is_some())
            .map(|(_, value)| value.as_ref())
    }

    /// Matches the headers found in a file against the declared ones.
    ///
    /// Unknown headers do not fail; they are listed in
    /// [`HeaderMapping::ignored`] and their values never reach the
    /// normalized row.
    pub fn map_headers<S: AsRef<str>>(&self, input: &[S]) -> HeaderMapping {
        let mut targets = Vec::with_capacity(input.len());
        let mut ignored = Vec::new();
        for header in input {
            let header = header.as_ref();
            match self.by_folded_header.get(&casefold(header)) {
                Some(key) => targets.push(key.clone()),
                None => {
                    targets.push(None);
                    ignored.push(header.to_string());
                }
            }
        }
        HeaderMapping { targets, ignored }
    }

    /// Mapping for formats without a header line.
    pub fn positional_mapping(&self) -> HeaderMapping {
        HeaderMapping {
            targets: self.all_keys.clone(),
            ignored: Vec::new(),
        }
    }
}

fn casefold(value: &str) -> String {
    value.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upper(value: &str) -> Result<String, String> {
        Ok(value.to_uppercase())
    }

    fn sample_spec() -> ColumnSpec {
        ColumnSpec::new(vec![
            ColumnDescriptor::header("Sample_ID", "sample_id"),
            ColumnDescriptor::ignored_header("batch"),
            ColumnDescriptor::header_with("Study_week", "week", upper),
        ])
        .expect("valid spec")
    }

    #[test]
    fn empty_spec_is_a_configuration_error() {
        let err = ColumnSpec::new(Vec::new()).unwrap_err();
        assert!(matches!(err, LoadError::Configuration(_)));
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let err = ColumnSpec::new(vec![
            ColumnDescriptor::header("a", "x"),
            ColumnDescriptor::header("b", "x"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("'x'"));
    }

    #[test]
    fn mixed_declarations_are_rejected() {
        let err = ColumnSpec::new(vec![
            ColumnDescriptor::header("a", "x"),
            ColumnDescriptor::positional(Some("y")),
        ])
        .unwrap_err();
        assert!(matches!(err, LoadError::Configuration(_)));
    }

    #[test]
    fn exposes_headers_keys_and_converters() {
        let spec = sample_spec();
        assert!(spec.has_header());
        assert_eq!(spec.headers(), ["Sample_ID", "batch", "Study_week"]);
        assert_eq!(
            spec.all_keys(),
            [Some("sample_id".to_string()), None, Some("week".to_string())]
        );
        assert_eq!(spec.keys(), ["sample_id", "week"]);
        assert!(spec.converter("week").is_some());
        assert!(spec.converter("sample_id").is_none());
        assert_eq!(spec.len(), 3);
    }

    #[test]
    fn cut_skips_ignored_positions_and_restarts() {
        let spec = sample_spec();
        let first = spec.cut(&["s1", "b1", "3"]).collect::<Vec<_>>();
        let second = spec.cut(&["s2", "b2", "4"]).collect::<Vec<_>>();
        assert_eq!(first, ["s1", "3"]);
        assert_eq!(second, ["s2", "4"]);
    }

    #[test]
    fn header_matching_is_case_insensitive_and_tolerant() {
        let spec = sample_spec();
        let mapping = spec.map_headers(&["sample_id", "EXTRA", "study_WEEK", "BATCH"]);
        assert_eq!(
            mapping.targets,
            [
                Some("sample_id".to_string()),
                None,
                Some("week".to_string()),
                None
            ]
        );
        assert_eq!(mapping.ignored, ["EXTRA"]);
    }

    #[test]
    fn positional_specs_map_by_position() {
        let spec = ColumnSpec::new(vec![
            ColumnDescriptor::positional(Some("name")),
            ColumnDescriptor::positional(None),
            ColumnDescriptor::positional(Some("count")),
        ])
        .expect("positional spec");
        assert!(!spec.has_header());
        assert!(spec.headers().is_empty());
        let mapping = spec.positional_mapping();
        assert_eq!(mapping.targets.len(), 3);
        assert!(mapping.ignored.is_empty());
    }
}
