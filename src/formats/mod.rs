pub mod dataset;
pub mod manifest;
pub mod sample_master;
pub mod samples;
pub mod sequencing;
pub mod steps;

use std::path::Path;

use crate::{
    column_spec::ColumnSpec, error::LoadError, missing::MissingValues, reconcile::RowContext,
    registry::Registry,
};

pub trait RowFormat {
    fn name(&self) -> &str;

    fn columns(&self) -> &ColumnSpec;

    /// Values treated as "no data" in addition to blank cells.
    fn missing_values(&self) -> MissingValues {
        MissingValues::default()
    }

    fn process_row(&self, ctx: &mut RowContext<'_>) -> Result<(), LoadError>;
}

/// Names accepted by [`builtin`].
pub const BUILTIN: &[&str] = &["samples", "sample-master", "sequencing", "manifest"];

pub fn builtin(name: &str) -> Result<Box<dyn RowFormat>, LoadError> {
    let format: Box<dyn RowFormat> = match name {
        "samples" => Box::new(samples::SampleSheet::new()?),
        "sample-master" => Box::new(sample_master::SampleMaster::new()?),
        "sequencing" => Box::new(sequencing::SequencingSheet::new()?),
        "manifest" => Box::new(manifest::Manifest::new()?),
        other => {
            return Err(LoadError::Configuration(format!(
                "unknown format '{other}', expected one of: {}",
                BUILTIN.join(", ")
            )));
        }
    };
    Ok(format)
}

/// Picks the format named on the command line: a built-in one, a dataset
/// definition file, or the per-field dataset of a record type.
pub fn select(
    registry: &Registry,
    name: Option<&str>,
    dataset: Option<&Path>,
    model: Option<&str>,
) -> Result<Box<dyn RowFormat>, LoadError> {
    match (name, dataset, model) {
        (Some(name), None, None) => builtin(name),
        (None, Some(path), None) => {
            let definition = dataset::DatasetDefinition::load(path)?;
            Ok(Box::new(dataset::DatasetFormat::new(definition, registry)?))
        }
        (None, None, Some(kind)) => {
            let definition = dataset::DatasetDefinition::for_model(registry, kind)?;
            Ok(Box::new(dataset::DatasetFormat::new(definition, registry)?))
        }
        _ => Err(LoadError::Configuration(
            "exactly one of a format name, a dataset file or a model is required".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_format_constructs() {
        for name in BUILTIN {
            let format = builtin(name).expect(name);
            assert_eq!(format.name(), *name);
            assert!(format.columns().has_header());
        }
        assert!(matches!(builtin("nope"), Err(LoadError::Configuration(_))));
    }

    #[test]
    fn select_needs_exactly_one_source() {
        let registry = crate::domain::curation_registry().expect("registry");
        let format = select(&registry, None, None, Some("participant")).expect("model");
        assert_eq!(format.name(), "participant");
        assert!(select(&registry, None, None, None).is_err());
        assert!(select(&registry, Some("samples"), None, Some("week")).is_err());
    }
}
