use std::path::PathBuf;

use crate::{
    column_spec::{ColumnDescriptor, ColumnSpec},
    domain::{SEQUENCING, parse_control},
    error::LoadError,
    formats::{RowFormat, steps},
    reconcile::RowContext,
    value::{FieldValue, Fields},
};

pub struct SampleMaster {
    columns: ColumnSpec,
}

impl SampleMaster {
    pub fn new() -> Result<Self, LoadError> {
        let columns = ColumnSpec::new(vec![
            ColumnDescriptor::header("sample", "fq_file_id"),
            // read but not processed
            ColumnDescriptor::header("participant", "participant"),
            ColumnDescriptor::header("control", "control"),
            ColumnDescriptor::header("control group", "control_group"),
            ColumnDescriptor::header("do not use", "note"),
            ColumnDescriptor::header("R1fastq", "r1"),
            ColumnDescriptor::header("R2fastq", "r2"),
        ])?;
        Ok(Self { columns })
    }
}

/// Normalizes a path the way the file names are stored.
pub(crate) fn clean_path(path: &str) -> String {
    PathBuf::from(path)
        .components()
        .collect::<PathBuf>()
        .to_string_lossy()
        .into_owned()
}

impl RowFormat for SampleMaster {
    fn name(&self) -> &str {
        "sample-master"
    }

    fn columns(&self) -> &ColumnSpec {
        &self.columns
    }

    fn process_row(&self, ctx: &mut RowContext<'_>) -> Result<(), LoadError> {
        let fq_file_id = ctx.require("fq_file_id")?.replace('-', "_");
        ctx.row_mut().insert("fq_file_id", fq_file_id.clone());
        steps::process_note(ctx)?;

        let mut proposed = Fields::new();
        proposed.insert("r1_file".into(), FieldValue::text(clean_path(ctx.require("r1")?)));
        proposed.insert("r2_file".into(), FieldValue::text(clean_path(ctx.require("r2")?)));
        if let Some(control) = ctx.value("control") {
            proposed.insert("control".into(), FieldValue::text(parse_control(control)));
        }

        let identifiers = Fields::from([("name".to_string(), FieldValue::text(fq_file_id))]);
        ctx.get_or_create(SEQUENCING, identifiers, proposed)?;
        steps::link_note(ctx, SEQUENCING)
    }
}
