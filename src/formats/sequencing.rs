use crate::{
    column_spec::{ColumnDescriptor, ColumnSpec},
    domain::{FECAL_SAMPLE, SEQUENCING, SEQUENCING_RUN},
    error::LoadError,
    formats::{RowFormat, steps},
    reconcile::RowContext,
    value::{FieldValue, Fields},
};

pub struct SequencingSheet {
    columns: ColumnSpec,
}

impl SequencingSheet {
    pub fn new() -> Result<Self, LoadError> {
        let columns = ColumnSpec::new(vec![
            ColumnDescriptor::header("FASTQ_ID", "fq_file_id"),
            ColumnDescriptor::header("Participant_ID", "participant"),
            ColumnDescriptor::header("Sample_ID", "sample_id"),
            ColumnDescriptor::header("Study_week", "week"),
            ColumnDescriptor::header("Semester", "semester"),
            ColumnDescriptor::header("Use_Data", "use_data"),
            ColumnDescriptor::header("Quantity_compliant", "quantity_compliant"),
            ColumnDescriptor::header("Frequency", "frequency"),
            ColumnDescriptor::header("Total_dose_grams", "dose"),
            ColumnDescriptor::header("Supplement_consumed", "composition"),
            ColumnDescriptor::header("pH", "ph"),
            ColumnDescriptor::header("Bristol", "bristol"),
            ColumnDescriptor::header("seq_serial", "serial"),
            ColumnDescriptor::header("seq_run", "run"),
            ColumnDescriptor::header("drop", "note"),
        ])?;
        Ok(Self { columns })
    }
}

impl RowFormat for SequencingSheet {
    fn name(&self) -> &str {
        "sequencing"
    }

    fn columns(&self) -> &ColumnSpec {
        &self.columns
    }

    fn process_row(&self, ctx: &mut RowContext<'_>) -> Result<(), LoadError> {
        if let Some(use_data) = ctx.value("use_data") {
            if !use_data.eq_ignore_ascii_case("yes") {
                return Err(LoadError::UserData("encountered use_data!=yes".into()));
            }
        }
        steps::process_semester(ctx)?;
        steps::process_supplement(ctx)?;
        steps::process_participant(ctx)?;
        steps::process_week(ctx)?;
        let measurements = ctx
            .from_row(&["ph", "bristol"])
            .into_iter()
            .filter(|(_, v)| v.as_text() != Some("NA"))
            .collect::<Fields>();
        steps::process_sample_id(ctx, measurements)?;
        steps::process_note(ctx)?;

        let name = ctx.require("fq_file_id")?.to_string();
        let mut proposed = Fields::new();
        if let Some(sample) = ctx.resolved(FECAL_SAMPLE) {
            proposed.insert("sample".into(), FieldValue::Ref(sample.id));
        }
        if let Some(number) = ctx.value("run").map(str::to_string) {
            let serial = ctx.require("serial")?.to_string();
            let identifiers = Fields::from([
                ("serial".to_string(), FieldValue::text(serial)),
                ("number".to_string(), FieldValue::text(number)),
            ]);
            let run = ctx.get_or_create(SEQUENCING_RUN, identifiers, Fields::new())?;
            proposed.insert("run".into(), FieldValue::Ref(run.id));
        }

        let identifiers = Fields::from([("name".to_string(), FieldValue::text(name))]);
        ctx.get_or_create(SEQUENCING, identifiers, proposed)?;
        // notes are only ever added, never removed
        steps::link_note(ctx, SEQUENCING)
    }
}
