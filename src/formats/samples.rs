use crate::{
    column_spec::{ColumnDescriptor, ColumnSpec},
    domain::FECAL_SAMPLE,
    error::LoadError,
    formats::{RowFormat, steps},
    reconcile::RowContext,
};

pub struct SampleSheet {
    columns: ColumnSpec,
}

impl SampleSheet {
    pub fn new() -> Result<Self, LoadError> {
        let columns = ColumnSpec::new(vec![
            ColumnDescriptor::header("participant", "participant"),
            ColumnDescriptor::header("sample_id", "sample_id"),
            ColumnDescriptor::header("week", "week"),
            ColumnDescriptor::header("semester", "semester"),
            ColumnDescriptor::header("frequency", "frequency"),
            ColumnDescriptor::header("dose", "dose"),
            ColumnDescriptor::header("composition", "composition"),
            ColumnDescriptor::header("quantity_compliant", "quantity_compliant"),
            ColumnDescriptor::header("note", "note"),
        ])?;
        Ok(Self { columns })
    }
}

impl RowFormat for SampleSheet {
    fn name(&self) -> &str {
        "samples"
    }

    fn columns(&self) -> &ColumnSpec {
        &self.columns
    }

    fn process_row(&self, ctx: &mut RowContext<'_>) -> Result<(), LoadError> {
        steps::process_semester(ctx)?;
        steps::process_supplement(ctx)?;
        steps::process_participant(ctx)?;
        steps::process_week(ctx)?;
        steps::process_sample_id(ctx, Default::default())?;
        steps::process_note(ctx)?;
        steps::link_note(ctx, FECAL_SAMPLE)
    }
}
