use std::{path::Path, sync::LazyLock};

use regex::Regex;

use crate::{
    column_spec::{ColumnDescriptor, ColumnSpec},
    domain::{FECAL_SAMPLE, SEQUENCING},
    error::LoadError,
    formats::{RowFormat, sample_master::clean_path, steps},
    reconcile::RowContext,
    value::{FieldValue, Fields},
};

static PLATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^P([0-9])-([A-Z][0-9]+)$").expect("plate pattern"));
static SNUM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^S([0-9]+)$").expect("s-number pattern"));
static FQ_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(_S[0-9]+).*").expect("fastq id pattern"));

pub struct Manifest {
    columns: ColumnSpec,
}

impl Manifest {
    pub fn new() -> Result<Self, LoadError> {
        let columns = ColumnSpec::new(vec![
            ColumnDescriptor::header("specimen", "specimen"),
            // plate is used instead
            ColumnDescriptor::header("batch", "batch"),
            ColumnDescriptor::header("R1", "r1"),
            ColumnDescriptor::header("R2", "r2"),
            ColumnDescriptor::header("person", "participant"),
            ColumnDescriptor::header("Sample_ID", "sample_id"),
            ColumnDescriptor::header("semester", "semester"),
            ColumnDescriptor::header("plate", "plate"),
            ColumnDescriptor::header("seqlabel", "snum"),
            ColumnDescriptor::ignored_header("read__1_fn"),
            ColumnDescriptor::ignored_header("read__2_fn"),
        ])?;
        Ok(Self { columns })
    }
}

/// FASTQ id from the R1 file name: the stem cut right after the S-number.
pub fn fq_file_id(r1: &str) -> String {
    let stem = Path::new(r1)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    FQ_ID_RE.replace(&stem, "$1").into_owned()
}

/// `"P2-A11"` to plate number and position.
pub fn parse_plate(value: &str) -> Result<(i64, String), LoadError> {
    let caps = PLATE_RE
        .captures(value)
        .ok_or_else(|| LoadError::UserData("Failed parsing plate field".into()))?;
    let plate = caps[1]
        .parse::<i64>()
        .map_err(|_| LoadError::UserData("Failed parsing plate field".into()))?;
    Ok((plate, caps[2].to_string()))
}

impl RowFormat for Manifest {
    fn name(&self) -> &str {
        "manifest"
    }

    fn columns(&self) -> &ColumnSpec {
        &self.columns
    }

    fn process_row(&self, ctx: &mut RowContext<'_>) -> Result<(), LoadError> {
        steps::process_semester(ctx)?;
        steps::process_participant(ctx)?;
        if let Some(sample_id) = ctx.value("sample_id").map(|s| s.replace('-', "_")) {
            ctx.row_mut().insert("sample_id", sample_id);
            steps::process_sample_id(ctx, Fields::new())?;
        }

        let r1 = ctx.require("r1")?.to_string();
        let r2 = ctx.require("r2")?.to_string();
        let mut proposed = Fields::new();
        proposed.insert("r1_file".into(), FieldValue::text(clean_path(&r1)));
        proposed.insert("r2_file".into(), FieldValue::text(clean_path(&r2)));

        let raw_id = fq_file_id(&r1);
        let r2_name = Path::new(&r2)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !r2_name.starts_with(&raw_id) {
            return Err(LoadError::UserData("fastq file name inconsistency".into()));
        }
        let name = raw_id.replace('-', "_");

        if let Some(plate) = ctx.value("plate") {
            let (plate, position) = parse_plate(plate)?;
            proposed.insert("plate".into(), FieldValue::Integer(plate));
            proposed.insert("plate_position".into(), FieldValue::text(position));
        }
        if let Some(snum) = ctx.value("snum") {
            if !name.ends_with(snum) {
                return Err(LoadError::UserData(
                    "S-number is inconsistent with filenames".into(),
                ));
            }
            let number = SNUM_RE
                .captures(snum)
                .and_then(|caps| caps[1].parse::<i64>().ok())
                .ok_or_else(|| LoadError::UserData("Failed parsing s-number".into()))?;
            proposed.insert("snumber".into(), FieldValue::Integer(number));
        }
        if let Some(sample) = ctx.resolved(FECAL_SAMPLE) {
            proposed.insert("sample".into(), FieldValue::Ref(sample.id));
        }

        let identifiers = Fields::from([("name".to_string(), FieldValue::text(name))]);
        ctx.get_or_create(SEQUENCING, identifiers, proposed)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fq_file_id_cuts_after_s_number() {
        assert_eq!(fq_file_id("runs/U101-0003_S12_L001_R1_001.fastq.gz"), "U101-0003_S12");
        assert_eq!(fq_file_id("plain.fastq"), "plain");
    }

    #[test]
    fn plate_parses_number_and_position() {
        assert_eq!(parse_plate("P2-A11").expect("plate"), (2, "A11".to_string()));
        assert!(parse_plate("P12-A1").is_err());
        assert!(parse_plate("2-A1").is_err());
    }
}
