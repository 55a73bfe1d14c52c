use std::sync::LazyLock;

use regex::Regex;

use crate::{
    error::LoadError,
    registry::{EntityType, FieldDef, Registry},
    value::{FieldValue, Fields},
};

pub const SEMESTER: &str = "semester";
pub const SUPPLEMENT: &str = "supplement";
pub const PARTICIPANT: &str = "participant";
pub const WEEK: &str = "week";
pub const FECAL_SAMPLE: &str = "fecalsample";
pub const NOTE: &str = "note";
pub const SEQUENCING_RUN: &str = "sequencingrun";
pub const SEQUENCING: &str = "sequencing";

pub const TERMS: &[&str] = &["fall", "winter", "spring", "summer"];
pub const CONTROLS: &[&str] = &["mock", "water", "blank", "plate", "other"];

static SEMESTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(fall|winter|spring|summer)[\s_-]*(\d{4})$").expect("semester pattern")
});
static WEEK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:week)?\s*(\d+)$").expect("week pattern"));
static SAMPLE_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<participant>[A-Z]+[0-9]+)[-_](?P<number>[0-9]+)$").expect("sample id pattern")
});

pub fn curation_registry() -> Result<Registry, LoadError> {
    let mut registry = Registry::new();
    registry.register(
        EntityType::new(SEMESTER)
            .field(FieldDef::choice("term", TERMS).required())
            .field(FieldDef::integer("year").required().range(2000, 2100))
            .natural_key(&["term", "year"])
            .natural_parser(parse_semester),
    )?;
    registry.register(
        EntityType::new(SUPPLEMENT)
            .field(FieldDef::text("frequency").max_len(50))
            .field(FieldDef::float("dose"))
            .field(FieldDef::text("composition").max_len(200))
            .natural_key(&["frequency", "dose", "composition"]),
    )?;
    registry.register(
        EntityType::new(PARTICIPANT)
            .field(FieldDef::text("name").required().unique().max_len(50))
            .field(FieldDef::boolean("quantity_compliant"))
            .field(FieldDef::reference("supplement", SUPPLEMENT))
            .field(FieldDef::reference("semester", SEMESTER))
            .natural_key(&["name"]),
    )?;
    registry.register(
        EntityType::new(WEEK)
            .field(FieldDef::integer("number").required().unique().range(0, 52))
            .natural_key(&["number"])
            .natural_parser(parse_week),
    )?;
    registry.register(
        EntityType::new(FECAL_SAMPLE)
            .field(FieldDef::text("participant").required().max_len(50))
            .field(FieldDef::integer("number").required().range(0, 9999))
            .field(FieldDef::reference("week", WEEK))
            .field(FieldDef::float("ph"))
            .field(FieldDef::integer("bristol").range(1, 7))
            .field(FieldDef::many("note", NOTE))
            .natural_key(&["participant", "number"])
            .natural_parser(parse_sample_id),
    )?;
    registry.register(
        EntityType::new(NOTE)
            .field(FieldDef::text("name").required().unique().max_len(100))
            .field(FieldDef::text("text").max_len(5000))
            .natural_key(&["name"]),
    )?;
    registry.register(
        EntityType::new(SEQUENCING_RUN)
            .field(FieldDef::text("serial").required().max_len(50))
            .field(FieldDef::integer("number").required().range(0, 32767))
            .field(FieldDef::text("path").max_len(2000))
            .natural_key(&["serial", "number"])
            .natural_parser(parse_sequencing_run),
    )?;
    registry.register(
        EntityType::new(SEQUENCING)
            .field(FieldDef::text("name").required().unique().max_len(100))
            .field(FieldDef::reference("sample", FECAL_SAMPLE))
            .field(FieldDef::choice("control", CONTROLS))
            .field(FieldDef::text("r1_file").unique().max_len(300))
            .field(FieldDef::text("r2_file").unique().max_len(300))
            .field(FieldDef::many("note", NOTE))
            .field(FieldDef::reference("run", SEQUENCING_RUN))
            .field(FieldDef::integer("plate").range(0, 32767))
            .field(FieldDef::text("plate_position").max_len(10))
            .field(FieldDef::integer("snumber").range(0, 32767))
            .natural_key(&["name"])
            .unique_together(&["run", "snumber"])
            .unique_together(&["run", "plate", "plate_position"]),
    )?;
    registry.check_references()?;
    Ok(registry)
}

/// `"fall2019"`, `"Fall 2019"` or `"fall-2019"` to term and year.
pub fn parse_semester(value: &str) -> Result<Fields, String> {
    let caps = SEMESTER_RE
        .captures(value.trim())
        .ok_or_else(|| format!("Failed to parse semester: {value}"))?;
    Ok(Fields::from([
        ("term".into(), FieldValue::text(caps[1].to_lowercase())),
        ("year".into(), FieldValue::text(&caps[2])),
    ]))
}

/// `"3"`, `"week3"` or `"Week 3"` to the week number.
pub fn parse_week(value: &str) -> Result<Fields, String> {
    let caps = WEEK_RE
        .captures(value.trim())
        .ok_or_else(|| format!("Failed to parse week: {value}"))?;
    Ok(Fields::from([("number".into(), FieldValue::text(&caps[1]))]))
}

/// `"P1-0001"` or `"P1_0001"` to participant name and sample number.
pub fn parse_sample_id(value: &str) -> Result<Fields, String> {
    let caps = SAMPLE_ID_RE
        .captures(value.trim())
        .ok_or_else(|| format!("Failed to parse sample id: {value}"))?;
    Ok(Fields::from([
        ("participant".into(), FieldValue::text(&caps["participant"])),
        ("number".into(), FieldValue::text(&caps["number"])),
    ]))
}

/// `"<serial>-<number>"`; the serial itself must not contain a dash.
pub fn parse_sequencing_run(value: &str) -> Result<Fields, String> {
    let parts = value.trim().split('-').collect::<Vec<_>>();
    match parts.as_slice() {
        [serial, number] if !serial.is_empty() => Ok(Fields::from([
            ("serial".into(), FieldValue::text(*serial)),
            ("number".into(), FieldValue::text(*number)),
        ])),
        _ => Err(format!("Failed to parse sequencing run: {value}")),
    }
}

/// Coerces free text into one of [`CONTROLS`]; blank text stays blank.
pub fn parse_control(value: &str) -> String {
    let choice = value.trim().to_lowercase();
    if choice.is_empty() {
        return choice;
    }
    CONTROLS
        .iter()
        .find(|c| choice.contains(*c))
        .copied()
        .unwrap_or("other")
        .to_string()
}
