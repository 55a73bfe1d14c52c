mod common;

use common::sheet;
use curation_loader::{
    domain::{FECAL_SAMPLE, PARTICIPANT, SEQUENCING, SEQUENCING_RUN, curation_registry},
    error::LoadError,
    formats,
    loader::{LoadOptions, Loader},
    stats::LoadReport,
    store::{Entity, Store, memory::MemoryStore},
    value::FieldValue,
};

fn load(store: &mut MemoryStore, format: &str, text: &str, options: LoadOptions) -> Result<LoadReport, LoadError> {
    let registry = curation_registry().expect("registry");
    let format = formats::builtin(format).expect("format");
    Loader::new(store, &registry, format.as_ref(), options).load_reader("sheet.tsv", text.as_bytes())
}

fn only(store: &MemoryStore, kind: &str) -> Entity {
    let mut all = store.all(kind).expect("all");
    assert_eq!(all.len(), 1, "{kind}");
    all.remove(0)
}

const SEQUENCING_HEADER: &[&str] = &[
    "FASTQ_ID",
    "Participant_ID",
    "Sample_ID",
    "Study_week",
    "Semester",
    "Use_Data",
    "Quantity_compliant",
    "Frequency",
    "Total_dose_grams",
    "Supplement_consumed",
    "pH",
    "Bristol",
    "seq_serial",
    "seq_run",
    "drop",
];

#[test]
fn sequencing_sheet_links_sample_and_run() {
    let mut store = MemoryStore::new();
    let text = sheet(&[
        SEQUENCING_HEADER,
        &[
            "U101_0001_S3", "U101", "U101-0001", "1", "Fall2019", "yes", "yes", "1xdaily", "20",
            "inulin", "6.5", "NA", "M0123", "5", "",
        ],
    ]);
    let report = load(&mut store, "sequencing", &text, LoadOptions::default()).expect("load");
    assert_eq!(report.new.get(SEQUENCING), Some(&1));
    assert_eq!(report.new.get(SEQUENCING_RUN), Some(&1));

    let sample = only(&store, FECAL_SAMPLE);
    assert_eq!(sample.get("ph"), Some(&FieldValue::Float(6.5)));
    assert_eq!(sample.get("bristol"), None);
    let run = only(&store, SEQUENCING_RUN);
    assert_eq!(run.get("number"), Some(&FieldValue::Integer(5)));
    let sequencing = only(&store, SEQUENCING);
    assert_eq!(sequencing.get("sample"), Some(&FieldValue::Ref(sample.id)));
    assert_eq!(sequencing.get("run"), Some(&FieldValue::Ref(run.id)));
    let participant = only(&store, PARTICIPANT);
    assert_eq!(participant.get("quantity_compliant"), Some(&FieldValue::Boolean(true)));
}

#[test]
fn sequencing_rows_not_marked_for_use_are_rejected() {
    let mut store = MemoryStore::new();
    let text = sheet(&[
        SEQUENCING_HEADER,
        &["U101_0001_S3", "", "", "", "", "no", "", "", "", "", "", "", "", "", ""],
    ]);
    let options = LoadOptions {
        warn_on_error: true,
        ..LoadOptions::default()
    };
    let report = load(&mut store, "sequencing", &text, options).expect("load");
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].message.contains("use_data"));
    assert!(store.is_empty());
}

#[test]
fn sample_master_records_files_and_control() {
    let mut store = MemoryStore::new();
    let text = sheet(&[
        &["sample", "participant", "control", "control group", "do not use", "R1fastq", "R2fastq"],
        &[
            "NEG-1_S90",
            "",
            "Water blank",
            "",
            "low yield",
            "runs//NEG-1_S90_R1.fastq.gz",
            "runs/NEG-1_S90_R2.fastq.gz",
        ],
    ]);
    load(&mut store, "sample-master", &text, LoadOptions::default()).expect("load");

    let sequencing = only(&store, SEQUENCING);
    assert_eq!(sequencing.text("name"), Some("NEG_1_S90"));
    assert_eq!(sequencing.text("control"), Some("water"));
    assert_eq!(sequencing.text("r1_file"), Some("runs/NEG-1_S90_R1.fastq.gz"));
    assert_eq!(store.linked(sequencing.id, "note").expect("links").len(), 1);
}

const MANIFEST_HEADER: &[&str] = &[
    "specimen", "batch", "R1", "R2", "person", "Sample_ID", "semester", "plate", "seqlabel",
];

#[test]
fn manifest_sets_plate_layout_and_s_number() {
    let mut store = MemoryStore::new();
    let text = sheet(&[
        MANIFEST_HEADER,
        &[
            "x",
            "1",
            "run1/U101-0001_S12_L001_R1_001.fastq.gz",
            "run1/U101-0001_S12_L001_R2_001.fastq.gz",
            "U101",
            "U101-0001",
            "fall2019",
            "P1-A3",
            "S12",
        ],
    ]);
    load(&mut store, "manifest", &text, LoadOptions::default()).expect("load");

    let sample = only(&store, FECAL_SAMPLE);
    let sequencing = only(&store, SEQUENCING);
    assert_eq!(sequencing.text("name"), Some("U101_0001_S12"));
    assert_eq!(sequencing.get("plate"), Some(&FieldValue::Integer(1)));
    assert_eq!(sequencing.text("plate_position"), Some("A3"));
    assert_eq!(sequencing.get("snumber"), Some(&FieldValue::Integer(12)));
    assert_eq!(sequencing.get("sample"), Some(&FieldValue::Ref(sample.id)));
}

#[test]
fn manifest_rejects_mismatched_read_files() {
    let mut store = MemoryStore::new();
    let text = sheet(&[
        MANIFEST_HEADER,
        &[
            "x",
            "1",
            "run1/U101-0001_S12_L001_R1_001.fastq.gz",
            "run1/U101-0002_S13_L001_R2_001.fastq.gz",
            "",
            "",
            "",
            "",
            "",
        ],
    ]);
    let err = load(&mut store, "manifest", &text, LoadOptions::default()).unwrap_err();
    assert!(err.to_string().contains("fastq file name inconsistency"), "{err}");
}

#[test]
fn strict_sample_ids_fail_instead_of_skipping() {
    let mut store = MemoryStore::new();
    let text = sheet(&[&["sample_id", "week"], &["not-an-id", "1"]]);
    load(&mut store, "samples", &text, LoadOptions::default()).expect("lenient");
    assert!(store.all(FECAL_SAMPLE).expect("samples").is_empty());

    let strict = LoadOptions {
        strict_sample_id: true,
        ..LoadOptions::default()
    };
    let err = load(&mut store, "samples", &text, strict).unwrap_err();
    assert!(err.is_user_error());
}
