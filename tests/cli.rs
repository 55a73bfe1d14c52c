mod common;

use std::fs;

use assert_cmd::Command;
use common::{TestWorkspace, fixture_path, sheet};
use predicates::{prelude::PredicateBooleanExt, str::contains};
use serde_json::Value;

fn bin() -> Command {
    let mut cmd = Command::cargo_bin("curation-loader").expect("binary exists");
    cmd.env("RUST_LOG", "error");
    cmd
}

fn load_fixture(workspace: &TestWorkspace, extra: &[&str]) -> assert_cmd::assert::Assert {
    let db = workspace.db();
    let input = fixture_path("samples.tsv");
    bin()
        .args(["load", "-i", input.to_str().unwrap(), "-d", db.to_str().unwrap(), "-f", "samples"])
        .args(extra)
        .assert()
}

#[test]
fn load_prints_a_summary() {
    let workspace = TestWorkspace::new();
    load_fixture(&workspace, &[])
        .success()
        .stdout(contains("Rows processed: 3"))
        .stdout(contains("fecalsample: 3"));
    assert!(workspace.db().exists());
}

#[test]
fn load_report_as_json() {
    let workspace = TestWorkspace::new();
    let output = load_fixture(&workspace, &["--json", "--dry-run"]).success().get_output().stdout.clone();
    let report: Value = serde_json::from_slice(&output).expect("json report");
    assert_eq!(report["count"], 3);
    assert_eq!(report["dry_run"], true);
    assert_eq!(report["new"]["week"], 2);
}

#[test]
fn failing_load_exits_with_line_context() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("bad.tsv", &sheet(&[&["sample_id", "week"], &["P1-0001", "week x"]]));
    let db = workspace.db();
    bin()
        .args(["load", "-i", input.to_str().unwrap(), "-d", db.to_str().unwrap(), "-f", "samples"])
        .assert()
        .failure()
        .stderr(contains("error: at line 2:"));
}

#[test]
fn warn_on_error_lists_skipped_rows() {
    let workspace = TestWorkspace::new();
    let input = workspace.write(
        "bad.tsv",
        &sheet(&[&["sample_id", "week"], &["P1-0001", "99"], &["P1-0002", "99"], &["P1-0003", "1"]]),
    );
    let db = workspace.db();
    bin()
        .args(["load", "-i", input.to_str().unwrap(), "-d", db.to_str().unwrap(), "-f", "samples"])
        .arg("--warn-on-error")
        .assert()
        .success()
        .stdout(contains("Warnings:"))
        .stdout(contains("(and for next 1 lines)"));
}

#[test]
fn csv_extension_switches_to_commas() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("sheet.csv", "sample_id,week\nP1-0001,3\n");
    let db = workspace.db();
    bin()
        .args(["load", "-i", input.to_str().unwrap(), "-d", db.to_str().unwrap(), "-f", "samples"])
        .assert()
        .success()
        .stdout(contains("week: 1"));
}

#[test]
fn unknown_format_is_rejected() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("sheet.tsv", "sample_id\n");
    let db = workspace.db();
    bin()
        .args(["load", "-i", input.to_str().unwrap(), "-d", db.to_str().unwrap(), "-f", "nope"])
        .assert()
        .failure()
        .stderr(contains("unknown format 'nope'"));
}

#[test]
fn columns_lists_format_headers() {
    bin()
        .args(["columns", "-f", "manifest"])
        .assert()
        .success()
        .stdout(contains("seqlabel"))
        .stdout(contains("(ignored)"));
}

#[test]
fn history_shows_creation_then_update() {
    let workspace = TestWorkspace::new();
    load_fixture(&workspace, &["--user", "ana"]).success();
    let update = workspace.write("update.tsv", &sheet(&[&["sample_id", "week"], &["U101-0001", "2"]]));
    let db = workspace.db();
    bin()
        .args(["load", "-i", update.to_str().unwrap(), "-d", db.to_str().unwrap(), "-f", "samples"])
        .assert()
        .success()
        .stdout(contains("Conflicting changes (applied):"));

    bin()
        .args(["history", "-d", db.to_str().unwrap(), "-t", "fecalsample", "U101-0001"])
        .assert()
        .success()
        .stdout(contains("created"))
        .stdout(contains("updated"))
        .stdout(contains("ana"))
        .stdout(contains("update.tsv:2"));
}

#[test]
fn export_writes_loadable_rows() {
    let workspace = TestWorkspace::new();
    load_fixture(&workspace, &[]).success();
    let db = workspace.db();
    let out = workspace.path().join("samples.tsv");
    bin()
        .args(["export", "-d", db.to_str().unwrap(), "-t", "fecalsample", "-o", out.to_str().unwrap()])
        .assert()
        .success();

    let text = fs::read_to_string(&out).expect("export");
    let lines = text.lines().collect::<Vec<_>>();
    assert_eq!(lines[0], "participant\tnumber\tweek\tph\tbristol");
    assert_eq!(lines[1], "U101\t1\t1\t\t");
    assert_eq!(lines.len(), 4);

    bin()
        .args(["load", "-i", out.to_str().unwrap(), "-d", db.to_str().unwrap(), "--model", "fecalsample"])
        .assert()
        .success()
        .stdout(contains("Rows processed: 3"))
        .stdout(contains("New records").not());
}
