#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// Joins cells with tabs and lines with newlines.
pub fn sheet(lines: &[&[&str]]) -> String {
    let mut text = String::new();
    for cells in lines {
        text.push_str(&cells.join("\t"));
        text.push('\n');
    }
    text
}

/// Scratch directory holding sheets and a database for one test case.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Path of the workspace database; the file appears on first open.
    pub fn db(&self) -> PathBuf {
        self.temp_dir.path().join("curation.db")
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::write(&path, contents).expect("write temp file");
        path
    }
}
