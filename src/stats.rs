use std::{collections::BTreeMap, fmt::Write as _};

use serde::Serialize;

use crate::{
    reconcile::{ChangeEntry, RowOutcome},
    warnings::Warning,
};

/// Counters accumulated over the rows that succeeded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStatistics {
    pub count: usize,
    pub new: BTreeMap<String, usize>,
    pub added: BTreeMap<String, usize>,
    pub changed: BTreeMap<String, Vec<ChangeEntry>>,
}

impl RunStatistics {
    /// Keeps what a successful row did.
    pub fn fold(&mut self, outcome: RowOutcome) {
        for (kind, n) in outcome.new {
            *self.new.entry(kind).or_default() += n;
        }
        for (kind, n) in outcome.added {
            *self.added.entry(kind).or_default() += n;
        }
        for (kind, entries) in outcome.changed {
            self.changed.entry(kind).or_default().extend(entries);
        }
    }

    pub fn count_row(&mut self) {
        self.count += 1;
    }

    pub fn total_new(&self) -> usize {
        self.new.values().sum()
    }

    pub fn total_changed(&self) -> usize {
        self.changed.values().map(Vec::len).sum()
    }

    pub fn into_report(
        self,
        ignored: Vec<String>,
        warnings: Vec<Warning>,
        dry_run: bool,
        overwrite: bool,
    ) -> LoadReport {
        LoadReport {
            count: self.count,
            new: self.new,
            added: self.added,
            changed: self.changed,
            ignored,
            warnings,
            dry_run,
            overwrite,
        }
    }
}

/// Result of one load run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    pub count: usize,
    pub new: BTreeMap<String, usize>,
    pub added: BTreeMap<String, usize>,
    pub changed: BTreeMap<String, Vec<ChangeEntry>>,
    pub ignored: Vec<String>,
    pub warnings: Vec<Warning>,
    pub dry_run: bool,
    pub overwrite: bool,
}

impl LoadReport {
    /// Same report without the dry-run marker, for comparing runs.
    pub fn counts_eq(&self, other: &LoadReport) -> bool {
        self.count == other.count
            && self.new == other.new
            && self.added == other.added
            && self.changed.len() == other.changed.len()
            && self
                .changed
                .iter()
                .zip(&other.changed)
                .all(|((k1, v1), (k2, v2))| k1 == k2 && v1.len() == v2.len())
            && self.ignored == other.ignored
            && self.warnings == other.warnings
    }

    pub fn render(&self, verbose_changes: bool) -> String {
        let mut out = String::new();
        if self.dry_run {
            out.push_str("Dry run: nothing was saved.\n");
        }
        let _ = writeln!(out, "Rows processed: {}", self.count);
        render_counts(&mut out, "New records", &self.new);
        render_counts(&mut out, "Blank fields filled", &self.added);

        if !self.changed.is_empty() {
            let verb = if self.overwrite { "applied" } else { "not applied" };
            let _ = writeln!(out, "Conflicting changes ({verb}):");
            for (kind, entries) in &self.changed {
                let _ = writeln!(out, "  {kind}: {}", entries.len());
                if !verbose_changes {
                    continue;
                }
                for entry in entries {
                    let _ = writeln!(out, "    {}:", entry.label);
                    for change in &entry.fields {
                        let old = change
                            .old
                            .as_ref()
                            .map(|v| v.as_display())
                            .unwrap_or_default();
                        let _ = writeln!(out, "      {}: {old:?} -> {:?}", change.field, change.new.as_display());
                    }
                }
            }
        }

        if !self.ignored.is_empty() {
            let _ = writeln!(out, "Ignored columns: {}", self.ignored.join(", "));
        }
        if !self.warnings.is_empty() {
            let _ = writeln!(out, "Warnings:");
            for warning in &self.warnings {
                let _ = writeln!(out, "  {warning}");
            }
        }
        out
    }
}

fn render_counts(out: &mut String, title: &str, counts: &BTreeMap<String, usize>) {
    if counts.is_empty() {
        return;
    }
    let parts = counts
        .iter()
        .map(|(kind, n)| format!("{kind}: {n}"))
        .collect::<Vec<_>>();
    let _ = writeln!(out, "{title}: {}", parts.join(", "));
}
