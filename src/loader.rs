//! Batch driver.
//!
//! A run wraps the whole file in one outer savepoint and every row in its
//! own nested one. A failing row either aborts the run, with the line and
//! row attached, or in warn mode is rolled back on its own and reported as a
//! (coalesced) warning. A dry run does all the work and then rolls back the
//! outer savepoint, so the report shows what would have happened.

use std::{
    env, fs,
    io::{self, BufRead, IsTerminal},
    path::Path,
};

use encoding_rs::Encoding;
use log::{debug, info, warn};

use crate::{
    error::LoadError,
    formats::RowFormat,
    progress::{ProgressHandle, ProgressPrinter},
    reconcile::{AuditStamp, ReconcilePolicy, RowContext, RowOutcome},
    registry::Registry,
    rows::{NormalizedRow, RowParser, split_line},
    stats::{LoadReport, RunStatistics},
    store::{Actor, Store},
    warnings::WarningTracker,
};

pub const DEFAULT_SEPARATOR: char = '\t';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    pub separator: char,
    pub can_overwrite: bool,
    pub warn_on_error: bool,
    pub strict_sample_id: bool,
    pub dry_run: bool,
    /// Recorded in the audit log; without one the command line is recorded.
    pub user: Option<String>,
    /// Extra literal values meaning "no data".
    pub missing_data: Vec<String>,
    pub progress: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR,
            can_overwrite: true,
            warn_on_error: false,
            strict_sample_id: false,
            dry_run: false,
            user: None,
            missing_data: Vec::new(),
            progress: false,
        }
    }
}

impl LoadOptions {
    fn policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            can_overwrite: self.can_overwrite,
            strict_sample_id: self.strict_sample_id,
        }
    }

    fn actor(&self) -> Actor {
        let command_line = env::args().collect::<Vec<_>>().join(" ");
        Actor::from_parts(self.user.clone(), Some(command_line))
    }
}

pub struct Loader<'a> {
    store: &'a mut dyn Store,
    registry: &'a Registry,
    format: &'a dyn RowFormat,
    options: LoadOptions,
}

impl<'a> Loader<'a> {
    pub fn new(
        store: &'a mut dyn Store,
        registry: &'a Registry,
        format: &'a dyn RowFormat,
        options: LoadOptions,
    ) -> Self {
        Self {
            store,
            registry,
            format,
            options,
        }
    }

    /// Loads a file, decoding it from `encoding`.
    pub fn load_path(
        &mut self,
        path: &Path,
        encoding: &'static Encoding,
    ) -> Result<LoadReport, LoadError> {
        let bytes = fs::read(path)?;
        let (text, _, had_errors) = encoding.decode(&bytes);
        if had_errors {
            return Err(LoadError::UserData(format!(
                "Failed to decode {path:?} with encoding {}",
                encoding.name()
            )));
        }
        let file_name = path.to_string_lossy().into_owned();
        self.load_reader(&file_name, text.as_bytes())
    }

    /// Loads already-decoded text; `file_name` goes into the audit log.
    pub fn load_reader<R: BufRead>(
        &mut self,
        file_name: &str,
        reader: R,
    ) -> Result<LoadReport, LoadError> {
        let format = self.format;
        let spec = format.columns();
        let separator = self.options.separator;
        let mut lines = reader.lines();

        let (mapping, first_line) = if spec.has_header() {
            let header = lines
                .next()
                .transpose()?
                .ok_or_else(|| LoadError::UserData(format!("{file_name}: missing header line")))?;
            (spec.map_headers(&split_line(&header, separator)), 1)
        } else {
            (spec.positional_mapping(), 0)
        };
        if !mapping.ignored.is_empty() {
            info!("Ignoring column(s): {}", mapping.ignored.join(", "));
        }

        let missing = format
            .missing_values()
            .with_literals(self.options.missing_data.iter().cloned());
        let mut parser = RowParser::new(spec, &mapping, separator, missing, first_line);
        let prefix = if self.options.dry_run { "[dry run] " } else { "" };
        info!(
            "{prefix}Loading {file_name} as {} (overwrite: {}, warn on error: {})",
            format.name(),
            self.options.can_overwrite,
            self.options.warn_on_error
        );

        let mut progress = self.start_progress()?;
        self.store.begin()?;
        let result = self.process_lines(file_name, &mut lines, &mut parser, progress.as_mut());
        if let Some(handle) = progress {
            if let Err(err) = handle.finish() {
                warn!("Progress output failed: {err}");
            }
        }

        let (stats, tracker) = match result {
            Ok(done) => done,
            Err(err) => {
                if let Err(rollback) = self.store.rollback() {
                    warn!("Rolling back failed run: {rollback}");
                }
                return Err(err);
            }
        };
        if self.options.dry_run {
            self.store.rollback()?;
        } else {
            self.store.commit()?;
        }

        let warnings = tracker.finish();
        for warning in &warnings {
            warn!("{warning}");
        }
        info!(
            "{prefix}Processed {} row(s): {} new, {} conflicting change(s), {} warning(s)",
            stats.count,
            stats.total_new(),
            stats.total_changed(),
            warnings.len()
        );
        Ok(stats.into_report(
            mapping.ignored,
            warnings,
            self.options.dry_run,
            self.options.can_overwrite,
        ))
    }

    fn start_progress(&self) -> Result<Option<ProgressHandle<io::Stderr>>, LoadError> {
        if !self.options.progress {
            return Ok(None);
        }
        let printer = ProgressPrinter::new("{} rows")?;
        let stderr = io::stderr();
        let terminal = stderr.is_terminal();
        Ok(Some(printer.start(stderr, terminal)))
    }

    fn process_lines<I>(
        &mut self,
        file_name: &str,
        lines: &mut I,
        parser: &mut RowParser<'_>,
        mut progress: Option<&mut ProgressHandle<io::Stderr>>,
    ) -> Result<(RunStatistics, WarningTracker), LoadError>
    where
        I: Iterator<Item = io::Result<String>>,
    {
        let mut stats = RunStatistics::default();
        let mut tracker = WarningTracker::new();
        let actor = self.options.actor();

        for line in lines {
            let line = line?;
            if RowParser::is_blank(&line) {
                parser.skip_line();
                continue;
            }
            let parsed = parser.parse_line(&line);
            let line_no = parser.line();
            let (row_text, result) = match parsed {
                Ok(row) => {
                    let text = row.to_string();
                    let audit = AuditStamp {
                        file: file_name.to_string(),
                        line: line_no,
                        actor: actor.clone(),
                    };
                    (text, self.process_row(row, audit))
                }
                Err(err) => (line.trim_end().to_string(), Err(err)),
            };

            match result {
                Ok(outcome) => stats.fold(outcome),
                Err(err) if err.is_user_error() && self.options.warn_on_error => {
                    debug!("Skipping line {line_no}: {err}");
                    tracker.record(line_no, err.kind_name(), &err.to_string());
                }
                Err(err) => return Err(err.at_line(line_no, row_text)),
            }
            stats.count_row();
            if let Some(handle) = progress.as_deref_mut() {
                handle.update(stats.count);
            }
        }
        Ok((stats, tracker))
    }

    /// Runs one row inside its own savepoint.
    fn process_row(&mut self, row: NormalizedRow, audit: AuditStamp) -> Result<RowOutcome, LoadError> {
        let format = self.format;
        let registry = self.registry;
        let policy = self.options.policy();

        self.store.begin()?;
        let result = {
            let mut ctx = RowContext::new(&mut *self.store, registry, policy, audit, row);
            format.process_row(&mut ctx).map(|()| ctx.into_outcome())
        };
        match result {
            Ok(outcome) => {
                self.store.commit()?;
                Ok(outcome)
            }
            Err(err) => {
                self.store.rollback()?;
                Err(err)
            }
        }
    }
}
