use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub first_line: usize,
    pub last_line: usize,
    pub kind: String,
    pub message: String,
}

impl Warning {
    /// Number of lines after the first one that had the same error.
    pub fn repeats(&self) -> usize {
        self.last_line - self.first_line
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "skipping row: at line {}: {} ({})",
            self.first_line, self.message, self.kind
        )?;
        if self.repeats() > 0 {
            write!(f, " (and for next {} lines)", self.repeats())?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct WarningTracker {
    emitted: Vec<Warning>,
    pending: Option<Warning>,
}

impl WarningTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a skipped row, extending the pending warning when the kind and
    /// message repeat on the very next line.
    pub fn record(&mut self, line: usize, kind: &str, message: &str) {
        if let Some(pending) = &mut self.pending {
            if pending.kind == kind && pending.message == message && pending.last_line + 1 == line {
                pending.last_line = line;
                return;
            }
        }
        let next = Warning {
            first_line: line,
            last_line: line,
            kind: kind.to_string(),
            message: message.to_string(),
        };
        if let Some(done) = self.pending.replace(next) {
            self.emitted.push(done);
        }
    }

    pub fn len(&self) -> usize {
        self.emitted.len() + usize::from(self.pending.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All warnings, including the one still open at end of input.
    pub fn finish(mut self) -> Vec<Warning> {
        self.emitted.extend(self.pending.take());
        self.emitted
    }
}
