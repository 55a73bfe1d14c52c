use std::borrow::Cow;
use std::fmt::Write as _;

use itertools::Itertools;

pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<S: Into<String>>(headers: impl IntoIterator<Item = S>) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Short rows are padded with empty cells, long ones truncated.
    pub fn push<S: Into<String>>(&mut self, cells: impl IntoIterator<Item = S>) {
        let mut row = cells.into_iter().map(Into::into).collect::<Vec<String>>();
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn render(&self) -> String {
        let mut widths = self.headers.iter().map(|h| h.chars().count()).collect::<Vec<_>>();
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(flatten(cell).chars().count());
            }
        }

        let mut output = String::new();
        let _ = writeln!(output, "{}", format_row(&self.headers, &widths));
        let rule = widths.iter().map(|w| "-".repeat((*w).max(3))).collect::<Vec<_>>();
        let _ = writeln!(output, "{}", format_row(&rule, &widths));
        for row in &self.rows {
            let _ = writeln!(output, "{}", format_row(row, &widths));
        }
        output
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }
}

fn format_row(cells: &[String], widths: &[usize]) -> String {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", flatten(cell), width = *width))
        .join("  ");
    line.trim_end().to_string()
}

fn flatten(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_are_padded_to_the_widest_cell() {
        let mut table = Table::new(["key", "header"]);
        table.push(["sample_id", "sample_id"]);
        table.push(["week", ""]);
        let rendered = table.render();
        let lines = rendered.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "key        header");
        assert_eq!(lines[1], "---------  ---------");
        assert_eq!(lines[2], "sample_id  sample_id");
        assert_eq!(lines[3], "week");
    }

    #[test]
    fn control_characters_are_flattened() {
        let mut table = Table::new(["note"]);
        table.push(["two\nlines"]);
        assert!(table.render().contains("two lines"));
        assert_eq!(table.len(), 1);
    }
}
