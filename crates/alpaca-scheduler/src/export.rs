//! Tab-separated status report.
//!
//! ```text
//! Sample<TAB>align<TAB>call
//! s1<TAB>2<TAB>1
//! s2<TAB>1<TAB>0
//! ```
//!
//! Cells hold status ordinals. Rows are joined with `\n`, without a trailing
//! newline.

use std::collections::BTreeMap;

use alpaca_core::Status;
use thiserror::Error;

use crate::snapshot::{StatusMatrix, StatusRow};
use crate::Scheduler;

pub const SAMPLE_COLUMN: &str = "Sample";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExportParseError {
    #[error("missing header row")]
    MissingHeader,
    #[error("header must start with \"Sample\"")]
    BadHeader,
    #[error("line {line}: expected {expected} columns but found {found}")]
    ColumnCount {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: {message}")]
    BadCell { line: usize, message: String },
}

impl Scheduler {
    /// Renders every step, or only `step` when given. An unknown `step`
    /// yields an empty cell on every row.
    pub async fn export(&self, step: Option<&str>) -> String {
        let matrix = self.capture().await;
        match step {
            Some(step) => render(&matrix, &[step.to_string()]),
            None => render(&matrix, &matrix.steps),
        }
    }
}

pub fn render(matrix: &StatusMatrix, columns: &[String]) -> String {
    let mut lines = Vec::with_capacity(matrix.rows.len() + 1);

    let mut header = vec![SAMPLE_COLUMN.to_string()];
    header.extend(columns.iter().cloned());
    lines.push(header.join("\t"));

    for row in &matrix.rows {
        let mut cells = vec![row.sample.clone()];
        cells.extend(columns.iter().map(|c| {
            row.statuses
                .get(c)
                .map(|s| s.ordinal().to_string())
                .unwrap_or_default()
        }));
        lines.push(cells.join("\t"));
    }
    lines.join("\n")
}

/// Inverse of [`render`] for a full export. Cells may be ordinals or names.
pub fn parse_export(text: &str) -> Result<StatusMatrix, ExportParseError> {
    let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l));
    let (_, header) = lines.next().ok_or(ExportParseError::MissingHeader)?;
    let header: Vec<&str> = header.split('\t').collect();
    if header.first() != Some(&SAMPLE_COLUMN) {
        return Err(ExportParseError::BadHeader);
    }
    let steps: Vec<String> = header[1..].iter().map(|s| s.to_string()).collect();

    let mut rows = Vec::new();
    for (line, raw) in lines {
        if raw.is_empty() {
            continue;
        }
        let cols: Vec<&str> = raw.split('\t').collect();
        if cols.len() != header.len() {
            return Err(ExportParseError::ColumnCount {
                line,
                expected: header.len(),
                found: cols.len(),
            });
        }

        let mut statuses = BTreeMap::new();
        for (step, cell) in steps.iter().zip(&cols[1..]) {
            let status: Status = cell.parse().map_err(|e| ExportParseError::BadCell {
                line,
                message: format!("{e}"),
            })?;
            statuses.insert(step.clone(), status);
        }
        rows.push(StatusRow {
            sample: cols[0].to_string(),
            statuses,
        });
    }
    Ok(StatusMatrix { steps, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_only_for_empty_table() {
        let matrix = StatusMatrix {
            steps: vec!["align".to_string()],
            rows: Vec::new(),
        };
        assert_eq!(render(&matrix, &matrix.steps), "Sample\talign");
    }

    #[test]
    fn parse_rejects_ragged_rows() {
        let err = parse_export("Sample\talign\tcall\ns1\t0\n").unwrap_err();
        assert_eq!(
            err,
            ExportParseError::ColumnCount {
                line: 2,
                expected: 3,
                found: 2
            }
        );
    }

    #[test]
    fn parse_rejects_unknown_header() {
        assert_eq!(
            parse_export("Id\talign\n").unwrap_err(),
            ExportParseError::BadHeader
        );
        assert_eq!(parse_export("").unwrap_err(), ExportParseError::MissingHeader);
    }

    #[test]
    fn parse_accepts_names_and_ordinals() {
        let m = parse_export("Sample\talign\tcall\ns1\tCOMPLETE\t1").unwrap();
        assert_eq!(m.get("s1", "align"), Some(Status::Complete));
        assert_eq!(m.get("s1", "call"), Some(Status::Distributed));
    }
}
