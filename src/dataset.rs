use crate::value::CellValue;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Placeholder shown for missing values in numeric columns.
pub const MISSING_NUMBER_PLACEHOLDER: &str = "N/A";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Numeric,
    Text,
}

/// One uploaded sheet: ordered headers and rows aligned with them.
///
/// A `Dataset` is immutable once built. Stores hand out `Arc<Dataset>` snapshots
/// and replace them wholesale.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dataset {
    headers: Vec<String>,
    kinds: Vec<ColumnKind>,
    rows: Vec<Vec<CellValue>>,
}

impl Dataset {
    /// Build a dataset from a header row and data rows.
    ///
    /// Blank headers become `Unnamed: <index>` and repeated headers get a `.<n>`
    /// suffix so every column can be addressed by name. Rows are padded with
    /// [`CellValue::Missing`] or truncated to the header width.
    pub fn new(headers: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let headers = normalize_headers(headers);
        let width = headers.len();

        let rows: Vec<Vec<CellValue>> = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, CellValue::Missing);
                row
            })
            .collect();

        let kinds = (0..width)
            .map(|col| {
                let mut present = rows.iter().map(|r| &r[col]).filter(|v| !v.is_missing());
                let mut any = false;
                let numeric = present.all(|v| {
                    any = true;
                    v.is_number()
                });
                if numeric && any {
                    ColumnKind::Numeric
                } else {
                    ColumnKind::Text
                }
            })
            .collect();

        Dataset {
            headers,
            kinds,
            rows,
        }
    }

    pub fn empty() -> Self {
        Dataset::default()
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.headers.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn column_kind(&self, col: usize) -> Option<ColumnKind> {
        self.kinds.get(col).copied()
    }

    /// JSON value for one cell, with numeric-column gaps replaced by the placeholder.
    pub fn cell_json(&self, col: usize, value: &CellValue) -> Value {
        match (value, self.column_kind(col)) {
            (CellValue::Missing, Some(ColumnKind::Numeric)) => {
                Value::String(MISSING_NUMBER_PLACEHOLDER.to_string())
            }
            (v, _) => serde_json::to_value(v).unwrap_or(Value::Null),
        }
    }

    /// Text for one cell as shown in the HTML table.
    pub fn cell_text(&self, col: usize, value: &CellValue) -> String {
        match (value, self.column_kind(col)) {
            (CellValue::Missing, Some(ColumnKind::Numeric)) => {
                MISSING_NUMBER_PLACEHOLDER.to_string()
            }
            (v, _) => v.display_string(),
        }
    }

    /// A row as a JSON object keyed by header, in column order.
    pub fn record(&self, row: &[CellValue]) -> Map<String, Value> {
        self.headers
            .iter()
            .zip(row.iter())
            .enumerate()
            .map(|(col, (header, value))| (header.clone(), self.cell_json(col, value)))
            .collect()
    }
}

fn normalize_headers(headers: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut result = Vec::with_capacity(headers.len());

    for (idx, raw) in headers.into_iter().enumerate() {
        let base = if raw.trim().is_empty() {
            format!("Unnamed: {}", idx)
        } else {
            raw
        };

        let mut name = base.clone();
        let mut n = 1;
        while seen.contains(&name) {
            name = format!("{}.{}", base, n);
            n += 1;
        }
        seen.insert(name.clone());
        result.push(name);
    }

    result
}
