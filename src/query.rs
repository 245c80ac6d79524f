//! Filter, sort and paginate a [`Dataset`].

use crate::dataset::Dataset;
use crate::error::SheetError;
use crate::value::CellValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    /// Anything other than `desc` (case-insensitive) sorts ascending.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("desc") {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }

    pub fn flipped(&self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnFilter {
    pub column: String,
    pub term: String,
}

/// Request for one page. `page` is 0-based here; the portal converts from 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub page: usize,
    pub page_size: usize,
    pub sort: Option<SortSpec>,
    pub filter: Option<ColumnFilter>,
}

impl PageQuery {
    pub fn new(page: usize, page_size: usize) -> Self {
        PageQuery {
            page,
            page_size,
            sort: None,
            filter: None,
        }
    }

    /// Attach a sort; an empty column name means no sort.
    pub fn sorted_by(mut self, column: &str, direction: SortDirection) -> Self {
        self.sort = (!column.is_empty()).then(|| SortSpec {
            column: column.to_string(),
            direction,
        });
        self
    }

    /// Attach a filter; an empty column means no filter.
    ///
    /// An empty term keeps every row but the column must still exist.
    pub fn filtered_by(mut self, column: &str, term: &str) -> Self {
        self.filter = (!column.is_empty()).then(|| ColumnFilter {
            column: column.to_string(),
            term: term.to_string(),
        });
        self
    }
}

/// One page of rows plus the metadata the views need.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResult {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    pub total_rows: usize,
    pub page: usize,
    pub page_size: usize,
}

impl PageResult {
    pub fn page_count(&self) -> usize {
        if self.page_size == 0 {
            return 0;
        }
        self.total_rows.div_ceil(self.page_size)
    }

    /// Rows as JSON objects keyed by header, rendered with the dataset's column kinds.
    pub fn records(&self, dataset: &Dataset) -> Vec<Map<String, Value>> {
        self.rows.iter().map(|row| dataset.record(row)).collect()
    }
}

/// Run filter → sort → count → slice over `dataset`.
///
/// Unknown sort or filter columns are rejected with [`SheetError::InvalidColumn`].
pub fn query(dataset: &Dataset, q: &PageQuery) -> Result<PageResult, SheetError> {
    let filter = match &q.filter {
        Some(f) => Some((resolve_column(dataset, &f.column)?, f.term.to_lowercase())),
        None => None,
    };
    let sort = match &q.sort {
        Some(s) => Some((resolve_column(dataset, &s.column)?, s.direction)),
        None => None,
    };

    let mut selected: Vec<&Vec<CellValue>> = match &filter {
        Some((col, needle)) if !needle.is_empty() => dataset
            .rows()
            .iter()
            .filter(|row| row[*col].contains_ignore_case(needle))
            .collect(),
        _ => dataset.rows().iter().collect(),
    };

    if let Some((col, direction)) = sort {
        // sort_by is stable, so equal keys keep their order in both directions
        selected.sort_by(|a, b| compare_for_sort(&a[col], &b[col], direction));
    }

    let total_rows = selected.len();
    let start = q.page.saturating_mul(q.page_size).min(total_rows);
    let end = start.saturating_add(q.page_size).min(total_rows);

    Ok(PageResult {
        headers: dataset.headers().to_vec(),
        rows: selected[start..end].iter().map(|r| (*r).clone()).collect(),
        total_rows,
        page: q.page,
        page_size: q.page_size,
    })
}

fn resolve_column(dataset: &Dataset, name: &str) -> Result<usize, SheetError> {
    dataset
        .column_index(name)
        .ok_or_else(|| SheetError::InvalidColumn(name.to_string()))
}

// Missing values go last in both directions.
fn compare_for_sort(a: &CellValue, b: &CellValue, direction: SortDirection) -> Ordering {
    match (a.is_missing(), b.is_missing()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => match direction {
            SortDirection::Asc => a.sort_cmp(b),
            SortDirection::Desc => b.sort_cmp(a),
        },
    }
}
