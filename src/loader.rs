use crate::dataset::Dataset;
use crate::error::SheetError;
use crate::value::CellValue;
use calamine::{Data, Range, Reader, open_workbook_auto, open_workbook_auto_from_rs};
use chrono::{NaiveDate, NaiveDateTime};
use std::io::{Cursor, Read};
use std::path::Path;

/// Extensions the readers below understand. The upload allow-list is a subset of these.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["xls", "xlsx", "xlsm", "xlsb", "ods", "csv"];

/// Load a dataset from a file on disk
///
/// The reader is picked from the file extension. Workbooks are read through
/// calamine (first worksheet only); CSV through the `csv` crate. In both cases
/// the first row supplies the column headers.
///
/// # Errors
/// * `NotFound` if the file does not exist
/// * `BadRequest` if the extension is missing or unsupported
/// * `ParseFailure` if the content cannot be decoded
///
/// # Examples
/// ```no_run
/// use sheet_browser::loader::load_path;
///
/// match load_path("uploads/report.xls") {
///     Ok(ds) => println!("loaded {} rows", ds.row_count()),
///     Err(e) => eprintln!("Error loading file: {}", e),
/// }
/// ```
pub fn load_path(path: impl AsRef<Path>) -> Result<Dataset, SheetError> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(SheetError::NotFound);
    }

    match extension_of(path)?.as_str() {
        "csv" => from_csv(std::fs::File::open(path)?),
        _ => {
            let mut workbook = open_workbook_auto(path)?;
            let range = workbook
                .worksheet_range_at(0)
                .ok_or_else(|| SheetError::ParseFailure("No sheets found in workbook".into()))??;
            Ok(from_range(&range))
        }
    }
}

/// Load a dataset from an uploaded body. `ext` is the lower-case file extension.
pub fn load_bytes(ext: &str, bytes: &[u8]) -> Result<Dataset, SheetError> {
    match ext {
        "csv" => from_csv(Cursor::new(bytes)),
        e if SUPPORTED_EXTENSIONS.contains(&e) => {
            let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
            let range = workbook
                .worksheet_range_at(0)
                .ok_or_else(|| SheetError::ParseFailure("No sheets found in workbook".into()))??;
            Ok(from_range(&range))
        }
        other => Err(SheetError::bad_request(format!(
            "Unsupported file extension: {}",
            other
        ))),
    }
}

/// Lower-case extension of `path`, or `BadRequest` if there is none.
pub fn extension_of(path: &Path) -> Result<String, SheetError> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .ok_or_else(|| SheetError::bad_request("File has no extension"))
}

fn from_range(range: &Range<Data>) -> Dataset {
    let mut rows = range.rows();
    let headers = match rows.next() {
        Some(first) => first
            .iter()
            .map(|cell| cell_value(cell).display_string())
            .collect(),
        None => return Dataset::empty(),
    };

    let body = rows
        .map(|row| row.iter().map(cell_value).collect())
        .collect();

    Dataset::new(headers, body)
}

fn cell_value(cell: &Data) -> CellValue {
    match cell {
        Data::Int(i) => CellValue::Int(*i),
        Data::Float(f) => float_value(*f),
        Data::String(s) if s.trim().is_empty() => CellValue::Missing,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(d) if d.is_duration() => float_value(d.as_f64()),
        Data::DateTime(d) => d
            .as_datetime()
            .map(CellValue::DateTime)
            .unwrap_or_else(|| float_value(d.as_f64())),
        Data::DateTimeIso(s) => iso_datetime(s)
            .map(CellValue::DateTime)
            .unwrap_or_else(|| CellValue::Text(s.clone())),
        Data::DurationIso(s) => CellValue::Text(s.clone()),
        // #N/A, #DIV/0! and friends read as gaps
        Data::Error(_) | Data::Empty => CellValue::Missing,
    }
}

// ODS stores dates as ISO 8601 text, with or without a time part.
fn iso_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

// Whole floats come back as integers, like the sheet shows them.
fn float_value(f: f64) -> CellValue {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        CellValue::Int(f as i64)
    } else {
        CellValue::from(f)
    }
}

fn from_csv<R: Read>(reader: R) -> Result<Dataset, SheetError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(parse_field).collect());
    }

    Ok(Dataset::new(headers, rows))
}

fn parse_field(field: &str) -> CellValue {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        return CellValue::Missing;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return CellValue::Int(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return CellValue::from(f);
    }
    match trimmed {
        "True" | "true" | "TRUE" => CellValue::Bool(true),
        "False" | "false" | "FALSE" => CellValue::Bool(false),
        _ => CellValue::Text(field.to_string()),
    }
}
