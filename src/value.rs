use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// Format dates are shown and serialized in; sorts the same as the dates themselves.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single scalar read out of an uploaded sheet.
#[derive(Clone, Debug, PartialEq)]
pub enum CellValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
    Missing,
}

impl CellValue {
    pub fn is_missing(&self) -> bool {
        matches!(self, CellValue::Missing)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, CellValue::Int(_) | CellValue::Float(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(i) => Some(*i as f64),
            CellValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// String form used for substring matching and HTML rendering.
    /// Missing values render as the empty string.
    pub fn display_string(&self) -> String {
        match self {
            CellValue::Missing => String::new(),
            other => other.to_string(),
        }
    }

    /// Case-insensitive substring test. Missing cells never match.
    pub fn contains_ignore_case(&self, needle_lower: &str) -> bool {
        if self.is_missing() {
            return false;
        }
        self.display_string().to_lowercase().contains(needle_lower)
    }

    // Numbers < bools < dates < text. Missing is handled by the caller.
    fn rank(&self) -> u8 {
        match self {
            CellValue::Int(_) | CellValue::Float(_) => 0,
            CellValue::Bool(_) => 1,
            CellValue::DateTime(_) => 2,
            CellValue::Text(_) => 3,
            CellValue::Missing => 4,
        }
    }

    /// Total order over present values used by the sort step.
    pub fn sort_cmp(&self, other: &CellValue) -> Ordering {
        match (self, other) {
            (CellValue::Int(a), CellValue::Int(b)) => a.cmp(b),
            (a, b) if a.is_number() && b.is_number() => {
                let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                x.total_cmp(&y)
            }
            (CellValue::Bool(a), CellValue::Bool(b)) => a.cmp(b),
            (CellValue::DateTime(a), CellValue::DateTime(b)) => a.cmp(b),
            (CellValue::Text(a), CellValue::Text(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(s) => write!(f, "{}", s),
            CellValue::Int(i) => write!(f, "{}", i),
            CellValue::Float(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{:.1}", v)
                } else {
                    write!(f, "{}", v)
                }
            }
            CellValue::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            CellValue::DateTime(d) => write!(f, "{}", d.format(DATETIME_FORMAT)),
            CellValue::Missing => write!(f, "NaN"),
        }
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CellValue::Text(s) => serializer.serialize_str(s),
            CellValue::Int(i) => serializer.serialize_i64(*i),
            CellValue::Float(v) if v.is_finite() => serializer.serialize_f64(*v),
            CellValue::Float(_) | CellValue::Missing => serializer.serialize_none(),
            CellValue::Bool(b) => serializer.serialize_bool(*b),
            CellValue::DateTime(_) => serializer.collect_str(self),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<i64> for CellValue {
    fn from(i: i64) -> Self {
        CellValue::Int(i)
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        if v.is_nan() {
            CellValue::Missing
        } else {
            CellValue::Float(v)
        }
    }
}

impl From<NaiveDateTime> for CellValue {
    fn from(d: NaiveDateTime) -> Self {
        CellValue::DateTime(d)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}
