//! Attribute values as they travel between the engine and the planner.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::FieldType;

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"];

/// A single cell of an attribute table.
///
/// Serialized untagged so workspace files read naturally
/// (`"owner": "Smith"`, `"area": 100.0`, `"note": null`). Integers and
/// doubles compare by numeric value, so `100` equals `100.0`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum FieldValue {
    #[default]
    Null,
    Integer(i64),
    Double(f64),
    Date(NaiveDateTime),
    Text(String),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Numeric view used by the dissolve statistics. Text is parsed leniently.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::Double(d) => Some(*d),
            FieldValue::Text(s) => s.trim().parse::<f64>().ok(),
            FieldValue::Null | FieldValue::Date(_) => None,
        }
    }

    /// Convert the value so it can be stored in a field of type `target`.
    pub fn cast(&self, target: FieldType) -> Result<FieldValue, String> {
        if self.is_null() {
            return Ok(FieldValue::Null);
        }

        match target {
            FieldType::Text | FieldType::Guid => Ok(FieldValue::Text(self.to_string())),
            FieldType::Short | FieldType::Long | FieldType::ObjectId => {
                let whole = match self {
                    FieldValue::Integer(i) => *i,
                    FieldValue::Double(d) if d.is_finite() => d.trunc() as i64,
                    FieldValue::Text(s) => parse_integer(s)?,
                    other => return Err(format!("cannot store {} in a {} field", other.kind(), target)),
                };
                if target == FieldType::Short && i16::try_from(whole).is_err() {
                    return Err(format!("{} is out of range for a {} field", whole, target));
                }
                Ok(FieldValue::Integer(whole))
            }
            FieldType::Float | FieldType::Double => self
                .as_f64()
                .map(FieldValue::Double)
                .ok_or_else(|| format!("cannot store {} '{}' in a {} field", self.kind(), self, target)),
            FieldType::Date => match self {
                FieldValue::Date(d) => Ok(FieldValue::Date(*d)),
                FieldValue::Text(s) => parse_date(s).map(FieldValue::Date),
                other => Err(format!("cannot store {} in a {} field", other.kind(), target)),
            },
            FieldType::Geometry | FieldType::Blob => {
                Err(format!("{} fields cannot be written through the attribute table", target))
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Integer(_) => "integer",
            FieldValue::Double(_) => "double",
            FieldValue::Date(_) => "date",
            FieldValue::Text(_) => "text",
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::Null, FieldValue::Null) => true,
            (FieldValue::Integer(a), FieldValue::Integer(b)) => a == b,
            (FieldValue::Double(a), FieldValue::Double(b)) => a == b,
            (FieldValue::Integer(i), FieldValue::Double(d)) | (FieldValue::Double(d), FieldValue::Integer(i)) => {
                *i as f64 == *d
            }
            (FieldValue::Date(a), FieldValue::Date(b)) => a == b,
            (FieldValue::Text(a), FieldValue::Text(b)) => a == b,
            _ => false,
        }
    }
}

fn parse_integer(s: &str) -> Result<i64, String> {
    let s = s.trim();
    s.parse::<i64>()
        .or_else(|_| s.parse::<f64>().map(|d| d.trunc() as i64))
        .map_err(|_| format!("'{}' is not a number", s))
}

fn parse_date(s: &str) -> Result<NaiveDateTime, String> {
    let s = s.trim();
    for format in DATE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| format!("'{}' is not a date", s))
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Double(d) => write!(f, "{}", d),
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d %H:%M:%S")),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Double(value)
    }
}
