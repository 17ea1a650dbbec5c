use chrono::NaiveDate;
use serde::Serialize;

/// Represents a SQL value in a driver-agnostic way.
///
/// Used both for bound parameters and for decoded column values. Drivers are
/// responsible for converting these to and from their native types.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Text(String),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Bool(bool),
    Date(NaiveDate),
}

impl SqlValue {
    /// Short type name, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Text(_) => "text",
            SqlValue::Int32(_) => "int32",
            SqlValue::Int64(_) => "int64",
            SqlValue::Float64(_) => "float64",
            SqlValue::Bool(_) => "bool",
            SqlValue::Date(_) => "date",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Returns the value as an i64 if it is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int32(i) => Some(i64::from(*i)),
            SqlValue::Int64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Milliseconds since the Unix epoch for midnight UTC of `date`.
pub(crate) fn date_to_epoch_millis(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}

/// Inverse of [`date_to_epoch_millis`]; `None` when out of chrono's range.
pub(crate) fn epoch_millis_to_date(millis: i64) -> Option<NaiveDate> {
    chrono::DateTime::from_timestamp_millis(millis).map(|dt| dt.date_naive())
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int32(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int64(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float64(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(value: NaiveDate) -> Self {
        SqlValue::Date(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => SqlValue::Null,
        }
    }
}
