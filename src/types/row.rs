use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::{AnyDbError, Result};
use crate::types::SqlValue;

/// Driver-agnostic raw result from a database query.
#[derive(Debug, Clone, Default)]
pub struct RawQueryResult {
    /// Column names in order
    pub columns: Vec<String>,
    /// Rows, where each row is a vector of values in column order
    pub rows: Vec<Vec<SqlValue>>,
}

impl RawQueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self { columns, rows }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Decodes into rows keyed by column name, preserving result order.
    pub fn into_rows(self) -> Vec<Row> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|values| Row::new(&columns, values))
            .collect()
    }
}

/// A single decoded record: column name to value, in select-list order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<(String, SqlValue)>,
}

impl Row {
    /// Creates a new Row from column names and values.
    pub fn new(columns: &[String], values: Vec<SqlValue>) -> Self {
        let values = columns.iter().cloned().zip(values).collect();
        Self { values }
    }

    /// Gets a value by column name.
    pub fn get(&self, column: &str) -> Result<&SqlValue> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
            .ok_or_else(|| AnyDbError::ColumnNotFound(column.to_string()))
    }

    /// Returns all column names in this row.
    pub fn columns(&self) -> Vec<&str> {
        self.values.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Returns the number of columns in this row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if this row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in &self.values {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Materialized result of a SELECT. Serializes as `{"rows": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct QueryResult {
    rows: Vec<Row>,
}

impl QueryResult {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    /// Creates a QueryResult from a RawQueryResult.
    pub fn from_raw(raw: RawQueryResult) -> Self {
        Self::new(raw.into_rows())
    }

    /// Extracts a single row from the result.
    /// Returns an error if the result contains zero or more than one row.
    pub fn single_row(self) -> Result<Row> {
        let actual = self.rows.len();
        let mut rows = self.rows.into_iter();
        match (rows.next(), rows.next()) {
            (Some(row), None) => Ok(row),
            _ => Err(AnyDbError::UnexpectedRowCount {
                expected: 1,
                actual,
            }),
        }
    }

    /// Returns all rows from the result.
    pub fn rows(self) -> Vec<Row> {
        self.rows
    }

    /// Returns a reference to the rows without consuming the result.
    pub fn rows_ref(&self) -> &[Row] {
        &self.rows
    }

    /// Returns the number of rows in this result.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if this result contains no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
