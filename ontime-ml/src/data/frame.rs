//! Row-oriented tabular batches shared by every pipeline stage.
//!
//! A [`Frame`] keeps column names alongside rows of JSON values so that raw
//! serving payloads, training extracts and derived feature sets all share one
//! shape. Missing values are `Value::Null`.

use crate::error::MlError;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// One raw flight row as a flat mapping of field name to value.
pub type Record = Map<String, Value>;

/// A batch of rows sharing one column layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

impl Frame {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a frame from records, taking the union of their keys in
    /// first-seen order. Keys absent from a record become `Null`.
    pub fn from_records(records: &[Record]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for record in records {
            for key in record.keys() {
                if seen.insert(key.as_str()) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|c| record.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    pub fn from_record(record: &Record) -> Self {
        Self::from_records(std::slice::from_ref(record))
    }

    pub fn to_records(&self) -> Vec<Record> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect::<Record>()
            })
            .collect()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Index of `name`, or [`MlError::MissingColumn`].
    pub fn require_column(&self, name: &str) -> Result<usize, MlError> {
        self.column_index(name)
            .ok_or_else(|| MlError::missing_column(name))
    }

    pub fn value(&self, row: usize, column: usize) -> &Value {
        self.rows[row].get(column).unwrap_or(&Value::Null)
    }

    /// All values of one column, top to bottom.
    pub fn values(&self, name: &str) -> Result<Vec<&Value>, MlError> {
        let idx = self.require_column(name)?;
        Ok((0..self.rows.len()).map(|r| self.value(r, idx)).collect())
    }

    /// Replace the column `name` or append it when absent.
    pub fn set_column(&mut self, name: &str, values: Vec<Value>) -> Result<(), MlError> {
        if values.len() != self.rows.len() {
            return Err(MlError::dataset(format!(
                "column '{}' has {} values but frame has {} rows",
                name,
                values.len(),
                self.rows.len()
            )));
        }

        match self.column_index(name) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    if idx < row.len() {
                        row[idx] = value;
                    } else {
                        row.resize(idx, Value::Null);
                        row.push(value);
                    }
                }
            }
            None => {
                let width = self.columns.len();
                self.columns.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.resize(width, Value::Null);
                    row.push(value);
                }
            }
        }
        Ok(())
    }

    /// Remove every listed column that is present. Returns the names that
    /// were actually dropped.
    pub fn drop_columns(&mut self, names: &[String]) -> Vec<String> {
        let mut dropped = Vec::new();
        for name in names {
            if let Some(idx) = self.column_index(name) {
                self.columns.remove(idx);
                for row in &mut self.rows {
                    if idx < row.len() {
                        row.remove(idx);
                    }
                }
                dropped.push(name.clone());
            }
        }
        dropped
    }

    /// Remove a column and hand back its values.
    pub fn take_column(&mut self, name: &str) -> Result<Vec<Value>, MlError> {
        let idx = self.require_column(name)?;
        self.columns.remove(idx);
        let values = self
            .rows
            .iter_mut()
            .map(|row| {
                if idx < row.len() {
                    row.remove(idx)
                } else {
                    Value::Null
                }
            })
            .collect();
        Ok(values)
    }

    /// New frame holding the given rows, in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> Frame {
        Frame {
            columns: self.columns.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }
}

/// Numeric view of a cell. Numeric strings are accepted; anything else is
/// missing.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Categorical view of a cell. Empty strings count as missing.
pub fn as_category(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Lenient timestamp parsing. Anything unparseable is `None`, never an error.
pub fn parse_timestamp(value: &Value) -> Option<NaiveDateTime> {
    let Value::String(raw) = value else {
        return None;
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    for fmt in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(ts);
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.naive_local());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// `f64` to a JSON cell; non-finite values become `Null`.
pub fn number(value: f64) -> Value {
    Value::from(value)
}
