//! Core data types for monitoring results
//!
//! - `Value`: a dynamically typed column value as returned by the driver
//! - `Record`: one finished, emission-ready log line

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// A single column value
///
/// Drivers hand back opaque per-column data; every consumer matches on
/// the variant instead of downcasting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Borrow the string payload, if this is a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Name of the variant, for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Timestamp(_) => "timestamp",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => f.write_str(s),
            Value::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::Timestamp(ts)
    }
}

/// One emitted result: field name to value, plus the resolved event time
///
/// The event time lives outside `fields` so it never shows up in the
/// key=value body; it only drives the bracketed prefix of the line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, Value>,
    event_time: Option<DateTime<Utc>>,
}

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from one database row
    ///
    /// Columns with duplicate names keep the last value, matching how a
    /// map-per-row driver would behave.
    pub fn from_row(columns: &[String], values: Vec<Value>) -> Self {
        let fields = columns.iter().cloned().zip(values).collect();
        Self {
            fields,
            event_time: None,
        }
    }

    /// Builder method: add a field
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields.get_mut(name)
    }

    /// Iterate fields in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub(crate) fn values_mut(&mut self) -> impl Iterator<Item = &mut Value> {
        self.fields.values_mut()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Event time resolved from the row, if any
    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        self.event_time
    }

    pub fn set_event_time(&mut self, ts: DateTime<Utc>) {
        self.event_time = Some(ts);
    }

    /// Fill in the event time when the row did not provide one
    pub fn default_event_time(&mut self, fallback: DateTime<Utc>) {
        self.event_time.get_or_insert(fallback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_from_row() {
        let columns = vec!["host".to_string(), "count".to_string()];
        let record = Record::from_row(&columns, vec![Value::from("db1"), Value::Integer(4)]);

        assert_eq!(record.len(), 2);
        assert_eq!(record.get("host"), Some(&Value::from("db1")));
        assert_eq!(record.get("count"), Some(&Value::Integer(4)));
        assert_eq!(record.event_time(), None);
    }

    #[test]
    fn test_default_event_time_keeps_resolved() {
        let resolved = Utc.with_ymd_and_hms(2024, 1, 2, 15, 4, 5).unwrap();
        let fallback = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();

        let mut record = Record::new();
        record.set_event_time(resolved);
        record.default_event_time(fallback);
        assert_eq!(record.event_time(), Some(resolved));

        let mut record = Record::new();
        record.default_event_time(fallback);
        assert_eq!(record.event_time(), Some(fallback));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::Integer(42).to_string(), "42");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Float(1.5).to_string(), "1.5");
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 15, 4, 5).unwrap();
        assert_eq!(Value::Timestamp(ts).to_string(), "2024-01-02T15:04:05+00:00");
    }
}
