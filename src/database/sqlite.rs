//! SQLite backend
//!
//! Opens a fresh read-only connection for every query so concurrent query
//! tasks never share a connection. SQLite allows any number of readers.

use super::{bytes_to_text, Database, RowCallback};
use crate::error::MonitorResult;
use crate::record::Value;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Text layout used when binding timestamps, same as SQLite's `strftime('%Y-%m-%d %H:%M:%f')`
const SQLITE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Read-only SQLite database file
#[derive(Debug, Clone)]
pub struct SqliteDatabase {
    path: PathBuf,
}

impl SqliteDatabase {
    /// Open a database file, checking that it can be connected to
    pub fn open(path: impl AsRef<Path>) -> MonitorResult<Self> {
        let path = path.as_ref().to_path_buf();

        // Fail at startup rather than in every query task
        Self::connect(&path)?;

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(path: &Path) -> MonitorResult<Connection> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.busy_timeout(Duration::from_secs(5))?;

        Ok(conn)
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Float(x) => SqlValue::Real(*x),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Timestamp(ts) => SqlValue::Text(ts.format(SQLITE_TIME_FORMAT).to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(x) => Value::Float(x),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(bytes_to_text(bytes)),
    }
}

impl Database for SqliteDatabase {
    fn query(
        &self,
        sql: &str,
        params: &[Value],
        on_row: &mut RowCallback<'_>,
    ) -> MonitorResult<Vec<String>> {
        let conn = Self::connect(&self.path)?;
        let mut stmt = conn.prepare(sql)?;

        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();

        let mut rows = stmt.query(params_from_iter(params.iter().map(to_sql)))?;

        while let Some(row) = rows.next()? {
            let values = (0..columns.len())
                .map(|i| row.get_ref(i).map(from_sql))
                .collect::<Result<Vec<_>, _>>()?;

            on_row(&columns, values)?;
        }

        Ok(columns)
    }
}
