//! Database access
//!
//! The pipeline talks to the database through the [`Database`] trait: run one
//! SQL statement with positional parameters and hand every row to a callback.
//! Implementations must be safe to call from many query tasks at once.
//!
//! - [`PostgresDatabase`]: PostgreSQL over `tokio-postgres`, one connection per query
//! - [`SqliteDatabase`]: read-only SQLite backend, one connection per query

mod postgres;
mod sqlite;

pub use postgres::PostgresDatabase;
pub use sqlite::SqliteDatabase;

use crate::config::{DatabaseConfig, DatabaseDriver};
use crate::error::MonitorResult;
use crate::record::Value;
use std::sync::Arc;

/// Callback receiving each row's column names and values in database order
pub type RowCallback<'a> = dyn FnMut(&[String], Vec<Value>) -> MonitorResult<()> + 'a;

/// A thread-safe handle capable of running monitoring queries
pub trait Database: Send + Sync {
    /// Run `sql`, binding `params` positionally, and stream rows into `on_row`
    ///
    /// Returns the column names, which are known even when no row comes back.
    fn query(
        &self,
        sql: &str,
        params: &[Value],
        on_row: &mut RowCallback<'_>,
    ) -> MonitorResult<Vec<String>>;
}

/// Open the database described by `config`
pub fn open(config: &DatabaseConfig) -> MonitorResult<Arc<dyn Database>> {
    tracing::info!(
        "Connecting to database ({})",
        config.redacted_connection_string()
    );

    match config.driver {
        DatabaseDriver::Postgres => Ok(Arc::new(PostgresDatabase::open(config)?)),
        DatabaseDriver::Sqlite => Ok(Arc::new(SqliteDatabase::open(&config.database)?)),
    }
}

/// Text for a binary column: the bytes themselves when UTF-8, hex otherwise
pub(crate) fn bytes_to_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => hex::encode(bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_text() {
        assert_eq!(bytes_to_text(b"hi"), "hi");
        assert_eq!(bytes_to_text(&[0x00, 0xff, 0x10]), "00ff10");
    }

    #[tokio::test]
    async fn test_open_selects_driver() {
        let dir = tempfile::tempdir().unwrap();
        rusqlite::Connection::open(dir.path().join("m.db")).unwrap();

        let sqlite = DatabaseConfig {
            driver: DatabaseDriver::Sqlite,
            database: dir.path().join("m.db").display().to_string(),
            ..DatabaseConfig::default()
        };
        assert!(open(&sqlite).is_ok());

        // Connecting is deferred to the first query
        let postgres = DatabaseConfig {
            username: "monitor".to_string(),
            ..DatabaseConfig::default()
        };
        assert!(open(&postgres).is_ok());
    }
}
