//! # dbmonitor
//!
//! Runs a configured set of SQL queries against a database, concurrently,
//! and prints every result row (or a rolled-up summary of all rows) as a
//! single-line `key="value"` log record that log-ingestion tools can pick up.
//!
//! ## Modules
//!
//! - [`config`]: TOML/JSON configuration and query definitions
//! - [`database`]: the `Database` trait with PostgreSQL and SQLite backends
//! - [`handler`]: per-row and roll-up result handlers
//! - [`executor`]: runs one query through its handler
//! - [`dispatcher`]: fans queries out and merges their records
//! - [`output`]: key=value and JSON line printers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dbmonitor::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = database::open(&DatabaseConfig::default())?;
//!
//!     let queries = PreparedQuery::prepare_all(&[
//!         Query::new("SELECT state, count(*) FROM sessions GROUP BY state").rolled_up(),
//!         Query::new("SELECT user, started FROM sessions")
//!             .timestamp("started", "%Y-%m-%d %H:%M:%S"),
//!     ])?;
//!
//!     let dispatcher = Dispatcher::new(db, queries);
//!     let mut printer = LinePrinter::new(std::io::stdout(), "_");
//!     let summary = dispatcher.run(None, &mut printer).await?;
//!
//!     eprintln!("{} records", summary.records_emitted);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod handler;
pub mod logging;
pub mod output;
pub mod query;
pub mod record;
pub mod schedule;
pub mod timestamp;
pub mod transform;

pub use config::{
    Config, ConfigError, DatabaseConfig, DatabaseDriver, LoggingConfig, MonitorConfig,
    OutputConfig, Query, Transform,
};

pub use database::{Database, PostgresDatabase, SqliteDatabase};

pub use dispatcher::{Dispatcher, FailurePolicy, QueryFailure, RunSummary};

pub use error::{MonitorError, MonitorResult};

pub use executor::{execute_query, QueryStats};

pub use handler::{handler_for, DefaultResultHandler, RecordSender, ResultHandler, RolledUpResultHandler};

pub use output::{JsonLinePrinter, LinePrinter, OutputFormat, RecordSink};

pub use query::PreparedQuery;

pub use record::{Record, Value};

pub use schedule::{run_periodically, ScheduleStats};

pub use timestamp::{parse_since, TimestampResolver};

pub use transform::FieldTransformer;
