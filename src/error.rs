//! Monitor error types
//!
//! Defines all errors that can occur while preparing, executing and printing
//! monitoring queries.

use thiserror::Error;

/// Errors that can occur in the monitoring pipeline
#[derive(Error, Debug)]
pub enum MonitorError {
    /// The SQLite driver reported an error (open, prepare, scan)
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The PostgreSQL driver reported an error (connect, prepare, scan)
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// A query parameter cannot be bound to its placeholder's type
    #[error("Cannot bind a {value} parameter to a {ty} placeholder")]
    UnsupportedParameter { ty: String, value: &'static str },

    /// A roll-up query returned a row that is not a key/value pair
    #[error("Must have only 2 result columns to roll up results ({0} found)")]
    RollUpShape(usize),

    /// A transform pattern failed to compile
    #[error("Invalid transform regexp {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A named transform targeted a field that is absent or not a string
    #[error("Transform target field {field:?} is {problem}")]
    TransformTarget { field: String, problem: &'static str },

    /// A `--since` value was neither an absolute time nor a relative period
    #[error("Invalid time filter {0:?}: expected \"YYYY-MM-DD HH:MM:SS.mmm\" or a period like 5m")]
    InvalidSince(String),

    /// A relative period used a unit with no duration factor
    #[error("Unknown duration units {0:?}")]
    UnknownDurationUnit(char),

    /// A time-filtered query was dispatched without a lower bound
    #[error("Query {0:?} uses a time filter but no lower bound was supplied")]
    MissingTimeFilter(String),

    /// The consumer went away before a record could be delivered
    #[error("Output channel closed")]
    ChannelClosed,

    /// A query task failed; carries the query label for diagnosis
    #[error("Query {query:?} failed: {source}")]
    QueryFailed {
        query: String,
        #[source]
        source: Box<MonitorError>,
    },

    /// A producer task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(String),

    /// Writing to the output sink failed
    #[error("Output error: {0}")]
    Output(#[from] std::io::Error),

    /// Record serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        MonitorError::Serialization(err.to_string())
    }
}

impl MonitorError {
    /// Attach the failing query's label to an error raised inside its task
    pub fn in_query(self, query: impl Into<String>) -> Self {
        match self {
            already @ MonitorError::QueryFailed { .. } => already,
            other => MonitorError::QueryFailed {
                query: query.into(),
                source: Box::new(other),
            },
        }
    }
}

/// Result type alias for monitor operations
pub type MonitorResult<T> = Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MonitorError::RollUpShape(3);
        assert_eq!(
            err.to_string(),
            "Must have only 2 result columns to roll up results (3 found)"
        );

        let err = MonitorError::UnknownDurationUnit('w');
        assert_eq!(err.to_string(), "Unknown duration units 'w'");

        let err = MonitorError::UnsupportedParameter {
            ty: "int8".to_string(),
            value: "timestamp",
        };
        assert_eq!(err.to_string(), "Cannot bind a timestamp parameter to a int8 placeholder");
    }

    #[test]
    fn test_in_query_wraps_once() {
        let err = MonitorError::RollUpShape(3)
            .in_query("SELECT a, b, c FROM t")
            .in_query("ignored");

        match err {
            MonitorError::QueryFailed { query, source } => {
                assert_eq!(query, "SELECT a, b, c FROM t");
                assert!(matches!(*source, MonitorError::RollUpShape(3)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed");
        let err: MonitorError = io_err.into();
        assert!(matches!(err, MonitorError::Output(_)));
    }
}
