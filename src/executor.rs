//! Query execution
//!
//! Runs one prepared query against the database and streams its rows
//! through a bound result handler. Blocking; called from the blocking pool.

use crate::database::Database;
use crate::error::{MonitorError, MonitorResult};
use crate::handler::ResultHandler;
use crate::query::PreparedQuery;
use crate::record::Value;
use chrono::{DateTime, Utc};

/// Outcome of one successful query execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryStats {
    pub columns: usize,
    pub rows: usize,
}

/// Execute `query` and feed every row to `handler`
///
/// The lower bound is bound as the only parameter when the query is time
/// filtered. `finalise` runs exactly once after the last row, including when
/// the query returned nothing; it does not run if the query failed.
pub fn execute_query(
    db: &dyn Database,
    query: &PreparedQuery,
    mut handler: Box<dyn ResultHandler>,
    since: Option<DateTime<Utc>>,
) -> MonitorResult<QueryStats> {
    let params = if query.is_time_filtered() {
        let since = since.ok_or_else(|| MonitorError::MissingTimeFilter(query.label().to_string()))?;
        vec![Value::Timestamp(since)]
    } else {
        Vec::new()
    };

    tracing::debug!("Running monitoring query: {}", query.label());

    let mut rows = 0;
    let columns = db.query(query.sql(), &params, &mut |columns, values| {
        rows += 1;
        handler.handle_result(columns, values)
    })?;

    handler.finalise()?;

    tracing::debug!("Query {} returned {} rows", query.label(), rows);

    Ok(QueryStats {
        columns: columns.len(),
        rows,
    })
}
