//! Dispatcher and fan-in merger
//!
//! ```text
//! ┌─────────┐  ┌─────────┐       ┌─────────┐
//! │ query 0 │  │ query 1 │  ...  │ query N │   one blocking task per query
//! └────┬────┘  └────┬────┘       └────┬────┘
//!      └─────┬──────┘─────────────────┘
//!            ▼
//!   ┌─────────────────┐
//!   │  mpsc channel   │   bounded, many senders
//!   └────────┬────────┘
//!            ▼
//!   ┌─────────────────┐
//!   │    consumer     │   fallback time, RecordSink
//!   └─────────────────┘
//! ```
//!
//! Every producer owns a clone of the sender and drops it when its executor
//! returns, so the channel closes only after the last producer is done. The
//! consumer keeps receiving until the channel is closed and empty, and the
//! run ends once every producer task has also been joined.

use crate::database::Database;
use crate::error::{MonitorError, MonitorResult};
use crate::executor::{execute_query, QueryStats};
use crate::handler::handler_for;
use crate::output::RecordSink;
use crate::query::PreparedQuery;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

/// What a failing query does to the rest of the run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// The first failure ends the run with an error
    #[default]
    Abort,
    /// Failures are logged and reported; other queries carry on
    Isolate,
}

/// A query that failed under [`FailurePolicy::Isolate`]
#[derive(Debug, Clone)]
pub struct QueryFailure {
    pub query: String,
    pub error: String,
}

/// Summary of one dispatch-and-drain cycle
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// Fallback event time for records without one
    pub dispatched_at: DateTime<Utc>,
    pub queries: usize,
    pub rows_read: usize,
    pub records_emitted: usize,
    pub failures: Vec<QueryFailure>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs every configured query concurrently and merges their output
pub struct Dispatcher {
    db: Arc<dyn Database>,
    queries: Vec<Arc<PreparedQuery>>,
    channel_capacity: usize,
    failure_policy: FailurePolicy,
}

impl Dispatcher {
    pub fn new(db: Arc<dyn Database>, queries: Vec<PreparedQuery>) -> Self {
        Self {
            db,
            queries: queries.into_iter().map(Arc::new).collect(),
            channel_capacity: 64,
            failure_policy: FailurePolicy::default(),
        }
    }

    /// Builder method: records buffered between producers and the sink
    ///
    /// Clamped to at least one; a capacity of one is a near-synchronous
    /// hand-off.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Builder method: set the failure policy
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn queries(&self) -> &[Arc<PreparedQuery>] {
        &self.queries
    }

    /// Check up front that time-filtered queries will get a lower bound
    pub fn check_time_filters(&self, since: Option<DateTime<Utc>>) -> MonitorResult<()> {
        if since.is_some() {
            return Ok(());
        }

        match self.queries.iter().find(|q| q.is_time_filtered()) {
            Some(query) => Err(MonitorError::MissingTimeFilter(query.label().to_string())),
            None => Ok(()),
        }
    }

    /// Dispatch all queries and drain their records into `sink`
    pub async fn run(
        &self,
        since: Option<DateTime<Utc>>,
        sink: &mut dyn RecordSink,
    ) -> MonitorResult<RunSummary> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", %run_id);
        self.run_inner(run_id, since, sink).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        since: Option<DateTime<Utc>>,
        sink: &mut dyn RecordSink,
    ) -> MonitorResult<RunSummary> {
        let dispatched_at = Utc::now();
        let (tx, mut rx) = mpsc::channel(self.channel_capacity);
        let mut producers = JoinSet::new();

        // Dispatch
        for (index, query) in self.queries.iter().enumerate() {
            let db = Arc::clone(&self.db);
            let query = Arc::clone(query);
            let handler = handler_for(Arc::clone(&query), tx.clone());
            let span = tracing::Span::current();

            producers.spawn_blocking(move || {
                let _entered = span.enter();
                let outcome = execute_query(db.as_ref(), &query, handler, since);
                (index, outcome)
            });
        }
        drop(tx);

        tracing::info!(
            "Dispatched {} queries (lower bound: {:?})",
            self.queries.len(),
            since
        );

        let mut summary = RunSummary {
            run_id,
            dispatched_at,
            queries: self.queries.len(),
            rows_read: 0,
            records_emitted: 0,
            failures: Vec::new(),
        };

        // Drain
        let mut channel_open = true;
        while channel_open || !producers.is_empty() {
            tokio::select! {
                biased;

                received = rx.recv(), if channel_open => match received {
                    Some(mut record) => {
                        record.default_event_time(dispatched_at);
                        sink.write_record(&record)?;
                        summary.records_emitted += 1;
                    }
                    None => channel_open = false,
                },

                Some(joined) = producers.join_next(), if !producers.is_empty() => {
                    let (index, outcome) = joined.map_err(|e| MonitorError::Task(e.to_string()))?;
                    self.settle(index, outcome, &mut summary)?;
                }
            }
        }

        sink.flush()?;

        tracing::info!(
            "Run complete: {} records from {} rows, {} failed queries",
            summary.records_emitted,
            summary.rows_read,
            summary.failures.len()
        );

        Ok(summary)
    }

    /// Record a finished producer; under `Abort` a failure ends the run
    fn settle(
        &self,
        index: usize,
        outcome: MonitorResult<QueryStats>,
        summary: &mut RunSummary,
    ) -> MonitorResult<()> {
        let label = self.queries[index].label();

        match outcome {
            Ok(stats) => {
                summary.rows_read += stats.rows;
                Ok(())
            }
            Err(err) => match self.failure_policy {
                FailurePolicy::Abort => {
                    tracing::error!("Query {} failed, aborting run: {}", label, err);
                    Err(err.in_query(label))
                }
                FailurePolicy::Isolate => {
                    tracing::error!("Query {} failed: {}", label, err);
                    summary.failures.push(QueryFailure {
                        query: label.to_string(),
                        error: err.to_string(),
                    });
                    Ok(())
                }
            },
        }
    }
}
