//! Periodic runs
//!
//! Repeats the dispatch cycle on a fixed interval until shutdown. After the
//! first cycle, each run's lower bound is the previous run's dispatch time,
//! so time-filtered queries only see rows that arrived since the last run.

use crate::dispatcher::{Dispatcher, RunSummary};
use crate::error::MonitorResult;
use crate::output::RecordSink;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Totals across all completed cycles
#[derive(Debug, Clone, Default)]
pub struct ScheduleStats {
    pub cycles: u64,
    pub records_emitted: usize,
    pub failed_queries: usize,
}

impl ScheduleStats {
    fn add(&mut self, summary: &RunSummary) {
        self.cycles += 1;
        self.records_emitted += summary.records_emitted;
        self.failed_queries += summary.failures.len();
    }
}

/// Run `dispatcher` every `every` until `shutdown` resolves
///
/// A cycle in progress is allowed to finish; shutdown is only observed
/// between cycles. A failed run (under the abort policy) stops the loop.
pub async fn run_periodically<F>(
    dispatcher: &Dispatcher,
    every: Duration,
    mut since: Option<DateTime<Utc>>,
    sink: &mut dyn RecordSink,
    shutdown: F,
) -> MonitorResult<ScheduleStats>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stats = ScheduleStats::default();

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                tracing::info!("Shutdown requested after {} cycles", stats.cycles);
                break;
            }
            _ = interval.tick() => {}
        }

        let summary = dispatcher.run(since, sink).await?;
        stats.add(&summary);
        since = Some(summary.dispatched_at);
    }

    Ok(stats)
}
