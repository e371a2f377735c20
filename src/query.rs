//! Prepared monitoring queries
//!
//! A `PreparedQuery` is a configured [`Query`] with its transforms compiled
//! and its timestamp resolver built, ready to be shared across tasks.

use crate::config::Query;
use crate::error::{MonitorError, MonitorResult};
use crate::record::Record;
use crate::timestamp::TimestampResolver;
use crate::transform::FieldTransformer;

/// A query validated and compiled for execution
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    query: Query,
    resolver: TimestampResolver,
    transformer: FieldTransformer,
}

impl PreparedQuery {
    /// Validate and compile a configured query
    pub fn prepare(query: Query) -> MonitorResult<Self> {
        if query.sql.trim().is_empty() {
            return Err(MonitorError::Config(format!(
                "query {:?} has no SQL",
                query.name.as_deref().unwrap_or("<unnamed>")
            )));
        }

        let transformer =
            FieldTransformer::compile(&query.transforms).map_err(|e| e.in_query(query.label()))?;
        let resolver =
            TimestampResolver::new(query.timestamp_column.clone(), query.timestamp_format.clone());

        Ok(Self {
            query,
            resolver,
            transformer,
        })
    }

    /// Prepare every configured query, failing on the first invalid one
    pub fn prepare_all(queries: &[Query]) -> MonitorResult<Vec<Self>> {
        queries.iter().cloned().map(Self::prepare).collect()
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn sql(&self) -> &str {
        &self.query.sql
    }

    pub fn label(&self) -> &str {
        self.query.label()
    }

    pub fn is_roll_up(&self) -> bool {
        self.query.roll_up
    }

    pub fn is_time_filtered(&self) -> bool {
        self.query.time_filter
    }

    /// Resolve the event time, then run the transforms
    pub fn finish_record(&self, record: &mut Record) -> MonitorResult<()> {
        self.resolver.resolve(record);
        self.transformer.apply(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Transform;
    use crate::record::Value;

    #[test]
    fn test_prepare_rejects_bad_regex() {
        let query = Query::new("SELECT 1")
            .named("broken")
            .transform(Transform::all_fields("[", ""));

        match PreparedQuery::prepare(query).unwrap_err() {
            MonitorError::QueryFailed { query, source } => {
                assert_eq!(query, "broken");
                assert!(matches!(*source, MonitorError::InvalidRegex { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_prepare_rejects_empty_sql() {
        assert!(matches!(
            PreparedQuery::prepare(Query::new("  ")),
            Err(MonitorError::Config(_))
        ));
    }

    #[test]
    fn test_finish_record_resolves_before_transforming() {
        // The transform mangles the timestamp text, so resolution must come first
        let prepared = PreparedQuery::prepare(
            Query::new("SELECT at FROM t")
                .timestamp("at", "%Y-%m-%d")
                .transform(Transform::all_fields("-", "/")),
        )
        .unwrap();

        let mut record = Record::new().field("at", "2024-01-02");
        prepared.finish_record(&mut record).unwrap();

        assert!(record.event_time().is_some());
        assert_eq!(record.get("at"), Some(&Value::from("2024/01/02")));
    }
}
