//! Result handlers
//!
//! A handler turns the raw rows of one query into finished records and
//! pushes them onto the shared output channel:
//!
//! - [`DefaultResultHandler`]: one record per row, sent immediately
//! - [`RolledUpResultHandler`]: all `(key, value)` rows folded into a single
//!   record, sent when the handler is finalised
//!
//! Handlers run on blocking threads and use `blocking_send`, so a slow
//! consumer holds producers back once the channel is full.

use crate::error::{MonitorError, MonitorResult};
use crate::query::PreparedQuery;
use crate::record::{Record, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Roll-up key used for a NULL first column
pub const NULL_KEY: &str = "null";

/// Producer side of the shared output channel
pub type RecordSender = mpsc::Sender<Record>;

/// Strategy for turning query rows into records
pub trait ResultHandler: Send {
    /// Consume one row
    fn handle_result(&mut self, columns: &[String], values: Vec<Value>) -> MonitorResult<()>;

    /// Flush deferred state once the row stream is exhausted
    ///
    /// Takes the handler by value so nothing can be emitted afterwards.
    fn finalise(self: Box<Self>) -> MonitorResult<()>;
}

/// Build the handler matching the query's roll-up setting
pub fn handler_for(query: Arc<PreparedQuery>, sender: RecordSender) -> Box<dyn ResultHandler> {
    if query.is_roll_up() {
        Box::new(RolledUpResultHandler::new(query, sender))
    } else {
        Box::new(DefaultResultHandler::new(query, sender))
    }
}

fn emit(sender: &RecordSender, record: Record) -> MonitorResult<()> {
    sender
        .blocking_send(record)
        .map_err(|_| MonitorError::ChannelClosed)
}

/// Emits one record per row
pub struct DefaultResultHandler {
    query: Arc<PreparedQuery>,
    sender: RecordSender,
}

impl DefaultResultHandler {
    pub fn new(query: Arc<PreparedQuery>, sender: RecordSender) -> Self {
        Self { query, sender }
    }
}

impl ResultHandler for DefaultResultHandler {
    fn handle_result(&mut self, columns: &[String], values: Vec<Value>) -> MonitorResult<()> {
        let mut record = Record::from_row(columns, values);
        self.query.finish_record(&mut record)?;
        emit(&self.sender, record)
    }

    fn finalise(self: Box<Self>) -> MonitorResult<()> {
        Ok(())
    }
}

/// Folds `(key, value)` rows into one record
pub struct RolledUpResultHandler {
    query: Arc<PreparedQuery>,
    sender: RecordSender,
    result: Record,
}

impl RolledUpResultHandler {
    pub fn new(query: Arc<PreparedQuery>, sender: RecordSender) -> Self {
        Self {
            query,
            sender,
            result: Record::new(),
        }
    }
}

impl ResultHandler for RolledUpResultHandler {
    fn handle_result(&mut self, columns: &[String], values: Vec<Value>) -> MonitorResult<()> {
        if columns.len() != 2 {
            return Err(MonitorError::RollUpShape(columns.len()));
        }

        let mut values = values.into_iter();
        let (Some(key), Some(value)) = (values.next(), values.next()) else {
            return Err(MonitorError::RollUpShape(columns.len()));
        };

        let key = match key {
            Value::Null => NULL_KEY.to_string(),
            other => other.to_string(),
        };

        // Repeated keys: last row wins
        self.result.insert(key, value);
        Ok(())
    }

    fn finalise(self: Box<Self>) -> MonitorResult<()> {
        let RolledUpResultHandler {
            query,
            sender,
            mut result,
        } = *self;

        tracing::debug!("Rolled up {} keys for {}", result.len(), query.label());

        query.finish_record(&mut result)?;
        emit(&sender, result)
    }
}
