use crate::data::Database;
use crate::error::Result;
use crate::model::{LogEntry, LogFilter, LogLevel};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Persistent, queryable log stream. Every entry is also emitted through `tracing`.
#[derive(Clone)]
pub struct EventLog {
    db: Arc<Database>,
}

impl EventLog {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn record(
        &self,
        level: LogLevel,
        source: &str,
        message: &str,
        context: Value,
    ) -> Result<i64> {
        match level {
            LogLevel::Debug => debug!(source, %context, "{}", message),
            LogLevel::Info => info!(source, %context, "{}", message),
            LogLevel::Warn => warn!(source, %context, "{}", message),
            LogLevel::Error => error!(source, %context, "{}", message),
        }
        Ok(self.db.append_log(level, source, message, &context)?)
    }

    // Background tasks have nobody to return an error to; a failed write is
    // still visible through tracing.
    fn record_quietly(&self, level: LogLevel, source: &str, message: &str, context: Value) {
        if let Err(e) = self.record(level, source, message, context) {
            warn!("Failed to persist log entry from {}: {}", source, e);
        }
    }

    pub fn info(&self, source: &str, message: &str, context: Value) {
        self.record_quietly(LogLevel::Info, source, message, context);
    }

    pub fn warn(&self, source: &str, message: &str, context: Value) {
        self.record_quietly(LogLevel::Warn, source, message, context);
    }

    pub fn error(&self, source: &str, message: &str, context: Value) {
        self.record_quietly(LogLevel::Error, source, message, context);
    }

    pub fn query(&self, filter: &LogFilter) -> Result<Vec<LogEntry>> {
        Ok(self.db.query_logs(filter)?)
    }

    pub fn clear(&self) -> Result<usize> {
        let removed = self.db.clear_logs()?;
        debug!("Cleared {} log entries", removed);
        Ok(removed)
    }
}
