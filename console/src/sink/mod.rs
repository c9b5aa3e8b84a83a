//! Time-series sink for collected logs

pub mod influx;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::ConsoleError;

/// Measurement every collected log line is written to
pub const LOG_MEASUREMENT: &str = "logs";

/// A normalized log record
#[derive(Debug, Clone, PartialEq)]
pub struct LogPoint {
    pub time: DateTime<Utc>,
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, String>,
}

/// Where collection for a host resumes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogCursor {
    /// Timestamp of the newest stored record, as the sink reports it
    pub time: String,
    /// Subsystem type of that record
    pub log_type: String,
}

/// Append-only store of log points keyed by host and time
#[async_trait]
pub trait PointSink: Send + Sync {
    /// Newest record stored for `hostname`
    async fn latest_cursor(&self, hostname: &str) -> Result<Option<LogCursor>, ConsoleError>;

    /// Write the whole batch in one call, returning the number written
    async fn write_points(&self, points: &[LogPoint]) -> Result<usize, ConsoleError>;
}
