//! Emitted record shape and sinks.

use std::io::Write;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use tracing::warn;

use crate::provider::{Labels, Tags};

/// One emitted log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    pub message: String,
    pub labels: Labels,
    pub tags: Tags,
    /// Decoded line-sequence token; `None` when the provider sent none or it
    /// was malformed.
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

fn serialize_timestamp<S>(ts: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match ts {
        Some(t) => serializer.serialize_str(&t.to_rfc3339_opts(SecondsFormat::Nanos, true)),
        None => serializer.serialize_none(),
    }
}

/// Destination of emitted records.
pub trait RecordSink: Send + Sync {
    fn emit(&self, record: &LogRecord);
}

/// Writes one compact JSON object per line to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl RecordSink for StdoutSink {
    fn emit(&self, record: &LogRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to encode log record");
                return;
            }
        };

        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "{}", line) {
            warn!(error = %e, "Failed to write log record");
        }
    }
}

/// Collects records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl RecordSink for MemorySink {
    fn emit(&self, record: &LogRecord) {
        self.records.lock().push(record.clone());
    }
}
