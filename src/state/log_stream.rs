//! Collection state for the log-stream backend: one high-watermark per
//! stream, in event-timestamp millis.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-stream high-watermarks for a CloudWatch Logs source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogStreamState {
    /// Stream name -> millis of the most recently collected event
    #[serde(default)]
    timestamps: HashMap<String, i64>,
    /// Fields written by newer versions, preserved verbatim
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl LogStreamState {
    /// Record an event timestamp for a stream. Zero and non-advancing
    /// timestamps are no-ops, so a watermark never regresses.
    pub fn upsert(&mut self, stream: &str, ts: i64) {
        if ts == 0 {
            return;
        }
        match self.timestamps.get(stream) {
            Some(current) if ts <= *current => {}
            _ => {
                self.timestamps.insert(stream.to_string(), ts);
            }
        }
    }

    /// Most recently collected event timestamp for a stream, if any.
    pub fn latest(&self, stream: &str) -> Option<i64> {
        self.timestamps.get(stream).copied()
    }

    /// Effective collection window for a stream: resume one past the
    /// watermark when the stream has been seen, else the configured start.
    pub fn get_range(&self, stream: &str, config_start: i64, config_end: i64) -> (i64, i64) {
        match self.timestamps.get(stream) {
            Some(ts) => (ts + 1, config_end),
            None => (config_start, config_end),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}
