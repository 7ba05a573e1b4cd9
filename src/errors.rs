//! Error taxonomy for the collection core.
//!
//! Every failure is classified by kind so that the coordinator can decide
//! whether it kills a record, an artifact, or the whole run. Row-level
//! failures are wrapped in [`RowError`] so the offending artifact and line
//! survive into logs and summaries.

use thiserror::Error;

/// Classified collection error.
///
/// The kind determines blast radius:
///
/// * `Config` / `Auth` / `Fatal` — abort the run
/// * `TransientBackend` / `NotFound` — abort or skip the current artifact
/// * `Parse` / `Schema` — skip the current record
/// * `Cancelled` — cooperative shutdown, returned as-is
#[derive(Debug, Error)]
pub enum CollectError {
    /// Invalid or missing required configuration; surfaced from `init`.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Credentials rejected by the backend.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Throttling, 5xx, or timeout after retries were exhausted.
    #[error("backend error after retries: {0}")]
    TransientBackend(String),

    /// Object or stream vanished between discovery and download.
    #[error("not found: {0}")]
    NotFound(String),

    /// A mapper could not decode a record.
    #[error("parse error: {0}")]
    Parse(String),

    /// Structural mismatch, e.g. CSV column count vs captured header.
    #[error("schema mismatch: {0}")]
    Schema(String),

    /// The run's cancellation token fired.
    #[error("collection cancelled")]
    Cancelled,

    /// Invariant violation; terminates the run.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl CollectError {
    /// True for errors that must terminate the whole run.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            CollectError::Config(_)
                | CollectError::Auth(_)
                | CollectError::Fatal(_)
                | CollectError::Cancelled
        )
    }

    /// True for errors that are downgraded to row errors by the pipeline.
    pub fn is_row_level(&self) -> bool {
        matches!(self, CollectError::Parse(_) | CollectError::Schema(_))
    }
}

/// A record-level failure tied back to its artifact and, when known, line.
#[derive(Debug, Error)]
#[error("{artifact}{}: {source}", .line.map(|l| format!(":{}", l)).unwrap_or_default())]
pub struct RowError {
    /// Identifier of the artifact the record came from.
    pub artifact: String,
    /// 1-based line number within the artifact, when line-oriented.
    pub line: Option<usize>,
    #[source]
    pub source: CollectError,
}

impl RowError {
    pub fn new(artifact: impl Into<String>, line: Option<usize>, source: CollectError) -> Self {
        RowError {
            artifact: artifact.into(),
            line,
            source,
        }
    }
}

pub type CollectResult<T> = std::result::Result<T, CollectError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_fatal_classification() {
        assert!(CollectError::Config("missing bucket".into()).is_run_fatal());
        assert!(CollectError::Auth("denied".into()).is_run_fatal());
        assert!(CollectError::Fatal("poisoned".into()).is_run_fatal());
        assert!(CollectError::Cancelled.is_run_fatal());
        assert!(!CollectError::Parse("bad json".into()).is_run_fatal());
        assert!(!CollectError::NotFound("gone".into()).is_run_fatal());
    }

    #[test]
    fn test_row_level_classification() {
        assert!(CollectError::Parse("x".into()).is_row_level());
        assert!(CollectError::Schema("x".into()).is_row_level());
        assert!(!CollectError::TransientBackend("x".into()).is_row_level());
    }

    #[test]
    fn test_row_error_display_with_line() {
        let err = RowError::new("bucket/key.gz", Some(17), CollectError::Parse("bad".into()));
        let msg = err.to_string();
        assert!(msg.contains("bucket/key.gz"));
        assert!(msg.contains(":17"));
        assert!(msg.contains("parse error"));
    }

    #[test]
    fn test_row_error_display_without_line() {
        let err = RowError::new("whole.json.gz", None, CollectError::Parse("bad".into()));
        assert!(!err.to_string().contains(":1"));
    }
}
