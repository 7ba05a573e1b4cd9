//! Global constants for the collection core.
//!
//! This module centralizes all hardcoded values to improve maintainability
//! and make configuration changes easier.

// Paging constants
/// Maximum keys requested per S3 ListObjectsV2 page
pub const S3_LIST_PAGE_SIZE: i64 = 1000;

/// Events requested per CloudWatch GetLogEvents page
pub const LOG_EVENTS_PAGE_SIZE: i64 = 5000;

/// Bound on discovered artifacts buffered ahead of the pipeline
pub const DISCOVERY_PREFETCH: usize = 4;

// Retry and backoff constants
/// Default maximum retry attempts for AWS calls
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base retry delay in milliseconds
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 250;

/// Cap on a single backoff sleep in seconds
pub const RETRY_MAX_DELAY_SECS: u64 = 30;

// Rate limiter defaults
/// Token-bucket fill rate (tokens per second) for API paging
pub const RATE_LIMIT_FILL_PER_SEC: f64 = 10.0;

/// Token-bucket capacity for API paging
pub const RATE_LIMIT_BURST: f64 = 20.0;

// Pipeline constants
/// Checkpoint the collection state after this many emitted rows
pub const CHECKPOINT_EVERY_ROWS: u64 = 200;

/// Fraction of schema errors in one artifact that fails the artifact
pub const SCHEMA_ERROR_THRESHOLD: f64 = 0.01;

/// Buffer size for streaming downloads to scratch (64KB)
pub const DOWNLOAD_BUFFER_SIZE: usize = 64 * 1024;

/// Maximum length of a single log line before the framer gives up (8MB)
pub const MAX_LINE_LENGTH: usize = 8 * 1024 * 1024;

// Defaults
/// Region assumed when a source config names none
pub const DEFAULT_REGION: &str = "us-east-1";

/// Prefix for per-source scratch directories under the system temp dir
pub const SCRATCH_DIR_PREFIX: &str = "aws-log-collector";

/// Timestamp layout used by cost-report CSV exports
pub const COST_REPORT_TIME_LAYOUT: &str = "%a %b %e %H:%M:%S UTC %Y";
