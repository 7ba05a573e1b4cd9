//! # aws-log-collector
//!
//! Log-ingestion collection core for AWS sources: discovers log artifacts
//! in S3 buckets or CloudWatch Logs groups, parses them with format-aware
//! mappers, and emits enriched, host-ready rows.
//!
//! ## Overview
//!
//! A collection is described by a [`config::CollectionConfig`]: one table
//! (which selects the mapper and enrichment rules), one connection, and one
//! source. The host drives the run through [`plugin::CollectorPlugin`] and
//! receives serialized rows plus state blobs through its
//! [`plugin::RowSink`]. Persisted state blobs make later runs resume where
//! the previous one stopped.
//!
//! ## Features
//!
//! - **Two source kinds**: S3 object listing with lexicographic resume, and
//!   CloudWatch Logs with per-stream timestamp watermarks
//! - **Seven log formats**: CloudTrail envelopes, NDJSON, Lambda stdout,
//!   VPC flow logs, ALB and S3 server access logs, cost-recommendation CSV
//! - **Row enrichment**: sortable ids, UTC date partitions, and searchable
//!   ip/aka/username/domain arrays derived per format
//! - **Bounded pipelining**: discovery prefetches a few artifacts while the
//!   pipeline consumes the current one; cancellation is honored at every
//!   suspension point
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//!
//! use aws_log_collector::collector::RunContext;
//! use aws_log_collector::config::CollectionConfig;
//! use aws_log_collector::errors::CollectResult;
//! use aws_log_collector::plugin::{CollectorPlugin, RowSink};
//!
//! struct StdoutSink;
//!
//! impl RowSink for StdoutSink {
//!     fn on_row(&mut self, row: &[u8], _state_blob: Option<&str>) -> CollectResult<()> {
//!         println!("{}", String::from_utf8_lossy(row));
//!         Ok(())
//!     }
//!
//!     fn on_checkpoint(&mut self, _state_blob: &str) -> CollectResult<()> {
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = CollectionConfig::from_yaml_file(Path::new("collection.yaml"))?;
//! let mut plugin = CollectorPlugin::new();
//! plugin.init(config, None)?;
//!
//! let mut sink = StdoutSink;
//! let summary = plugin.collect(&RunContext::new(), &mut sink).await?;
//! println!("{}", summary);
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod config;
pub mod constants;
pub mod enrich;
pub mod errors;
pub mod mappers;
pub mod models;
pub mod pipeline;
pub mod plugin;
pub mod sources;
pub mod state;
