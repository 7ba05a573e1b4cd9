//! Host-facing surface: the plugin object and the row sink it feeds.
//!
//! The host owns scheduling, credentials, and persistence; the plugin owns
//! discovery, mapping, and enrichment. Rows cross the boundary as
//! serialized JSON bytes, optionally accompanied by a state blob the host
//! must persist before acknowledging the row.

use crate::collector::{run_collection, RunContext, RunSummary};
use crate::config::CollectionConfig;
use crate::errors::{CollectError, CollectResult};
use crate::mappers::init_catalog;

/// Receiver for enriched rows and checkpoint blobs.
pub trait RowSink {
    /// Deliver one serialized row. A state blob, when present, must be
    /// persisted before the row is considered delivered.
    fn on_row(&mut self, row: &[u8], state_blob: Option<&str>) -> CollectResult<()>;

    /// Persist a state blob outside the row stream (final checkpoint).
    fn on_checkpoint(&mut self, state_blob: &str) -> CollectResult<()>;
}

/// One collection, initialized once and run on the host's schedule.
#[derive(Debug, Default)]
pub struct CollectorPlugin {
    config: Option<CollectionConfig>,
    state_blob: Option<String>,
}

impl CollectorPlugin {
    pub fn new() -> Self {
        CollectorPlugin::default()
    }

    pub fn identifier(&self) -> &'static str {
        "aws_log_collector"
    }

    /// Validate the whole configuration up front. Config errors here are
    /// terminal; `collect` refuses to run without a successful `init`.
    pub fn init(
        &mut self,
        config: CollectionConfig,
        state_blob: Option<String>,
    ) -> CollectResult<()> {
        config.validate()?;
        init_catalog().mapper_for(&config.table)?;
        self.config = Some(config);
        self.state_blob = state_blob;
        Ok(())
    }

    /// Run one collection. The updated state blob is retained so a later
    /// `collect` on the same plugin resumes where this one stopped.
    pub async fn collect(
        &mut self,
        ctx: &RunContext,
        sink: &mut dyn RowSink,
    ) -> CollectResult<RunSummary> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| CollectError::Config("collect called before init".to_string()))?;

        let mut recorder = StateRecordingSink {
            inner: sink,
            last_blob: None,
        };
        let result = run_collection(ctx, config, self.state_blob.as_deref(), &mut recorder).await;
        if let Some(blob) = recorder.last_blob {
            self.state_blob = Some(blob);
        }
        result
    }
}

/// Remembers the newest state blob that crossed the sink, so the plugin can
/// resume within the same process without the host replaying it.
struct StateRecordingSink<'a> {
    inner: &'a mut dyn RowSink,
    last_blob: Option<String>,
}

impl RowSink for StateRecordingSink<'_> {
    fn on_row(&mut self, row: &[u8], state_blob: Option<&str>) -> CollectResult<()> {
        self.inner.on_row(row, state_blob)?;
        if let Some(blob) = state_blob {
            self.last_blob = Some(blob.to_string());
        }
        Ok(())
    }

    fn on_checkpoint(&mut self, state_blob: &str) -> CollectResult<()> {
        self.inner.on_checkpoint(state_blob)?;
        self.last_blob = Some(state_blob.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{S3SourceConfig, SourceConfig};

    /// Collects everything in memory; the integration tests use the same
    /// shape.
    #[derive(Debug, Default)]
    pub struct MemorySink {
        pub rows: Vec<Vec<u8>>,
        pub blobs: Vec<String>,
    }

    impl RowSink for MemorySink {
        fn on_row(&mut self, row: &[u8], state_blob: Option<&str>) -> CollectResult<()> {
            self.rows.push(row.to_vec());
            if let Some(blob) = state_blob {
                self.blobs.push(blob.to_string());
            }
            Ok(())
        }

        fn on_checkpoint(&mut self, state_blob: &str) -> CollectResult<()> {
            self.blobs.push(state_blob.to_string());
            Ok(())
        }
    }

    fn valid_config() -> CollectionConfig {
        CollectionConfig {
            table: "aws_cloudtrail_log".into(),
            connection_name: None,
            default_index: None,
            connection: Default::default(),
            source: SourceConfig::S3(S3SourceConfig {
                bucket: "trail-bucket".into(),
                ..Default::default()
            }),
            api_rate_per_sec: None,
            api_burst: None,
        }
    }

    #[test]
    fn test_init_rejects_unknown_table() {
        let mut plugin = CollectorPlugin::new();
        let mut config = valid_config();
        config.table = "aws_mystery_log".into();
        assert!(matches!(
            plugin.init(config, None).unwrap_err(),
            CollectError::Config(_)
        ));
    }

    #[test]
    fn test_init_accepts_valid_config() {
        let mut plugin = CollectorPlugin::new();
        assert!(plugin.init(valid_config(), None).is_ok());
    }

    #[tokio::test]
    async fn test_collect_before_init_is_config_error() {
        let mut plugin = CollectorPlugin::new();
        let mut sink = MemorySink::default();
        let result = plugin.collect(&RunContext::new(), &mut sink).await;
        assert!(matches!(result.unwrap_err(), CollectError::Config(_)));
    }

    #[test]
    fn test_recording_sink_keeps_newest_blob() {
        let mut inner = MemorySink::default();
        let mut recorder = StateRecordingSink {
            inner: &mut inner,
            last_blob: None,
        };
        recorder.on_row(b"{}", None).unwrap();
        recorder.on_row(b"{}", Some("{\"a\":1}")).unwrap();
        recorder.on_checkpoint("{\"a\":2}").unwrap();
        let last = recorder.last_blob.clone();
        drop(recorder);
        assert_eq!(last.as_deref(), Some("{\"a\":2}"));
        assert_eq!(inner.rows.len(), 2);
        assert_eq!(inner.blobs, vec!["{\"a\":1}", "{\"a\":2}"]);
    }
}
