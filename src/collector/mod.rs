//! Collection coordinator: drives one run end-to-end.
//!
//! Discovery and consumption share a bounded channel so the source can
//! prefetch a few artifacts while the pipeline works on the current one.
//! Artifact failures are logged and skipped; run-fatal errors stop
//! discovery, trigger a final checkpoint, and surface the first cause.

pub mod context;

pub use context::RunContext;

use std::fmt;
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::mpsc;

use crate::config::{CollectionConfig, SourceConfig};
use crate::constants::{
    CHECKPOINT_EVERY_ROWS, DISCOVERY_PREFETCH, LOG_EVENTS_PAGE_SIZE, RATE_LIMIT_BURST,
    RATE_LIMIT_FILL_PER_SEC,
};
use crate::enrich::RowEnricher;
use crate::errors::{CollectError, CollectResult};
use crate::mappers::{init_catalog, RecordInput, TableMapper};
use crate::models::ArtifactInfo;
use crate::pipeline::process_artifact;
use crate::plugin::RowSink;
use crate::sources::{ArtifactSource, CloudWatchSource, LogEvent, RateLimiter, S3Source};
use crate::state::{LogStreamState, ObjectStoreState, StateHandle};

/// End-of-run counters, logged and returned to the host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub table: String,
    pub artifacts_discovered: u64,
    pub artifacts_collected: u64,
    pub artifacts_skipped: u64,
    pub artifacts_failed: u64,
    pub rows_emitted: u64,
    pub row_errors: u64,
    pub checkpoints: u64,
}

impl RunSummary {
    fn new(table: &str) -> Self {
        RunSummary {
            table: table.to_string(),
            ..Default::default()
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "table {}: {} artifact(s) discovered, {} collected, {} skipped, {} failed; \
             {} row(s) emitted, {} row error(s), {} checkpoint(s)",
            self.table,
            self.artifacts_discovered,
            self.artifacts_collected,
            self.artifacts_skipped,
            self.artifacts_failed,
            self.rows_emitted,
            self.row_errors,
            self.checkpoints
        )
    }
}

/// Run one collection to completion, cancellation, or first run-fatal error.
pub async fn run_collection(
    ctx: &RunContext,
    config: &CollectionConfig,
    state_blob: Option<&str>,
    sink: &mut dyn RowSink,
) -> CollectResult<RunSummary> {
    config.validate()?;

    let catalog = init_catalog();
    let mapper = catalog.mapper_for(&config.table)?;
    let enricher = RowEnricher::new(
        &config.table,
        config.connection_name.clone(),
        config.default_index.clone(),
    );
    let limiter = Arc::new(RateLimiter::new(
        config.api_rate_per_sec.unwrap_or(RATE_LIMIT_FILL_PER_SEC),
        config.api_burst.unwrap_or(RATE_LIMIT_BURST),
    ));

    let summary = match &config.source {
        SourceConfig::S3(s3) => {
            let state = StateHandle::<ObjectStoreState>::restore(state_blob)?;
            let source = S3Source::new(s3.clone(), config.connection.clone(), state.clone(), limiter)?;
            collect_artifacts(ctx, config, &source, state, mapper, &enricher, sink).await
        }
        SourceConfig::CloudWatch(cw) => {
            let state = StateHandle::<LogStreamState>::restore(state_blob)?;
            let source =
                CloudWatchSource::new(cw.clone(), config.connection.clone(), state.clone(), limiter)?;
            collect_log_events(ctx, config, &source, state, mapper, &enricher, sink).await
        }
    }?;

    info!("Collection finished: {}", summary);
    Ok(summary)
}

/// Artifact flow: discover into a bounded channel, download, pipeline, emit.
async fn collect_artifacts(
    ctx: &RunContext,
    config: &CollectionConfig,
    source: &S3Source,
    state: StateHandle<ObjectStoreState>,
    mut mapper: TableMapper,
    enricher: &RowEnricher,
    sink: &mut dyn RowSink,
) -> CollectResult<RunSummary> {
    let (tx, mut rx) = mpsc::channel::<ArtifactInfo>(DISCOVERY_PREFETCH);

    let discovery = async {
        let result = source.discover(ctx, &tx).await;
        drop(tx);
        result
    };

    let consume = async {
        let mut summary = RunSummary::new(&config.table);
        let mut rows_since_checkpoint = 0u64;

        while let Some(info) = rx.recv().await {
            summary.artifacts_discovered += 1;

            let local = match source.download(ctx, &info).await {
                Ok(local) => local,
                Err(CollectError::NotFound(what)) => {
                    warn!("Artifact vanished before download, skipping: {}", what);
                    summary.artifacts_skipped += 1;
                    continue;
                }
                Err(e) if e.is_run_fatal() => return Err(e),
                Err(e) => {
                    warn!("Download of {} failed: {}", info.original_name, e);
                    summary.artifacts_failed += 1;
                    continue;
                }
            };

            let processed = process_artifact(ctx, &local, &mut mapper, |mut row| {
                enricher.enrich(&mut row, &local.source_enrichment)?;
                let bytes = row.to_bytes()?;
                rows_since_checkpoint += 1;
                let blob = if rows_since_checkpoint >= CHECKPOINT_EVERY_ROWS {
                    rows_since_checkpoint = 0;
                    summary.checkpoints += 1;
                    Some(state.snapshot()?)
                } else {
                    None
                };
                sink.on_row(&bytes, blob.as_deref())
            })
            .await;

            match processed {
                Ok(report) => {
                    summary.artifacts_collected += 1;
                    summary.rows_emitted += report.rows_emitted;
                    summary.row_errors += report.row_errors();
                }
                Err(e) if e.is_run_fatal() => return Err(e),
                Err(e) => {
                    warn!("Artifact {} failed: {}", info.original_name, e);
                    summary.artifacts_failed += 1;
                }
            }
        }
        Ok(summary)
    };

    let (discovery_result, consume_result) = tokio::join!(discovery, consume);
    let outcome = match (consume_result, discovery_result) {
        (Err(e), _) => Err(e),
        (Ok(_), Err(e)) => Err(e),
        (Ok(mut summary), Ok(())) => {
            summary.checkpoints += 1;
            Ok(summary)
        }
    };

    finish(&state, source, sink, outcome)
}

/// Event flow: the log-stream source emits events directly; every emitted
/// row advances the stream watermark and carries a fresh state blob.
async fn collect_log_events(
    ctx: &RunContext,
    config: &CollectionConfig,
    source: &CloudWatchSource,
    state: StateHandle<LogStreamState>,
    mapper: TableMapper,
    enricher: &RowEnricher,
    sink: &mut dyn RowSink,
) -> CollectResult<RunSummary> {
    let (tx, mut rx) = mpsc::channel::<LogEvent>(LOG_EVENTS_PAGE_SIZE as usize);

    let production = async {
        let result = source.run(ctx, &tx).await;
        drop(tx);
        result
    };

    let consume = async {
        let mut summary = RunSummary::new(&config.table);
        let mut current_stream: Option<String> = None;

        while let Some(event) = rx.recv().await {
            if current_stream.as_deref() != Some(event.stream.as_str()) {
                current_stream = Some(event.stream.clone());
                summary.artifacts_discovered += 1;
                summary.artifacts_collected += 1;
            }

            let rows = match mapper.map(&RecordInput::Line(event.message.clone())) {
                Ok(rows) => rows,
                Err(e) if e.is_row_level() => {
                    warn!("Row error in stream '{}': {}", event.stream, e);
                    summary.row_errors += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let provenance = source.enrichment(&event.stream);
            for mut row in rows {
                enricher.enrich(&mut row, &provenance)?;
                let bytes = row.to_bytes()?;
                state.with(|s| s.upsert(&event.stream, event.timestamp))?;
                let blob = state.snapshot()?;
                sink.on_row(&bytes, Some(&blob))?;
                summary.rows_emitted += 1;
                summary.checkpoints += 1;
            }
        }
        Ok(summary)
    };

    let (production_result, consume_result) = tokio::join!(production, consume);
    let outcome = match (consume_result, production_result) {
        (Err(e), _) => Err(e),
        (Ok(_), Err(e)) => Err(e),
        (Ok(mut summary), Ok(())) => {
            summary.checkpoints += 1;
            Ok(summary)
        }
    };

    finish_streams(&state, sink, outcome)
}

/// Final checkpoint and scratch cleanup, regardless of the run's outcome.
fn finish(
    state: &StateHandle<ObjectStoreState>,
    source: &S3Source,
    sink: &mut dyn RowSink,
    outcome: CollectResult<RunSummary>,
) -> CollectResult<RunSummary> {
    final_checkpoint(state.snapshot(), sink);
    if let Err(e) = source.close() {
        warn!("Failed to release source resources: {}", e);
    }
    outcome
}

fn finish_streams(
    state: &StateHandle<LogStreamState>,
    sink: &mut dyn RowSink,
    outcome: CollectResult<RunSummary>,
) -> CollectResult<RunSummary> {
    final_checkpoint(state.snapshot(), sink);
    outcome
}

fn final_checkpoint(blob: CollectResult<String>, sink: &mut dyn RowSink) {
    match blob {
        Ok(blob) => {
            if let Err(e) = sink.on_checkpoint(&blob) {
                warn!("Final checkpoint failed: {}", e);
            }
        }
        Err(e) => warn!("Final state snapshot failed: {}", e),
    }
}
