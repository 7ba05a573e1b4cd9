//! Log-stream source over CloudWatch Logs.
//!
//! Unlike the object-store source there is nothing to download: eligible
//! streams are paged through `GetLogEvents` and every event becomes one
//! emitted record. Stream eligibility intersects the configured window with
//! the per-stream resume point from collection state.

use std::sync::Arc;

use log::{debug, info};
use rusoto_core::RusotoError;
use rusoto_logs::{
    CloudWatchLogs, CloudWatchLogsClient, DescribeLogStreamsError, DescribeLogStreamsRequest,
    GetLogEventsError, GetLogEventsRequest, LogStream,
};
use tokio::sync::mpsc;

use crate::collector::RunContext;
use crate::config::{CloudWatchSourceConfig, ConnectionConfig};
use crate::constants::LOG_EVENTS_PAGE_SIZE;
use crate::errors::{CollectError, CollectResult};
use crate::models::SourceEnrichment;
use crate::sources::client::{logs_client, resolve_region, retry_call};
use crate::sources::RateLimiter;
use crate::state::{LogStreamState, StateHandle};

/// One log event, tagged with the stream it came from so the coordinator
/// can advance the stream's watermark after the row is emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub stream: String,
    pub timestamp: i64,
    pub message: String,
}

pub struct CloudWatchSource {
    config: CloudWatchSourceConfig,
    connection: ConnectionConfig,
    client: CloudWatchLogsClient,
    state: StateHandle<LogStreamState>,
    limiter: Arc<RateLimiter>,
}

impl std::fmt::Debug for CloudWatchSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudWatchSource").finish_non_exhaustive()
    }
}

impl CloudWatchSource {
    pub fn new(
        config: CloudWatchSourceConfig,
        connection: ConnectionConfig,
        state: StateHandle<LogStreamState>,
        limiter: Arc<RateLimiter>,
    ) -> CollectResult<Self> {
        let region = resolve_region(&connection, config.region.as_deref())?;
        let client = logs_client(&connection, region)?;
        Self::with_client(config, connection, state, limiter, client)
    }

    /// Construction with an already-built client, used with injected
    /// dispatchers.
    pub(crate) fn with_client(
        config: CloudWatchSourceConfig,
        connection: ConnectionConfig,
        state: StateHandle<LogStreamState>,
        limiter: Arc<RateLimiter>,
        client: CloudWatchLogsClient,
    ) -> CollectResult<Self> {
        config.validate()?;
        connection.validate()?;
        Ok(CloudWatchSource {
            config,
            connection,
            client,
            state,
            limiter,
        })
    }

    pub fn identifier(&self) -> &'static str {
        "aws_cloudwatch_log_group"
    }

    /// Provenance attached to rows from one stream.
    pub fn enrichment(&self, stream: &str) -> SourceEnrichment {
        SourceEnrichment {
            source_type: Some("aws_cloudwatch_log_group".to_string()),
            source_name: Some(self.config.log_group_name.clone()),
            source_location: Some(stream.to_string()),
        }
    }

    async fn list_streams(&self, ctx: &RunContext) -> CollectResult<Vec<LogStream>> {
        let mut streams = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            if ctx.is_cancelled() {
                return Err(CollectError::Cancelled);
            }
            self.limiter.acquire().await;

            let request = DescribeLogStreamsRequest {
                log_group_name: self.config.log_group_name.clone(),
                log_stream_name_prefix: self.config.log_stream_prefix.clone(),
                next_token: next_token.clone(),
                ..Default::default()
            };
            let group = self.config.log_group_name.clone();
            let output = retry_call(
                ctx,
                &self.connection,
                "DescribeLogStreams",
                || self.client.describe_log_streams(request.clone()),
                |err| match err {
                    RusotoError::Service(DescribeLogStreamsError::ResourceNotFound(msg)) => Some(
                        CollectError::NotFound(format!("log group '{}': {}", group, msg)),
                    ),
                    _ => None,
                },
            )
            .await?;

            streams.extend(output.log_streams.unwrap_or_default());
            match output.next_token {
                Some(token) if Some(&token) != next_token.as_ref() => next_token = Some(token),
                _ => break,
            }
        }

        Ok(streams)
    }

    /// Collect every eligible stream in the group, sending events in stream
    /// order. A dropped receiver means the run is shutting down.
    pub async fn run(
        &self,
        ctx: &RunContext,
        events: &mpsc::Sender<LogEvent>,
    ) -> CollectResult<()> {
        let window_start = self.config.start_millis()?;
        let window_end = self.config.end_millis()?;

        let streams = self.list_streams(ctx).await?;
        info!(
            "Log group '{}' has {} stream(s) matching prefix {:?}",
            self.config.log_group_name,
            streams.len(),
            self.config.log_stream_prefix
        );

        for stream in streams {
            let name = match stream.log_stream_name {
                Some(name) => name,
                None => continue,
            };
            let (first, last) = match (stream.first_event_timestamp, stream.last_ingestion_time) {
                (Some(first), Some(last)) => (first, last),
                _ => {
                    debug!("Stream '{}' has no events, skipping", name);
                    continue;
                }
            };

            let (start, end) = self
                .state
                .with(|s| s.get_range(&name, window_start, window_end))?;
            if start > end || last < start || first > end {
                debug!(
                    "Stream '{}' [{}, {}] outside effective window [{}, {}], skipping",
                    name, first, last, start, end
                );
                continue;
            }

            self.collect_stream(ctx, &name, start, end, events).await?;
        }
        Ok(())
    }

    async fn collect_stream(
        &self,
        ctx: &RunContext,
        stream: &str,
        start: i64,
        end: i64,
        events: &mpsc::Sender<LogEvent>,
    ) -> CollectResult<()> {
        let mut token: Option<String> = None;
        let mut emitted = 0u64;

        loop {
            if ctx.is_cancelled() {
                return Err(CollectError::Cancelled);
            }
            self.limiter.acquire().await;

            let request = GetLogEventsRequest {
                log_group_name: self.config.log_group_name.clone(),
                log_stream_name: stream.to_string(),
                start_time: Some(start),
                end_time: Some(end),
                start_from_head: Some(true),
                limit: Some(LOG_EVENTS_PAGE_SIZE),
                next_token: token.clone(),
                ..Default::default()
            };
            let location = format!("{}/{}", self.config.log_group_name, stream);
            let output = retry_call(
                ctx,
                &self.connection,
                "GetLogEvents",
                || self.client.get_log_events(request.clone()),
                |err| match err {
                    RusotoError::Service(GetLogEventsError::ResourceNotFound(msg)) => {
                        Some(CollectError::NotFound(format!("{}: {}", location, msg)))
                    }
                    _ => None,
                },
            )
            .await?;

            for event in output.events.unwrap_or_default() {
                let (timestamp, message) = match (event.timestamp, event.message) {
                    (Some(ts), Some(message)) => (ts, message),
                    _ => continue,
                };
                let sent = events
                    .send(LogEvent {
                        stream: stream.to_string(),
                        timestamp,
                        message,
                    })
                    .await;
                if sent.is_err() {
                    return Err(CollectError::Cancelled);
                }
                emitted += 1;
            }

            // The forward token repeating (or missing) marks the end of the
            // stream within the window.
            match output.next_forward_token {
                Some(next) if Some(&next) != token.as_ref() => token = Some(next),
                _ => break,
            }
        }

        debug!("Stream '{}' produced {} event(s)", stream, emitted);
        Ok(())
    }
}
