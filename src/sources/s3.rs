//! Object-store artifact source.
//!
//! Discovery pages through `ListObjectsV2` under `bucket/prefix`, filters
//! keys by extension and collection state, and emits artifact infos in
//! listing order. Download streams the object body into scratch and records
//! the artifact in state once the last byte is on disk.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use rusoto_core::RusotoError;
use rusoto_s3::{
    GetObjectError, GetObjectRequest, ListObjectsV2Error, ListObjectsV2Request, S3Client, S3,
};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::collector::RunContext;
use crate::config::{ConnectionConfig, S3SourceConfig};
use crate::constants::{DOWNLOAD_BUFFER_SIZE, S3_LIST_PAGE_SIZE};
use crate::errors::{CollectError, CollectResult};
use crate::models::{ArtifactInfo, SourceEnrichment};
use crate::sources::client::{resolve_region, retry_call, s3_client};
use crate::sources::{ArtifactSource, RateLimiter, ScratchDir};
use crate::state::{FilenameLayout, ObjectStoreState, ParsedFilename, StateHandle};

pub struct S3Source {
    config: S3SourceConfig,
    connection: ConnectionConfig,
    client: S3Client,
    state: StateHandle<ObjectStoreState>,
    layout: Option<FilenameLayout>,
    limiter: Arc<RateLimiter>,
    scratch: ScratchDir,
}

impl std::fmt::Debug for S3Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Source").finish_non_exhaustive()
    }
}

impl S3Source {
    pub fn new(
        config: S3SourceConfig,
        connection: ConnectionConfig,
        state: StateHandle<ObjectStoreState>,
        limiter: Arc<RateLimiter>,
    ) -> CollectResult<Self> {
        let region = resolve_region(&connection, config.region.as_deref())?;
        let client = s3_client(&connection, region)?;
        Self::with_client(config, connection, state, limiter, client)
    }

    /// Construction with an already-built client, used with injected
    /// dispatchers.
    pub(crate) fn with_client(
        config: S3SourceConfig,
        connection: ConnectionConfig,
        state: StateHandle<ObjectStoreState>,
        limiter: Arc<RateLimiter>,
        client: S3Client,
    ) -> CollectResult<Self> {
        config.validate()?;
        connection.validate()?;

        let layout = match &config.file_layout {
            Some(pattern) => Some(FilenameLayout::new(pattern)?),
            None => None,
        };
        state.with(|s| {
            s.configure(
                config.lexicographical_order,
                layout.as_ref().map(|l| l.granularity()),
            )
        })?;
        let scratch = ScratchDir::create()?;

        Ok(S3Source {
            config,
            connection,
            client,
            state,
            layout,
            limiter,
            scratch,
        })
    }

    /// Listing cursor: persisted state wins in lexicographic mode, else the
    /// configured starting key.
    fn start_after(&self) -> CollectResult<Option<String>> {
        if self.config.lexicographical_order {
            if let Some(key) = self.state.with(|s| s.start_after_key().map(str::to_string))? {
                return Ok(Some(key));
            }
        }
        Ok(self.config.start_after_key.clone())
    }

    fn wants_extension(&self, key: &str) -> bool {
        self.config.extensions.is_empty()
            || self
                .config
                .extensions
                .iter()
                .any(|ext| key.ends_with(ext.as_str()))
    }

    fn enrichment(&self, key: &str) -> SourceEnrichment {
        SourceEnrichment {
            source_type: Some("aws_s3_bucket".to_string()),
            source_name: Some(self.config.bucket.clone()),
            source_location: Some(key.to_string()),
        }
    }

    /// Parsed form used for state updates; empty when no layout is set.
    fn parsed_for(&self, key: &str) -> ParsedFilename {
        if let Some(layout) = &self.layout {
            if let Ok(parsed) = layout.parse_filename(key) {
                return parsed;
            }
        }
        ParsedFilename {
            time_millis: None,
            bucket: String::new(),
            properties: HashMap::new(),
        }
    }
}

#[async_trait]
impl ArtifactSource for S3Source {
    fn identifier(&self) -> &'static str {
        "aws_s3_bucket"
    }

    async fn discover(
        &self,
        ctx: &RunContext,
        discovered: &mpsc::Sender<ArtifactInfo>,
    ) -> CollectResult<()> {
        let start_after = self.start_after()?;
        let mut continuation: Option<String> = None;
        let mut pages = 0u64;
        let mut emitted = 0u64;

        loop {
            if ctx.is_cancelled() {
                return Err(CollectError::Cancelled);
            }
            self.limiter.acquire().await;

            let request = ListObjectsV2Request {
                bucket: self.config.bucket.clone(),
                prefix: self.config.prefix.clone(),
                max_keys: Some(S3_LIST_PAGE_SIZE),
                continuation_token: continuation.clone(),
                start_after: if continuation.is_none() {
                    start_after.clone()
                } else {
                    None
                },
                ..Default::default()
            };

            let bucket = self.config.bucket.clone();
            let output = retry_call(
                ctx,
                &self.connection,
                "ListObjectsV2",
                || self.client.list_objects_v2(request.clone()),
                |err| match err {
                    RusotoError::Service(ListObjectsV2Error::NoSuchBucket(msg)) => Some(
                        CollectError::NotFound(format!("bucket '{}': {}", bucket, msg)),
                    ),
                    _ => None,
                },
            )
            .await?;
            pages += 1;

            for object in output.contents.unwrap_or_default() {
                let key = match object.key {
                    Some(key) => key,
                    None => continue,
                };
                if !self.wants_extension(&key) {
                    continue;
                }

                let parsed = match &self.layout {
                    Some(layout) => match layout.parse_filename(&key) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            debug!("Skipping {}: {}", key, e);
                            continue;
                        }
                    },
                    None => self.parsed_for(&key),
                };

                if !self.state.with(|s| s.should_collect(&key, &parsed))? {
                    debug!("Already collected, skipping {}", key);
                    continue;
                }

                let info = ArtifactInfo::new(key.as_str(), self.enrichment(&key))
                    .with_path_properties(parsed.properties.clone());
                if discovered.send(info).await.is_err() {
                    return Err(CollectError::Cancelled);
                }
                emitted += 1;
            }

            match output.next_continuation_token {
                Some(token) if output.is_truncated == Some(true) => continuation = Some(token),
                _ => break,
            }
        }

        info!(
            "Discovery listed {} page(s) of s3://{}/{}, {} artifact(s) to collect",
            pages,
            self.config.bucket,
            self.config.prefix.as_deref().unwrap_or(""),
            emitted
        );
        Ok(())
    }

    async fn download(
        &self,
        ctx: &RunContext,
        info: &ArtifactInfo,
    ) -> CollectResult<ArtifactInfo> {
        let key = info.original_name.clone();
        let request = GetObjectRequest {
            bucket: self.config.bucket.clone(),
            key: key.clone(),
            ..Default::default()
        };

        self.limiter.acquire().await;
        let location = format!("s3://{}/{}", self.config.bucket, key);
        let output = retry_call(
            ctx,
            &self.connection,
            "GetObject",
            || self.client.get_object(request.clone()),
            |err| match err {
                RusotoError::Service(GetObjectError::NoSuchKey(_)) => {
                    Some(CollectError::NotFound(location.clone()))
                }
                RusotoError::Service(service) => self
                    .connection
                    .ignored_code_in(&format!("{:?}", service))
                    .map(|code| {
                        CollectError::NotFound(format!(
                            "{}: ignored error code {}",
                            location, code
                        ))
                    }),
                _ => None,
            },
        )
        .await?;

        let body = output.body.ok_or_else(|| {
            CollectError::TransientBackend(format!("GetObject returned no body for {}", location))
        })?;

        let local_path = self.scratch.path_for(&key)?;
        let file = tokio::fs::File::create(&local_path).await.map_err(|e| {
            CollectError::Fatal(format!("cannot create {}: {}", local_path.display(), e))
        })?;
        let mut writer = tokio::io::BufWriter::with_capacity(DOWNLOAD_BUFFER_SIZE, file);
        let mut reader = Box::pin(body.into_async_read());

        tokio::select! {
            _ = ctx.cancelled() => return Err(CollectError::Cancelled),
            copied = tokio::io::copy(&mut reader, &mut writer) => {
                copied.map_err(|e| {
                    CollectError::TransientBackend(format!("download of {} failed: {}", location, e))
                })?;
            }
        }
        writer.flush().await.map_err(|e| {
            CollectError::Fatal(format!("cannot flush {}: {}", local_path.display(), e))
        })?;

        let parsed = self.parsed_for(&key);
        self.state.with(|s| s.upsert(&key, &parsed))?;

        info!("Downloaded {} to {}", location, local_path.display());
        Ok(info.with_local_path(local_path.to_string_lossy()))
    }

    fn close(&self) -> CollectResult<()> {
        self.scratch.remove()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusoto_core::Region;
    use rusoto_mock::{
        MockCredentialsProvider, MockRequestDispatcher, MultipleMockRequestDispatcher,
    };

    fn source(config: S3SourceConfig) -> S3Source {
        S3Source::new(
            config,
            ConnectionConfig::default(),
            StateHandle::new(ObjectStoreState::default()),
            Arc::new(RateLimiter::default()),
        )
        .unwrap()
    }

    fn base_config() -> S3SourceConfig {
        S3SourceConfig {
            bucket: "trail-bucket".into(),
            prefix: Some("AWSLogs/".into()),
            extensions: vec![".json.gz".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_extension_filter() {
        let filtering = source(base_config());
        assert!(filtering.wants_extension("AWSLogs/x.json.gz"));
        assert!(!filtering.wants_extension("AWSLogs/x.parquet"));

        let mut config = base_config();
        config.extensions.clear();
        assert!(source(config).wants_extension("anything"));
    }

    #[test]
    fn test_enrichment_names_bucket_and_key() {
        let source = source(base_config());
        let enrichment = source.enrichment("AWSLogs/a.json.gz");
        assert_eq!(enrichment.source_type.as_deref(), Some("aws_s3_bucket"));
        assert_eq!(enrichment.source_name.as_deref(), Some("trail-bucket"));
        assert_eq!(enrichment.source_location.as_deref(), Some("AWSLogs/a.json.gz"));
    }

    #[test]
    fn test_start_after_prefers_state_in_lexicographic_mode() {
        let mut config = base_config();
        config.lexicographical_order = true;
        config.start_after_key = Some("from-config".into());
        let source = source(config);

        // no cursor persisted yet, config value applies
        assert_eq!(source.start_after().unwrap().as_deref(), Some("from-config"));

        source
            .state
            .with(|s| s.upsert("from-state", &source.parsed_for("from-state")))
            .unwrap();
        assert_eq!(source.start_after().unwrap().as_deref(), Some("from-state"));
    }

    #[test]
    fn test_start_after_ignores_state_without_lexicographic_mode() {
        let source = source(base_config());
        assert_eq!(source.start_after().unwrap(), None);
    }

    #[test]
    fn test_parsed_for_without_layout_is_empty() {
        let source = source(base_config());
        let parsed = source.parsed_for("AWSLogs/a.json.gz");
        assert_eq!(parsed.time_millis, None);
        assert_eq!(parsed.bucket, "");
    }

    #[test]
    fn test_layout_granularity_recorded_in_state() {
        let mut config = base_config();
        config.file_layout =
            Some(r"(?P<region>[a-z0-9-]+)/(?P<year>\d{4})/(?P<month>\d{2})/(?P<day>\d{2})/".into());
        let source = source(config);
        let parsed = source.parsed_for("us-east-1/2023/11/14/x.json.gz");
        assert_eq!(parsed.bucket, "us-east-1");
        assert!(parsed.time_millis.is_some());
    }

    #[test]
    fn test_invalid_layout_rejected_at_construction() {
        let mut config = base_config();
        config.file_layout = Some(r"(?P<region>[a-z-]+)/".into());
        let result = S3Source::new(
            config,
            ConnectionConfig::default(),
            StateHandle::new(ObjectStoreState::default()),
            Arc::new(RateLimiter::default()),
        );
        assert!(matches!(result.unwrap_err(), CollectError::Config(_)));
    }

    fn mock_source(
        config: S3SourceConfig,
        connection: ConnectionConfig,
        dispatcher: MultipleMockRequestDispatcher<std::vec::IntoIter<MockRequestDispatcher>>,
    ) -> S3Source {
        let client = S3Client::new_with(dispatcher, MockCredentialsProvider, Region::UsEast1);
        S3Source::with_client(
            config,
            connection,
            StateHandle::new(ObjectStoreState::default()),
            Arc::new(RateLimiter::default()),
            client,
        )
        .unwrap()
    }

    fn single_response(
        dispatcher: MockRequestDispatcher,
    ) -> MultipleMockRequestDispatcher<std::vec::IntoIter<MockRequestDispatcher>> {
        MultipleMockRequestDispatcher::new(vec![dispatcher])
    }

    async fn run_discover(source: &S3Source) -> Vec<ArtifactInfo> {
        let ctx = RunContext::new();
        let (tx, mut rx) = mpsc::channel(16);
        source.discover(&ctx, &tx).await.unwrap();
        drop(tx);
        let mut infos = Vec::new();
        while let Some(info) = rx.recv().await {
            infos.push(info);
        }
        infos
    }

    #[tokio::test]
    async fn test_discover_pages_until_listing_done() {
        let page_one = MockRequestDispatcher::default().with_body(
            "<ListBucketResult>\
               <IsTruncated>true</IsTruncated>\
               <NextContinuationToken>page-2</NextContinuationToken>\
               <Contents><Key>AWSLogs/a.json.gz</Key></Contents>\
             </ListBucketResult>",
        );
        let page_two = MockRequestDispatcher::default().with_body(
            "<ListBucketResult>\
               <IsTruncated>false</IsTruncated>\
               <Contents><Key>AWSLogs/c.json.gz</Key></Contents>\
             </ListBucketResult>",
        );
        let source = mock_source(
            base_config(),
            ConnectionConfig::default(),
            MultipleMockRequestDispatcher::new(vec![page_one, page_two]),
        );

        let infos = run_discover(&source).await;
        let keys: Vec<&str> = infos.iter().map(|i| i.original_name.as_str()).collect();
        assert_eq!(keys, vec!["AWSLogs/a.json.gz", "AWSLogs/c.json.gz"]);
    }

    #[tokio::test]
    async fn test_discover_emits_only_keys_past_cursor() {
        // Listing straddles the persisted cursor; only strictly greater keys
        // may surface.
        let listing = MockRequestDispatcher::default().with_body(
            "<ListBucketResult>\
               <IsTruncated>false</IsTruncated>\
               <Contents><Key>AWSLogs/a.json.gz</Key></Contents>\
               <Contents><Key>AWSLogs/b.json.gz</Key></Contents>\
               <Contents><Key>AWSLogs/c.json.gz</Key></Contents>\
             </ListBucketResult>",
        );
        let mut config = base_config();
        config.lexicographical_order = true;
        let source = mock_source(
            config,
            ConnectionConfig::default(),
            single_response(listing),
        );
        let cursor = "AWSLogs/b.json.gz";
        source
            .state
            .with(|s| s.upsert(cursor, &source.parsed_for(cursor)))
            .unwrap();

        let infos = run_discover(&source).await;
        assert!(!infos.is_empty());
        for info in &infos {
            assert!(info.original_name.as_str() > cursor, "{}", info.original_name);
        }
        assert_eq!(infos[0].original_name, "AWSLogs/c.json.gz");
    }

    #[tokio::test]
    async fn test_download_writes_scratch_and_advances_cursor() {
        let body = "2 123456789012 eni-1 - - - - - - - 1700000000 1700000060 - NODATA";
        let mut config = base_config();
        config.lexicographical_order = true;
        config.extensions.clear();
        let source = mock_source(
            config,
            ConnectionConfig::default(),
            single_response(MockRequestDispatcher::default().with_body(body)),
        );

        let ctx = RunContext::new();
        let info = ArtifactInfo::new("AWSLogs/new.log", source.enrichment("AWSLogs/new.log"));
        let downloaded = source.download(&ctx, &info).await.unwrap();

        assert_eq!(downloaded.original_name, "AWSLogs/new.log");
        assert_ne!(downloaded.local_name, downloaded.original_name);
        let written = std::fs::read_to_string(&downloaded.local_name).unwrap();
        assert_eq!(written, body);
        let cursor = source
            .state
            .with(|s| s.start_after_key().map(str::to_string))
            .unwrap();
        assert_eq!(cursor.as_deref(), Some("AWSLogs/new.log"));
        source.close().unwrap();
    }

    #[tokio::test]
    async fn test_download_ignored_service_code_is_not_found() {
        let denied = MockRequestDispatcher::with_status(403).with_body(
            "<Error><Code>InvalidObjectState</Code><Message>archived</Message></Error>",
        );
        let connection = ConnectionConfig {
            ignore_error_codes: vec!["InvalidObjectState".into()],
            ..Default::default()
        };
        let source = mock_source(base_config(), connection, single_response(denied));

        let ctx = RunContext::new();
        let info = ArtifactInfo::new("AWSLogs/cold.json.gz", SourceEnrichment::default());
        let err = source.download(&ctx, &info).await.unwrap_err();
        assert!(matches!(err, CollectError::NotFound(_)), "{:?}", err);
    }
}
