//! Core data models shared across discovery, mapping, and enrichment.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provenance fields attached verbatim to every row produced from a source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceEnrichment {
    /// Source-kind tag, e.g. `aws_s3_bucket` or `aws_cloudwatch_log_group`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    /// Bucket or log-group name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    /// Full key, path, or stream name within the source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_location: Option<String>,
}

/// A unit of work between discovery and the processing pipeline.
///
/// Created by a source during discovery, updated with the local path after
/// download, and dropped once the final row of the artifact is emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    /// Path-like identifier, unique within a source. Never empty.
    pub local_name: String,
    /// Remote identifier; equals `local_name` once downloaded locally.
    pub original_name: String,
    /// Provenance merged into every row from this artifact.
    #[serde(default)]
    pub source_enrichment: SourceEnrichment,
    /// Values captured by non-time named groups of the filename layout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_properties: Option<HashMap<String, String>>,
}

impl ArtifactInfo {
    /// Create an artifact description. `name` must be non-empty; it seeds
    /// both the local and original identifiers until download rewrites the
    /// local one.
    pub fn new(name: impl Into<String>, enrichment: SourceEnrichment) -> Self {
        let name = name.into();
        debug_assert!(!name.is_empty(), "artifact name must be non-empty");
        ArtifactInfo {
            local_name: name.clone(),
            original_name: name,
            source_enrichment: enrichment,
            path_properties: None,
        }
    }

    /// Copy of this info pointing at a downloaded local path.
    pub fn with_local_path(&self, local: impl Into<String>) -> Self {
        let mut info = self.clone();
        info.local_name = local.into();
        info
    }

    pub fn with_path_properties(mut self, props: HashMap<String, String>) -> Self {
        if !props.is_empty() {
            self.path_properties = Some(props);
        }
        self
    }
}

/// Fields present on every emitted row, populated by the enricher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonFields {
    /// Unique, lexicographically sortable row id
    pub id: String,
    /// Wall-clock ingestion time, millis since epoch
    pub ingest_timestamp: i64,
    /// Semantic event time, millis since epoch
    pub timestamp: i64,
    /// `timestamp` truncated to its UTC day, `YYYY-MM-DD`
    pub date: String,
    /// Partition key: account id or table default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    /// Connection the collection ran under
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    /// Table identifier this row belongs to
    pub table: String,
    /// Source-kind tag copied from the enrichment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_location: Option<String>,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub ips: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub akas: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub usernames: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub domains: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub emails: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tags: Vec<String>,
}

/// Per-format inputs to enrichment, extracted from a typed row.
///
/// Everything here is optional; the enricher applies whatever is present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichmentHints {
    /// Semantic event time, millis since epoch
    pub event_time_millis: Option<i64>,
    pub source_ip: Option<String>,
    pub destination_ip: Option<String>,
    /// Resource ARNs to expand into akas
    pub arns: Vec<String>,
    /// Access-key ids and explicit user names
    pub usernames: Vec<String>,
    /// Host/domain names from HTTP-style logs
    pub domains: Vec<String>,
    /// Account id used as the partition index
    pub account_id: Option<String>,
}

static ROW_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generate a unique, sortable row id.
///
/// Layout: zero-padded millis, a process-wide sequence number, and a short
/// random suffix. Ids minted later in a run always sort after earlier ones,
/// and the suffix keeps ids unique across processes.
pub fn next_row_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0);
    let seq = ROW_SEQUENCE.fetch_add(1, Ordering::SeqCst);
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{:013}-{:010}-{}", millis, seq, &suffix[..8])
}
