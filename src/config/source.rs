//! Per-source configuration: object-store and log-stream definitions.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ConnectionConfig;
use crate::errors::{CollectError, CollectResult};

lazy_static! {
    // Loose shape check only; new regions appear faster than any strict list.
    static ref AWS_REGION_RE: Regex = Regex::new(r"^[a-z]{2}(-[a-z]+)+-\d$").unwrap();
}

/// Object-store source: a bucket listed under a prefix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct S3SourceConfig {
    pub bucket: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Allowed file extensions, each starting with `.`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<String>,
    /// Lexicographic cursor to start listing after
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_after_key: Option<String>,
    /// Track the listing cursor in state; requires lexicographic key order
    #[serde(default)]
    pub lexicographical_order: bool,
    /// Filename layout regex with named groups (time units + classifiers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_layout: Option<String>,
}

impl S3SourceConfig {
    pub fn validate(&self) -> CollectResult<()> {
        if self.bucket.is_empty() {
            return Err(CollectError::Config("bucket must not be empty".to_string()));
        }
        if let Some(region) = &self.region {
            if !AWS_REGION_RE.is_match(region) {
                return Err(CollectError::Config(format!(
                    "'{}' does not look like an AWS region",
                    region
                )));
            }
        }
        for ext in &self.extensions {
            if !ext.starts_with('.') {
                return Err(CollectError::Config(format!(
                    "extension '{}' must start with '.'",
                    ext
                )));
            }
        }
        if let Some(layout) = &self.file_layout {
            Regex::new(layout)
                .map_err(|e| CollectError::Config(format!("invalid file_layout: {}", e)))?;
        }
        Ok(())
    }
}

/// Log-stream source: a CloudWatch Logs group, optionally filtered by a
/// stream-name prefix, collected over a time window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudWatchSourceConfig {
    pub log_group_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_stream_prefix: Option<String>,
    /// ISO-8601; required
    pub start_time: String,
    /// ISO-8601; defaults to now when missing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl CloudWatchSourceConfig {
    pub fn validate(&self) -> CollectResult<()> {
        if self.log_group_name.is_empty() {
            return Err(CollectError::Config(
                "log_group_name must not be empty".to_string(),
            ));
        }
        self.start_millis()?;
        self.end_millis()?;
        if let Some(region) = &self.region {
            if !AWS_REGION_RE.is_match(region) {
                return Err(CollectError::Config(format!(
                    "'{}' does not look like an AWS region",
                    region
                )));
            }
        }
        Ok(())
    }

    /// Window start in epoch millis.
    pub fn start_millis(&self) -> CollectResult<i64> {
        parse_iso_millis(&self.start_time)
            .ok_or_else(|| CollectError::Config(format!("invalid start_time '{}'", self.start_time)))
    }

    /// Window end in epoch millis; now when unset.
    pub fn end_millis(&self) -> CollectResult<i64> {
        match &self.end_time {
            Some(raw) => parse_iso_millis(raw)
                .ok_or_else(|| CollectError::Config(format!("invalid end_time '{}'", raw))),
            None => Ok(Utc::now().timestamp_millis()),
        }
    }
}

fn parse_iso_millis(raw: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
}

/// The backend a collection reads from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    S3(S3SourceConfig),
    CloudWatch(CloudWatchSourceConfig),
}

impl SourceConfig {
    pub fn validate(&self) -> CollectResult<()> {
        match self {
            SourceConfig::S3(c) => c.validate(),
            SourceConfig::CloudWatch(c) => c.validate(),
        }
    }
}

/// A full collection definition: connection, table, and source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Table identifier selecting the mapper and enrichment rules
    pub table: String,
    /// Connection label recorded on every row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_name: Option<String>,
    /// Partition index when a row carries no account id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_index: Option<String>,
    #[serde(default)]
    pub connection: ConnectionConfig,
    pub source: SourceConfig,
    /// API paging rate limit, tokens per second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_rate_per_sec: Option<f64>,
    /// API paging burst size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_burst: Option<f64>,
}

impl CollectionConfig {
    /// Load a collection definition from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        let config: CollectionConfig =
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?;

        debug!("Loaded collection config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> CollectResult<()> {
        if self.table.is_empty() {
            return Err(CollectError::Config("table must not be empty".to_string()));
        }
        self.connection.validate()?;
        self.source.validate()
    }
}
