//! Positional field-list mapper for network flow logs.
//!
//! Configured with an ordered list of field names (the log's custom format
//! string). Tokens are split on whitespace, `-` means null, and each token
//! is assigned to the typed field named at its position.

use chrono::DateTime;
use serde::Serialize;

use crate::errors::{CollectError, CollectResult};
use crate::mappers::{numeric_field, RecordInput, Row};
use crate::models::{CommonFields, EnrichmentHints};

/// The default version-2 format: 14 fields in publication order.
pub const DEFAULT_FLOW_LOG_FIELDS: &[&str] = &[
    "version",
    "account-id",
    "interface-id",
    "srcaddr",
    "dstaddr",
    "srcport",
    "dstport",
    "protocol",
    "packets",
    "bytes",
    "start",
    "end",
    "action",
    "log-status",
];

/// One flow-log record. Fields absent from the configured format stay null.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlowLogRow {
    #[serde(flatten)]
    pub common: CommonFields,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_port: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_port: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packets: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<i64>,
    /// Window start, epoch seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    /// Window end, epoch seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_flags: Option<i32>,
    #[serde(rename = "flow_type", skip_serializing_if = "Option::is_none")]
    pub flow_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pkt_src_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pkt_dst_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub az_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_direction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traffic_path: Option<i32>,
    /// ISO-8601 event time, present in some export formats
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl FlowLogRow {
    /// Event-time fallback rule: an ISO `timestamp` field wins; otherwise
    /// the numeric `start` (seconds) converts to millis.
    pub fn event_time_millis(&self) -> Option<i64> {
        if let Some(raw) = &self.timestamp {
            if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
                return Some(dt.timestamp_millis());
            }
        }
        self.start.map(|s| s * 1000)
    }

    pub fn hints(&self) -> EnrichmentHints {
        EnrichmentHints {
            event_time_millis: self.event_time_millis(),
            source_ip: self.src_addr.clone(),
            destination_ip: self.dst_addr.clone(),
            account_id: self.account_id.clone(),
            ..Default::default()
        }
    }
}

/// Positional mapper configured with an ordered field list.
#[derive(Debug, Clone)]
pub struct FlowLogMapper {
    fields: Vec<String>,
}

impl FlowLogMapper {
    /// Mapper over the default 14-field version-2 format.
    pub fn default_schema() -> Self {
        Self::with_fields(DEFAULT_FLOW_LOG_FIELDS.iter().map(|f| f.to_string()))
    }

    pub fn with_fields(fields: impl IntoIterator<Item = String>) -> Self {
        FlowLogMapper {
            fields: fields.into_iter().collect(),
        }
    }

    pub fn identifier(&self) -> &'static str {
        "flow_log"
    }

    pub fn map(&self, input: &RecordInput) -> CollectResult<Row> {
        let line = input.as_str()?;
        let tokens: Vec<&str> = line.split_whitespace().collect();

        if tokens.len() > self.fields.len() {
            return Err(CollectError::Schema(format!(
                "{} tokens for a {}-field schema",
                tokens.len(),
                self.fields.len()
            )));
        }

        let mut row = FlowLogRow::default();
        for (token, field) in tokens.iter().zip(self.fields.iter()) {
            if *token == "-" {
                continue;
            }
            assign_field(&mut row, field, token)?;
        }
        Ok(Row::Flow(row))
    }
}

fn assign_field(row: &mut FlowLogRow, field: &str, token: &str) -> CollectResult<()> {
    match field {
        "version" => row.version = numeric_field(token, field)?,
        "account-id" => row.account_id = Some(token.to_string()),
        "interface-id" => row.interface_id = Some(token.to_string()),
        "srcaddr" => row.src_addr = Some(token.to_string()),
        "dstaddr" => row.dst_addr = Some(token.to_string()),
        "srcport" => row.src_port = numeric_field(token, field)?,
        "dstport" => row.dst_port = numeric_field(token, field)?,
        "protocol" => row.protocol = numeric_field(token, field)?,
        "packets" => row.packets = numeric_field(token, field)?,
        "bytes" => row.bytes = numeric_field(token, field)?,
        "start" => row.start = numeric_field(token, field)?,
        "end" => row.end = numeric_field(token, field)?,
        "action" => row.action = Some(token.to_string()),
        "log-status" => row.log_status = Some(token.to_string()),
        "vpc-id" => row.vpc_id = Some(token.to_string()),
        "subnet-id" => row.subnet_id = Some(token.to_string()),
        "instance-id" => row.instance_id = Some(token.to_string()),
        "tcp-flags" => row.tcp_flags = numeric_field(token, field)?,
        "type" => row.flow_type = Some(token.to_string()),
        "pkt-srcaddr" => row.pkt_src_addr = Some(token.to_string()),
        "pkt-dstaddr" => row.pkt_dst_addr = Some(token.to_string()),
        "region" => row.region = Some(token.to_string()),
        "az-id" => row.az_id = Some(token.to_string()),
        "flow-direction" => row.flow_direction = Some(token.to_string()),
        "traffic-path" => row.traffic_path = numeric_field(token, field)?,
        "timestamp" => row.timestamp = Some(token.to_string()),
        other => {
            return Err(CollectError::Parse(format!(
                "unknown flow-log field '{}'",
                other
            )))
        }
    }
    Ok(())
}
