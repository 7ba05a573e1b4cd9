//! Quote-aware space-delimited mapper for load-balancer access logs.
//!
//! Spaces separate tokens except inside `"`-quoted runs. Two format
//! variants exist: the full format carries a trailing connection-trace id,
//! the reduced format does not. The full format is tried first.

use chrono::DateTime;
use serde::Serialize;

use crate::errors::{CollectError, CollectResult};
use crate::mappers::{numeric_field, split_quoted, RecordInput, Row};
use crate::models::{CommonFields, EnrichmentHints};

/// Token count of the full format, including `conn_trace_id`.
const FULL_FIELD_COUNT: usize = 30;
/// Token count of the reduced format.
const REDUCED_FIELD_COUNT: usize = 29;

/// One load-balancer access-log record.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ElbAccessRow {
    #[serde(flatten)]
    pub common: CommonFields,
    #[serde(rename = "request_type", skip_serializing_if = "Option::is_none")]
    pub request_type: Option<String>,
    /// Request completion time, millis
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elb: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_port: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_port: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_processing_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_processing_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_processing_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elb_status_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_status_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_verb: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_proto: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_cipher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_group_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chosen_cert_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rule_priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_creation_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions_executed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_port_list: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_status_code_list: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification_reason: Option<String>,
    /// Only present in the full format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conn_trace_id: Option<String>,
}

impl ElbAccessRow {
    pub fn hints(&self) -> EnrichmentHints {
        let mut hints = EnrichmentHints {
            event_time_millis: self.event_time,
            source_ip: self.client_ip.clone(),
            destination_ip: self.target_ip.clone(),
            ..Default::default()
        };
        if let Some(domain) = &self.domain_name {
            hints.domains.push(domain.clone());
        }
        for arn in [&self.target_group_arn, &self.chosen_cert_arn]
            .into_iter()
            .flatten()
        {
            hints.arns.push(arn.clone());
        }
        hints
    }
}

/// Mapper for load-balancer access logs with full/reduced fallback.
#[derive(Debug, Default)]
pub struct ElbLogMapper;

impl ElbLogMapper {
    pub fn new() -> Self {
        ElbLogMapper
    }

    pub fn identifier(&self) -> &'static str {
        "elb_access_log"
    }

    pub fn map(&self, input: &RecordInput) -> CollectResult<Row> {
        let line = input.as_str()?;
        let tokens = split_quoted(line);

        let row = match tokens.len() {
            FULL_FIELD_COUNT => Self::parse_tokens(&tokens, true)?,
            REDUCED_FIELD_COUNT => Self::parse_tokens(&tokens, false)?,
            n => {
                return Err(CollectError::Parse(format!(
                    "access-log line has {} tokens, expected {} (full) or {} (reduced)",
                    n, FULL_FIELD_COUNT, REDUCED_FIELD_COUNT
                )))
            }
        };
        Ok(Row::Elb(row))
    }

    fn parse_tokens(tokens: &[String], full: bool) -> CollectResult<ElbAccessRow> {
        let field = |i: usize| -> Option<String> {
            tokens.get(i).filter(|t| *t != "-").map(|t| t.to_string())
        };

        let event_time = tokens
            .get(1)
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|dt| dt.timestamp_millis());

        let (client_ip, client_port) = split_host_port(tokens.get(3).map(|t| t.as_str()))?;
        let (target_ip, target_port) = split_host_port(tokens.get(4).map(|t| t.as_str()))?;
        let (request_verb, request_url, request_proto) =
            split_request(tokens.get(12).map(|t| t.as_str()));

        let mut row = ElbAccessRow {
            request_type: field(0),
            event_time,
            elb: field(2),
            client_ip,
            client_port,
            target_ip,
            target_port,
            request_processing_time: numeric_field(&tokens[5], "request_processing_time")?,
            target_processing_time: numeric_field(&tokens[6], "target_processing_time")?,
            response_processing_time: numeric_field(&tokens[7], "response_processing_time")?,
            elb_status_code: numeric_field(&tokens[8], "elb_status_code")?,
            target_status_code: numeric_field(&tokens[9], "target_status_code")?,
            received_bytes: numeric_field(&tokens[10], "received_bytes")?,
            sent_bytes: numeric_field(&tokens[11], "sent_bytes")?,
            request_verb,
            request_url,
            request_proto,
            user_agent: field(13),
            ssl_cipher: field(14),
            ssl_protocol: field(15),
            target_group_arn: field(16),
            trace_id: field(17),
            domain_name: field(18),
            chosen_cert_arn: field(19),
            matched_rule_priority: field(20),
            request_creation_time: field(21),
            actions_executed: field(22),
            redirect_url: field(23),
            error_reason: field(24),
            target_port_list: field(25),
            target_status_code_list: field(26),
            classification: field(27),
            classification_reason: field(28),
            ..Default::default()
        };
        if full {
            row.conn_trace_id = field(29);
        }
        Ok(row)
    }
}

/// Split a `host:port` token; `-` stays null on both sides.
fn split_host_port(token: Option<&str>) -> CollectResult<(Option<String>, Option<i32>)> {
    let token = match token {
        Some(t) if t != "-" => t,
        _ => return Ok((None, None)),
    };
    match token.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<i32>().map_err(|_| {
                CollectError::Parse(format!("invalid port in '{}'", token))
            })?;
            Ok((Some(host.to_string()), Some(port)))
        }
        None => Ok((Some(token.to_string()), None)),
    }
}

/// Split the quoted request token into verb, URL, and protocol.
fn split_request(token: Option<&str>) -> (Option<String>, Option<String>, Option<String>) {
    let token = match token {
        Some(t) if t != "-" => t,
        _ => return (None, None, None),
    };
    let mut parts = token.splitn(3, ' ');
    let verb = parts.next().map(|s| s.to_string());
    let url = parts.next().map(|s| s.to_string());
    let proto = parts.next().map(|s| s.to_string());
    (verb, url, proto)
}
