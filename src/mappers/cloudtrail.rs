//! Records-envelope JSON mapper for CloudTrail-style management audit logs.
//!
//! Input is the whole artifact: bytes deserializing to `{"Records":[...]}`.
//! Output is one typed row per record.

use chrono::DateTime;
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::{CollectError, CollectResult};
use crate::mappers::{RecordInput, Row};
use crate::models::{CommonFields, EnrichmentHints};

/// The acting identity on an audit record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    #[serde(
        rename = "identity_type",
        alias = "type",
        skip_serializing_if = "Option::is_none"
    )]
    pub identity_type: Option<String>,
    #[serde(alias = "principalId", skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<String>,
    #[serde(alias = "arn", skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    #[serde(alias = "accountId", skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(alias = "accessKeyId", skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(alias = "userName", skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    // Upstream emits this as a string even though it looks boolean; keep the
    // string representation to avoid silent semantic drift.
    #[serde(
        alias = "sessionCredentialFromConsole",
        skip_serializing_if = "Option::is_none"
    )]
    pub session_credential_from_console: Option<String>,
}

/// A resource referenced by an audit record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrailResource {
    #[serde(alias = "ARN", skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    #[serde(alias = "accountId", skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(
        rename = "resource_type",
        alias = "type",
        skip_serializing_if = "Option::is_none"
    )]
    pub resource_type: Option<String>,
}

/// One management audit event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudTrailRow {
    #[serde(flatten)]
    pub common: CommonFields,
    /// Event time in millis; upstream sends ISO-8601 or epoch millis
    #[serde(
        default,
        alias = "eventTime",
        deserialize_with = "de_event_time",
        skip_serializing_if = "Option::is_none"
    )]
    pub event_time: Option<i64>,
    #[serde(default, alias = "eventVersion", skip_serializing_if = "Option::is_none")]
    pub event_version: Option<String>,
    #[serde(default, alias = "eventName", skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    #[serde(default, alias = "eventSource", skip_serializing_if = "Option::is_none")]
    pub event_source: Option<String>,
    #[serde(default, alias = "awsRegion", skip_serializing_if = "Option::is_none")]
    pub aws_region: Option<String>,
    #[serde(default, alias = "sourceIPAddress", skip_serializing_if = "Option::is_none")]
    pub source_ip_address: Option<String>,
    #[serde(default, alias = "userAgent", skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, alias = "userIdentity", skip_serializing_if = "Option::is_none")]
    pub user_identity: Option<UserIdentity>,
    #[serde(default, alias = "requestID", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, alias = "eventID", skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, alias = "eventType", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, alias = "eventCategory", skip_serializing_if = "Option::is_none")]
    pub event_category: Option<String>,
    #[serde(default, alias = "readOnly", skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
    #[serde(default, alias = "managementEvent", skip_serializing_if = "Option::is_none")]
    pub management_event: Option<bool>,
    #[serde(default, alias = "recipientAccountId", skip_serializing_if = "Option::is_none")]
    pub recipient_account_id: Option<String>,
    #[serde(default, alias = "errorCode", skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, alias = "errorMessage", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, alias = "requestParameters", skip_serializing_if = "Option::is_none")]
    pub request_parameters: Option<serde_json::Value>,
    #[serde(default, alias = "responseElements", skip_serializing_if = "Option::is_none")]
    pub response_elements: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<TrailResource>,
}

impl CloudTrailRow {
    pub fn hints(&self) -> EnrichmentHints {
        let mut hints = EnrichmentHints {
            event_time_millis: self.event_time,
            source_ip: self
                .source_ip_address
                .as_ref()
                .filter(|ip| ip.parse::<std::net::IpAddr>().is_ok())
                .cloned(),
            ..Default::default()
        };

        for resource in &self.resources {
            if let Some(arn) = &resource.arn {
                hints.arns.push(arn.clone());
            }
        }
        if let Some(identity) = &self.user_identity {
            if let Some(arn) = &identity.arn {
                hints.arns.push(arn.clone());
            }
            // Only long-term access key ids identify a user; temporary
            // session keys (ASIA...) do not.
            if let Some(key) = &identity.access_key_id {
                if key.starts_with("AKIA") {
                    hints.usernames.push(key.clone());
                }
            }
            if let Some(name) = &identity.user_name {
                hints.usernames.push(name.clone());
            }
        }

        hints.account_id = self
            .recipient_account_id
            .clone()
            .or_else(|| {
                self.user_identity
                    .as_ref()
                    .and_then(|i| i.account_id.clone())
            });
        hints
    }
}

/// Accept event time as an RFC3339 string or an epoch-millis number.
fn de_event_time<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => Ok(n.as_i64()),
        Some(serde_json::Value::String(s)) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| Some(dt.timestamp_millis()))
            .map_err(|e| serde::de::Error::custom(format!("invalid eventTime '{}': {}", s, e))),
        Some(other) => Err(serde::de::Error::custom(format!(
            "invalid eventTime: {}",
            other
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Records")]
    records: Vec<CloudTrailRow>,
}

/// Mapper for the records-envelope audit-log format.
#[derive(Debug, Default)]
pub struct CloudTrailMapper;

impl CloudTrailMapper {
    pub fn new() -> Self {
        CloudTrailMapper
    }

    pub fn identifier(&self) -> &'static str {
        "cloudtrail_envelope"
    }

    /// Decode one envelope into its rows.
    pub fn map(&self, input: &RecordInput) -> CollectResult<Vec<Row>> {
        let envelope: Envelope = serde_json::from_slice(input.as_bytes())
            .map_err(|e| CollectError::Parse(format!("audit-log envelope: {}", e)))?;
        Ok(envelope.records.into_iter().map(Row::CloudTrail).collect())
    }
}
