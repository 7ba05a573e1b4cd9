//! Newline-delimited JSON mapper.
//!
//! One JSON object per record. Some delivery paths double-encode records as
//! JSON strings ("quoted" form); on a parse failure the mapper unquotes once
//! and retries before giving up.

use chrono::DateTime;
use serde::Serialize;
use serde_json::Value;

use crate::errors::{CollectError, CollectResult};
use crate::mappers::{RecordInput, Row};
use crate::models::{CommonFields, EnrichmentHints};

/// A schemaless JSON row: the original object flattened next to the common
/// fields.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JsonRow {
    #[serde(flatten)]
    pub common: CommonFields,
    #[serde(flatten)]
    pub data: serde_json::Map<String, Value>,
}

impl JsonRow {
    pub fn hints(&self) -> EnrichmentHints {
        EnrichmentHints {
            event_time_millis: self.event_time_millis(),
            source_ip: self
                .str_field(&["sourceIPAddress", "srcaddr", "source_ip"])
                .filter(|ip| ip.parse::<std::net::IpAddr>().is_ok()),
            account_id: self.str_field(&["recipientAccountId", "accountId", "account_id"]),
            ..Default::default()
        }
    }

    fn str_field(&self, names: &[&str]) -> Option<String> {
        names
            .iter()
            .find_map(|n| self.data.get(*n))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    fn event_time_millis(&self) -> Option<i64> {
        let value = ["timestamp", "time", "eventTime"]
            .iter()
            .find_map(|n| self.data.get(*n))?;
        match value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.timestamp_millis()),
            _ => None,
        }
    }
}

/// Mapper for NDJSON records, tolerant of JSON-escaped lines.
#[derive(Debug, Default)]
pub struct NdjsonMapper;

impl NdjsonMapper {
    pub fn new() -> Self {
        NdjsonMapper
    }

    pub fn identifier(&self) -> &'static str {
        "ndjson"
    }

    pub fn map(&self, input: &RecordInput) -> CollectResult<Row> {
        let raw = input.as_str()?;

        let object = match parse_object(raw) {
            Ok(obj) => obj,
            Err(first_err) => {
                // Single unquote step: the record may be a JSON string
                // containing the actual object.
                let unquoted: String = serde_json::from_str(raw).map_err(|_| first_err)?;
                parse_object(&unquoted)?
            }
        };

        Ok(Row::Json(JsonRow {
            common: CommonFields::default(),
            data: object,
        }))
    }
}

fn parse_object(raw: &str) -> CollectResult<serde_json::Map<String, Value>> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(CollectError::Parse(format!(
            "expected a JSON object, got {}",
            kind_of(&other)
        ))),
        Err(e) => Err(CollectError::Parse(format!("invalid JSON record: {}", e))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
