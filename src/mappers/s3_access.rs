//! Named-format mapper for object-store server access logs.
//!
//! The format is a `$name` template over the quote-aware tokenizer: each
//! template token names the field the corresponding line token lands in.
//! Two variants exist (the full format gained a trailing `acl_required`
//! field); the full template is tried first, then the reduced one.

use chrono::DateTime;
use serde::Serialize;

use crate::errors::{CollectError, CollectResult};
use crate::mappers::{numeric_field, split_quoted, RecordInput, Row};
use crate::models::{CommonFields, EnrichmentHints};

/// Full format, including `acl_required`.
pub const FULL_TEMPLATE: &str = "$bucket_owner $bucket $timestamp $remote_ip $requester \
     $request_id $operation $key $request_uri $http_status $error_code $bytes_sent \
     $object_size $total_time $turn_around_time $referer $user_agent $version_id \
     $host_id $signature_version $cipher_suite $authentication_type $host_header \
     $tls_version $access_point_arn $acl_required";

/// Reduced format without the trailing field.
pub const REDUCED_TEMPLATE: &str = "$bucket_owner $bucket $timestamp $remote_ip $requester \
     $request_id $operation $key $request_uri $http_status $error_code $bytes_sent \
     $object_size $total_time $turn_around_time $referer $user_agent $version_id \
     $host_id $signature_version $cipher_suite $authentication_type $host_header \
     $tls_version $access_point_arn";

/// One server access-log record.
#[derive(Debug, Clone, Default, Serialize)]
pub struct S3AccessRow {
    #[serde(flatten)]
    pub common: CommonFields,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    /// Request time, millis
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requester: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_sent: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_around_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cipher_suite: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_header: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_point_arn: Option<String>,
    /// Only present in the full format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acl_required: Option<String>,
}

impl S3AccessRow {
    pub fn hints(&self) -> EnrichmentHints {
        let mut hints = EnrichmentHints {
            event_time_millis: self.event_time,
            source_ip: self.remote_ip.clone(),
            ..Default::default()
        };
        if let Some(host) = &self.host_header {
            hints.domains.push(host.clone());
        }
        if let Some(arn) = &self.access_point_arn {
            hints.arns.push(arn.clone());
        }
        if let Some(requester) = &self.requester {
            if requester.starts_with("arn:") {
                hints.arns.push(requester.clone());
            } else {
                hints.usernames.push(requester.clone());
            }
        }
        hints
    }
}

/// Compiled `$name` template.
#[derive(Debug)]
struct Template {
    fields: Vec<String>,
}

impl Template {
    fn compile(template: &str) -> Self {
        let fields = template
            .split_whitespace()
            .map(|t| t.trim_start_matches('$').to_string())
            .collect();
        Template { fields }
    }

    fn apply(&self, tokens: &[String]) -> CollectResult<S3AccessRow> {
        if tokens.len() != self.fields.len() {
            return Err(CollectError::Parse(format!(
                "{} tokens for a {}-field template",
                tokens.len(),
                self.fields.len()
            )));
        }
        let mut row = S3AccessRow::default();
        for (token, field) in tokens.iter().zip(self.fields.iter()) {
            if token == "-" {
                continue;
            }
            assign_field(&mut row, field, token)?;
        }
        Ok(row)
    }
}

fn assign_field(row: &mut S3AccessRow, field: &str, token: &str) -> CollectResult<()> {
    match field {
        "bucket_owner" => row.bucket_owner = Some(token.to_string()),
        "bucket" => row.bucket = Some(token.to_string()),
        "timestamp" => {
            // Bracketed strftime form, e.g. 06/Feb/2019:00:00:38 +0000
            let dt = DateTime::parse_from_str(token, "%d/%b/%Y:%H:%M:%S %z").map_err(|e| {
                CollectError::Parse(format!("invalid access-log time '{}': {}", token, e))
            })?;
            row.event_time = Some(dt.timestamp_millis());
        }
        "remote_ip" => row.remote_ip = Some(token.to_string()),
        "requester" => row.requester = Some(token.to_string()),
        "request_id" => row.request_id = Some(token.to_string()),
        "operation" => row.operation = Some(token.to_string()),
        "key" => row.key = Some(token.to_string()),
        "request_uri" => row.request_uri = Some(token.to_string()),
        "http_status" => row.http_status = numeric_field(token, field)?,
        "error_code" => row.error_code = Some(token.to_string()),
        "bytes_sent" => row.bytes_sent = numeric_field(token, field)?,
        "object_size" => row.object_size = numeric_field(token, field)?,
        "total_time" => row.total_time = numeric_field(token, field)?,
        "turn_around_time" => row.turn_around_time = numeric_field(token, field)?,
        "referer" => row.referer = Some(token.to_string()),
        "user_agent" => row.user_agent = Some(token.to_string()),
        "version_id" => row.version_id = Some(token.to_string()),
        "host_id" => row.host_id = Some(token.to_string()),
        "signature_version" => row.signature_version = Some(token.to_string()),
        "cipher_suite" => row.cipher_suite = Some(token.to_string()),
        "authentication_type" => row.authentication_type = Some(token.to_string()),
        "host_header" => row.host_header = Some(token.to_string()),
        "tls_version" => row.tls_version = Some(token.to_string()),
        "access_point_arn" => row.access_point_arn = Some(token.to_string()),
        "acl_required" => row.acl_required = Some(token.to_string()),
        other => {
            return Err(CollectError::Parse(format!(
                "unknown access-log field '{}'",
                other
            )))
        }
    }
    Ok(())
}

/// Mapper for server access logs with full/reduced template fallback.
#[derive(Debug)]
pub struct S3AccessLogMapper {
    full: Template,
    reduced: Template,
}

impl Default for S3AccessLogMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl S3AccessLogMapper {
    pub fn new() -> Self {
        S3AccessLogMapper {
            full: Template::compile(FULL_TEMPLATE),
            reduced: Template::compile(REDUCED_TEMPLATE),
        }
    }

    pub fn identifier(&self) -> &'static str {
        "s3_access_log"
    }

    pub fn map(&self, input: &RecordInput) -> CollectResult<Row> {
        let line = input.as_str()?;
        let tokens = split_quoted(line);

        match self.full.apply(&tokens) {
            Ok(row) => Ok(Row::S3Access(row)),
            Err(_) => self.reduced.apply(&tokens).map(Row::S3Access),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_line(with_acl: bool) -> String {
        let mut line = concat!(
            "79a59df900b949e55d96a1e698fbacedfd6e09d98eacf8f8d5218e7cd47ef2be ",
            "awsexamplebucket1 [06/Feb/2019:00:00:38 +0000] 192.0.2.3 ",
            "arn:aws:iam::123456789012:user/alice 3E57427F3EXAMPLE REST.GET.VERSIONING ",
            "- \"GET /awsexamplebucket1?versioning HTTP/1.1\" 200 - 113 - 7 - \"-\" ",
            "\"S3Console/0.4\" - host-id-base64 SigV2 ECDHE-RSA-AES128-GCM-SHA256 ",
            "AuthHeader awsexamplebucket1.s3.us-west-1.amazonaws.com TLSV1.1 ",
            "arn:aws:s3:us-west-1:123456789012:accesspoint/example-AP"
        )
        .to_string();
        if with_acl {
            line.push_str(" Yes");
        }
        line
    }

    fn map_line(line: &str) -> CollectResult<S3AccessRow> {
        match S3AccessLogMapper::new().map(&RecordInput::Line(line.to_string()))? {
            Row::S3Access(row) => Ok(row),
            other => panic!("unexpected row {:?}", other),
        }
    }

    #[test]
    fn test_full_template_parses() {
        let row = map_line(&sample_line(true)).unwrap();
        assert_eq!(row.bucket.as_deref(), Some("awsexamplebucket1"));
        assert_eq!(row.remote_ip.as_deref(), Some("192.0.2.3"));
        assert_eq!(row.operation.as_deref(), Some("REST.GET.VERSIONING"));
        assert_eq!(row.http_status, Some(200));
        assert_eq!(row.bytes_sent, Some(113));
        assert_eq!(row.acl_required.as_deref(), Some("Yes"));
        // 06/Feb/2019:00:00:38 +0000
        assert_eq!(row.event_time, Some(1_549_411_238_000));
    }

    #[test]
    fn test_reduced_template_fallback() {
        let row = map_line(&sample_line(false)).unwrap();
        assert_eq!(row.bucket.as_deref(), Some("awsexamplebucket1"));
        assert!(row.acl_required.is_none());
    }

    #[test]
    fn test_neither_template_is_parse_error() {
        let result = map_line("too short");
        assert!(matches!(result.unwrap_err(), CollectError::Parse(_)));
    }

    #[test]
    fn test_dash_fields_null() {
        let row = map_line(&sample_line(true)).unwrap();
        assert!(row.key.is_none());
        assert!(row.error_code.is_none());
        assert!(row.object_size.is_none());
    }

    #[test]
    fn test_hints_classify_requester() {
        let row = map_line(&sample_line(true)).unwrap();
        let hints = row.hints();
        assert_eq!(hints.source_ip.as_deref(), Some("192.0.2.3"));
        assert!(hints
            .arns
            .contains(&"arn:aws:iam::123456789012:user/alice".to_string()));
        assert!(hints
            .domains
            .contains(&"awsexamplebucket1.s3.us-west-1.amazonaws.com".to_string()));
    }

    #[test]
    fn test_template_compile_strips_dollar() {
        let template = Template::compile("$a $b");
        assert_eq!(template.fields, vec!["a", "b"]);
    }
}
