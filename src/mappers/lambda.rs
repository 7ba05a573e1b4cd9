//! Whitespace-delimited function-log mapper with record-type dispatch.
//!
//! The first token selects the sub-schema: `START`, `END`, `REPORT`, and
//! everything else is a `LOG` line (timestamp, request id, level, message).

use chrono::DateTime;
use serde::Serialize;

use crate::errors::{CollectError, CollectResult};
use crate::mappers::{RecordInput, Row};
use crate::models::{CommonFields, EnrichmentHints};

/// One function-log record of any sub-type.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LambdaLogRow {
    #[serde(flatten)]
    pub common: CommonFields,
    /// `START`, `END`, `REPORT`, or `LOG`
    pub log_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// REPORT: duration in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billed_duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_memory_used: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_duration: Option<f64>,
    /// LOG: event time parsed from the leading ISO timestamp, millis
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl LambdaLogRow {
    pub fn hints(&self) -> EnrichmentHints {
        EnrichmentHints {
            event_time_millis: self.log_timestamp,
            ..Default::default()
        }
    }
}

/// Mapper for function logs with first-token dispatch.
#[derive(Debug, Default)]
pub struct LambdaLogMapper;

impl LambdaLogMapper {
    pub fn new() -> Self {
        LambdaLogMapper
    }

    pub fn identifier(&self) -> &'static str {
        "lambda_log"
    }

    pub fn map(&self, input: &RecordInput) -> CollectResult<Row> {
        let line = input.as_str()?;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            return Err(CollectError::Parse("empty function-log record".to_string()));
        }

        let row = match tokens[0] {
            "START" => Self::map_start(&tokens),
            "END" => Self::map_end(&tokens),
            "REPORT" => Self::map_report(&tokens)?,
            _ => Self::map_log(line, &tokens),
        };
        Ok(Row::Lambda(row))
    }

    fn map_start(tokens: &[&str]) -> LambdaLogRow {
        LambdaLogRow {
            log_type: "START".to_string(),
            request_id: tokens.get(2).map(|t| t.to_string()),
            version: tokens.get(4).map(|t| t.to_string()),
            ..Default::default()
        }
    }

    fn map_end(tokens: &[&str]) -> LambdaLogRow {
        LambdaLogRow {
            log_type: "END".to_string(),
            request_id: tokens.get(2).map(|t| t.to_string()),
            ..Default::default()
        }
    }

    /// REPORT lines map tokens at fixed positions:
    ///
    /// ```text
    /// REPORT RequestId: <id> Duration: <f> ms Billed Duration: <i> ms
    ///        Memory Size: <i> MB Max Memory Used: <i> MB [Init Duration: <f> ms]
    /// 0      1          2    3         4   5  6      7         8   9 ...
    /// ```
    fn map_report(tokens: &[&str]) -> CollectResult<LambdaLogRow> {
        if tokens.len() < 19 {
            return Err(CollectError::Parse(format!(
                "REPORT record has {} tokens, expected at least 19",
                tokens.len()
            )));
        }

        let mut row = LambdaLogRow {
            log_type: "REPORT".to_string(),
            request_id: Some(tokens[2].to_string()),
            duration: Some(parse_fixed(tokens[4], "duration")?),
            billed_duration: Some(parse_fixed(tokens[8], "billed_duration")?),
            memory_size: Some(parse_fixed(tokens[12], "memory_size")?),
            max_memory_used: Some(parse_fixed(tokens[17], "max_memory_used")?),
            ..Default::default()
        };

        // Cold starts append "Init Duration: <f> ms"
        if tokens.len() >= 22 && tokens[19] == "Init" {
            row.init_duration = Some(parse_fixed(tokens[21], "init_duration")?);
        }
        Ok(row)
    }

    fn map_log(line: &str, tokens: &[&str]) -> LambdaLogRow {
        let log_timestamp = tokens
            .first()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|dt| dt.timestamp_millis());

        // Message is the remainder after timestamp, request id, and level
        let message = if tokens.len() > 3 {
            let prefix_len: usize = tokens[..3].iter().map(|t| t.len()).sum();
            let offset = line
                .char_indices()
                .filter(|(_, c)| !c.is_whitespace())
                .nth(prefix_len)
                .map(|(i, _)| i);
            offset.map(|i| line[i..].to_string())
        } else {
            None
        };

        LambdaLogRow {
            log_type: "LOG".to_string(),
            log_timestamp,
            request_id: tokens.get(1).map(|t| t.to_string()),
            log_level: tokens.get(2).map(|t| t.to_string()),
            message,
            ..Default::default()
        }
    }
}

fn parse_fixed<T: std::str::FromStr>(token: &str, field: &str) -> CollectResult<T> {
    token
        .parse::<T>()
        .map_err(|_| CollectError::Parse(format!("field '{}': invalid number '{}'", field, token)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_line(line: &str) -> CollectResult<LambdaLogRow> {
        match LambdaLogMapper::new().map(&RecordInput::Line(line.to_string()))? {
            Row::Lambda(row) => Ok(row),
            other => panic!("unexpected row {:?}", other),
        }
    }

    #[test]
    fn test_report_line() {
        let row = map_line(
            "REPORT RequestId: abc Duration: 12.34 ms Billed Duration: 13 ms \
             Memory Size: 128 MB Max Memory Used: 64 MB",
        )
        .unwrap();
        assert_eq!(row.log_type, "REPORT");
        assert_eq!(row.request_id.as_deref(), Some("abc"));
        assert_eq!(row.duration, Some(12.34));
        assert_eq!(row.billed_duration, Some(13));
        assert_eq!(row.memory_size, Some(128));
        assert_eq!(row.max_memory_used, Some(64));
        assert!(row.init_duration.is_none());
    }

    #[test]
    fn test_report_line_with_init_duration() {
        let row = map_line(
            "REPORT RequestId: abc Duration: 12.34 ms Billed Duration: 13 ms \
             Memory Size: 128 MB Max Memory Used: 64 MB Init Duration: 201.5 ms",
        )
        .unwrap();
        assert_eq!(row.init_duration, Some(201.5));
    }

    #[test]
    fn test_report_bad_number_is_parse_error() {
        let result = map_line(
            "REPORT RequestId: abc Duration: twelve ms Billed Duration: 13 ms \
             Memory Size: 128 MB Max Memory Used: 64 MB",
        );
        assert!(matches!(result.unwrap_err(), CollectError::Parse(_)));
    }

    #[test]
    fn test_report_truncated_is_parse_error() {
        assert!(map_line("REPORT RequestId: abc Duration: 12.34 ms").is_err());
    }

    #[test]
    fn test_start_line() {
        let row = map_line("START RequestId: 8f5e-1 Version: $LATEST").unwrap();
        assert_eq!(row.log_type, "START");
        assert_eq!(row.request_id.as_deref(), Some("8f5e-1"));
        assert_eq!(row.version.as_deref(), Some("$LATEST"));
    }

    #[test]
    fn test_end_line() {
        let row = map_line("END RequestId: 8f5e-1").unwrap();
        assert_eq!(row.log_type, "END");
        assert_eq!(row.request_id.as_deref(), Some("8f5e-1"));
    }

    #[test]
    fn test_log_line() {
        let row =
            map_line("2023-11-14T22:13:20.000Z req-1 INFO processed 4 records in 12ms").unwrap();
        assert_eq!(row.log_type, "LOG");
        assert_eq!(row.log_timestamp, Some(1_700_000_000_000));
        assert_eq!(row.request_id.as_deref(), Some("req-1"));
        assert_eq!(row.log_level.as_deref(), Some("INFO"));
        assert_eq!(row.message.as_deref(), Some("processed 4 records in 12ms"));
    }

    #[test]
    fn test_empty_line_is_parse_error() {
        assert!(map_line("   ").is_err());
    }
}
