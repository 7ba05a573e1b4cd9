//! CSV mapper with header capture, for cost-recommendation exports.
//!
//! The first non-empty line of an artifact is delivered via `on_header`;
//! every later line must have exactly as many columns as the header.
//! Values are assigned by `lowercase(header) -> field`; nested JSON columns
//! get a real JSON decode, and timestamps use the export's fixed layout.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

use crate::constants::COST_REPORT_TIME_LAYOUT;
use crate::errors::{CollectError, CollectResult};
use crate::mappers::{RecordInput, Row};
use crate::models::{CommonFields, EnrichmentHints};

/// One cost-recommendation record.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CostReportRow {
    #[serde(flatten)]
    pub common: CommonFields,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_resource_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_resource_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_monthly_savings_after_discount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_monthly_cost_after_discount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_savings_percentage_after_discount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implementation_effort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_needed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_possible: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh_timestamp: Option<DateTime<Utc>>,
    /// Nested JSON column; empty string in the export becomes null
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_resource_details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_resource_details: Option<serde_json::Value>,
    /// Nested JSON tag map
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<serde_json::Value>,
    /// Columns the schema does not know, kept verbatim
    #[serde(flatten, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CostReportRow {
    pub fn hints(&self) -> EnrichmentHints {
        let mut hints = EnrichmentHints {
            event_time_millis: self.last_refresh_timestamp.map(|t| t.timestamp_millis()),
            account_id: self.account_id.clone(),
            ..Default::default()
        };
        if let Some(arn) = &self.resource_arn {
            hints.arns.push(arn.clone());
        }
        hints
    }
}

/// CSV mapper; `on_header` must run before the first `map` call.
#[derive(Debug, Default)]
pub struct CostReportMapper {
    headers: Option<Vec<String>>,
}

impl CostReportMapper {
    pub fn new() -> Self {
        CostReportMapper { headers: None }
    }

    pub fn identifier(&self) -> &'static str {
        "cost_report_csv"
    }

    /// Capture the header line; later rows are checked against its width.
    pub fn on_header(&mut self, line: &str) -> CollectResult<()> {
        let headers = parse_csv_line(line)?
            .into_iter()
            .map(|h| h.trim().to_lowercase())
            .collect::<Vec<_>>();
        if headers.is_empty() {
            return Err(CollectError::Schema("empty CSV header".to_string()));
        }
        self.headers = Some(headers);
        Ok(())
    }

    pub fn map(&self, input: &RecordInput) -> CollectResult<Row> {
        let headers = self
            .headers
            .as_ref()
            .ok_or_else(|| CollectError::Schema("CSV row before header".to_string()))?;

        let values = parse_csv_line(input.as_str()?)?;
        if values.len() != headers.len() {
            return Err(CollectError::Schema(format!(
                "{} values for {} header columns",
                values.len(),
                headers.len()
            )));
        }

        let mut row = CostReportRow::default();
        for (header, value) in headers.iter().zip(values.iter()) {
            assign_column(&mut row, header, value)?;
        }
        Ok(Row::CostReport(row))
    }
}

fn parse_csv_line(line: &str) -> CollectResult<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());

    match reader.records().next() {
        Some(Ok(record)) => Ok(record.iter().map(|f| f.to_string()).collect()),
        Some(Err(e)) => Err(CollectError::Parse(format!("invalid CSV line: {}", e))),
        None => Err(CollectError::Parse("empty CSV line".to_string())),
    }
}

fn assign_column(row: &mut CostReportRow, header: &str, value: &str) -> CollectResult<()> {
    if value.is_empty() {
        return Ok(());
    }
    match header {
        "account_id" => row.account_id = Some(value.to_string()),
        "region" => row.region = Some(value.to_string()),
        "recommendation_id" => row.recommendation_id = Some(value.to_string()),
        "resource_id" => row.resource_id = Some(value.to_string()),
        "resource_arn" => row.resource_arn = Some(value.to_string()),
        "action_type" => row.action_type = Some(value.to_string()),
        "currency_code" => row.currency_code = Some(value.to_string()),
        "current_resource_type" => row.current_resource_type = Some(value.to_string()),
        "recommended_resource_type" => row.recommended_resource_type = Some(value.to_string()),
        "estimated_monthly_savings_after_discount" => {
            row.estimated_monthly_savings_after_discount = Some(parse_number(header, value)?)
        }
        "estimated_monthly_cost_after_discount" => {
            row.estimated_monthly_cost_after_discount = Some(parse_number(header, value)?)
        }
        "estimated_savings_percentage_after_discount" => {
            row.estimated_savings_percentage_after_discount = Some(parse_number(header, value)?)
        }
        "implementation_effort" => row.implementation_effort = Some(value.to_string()),
        "restart_needed" => row.restart_needed = Some(value.eq_ignore_ascii_case("true")),
        "rollback_possible" => row.rollback_possible = Some(value.eq_ignore_ascii_case("true")),
        "last_refresh_timestamp" => {
            let naive = NaiveDateTime::parse_from_str(value, COST_REPORT_TIME_LAYOUT)
                .map_err(|e| {
                    CollectError::Parse(format!("invalid timestamp '{}': {}", value, e))
                })?;
            row.last_refresh_timestamp = Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
        "recommended_resource_details" => {
            row.recommended_resource_details = Some(parse_nested_json(header, value)?)
        }
        "current_resource_details" => {
            row.current_resource_details = Some(parse_nested_json(header, value)?)
        }
        "tags" => row.tags = Some(parse_nested_json(header, value)?),
        other => {
            row.extra
                .insert(other.to_string(), serde_json::Value::String(value.to_string()));
        }
    }
    Ok(())
}

fn parse_number(header: &str, value: &str) -> CollectResult<f64> {
    value
        .parse::<f64>()
        .map_err(|_| CollectError::Parse(format!("column '{}': invalid number '{}'", header, value)))
}

fn parse_nested_json(header: &str, value: &str) -> CollectResult<serde_json::Value> {
    serde_json::from_str(value)
        .map_err(|e| CollectError::Parse(format!("column '{}': invalid nested JSON: {}", header, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "account_id,region,estimated_monthly_savings_after_discount,last_refresh_timestamp,recommended_resource_details";

    fn mapper_with_header() -> CostReportMapper {
        let mut mapper = CostReportMapper::new();
        mapper.on_header(HEADER).unwrap();
        mapper
    }

    fn map_line(mapper: &CostReportMapper, line: &str) -> CollectResult<CostReportRow> {
        match mapper.map(&RecordInput::Line(line.to_string()))? {
            Row::CostReport(row) => Ok(row),
            other => panic!("unexpected row {:?}", other),
        }
    }

    #[test]
    fn test_scenario_row() {
        let mapper = mapper_with_header();
        let row = map_line(
            &mapper,
            r#"123,us-east-1,1.5,Mon Jan 2 15:04:05 UTC 2006,"{""a"":1}""#,
        )
        .unwrap();

        assert_eq!(row.account_id.as_deref(), Some("123"));
        assert_eq!(row.region.as_deref(), Some("us-east-1"));
        assert_eq!(row.estimated_monthly_savings_after_discount, Some(1.5));
        assert_eq!(
            row.last_refresh_timestamp.unwrap().to_rfc3339(),
            "2006-01-02T15:04:05+00:00"
        );
        assert_eq!(
            row.recommended_resource_details.unwrap(),
            serde_json::json!({"a": 1})
        );
    }

    #[test]
    fn test_column_count_mismatch_is_schema_error() {
        let mapper = mapper_with_header();
        let result = map_line(&mapper, "123,us-east-1");
        assert!(matches!(result.unwrap_err(), CollectError::Schema(_)));
    }

    #[test]
    fn test_row_before_header_is_schema_error() {
        let mapper = CostReportMapper::new();
        let result = map_line(&mapper, "123,us-east-1,1.5,x,y");
        assert!(matches!(result.unwrap_err(), CollectError::Schema(_)));
    }

    #[test]
    fn test_headers_lowercased() {
        let mut mapper = CostReportMapper::new();
        mapper
            .on_header("Account_Id,REGION,estimated_monthly_savings_after_discount,last_refresh_timestamp,recommended_resource_details")
            .unwrap();
        let row = map_line(
            &mapper,
            "123,eu-west-1,0.5,Mon Jan 2 15:04:05 UTC 2006,",
        )
        .unwrap();
        assert_eq!(row.account_id.as_deref(), Some("123"));
        assert_eq!(row.region.as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn test_empty_nested_json_is_null() {
        let mapper = mapper_with_header();
        let row = map_line(&mapper, "123,us-east-1,1.5,Mon Jan 2 15:04:05 UTC 2006,").unwrap();
        assert!(row.recommended_resource_details.is_none());
    }

    #[test]
    fn test_invalid_nested_json_is_parse_error() {
        let mapper = mapper_with_header();
        let result = map_line(&mapper, "123,us-east-1,1.5,Mon Jan 2 15:04:05 UTC 2006,{bad");
        assert!(matches!(result.unwrap_err(), CollectError::Parse(_)));
    }

    #[test]
    fn test_unknown_columns_kept_in_extra() {
        let mut mapper = CostReportMapper::new();
        mapper.on_header("account_id,mystery_column").unwrap();
        let row = map_line(&mapper, "123,surprise").unwrap();
        assert_eq!(
            row.extra.get("mystery_column").unwrap(),
            &serde_json::Value::String("surprise".to_string())
        );
    }

    #[test]
    fn test_hints_from_refresh_time_and_account() {
        let mapper = mapper_with_header();
        let row = map_line(&mapper, "123,us-east-1,1.5,Mon Jan 2 15:04:05 UTC 2006,").unwrap();
        let hints = row.hints();
        assert_eq!(hints.account_id.as_deref(), Some("123"));
        assert_eq!(hints.event_time_millis, Some(1_136_214_245_000));
    }
}
