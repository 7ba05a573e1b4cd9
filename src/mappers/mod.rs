//! Format-specific mappers producing typed rows from raw records.
//!
//! Mappers are pure: configuration at construction only, no I/O, no state
//! beyond a captured CSV header. The registry is an explicit catalog built
//! by [`init_catalog`]; the mapper itself is a tagged enum over the
//! concrete variants, selected by table name.

mod cloudtrail;
mod cost_report;
mod elb;
mod flow_log;
mod lambda;
mod ndjson;
mod s3_access;

pub use cloudtrail::{CloudTrailMapper, CloudTrailRow};
pub use cost_report::{CostReportMapper, CostReportRow};
pub use elb::{ElbAccessRow, ElbLogMapper};
pub use flow_log::{FlowLogMapper, FlowLogRow, DEFAULT_FLOW_LOG_FIELDS};
pub use lambda::{LambdaLogMapper, LambdaLogRow};
pub use ndjson::{JsonRow, NdjsonMapper};
pub use s3_access::{S3AccessLogMapper, S3AccessRow};

use bytes::Bytes;
use serde::Serialize;

use crate::errors::{CollectError, CollectResult};
use crate::models::CommonFields;

/// One raw record handed to a mapper.
#[derive(Debug, Clone)]
pub enum RecordInput {
    /// Full artifact content, for envelope formats
    Bytes(Bytes),
    /// A single line of a line-oriented artifact
    Line(String),
}

impl RecordInput {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            RecordInput::Bytes(b) => b.as_ref(),
            RecordInput::Line(l) => l.as_bytes(),
        }
    }

    pub fn as_str(&self) -> CollectResult<&str> {
        match self {
            RecordInput::Line(l) => Ok(l),
            RecordInput::Bytes(b) => std::str::from_utf8(b)
                .map_err(|e| CollectError::Parse(format!("record is not valid UTF-8: {}", e))),
        }
    }
}

/// How the pipeline slices an artifact into records for a mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMode {
    /// Single record equal to the full decompressed content
    WholeFile,
    /// One record per line
    Lines,
    /// First non-empty line is a header, the rest are records
    HeaderThenLines,
}

/// A typed row produced by a mapper, before enrichment.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Row {
    CloudTrail(CloudTrailRow),
    Json(JsonRow),
    Lambda(LambdaLogRow),
    Flow(FlowLogRow),
    Elb(ElbAccessRow),
    S3Access(S3AccessRow),
    CostReport(CostReportRow),
}

impl Row {
    pub fn common(&self) -> &CommonFields {
        match self {
            Row::CloudTrail(r) => &r.common,
            Row::Json(r) => &r.common,
            Row::Lambda(r) => &r.common,
            Row::Flow(r) => &r.common,
            Row::Elb(r) => &r.common,
            Row::S3Access(r) => &r.common,
            Row::CostReport(r) => &r.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut CommonFields {
        match self {
            Row::CloudTrail(r) => &mut r.common,
            Row::Json(r) => &mut r.common,
            Row::Lambda(r) => &mut r.common,
            Row::Flow(r) => &mut r.common,
            Row::Elb(r) => &mut r.common,
            Row::S3Access(r) => &mut r.common,
            Row::CostReport(r) => &mut r.common,
        }
    }

    /// Enrichment inputs specific to the row's format.
    pub fn hints(&self) -> crate::models::EnrichmentHints {
        match self {
            Row::CloudTrail(r) => r.hints(),
            Row::Json(r) => r.hints(),
            Row::Lambda(r) => r.hints(),
            Row::Flow(r) => r.hints(),
            Row::Elb(r) => r.hints(),
            Row::S3Access(r) => r.hints(),
            Row::CostReport(r) => r.hints(),
        }
    }

    /// Serialized form handed to the host sink.
    pub fn to_bytes(&self) -> CollectResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| CollectError::Fatal(format!("row serialization failed: {}", e)))
    }
}

/// Tagged mapper variant, selected per table.
#[derive(Debug)]
pub enum TableMapper {
    EnvelopeJson(CloudTrailMapper),
    Ndjson(NdjsonMapper),
    RecordDispatch(LambdaLogMapper),
    Positional(FlowLogMapper),
    QuoteDelimited(ElbLogMapper),
    NamedFormat(S3AccessLogMapper),
    CsvWithHeader(CostReportMapper),
}

impl TableMapper {
    pub fn identifier(&self) -> &'static str {
        match self {
            TableMapper::EnvelopeJson(_) => "cloudtrail_envelope",
            TableMapper::Ndjson(_) => "ndjson",
            TableMapper::RecordDispatch(_) => "lambda_log",
            TableMapper::Positional(_) => "flow_log",
            TableMapper::QuoteDelimited(_) => "elb_access_log",
            TableMapper::NamedFormat(_) => "s3_access_log",
            TableMapper::CsvWithHeader(_) => "cost_report_csv",
        }
    }

    /// Record slicing this mapper expects from the pipeline.
    pub fn record_mode(&self) -> RecordMode {
        match self {
            TableMapper::EnvelopeJson(_) => RecordMode::WholeFile,
            TableMapper::CsvWithHeader(_) => RecordMode::HeaderThenLines,
            _ => RecordMode::Lines,
        }
    }

    /// Deliver the captured header line to a header-aware mapper. No-op for
    /// the other variants.
    pub fn on_header(&mut self, line: &str) -> CollectResult<()> {
        match self {
            TableMapper::CsvWithHeader(m) => m.on_header(line),
            _ => Ok(()),
        }
    }

    /// Map one record into zero or more typed rows.
    pub fn map(&self, input: &RecordInput) -> CollectResult<Vec<Row>> {
        match self {
            TableMapper::EnvelopeJson(m) => m.map(input),
            TableMapper::Ndjson(m) => m.map(input).map(|r| vec![r]),
            TableMapper::RecordDispatch(m) => m.map(input).map(|r| vec![r]),
            TableMapper::Positional(m) => m.map(input).map(|r| vec![r]),
            TableMapper::QuoteDelimited(m) => m.map(input).map(|r| vec![r]),
            TableMapper::NamedFormat(m) => m.map(input).map(|r| vec![r]),
            TableMapper::CsvWithHeader(m) => m.map(input).map(|r| vec![r]),
        }
    }
}

/// Catalog of supported tables, built explicitly at startup.
#[derive(Debug)]
pub struct Catalog {
    tables: Vec<&'static str>,
}

/// Build the table catalog. No registration side effects: the coordinator
/// receives this value and asks it for mappers by table name.
pub fn init_catalog() -> Catalog {
    Catalog {
        tables: vec![
            "aws_cloudtrail_log",
            "aws_ndjson_log",
            "aws_lambda_log",
            "aws_vpc_flow_log",
            "aws_alb_access_log",
            "aws_s3_server_access_log",
            "aws_cost_recommendation",
        ],
    }
}

impl Catalog {
    pub fn tables(&self) -> &[&'static str] {
        &self.tables
    }

    /// Construct the mapper for a table.
    pub fn mapper_for(&self, table: &str) -> CollectResult<TableMapper> {
        match table {
            "aws_cloudtrail_log" => Ok(TableMapper::EnvelopeJson(CloudTrailMapper::new())),
            "aws_ndjson_log" => Ok(TableMapper::Ndjson(NdjsonMapper::new())),
            "aws_lambda_log" => Ok(TableMapper::RecordDispatch(LambdaLogMapper::new())),
            "aws_vpc_flow_log" => Ok(TableMapper::Positional(FlowLogMapper::default_schema())),
            "aws_alb_access_log" => Ok(TableMapper::QuoteDelimited(ElbLogMapper::new())),
            "aws_s3_server_access_log" => Ok(TableMapper::NamedFormat(S3AccessLogMapper::new())),
            "aws_cost_recommendation" => Ok(TableMapper::CsvWithHeader(CostReportMapper::new())),
            other => Err(CollectError::Config(format!("unknown table '{}'", other))),
        }
    }
}

/// Split a log line on spaces, keeping `"..."` and `[...]` runs together.
/// Delimiters are stripped from the returned tokens.
pub(crate) fn split_quoted(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_brackets = false;

    for ch in line.chars() {
        match ch {
            '"' if !in_brackets => {
                in_quotes = !in_quotes;
            }
            '[' if !in_quotes && !in_brackets && current.is_empty() => {
                in_brackets = true;
            }
            ']' if in_brackets => {
                in_brackets = false;
            }
            ' ' if !in_quotes && !in_brackets => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Parse a token into an optional numeric field, treating `-` as null.
pub(crate) fn numeric_field<T: std::str::FromStr>(
    token: &str,
    field: &str,
) -> CollectResult<Option<T>> {
    if token == "-" {
        return Ok(None);
    }
    token
        .parse::<T>()
        .map(Some)
        .map_err(|_| CollectError::Parse(format!("field '{}': invalid number '{}'", field, token)))
}
