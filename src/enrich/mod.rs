//! Per-table row enrichment: ids, timestamps, provenance, and search arrays.
//!
//! The enricher is the last pure stage before a row is serialized for the
//! host. It never fails a row: hints it cannot use are simply skipped.

pub mod aka;

use chrono::{DateTime, Datelike, Utc};

use crate::errors::CollectResult;
use crate::mappers::Row;
use crate::models::{next_row_id, SourceEnrichment};

/// Enriches typed rows for one table within one collection run.
#[derive(Debug, Clone)]
pub struct RowEnricher {
    table: String,
    connection: Option<String>,
    default_index: Option<String>,
}

impl RowEnricher {
    pub fn new(
        table: impl Into<String>,
        connection: Option<String>,
        default_index: Option<String>,
    ) -> Self {
        RowEnricher {
            table: table.into(),
            connection,
            default_index,
        }
    }

    /// Populate the common fields of a mapped row.
    ///
    /// Ordering matters only for `timestamp`: the row's own event time wins,
    /// and ingestion time is the fallback so `timestamp <= ingest_timestamp`
    /// always holds for fallback rows.
    pub fn enrich(&self, row: &mut Row, provenance: &SourceEnrichment) -> CollectResult<()> {
        let hints = row.hints();
        let now_millis = Utc::now().timestamp_millis();

        let common = row.common_mut();
        common.id = next_row_id();
        common.ingest_timestamp = now_millis;
        common.timestamp = hints.event_time_millis.unwrap_or(now_millis);
        common.table = self.table.clone();
        common.connection = self.connection.clone();

        common.source_type = provenance
            .source_type
            .clone()
            .or_else(|| Some(self.table.clone()));
        common.source_name = provenance.source_name.clone();
        common.source_location = provenance.source_location.clone();

        if let Some(day) = DateTime::<Utc>::from_timestamp_millis(common.timestamp) {
            common.date = day.format("%Y-%m-%d").to_string();
            common.year = day.year();
            common.month = day.month();
            common.day = day.day();
        }

        if let Some(ip) = &hints.source_ip {
            push_unique(&mut common.ips, ip);
        }
        if let Some(ip) = &hints.destination_ip {
            push_unique(&mut common.ips, ip);
        }

        for aka in aka::expand_arns(&hints.arns) {
            push_unique(&mut common.akas, &aka);
        }
        for name in &hints.usernames {
            push_unique(&mut common.usernames, name);
        }
        for domain in &hints.domains {
            push_unique(&mut common.domains, domain);
        }

        common.index = hints
            .account_id
            .clone()
            .or_else(|| self.default_index.clone());

        Ok(())
    }
}

fn push_unique(values: &mut Vec<String>, value: &str) {
    if !value.is_empty() && !values.iter().any(|v| v == value) {
        values.push(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mappers::{RecordInput, TableMapper, init_catalog};

    fn enricher() -> RowEnricher {
        RowEnricher::new(
            "aws_cloudtrail_log",
            Some("aws_prod".to_string()),
            Some("default".to_string()),
        )
    }

    fn provenance() -> SourceEnrichment {
        SourceEnrichment {
            source_type: Some("aws_s3_bucket".to_string()),
            source_name: Some("b1".to_string()),
            source_location: Some("logs/x.json.gz".to_string()),
        }
    }

    fn cloudtrail_row() -> Row {
        let mapper = init_catalog().mapper_for("aws_cloudtrail_log").unwrap();
        let record = serde_json::json!({
            "Records": [{
                "eventTime": "2023-11-14T22:13:20Z",
                "sourceIPAddress": "10.0.0.1",
                "userIdentity": {
                    "accessKeyId": "AKIAEXAMPLE",
                    "userName": "alice",
                    "accountId": "123456789012"
                },
                "resources": [{"ARN": "arn:aws:s3:::b1"}],
                "recipientAccountId": "123456789012"
            }]
        });
        let mut rows = match &mapper {
            TableMapper::EnvelopeJson(m) => m
                .map(&RecordInput::Bytes(record.to_string().into()))
                .unwrap(),
            _ => unreachable!(),
        };
        rows.remove(0)
    }

    #[test]
    fn test_provenance_copied_verbatim() {
        let mut row = cloudtrail_row();
        enricher().enrich(&mut row, &provenance()).unwrap();
        let common = row.common();
        assert_eq!(common.source_type.as_deref(), Some("aws_s3_bucket"));
        assert_eq!(common.source_name.as_deref(), Some("b1"));
        assert_eq!(common.source_location.as_deref(), Some("logs/x.json.gz"));
        assert_eq!(common.table, "aws_cloudtrail_log");
        assert_eq!(common.connection.as_deref(), Some("aws_prod"));
    }

    #[test]
    fn test_event_time_wins_over_ingest() {
        let mut row = cloudtrail_row();
        enricher().enrich(&mut row, &provenance()).unwrap();
        let common = row.common();
        // 2023-11-14T22:13:20Z
        assert_eq!(common.timestamp, 1_700_000_000_000);
        assert!(common.timestamp <= common.ingest_timestamp);
        assert_eq!(common.date, "2023-11-14");
        assert_eq!((common.year, common.month, common.day), (2023, 11, 14));
    }

    #[test]
    fn test_search_arrays_populated() {
        let mut row = cloudtrail_row();
        enricher().enrich(&mut row, &provenance()).unwrap();
        let common = row.common();
        assert!(common.ips.contains(&"10.0.0.1".to_string()));
        assert!(common.akas.contains(&"arn:aws:s3:::b1".to_string()));
        assert!(common.akas.contains(&"arn:aws:s3:::b1/*".to_string()));
        assert!(common.usernames.contains(&"AKIAEXAMPLE".to_string()));
        assert!(common.usernames.contains(&"alice".to_string()));
    }

    #[test]
    fn test_index_from_account_id() {
        let mut row = cloudtrail_row();
        enricher().enrich(&mut row, &provenance()).unwrap();
        assert_eq!(row.common().index.as_deref(), Some("123456789012"));
    }

    #[test]
    fn test_index_falls_back_to_default() {
        let mapper = init_catalog().mapper_for("aws_lambda_log").unwrap();
        let mut rows = mapper
            .map(&RecordInput::Line(
                "START RequestId: 8f5b3a70-0000-0000-0000-000000000000 Version: $LATEST".into(),
            ))
            .unwrap();
        let mut row = rows.remove(0);
        enricher().enrich(&mut row, &SourceEnrichment::default()).unwrap();
        assert_eq!(row.common().index.as_deref(), Some("default"));
    }

    #[test]
    fn test_source_type_defaults_to_table() {
        let mut row = cloudtrail_row();
        enricher()
            .enrich(&mut row, &SourceEnrichment::default())
            .unwrap();
        assert_eq!(row.common().source_type.as_deref(), Some("aws_cloudtrail_log"));
    }

    #[test]
    fn test_ids_unique_per_row() {
        let mut a = cloudtrail_row();
        let mut b = cloudtrail_row();
        let e = enricher();
        e.enrich(&mut a, &provenance()).unwrap();
        e.enrich(&mut b, &provenance()).unwrap();
        assert_ne!(a.common().id, b.common().id);
    }
}
