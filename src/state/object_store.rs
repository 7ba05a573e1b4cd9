//! Collection state for the object-store backend.
//!
//! Object keys carry their event time in the filename. A [`FilenameLayout`]
//! regex with named groups extracts the time units and any classification
//! groups (region, account, ...); the smallest time unit present becomes the
//! state's granularity, and watermarks are tracked per classification
//! bucket. An optional lexicographic cursor deduplicates re-discovery when
//! the source enumerates keys in order.

use std::collections::{BTreeMap, HashMap};

use chrono::{TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{CollectError, CollectResult};

/// Time-bucket size derived from a filename layout, smallest unit wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Year,
    Month,
    Day,
    Hour,
    Minute,
}

const TIME_GROUPS: &[(&str, Granularity)] = &[
    ("year", Granularity::Year),
    ("month", Granularity::Month),
    ("day", Granularity::Day),
    ("hour", Granularity::Hour),
    ("minute", Granularity::Minute),
];

/// Result of matching an object key against a filename layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFilename {
    /// Event time derived from the time groups, when the layout has a year
    pub time_millis: Option<i64>,
    /// Watermark bucket: the non-time group values joined in group order
    pub bucket: String,
    /// Non-time named groups, exposed as artifact path properties
    pub properties: HashMap<String, String>,
}

/// Compiled filename layout: a regex with named time and classifier groups.
#[derive(Debug)]
pub struct FilenameLayout {
    re: Regex,
    granularity: Granularity,
    property_groups: Vec<String>,
}

impl FilenameLayout {
    /// Compile a layout. At least one of the `year`/`month`/`day`/`hour`/
    /// `minute` named groups must be present.
    pub fn new(pattern: &str) -> CollectResult<Self> {
        let re = Regex::new(pattern)
            .map_err(|e| CollectError::Config(format!("invalid filename layout: {}", e)))?;

        let names: Vec<&str> = re.capture_names().flatten().collect();
        let granularity = names
            .iter()
            .filter_map(|n| {
                TIME_GROUPS
                    .iter()
                    .find(|(g, _)| g == n)
                    .map(|(_, gran)| *gran)
            })
            .max()
            .ok_or_else(|| {
                CollectError::Config(
                    "filename layout needs at least one time group (year/month/day/hour/minute)"
                        .to_string(),
                )
            })?;

        let property_groups = names
            .iter()
            .filter(|n| !TIME_GROUPS.iter().any(|(g, _)| g == *n))
            .map(|n| n.to_string())
            .collect();

        Ok(FilenameLayout {
            re,
            granularity,
            property_groups,
        })
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Match a key against the layout and derive its time and bucket.
    pub fn parse_filename(&self, key: &str) -> CollectResult<ParsedFilename> {
        let caps = self
            .re
            .captures(key)
            .ok_or_else(|| CollectError::Parse(format!("'{}' does not match filename layout", key)))?;

        let group = |name: &str| -> Option<u32> {
            caps.name(name).and_then(|m| m.as_str().parse().ok())
        };

        let time_millis = group("year").and_then(|year| {
            Utc.with_ymd_and_hms(
                year as i32,
                group("month").unwrap_or(1),
                group("day").unwrap_or(1),
                group("hour").unwrap_or(0),
                group("minute").unwrap_or(0),
                0,
            )
            .single()
            .map(|dt| dt.timestamp_millis())
        });

        let mut properties = HashMap::new();
        for name in &self.property_groups {
            if let Some(m) = caps.name(name) {
                properties.insert(name.clone(), m.as_str().to_string());
            }
        }

        // Deterministic bucket key regardless of map iteration order
        let bucket = self
            .property_groups
            .iter()
            .filter_map(|n| properties.get(n).map(|v| v.as_str()))
            .collect::<Vec<_>>()
            .join("/");

        Ok(ParsedFilename {
            time_millis,
            bucket,
            properties,
        })
    }
}

/// Persistent progress for an object-store source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectStoreState {
    /// Watermark bucket -> latest collected artifact time, millis
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    start_times: BTreeMap<String, i64>,
    /// Lexicographic listing cursor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start_after_key: Option<String>,
    /// Whether the cursor participates in collection decisions
    #[serde(default)]
    use_start_after_key: bool,
    /// Granularity the watermarks were derived under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    granularity: Option<Granularity>,
    /// Fields written by newer versions, preserved verbatim
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl ObjectStoreState {
    /// Enable lexicographic-cursor mode and record the granularity. Called
    /// once per run before discovery.
    pub fn configure(&mut self, lexicographic: bool, granularity: Option<Granularity>) {
        self.use_start_after_key = lexicographic;
        if granularity.is_some() {
            self.granularity = granularity;
        }
    }

    /// The listing cursor, when lexicographic mode is active.
    pub fn start_after_key(&self) -> Option<&str> {
        if self.use_start_after_key {
            self.start_after_key.as_deref()
        } else {
            None
        }
    }

    /// Decide whether an artifact still needs collecting.
    ///
    /// An artifact is skipped when its key is at or behind the lexicographic
    /// cursor, or when its derived time falls strictly before its bucket's
    /// watermark. Artifacts at exactly the watermark are re-collected
    /// (at-least-once).
    pub fn should_collect(&self, key: &str, parsed: &ParsedFilename) -> bool {
        if self.use_start_after_key {
            if let Some(cursor) = &self.start_after_key {
                if key <= cursor.as_str() {
                    return false;
                }
            }
        }
        if let Some(time) = parsed.time_millis {
            if let Some(watermark) = self.start_times.get(&parsed.bucket) {
                if time < *watermark {
                    return false;
                }
            }
        }
        true
    }

    /// Record a collected artifact. Watermarks only advance; the cursor only
    /// moves forward.
    pub fn upsert(&mut self, key: &str, parsed: &ParsedFilename) {
        if let Some(time) = parsed.time_millis {
            let entry = self.start_times.entry(parsed.bucket.clone()).or_insert(0);
            if time > *entry {
                *entry = time;
            }
        }
        if self.use_start_after_key {
            match &self.start_after_key {
                Some(cursor) if key <= cursor.as_str() => {}
                _ => self.start_after_key = Some(key.to_string()),
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start_after_key.is_none() && self.start_times.values().all(|t| *t == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRAIL_LAYOUT: &str = r"AWSLogs/(?P<index>\d+)/CloudTrail/(?P<region>[a-z0-9-]+)/(?P<year>\d{4})/(?P<month>\d{2})/(?P<day>\d{2})/";

    #[test]
    fn test_granularity_smallest_unit_wins() {
        let layout = FilenameLayout::new(r"(?P<year>\d{4})/(?P<month>\d{2})").unwrap();
        assert_eq!(layout.granularity(), Granularity::Month);

        let layout =
            FilenameLayout::new(r"(?P<year>\d{4})/(?P<month>\d{2})/(?P<day>\d{2})/(?P<hour>\d{2})(?P<minute>\d{2})")
                .unwrap();
        assert_eq!(layout.granularity(), Granularity::Minute);
    }

    #[test]
    fn test_layout_without_time_groups_rejected() {
        let result = FilenameLayout::new(r"(?P<region>[a-z-]+)/");
        assert!(matches!(result.unwrap_err(), CollectError::Config(_)));
    }

    #[test]
    fn test_parse_filename_extracts_time_and_properties() {
        let layout = FilenameLayout::new(TRAIL_LAYOUT).unwrap();
        let parsed = layout
            .parse_filename("AWSLogs/123456789012/CloudTrail/us-east-1/2023/11/14/trail.json.gz")
            .unwrap();

        assert_eq!(parsed.properties.get("index").unwrap(), "123456789012");
        assert_eq!(parsed.properties.get("region").unwrap(), "us-east-1");
        assert_eq!(parsed.bucket, "123456789012/us-east-1");

        let expected = Utc
            .with_ymd_and_hms(2023, 11, 14, 0, 0, 0)
            .unwrap()
            .timestamp_millis();
        assert_eq!(parsed.time_millis, Some(expected));
    }

    #[test]
    fn test_parse_filename_no_match() {
        let layout = FilenameLayout::new(TRAIL_LAYOUT).unwrap();
        let result = layout.parse_filename("not/a/trail/key.gz");
        assert!(matches!(result.unwrap_err(), CollectError::Parse(_)));
    }

    fn parsed_at(bucket: &str, millis: i64) -> ParsedFilename {
        ParsedFilename {
            time_millis: Some(millis),
            bucket: bucket.to_string(),
            properties: HashMap::new(),
        }
    }

    #[test]
    fn test_should_collect_respects_watermark() {
        let mut state = ObjectStoreState::default();
        state.configure(false, Some(Granularity::Day));
        state.upsert("k1", &parsed_at("us-east-1", 2000));

        assert!(!state.should_collect("k0", &parsed_at("us-east-1", 1000)));
        // equal time re-collects: at-least-once
        assert!(state.should_collect("k1", &parsed_at("us-east-1", 2000)));
        assert!(state.should_collect("k2", &parsed_at("us-east-1", 3000)));
        // other buckets are unaffected
        assert!(state.should_collect("k0", &parsed_at("eu-west-1", 1000)));
    }

    #[test]
    fn test_should_collect_lexicographic_cursor() {
        let mut state = ObjectStoreState::default();
        state.configure(true, Some(Granularity::Day));
        state.upsert("2023/11/14/a.gz", &parsed_at("", 1000));

        assert!(!state.should_collect("2023/11/14/a.gz", &parsed_at("", 1000)));
        assert!(!state.should_collect("2023/11/13/z.gz", &parsed_at("", 1000)));
        assert!(state.should_collect("2023/11/14/b.gz", &parsed_at("", 1000)));
    }

    #[test]
    fn test_cursor_never_regresses() {
        let mut state = ObjectStoreState::default();
        state.configure(true, Some(Granularity::Day));
        state.upsert("b", &parsed_at("", 100));
        state.upsert("a", &parsed_at("", 100));
        assert_eq!(state.start_after_key(), Some("b"));
    }

    #[test]
    fn test_watermark_never_regresses() {
        let mut state = ObjectStoreState::default();
        state.configure(false, Some(Granularity::Day));
        state.upsert("k", &parsed_at("b", 500));
        state.upsert("k", &parsed_at("b", 300));
        assert!(!state.should_collect("k", &parsed_at("b", 400)));
    }

    #[test]
    fn test_empty_definition() {
        let mut state = ObjectStoreState::default();
        assert!(state.is_empty());

        state.configure(true, Some(Granularity::Day));
        assert!(state.is_empty());

        state.upsert("k", &parsed_at("b", 100));
        assert!(!state.is_empty());
    }

    #[test]
    fn test_serde_round_trip_equality() {
        let mut state = ObjectStoreState::default();
        state.configure(true, Some(Granularity::Hour));
        state.upsert("2023/11/14/a.gz", &parsed_at("us-east-1", 12345));

        let blob = serde_json::to_string(&state).unwrap();
        let restored: ObjectStoreState = serde_json::from_str(&blob).unwrap();
        assert_eq!(restored, state);
    }
}
