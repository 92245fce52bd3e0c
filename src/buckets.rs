// Time-bucket aggregation
// Rounds event timestamps down to hourly and daily boundaries, builds the
// hash fields the recorder increments and rebuilds time series from them.
// Pure functions only; no I/O happens here.
//
// Numan Thabit 2025 Nov

use crate::event::StatusCategory;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

const BUCKET_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Hourly,
    Daily,
}

impl Granularity {
    fn step(&self) -> TimeDelta {
        match self {
            Granularity::Hourly => TimeDelta::hours(1),
            Granularity::Daily => TimeDelta::days(1),
        }
    }

    /// Round `ts` down to the start of its bucket.
    pub fn floor(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        // Only fails for steps larger than the representable range.
        ts.duration_trunc(self.step()).unwrap_or(ts)
    }

    /// Canonical bucket key, e.g. `2026-10-19T14:00:00.000Z`.
    pub fn bucket_key(&self, ts: DateTime<Utc>) -> String {
        self.floor(ts).format(BUCKET_FORMAT).to_string()
    }
}

pub fn hour_key(ts: DateTime<Utc>) -> String {
    Granularity::Hourly.bucket_key(ts)
}

pub fn day_key(ts: DateTime<Utc>) -> String {
    Granularity::Daily.bucket_key(ts)
}

/// Hash field for one category within one bucket: `{bucketKey}:{category}`.
pub fn bucket_field(bucket_key: &str, category: StatusCategory) -> String {
    format!("{bucket_key}:{category}")
}

/// Split a hash field back into its bucket key and category.
///
/// Bucket keys contain `:` themselves, so the split happens on the last one.
pub fn parse_field(field: &str) -> Option<(&str, StatusCategory)> {
    let (bucket, category) = field.rsplit_once(':')?;
    Some((bucket, StatusCategory::parse(category)?))
}

/// One reconstructed bucket.
///
/// Besides the four HTTP classes a point carries `unknown` for status codes
/// outside 200..=599, and `total` is the sum of all five counts. A bucket
/// fed only by non-standard codes therefore has `total > 0` with every
/// `Nxx` field at zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimeSeriesPoint {
    pub timestamp: String,
    #[serde(rename = "2xx")]
    pub success: i64,
    #[serde(rename = "3xx")]
    pub redirect: i64,
    #[serde(rename = "4xx")]
    pub client_error: i64,
    #[serde(rename = "5xx")]
    pub server_error: i64,
    pub unknown: i64,
    pub total: i64,
}

impl TimeSeriesPoint {
    fn new(timestamp: String) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }

    fn add(&mut self, category: StatusCategory, count: i64) {
        let slot = match category {
            StatusCategory::Success => &mut self.success,
            StatusCategory::Redirect => &mut self.redirect,
            StatusCategory::ClientError => &mut self.client_error,
            StatusCategory::ServerError => &mut self.server_error,
            StatusCategory::Unknown => &mut self.unknown,
        };
        *slot += count;
        self.total += count;
    }

    pub fn count(&self, category: StatusCategory) -> i64 {
        match category {
            StatusCategory::Success => self.success,
            StatusCategory::Redirect => self.redirect,
            StatusCategory::ClientError => self.client_error,
            StatusCategory::ServerError => self.server_error,
            StatusCategory::Unknown => self.unknown,
        }
    }
}

/// Rebuild a time series from a bucket hash, oldest first, keeping only the
/// `window` most recent buckets. Fields that do not parse are ignored.
pub fn build_series(fields: &HashMap<String, i64>, window: usize) -> Vec<TimeSeriesPoint> {
    let mut points: BTreeMap<&str, TimeSeriesPoint> = BTreeMap::new();
    for (field, count) in fields {
        if let Some((bucket, category)) = parse_field(field) {
            points
                .entry(bucket)
                .or_insert_with(|| TimeSeriesPoint::new(bucket.to_string()))
                .add(category, *count);
        }
    }
    let skip = points.len().saturating_sub(window);
    points.into_values().skip(skip).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 14, 37, 12).unwrap() + TimeDelta::milliseconds(456)
    }

    #[test]
    fn rounds_to_hour_and_day() {
        assert_eq!(hour_key(ts()), "2026-10-19T14:00:00.000Z");
        assert_eq!(day_key(ts()), "2026-10-19T00:00:00.000Z");
    }

    #[test]
    fn field_round_trips_through_colons() {
        let field = bucket_field(&hour_key(ts()), StatusCategory::ClientError);
        assert_eq!(field, "2026-10-19T14:00:00.000Z:4xx");
        assert_eq!(
            parse_field(&field),
            Some(("2026-10-19T14:00:00.000Z", StatusCategory::ClientError))
        );
        assert_eq!(parse_field("2026-10-19T14:00:00.000Z:6xx"), None);
        assert_eq!(parse_field("garbage"), None);
    }

    #[test]
    fn series_totals_match_categories() {
        let mut fields = HashMap::new();
        fields.insert("2026-10-19T13:00:00.000Z:2xx".to_string(), 5);
        fields.insert("2026-10-19T14:00:00.000Z:2xx".to_string(), 3);
        fields.insert("2026-10-19T14:00:00.000Z:5xx".to_string(), 2);
        fields.insert("2026-10-19T14:00:00.000Z:unknown".to_string(), 1);
        fields.insert("bogus".to_string(), 100);

        let series = build_series(&fields, 24);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].timestamp, "2026-10-19T13:00:00.000Z");
        assert_eq!(series[0].total, 5);
        let last = &series[1];
        assert_eq!(last.success, 3);
        assert_eq!(last.server_error, 2);
        assert_eq!(last.total, 6);
        for point in &series {
            let sum: i64 = StatusCategory::ALL.iter().map(|c| point.count(*c)).sum();
            assert_eq!(point.total, sum);
        }
    }

    #[test]
    fn unknown_only_bucket_counts_toward_total() {
        let mut fields = HashMap::new();
        fields.insert("2026-10-19T14:00:00.000Z:unknown".to_string(), 1);
        let json = serde_json::to_value(&build_series(&fields, 24)[0]).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "timestamp": "2026-10-19T14:00:00.000Z",
                "2xx": 0, "3xx": 0, "4xx": 0, "5xx": 0,
                "unknown": 1,
                "total": 1,
            })
        );
    }

    #[test]
    fn series_keeps_most_recent_window() {
        let fields: HashMap<String, i64> = (0..5)
            .map(|h| (format!("2026-10-19T0{h}:00:00.000Z:2xx"), 1))
            .collect();
        let series = build_series(&fields, 2);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].timestamp, "2026-10-19T03:00:00.000Z");
        assert_eq!(series[1].timestamp, "2026-10-19T04:00:00.000Z");
    }
}
