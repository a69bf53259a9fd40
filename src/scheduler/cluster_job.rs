use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp layouts accepted for `start_time`, tried in order.
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%a, %d %b %Y %H:%M:%S %z",
];

/// Layouts without an offset, interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// One partition of a logical job.
///
/// Every partition spawned from the same original packet shares `id`.
/// `part == last` marks the final partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterJob {
    pub part: u32,
    pub last: u32,
    pub id: String,
    #[serde(rename = "startTime")]
    pub start_time: String,
}

impl ClusterJob {
    pub fn new(id: impl Into<String>, start_time: impl Into<String>, part: u32, last: u32) -> Self {
        Self {
            part,
            last,
            id: id.into(),
            start_time: start_time.into(),
        }
    }

    /// A fresh start timestamp in the first accepted layout.
    pub fn timestamp_now() -> String {
        Utc::now().to_rfc3339()
    }

    pub fn is_last_partition(&self) -> bool {
        self.part == self.last
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.start_time)
    }

    /// Time elapsed since `start_time`. Unparseable or future timestamps yield zero.
    pub fn duration(&self) -> Duration {
        self.started_at()
            .and_then(|start| (Utc::now() - start).to_std().ok())
            .unwrap_or_default()
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    OFFSET_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(raw, fmt).ok())
        .map(|ts| ts.with_timezone(&Utc))
        .or_else(|| {
            NAIVE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|ts| ts.and_utc())
        })
}
