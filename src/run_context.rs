//! Run context for a single pipeline invocation
//!
//! The run timestamp is generated once per invocation and every artifact name
//! is derived from it, so two runs never collide and a given run always maps
//! to the same names.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use eyre::{Result, eyre};
use regex::Regex;
use std::sync::LazyLock;

/// Format of the run timestamp embedded in artifact names (`ddMMyyyyHHmmss`)
pub const TIMESTAMP_FORMAT: &str = "%d%m%Y%H%M%S";

/// Prefix shared by every artifact of a run
pub const ARTIFACT_PREFIX: &str = "response_data_";

static ARTIFACT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^response_data_(\d{14})\.(json|csv)$").expect("artifact name pattern is valid")
});

/// Per-invocation context threaded through all derived artifact names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    timestamp: String,
}

impl RunContext {
    /// Create a context stamped with the current local time
    pub fn now() -> Self {
        Self::at(Local::now())
    }

    /// Create a context for a specific instant
    pub fn at<Tz: TimeZone>(instant: DateTime<Tz>) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        Self {
            timestamp: instant.format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    /// Rebuild a context from an existing timestamp string
    ///
    /// # Errors
    /// Returns an error if `timestamp` is not a valid `ddMMyyyyHHmmss` value
    pub fn from_timestamp(timestamp: &str) -> Result<Self> {
        NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
            .map_err(|e| eyre!("Invalid run timestamp '{}': {}", timestamp, e))?;
        Ok(Self {
            timestamp: timestamp.to_string(),
        })
    }

    /// Recover the run context from an artifact name such as `response_data_01082023101500.json`
    pub fn from_artifact_name(name: &str) -> Option<Self> {
        let base = name.rsplit('/').next().unwrap_or(name);
        let captures = ARTIFACT_NAME.captures(base)?;
        Self::from_timestamp(&captures[1]).ok()
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Name of the raw JSON artifact for this run
    pub fn json_name(&self) -> String {
        format!("{}{}.json", ARTIFACT_PREFIX, self.timestamp)
    }

    /// Name of the transformed CSV artifact for this run
    pub fn csv_name(&self) -> String {
        format!("{}{}.csv", ARTIFACT_PREFIX, self.timestamp)
    }
}

impl std::fmt::Display for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.timestamp)
    }
}

/// Derive the CSV key for a raw JSON key, keeping any prefix.
///
/// Returns `None` when the key does not end in `.json`.
pub fn csv_key_for(json_key: &str) -> Option<String> {
    json_key
        .strip_suffix(".json")
        .map(|stem| format!("{}.csv", stem))
}
