//! Pipeline error taxonomy
//!
//! Every step returns an [`eyre::Report`]. When the failure belongs to one of the
//! known kinds below, the report wraps a [`PipelineError`] so callers can recover
//! the kind with `report.downcast_ref::<PipelineError>()`.

use std::time::Duration;

/// Errors produced by the pipeline steps and event handlers.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Network or HTTP failure talking to the search API
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    /// Body is not UTF-8 JSON
    #[error("failed to decode JSON from {source_name}: {reason}")]
    Decode { source_name: String, reason: String },

    /// Expected key or array missing from the decoded document
    #[error("schema error in {source_name}: {reason}")]
    Schema { source_name: String, reason: String },

    /// A record lacks one of the required columns
    #[error("record {index} in {source_name} is missing required field '{field}'")]
    MissingField {
        source_name: String,
        index: usize,
        field: String,
    },

    /// Write, copy, move or read failure against object storage
    #[error("storage error on {location}: {reason}")]
    Storage { location: String, reason: String },

    /// Existence was never observed within the bound
    #[error("{location} did not appear within {timeout:?} ({polls} polls)")]
    Timeout {
        location: String,
        timeout: Duration,
        polls: u32,
    },

    /// Warehouse rejected the bulk load
    #[error("bulk load of {location} into {table} failed: {reason}")]
    Load {
        location: String,
        table: String,
        reason: String,
    },

    /// Wait was cancelled before the artifact appeared
    #[error("wait for {location} was cancelled")]
    Cancelled { location: String },

    #[error("configuration error: {0}")]
    Config(String),
}

/// Stable, payload-free discriminant of [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Request,
    Decode,
    Schema,
    MissingField,
    Storage,
    Timeout,
    Load,
    Cancelled,
    Config,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Request { .. } => ErrorKind::Request,
            Self::Decode { .. } => ErrorKind::Decode,
            Self::Schema { .. } => ErrorKind::Schema,
            Self::MissingField { .. } => ErrorKind::MissingField,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Load { .. } => ErrorKind::Load,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    pub fn storage(location: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        Self::Storage {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Find the [`ErrorKind`] carried by a report, if any.
///
/// Looks through the whole cause chain so context added with
/// `.with_context(..)` does not hide the kind.
pub fn kind_of(report: &eyre::Report) -> Option<ErrorKind> {
    report
        .chain()
        .find_map(|cause| cause.downcast_ref::<PipelineError>())
        .map(PipelineError::kind)
}
