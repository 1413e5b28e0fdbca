//! Existence gate
//!
//! A bounded fixed-interval poll that waits for an object to become visible.
//! Object stores are eventually consistent, so a writer's `put` can succeed
//! before a reader's `exists` observes it; every step that depends on another
//! step's output waits here first.

use super::{ObjectLocation, ObjectStore};
use crate::config::GateConfig;
use crate::error::PipelineError;
use eyre::Result;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Polls a store until an object exists, the timeout elapses, or the wait is cancelled.
///
/// # Example
/// ```no_run
/// use zillow_etl::config::GateConfig;
/// use zillow_etl::storage::{ExistenceGate, LocalObjectStore, ObjectLocation};
///
/// # async fn example() -> eyre::Result<()> {
/// let store = LocalObjectStore::new("buckets")?;
/// let gate = ExistenceGate::new(GateConfig::default());
/// let csv = ObjectLocation::new("zillow-transform-from-json-to-csv", "response_data_01082023101500.csv");
/// let polls = gate.wait(&store, &csv).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ExistenceGate {
    config: GateConfig,
    cancel: CancellationToken,
}

impl ExistenceGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Tie this gate to a cancellation token shared with the caller
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Wait for `location` to exist
    ///
    /// The first probe is immediate, then one probe per interval until the
    /// deadline. Returns the number of probes made.
    ///
    /// # Errors
    /// - `Timeout` when the object never appears within the bound
    /// - `Cancelled` when the token fires first
    /// - `Storage` when a probe itself fails
    pub async fn wait(&self, store: &dyn ObjectStore, location: &ObjectLocation) -> Result<u32> {
        let deadline = Instant::now() + self.config.timeout;
        let mut polls = 0u32;

        loop {
            polls += 1;
            if store.exists(location).await? {
                log::debug!("{} visible after {} poll(s)", location, polls);
                return Ok(polls);
            }

            let now = Instant::now();
            if now >= deadline {
                log::warn!(
                    "{} not visible after {:?} ({} polls)",
                    location,
                    self.config.timeout,
                    polls
                );
                return Err(PipelineError::Timeout {
                    location: location.to_string(),
                    timeout: self.config.timeout,
                    polls,
                }
                .into());
            }

            let next = (now + self.config.interval).min(deadline);
            log::trace!("{} not visible yet (poll {}), sleeping", location, polls);
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(PipelineError::Cancelled {
                        location: location.to_string(),
                    }
                    .into());
                }
                _ = tokio::time::sleep_until(next) => {}
            }
        }
    }
}
