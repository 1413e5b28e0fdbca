//! Storage write events
//!
//! Handlers react to object-created events. In AWS those arrive as S3 event
//! notifications; for the local store the [`BucketWatcher`] produces the same
//! events by polling a bucket listing.

use super::{ObjectLocation, ObjectStore};
use crate::error::PipelineError;
use eyre::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One object-created event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectCreated {
    pub location: ObjectLocation,
}

impl ObjectCreated {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            location: ObjectLocation::new(bucket, key),
        }
    }
}

/// S3 event notification payload
///
/// Only the fields the handlers need are modelled:
/// ```json
/// {"Records": [{"eventName": "ObjectCreated:Put",
///               "s3": {"bucket": {"name": "zillow-etl"},
///                      "object": {"key": "response_data_01082023101500.json"}}}]}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct S3Event {
    #[serde(rename = "Records", default)]
    pub records: Vec<S3EventRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3EventRecord {
    #[serde(rename = "eventName", default)]
    pub event_name: Option<String>,
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Object {
    pub key: String,
}

impl S3Event {
    pub fn from_json(body: &str) -> Result<Self> {
        let event = serde_json::from_str(body).map_err(|e| PipelineError::Decode {
            source_name: "S3 event".to_string(),
            reason: e.to_string(),
        })?;
        Ok(event)
    }

    /// Object-created events carried by this notification
    ///
    /// Keys arrive form-url-encoded (spaces as `+`) and are decoded here.
    /// Records for other event types are skipped.
    pub fn object_created(&self) -> Vec<ObjectCreated> {
        self.records
            .iter()
            .filter(|record| {
                record
                    .event_name
                    .as_deref()
                    .is_none_or(|name| name.starts_with("ObjectCreated"))
            })
            .map(|record| ObjectCreated::new(&record.s3.bucket.name, decode_key(&record.s3.object.key)))
            .collect()
    }
}

fn decode_key(key: &str) -> String {
    url::form_urlencoded::parse(key.as_bytes())
        .next()
        .map(|(decoded, _)| decoded.into_owned())
        .unwrap_or_else(|| key.to_string())
}

/// Polls a bucket listing and reports keys that were not there before.
///
/// Keys present when the watcher starts are treated as already handled unless
/// [`BucketWatcher::include_existing`] is set.
pub struct BucketWatcher {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    interval: Duration,
    seen: HashSet<String>,
    include_existing: bool,
    primed: bool,
}

impl BucketWatcher {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, interval: Duration) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            interval,
            seen: HashSet::new(),
            include_existing: false,
            primed: false,
        }
    }

    /// Report keys already in the bucket on the first poll
    pub fn include_existing(mut self, include: bool) -> Self {
        self.include_existing = include;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// List the bucket once and return new keys in sorted order
    pub async fn poll(&mut self) -> Result<Vec<ObjectCreated>> {
        let keys = self
            .store
            .list(&self.bucket)
            .await
            .with_context(|| format!("Failed to list bucket {}", self.bucket))?;

        let report = self.primed || self.include_existing;
        self.primed = true;

        let mut created = Vec::new();
        for key in keys {
            if self.seen.insert(key.clone()) && report {
                created.push(ObjectCreated::new(&self.bucket, key));
            }
        }
        Ok(created)
    }

    /// Mark the keys currently in the bucket as handled without reporting them
    pub async fn prime(&mut self) -> Result<()> {
        if !self.primed && !self.include_existing {
            self.poll().await?;
        }
        Ok(())
    }

    /// Poll until cancelled, passing each batch of new keys to `on_created`
    ///
    /// A failed listing is logged and retried on the next interval.
    pub async fn run<F, Fut>(&mut self, cancel: CancellationToken, mut on_created: F) -> Result<()>
    where
        F: FnMut(Vec<ObjectCreated>) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        log::info!("Watching bucket {} every {:?}", self.bucket, self.interval);
        loop {
            match self.poll().await {
                Ok(created) if !created.is_empty() => {
                    log::debug!("{} new object(s) in {}", created.len(), self.bucket);
                    on_created(created).await;
                }
                Ok(_) => {}
                Err(e) => log::warn!("{:#}", e),
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    log::debug!("Stopped watching {}", self.bucket);
                    return Ok(());
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
