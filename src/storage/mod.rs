//! Object storage
//!
//! This module handles every artifact the pipeline reads or writes:
//! - The [`ObjectStore`] abstraction and its local and S3 backends
//! - The existence gate used to wait out eventual consistency
//! - Storage event parsing and the polling bucket watcher

mod events;
mod gate;
mod local;
mod s3;

pub use events::{BucketWatcher, ObjectCreated, S3Event};
pub use gate::ExistenceGate;
pub use local::LocalObjectStore;
pub use s3::S3ObjectStore;

use async_trait::async_trait;
use eyre::Result;

/// Bucket/key address of an object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Same key in another bucket
    pub fn in_bucket(&self, bucket: impl Into<String>) -> Self {
        Self::new(bucket, self.key.clone())
    }
}

impl std::fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Object storage operations consumed by the pipeline
///
/// Implementations must make `put` and `copy` overwrite existing keys so that
/// redelivered events converge on the same result.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write a whole object, replacing any previous content
    async fn put(&self, location: &ObjectLocation, body: Vec<u8>) -> Result<()>;

    /// Read a whole object
    async fn get(&self, location: &ObjectLocation) -> Result<Vec<u8>>;

    /// Whether the object is currently visible
    async fn exists(&self, location: &ObjectLocation) -> Result<bool>;

    /// Server-side copy, replacing the destination if present
    async fn copy(&self, from: &ObjectLocation, to: &ObjectLocation) -> Result<()>;

    /// Remove an object; removing a missing object is not an error
    async fn delete(&self, location: &ObjectLocation) -> Result<()>;

    /// List keys in a bucket, sorted
    async fn list(&self, bucket: &str) -> Result<Vec<String>>;

    /// Human readable description of the backend for logs
    fn describe(&self) -> String;
}
