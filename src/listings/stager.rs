//! Moves raw responses from the staging directory into the ingest bucket

use super::Extraction;
use crate::error::PipelineError;
use crate::storage::{ObjectLocation, ObjectStore};
use eyre::Result;
use std::path::Path;
use std::sync::Arc;

/// Move (not copy) of a local file into a bucket
///
/// The local file is removed only after the upload succeeded. A failed upload
/// leaves the file in place; no partial-move recovery is attempted.
pub struct Stager {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl Stager {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// Stage an extraction under its JSON name
    pub async fn stage(&self, extraction: &Extraction) -> Result<ObjectLocation> {
        self.move_file(&extraction.raw_path, &extraction.json_name)
            .await
    }

    /// Move `path` into the bucket under `key`
    ///
    /// # Errors
    /// - `Storage` if the file can't be read, uploaded or removed
    pub async fn move_file(&self, path: &Path, key: &str) -> Result<ObjectLocation> {
        let target = ObjectLocation::new(&self.bucket, key);

        let body = tokio::fs::read(path)
            .await
            .map_err(|e| PipelineError::storage(path.display(), e))?;
        let size = body.len();
        self.store.put(&target, body).await?;

        tokio::fs::remove_file(path)
            .await
            .map_err(|e| PipelineError::storage(path.display(), e))?;

        log::info!("Moved {} ({} bytes) to {}", path.display(), size, target);
        Ok(target)
    }
}
