//! CSV artifact writer

use super::{COLUMNS, ProjectedRecord};
use crate::error::PipelineError;
use crate::etl::Loader;
use crate::storage::{ObjectLocation, ObjectStore};
use eyre::Result;
use std::sync::Arc;

/// Loader that serializes projected records as one CSV object
///
/// The header row is always written, so an empty batch still produces a
/// valid artifact. The object is written in a single `put`, replacing any
/// previous version of the key.
pub struct CsvArtifactWriter {
    store: Arc<dyn ObjectStore>,
    location: ObjectLocation,
}

impl CsvArtifactWriter {
    pub fn new(store: Arc<dyn ObjectStore>, location: ObjectLocation) -> Self {
        Self { store, location }
    }

    pub fn location(&self) -> &ObjectLocation {
        &self.location
    }

    /// Serialize records to CSV bytes with a header row
    pub fn to_csv(records: &[ProjectedRecord]) -> Result<Vec<u8>> {
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());

        writer.write_record(COLUMNS)?;
        for record in records {
            writer.write_record(record.cells())?;
        }

        writer
            .into_inner()
            .map_err(|e| eyre::eyre!("Failed to flush CSV buffer: {}", e))
    }
}

impl Loader for CsvArtifactWriter {
    type Item = ProjectedRecord;

    async fn load(&self, items: Vec<Self::Item>) -> Result<usize> {
        let body = Self::to_csv(&items)
            .map_err(|e| PipelineError::storage(&self.location, format!("CSV encoding failed: {}", e)))?;
        self.store.put(&self.location, body).await?;
        Ok(items.len())
    }
}
