//! JSON-to-CSV transform handler

use crate::etl::Pipeline;
use crate::listings::{ColumnProjector, CsvArtifactWriter, ResultsReader};
use crate::run_context::csv_key_for;
use crate::storage::{ExistenceGate, ObjectCreated, ObjectLocation, ObjectStore};
use eyre::Result;
use std::sync::Arc;

/// Outcome of one transform event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutcome {
    /// CSV written with this many data rows
    Written { location: ObjectLocation, rows: usize },
    /// Key is not a JSON artifact
    Skipped,
}

/// Converts each new raw artifact into a CSV artifact in the transform bucket
///
/// The output key is derived from the input key, and the output bytes only
/// depend on the input bytes, so re-delivered events overwrite the same
/// object with the same content.
#[derive(Clone)]
pub struct TransformHandler {
    store: Arc<dyn ObjectStore>,
    transform_bucket: String,
    gate: ExistenceGate,
}

impl TransformHandler {
    pub fn new(store: Arc<dyn ObjectStore>, transform_bucket: impl Into<String>, gate: ExistenceGate) -> Self {
        Self {
            store,
            transform_bucket: transform_bucket.into(),
            gate,
        }
    }

    pub async fn handle(&self, event: &ObjectCreated) -> Result<TransformOutcome> {
        let source = &event.location;
        let Some(csv_key) = csv_key_for(&source.key) else {
            log::info!("Skipping {}: not a JSON artifact", source);
            return Ok(TransformOutcome::Skipped);
        };
        let target = ObjectLocation::new(&self.transform_bucket, csv_key);

        let pipeline = Pipeline::new(
            ResultsReader::new(self.store.clone(), self.gate.clone(), source.clone()),
            ColumnProjector::new(source.to_string()),
            CsvArtifactWriter::new(self.store.clone(), target.clone()),
        );
        let rows = pipeline.run().await?;

        log::info!("Transformed {} into {} ({} row(s))", source, target, rows);
        Ok(TransformOutcome::Written { location: target, rows })
    }
}
