//! Reads listing records out of a raw JSON artifact

use super::RawRecord;
use crate::error::PipelineError;
use crate::etl::Extractor;
use crate::storage::{ExistenceGate, ObjectLocation, ObjectStore};
use eyre::Result;
use serde_json::Value;
use std::sync::Arc;

/// Extractor over the `results` array of a raw search response in storage
///
/// Waits for the artifact to be visible before reading it, since it is
/// normally invoked right after the write event fired.
pub struct ResultsReader {
    store: Arc<dyn ObjectStore>,
    gate: ExistenceGate,
    location: ObjectLocation,
}

impl ResultsReader {
    pub fn new(store: Arc<dyn ObjectStore>, gate: ExistenceGate, location: ObjectLocation) -> Self {
        Self {
            store,
            gate,
            location,
        }
    }

    /// Split a decoded response into raw records
    ///
    /// # Errors
    /// - `Schema` if `results` is missing, not an array, or holds a non-object
    pub fn records(&self, document: Value) -> Result<Vec<RawRecord>> {
        let source_name = self.location.to_string();
        let Value::Object(mut document) = document else {
            return Err(PipelineError::Schema {
                source_name,
                reason: "top-level value is not an object".to_string(),
            }
            .into());
        };

        let results = match document.remove("results") {
            Some(Value::Array(results)) => results,
            Some(other) => {
                return Err(PipelineError::Schema {
                    source_name,
                    reason: format!("'results' is {}, expected an array", type_name(&other)),
                }
                .into());
            }
            None => {
                return Err(PipelineError::Schema {
                    source_name,
                    reason: "missing 'results' key".to_string(),
                }
                .into());
            }
        };

        results
            .into_iter()
            .enumerate()
            .map(|(index, item)| match item {
                Value::Object(fields) => Ok(RawRecord::new(index, fields)),
                other => Err(eyre::Report::from(PipelineError::Schema {
                    source_name: source_name.clone(),
                    reason: format!(
                        "results[{}] is {}, expected an object",
                        index,
                        type_name(&other)
                    ),
                })),
            })
            .collect()
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl Extractor for ResultsReader {
    type Item = RawRecord;

    async fn extract(&self) -> Result<Vec<Self::Item>> {
        self.gate.wait(self.store.as_ref(), &self.location).await?;
        let body = self.store.get(&self.location).await?;

        let text = String::from_utf8(body).map_err(|e| PipelineError::Decode {
            source_name: self.location.to_string(),
            reason: e.to_string(),
        })?;
        let document: Value = serde_json::from_str(&text).map_err(|e| PipelineError::Decode {
            source_name: self.location.to_string(),
            reason: e.to_string(),
        })?;

        let records = self.records(document)?;
        log::debug!("Read {} record(s) from {}", records.len(), self.location);
        Ok(records)
    }
}
