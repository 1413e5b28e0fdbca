//! Column projection

use super::{COLUMNS, ProjectedRecord, RawRecord};
use crate::error::PipelineError;
use crate::etl::Transformer;
use eyre::Result;

/// Narrows raw listings to the fixed [`COLUMNS`] set
///
/// Output order follows [`COLUMNS`] regardless of input field order. A record
/// without one of the columns fails the whole batch; a column present with a
/// `null` value is kept as null.
///
/// # Example
/// ```
/// use zillow_etl::etl::Transformer;
/// use zillow_etl::listings::{ColumnProjector, RawRecord};
/// use serde_json::json;
///
/// let projector = ColumnProjector::new("zillow-etl/response_data_01082023101500.json");
/// let fields = json!({"city": "Houston"}).as_object().unwrap().clone();
///
/// // Every column is required
/// assert!(projector.transform(RawRecord::new(0, fields)).is_err());
/// ```
pub struct ColumnProjector {
    source_name: String,
}

impl ColumnProjector {
    /// Create a projector for records read from `source_name`
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
        }
    }
}

impl Transformer for ColumnProjector {
    type Input = RawRecord;
    type Output = ProjectedRecord;

    fn transform(&self, mut input: Self::Input) -> Result<Self::Output> {
        let mut values = Vec::with_capacity(COLUMNS.len());
        for column in COLUMNS {
            let value = input.fields.remove(column).ok_or_else(|| PipelineError::MissingField {
                source_name: self.source_name.clone(),
                index: input.index,
                field: column.to_string(),
            })?;
            values.push(value);
        }
        Ok(ProjectedRecord::new(values))
    }
}
