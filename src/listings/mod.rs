//! Real-estate listing records and the steps that move them
//!
//! Main chain steps:
//! - [`ListingsExtractor`]: one search request, written to the staging directory
//! - [`Stager`]: moves the raw file into the ingest bucket
//!
//! Transform stages, composed into an [`crate::etl::Pipeline`] by the transform handler:
//! - [`ResultsReader`]: raw JSON artifact to [`RawRecord`]s
//! - [`ColumnProjector`]: [`RawRecord`] to [`ProjectedRecord`]
//! - [`CsvArtifactWriter`]: [`ProjectedRecord`]s to a CSV artifact

mod extractor;
mod projector;
mod reader;
mod stager;
mod writer;

pub use extractor::{Extraction, ListingsExtractor};
pub use projector::ColumnProjector;
pub use reader::ResultsReader;
pub use stager::Stager;
pub use writer::CsvArtifactWriter;

use serde_json::{Map, Value};

/// Columns kept from each listing, in output order
pub const COLUMNS: [&str; 11] = [
    "bathrooms",
    "bedrooms",
    "city",
    "daysOnZillow",
    "homeStatus",
    "homeType",
    "livingArea",
    "price",
    "rentZestimate",
    "streetAddress",
    "zipcode",
];

/// One listing exactly as the search API returned it
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Position in the `results` array
    pub index: usize,
    pub fields: Map<String, Value>,
}

impl RawRecord {
    pub fn new(index: usize, fields: Map<String, Value>) -> Self {
        Self { index, fields }
    }
}

/// A listing narrowed to [`COLUMNS`], values in column order
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedRecord {
    values: Vec<Value>,
}

impl ProjectedRecord {
    pub(crate) fn new(values: Vec<Value>) -> Self {
        debug_assert_eq!(values.len(), COLUMNS.len());
        Self { values }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        COLUMNS
            .iter()
            .position(|c| *c == column)
            .and_then(|i| self.values.get(i))
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Render each value as a CSV cell
    ///
    /// Strings are written verbatim, numbers and booleans in their JSON form,
    /// `null` as an empty cell, nested values as compact JSON.
    pub fn cells(&self) -> Vec<String> {
        self.values.iter().map(cell).collect()
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        nested => nested.to_string(),
    }
}
