//! Warehouse bulk loading
//!
//! The last step of the main chain: copy a confirmed CSV artifact into a
//! warehouse table. The warehouse does the reading itself (load-from-object),
//! so the pipeline never streams rows through this process.

mod local;
mod redshift;

pub use local::LocalWarehouse;
pub use redshift::RedshiftWarehouse;

use crate::error::PipelineError;
use crate::storage::{ObjectLocation, ObjectStore};
use async_trait::async_trait;
use eyre::Result;
use regex::Regex;
use std::sync::{Arc, LazyLock};

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").expect("identifier pattern is valid")
});

/// Fully qualified target table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    /// # Errors
    /// Returns a `Config` error if either part is not a plain SQL identifier
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Result<Self> {
        let schema = schema.into();
        let table = table.into();
        for part in [&schema, &table] {
            if !IDENTIFIER.is_match(part) {
                return Err(PipelineError::Config(format!("Invalid SQL identifier '{}'", part)).into());
            }
        }
        Ok(Self { schema, table })
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Format options of a bulk load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOptions {
    /// Leading lines of the object to skip
    pub ignore_header: u32,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self { ignore_header: 1 }
    }
}

impl CopyOptions {
    /// Render as warehouse COPY options, e.g. `csv IGNOREHEADER 1`
    pub fn to_sql(&self) -> String {
        if self.ignore_header == 0 {
            "csv".to_string()
        } else {
            format!("csv IGNOREHEADER {}", self.ignore_header)
        }
    }
}

/// Warehouse-native load-from-object operation
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Load every row of `source` into `table`; returns rows loaded when known
    ///
    /// The load is atomic: on error no rows from `source` are visible.
    async fn copy_from(
        &self,
        source: &ObjectLocation,
        table: &TableRef,
        options: &CopyOptions,
    ) -> Result<u64>;

    fn describe(&self) -> String;
}

/// Main-chain load step
///
/// Re-checks that the CSV artifact exists before asking the warehouse to
/// load it; loading a missing object is an error, never a no-op.
pub struct WarehouseLoader {
    store: Arc<dyn ObjectStore>,
    warehouse: Arc<dyn Warehouse>,
    table: TableRef,
    options: CopyOptions,
}

impl WarehouseLoader {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        warehouse: Arc<dyn Warehouse>,
        table: TableRef,
        options: CopyOptions,
    ) -> Self {
        Self {
            store,
            warehouse,
            table,
            options,
        }
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    /// Bulk-load `artifact` into the configured table
    ///
    /// # Errors
    /// - `Load` if the artifact is missing or the warehouse rejects it
    pub async fn load(&self, artifact: &ObjectLocation) -> Result<u64> {
        let load_error = |reason: String| PipelineError::Load {
            location: artifact.to_string(),
            table: self.table.to_string(),
            reason,
        };

        let exists = self
            .store
            .exists(artifact)
            .await
            .map_err(|e| load_error(format!("{:#}", e)))?;
        if !exists {
            return Err(load_error("object does not exist".to_string()).into());
        }

        log::info!(
            "Loading {} into {} via {} ({})",
            artifact,
            self.table,
            self.warehouse.describe(),
            self.options.to_sql()
        );
        let rows = self
            .warehouse
            .copy_from(artifact, &self.table, &self.options)
            .await
            .map_err(|e| load_error(format!("{:#}", e)))?;
        log::info!("Loaded {} row(s) into {}", rows, self.table);
        Ok(rows)
    }
}
