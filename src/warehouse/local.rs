//! File-backed warehouse for local runs and tests

use super::{CopyOptions, TableRef, Warehouse};
use crate::storage::{ObjectLocation, ObjectStore};
use async_trait::async_trait;
use eyre::{Context, Result, eyre};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Warehouse that keeps each table as one headerless CSV file
///
/// Tables live at `<root>/<schema>/<table>.csv`. A load parses the whole
/// source object first and only then rewrites the table file, so a malformed
/// source leaves the table untouched.
pub struct LocalWarehouse {
    root: PathBuf,
    store: Arc<dyn ObjectStore>,
    lock: Mutex<()>,
}

impl LocalWarehouse {
    pub fn new(root: impl Into<PathBuf>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            root: root.into(),
            store,
            lock: Mutex::new(()),
        }
    }

    pub fn table_path(&self, table: &TableRef) -> PathBuf {
        self.root.join(&table.schema).join(format!("{}.csv", table.table))
    }

    /// All rows currently in `table`
    pub async fn rows(&self, table: &TableRef) -> Result<Vec<Vec<String>>> {
        let path = self.table_path(table);
        match tokio::fs::read(&path).await {
            Ok(body) => parse_rows(&body, 0),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read table file {}", path.display())),
        }
    }
}

fn parse_rows(body: &[u8], skip: u32) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(false)
        .from_reader(body);

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.context("Malformed CSV")?;
        if (line as u64) < u64::from(skip) {
            continue;
        }
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

fn to_csv(rows: &[Vec<String>]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    for row in rows {
        writer.write_record(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| eyre!("Failed to flush CSV buffer: {}", e))
}

async fn replace_file(path: &Path, body: Vec<u8>) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let partial = path.with_extension("csv.part");
    tokio::fs::write(&partial, body)
        .await
        .with_context(|| format!("Failed to write {}", partial.display()))?;
    tokio::fs::rename(&partial, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

#[async_trait]
impl Warehouse for LocalWarehouse {
    async fn copy_from(
        &self,
        source: &ObjectLocation,
        table: &TableRef,
        options: &CopyOptions,
    ) -> Result<u64> {
        let body = self.store.get(source).await?;
        let incoming = parse_rows(&body, options.ignore_header)
            .with_context(|| format!("Failed to parse {}", source))?;

        let _guard = self.lock.lock().await;
        let mut rows = self.rows(table).await?;

        if let (Some(existing), Some(new)) = (rows.first(), incoming.first())
            && existing.len() != new.len()
        {
            return Err(eyre!(
                "{} has {} column(s) but {} has {}",
                table,
                existing.len(),
                source,
                new.len()
            ));
        }

        let loaded = incoming.len() as u64;
        rows.extend(incoming);
        replace_file(&self.table_path(table), to_csv(&rows)?).await?;
        log::debug!("Appended {} row(s) to {}", loaded, self.table_path(table).display());
        Ok(loaded)
    }

    fn describe(&self) -> String {
        format!("local warehouse at {}", self.root.display())
    }
}
