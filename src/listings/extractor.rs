//! Search API extractor
//!
//! Makes the single search request of a run and writes the full response to
//! the local staging directory.

use crate::client::SearchClient;
use crate::error::PipelineError;
use crate::run_context::RunContext;
use eyre::Result;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// What the extract step hands to the rest of the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Local file holding the raw response
    pub raw_path: PathBuf,
    /// Name the raw artifact is staged under
    pub json_name: String,
    /// Name the transform handler will give the CSV
    pub csv_name: String,
}

/// Extractor for one page of listing search results
///
/// # Example
/// ```no_run
/// use zillow_etl::client::{ApiCredentials, SearchClient};
/// use zillow_etl::listings::ListingsExtractor;
/// use zillow_etl::run_context::RunContext;
/// use url::Url;
///
/// # async fn example() -> eyre::Result<()> {
/// let url = Url::parse("https://zillow56.p.rapidapi.com/search")?;
/// let client = SearchClient::try_new(url, ApiCredentials::read("config_api.json")?)?;
/// let extractor = ListingsExtractor::new(client, "houston, tx", "/tmp/zillow");
///
/// let extraction = extractor.extract(&RunContext::now()).await?;
/// println!("{} -> {}", extraction.raw_path.display(), extraction.csv_name);
/// # Ok(())
/// # }
/// ```
pub struct ListingsExtractor {
    client: SearchClient,
    location: String,
    staging_dir: PathBuf,
}

impl ListingsExtractor {
    /// Create a new extractor
    ///
    /// # Arguments
    /// * `client` - Search API client
    /// * `location` - Value of the `location` query parameter
    /// * `staging_dir` - Directory raw responses are written to
    pub fn new(
        client: SearchClient,
        location: impl Into<String>,
        staging_dir: impl AsRef<Path>,
    ) -> Self {
        Self {
            client,
            location: location.into(),
            staging_dir: staging_dir.as_ref().to_path_buf(),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Fetch the listings and write them to `<staging_dir>/<json name>`
    ///
    /// # Errors
    /// - `Request` when the API call fails
    /// - `Decode` when the body is not JSON
    /// - `Storage` when the file can't be written
    pub async fn extract(&self, ctx: &RunContext) -> Result<Extraction> {
        log::info!("Searching {} for '{}'", self.client, self.location);
        let response = self.client.search(&self.location).await?;

        if let Some(count) = response.get("results").and_then(Value::as_array).map(Vec::len) {
            log::info!("Fetched {} listing(s)", count);
        }

        let json_name = ctx.json_name();
        let raw_path = self.staging_dir.join(&json_name);
        write_pretty(&raw_path, &response).await?;
        log::debug!("Wrote raw response to {}", raw_path.display());

        Ok(Extraction {
            raw_path,
            json_name,
            csv_name: ctx.csv_name(),
        })
    }
}

/// Write a JSON value with four-space indentation
async fn write_pretty(path: &Path, value: &Value) -> Result<()> {
    let mut body = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut body, formatter);
    value
        .serialize(&mut serializer)
        .map_err(|e| PipelineError::storage(path.display(), e))?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PipelineError::storage(parent.display(), e))?;
    }
    tokio::fs::write(path, body)
        .await
        .map_err(|e| PipelineError::storage(path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_pretty_uses_four_spaces() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/response_data_01082023101500.json");

        write_pretty(&path, &json!({"results": [{"city": "Houston"}]}))
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\n    \"results\": ["));
        assert!(content.contains("\n            \"city\": \"Houston\""));
        let reparsed: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(reparsed, json!({"results": [{"city": "Houston"}]}));
    }
}
