//! Pipeline configuration
//!
//! Configuration is read from a YAML file and then overridden by environment
//! variables (usually sourced from a `.env` file by the CLI). Every field has a
//! default matching the production deployment, so an empty or missing file is
//! a valid configuration.
//!
//! Example `pipeline.yml`:
//! ```yaml
//! api:
//!   url: https://zillow56.p.rapidapi.com/search
//!   location: houston, tx
//!   credentials: config_api.json
//! staging_dir: /tmp/zillow
//! store:
//!   backend: s3
//! buckets:
//!   ingest: zillow-etl
//!   transform: zillow-transform-from-json-to-csv
//!   archive: zillow-copy-of-raw-json-bucket
//! gate:
//!   interval: 5
//!   timeout: 60
//! retry:
//!   retries: 2
//!   delay: 45
//! warehouse:
//!   backend: redshift
//!   schema: PUBLIC
//!   table: zillowdata
//! ```

use crate::error::PipelineError;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub api: ApiConfig,
    /// Local directory the extractor writes raw responses into
    pub staging_dir: PathBuf,
    pub store: StoreConfig,
    pub buckets: Buckets,
    pub gate: GateConfig,
    pub retry: RetryPolicy,
    pub warehouse: WarehouseConfig,
    pub schedule: ScheduleConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            staging_dir: PathBuf::from("staging"),
            store: StoreConfig::default(),
            buckets: Buckets::default(),
            gate: GateConfig::default(),
            retry: RetryPolicy::default(),
            warehouse: WarehouseConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

/// Search API endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub url: String,
    /// Value of the `location` query parameter
    pub location: String,
    /// JSON file holding the static auth headers
    pub credentials: PathBuf,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: "https://zillow56.p.rapidapi.com/search".to_string(),
            location: "houston, tx".to_string(),
            credentials: PathBuf::from("config_api.json"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Buckets are directories under `store.root`
    #[default]
    Local,
    S3,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Root directory for the local backend
    pub root: PathBuf,
    /// AWS region override for the S3 backend
    pub region: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Local,
            root: PathBuf::from("buckets"),
            region: None,
        }
    }
}

/// Bucket names used by the pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Buckets {
    /// Raw JSON lands here; watched by the transform and replicate handlers
    pub ingest: String,
    /// CSV output of the transform handler; watched by the existence gate
    pub transform: String,
    /// Byte-for-byte copies of raw JSON
    pub archive: String,
}

impl Default for Buckets {
    fn default() -> Self {
        Self {
            ingest: "zillow-etl".to_string(),
            transform: "zillow-transform-from-json-to-csv".to_string(),
            archive: "zillow-copy-of-raw-json-bucket".to_string(),
        }
    }
}

/// Existence gate polling bounds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GateConfig {
    #[serde(with = "seconds")]
    pub interval: Duration,
    #[serde(with = "seconds")]
    pub timeout: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(60),
        }
    }
}

impl GateConfig {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Upper bound on the number of existence probes one wait can make
    pub fn max_polls(&self) -> u32 {
        if self.interval.is_zero() {
            return 1;
        }
        let steps = self.timeout.as_secs_f64() / self.interval.as_secs_f64();
        steps.ceil() as u32 + 1
    }
}

/// Fixed retry policy applied to main-chain steps
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure
    pub retries: u32,
    #[serde(with = "seconds")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            delay: Duration::from_secs(45),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WarehouseBackend {
    /// Tables are CSV files under `warehouse.root`
    #[default]
    Local,
    Redshift,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WarehouseConfig {
    pub backend: WarehouseBackend,
    pub schema: String,
    pub table: String,
    /// Header lines skipped by the bulk load
    pub ignore_header: u32,
    /// Root directory for the local backend
    pub root: PathBuf,
    pub redshift: RedshiftConfig,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            backend: WarehouseBackend::Local,
            schema: "PUBLIC".to_string(),
            table: "zillowdata".to_string(),
            ignore_header: 1,
            root: PathBuf::from("warehouse"),
            redshift: RedshiftConfig::default(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RedshiftConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// IAM role the cluster assumes to read from S3
    pub iam_role: String,
    /// Region of the source bucket, when it differs from the cluster's
    pub region: Option<String>,
}

impl Default for RedshiftConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5439,
            user: "awsuser".to_string(),
            password: String::new(),
            database: "dev".to_string(),
            iam_role: String::new(),
            region: None,
        }
    }
}

impl std::fmt::Debug for RedshiftConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedshiftConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("iam_role", &self.iam_role)
            .field("region", &self.region)
            .finish()
    }
}

/// Cadence of the built-in scheduler
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScheduleConfig {
    #[serde(with = "seconds")]
    pub every: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            every: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl PipelineConfig {
    /// Read configuration from a YAML file, falling back to defaults when it doesn't exist
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply environment variable overrides
    ///
    /// Recognized variables:
    /// - ZILLOW_API_URL, ZILLOW_LOCATION, ZILLOW_CREDENTIALS
    /// - ZILLOW_STAGING_DIR
    /// - ZILLOW_STORE (local|s3), ZILLOW_STORE_ROOT, AWS_REGION
    /// - ZILLOW_INGEST_BUCKET, ZILLOW_TRANSFORM_BUCKET, ZILLOW_ARCHIVE_BUCKET
    /// - ZILLOW_WAREHOUSE (local|redshift), ZILLOW_WAREHOUSE_ROOT
    /// - REDSHIFT_HOST, REDSHIFT_PORT, REDSHIFT_USER, REDSHIFT_PASSWORD,
    ///   REDSHIFT_DATABASE, REDSHIFT_IAM_ROLE
    pub fn apply_env(mut self) -> Result<Self> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        if let Some(url) = var("ZILLOW_API_URL") {
            self.api.url = url;
        }
        if let Some(location) = var("ZILLOW_LOCATION") {
            self.api.location = location;
        }
        if let Some(credentials) = var("ZILLOW_CREDENTIALS") {
            self.api.credentials = PathBuf::from(credentials);
        }
        if let Some(dir) = var("ZILLOW_STAGING_DIR") {
            self.staging_dir = PathBuf::from(dir);
        }
        if let Some(backend) = var("ZILLOW_STORE") {
            self.store.backend = match backend.to_lowercase().as_str() {
                "local" => StoreBackend::Local,
                "s3" => StoreBackend::S3,
                other => {
                    return Err(PipelineError::Config(format!(
                        "ZILLOW_STORE must be 'local' or 's3', got '{}'",
                        other
                    ))
                    .into());
                }
            };
        }
        if let Some(root) = var("ZILLOW_STORE_ROOT") {
            self.store.root = PathBuf::from(root);
        }
        if let Some(region) = var("AWS_REGION") {
            self.store.region = Some(region);
        }
        if let Some(bucket) = var("ZILLOW_INGEST_BUCKET") {
            self.buckets.ingest = bucket;
        }
        if let Some(bucket) = var("ZILLOW_TRANSFORM_BUCKET") {
            self.buckets.transform = bucket;
        }
        if let Some(bucket) = var("ZILLOW_ARCHIVE_BUCKET") {
            self.buckets.archive = bucket;
        }
        if let Some(backend) = var("ZILLOW_WAREHOUSE") {
            self.warehouse.backend = match backend.to_lowercase().as_str() {
                "local" => WarehouseBackend::Local,
                "redshift" => WarehouseBackend::Redshift,
                other => {
                    return Err(PipelineError::Config(format!(
                        "ZILLOW_WAREHOUSE must be 'local' or 'redshift', got '{}'",
                        other
                    ))
                    .into());
                }
            };
        }
        if let Some(root) = var("ZILLOW_WAREHOUSE_ROOT") {
            self.warehouse.root = PathBuf::from(root);
        }

        let redshift = &mut self.warehouse.redshift;
        if let Some(host) = var("REDSHIFT_HOST") {
            redshift.host = host;
        }
        if let Some(port) = var("REDSHIFT_PORT") {
            redshift.port = port
                .parse()
                .map_err(|_| PipelineError::Config(format!("Invalid REDSHIFT_PORT: {}", port)))?;
        }
        if let Some(user) = var("REDSHIFT_USER") {
            redshift.user = user;
        }
        if let Some(password) = var("REDSHIFT_PASSWORD") {
            redshift.password = password;
        }
        if let Some(database) = var("REDSHIFT_DATABASE") {
            redshift.database = database;
        }
        if let Some(role) = var("REDSHIFT_IAM_ROLE") {
            redshift.iam_role = role;
        }

        Ok(self)
    }

    /// Check cross-field constraints that serde can't express
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.api.url)
            .map_err(|e| PipelineError::Config(format!("Invalid API url '{}': {}", self.api.url, e)))?;

        for (name, bucket) in [
            ("ingest", &self.buckets.ingest),
            ("transform", &self.buckets.transform),
            ("archive", &self.buckets.archive),
        ] {
            if bucket.trim().is_empty() {
                return Err(PipelineError::Config(format!("{} bucket name is empty", name)).into());
            }
        }
        if self.buckets.ingest == self.buckets.archive {
            return Err(PipelineError::Config(
                "archive bucket must differ from the ingest bucket".to_string(),
            )
            .into());
        }
        if self.gate.interval.is_zero() {
            return Err(PipelineError::Config("gate interval must be positive".to_string()).into());
        }
        if self.warehouse.backend == WarehouseBackend::Redshift
            && self.store.backend != StoreBackend::S3
        {
            return Err(PipelineError::Config(
                "the redshift warehouse can only load from the s3 store".to_string(),
            )
            .into());
        }
        Ok(())
    }
}

/// (De)serialize a [`Duration`] as a number of seconds
mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
