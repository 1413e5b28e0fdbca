//! Main chain: extract → stage → wait for CSV → load
//!
//! The chain is strictly sequential. Each step is retried a fixed number of
//! times with a fixed delay; a step that still fails ends the run in
//! [`RunState::Failed`] with no compensation for earlier steps.

use crate::config::RetryPolicy;
use crate::error::{ErrorKind, kind_of};
use crate::listings::{Extraction, ListingsExtractor, Stager};
use crate::run_context::RunContext;
use crate::storage::{ExistenceGate, ObjectLocation, ObjectStore};
use crate::warehouse::WarehouseLoader;
use eyre::{Result, eyre};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Steps of the main chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Extract,
    Stage,
    AwaitCsv,
    Load,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Extract => "extract",
            Step::Stage => "stage",
            Step::AwaitCsv => "await-csv",
            Step::Load => "load",
        };
        f.write_str(name)
    }
}

/// Progress of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Extracted,
    Staged,
    CsvVisible,
    Loaded,
    Failed { step: Step },
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Pending => f.write_str("pending"),
            RunState::Extracted => f.write_str("extracted"),
            RunState::Staged => f.write_str("staged"),
            RunState::CsvVisible => f.write_str("csv-visible"),
            RunState::Loaded => f.write_str("loaded"),
            RunState::Failed { step } => write!(f, "failed at {}", step),
        }
    }
}

/// Everything a run produced, up to the step it reached
#[derive(Debug)]
pub struct RunReport {
    pub context: RunContext,
    pub state: RunState,
    pub extraction: Option<Extraction>,
    pub staged: Option<ObjectLocation>,
    pub csv: Option<ObjectLocation>,
    pub rows_loaded: Option<u64>,
    pub error: Option<eyre::Report>,
}

impl RunReport {
    fn new(context: RunContext) -> Self {
        Self {
            context,
            state: RunState::Pending,
            extraction: None,
            staged: None,
            csv: None,
            rows_loaded: None,
            error: None,
        }
    }

    fn advance(&mut self, state: RunState) {
        log::info!("Run {}: {} -> {}", self.context, self.state, state);
        self.state = state;
    }

    fn fail(mut self, step: Step, error: eyre::Report) -> Self {
        log::error!("Run {} failed at {}: {:#}", self.context, step, error);
        self.advance(RunState::Failed { step });
        self.error = Some(error);
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.state == RunState::Loaded
    }

    /// Turn a failed run into its error, keeping the step as context
    pub fn into_result(mut self) -> Result<Self> {
        match (self.state, self.error.take()) {
            (RunState::Failed { step }, Some(error)) => {
                Err(error.wrap_err(format!("Run {} failed at step {}", self.context, step)))
            }
            (RunState::Failed { step }, None) => {
                Err(eyre!("Run {} failed at step {}", self.context, step))
            }
            _ => Ok(self),
        }
    }
}

/// Run `op` until it succeeds or the policy is exhausted
///
/// Cancellation is never retried, and cancels a pending retry delay.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    step: Step,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        if kind_of(&error) == Some(ErrorKind::Cancelled) || attempt >= policy.retries {
            return Err(error);
        }

        attempt += 1;
        log::warn!(
            "Step {} failed ({:#}), retry {}/{} in {:?}",
            step,
            error,
            attempt,
            policy.retries,
            policy.delay
        );
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(error.wrap_err(format!("Cancelled while waiting to retry {}", step)));
            }
            _ = tokio::time::sleep(policy.delay) => {}
        }
    }
}

/// The linear extract → stage → wait → load workflow
pub struct MainChain {
    extractor: ListingsExtractor,
    stager: Stager,
    store: Arc<dyn ObjectStore>,
    gate: ExistenceGate,
    loader: WarehouseLoader,
    transform_bucket: String,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl MainChain {
    pub fn new(
        extractor: ListingsExtractor,
        stager: Stager,
        store: Arc<dyn ObjectStore>,
        gate: ExistenceGate,
        loader: WarehouseLoader,
        transform_bucket: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            extractor,
            stager,
            store,
            gate,
            loader,
            transform_bucket: transform_bucket.into(),
            retry,
            cancel: CancellationToken::new(),
        }
    }

    /// Share a cancellation token with the gate and the retry delays
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.gate = self.gate.with_cancellation(cancel.clone());
        self.cancel = cancel;
        self
    }

    /// Run every step for `ctx`; never returns early with an error
    pub async fn run(&self, ctx: RunContext) -> RunReport {
        let mut report = RunReport::new(ctx);
        let ctx = report.context.clone();
        log::info!("Run {} started", ctx);

        let extraction = match self
            .attempt(Step::Extract, || self.extractor.extract(&ctx))
            .await
        {
            Ok(extraction) => extraction,
            Err(e) => return report.fail(Step::Extract, e),
        };
        report.advance(RunState::Extracted);

        let staged = {
            let extraction = &extraction;
            match self
                .attempt(Step::Stage, || self.stager.stage(extraction))
                .await
            {
                Ok(location) => location,
                Err(e) => {
                    report.extraction = Some(extraction.clone());
                    return report.fail(Step::Stage, e);
                }
            }
        };
        let csv = ObjectLocation::new(&self.transform_bucket, &extraction.csv_name);
        report.extraction = Some(extraction);
        report.staged = Some(staged);
        report.advance(RunState::Staged);

        report.csv = Some(csv.clone());
        if let Err(e) = self
            .attempt(Step::AwaitCsv, || self.gate.wait(self.store.as_ref(), &csv))
            .await
        {
            return report.fail(Step::AwaitCsv, e);
        }
        report.advance(RunState::CsvVisible);

        match self.attempt(Step::Load, || self.loader.load(&csv)).await {
            Ok(rows) => report.rows_loaded = Some(rows),
            Err(e) => return report.fail(Step::Load, e),
        }
        report.advance(RunState::Loaded);
        report
    }

    async fn attempt<T, F, Fut>(&self, step: Step, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        with_retry(&self.retry, &self.cancel, step, op).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ApiCredentials, SearchClient};
    use crate::config::GateConfig;
    use crate::error::PipelineError;
    use crate::storage::LocalObjectStore;
    use crate::warehouse::{CopyOptions, LocalWarehouse, TableRef};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use url::Url;

    const BODY: &str = r#"{"results": [{"bathrooms": 2, "bedrooms": 3, "city": "Houston", "daysOnZillow": 4,
        "homeStatus": "FOR_SALE", "homeType": "SINGLE_FAMILY", "livingArea": 1650, "price": 325000,
        "rentZestimate": 2100, "streetAddress": "1 Main St", "zipcode": "77002"}]}"#;

    /// Serve `body` with status 200 to every request
    async fn serve(body: &'static str) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        Url::parse(&format!("http://{}/search", addr)).unwrap()
    }

    struct Fixture {
        _temp: TempDir,
        store: Arc<dyn ObjectStore>,
        warehouse: Arc<LocalWarehouse>,
        staging: std::path::PathBuf,
        chain: MainChain,
    }

    fn fixture(url: Url) -> Fixture {
        let temp = TempDir::new().unwrap();
        let staging = temp.path().join("staging");
        let store: Arc<dyn ObjectStore> =
            Arc::new(LocalObjectStore::new(temp.path().join("buckets")).unwrap());
        let warehouse = Arc::new(LocalWarehouse::new(temp.path().join("warehouse"), store.clone()));

        let client = SearchClient::try_new(url, ApiCredentials::none()).unwrap();
        let gate = ExistenceGate::new(GateConfig::new(
            Duration::from_millis(10),
            Duration::from_millis(50),
        ));
        let loader = WarehouseLoader::new(
            store.clone(),
            warehouse.clone(),
            TableRef::new("PUBLIC", "zillowdata").unwrap(),
            CopyOptions::default(),
        );
        let chain = MainChain::new(
            ListingsExtractor::new(client, "houston, tx", &staging),
            Stager::new(store.clone(), "ingest"),
            store.clone(),
            gate,
            loader,
            "transform",
            RetryPolicy::none(),
        );

        Fixture {
            _temp: temp,
            store,
            warehouse,
            staging,
            chain,
        }
    }

    fn context() -> RunContext {
        RunContext::from_timestamp("01082023101500").unwrap()
    }

    #[tokio::test]
    async fn test_run_loads_visible_csv() {
        let fixture = fixture(serve(BODY).await);
        let csv = ObjectLocation::new("transform", "response_data_01082023101500.csv");
        fixture
            .store
            .put(&csv, b"bathrooms,city\n2,Houston\n".to_vec())
            .await
            .unwrap();

        let report = fixture.chain.run(context()).await;
        assert_eq!(report.state, RunState::Loaded);
        assert_eq!(report.rows_loaded, Some(1));
        assert_eq!(
            report.staged,
            Some(ObjectLocation::new("ingest", "response_data_01082023101500.json"))
        );
        assert!(!fixture.staging.join("response_data_01082023101500.json").exists());

        let table = TableRef::new("PUBLIC", "zillowdata").unwrap();
        assert_eq!(fixture.warehouse.rows(&table).await.unwrap(), vec![vec!["2", "Houston"]]);
    }

    #[tokio::test]
    async fn test_gate_timeout_skips_load() {
        let fixture = fixture(serve(BODY).await);

        let report = fixture.chain.run(context()).await;
        assert_eq!(report.state, RunState::Failed { step: Step::AwaitCsv });
        assert_eq!(report.rows_loaded, None);
        assert_eq!(
            fixture.store.list("ingest").await.unwrap(),
            vec!["response_data_01082023101500.json"]
        );

        let table = TableRef::new("PUBLIC", "zillowdata").unwrap();
        assert!(fixture.warehouse.rows(&table).await.unwrap().is_empty());

        let err = report.into_result().unwrap_err();
        assert_eq!(kind_of(&err), Some(ErrorKind::Timeout));
        assert!(err.to_string().contains("await-csv"));
    }

    #[tokio::test]
    async fn test_request_failure_stops_at_extract() {
        let fixture = fixture(Url::parse("http://127.0.0.1:1/search").unwrap());

        let report = fixture.chain.run(context()).await;
        assert_eq!(report.state, RunState::Failed { step: Step::Extract });
        assert!(report.extraction.is_none());
        assert_eq!(kind_of(report.error.as_ref().unwrap()), Some(ErrorKind::Request));
        assert!(fixture.store.list("ingest").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_uses_fixed_delay() {
        let policy = RetryPolicy {
            retries: 2,
            delay: Duration::from_secs(45),
        };
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let start = tokio::time::Instant::now();

        let result = with_retry(&policy, &CancellationToken::new(), Step::Load, move || async move {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 { Err(eyre!("attempt {} failed", n)) } else { Ok(n) }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(90) && elapsed < Duration::from_secs(91));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_policy() {
        let policy = RetryPolicy {
            retries: 2,
            delay: Duration::from_secs(45),
        };
        let counter = AtomicU32::new(0);
        let attempts = &counter;

        let result: Result<()> =
            with_retry(&policy, &CancellationToken::new(), Step::Stage, move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(eyre!("still failing"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_is_not_retried() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;

        let result: Result<()> = with_retry(
            &RetryPolicy::default(),
            &CancellationToken::new(),
            Step::AwaitCsv,
            move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::Cancelled {
                    location: "transform/x.csv".to_string(),
                }
                .into())
            },
        )
        .await;

        assert_eq!(kind_of(&result.unwrap_err()), Some(ErrorKind::Cancelled));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(RunState::CsvVisible.to_string(), "csv-visible");
        assert_eq!(
            RunState::Failed { step: Step::Load }.to_string(),
            "failed at load"
        );
    }
}
