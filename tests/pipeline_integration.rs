//! End-to-end tests of the main chain with the event handlers
//!
//! The search API is served from a local listener; buckets and the warehouse
//! live in a temporary directory.

use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use zillow_etl::cli;
use zillow_etl::config::{PipelineConfig, RetryPolicy};
use zillow_etl::error::{ErrorKind, kind_of};
use zillow_etl::warehouse::{LocalWarehouse, TableRef};
use zillow_etl::{LocalObjectStore, ObjectLocation, ObjectStore, RunState};

const SEARCH_RESPONSE: &str = r#"{
    "results": [
        {"zpid": 101, "bathrooms": 2, "bedrooms": 3, "city": "Houston", "daysOnZillow": 4,
         "homeStatus": "FOR_SALE", "homeType": "SINGLE_FAMILY", "livingArea": 1650,
         "price": 325000, "rentZestimate": 2100, "streetAddress": "1 Main St", "zipcode": "77002",
         "latitude": 29.75, "longitude": -95.36},
        {"zipcode": "77449", "streetAddress": "22 Oak Ave, Unit B", "rentZestimate": null,
         "price": 210000, "livingArea": 1200, "homeType": "CONDO", "homeStatus": "FOR_SALE",
         "daysOnZillow": 11, "city": "Katy", "bedrooms": 2, "bathrooms": 1.5}
    ],
    "resultsPerPage": 41,
    "totalPages": 1,
    "totalResultCount": 2
}"#;

/// Serve `status` and `body` to every request, recording the request lines
async fn serve(status: &'static str, body: &'static str) -> (String, tokio::sync::mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let _ = tx.send(request.lines().next().unwrap_or_default().to_string());

                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{}/search", addr), rx)
}

fn config(temp: &TempDir, url: String) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.api.url = url;
    config.api.credentials = temp.path().join("config_api.json");
    config.staging_dir = temp.path().join("staging");
    config.store.root = temp.path().join("buckets");
    config.warehouse.root = temp.path().join("warehouse");
    config.gate.interval = Duration::from_millis(20);
    config.gate.timeout = Duration::from_secs(5);
    config.retry = RetryPolicy::none();
    config
}

#[tokio::test]
async fn test_full_run_with_watcher() {
    let temp = TempDir::new().unwrap();
    std::fs::write(
        temp.path().join("config_api.json"),
        r#"{"X-RapidAPI-Key": "test-key", "X-RapidAPI-Host": "zillow56.p.rapidapi.com"}"#,
    )
    .unwrap();
    let (url, mut requests) = serve("200 OK", SEARCH_RESPONSE).await;
    let config = config(&temp, url);

    let report = cli::run_pipeline(&config, true, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.state, RunState::Loaded);
    assert_eq!(report.rows_loaded, Some(2));

    let request = requests.recv().await.unwrap();
    assert!(request.starts_with("GET /search?location=houston"));

    let json_key = report.context.json_name();
    let csv_key = report.context.csv_name();
    assert_eq!(json_key.strip_suffix(".json"), csv_key.strip_suffix(".csv"));

    let store = LocalObjectStore::new(temp.path().join("buckets")).unwrap();
    let raw = store
        .get(&ObjectLocation::new("zillow-etl", &json_key))
        .await
        .unwrap();
    let archived = store
        .get(&ObjectLocation::new("zillow-copy-of-raw-json-bucket", &json_key))
        .await
        .unwrap();
    assert_eq!(raw, archived);
    assert!(String::from_utf8(raw).unwrap().contains("\n    \"results\": ["));

    let csv = String::from_utf8(
        store
            .get(&ObjectLocation::new("zillow-transform-from-json-to-csv", &csv_key))
            .await
            .unwrap(),
    )
    .unwrap();
    assert_eq!(
        csv,
        "bathrooms,bedrooms,city,daysOnZillow,homeStatus,homeType,livingArea,price,rentZestimate,streetAddress,zipcode\n\
         2,3,Houston,4,FOR_SALE,SINGLE_FAMILY,1650,325000,2100,1 Main St,77002\n\
         1.5,2,Katy,11,FOR_SALE,CONDO,1200,210000,,\"22 Oak Ave, Unit B\",77449\n"
    );

    assert!(
        std::fs::read_dir(temp.path().join("staging"))
            .unwrap()
            .next()
            .is_none()
    );

    let warehouse = LocalWarehouse::new(
        temp.path().join("warehouse"),
        std::sync::Arc::new(store),
    );
    let rows = warehouse
        .rows(&TableRef::new("PUBLIC", "zillowdata").unwrap())
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1][2], "Katy");
    assert_eq!(rows[1][8], "");
}

#[tokio::test]
async fn test_run_without_handlers_times_out() {
    let temp = TempDir::new().unwrap();
    let (url, _requests) = serve("200 OK", SEARCH_RESPONSE).await;
    let mut config = config(&temp, url);
    config.gate.timeout = Duration::from_millis(100);

    let err = cli::run_pipeline(&config, false, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(kind_of(&err), Some(ErrorKind::Timeout));
    assert!(!temp.path().join("warehouse/PUBLIC/zillowdata.csv").exists());
}

#[tokio::test]
async fn test_api_error_status_fails_extract() {
    let temp = TempDir::new().unwrap();
    let (url, _requests) = serve("429 Too Many Requests", r#"{"message": "quota"}"#).await;
    let config = config(&temp, url);

    let err = cli::run_pipeline(&config, false, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(kind_of(&err), Some(ErrorKind::Request));
    assert!(err.to_string().contains("extract"));
    assert!(!temp.path().join("buckets/zillow-etl").exists());
}

#[tokio::test]
async fn test_non_json_response_fails_extract_with_decode_error() {
    let temp = TempDir::new().unwrap();
    let (url, _requests) = serve("200 OK", "<html><body>Service Unavailable</body></html>").await;
    let config = config(&temp, url);

    let err = cli::run_pipeline(&config, true, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(kind_of(&err), Some(ErrorKind::Decode));
    assert!(err.to_string().contains("failed at step extract"));
    assert!(!temp.path().join("staging").exists());

    let store = LocalObjectStore::new(temp.path().join("buckets")).unwrap();
    assert!(store.list("zillow-etl").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_results_produces_no_csv() {
    let temp = TempDir::new().unwrap();
    let (url, _requests) = serve("200 OK", r#"{"message": "no results"}"#).await;
    let mut config = config(&temp, url);
    config.gate.timeout = Duration::from_millis(300);

    let err = cli::run_pipeline(&config, true, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(kind_of(&err), Some(ErrorKind::Timeout));

    let store = LocalObjectStore::new(temp.path().join("buckets")).unwrap();
    assert!(
        store
            .list("zillow-transform-from-json-to-csv")
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(store.list("zillow-copy-of-raw-json-bucket").await.unwrap().len(), 1);
}
