//! Integration tests for the batch orchestrator: file loading, per-item
//! failure capture, directory processing, and large-payload splitting.

use ioc_relay::{BatchProcessor, ClientConfig, ProcessorConfig, RelayError};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn processor_for(server: &MockServer, batch_size: usize) -> BatchProcessor {
    let client = ClientConfig {
        api_url: format!("{}/v1/detections", server.uri()),
        max_retries: 0,
        retry_delay: Duration::from_millis(10),
        timeout: Duration::from_secs(5),
        ..ClientConfig::new("test-token")
    };
    BatchProcessor::new(ProcessorConfig {
        client,
        batch_size,
        show_progress: false,
    })
    .unwrap()
}

fn payload_json(entries: usize) -> Value {
    let data: Vec<Value> = (0..entries)
        .map(|i| {
            json!({
                "ioc": {"type": "ip", "value": format!("10.0.0.{i}")},
                "detection": {"type": "playbook", "id": "t1"}
            })
        })
        .collect();
    json!({ "data": data })
}

fn write_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn ok_summary(n: u64) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "summary": {"submitted": n, "processed": n, "dropped": 0}
    }))
}

#[tokio::test]
async fn process_files_aggregates_summaries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ok_summary(1))
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let a = write_file(&dir, "a.json", &payload_json(1).to_string());
    let b = write_file(&dir, "b.json", &payload_json(1).to_string());

    let processor = processor_for(&server, 100);
    let report = processor.process_files(&[a, b], false).await.unwrap();

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(report.summary.submitted, 2);
    assert_eq!(report.summary.processed, 2);
    assert_eq!(report.metrics.api_calls.total, 2);
    assert_eq!(report.metrics.api_calls.success, 2);
    assert_eq!(report.metrics.throughput.entities_processed, 2);
}

#[tokio::test]
async fn malformed_json_aborts_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ok_summary(1))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let good = write_file(&dir, "good.json", &payload_json(1).to_string());
    let bad = write_file(&dir, "bad.json", "{ not json");

    let processor = processor_for(&server, 100);
    let err = processor
        .process_files(&[good, bad], false)
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::JsonParse { .. }));
}

#[tokio::test]
async fn missing_file_aborts_the_run() {
    let server = MockServer::start().await;
    let processor = processor_for(&server, 100);

    let err = processor
        .process_files(&[PathBuf::from("/nonexistent/payload.json")], false)
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::InputFileRead { .. }));
}

#[tokio::test]
async fn invalid_payload_is_captured_per_item() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ok_summary(1))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let good = write_file(&dir, "good.json", &payload_json(1).to_string());
    // Valid JSON, invalid contract: empty data array.
    let empty = write_file(&dir, "empty.json", r#"{"data": []}"#);

    let processor = processor_for(&server, 100);
    let report = processor
        .process_files(&[good, empty.clone()], false)
        .await
        .unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures.len(), 1);

    let failure = &report.failures[0];
    assert_eq!(failure.index, 1);
    assert_eq!(failure.source.as_ref().unwrap(), &empty);
    assert_eq!(failure.error.kind(), "validation");
    assert_eq!(report.metrics.errors.get("validation"), Some(&1));
}

#[tokio::test]
async fn authentication_failure_aborts_the_whole_run() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "expired"})))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let a = write_file(&dir, "a.json", &payload_json(1).to_string());
    let b = write_file(&dir, "b.json", &payload_json(1).to_string());

    let processor = processor_for(&server, 100);
    let err = processor.process_files(&[a, b], false).await.unwrap_err();
    assert!(matches!(err, RelayError::Authentication { .. }));
}

#[tokio::test]
async fn server_failures_are_counted_by_kind() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let a = write_file(&dir, "a.json", &payload_json(1).to_string());

    let processor = processor_for(&server, 100);
    let report = processor.process_files(&[a], false).await.unwrap();

    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(report.metrics.errors.get("server"), Some(&1));
    assert_eq!(report.metrics.api_calls.failed, 1);
}

#[tokio::test]
async fn process_directory_with_no_matches_is_a_zero_report() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    write_file(&dir, "notes.txt", "nothing here");

    let processor = processor_for(&server, 100);
    let report = processor
        .process_directory(dir.path(), "*.json", false, false)
        .await
        .unwrap();

    assert_eq!(report.succeeded, 0);
    assert_eq!(report.summary.submitted, 0);
}

#[tokio::test]
async fn process_directory_finds_nested_files_when_recursive() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ok_summary(1))
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    write_file(&dir, "top.json", &payload_json(1).to_string());
    std::fs::create_dir(dir.path().join("nested")).unwrap();
    write_file(&dir, "nested/inner.json", &payload_json(1).to_string());
    write_file(&dir, "skip.csv", "Entity ID\nip:1.1.1.1");

    let processor = processor_for(&server, 100);
    let report = processor
        .process_directory(dir.path(), "*.json", true, false)
        .await
        .unwrap();

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.summary.submitted, 2);
}

#[tokio::test]
async fn missing_directory_is_an_error() {
    let server = MockServer::start().await;
    let processor = processor_for(&server, 100);

    let err = processor
        .process_directory(&PathBuf::from("/no/such/dir"), "*.json", false, false)
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::InputFileRead { .. }));
}

#[tokio::test]
async fn process_csv_files_converts_then_submits() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ok_summary(2))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let csv = write_file(
        &dir,
        "export.csv",
        "Entity ID,Detectors,Description\n\
         ip:1.2.3.4,playbook,Beacon\n\
         domain:evil.example.com,correlation,Lookup\n",
    );

    let processor = processor_for(&server, 100);
    let report = processor.process_csv_files(&[csv], false).await.unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.summary.submitted, 2);
    assert_eq!(report.metrics.throughput.entities_processed, 2);
}

#[tokio::test]
async fn csv_conversion_failure_propagates() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    // Second row has no detection type.
    let csv = write_file(
        &dir,
        "export.csv",
        "Entity ID,Detectors\nip:1.2.3.4,playbook\nip:5.6.7.8,\n",
    );

    let processor = processor_for(&server, 100);
    let err = processor
        .process_csv_files(&[csv.clone()], false)
        .await
        .unwrap_err();

    match err {
        RelayError::CsvConversion { path, row, .. } => {
            assert_eq!(path, csv);
            assert_eq!(row, Some(2));
        }
        other => panic!("expected CsvConversion, got {other:?}"),
    }
}

#[tokio::test]
async fn process_large_file_splits_and_merges() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ok_summary(4))
        .expect(3)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let big = write_file(&dir, "big.json", &payload_json(12).to_string());

    let processor = processor_for(&server, 5);
    let report = processor.process_large_file(&big, false).await.unwrap();

    // 12 entries at batch size 5 -> chunks of 5, 5, 2.
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.summary.submitted, 12);
    assert_eq!(report.metrics.batching.batch_count, 3);
    assert_eq!(report.metrics.batching.optimal_batch_size, 4);
    assert_eq!(report.metrics.throughput.entities_processed, 12);

    let requests = server.received_requests().await.unwrap();
    let mut sizes: Vec<usize> = requests
        .iter()
        .map(|r| {
            let body: Value = serde_json::from_slice(&r.body).unwrap();
            body["data"].as_array().unwrap().len()
        })
        .collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![2, 5, 5]);
}

#[tokio::test]
async fn large_file_with_invalid_payload_propagates_validation() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let bad = write_file(&dir, "bad.json", r#"{"data": [{"detection": {"type": "playbook"}}]}"#);

    let processor = processor_for(&server, 5);
    let err = processor.process_large_file(&bad, false).await.unwrap_err();
    assert!(matches!(err, RelayError::PayloadValidation(_)));
}
