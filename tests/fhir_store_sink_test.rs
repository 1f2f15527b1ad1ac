//! FHIR store sink against a mock Healthcare API

use bulkfetch::adapters::fhirstore::FhirStoreSink;
use bulkfetch::config::{FhirStoreConfig, GcsConfig, UploadMode};
use bulkfetch::core::pipeline::Sink;
use bulkfetch::domain::{BulkFetchError, Record, ResourceType, TransactionTime};
use chrono::{TimeZone, Utc};
use mockito::Matcher;
use serde_json::{json, Value};
use tempfile::TempDir;

const STORE: &str = "/projects/p/locations/l/datasets/d/fhirStores/s";

fn store_config(endpoint: &str, mode: UploadMode) -> FhirStoreConfig {
    FhirStoreConfig {
        endpoint: endpoint.to_string(),
        gcp_project: "p".to_string(),
        gcp_location: "l".to_string(),
        dataset_id: "d".to_string(),
        fhir_store_id: "s".to_string(),
        upload_mode: mode,
        max_upload_workers: 2,
        batch_upload_size: 2,
        import_poll_interval_seconds: 1,
        ..Default::default()
    }
}

fn patient(id: &str) -> Record {
    Record::new(
        ResourceType::new("Patient").unwrap(),
        "https://bulk.example.com/files/patient.ndjson",
        format!(r#"{{"resourceType":"Patient","id":"{id}"}}"#),
    )
}

#[tokio::test]
async fn test_individual_uploads() {
    let mut server = mockito::Server::new_async().await;
    let put = server
        .mock("PUT", Matcher::Regex(format!(r"^{STORE}/fhir/Patient/p[0-9]$")))
        .match_header("content-type", "application/fhir+json;charset=utf-8")
        .with_status(200)
        .with_body("{}")
        .expect(5)
        .create_async()
        .await;

    let config = store_config(&server.url(), UploadMode::Individual);
    let mut sink =
        FhirStoreSink::from_config(&config, &GcsConfig::default(), &TransactionTime::new())
            .unwrap();
    assert!(!sink.tolerates_errors());

    for i in 0..5 {
        sink.process(&patient(&format!("p{i}"))).await.unwrap();
    }
    sink.finalize().await.unwrap();

    assert!(sink.failures().is_empty());
    put.assert_async().await;
}

#[tokio::test]
async fn test_resources_without_id_are_created() {
    let mut server = mockito::Server::new_async().await;
    let post = server
        .mock("POST", format!("{STORE}/fhir/Patient").as_str())
        .with_status(201)
        .with_body("{}")
        .create_async()
        .await;

    let config = store_config(&server.url(), UploadMode::Individual);
    let mut sink =
        FhirStoreSink::from_config(&config, &GcsConfig::default(), &TransactionTime::new())
            .unwrap();

    let record = Record::new(
        ResourceType::new("Patient").unwrap(),
        "https://bulk.example.com/files/patient.ndjson",
        r#"{"resourceType":"Patient"}"#,
    );
    sink.process(&record).await.unwrap();
    sink.finalize().await.unwrap();
    post.assert_async().await;
}

#[tokio::test]
async fn test_failed_uploads_are_reported() {
    let mut server = mockito::Server::new_async().await;
    let _ok = server
        .mock("PUT", format!("{STORE}/fhir/Patient/good").as_str())
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let _rejected = server
        .mock("PUT", format!("{STORE}/fhir/Patient/bad").as_str())
        .with_status(400)
        .with_body(r#"{"resourceType":"OperationOutcome"}"#)
        .create_async()
        .await;

    let errors = TempDir::new().unwrap();
    let mut config = store_config(&server.url(), UploadMode::Individual);
    config.upload_error_file_dir = Some(errors.path().display().to_string());
    let mut sink =
        FhirStoreSink::from_config(&config, &GcsConfig::default(), &TransactionTime::new())
            .unwrap()
            .with_error_tolerance(true);
    assert!(sink.tolerates_errors());

    sink.process(&patient("good")).await.unwrap();
    sink.process(&patient("bad")).await.unwrap();
    let err = sink.finalize().await.unwrap_err();

    assert!(matches!(err, BulkFetchError::Sink { .. }));
    assert!(err.to_string().contains("1 of 2 resources failed"));
    assert_eq!(sink.failures().len(), 1);

    let report =
        std::fs::read_to_string(errors.path().join("resources_with_errors.ndjson")).unwrap();
    let lines: Vec<&str> = report.lines().collect();
    assert_eq!(lines.len(), 1);
    let line: Value = serde_json::from_str(lines[0]).unwrap();
    assert!(line["err"].as_str().unwrap().contains("400"));
    assert_eq!(
        line["fhir_resource"],
        r#"{"resourceType":"Patient","id":"bad"}"#
    );
}

#[tokio::test]
async fn test_batch_uploads() {
    let mut server = mockito::Server::new_async().await;
    let batch = server
        .mock("POST", format!("{STORE}/fhir").as_str())
        .match_body(Matcher::PartialJson(json!({
            "resourceType": "Bundle",
            "type": "batch",
        })))
        .with_status(200)
        .with_body(
            json!({
                "resourceType": "Bundle",
                "type": "batch-response",
                "entry": [
                    { "response": { "status": "200 OK" } },
                    { "response": { "status": "201 Created" } }
                ]
            })
            .to_string(),
        )
        .expect(2)
        .create_async()
        .await;

    let config = store_config(&server.url(), UploadMode::Batch);
    let mut sink =
        FhirStoreSink::from_config(&config, &GcsConfig::default(), &TransactionTime::new())
            .unwrap();

    // Two full batches of two; the partial last batch is flushed by finalize
    for i in 0..3 {
        sink.process(&patient(&format!("p{i}"))).await.unwrap();
    }
    sink.finalize().await.unwrap();

    assert!(sink.failures().is_empty());
    batch.assert_async().await;
}

#[tokio::test]
async fn test_batch_entry_failures() {
    let mut server = mockito::Server::new_async().await;
    let _batch = server
        .mock("POST", format!("{STORE}/fhir").as_str())
        .with_status(200)
        .with_body(
            json!({
                "resourceType": "Bundle",
                "type": "batch-response",
                "entry": [
                    { "response": { "status": "200 OK" } },
                    { "response": { "status": "422 Unprocessable Entity" } }
                ]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let config = store_config(&server.url(), UploadMode::Batch);
    let mut sink =
        FhirStoreSink::from_config(&config, &GcsConfig::default(), &TransactionTime::new())
            .unwrap();

    sink.process(&patient("p1")).await.unwrap();
    sink.process(&patient("p2")).await.unwrap();
    assert!(sink.finalize().await.is_err());

    let failures = sink.failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].error.contains("422"));
    assert!(String::from_utf8_lossy(&failures[0].payload).contains("\"p2\""));
}

#[tokio::test]
async fn test_gcs_staged_import() {
    let mut server = mockito::Server::new_async().await;
    let staged = server
        .mock("POST", "/upload/storage/v1/b/staging/o")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("uploadType".into(), "media".into()),
            Matcher::UrlEncoded(
                "name".into(),
                "2021-05-01T00:00:00.000+00:00/Patient_0.ndjson".into(),
            ),
        ]))
        .match_body(Matcher::Exact(
            "{\"resourceType\":\"Patient\",\"id\":\"p1\"}\n{\"resourceType\":\"Patient\",\"id\":\"p2\"}\n"
                .to_string(),
        ))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let import = server
        .mock("POST", format!("{STORE}:import").as_str())
        .match_body(Matcher::PartialJson(json!({
            "contentStructure": "RESOURCE",
            "gcsSource": { "uri": "gs://staging/2021-05-01T00:00:00.000+00:00/**" },
        })))
        .with_status(200)
        .with_body(r#"{"name":"projects/p/locations/l/datasets/d/operations/op1"}"#)
        .create_async()
        .await;
    let operation = server
        .mock("GET", "/projects/p/locations/l/datasets/d/operations/op1")
        .with_status(200)
        .with_body(r#"{"name":"projects/p/locations/l/datasets/d/operations/op1","done":true}"#)
        .create_async()
        .await;

    let mut config = store_config(&server.url(), UploadMode::Gcs);
    config.gcs_bucket = Some("staging".to_string());
    let gcs = GcsConfig {
        endpoint: server.url(),
        access_token: None,
    };
    let transaction_time = TransactionTime::new();
    let mut sink = FhirStoreSink::from_config(&config, &gcs, &transaction_time).unwrap();

    transaction_time
        .set(Utc.with_ymd_and_hms(2021, 5, 1, 0, 0, 0).unwrap())
        .unwrap();
    sink.process(&patient("p1")).await.unwrap();
    sink.process(&patient("p2")).await.unwrap();
    sink.finalize().await.unwrap();

    staged.assert_async().await;
    import.assert_async().await;
    operation.assert_async().await;
}

#[tokio::test]
async fn test_gcs_import_failure() {
    let mut server = mockito::Server::new_async().await;
    let _staged = server
        .mock("POST", "/upload/storage/v1/b/staging/o")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let _import = server
        .mock("POST", format!("{STORE}:import").as_str())
        .with_status(200)
        .with_body(r#"{"name":"projects/p/locations/l/datasets/d/operations/op2"}"#)
        .create_async()
        .await;
    let _operation = server
        .mock("GET", "/projects/p/locations/l/datasets/d/operations/op2")
        .with_status(200)
        .with_body(r#"{"done":true,"error":{"code":3,"message":"invalid resource"}}"#)
        .create_async()
        .await;

    let mut config = store_config(&server.url(), UploadMode::Gcs);
    config.gcs_bucket = Some("staging".to_string());
    let gcs = GcsConfig {
        endpoint: server.url(),
        access_token: None,
    };
    let transaction_time = TransactionTime::new();
    transaction_time
        .set(Utc.with_ymd_and_hms(2021, 5, 1, 0, 0, 0).unwrap())
        .unwrap();
    let mut sink = FhirStoreSink::from_config(&config, &gcs, &transaction_time).unwrap();

    sink.process(&patient("p1")).await.unwrap();
    let err = sink.finalize().await.unwrap_err();
    assert!(err.to_string().contains("invalid resource"));
}
