//! Watermark store backends

use bulkfetch::adapters::gcs::{GcsClient, GcsPath};
use bulkfetch::config::{secret_string, BulkFetchConfig, GcsConfig};
use bulkfetch::core::state::{LocalFileStore, ObjectStore, TransactionTimeStore};
use bulkfetch::domain::BulkFetchError;
use chrono::{TimeZone, Utc};
use mockito::Matcher;
use tempfile::TempDir;

#[tokio::test]
async fn test_local_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("since.txt");
    let store = TransactionTimeStore::LocalFile(LocalFileStore::new(&path));

    assert_eq!(store.load().await.unwrap(), None);

    let first = Utc.with_ymd_and_hms(2021, 5, 1, 0, 0, 0).unwrap();
    let second = Utc.with_ymd_and_hms(2021, 6, 1, 8, 15, 30).unwrap();
    store.store(first).await.unwrap();
    store.store(second).await.unwrap();

    assert_eq!(store.load().await.unwrap(), Some(second));
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "2021-05-01T00:00:00.000+00:00\n2021-06-01T08:15:30.000+00:00\n"
    );
}

#[tokio::test]
async fn test_local_file_with_hand_edited_content() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("since.txt");
    std::fs::write(&path, "2021-01-01T00:00:00.000+00:00\n\n2021-02-01T00:00:00.000-05:00\n\n")
        .unwrap();

    let store = TransactionTimeStore::LocalFile(LocalFileStore::new(&path));
    assert_eq!(
        store.load().await.unwrap(),
        Some(Utc.with_ymd_and_hms(2021, 2, 1, 5, 0, 0).unwrap())
    );

    std::fs::write(&path, "yesterday\n").unwrap();
    let err = store.load().await.unwrap_err();
    assert!(matches!(err, BulkFetchError::InvalidWatermark(_)));
}

#[tokio::test]
async fn test_store_selection_from_config() {
    let mut config = BulkFetchConfig::default();
    let store = TransactionTimeStore::from_config(&config).unwrap();
    assert_eq!(store.describe(), "memory");
    assert_eq!(store.load().await.unwrap(), None);

    config.checkpoint.since = Some("2021-05-01T00:00:00.000+00:00".to_string());
    let store = TransactionTimeStore::from_config(&config).unwrap();
    assert_eq!(
        store.load().await.unwrap(),
        Some(Utc.with_ymd_and_hms(2021, 5, 1, 0, 0, 0).unwrap())
    );

    config.checkpoint.since_file = Some("since.txt".to_string());
    assert!(matches!(
        TransactionTimeStore::from_config(&config),
        Err(BulkFetchError::Configuration(_))
    ));

    config.checkpoint.since = None;
    config.checkpoint.since_file = Some("gs://bucket/since.txt".to_string());
    let store = TransactionTimeStore::from_config(&config).unwrap();
    assert_eq!(store.describe(), "gs://bucket/since.txt");
}

fn object_store(server: &mockito::ServerGuard) -> TransactionTimeStore {
    let client = GcsClient::new(&GcsConfig {
        endpoint: server.url(),
        access_token: Some(secret_string("gcs-token".to_string())),
    })
    .unwrap();
    let path = GcsPath::parse("gs://bucket/bulkfetch/since.txt").unwrap();
    TransactionTimeStore::Object(ObjectStore::new(client, path))
}

fn upload_query() -> Matcher {
    Matcher::AllOf(vec![
        Matcher::UrlEncoded("uploadType".into(), "media".into()),
        Matcher::UrlEncoded("name".into(), "bulkfetch/since.txt".into()),
    ])
}

#[tokio::test]
async fn test_object_store_first_write() {
    let mut server = mockito::Server::new_async().await;
    let read = server
        .mock("GET", Matcher::Regex(r"^/storage/v1/b/bucket/o/".to_string()))
        .match_header("authorization", "Bearer gcs-token")
        .match_query(Matcher::UrlEncoded("alt".into(), "media".into()))
        .with_status(404)
        .expect(2)
        .create_async()
        .await;
    let write = server
        .mock("POST", "/upload/storage/v1/b/bucket/o")
        .match_query(upload_query())
        .match_body(Matcher::Exact("2021-05-01T00:00:00.000+00:00\n".to_string()))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let store = object_store(&server);
    assert_eq!(store.load().await.unwrap(), None);
    store
        .store(Utc.with_ymd_and_hms(2021, 5, 1, 0, 0, 0).unwrap())
        .await
        .unwrap();

    read.assert_async().await;
    write.assert_async().await;
}

#[tokio::test]
async fn test_object_store_appends_to_existing_log() {
    let mut server = mockito::Server::new_async().await;
    let _read = server
        .mock("GET", Matcher::Regex(r"^/storage/v1/b/bucket/o/".to_string()))
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("2021-01-01T00:00:00.000+00:00\n2021-05-01T00:00:00.000+00:00")
        .create_async()
        .await;
    let write = server
        .mock("POST", "/upload/storage/v1/b/bucket/o")
        .match_query(upload_query())
        .match_body(Matcher::Exact(
            "2021-01-01T00:00:00.000+00:00\n2021-05-01T00:00:00.000+00:00\n2021-06-01T00:00:00.000+00:00\n"
                .to_string(),
        ))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let store = object_store(&server);
    assert_eq!(
        store.load().await.unwrap(),
        Some(Utc.with_ymd_and_hms(2021, 5, 1, 0, 0, 0).unwrap())
    );
    store
        .store(Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap())
        .await
        .unwrap();
    write.assert_async().await;
}

#[tokio::test]
async fn test_object_store_write_failure() {
    let mut server = mockito::Server::new_async().await;
    let _read = server
        .mock("GET", Matcher::Regex(r"^/storage/v1/b/bucket/o/".to_string()))
        .match_query(Matcher::Any)
        .with_status(404)
        .create_async()
        .await;
    let _write = server
        .mock("POST", "/upload/storage/v1/b/bucket/o")
        .match_query(Matcher::Any)
        .with_status(403)
        .with_body("forbidden")
        .create_async()
        .await;

    let store = object_store(&server);
    let err = store
        .store(Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, BulkFetchError::CheckpointStore(_)));
}
