//! Integration tests for the archive pipeline.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use page_archiver::archiver::{Archiver, ConvertOptions};
use page_archiver::config::{Config, ExtractionMode};
use page_archiver::db::{ArchiveRecord, ArchiveStatus, Database, NewArchiveRecord};
use page_archiver::error::ArchiveError;
use page_archiver::store::{BlobStore, LocalBlobStore, RecordStore, StoreError};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAGE_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <link rel="stylesheet" href="/style.css?v=2">
    <script src="a.js"></script>
</head>
<body>
    <img src="/img/x.png">
</body>
</html>"#;

/// Create a test configuration writing under `temp`.
fn create_test_config(temp: &Path) -> Config {
    Config {
        database_path: temp.join("test.sqlite"),
        output_dir: temp.join("output"),
        ..Config::for_testing()
    }
}

async fn setup_with(config: &Config, blobs: Arc<dyn BlobStore>) -> (Archiver, Database) {
    let db = Database::new(&config.database_path)
        .await
        .expect("Failed to create database");
    let archiver =
        Archiver::new(config, Arc::new(db.clone()), blobs).expect("Failed to create archiver");
    (archiver, db)
}

async fn setup() -> (Archiver, Database, Config, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = create_test_config(temp_dir.path());
    let (archiver, db) = setup_with(&config, Arc::new(LocalBlobStore::new())).await;
    (archiver, db, config, temp_dir)
}

/// Serve `PAGE_HTML` at `/page` with the stylesheet and script present and the
/// image missing.
async fn mount_page_with_assets(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAGE_HTML))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/style.css"))
        .respond_with(ResponseTemplate::new(200).set_body_string("body { color: red; }"))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a.js"))
        .respond_with(ResponseTemplate::new(200).set_body_string("let a = 1;"))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/x.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_convert_completes_with_missing_asset() {
    let server = MockServer::start().await;
    mount_page_with_assets(&server).await;
    let (archiver, db, config, _temp_dir) = setup().await;

    let url = format!("{}/page", server.uri());
    let outcome = archiver.convert(&url).await.expect("Convert failed");

    assert!(!outcome.reused);
    assert_eq!(outcome.status, ArchiveStatus::Complete);
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].url.ends_with("/img/x.png"));

    let record = db.get(outcome.id).await.expect("Record not found");
    assert_eq!(record.status, ArchiveStatus::Complete);
    assert!(record.error_detail.is_none());
    assert_eq!(record.asset_manifest.css.len(), 1);
    assert_eq!(record.asset_manifest.js.len(), 1);
    assert!(record.asset_manifest.images.is_empty());

    let job_dir = config.output_dir.join(outcome.id.to_string());
    assert_eq!(Path::new(&record.html_path), job_dir.join("index.html"));
    assert_eq!(
        std::fs::read_to_string(&record.html_path).unwrap(),
        PAGE_HTML
    );
    assert!(job_dir.join("assets/css/style.css").exists());
    assert!(job_dir.join("assets/js/a.js").exists());
    assert!(!job_dir.join("assets/images/x.png").exists());
}

#[tokio::test]
async fn test_regex_extraction_mode_archives_same_assets() {
    let server = MockServer::start().await;
    mount_page_with_assets(&server).await;
    let temp_dir = TempDir::new().unwrap();
    let config = Config {
        extraction_mode: ExtractionMode::Regex,
        ..create_test_config(temp_dir.path())
    };
    let (archiver, db) = setup_with(&config, Arc::new(LocalBlobStore::new())).await;

    let outcome = archiver
        .convert(&format!("{}/page", server.uri()))
        .await
        .unwrap();

    let record = db.get(outcome.id).await.unwrap();
    assert_eq!(record.status, ArchiveStatus::Complete);
    assert_eq!(record.asset_manifest.len(), 2);
}

#[tokio::test]
async fn test_second_convert_returns_same_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/once"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .expect(1)
        .mount(&server)
        .await;
    let (archiver, _db, _config, _temp_dir) = setup().await;

    let url = format!("{}/once", server.uri());
    let first = archiver.convert(&url).await.unwrap();
    let second = archiver.convert(&url).await.unwrap();

    assert_eq!(first.id, second.id);
    assert!(!first.reused);
    assert!(second.reused);
    assert_eq!(second.status, ArchiveStatus::Complete);
}

#[tokio::test]
async fn test_concurrent_converts_share_one_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html></html>")
                .set_delay(Duration::from_millis(100)),
        )
        .mount(&server)
        .await;
    let (archiver, db, _config, _temp_dir) = setup().await;

    let url = format!("{}/busy", server.uri());
    let (a, b) = tokio::join!(archiver.convert(&url), archiver.convert(&url));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.id, b.id);
    assert!(a.reused ^ b.reused);
    assert_eq!(db.list_active_records().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_connection_refused_marks_failed_without_job_dir() {
    let (archiver, db, config, _temp_dir) = setup().await;

    let err = archiver
        .convert("http://127.0.0.1:1/")
        .await
        .expect_err("Convert should fail");
    assert!(matches!(err, ArchiveError::Fetch { .. }));

    let records = db.list_active_records().await.unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.status, ArchiveStatus::Failed);
    assert!(!record.error_detail.as_deref().unwrap_or_default().is_empty());
    assert!(record.html_path.is_empty());
    assert!(!config.output_dir.join(record.id.to_string()).exists());
}

#[tokio::test]
async fn test_unparseable_url_fails_record() {
    let (archiver, db, _config, _temp_dir) = setup().await;

    let err = archiver.convert("not a url").await.unwrap_err();
    assert!(matches!(err, ArchiveError::Fetch { .. }));

    let record = db.find_by_source_url("not a url").await.unwrap().unwrap();
    assert_eq!(record.status, ArchiveStatus::Failed);
}

#[tokio::test]
async fn test_empty_url_is_rejected_without_record() {
    let (archiver, db, _config, _temp_dir) = setup().await;

    let err = archiver.convert("   ").await.unwrap_err();
    assert!(matches!(err, ArchiveError::Validation(_)));
    assert!(db.list_active_records().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_content_matches_written_files() {
    let server = MockServer::start().await;
    mount_page_with_assets(&server).await;
    let (archiver, _db, _config, _temp_dir) = setup().await;

    let outcome = archiver
        .convert(&format!("{}/page", server.uri()))
        .await
        .unwrap();
    let content = archiver.content(outcome.id).await.expect("Content failed");

    assert_eq!(content.html, PAGE_HTML);
    assert_eq!(
        content.css.get("style.css").map(String::as_str),
        Some("body { color: red; }")
    );
    assert_eq!(content.js.get("a.js").map(String::as_str), Some("let a = 1;"));
    assert!(content.images.is_empty());
}

#[tokio::test]
async fn test_content_image_urls_use_public_prefix() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gallery"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"<img src="/pic.gif">"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pic.gif"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"GIF89a".to_vec()))
        .mount(&server)
        .await;
    let (archiver, _db, _config, _temp_dir) = setup().await;

    let outcome = archiver
        .convert(&format!("{}/gallery", server.uri()))
        .await
        .unwrap();
    let content = archiver.content(outcome.id).await.unwrap();

    assert_eq!(
        content.images,
        vec![format!("/static/{}/assets/images/pic.gif", outcome.id)]
    );
}

#[tokio::test]
async fn test_content_of_failed_record_is_not_complete() {
    let (archiver, db, _config, _temp_dir) = setup().await;

    let _ = archiver.convert("http://127.0.0.1:1/").await;
    let id = db.list_active_records().await.unwrap()[0].id;

    let err = archiver.content(id).await.unwrap_err();
    assert!(matches!(err, ArchiveError::NotComplete { .. }));

    let err = archiver.content(id + 1000).await.unwrap_err();
    assert!(matches!(err, ArchiveError::NotFound(_)));
}

#[tokio::test]
async fn test_deleted_record_is_not_reused() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/again"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(&server)
        .await;
    let (archiver, db, _config, _temp_dir) = setup().await;

    let url = format!("{}/again", server.uri());
    let first = archiver.convert(&url).await.unwrap();
    db.delete_record(first.id).await.unwrap();

    let second = archiver.convert(&url).await.unwrap();
    assert_ne!(first.id, second.id);
    assert!(!second.reused);

    let err = archiver.record(first.id).await.unwrap_err();
    assert!(matches!(err, ArchiveError::NotFound(_)));
}

#[tokio::test]
async fn test_retry_reruns_failed_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
        .mount(&server)
        .await;
    let (archiver, db, _config, _temp_dir) = setup().await;

    let url = format!("{}/flaky", server.uri());
    let err = archiver.convert(&url).await.unwrap_err();
    assert!(matches!(err, ArchiveError::Fetch { .. }));

    // A failed record is returned as-is by convert
    let reused = archiver.convert(&url).await.unwrap();
    assert!(reused.reused);
    assert_eq!(reused.status, ArchiveStatus::Failed);

    let retried = archiver.retry(reused.id).await.expect("Retry failed");
    assert_eq!(retried.id, reused.id);
    assert_eq!(retried.status, ArchiveStatus::Complete);

    let record = db.get(retried.id).await.unwrap();
    assert!(record.error_detail.is_none());

    let err = archiver.retry(retried.id).await.unwrap_err();
    assert!(matches!(err, ArchiveError::InvalidTransition { .. }));
}

/// Blob store whose writes always fail.
struct ReadOnlyBlobs;

#[async_trait]
impl BlobStore for ReadOnlyBlobs {
    async fn create_dir_all(&self, _path: &Path) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
    }

    async fn write(&self, _path: &Path, _contents: &[u8]) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
    }

    async fn read(&self, _path: &Path) -> io::Result<Vec<u8>> {
        Err(io::Error::from(io::ErrorKind::NotFound))
    }
}

#[tokio::test]
async fn test_storage_failure_marks_failed() {
    let server = MockServer::start().await;
    mount_page_with_assets(&server).await;
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(temp_dir.path());
    let (archiver, db) = setup_with(&config, Arc::new(ReadOnlyBlobs)).await;

    let err = archiver
        .convert(&format!("{}/page", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiveError::Storage { .. }));

    let record = db.list_active_records().await.unwrap().remove(0);
    assert_eq!(record.status, ArchiveStatus::Failed);
    assert!(record
        .error_detail
        .as_deref()
        .is_some_and(|d| d.contains("read-only")));
}

#[tokio::test]
async fn test_recover_interrupted_fails_unfinished_records() {
    let (archiver, db, _config, _temp_dir) = setup().await;

    let mut record = db
        .create(NewArchiveRecord::new("https://example.com/stuck"))
        .await
        .unwrap();
    record.mark_in_progress().unwrap();
    db.update(&record).await.unwrap();

    let never_started = db
        .create(NewArchiveRecord::new("https://example.com/waiting"))
        .await
        .unwrap();

    assert_eq!(archiver.recover_interrupted().await.unwrap(), 2);

    for id in [record.id, never_started.id] {
        let recovered = db.get(id).await.unwrap();
        assert_eq!(recovered.status, ArchiveStatus::Failed);
        assert_eq!(
            recovered.error_detail.as_deref(),
            Some("interrupted before completion")
        );
    }

    // Recovered records are retryable instead of blocking dedup forever
    let mut stale = db.get(never_started.id).await.unwrap();
    assert!(stale.begin_retry().is_ok());
}

/// Wait until the record reaches `complete` or `failed`.
async fn wait_for_terminal(db: &Database, id: i64) -> ArchiveStatus {
    for _ in 0..100 {
        let status = db.get(id).await.unwrap().status;
        if matches!(status, ArchiveStatus::Complete | ArchiveStatus::Failed) {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("record {id} never finished");
}

#[tokio::test]
async fn test_dropped_convert_still_finishes_job() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"<img src="/slow.png">"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/slow.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"PNG".to_vec())
                .set_delay(Duration::from_secs(1)),
        )
        .mount(&server)
        .await;
    let (archiver, db, _config, _temp_dir) = setup().await;
    let url = format!("{}/page", server.uri());

    // The caller gives up while the image is still downloading
    let dropped = tokio::time::timeout(Duration::from_millis(300), archiver.convert(&url)).await;
    assert!(dropped.is_err());

    let record = db.find_by_source_url(&url).await.unwrap().unwrap();
    assert_eq!(wait_for_terminal(&db, record.id).await, ArchiveStatus::Complete);
    assert_eq!(db.get(record.id).await.unwrap().asset_manifest.images.len(), 1);

    let again = archiver.convert(&url).await.unwrap();
    assert_eq!(again.id, record.id);
    assert!(again.reused);
    assert_eq!(again.status, ArchiveStatus::Complete);
}

/// Record store whose writes of `complete` records fail.
struct CompleteRejectingStore {
    inner: Database,
}

#[async_trait]
impl RecordStore for CompleteRejectingStore {
    async fn create(&self, record: NewArchiveRecord) -> Result<ArchiveRecord, StoreError> {
        self.inner.create(record).await
    }

    async fn get(&self, id: i64) -> Result<ArchiveRecord, StoreError> {
        self.inner.get(id).await
    }

    async fn find_by_source_url(
        &self,
        source_url: &str,
    ) -> Result<Option<ArchiveRecord>, StoreError> {
        self.inner.find_by_source_url(source_url).await
    }

    async fn update(&self, record: &ArchiveRecord) -> Result<(), StoreError> {
        if record.status == ArchiveStatus::Complete {
            return Err(StoreError::Backend(anyhow::anyhow!("disk full")));
        }
        self.inner.update(record).await
    }

    async fn fail_interrupted(&self, detail: &str) -> Result<u64, StoreError> {
        self.inner.fail_interrupted(detail).await
    }
}

#[tokio::test]
async fn test_failed_completion_write_marks_failed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/plain"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(temp_dir.path());
    let db = Database::new(&config.database_path).await.unwrap();
    let store = CompleteRejectingStore { inner: db.clone() };
    let archiver = Archiver::new(&config, Arc::new(store), Arc::new(LocalBlobStore::new())).unwrap();

    let url = format!("{}/plain", server.uri());
    let err = archiver.convert(&url).await.unwrap_err();
    assert!(matches!(err, ArchiveError::Store(_)));

    let record = db.find_by_source_url(&url).await.unwrap().unwrap();
    assert_eq!(record.status, ArchiveStatus::Failed);
    assert!(record
        .error_detail
        .as_deref()
        .is_some_and(|d| d.contains("disk full")));
}

#[tokio::test]
async fn test_assets_download_concurrently_in_reference_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gallery"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<img src="/first.png"><img src="/second.png"><img src="/third.png">"#,
        ))
        .mount(&server)
        .await;
    // The first image finishes last
    for (name, delay_ms) in [("/first.png", 800), ("/second.png", 400), ("/third.png", 400)] {
        Mock::given(method("GET"))
            .and(path(name))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"PNG".to_vec())
                    .set_delay(Duration::from_millis(delay_ms)),
            )
            .mount(&server)
            .await;
    }
    let temp_dir = TempDir::new().unwrap();
    let config = Config {
        asset_concurrency: 3,
        ..create_test_config(temp_dir.path())
    };
    let (archiver, db) = setup_with(&config, Arc::new(LocalBlobStore::new())).await;

    let started = std::time::Instant::now();
    let outcome = archiver
        .convert(&format!("{}/gallery", server.uri()))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    // Sequential downloads would take at least 1600ms
    assert!(elapsed < Duration::from_millis(1400), "took {elapsed:?}");

    let images = db.get(outcome.id).await.unwrap().asset_manifest.images;
    let names: Vec<_> = images
        .iter()
        .map(|p| Path::new(p).file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["first.png", "second.png", "third.png"]);
}

async fn mount_slow_page(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html></html>")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_cancelled_job_is_marked_failed() {
    let server = MockServer::start().await;
    mount_slow_page(&server).await;
    let (archiver, db, _config, _temp_dir) = setup().await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let url = format!("{}/slow", server.uri());
    let err = archiver
        .convert_with(
            &url,
            ConvertOptions {
                cancel,
                deadline: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiveError::Cancelled(_)));

    let record = db.find_by_source_url(&url).await.unwrap().unwrap();
    assert_eq!(record.status, ArchiveStatus::Failed);
    assert_eq!(record.error_detail.as_deref(), Some("job cancelled"));
}

#[tokio::test]
async fn test_deadline_exceeded_is_marked_failed() {
    let server = MockServer::start().await;
    mount_slow_page(&server).await;
    let (archiver, db, _config, _temp_dir) = setup().await;

    let url = format!("{}/slow", server.uri());
    let err = archiver
        .convert_with(
            &url,
            ConvertOptions {
                deadline: Some(Duration::from_millis(100)),
                ..ConvertOptions::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiveError::Cancelled(_)));

    let record = db.find_by_source_url(&url).await.unwrap().unwrap();
    assert_eq!(record.status, ArchiveStatus::Failed);
    assert_eq!(record.error_detail.as_deref(), Some("job deadline exceeded"));
}
