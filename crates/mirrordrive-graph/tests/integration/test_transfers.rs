//! Integration tests for uploads, downloads and deletions

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mirrordrive_core::{
    domain::newtypes::{RemoteId, RemotePath},
    ports::{no_progress, IRemoteDrive, ProgressSink, RemoteError},
};
use mirrordrive_graph::{GraphClient, GraphRemoteDrive};
use serde_json::json;
use wiremock::matchers::{body_bytes, header, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common;

fn remote_path(p: &str) -> RemotePath {
    RemotePath::new(p.to_string()).unwrap()
}

fn recording_progress() -> (ProgressSink, Arc<AtomicU64>) {
    let seen = Arc::new(AtomicU64::new(0));
    let sink_seen = Arc::clone(&seen);
    let sink: ProgressSink = Arc::new(move |bytes| {
        sink_seen.store(bytes, Ordering::SeqCst);
    });
    (sink, seen)
}

// ============================================================================
// Downloads
// ============================================================================

#[tokio::test]
async fn test_download_returns_content_and_reports_progress() {
    let (server, drive) = common::setup_drive().await;

    let content: Vec<u8> = (0..200_000).map(|i| (i % 251) as u8).collect();
    common::mount_download(&server, "download-001", &content).await;

    let (progress, seen) = recording_progress();
    let data = drive
        .download(&RemoteId::new("download-001".to_string()).unwrap(), progress)
        .await
        .expect("download failed");

    assert_eq!(data, content);
    assert_eq!(seen.load(Ordering::SeqCst), content.len() as u64);
}

#[tokio::test]
async fn test_download_empty_file() {
    let (server, drive) = common::setup_drive().await;
    common::mount_download(&server, "empty-001", &[]).await;

    let data = drive
        .download(&RemoteId::new("empty-001".to_string()).unwrap(), no_progress())
        .await
        .unwrap();
    assert!(data.is_empty());
}

// ============================================================================
// Small uploads
// ============================================================================

#[tokio::test]
async fn test_small_upload_sends_if_match() {
    let (server, drive) = common::setup_drive().await;

    Mock::given(method("PUT"))
        .and(path("/me/drive/root:/Documents/test.txt:/content"))
        .and(header("If-Match", "etag-7"))
        .and(body_bytes(b"hello".to_vec()))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::file_json(
            "upload-001",
            "test.txt",
            "/drive/root:/Documents",
            5,
            "c2",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let (progress, seen) = recording_progress();
    let item = drive
        .upload(
            &remote_path("/Documents/test.txt"),
            b"hello".to_vec(),
            Some("etag-7"),
            progress,
        )
        .await
        .unwrap();

    assert_eq!(item.id.as_str(), "upload-001");
    assert_eq!(item.path.unwrap().as_str(), "/Documents/test.txt");
    assert_eq!(item.ctag.as_deref(), Some("c2"));
    assert_eq!(seen.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_small_upload_precondition_failed() {
    let (server, drive) = common::setup_drive().await;

    Mock::given(method("PUT"))
        .and(path("/me/drive/root:/Documents/test.txt:/content"))
        .respond_with(ResponseTemplate::new(412).set_body_json(json!({
            "error": { "code": "resourceModified", "message": "ETag mismatch" }
        })))
        .mount(&server)
        .await;

    let err = drive
        .upload(
            &remote_path("/Documents/test.txt"),
            b"hello".to_vec(),
            Some("stale"),
            no_progress(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::PreconditionFailed(_)));
}

// ============================================================================
// Upload sessions
// ============================================================================

#[tokio::test]
async fn test_large_upload_uses_session_chunks() {
    let server = wiremock::MockServer::start().await;
    let client = GraphClient::with_base_url("test-access-token", server.uri());
    let drive = GraphRemoteDrive::new(client).with_transfer_limits(100_000, 327_680);

    Mock::given(method("POST"))
        .and(path("/me/drive/root:/Videos/clip.mp4:/createUploadSession"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uploadUrl": format!("{}/upload/session-1", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/upload/session-1"))
        .and(header("Content-Range", "bytes 0-327679/400000"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "nextExpectedRanges": ["327680-"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/upload/session-1"))
        .and(header("Content-Range", "bytes 327680-399999/400000"))
        .respond_with(ResponseTemplate::new(201).set_body_json(common::file_json(
            "video-001",
            "clip.mp4",
            "/drive/root:/Videos",
            400_000,
            "c1",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let (progress, seen) = recording_progress();
    let item = drive
        .upload(&remote_path("/Videos/clip.mp4"), vec![7u8; 400_000], None, progress)
        .await
        .unwrap();

    assert_eq!(item.id.as_str(), "video-001");
    assert_eq!(item.size, 400_000);
    assert_eq!(seen.load(Ordering::SeqCst), 400_000);
}

#[tokio::test]
async fn test_large_upload_session_precondition_failed() {
    let server = wiremock::MockServer::start().await;
    let client = GraphClient::with_base_url("test-access-token", server.uri());
    let drive = GraphRemoteDrive::new(client).with_transfer_limits(10, 327_680);

    Mock::given(method("POST"))
        .and(path("/me/drive/root:/big.bin:/createUploadSession"))
        .and(header("If-Match", "old-etag"))
        .respond_with(ResponseTemplate::new(412))
        .mount(&server)
        .await;

    let err = drive
        .upload(&remote_path("/big.bin"), vec![1u8; 64], Some("old-etag"), no_progress())
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::PreconditionFailed(_)));
}

// ============================================================================
// Deletions
// ============================================================================

#[tokio::test]
async fn test_delete_item() {
    let (server, drive) = common::setup_drive().await;

    Mock::given(method("DELETE"))
        .and(path("/me/drive/items/file-001"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    drive
        .delete(&RemoteId::new("file-001".to_string()).unwrap())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_delete_missing_item_is_not_found() {
    let (server, drive) = common::setup_drive().await;

    Mock::given(method("DELETE"))
        .and(path("/me/drive/items/file-404"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = drive
        .delete(&RemoteId::new("file-404".to_string()).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::NotFound(_)));
}
