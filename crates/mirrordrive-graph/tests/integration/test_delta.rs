//! Integration tests for delta (incremental sync) queries
//!
//! - Initial page without a cursor
//! - Next-page cursors are returned, not followed
//! - Bare tokens are sent as the `token` query parameter
//! - 410 Gone maps to an expired token
//! - `token=latest` yields a token without listing items

use mirrordrive_core::{
    domain::newtypes::DeltaToken,
    ports::{IRemoteDrive, RemoteError},
};
use mirrordrive_graph::{GraphClient, GraphRemoteDrive};
use serde_json::json;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

#[tokio::test]
async fn test_initial_page_returns_items_and_token() {
    let (server, drive) = common::setup_drive().await;

    Mock::given(method("GET"))
        .and(path("/me/drive/root/delta"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                { "id": "ROOT", "name": "root", "root": {}, "folder": { "childCount": 2 } },
                common::folder_json("folder-001", "Documents", "/drive/root:"),
                common::file_json("file-001", "report.txt", "/drive/root:/Documents", 1024, "c1"),
            ],
            "@odata.deltaLink": format!("{}/me/drive/root/delta?token=tok-001", server.uri())
        })))
        .mount(&server)
        .await;

    let page = drive.get_delta_page(None).await.expect("delta page failed");

    assert_eq!(page.items.len(), 3);
    assert!(page.is_last());
    assert!(page.items[0].path.is_none());
    assert_eq!(
        page.items[1].path.as_ref().unwrap().as_str(),
        "/Documents"
    );
    assert!(page.items[1].is_folder);
    let file = &page.items[2];
    assert_eq!(file.path.as_ref().unwrap().as_str(), "/Documents/report.txt");
    assert_eq!(file.size, 1024);
    assert_eq!(file.ctag.as_deref(), Some("c1"));
    assert!(page
        .delta_token
        .as_ref()
        .unwrap()
        .as_str()
        .ends_with("token=tok-001"));
}

#[tokio::test]
async fn test_next_page_cursor_is_followed_by_caller() {
    let (server, drive) = common::setup_drive().await;

    Mock::given(method("GET"))
        .and(path("/me/drive/root/delta"))
        .and(query_param_is_missing("$skiptoken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [common::file_json("file-001", "a.txt", "/drive/root:", 1, "c1")],
            "@odata.nextLink": format!("{}/me/drive/root/delta?$skiptoken=page2", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/me/drive/root/delta"))
        .and(query_param("$skiptoken", "page2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                { "id": "file-009", "name": "gone.txt", "deleted": { "state": "deleted" } }
            ],
            "@odata.deltaLink": format!("{}/me/drive/root/delta?token=tok-002", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;

    let first = drive.get_delta_page(None).await.unwrap();
    assert!(!first.is_last());
    assert_eq!(first.items.len(), 1);

    let cursor = first.trailing_token().cloned().unwrap();
    let second = drive.get_delta_page(Some(&cursor)).await.unwrap();
    assert!(second.is_last());
    assert!(second.items[0].is_deleted);
    assert!(second.items[0].path.is_none());
}

#[tokio::test]
async fn test_bare_token_is_sent_as_query_parameter() {
    let (server, drive) = common::setup_drive().await;

    Mock::given(method("GET"))
        .and(path("/me/drive/root/delta"))
        .and(query_param("token", "previous-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [],
            "@odata.deltaLink": format!("{}/me/drive/root/delta?token=next", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;

    let token = DeltaToken::new("previous-token".to_string()).unwrap();
    let page = drive.get_delta_page(Some(&token)).await.unwrap();
    assert!(page.items.is_empty());
    assert!(page.delta_token.is_some());
}

#[tokio::test]
async fn test_gone_maps_to_token_expired() {
    let (server, drive) = common::setup_drive().await;

    Mock::given(method("GET"))
        .and(path("/me/drive/root/delta"))
        .respond_with(ResponseTemplate::new(410).set_body_json(json!({
            "error": { "code": "resyncRequired", "message": "Resync required" }
        })))
        .mount(&server)
        .await;

    let token = DeltaToken::new(format!("{}/me/drive/root/delta?token=old", server.uri())).unwrap();
    let err = drive.get_delta_page(Some(&token)).await.unwrap_err();
    assert_eq!(err, RemoteError::TokenExpired);
}

#[tokio::test]
async fn test_latest_delta_token() {
    let (server, drive) = common::setup_drive().await;

    Mock::given(method("GET"))
        .and(path("/me/drive/root/delta"))
        .and(query_param("token", "latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [],
            "@odata.deltaLink": format!("{}/me/drive/root/delta?token=now-001", server.uri())
        })))
        .mount(&server)
        .await;

    let token = drive.latest_delta_token().await.unwrap();
    assert!(token.as_str().ends_with("token=now-001"));
}

#[tokio::test]
async fn test_throttled_delta_is_retried() {
    let (server, drive) = common::setup_drive().await;

    Mock::given(method("GET"))
        .and(path("/me/drive/root/delta"))
        .respond_with(ResponseTemplate::new(429).append_header("Retry-After", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/me/drive/root/delta"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [],
            "@odata.deltaLink": format!("{}/me/drive/root/delta?token=t", server.uri())
        })))
        .mount(&server)
        .await;

    let page = drive.get_delta_page(None).await.unwrap();
    assert!(page.is_last());
}

#[tokio::test]
async fn test_throttling_past_retry_limit_is_transient() {
    let server = MockServer::start().await;
    let client = GraphClient::with_base_url("test-access-token", server.uri()).with_max_retries(1);
    let drive = GraphRemoteDrive::new(client);

    Mock::given(method("GET"))
        .and(path("/me/drive/root/delta"))
        .respond_with(ResponseTemplate::new(429).append_header("Retry-After", "0"))
        .expect(2)
        .mount(&server)
        .await;

    let err = drive.get_delta_page(None).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let (server, drive) = common::setup_drive().await;

    Mock::given(method("GET"))
        .and(path("/me/drive/root/delta"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = drive.get_delta_page(None).await.unwrap_err();
    assert!(err.is_transient());
}
