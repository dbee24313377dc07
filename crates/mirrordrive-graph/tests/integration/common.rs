//! Shared test helpers for Graph API integration tests
//!
//! Provides wiremock-based mock server setup and JSON fixtures for
//! Microsoft Graph `driveItem` resources.

use mirrordrive_graph::{GraphClient, GraphRemoteDrive};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Starts a mock server and returns it with a drive pointing at it
pub async fn setup_drive() -> (MockServer, GraphRemoteDrive) {
    let server = MockServer::start().await;
    let client = GraphClient::with_base_url("test-access-token", server.uri());
    (server, GraphRemoteDrive::new(client))
}

/// A file `driveItem` under the given parent path (`/drive/root:` form)
pub fn file_json(id: &str, name: &str, parent: &str, size: u64, ctag: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "size": size,
        "lastModifiedDateTime": "2026-02-10T08:00:00Z",
        "cTag": ctag,
        "eTag": format!("{ctag}-e"),
        "parentReference": { "id": "PARENT", "path": parent },
        "file": { "hashes": { "quickXorHash": "AAAAAAAAAAAAAAAAAAAAAAAAAAA=" } }
    })
}

/// A folder `driveItem` under the given parent path
pub fn folder_json(id: &str, name: &str, parent: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "size": 4096,
        "parentReference": { "id": "PARENT", "path": parent },
        "folder": { "childCount": 1 }
    })
}

/// Mounts a file download endpoint for a specific item ID
pub async fn mount_download(server: &MockServer, item_id: &str, content: &[u8]) {
    Mock::given(method("GET"))
        .and(path(format!("/me/drive/items/{item_id}/content")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(content.to_vec())
                .append_header("Content-Type", "application/octet-stream"),
        )
        .mount(server)
        .await;
}
