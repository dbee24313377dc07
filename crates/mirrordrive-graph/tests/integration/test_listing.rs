//! Integration tests for root and children listing

use mirrordrive_core::{domain::newtypes::RemoteId, ports::IRemoteDrive};
use serde_json::json;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, ResponseTemplate};

use crate::common;

#[tokio::test]
async fn test_get_root() {
    let (server, drive) = common::setup_drive().await;

    Mock::given(method("GET"))
        .and(path("/me/drive/root"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "ROOT-001",
            "name": "root",
            "root": {},
            "folder": { "childCount": 3 }
        })))
        .mount(&server)
        .await;

    let root = drive.get_root().await.unwrap();
    assert_eq!(root.id.as_str(), "ROOT-001");
    assert!(root.is_folder);
    assert!(root.path.is_none());
}

#[tokio::test]
async fn test_list_children_follows_pages() {
    let (server, drive) = common::setup_drive().await;

    Mock::given(method("GET"))
        .and(path("/me/drive/items/ROOT-001/children"))
        .and(query_param_is_missing("$skiptoken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                common::folder_json("folder-001", "Documents", "/drive/root:"),
            ],
            "@odata.nextLink": format!(
                "{}/me/drive/items/ROOT-001/children?$skiptoken=2",
                server.uri()
            )
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/me/drive/items/ROOT-001/children"))
        .and(query_param("$skiptoken", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                common::file_json("file-001", "notes.md", "/drive/root:", 12, "c1"),
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let root_id = RemoteId::new("ROOT-001".to_string()).unwrap();
    let children = drive.list_children(&root_id).await.unwrap();

    let paths: Vec<&str> = children
        .iter()
        .map(|c| c.path.as_ref().unwrap().as_str())
        .collect();
    assert_eq!(paths, vec!["/Documents", "/notes.md"]);
    assert!(children[0].is_folder);
    assert_eq!(children[0].size, 0);
    assert!(!children[1].is_folder);
}

#[tokio::test]
async fn test_list_children_of_missing_folder() {
    let (server, drive) = common::setup_drive().await;

    Mock::given(method("GET"))
        .and(path("/me/drive/items/NOPE/children"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "code": "itemNotFound", "message": "Item does not exist" }
        })))
        .mount(&server)
        .await;

    let err = drive
        .list_children(&RemoteId::new("NOPE".to_string()).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, mirrordrive_core::ports::RemoteError::NotFound(_)));
}
