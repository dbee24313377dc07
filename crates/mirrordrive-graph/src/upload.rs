//! Upload operations for Microsoft Graph API (OneDrive)
//!
//! Provides functions for uploading files to OneDrive:
//! - [`upload_small`] - Single-request upload for small files
//! - [`upload_large`] - Resumable upload session in fixed-size chunks
//! - [`create_upload_session`] - Creates a resumable upload session
//! - `upload_chunk` - Uploads a single chunk within a session
//!
//! Both paths accept an optional entity tag sent as `If-Match`; a 412
//! answer surfaces as [`GraphError::PreconditionFailed`].
//!
//! ## Microsoft Graph API References
//!
//! - [Upload small files](https://learn.microsoft.com/en-us/graph/api/driveitem-put-content)
//! - [Upload large files](https://learn.microsoft.com/en-us/graph/api/driveitem-createuploadsession)

use mirrordrive_core::{domain::newtypes::RemotePath, ports::ProgressSink, ports::RemoteItem};
use reqwest::{header, Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use url::Url;

use crate::{
    client::{check_status, parse_json, GraphClient},
    items::GraphDriveItem,
    GraphError,
};

/// Response from creating an upload session
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadSessionResponse {
    /// The pre-authorized URL to use for uploading chunks
    upload_url: String,
}

/// Builds the absolute item-by-path URL for a file
///
/// `/Documents/a b.txt` with suffix `content` becomes
/// `{base}/me/drive/root:/Documents/a%20b.txt:/content`. Each path
/// component is percent-encoded on its own.
pub(crate) fn item_path_url(
    client: &GraphClient,
    path: &RemotePath,
    suffix: &str,
) -> Result<Url, GraphError> {
    if path.is_root() {
        return Err(GraphError::InvalidUrl(
            "the drive root is not a file".to_string(),
        ));
    }

    let mut url = Url::parse(client.base_url())
        .map_err(|e| GraphError::InvalidUrl(format!("{}: {e}", client.base_url())))?;
    let components: Vec<&str> = path.as_str().trim_start_matches('/').split('/').collect();
    let last = components.len() - 1;

    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|()| GraphError::InvalidUrl(client.base_url().to_string()))?;
        segments.pop_if_empty();
        segments.extend(["me", "drive", "root:"]);
        for (i, component) in components.iter().enumerate() {
            if i == last {
                segments.push(&format!("{component}:"));
            } else {
                segments.push(component);
            }
        }
        segments.push(suffix);
    }

    Ok(url)
}

/// Uploads a small file in a single PUT request
///
/// Uses the simple upload API: `PUT /me/drive/root:{path}:/content`.
pub async fn upload_small(
    client: &GraphClient,
    path: &RemotePath,
    data: Vec<u8>,
    if_match: Option<&str>,
) -> Result<RemoteItem, GraphError> {
    let url = item_path_url(client, path, "content")?;
    debug!(path = %path, size = data.len(), "Uploading small file");

    let mut request = client
        .request_url(Method::PUT, url.as_str())
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(data);
    if let Some(etag) = if_match {
        request = request.header(header::IF_MATCH, etag);
    }

    let item: GraphDriveItem = client.send_json(request).await?;
    debug!(id = %item.id, "Small upload completed");
    item.into_remote_item()
}

/// Creates a resumable upload session that replaces any existing file
///
/// Uses the upload session API: `POST /me/drive/root:{path}:/createUploadSession`.
/// The session URL stays valid for a limited time of inactivity.
pub async fn create_upload_session(
    client: &GraphClient,
    path: &RemotePath,
    if_match: Option<&str>,
) -> Result<String, GraphError> {
    let url = item_path_url(client, path, "createUploadSession")?;
    debug!(path = %path, "Creating upload session");

    let mut request = client
        .request_url(Method::POST, url.as_str())
        .json(&json!({ "item": { "@microsoft.graph.conflictBehavior": "replace" } }));
    if let Some(etag) = if_match {
        request = request.header(header::IF_MATCH, etag);
    }

    let response: UploadSessionResponse = client.send_json(request).await?;
    Ok(response.upload_url)
}

/// Uploads a single chunk of data to a resumable upload session
///
/// Returns the finished item on the final chunk (200/201) and `None` for
/// intermediate chunks (202 Accepted).
pub(crate) async fn upload_chunk(
    client: &GraphClient,
    upload_url: &str,
    data: &[u8],
    offset: u64,
    total: u64,
) -> Result<Option<GraphDriveItem>, GraphError> {
    let chunk_len = data.len() as u64;
    let range_end = offset + chunk_len - 1;
    let content_range = format!("bytes {offset}-{range_end}/{total}");

    debug!(range = %content_range, "Uploading chunk");

    let request = client
        .anonymous_request(Method::PUT, upload_url)
        .header(header::CONTENT_LENGTH, chunk_len.to_string())
        .header(header::CONTENT_RANGE, &content_range)
        .body(data.to_vec());
    let response = check_status(request.send().await?).await?;

    if response.status() == StatusCode::ACCEPTED {
        return Ok(None);
    }
    let item: GraphDriveItem = parse_json(response).await?;
    Ok(Some(item))
}

/// Uploads a large file through a resumable upload session
///
/// `chunk_size` must be a multiple of 320 KiB. Progress is reported with
/// the number of bytes sent after each chunk.
pub async fn upload_large(
    client: &GraphClient,
    path: &RemotePath,
    data: Vec<u8>,
    chunk_size: usize,
    if_match: Option<&str>,
    progress: ProgressSink,
) -> Result<RemoteItem, GraphError> {
    let total = data.len() as u64;
    let chunk_size = chunk_size.max(1);
    info!(
        path = %path,
        size = total,
        chunks = data.len().div_ceil(chunk_size),
        "Starting large file upload"
    );

    let upload_url = create_upload_session(client, path, if_match).await?;

    let mut offset: usize = 0;
    let mut finished = None;
    while offset < data.len() {
        let end = (offset + chunk_size).min(data.len());
        let result = upload_chunk(client, &upload_url, &data[offset..end], offset as u64, total)
            .await?;
        offset = end;
        progress(offset as u64);

        if let Some(item) = result {
            finished = Some(item);
        }
    }

    let item = finished.ok_or_else(|| {
        GraphError::InvalidResponse(
            "upload session completed without returning the item".to_string(),
        )
    })?;

    info!(path = %path, id = %item.id, "Large upload completed");
    item.into_remote_item()
}
