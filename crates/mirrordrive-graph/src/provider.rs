//! GraphRemoteDrive - IRemoteDrive implementation for Microsoft Graph API
//!
//! Wraps the [`GraphClient`] and delegates to the delta and upload modules
//! to fulfil the [`IRemoteDrive`] port contract.
//!
//! ## Design Notes
//!
//! - Files above the large-file threshold go through an upload session;
//!   smaller ones use a single PUT.
//! - Read-only calls repeat on 429 through
//!   [`GraphClient::execute_with_retry`]; writes are sent once.
//! - Deletion moves the item to the recycle bin (Graph soft delete).

use futures_util::StreamExt;
use mirrordrive_core::{
    config::TransfersConfig,
    domain::newtypes::{DeltaToken, RemoteId, RemotePath},
    ports::{DeltaPage, IRemoteDrive, ProgressSink, RemoteError, RemoteItem},
};
use reqwest::Method;
use tracing::debug;

use crate::{
    client::{parse_json, GraphClient},
    delta,
    items::{convert_all, GraphCollection, GraphDriveItem},
    upload, GraphError,
};

/// Default size above which uploads use an upload session (4 MiB)
const DEFAULT_LARGE_FILE_THRESHOLD: u64 = 4 * 1024 * 1024;

/// Default upload session chunk size (3200 KiB, a multiple of 320 KiB)
const DEFAULT_CHUNK_SIZE: usize = 3200 * 1024;

/// Remote drive backed by the Microsoft Graph API
pub struct GraphRemoteDrive {
    client: GraphClient,
    large_file_threshold: u64,
    chunk_size: usize,
}

impl GraphRemoteDrive {
    /// Creates a new `GraphRemoteDrive` with default transfer limits
    pub fn new(client: GraphClient) -> Self {
        Self {
            client,
            large_file_threshold: DEFAULT_LARGE_FILE_THRESHOLD,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Creates a `GraphRemoteDrive` using the configured transfer limits
    pub fn from_config(client: GraphClient, transfers: &TransfersConfig) -> Self {
        Self::new(client)
            .with_transfer_limits(transfers.large_file_threshold_bytes(), transfers.chunk_size_bytes())
    }

    pub fn with_transfer_limits(mut self, large_file_threshold: u64, chunk_size: u64) -> Self {
        self.large_file_threshold = large_file_threshold;
        self.chunk_size = usize::try_from(chunk_size).unwrap_or(DEFAULT_CHUNK_SIZE);
        self
    }

    pub fn client(&self) -> &GraphClient {
        &self.client
    }

    async fn fetch_item(&self, path: &str) -> Result<RemoteItem, GraphError> {
        let response = self
            .client
            .execute_with_retry(|| self.client.request(Method::GET, path))
            .await?;
        let item: GraphDriveItem = parse_json(response).await?;
        item.into_remote_item()
    }

    async fn fetch_children(&self, folder_id: &RemoteId) -> Result<Vec<RemoteItem>, GraphError> {
        let first = format!(
            "{}/me/drive/items/{}/children",
            self.client.base_url(),
            folder_id.as_str()
        );
        let mut next = Some(first);
        let mut children = Vec::new();

        while let Some(url) = next.take() {
            let response = self
                .client
                .execute_with_retry(|| self.client.request_url(Method::GET, &url))
                .await?;
            let page: GraphCollection = parse_json(response).await?;
            children.extend(convert_all(page.value)?);
            next = page.next_link;
        }

        Ok(children)
    }

    async fn fetch_content(
        &self,
        id: &RemoteId,
        progress: ProgressSink,
    ) -> Result<Vec<u8>, GraphError> {
        let path = format!("/me/drive/items/{}/content", id.as_str());
        let response = self
            .client
            .execute_with_retry(|| self.client.request(Method::GET, &path))
            .await?;

        let mut content = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            content.extend_from_slice(&chunk?);
            progress(content.len() as u64);
        }

        debug!(id = %id, bytes = content.len(), "Download completed");
        Ok(content)
    }
}

#[async_trait::async_trait]
impl IRemoteDrive for GraphRemoteDrive {
    async fn get_root(&self) -> Result<RemoteItem, RemoteError> {
        debug!("GraphRemoteDrive::get_root");
        Ok(self.fetch_item("/me/drive/root").await?)
    }

    async fn list_children(&self, folder_id: &RemoteId) -> Result<Vec<RemoteItem>, RemoteError> {
        debug!(id = %folder_id, "GraphRemoteDrive::list_children");
        Ok(self.fetch_children(folder_id).await?)
    }

    async fn latest_delta_token(&self) -> Result<DeltaToken, RemoteError> {
        debug!("GraphRemoteDrive::latest_delta_token");
        Ok(delta::latest_delta_token(&self.client).await?)
    }

    async fn get_delta_page(&self, cursor: Option<&DeltaToken>) -> Result<DeltaPage, RemoteError> {
        Ok(delta::get_delta_page(&self.client, cursor).await?)
    }

    async fn upload(
        &self,
        path: &RemotePath,
        content: Vec<u8>,
        if_match: Option<&str>,
        progress: ProgressSink,
    ) -> Result<RemoteItem, RemoteError> {
        let size = content.len() as u64;
        debug!(path = %path, size, "GraphRemoteDrive::upload");

        if size > self.large_file_threshold {
            Ok(
                upload::upload_large(&self.client, path, content, self.chunk_size, if_match, progress)
                    .await?,
            )
        } else {
            let item = upload::upload_small(&self.client, path, content, if_match).await?;
            progress(size);
            Ok(item)
        }
    }

    async fn download(&self, id: &RemoteId, progress: ProgressSink) -> Result<Vec<u8>, RemoteError> {
        debug!(id = %id, "GraphRemoteDrive::download");
        Ok(self.fetch_content(id, progress).await?)
    }

    async fn delete(&self, id: &RemoteId) -> Result<(), RemoteError> {
        debug!(id = %id, "GraphRemoteDrive::delete");
        let path = format!("/me/drive/items/{}", id.as_str());
        self.client
            .send(self.client.request(Method::DELETE, &path))
            .await
            .map_err(RemoteError::from)?;
        Ok(())
    }
}
