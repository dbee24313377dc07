//! Graph `driveItem` resource and its conversion to [`RemoteItem`]
//!
//! See: <https://learn.microsoft.com/en-us/graph/api/resources/driveitem>

use chrono::{DateTime, Utc};
use mirrordrive_core::{
    domain::{
        newtypes::{FileHash, RemoteId},
        normalize_remote_path,
    },
    ports::RemoteItem,
};
use serde::Deserialize;
use tracing::warn;

use crate::GraphError;

/// A drive item as returned by item, children, delta and upload endpoints
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GraphDriveItem {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Size in bytes (folders report the size of their contents)
    pub size: Option<u64>,

    pub last_modified_date_time: Option<DateTime<Utc>>,

    pub parent_reference: Option<GraphParentReference>,

    /// File facet (present if the item is a file)
    pub file: Option<GraphFileFacet>,

    /// Folder facet (present if the item is a folder)
    pub folder: Option<serde_json::Value>,

    /// Deleted facet (present in delta results for removed items)
    pub deleted: Option<serde_json::Value>,

    /// Root facet (present only on the drive root)
    pub root: Option<serde_json::Value>,

    #[serde(rename = "cTag")]
    pub c_tag: Option<String>,

    #[serde(rename = "eTag")]
    pub e_tag: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GraphParentReference {
    pub id: Option<String>,
    /// Format: `/drive/root:/path/to/parent`
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphFileFacet {
    pub hashes: Option<GraphHashes>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GraphHashes {
    /// QuickXorHash of the file content (Base64-encoded)
    pub quick_xor_hash: Option<String>,
}

/// A page of a collection response (`children`, `delta`)
#[derive(Debug, Deserialize)]
pub(crate) struct GraphCollection {
    #[serde(default)]
    pub value: Vec<GraphDriveItem>,

    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,

    #[serde(rename = "@odata.deltaLink")]
    pub delta_link: Option<String>,
}

impl GraphDriveItem {
    /// Convert into the port-level item
    ///
    /// The path is derived from the parent reference and left empty for the
    /// drive root, for tombstones and for items whose parent path is not
    /// reported. Malformed hashes are dropped with a warning.
    pub fn into_remote_item(self) -> Result<RemoteItem, GraphError> {
        let id = RemoteId::new(self.id.clone())
            .map_err(|e| GraphError::InvalidResponse(e.to_string()))?;
        let is_deleted = self.deleted.is_some();
        let is_folder = self.folder.is_some() || self.root.is_some();

        let path = if self.root.is_some() || is_deleted {
            None
        } else {
            match self.parent_reference.as_ref().and_then(|p| p.path.as_deref()) {
                Some(parent) => Some(
                    normalize_remote_path(parent, &self.name)
                        .map_err(|e| GraphError::InvalidResponse(e.to_string()))?,
                ),
                None => None,
            }
        };

        let parent_id = self
            .parent_reference
            .as_ref()
            .and_then(|p| p.id.clone())
            .and_then(|id| RemoteId::new(id).ok());

        let hash = self
            .file
            .as_ref()
            .and_then(|f| f.hashes.as_ref())
            .and_then(|h| h.quick_xor_hash.clone())
            .and_then(|raw| match FileHash::new(raw) {
                Ok(hash) => Some(hash),
                Err(e) => {
                    warn!(id = %id, error = %e, "Ignoring malformed content hash");
                    None
                }
            });

        Ok(RemoteItem {
            id,
            name: self.name,
            path,
            parent_id,
            is_folder,
            is_deleted,
            size: if is_folder { 0 } else { self.size.unwrap_or(0) },
            modified: self.last_modified_date_time,
            hash,
            ctag: self.c_tag,
            etag: self.e_tag,
        })
    }
}

/// Convert a page of items, keeping the first conversion error
pub(crate) fn convert_all(items: Vec<GraphDriveItem>) -> Result<Vec<RemoteItem>, GraphError> {
    items.into_iter().map(GraphDriveItem::into_remote_item).collect()
}
