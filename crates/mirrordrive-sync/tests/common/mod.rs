//! Shared fixtures: an in-memory remote drive, a store wrapper that can
//! fail on demand, and a harness wiring both to a temp local root.

#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashSet},
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mirrordrive_cache::{DatabasePool, SqliteStateRepository};
use mirrordrive_core::{
    domain::{
        newtypes::{AccountId, DeltaToken, RemoteId, RemotePath, SessionId, SyncPath, UniqueId},
        AccountContext, AccountSettings, DriveItem, FileOperationLog, SyncConflict, SyncSessionLog,
    },
    ports::{
        DeltaPage, IRemoteDrive, IStateRepository, OperationFilter, ProgressSink, RemoteError,
        RemoteItem,
    },
};
use mirrordrive_sync::{
    filesystem::quick_xor_hash, LocalFileSystemAdapter, SyncOptions, SyncOrchestrator, SyncReport,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const ROOT_ID: &str = "root";

pub fn rp(path: &str) -> RemotePath {
    RemotePath::new(path.to_string()).unwrap()
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap()
}

// ============================================================================
// MockDrive
// ============================================================================

struct Entry {
    item: RemoteItem,
    content: Vec<u8>,
}

#[derive(Default)]
struct DriveState {
    entries: BTreeMap<RemotePath, Entry>,
    /// Change feed; a delta token is an offset into it
    log: Vec<RemoteItem>,
    next_id: u64,
    version: u64,
    page_size: usize,
    failing_uploads: HashSet<RemotePath>,
    failing_downloads: HashSet<RemotePath>,
    expire_next_delta: bool,
}

impl DriveState {
    fn next_id(&mut self) -> RemoteId {
        self.next_id += 1;
        RemoteId::new(format!("ID{:04}", self.next_id)).unwrap()
    }

    fn parent_id(&mut self, path: &RemotePath) -> RemoteId {
        match path.parent() {
            Some(parent) if !parent.is_root() => self.ensure_folder(&parent),
            _ => RemoteId::new(ROOT_ID.to_string()).unwrap(),
        }
    }

    fn ensure_folder(&mut self, path: &RemotePath) -> RemoteId {
        if let Some(entry) = self.entries.get(path) {
            return entry.item.id.clone();
        }
        let parent_id = self.parent_id(path);
        let id = self.next_id();
        let item = RemoteItem {
            id: id.clone(),
            name: path.file_name().unwrap_or_default().to_string(),
            path: Some(path.clone()),
            parent_id: Some(parent_id),
            is_folder: true,
            is_deleted: false,
            size: 0,
            modified: Some(base_time()),
            hash: None,
            ctag: None,
            etag: Some(format!("{id}.folder")),
        };
        self.log.push(item.clone());
        self.entries.insert(
            path.clone(),
            Entry {
                item,
                content: Vec::new(),
            },
        );
        id
    }

    fn put(&mut self, path: &RemotePath, content: Vec<u8>, modified: DateTime<Utc>) -> RemoteItem {
        let parent_id = self.parent_id(path);
        let id = match self.entries.get(path) {
            Some(entry) => entry.item.id.clone(),
            None => self.next_id(),
        };
        self.version += 1;
        let item = RemoteItem {
            id,
            name: path.file_name().unwrap_or_default().to_string(),
            path: Some(path.clone()),
            parent_id: Some(parent_id),
            is_folder: false,
            is_deleted: false,
            size: content.len() as u64,
            modified: Some(modified),
            hash: quick_xor_hash(&content).ok(),
            ctag: Some(format!("ctag{}", self.version)),
            etag: Some(format!("etag{}", self.version)),
        };
        self.log.push(item.clone());
        self.entries.insert(
            path.clone(),
            Entry {
                item: item.clone(),
                content,
            },
        );
        item
    }

    fn remove(&mut self, path: &RemotePath) -> bool {
        let Some(entry) = self.entries.remove(path) else {
            return false;
        };
        self.log.push(RemoteItem {
            path: None,
            is_deleted: true,
            ..entry.item
        });
        true
    }

    fn find(&self, id: &RemoteId) -> Option<&Entry> {
        self.entries.values().find(|e| &e.item.id == id)
    }
}

/// Runs while a download is in flight, with the path being downloaded
pub type DownloadHook = Box<dyn Fn(&RemotePath) + Send + Sync>;

/// In-memory drive with call counters and concurrency tracking
pub struct MockDrive {
    state: Mutex<DriveState>,
    download_hook: Mutex<Option<DownloadHook>>,
    transfer_delay: Duration,
    calls: AtomicUsize,
    uploads: AtomicUsize,
    downloads: AtomicUsize,
    deletes: AtomicUsize,
    active_uploads: AtomicUsize,
    peak_uploads: AtomicUsize,
    active_downloads: AtomicUsize,
    peak_downloads: AtomicUsize,
}

impl MockDrive {
    pub fn new() -> Self {
        Self::with_delay(Duration::from_millis(5))
    }

    pub fn with_delay(transfer_delay: Duration) -> Self {
        Self {
            state: Mutex::new(DriveState {
                page_size: 100,
                ..DriveState::default()
            }),
            download_hook: Mutex::new(None),
            transfer_delay,
            calls: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            active_uploads: AtomicUsize::new(0),
            peak_uploads: AtomicUsize::new(0),
            active_downloads: AtomicUsize::new(0),
            peak_downloads: AtomicUsize::new(0),
        }
    }

    pub fn put_file(&self, path: &str, content: &[u8], modified: DateTime<Utc>) -> RemoteId {
        self.state
            .lock()
            .unwrap()
            .put(&rp(path), content.to_vec(), modified)
            .id
    }

    pub fn remove(&self, path: &str) {
        assert!(self.state.lock().unwrap().remove(&rp(path)), "no remote item at {path}");
    }

    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .entries
            .get(&rp(path))
            .map(|e| e.content.clone())
    }

    pub fn etag(&self, path: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .entries
            .get(&rp(path))
            .and_then(|e| e.item.etag.clone())
    }

    pub fn fail_uploads_for(&self, path: &str) {
        self.state.lock().unwrap().failing_uploads.insert(rp(path));
    }

    pub fn fail_downloads_for(&self, path: &str) {
        self.state.lock().unwrap().failing_downloads.insert(rp(path));
    }

    pub fn allow_downloads(&self) {
        self.state.lock().unwrap().failing_downloads.clear();
    }

    pub fn on_download(&self, hook: impl Fn(&RemotePath) + Send + Sync + 'static) {
        *self.download_hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn set_page_size(&self, size: usize) {
        self.state.lock().unwrap().page_size = size;
    }

    pub fn expire_next_delta(&self) {
        self.state.lock().unwrap().expire_next_delta = true;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn peak_uploads(&self) -> usize {
        self.peak_uploads.load(Ordering::SeqCst)
    }

    pub fn peak_downloads(&self) -> usize {
        self.peak_downloads.load(Ordering::SeqCst)
    }

    fn call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn hold(&self, active: &AtomicUsize, peak: &AtomicUsize) {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.transfer_delay).await;
        active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl IRemoteDrive for MockDrive {
    async fn get_root(&self) -> Result<RemoteItem, RemoteError> {
        self.call();
        Ok(RemoteItem {
            id: RemoteId::new(ROOT_ID.to_string()).unwrap(),
            name: "root".to_string(),
            path: None,
            parent_id: None,
            is_folder: true,
            is_deleted: false,
            size: 0,
            modified: None,
            hash: None,
            ctag: None,
            etag: None,
        })
    }

    async fn list_children(&self, folder_id: &RemoteId) -> Result<Vec<RemoteItem>, RemoteError> {
        self.call();
        let state = self.state.lock().unwrap();
        Ok(state
            .entries
            .values()
            .filter(|e| e.item.parent_id.as_ref() == Some(folder_id))
            .map(|e| e.item.clone())
            .collect())
    }

    async fn latest_delta_token(&self) -> Result<DeltaToken, RemoteError> {
        self.call();
        let len = self.state.lock().unwrap().log.len();
        Ok(DeltaToken::new(len.to_string()).unwrap())
    }

    async fn get_delta_page(&self, cursor: Option<&DeltaToken>) -> Result<DeltaPage, RemoteError> {
        self.call();
        let mut state = self.state.lock().unwrap();
        if std::mem::take(&mut state.expire_next_delta) {
            return Err(RemoteError::TokenExpired);
        }
        let start = match cursor {
            Some(token) => token
                .as_str()
                .parse::<usize>()
                .map_err(|e| RemoteError::Permanent(e.to_string()))?,
            None => 0,
        };
        let end = (start + state.page_size.max(1)).min(state.log.len());
        let items = state.log.get(start..end).map(<[_]>::to_vec).unwrap_or_default();
        let token = DeltaToken::new(end.to_string()).unwrap();
        let (next_cursor, delta_token) = if end < state.log.len() {
            (Some(token), None)
        } else {
            (None, Some(token))
        };
        Ok(DeltaPage {
            items,
            next_cursor,
            delta_token,
        })
    }

    async fn upload(
        &self,
        path: &RemotePath,
        content: Vec<u8>,
        if_match: Option<&str>,
        progress: ProgressSink,
    ) -> Result<RemoteItem, RemoteError> {
        self.call();
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.hold(&self.active_uploads, &self.peak_uploads).await;

        let mut state = self.state.lock().unwrap();
        if state.failing_uploads.contains(path) {
            return Err(RemoteError::Permanent(format!("upload rejected: {path}")));
        }
        if let Some(expected) = if_match {
            let current = state.entries.get(path).and_then(|e| e.item.etag.as_deref());
            if current != Some(expected) {
                return Err(RemoteError::PreconditionFailed(path.to_string()));
            }
        }
        progress(content.len() as u64);
        Ok(state.put(path, content, Utc::now()))
    }

    async fn download(&self, id: &RemoteId, progress: ProgressSink) -> Result<Vec<u8>, RemoteError> {
        self.call();
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.hold(&self.active_downloads, &self.peak_downloads).await;

        let state = self.state.lock().unwrap();
        let entry = state
            .find(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        if let Some(path) = &entry.item.path {
            if state.failing_downloads.contains(path) {
                return Err(RemoteError::Transient(format!("download interrupted: {path}")));
            }
            if let Some(hook) = self.download_hook.lock().unwrap().as_ref() {
                hook(path);
            }
        }
        progress(entry.content.len() as u64);
        Ok(entry.content.clone())
    }

    async fn delete(&self, id: &RemoteId) -> Result<(), RemoteError> {
        self.call();
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let path = state
            .find(id)
            .and_then(|e| e.item.path.clone())
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        state.remove(&path);
        Ok(())
    }
}

// ============================================================================
// FlakyStore
// ============================================================================

/// Delegating store whose `save_batch` can be armed to fail
pub struct FlakyStore {
    inner: Arc<SqliteStateRepository>,
    /// Number of successful batch saves left before failing; `usize::MAX` disarms
    batches_before_failure: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<SqliteStateRepository>) -> Self {
        Self {
            inner,
            batches_before_failure: AtomicUsize::new(usize::MAX),
        }
    }

    /// Let `n` batch saves succeed, then fail every following one
    pub fn fail_batches_after(&self, n: usize) {
        self.batches_before_failure.store(n, Ordering::SeqCst);
    }

    pub fn disarm(&self) {
        self.batches_before_failure.store(usize::MAX, Ordering::SeqCst);
    }
}

#[async_trait]
impl IStateRepository for FlakyStore {
    async fn get_account(&self, id: &AccountId) -> anyhow::Result<Option<AccountContext>> {
        self.inner.get_account(id).await
    }

    async fn save_account(&self, account: &AccountContext) -> anyhow::Result<()> {
        self.inner.save_account(account).await
    }

    async fn list_accounts(&self) -> anyhow::Result<Vec<AccountContext>> {
        self.inner.list_accounts().await
    }

    async fn list_items(&self, account_id: &AccountId) -> anyhow::Result<Vec<DriveItem>> {
        self.inner.list_items(account_id).await
    }

    async fn get_item(&self, id: &UniqueId) -> anyhow::Result<Option<DriveItem>> {
        self.inner.get_item(id).await
    }

    async fn get_item_by_path(
        &self,
        account_id: &AccountId,
        path: &RemotePath,
    ) -> anyhow::Result<Option<DriveItem>> {
        self.inner.get_item_by_path(account_id, path).await
    }

    async fn get_item_by_remote_id(
        &self,
        account_id: &AccountId,
        remote_id: &RemoteId,
    ) -> anyhow::Result<Option<DriveItem>> {
        self.inner.get_item_by_remote_id(account_id, remote_id).await
    }

    async fn save_item(&self, item: &DriveItem) -> anyhow::Result<()> {
        self.inner.save_item(item).await
    }

    async fn delete_item(&self, id: &UniqueId) -> anyhow::Result<()> {
        self.inner.delete_item(id).await
    }

    async fn save_batch(&self, items: &[DriveItem]) -> anyhow::Result<()> {
        let left = self.batches_before_failure.load(Ordering::SeqCst);
        if left == 0 {
            anyhow::bail!("simulated crash while saving batch");
        }
        if left != usize::MAX {
            self.batches_before_failure.store(left - 1, Ordering::SeqCst);
        }
        self.inner.save_batch(items).await
    }

    async fn delete_batch(&self, ids: &[UniqueId]) -> anyhow::Result<()> {
        self.inner.delete_batch(ids).await
    }

    async fn get_delta_token(&self, account_id: &AccountId) -> anyhow::Result<Option<DeltaToken>> {
        self.inner.get_delta_token(account_id).await
    }

    async fn save_delta_token(
        &self,
        account_id: &AccountId,
        token: &DeltaToken,
    ) -> anyhow::Result<()> {
        self.inner.save_delta_token(account_id, token).await
    }

    async fn clear_delta_token(&self, account_id: &AccountId) -> anyhow::Result<()> {
        self.inner.clear_delta_token(account_id).await
    }

    async fn get_unresolved_conflicts(
        &self,
        account_id: &AccountId,
    ) -> anyhow::Result<Vec<SyncConflict>> {
        self.inner.get_unresolved_conflicts(account_id).await
    }

    async fn get_conflict_by_path(
        &self,
        account_id: &AccountId,
        path: &RemotePath,
    ) -> anyhow::Result<Option<SyncConflict>> {
        self.inner.get_conflict_by_path(account_id, path).await
    }

    async fn save_conflict(&self, conflict: &SyncConflict) -> anyhow::Result<()> {
        self.inner.save_conflict(conflict).await
    }

    async fn save_session(&self, session: &SyncSessionLog) -> anyhow::Result<()> {
        self.inner.save_session(session).await
    }

    async fn get_session(&self, id: &SessionId) -> anyhow::Result<Option<SyncSessionLog>> {
        self.inner.get_session(id).await
    }

    async fn append_operation(&self, entry: &FileOperationLog) -> anyhow::Result<i64> {
        self.inner.append_operation(entry).await
    }

    async fn list_operations(&self, filter: &OperationFilter) -> anyhow::Result<Vec<FileOperationLog>> {
        self.inner.list_operations(filter).await
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub dir: TempDir,
    pub pool: DatabasePool,
    pub repo: Arc<SqliteStateRepository>,
    pub store: Arc<FlakyStore>,
    pub drive: Arc<MockDrive>,
    pub orchestrator: SyncOrchestrator,
    pub account: AccountContext,
}

pub async fn harness(settings: AccountSettings) -> Harness {
    harness_with(settings, MockDrive::new()).await
}

pub async fn harness_with(settings: AccountSettings, drive: MockDrive) -> Harness {
    let dir = TempDir::new().unwrap();
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    let repo = Arc::new(SqliteStateRepository::new(pool.pool().clone()));
    let store = Arc::new(FlakyStore::new(Arc::clone(&repo)));
    let drive = Arc::new(drive);

    let root = SyncPath::new(dir.path().to_path_buf()).unwrap();
    let account = AccountContext::new("user@example.com", "User", root, settings);
    repo.save_account(&account).await.unwrap();

    let orchestrator = SyncOrchestrator::new(
        Arc::clone(&drive) as Arc<dyn IRemoteDrive>,
        Arc::new(LocalFileSystemAdapter::new()),
        Arc::clone(&store) as Arc<dyn IStateRepository>,
        SyncOptions::default(),
    );

    Harness {
        dir,
        pool,
        repo,
        store,
        drive,
        orchestrator,
        account,
    }
}

impl Harness {
    pub fn local(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel.trim_start_matches('/'))
    }

    pub fn write_local(&self, rel: &str, content: &[u8]) {
        let path = self.local(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    pub fn set_local_mtime(&self, rel: &str, at: DateTime<Utc>) {
        let file = std::fs::File::options()
            .write(true)
            .open(self.local(rel))
            .unwrap();
        file.set_modified(SystemTime::from(at)).unwrap();
    }

    pub fn read_local(&self, rel: &str) -> Option<Vec<u8>> {
        std::fs::read(self.local(rel)).ok()
    }

    pub async fn try_sync(&self) -> Result<SyncReport, mirrordrive_sync::SyncError> {
        self.orchestrator
            .sync(self.account.id(), &CancellationToken::new())
            .await
    }

    pub async fn sync(&self) -> SyncReport {
        self.try_sync().await.expect("sync should succeed")
    }

    pub async fn row(&self, path: &str) -> Option<DriveItem> {
        self.repo
            .get_item_by_path(self.account.id(), &rp(path))
            .await
            .unwrap()
    }

    pub async fn token(&self) -> Option<DeltaToken> {
        self.repo.get_delta_token(self.account.id()).await.unwrap()
    }
}
