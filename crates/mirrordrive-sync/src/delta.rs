//! Remote change retrieval
//!
//! [`DeltaProcessingService`] pulls remote state in one of two modes:
//!
//! - **Delta**: with a stored continuation token, pages are fetched in
//!   server order. Each page is classified by a [`DeltaPageHandler`], its
//!   rows are committed in one atomic batch, and only then is the page's
//!   trailing cursor saved as the new token.
//! - **Full listing**: without a token (first sync, or after expiry), a
//!   token for "now" is captured first, the tree is walked breadth-first
//!   in batches, and the captured token is saved last. Every remote id seen
//!   is reported so disappearances can be inferred afterwards.
//!
//! Cancellation aborts the page fetch in flight; pages already committed
//! stay applied and their token stays saved. Nothing here retries.

use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
};

use async_trait::async_trait;
use mirrordrive_core::{
    domain::{
        newtypes::{AccountId, DeltaToken, RemoteId},
        AccountContext, DriveItem,
    },
    ports::{IRemoteDrive, IStateRepository, RemoteError, RemoteItem},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::error::SyncError;

/// Rows and counts produced by classifying one page
#[derive(Debug, Default)]
pub struct PageOutcome {
    /// Rows to commit together with the page
    pub rows: Vec<DriveItem>,
    /// Number of rows now owed a download
    pub downloads: u64,
    /// Number of conflicts recorded
    pub conflicts: u64,
}

/// Classifies a page of remote items into rows to persist
#[async_trait]
pub trait DeltaPageHandler: Send + Sync {
    async fn handle_page(
        &self,
        account: &AccountContext,
        items: Vec<RemoteItem>,
    ) -> Result<PageOutcome, SyncError>;
}

/// Summary of one run of [`DeltaProcessingService::process_pages`]
#[derive(Debug, Default)]
pub struct DeltaOutcome {
    /// Token saved at the end of the run, if the remote supplied one
    pub new_token: Option<DeltaToken>,
    pub page_count: u64,
    pub item_count: u64,
    /// Every remote id listed; only set for a full listing
    pub seen_remote_ids: Option<HashSet<RemoteId>>,
    pub downloads: u64,
    pub conflicts: u64,
}

impl DeltaOutcome {
    pub fn is_full_listing(&self) -> bool {
        self.seen_remote_ids.is_some()
    }

    fn absorb(&mut self, page: &PageOutcome, items: usize) {
        self.page_count += 1;
        self.item_count += items as u64;
        self.downloads += page.downloads;
        self.conflicts += page.conflicts;
    }
}

/// Pulls remote changes page by page and commits them
pub struct DeltaProcessingService {
    remote: Arc<dyn IRemoteDrive>,
    store: Arc<dyn IStateRepository>,
}

impl DeltaProcessingService {
    pub fn new(remote: Arc<dyn IRemoteDrive>, store: Arc<dyn IStateRepository>) -> Self {
        Self { remote, store }
    }

    /// The token to resume from, `None` when a full listing is required
    pub async fn get_continuation_token(
        &self,
        account_id: &AccountId,
    ) -> Result<Option<DeltaToken>, SyncError> {
        self.store
            .get_delta_token(account_id)
            .await
            .map_err(SyncError::storage)
    }

    /// Fetch, classify and commit remote changes
    ///
    /// `on_progress` receives the number of pages and items applied so far.
    #[instrument(skip_all, fields(account_id = %account.id(), full_listing = token.is_none()))]
    pub async fn process_pages<F>(
        &self,
        account: &AccountContext,
        token: Option<DeltaToken>,
        handler: &dyn DeltaPageHandler,
        on_progress: F,
        cancel: &CancellationToken,
    ) -> Result<DeltaOutcome, SyncError>
    where
        F: Fn(u64, u64) + Send + Sync,
    {
        let outcome = match token {
            Some(token) => {
                self.follow_delta(account, token, handler, &on_progress, cancel)
                    .await?
            }
            None => {
                self.full_listing(account, handler, &on_progress, cancel)
                    .await?
            }
        };

        info!(
            pages = outcome.page_count,
            items = outcome.item_count,
            downloads = outcome.downloads,
            conflicts = outcome.conflicts,
            "Remote changes applied"
        );
        Ok(outcome)
    }

    async fn follow_delta<F>(
        &self,
        account: &AccountContext,
        token: DeltaToken,
        handler: &dyn DeltaPageHandler,
        on_progress: &F,
        cancel: &CancellationToken,
    ) -> Result<DeltaOutcome, SyncError>
    where
        F: Fn(u64, u64) + Send + Sync,
    {
        let mut outcome = DeltaOutcome::default();
        let mut cursor = token;

        loop {
            let page = cancellable(cancel, self.remote.get_delta_page(Some(&cursor)))
                .await?
                .map_err(SyncError::from_delta)?;
            let item_count = page.items.len();
            let is_last = page.is_last();
            let trailing = page.trailing_token().cloned();
            let final_token = page.delta_token.clone();

            let applied = handler.handle_page(account, page.items).await?;
            self.commit(account.id(), &applied.rows, trailing.as_ref())
                .await?;
            outcome.absorb(&applied, item_count);
            on_progress(outcome.page_count, outcome.item_count);

            debug!(page = outcome.page_count, items = item_count, "Delta page committed");

            match trailing {
                Some(next) if !is_last => cursor = next,
                _ => {
                    outcome.new_token = final_token;
                    break;
                }
            }
        }

        Ok(outcome)
    }

    async fn full_listing<F>(
        &self,
        account: &AccountContext,
        handler: &dyn DeltaPageHandler,
        on_progress: &F,
        cancel: &CancellationToken,
    ) -> Result<DeltaOutcome, SyncError>
    where
        F: Fn(u64, u64) + Send + Sync,
    {
        let batch_size = account.settings().batch_size.max(1);
        let captured = cancellable(cancel, self.remote.latest_delta_token())
            .await?
            .map_err(SyncError::from_delta)?;
        let root = cancellable(cancel, self.remote.get_root())
            .await?
            .map_err(SyncError::from_delta)?;

        let mut outcome = DeltaOutcome::default();
        let mut seen = HashSet::from([root.id.clone()]);
        let mut folders = VecDeque::from([root.id]);
        let mut buffer: Vec<RemoteItem> = Vec::with_capacity(batch_size);

        while let Some(folder) = folders.pop_front() {
            let children = match cancellable(cancel, self.remote.list_children(&folder)).await? {
                Ok(children) => children,
                // Removed while the listing was running; its tombstone arrives with the next delta.
                Err(RemoteError::NotFound(_)) => {
                    debug!(folder = %folder, "Folder vanished during listing");
                    continue;
                }
                Err(e) => return Err(SyncError::from_delta(e)),
            };

            for child in children {
                seen.insert(child.id.clone());
                if child.is_folder {
                    folders.push_back(child.id.clone());
                }
                buffer.push(child);

                if buffer.len() >= batch_size {
                    let batch = std::mem::replace(&mut buffer, Vec::with_capacity(batch_size));
                    self.apply_batch(account, batch, handler, &mut outcome).await?;
                    on_progress(outcome.page_count, outcome.item_count);
                }
            }
        }

        if !buffer.is_empty() {
            self.apply_batch(account, buffer, handler, &mut outcome)
                .await?;
            on_progress(outcome.page_count, outcome.item_count);
        }

        self.store
            .save_delta_token(account.id(), &captured)
            .await
            .map_err(SyncError::storage)?;

        outcome.new_token = Some(captured);
        outcome.seen_remote_ids = Some(seen);
        Ok(outcome)
    }

    async fn apply_batch(
        &self,
        account: &AccountContext,
        batch: Vec<RemoteItem>,
        handler: &dyn DeltaPageHandler,
        outcome: &mut DeltaOutcome,
    ) -> Result<(), SyncError> {
        let item_count = batch.len();
        let applied = handler.handle_page(account, batch).await?;
        self.commit(account.id(), &applied.rows, None).await?;
        outcome.absorb(&applied, item_count);
        debug!(batch = outcome.page_count, items = item_count, "Listing batch committed");
        Ok(())
    }

    /// Commit a page's rows, then its token
    async fn commit(
        &self,
        account_id: &AccountId,
        rows: &[DriveItem],
        token: Option<&DeltaToken>,
    ) -> Result<(), SyncError> {
        if !rows.is_empty() {
            self.store
                .save_batch(rows)
                .await
                .map_err(SyncError::storage)?;
        }
        if let Some(token) = token {
            self.store
                .save_delta_token(account_id, token)
                .await
                .map_err(SyncError::storage)?;
        }
        Ok(())
    }
}

/// Race a remote call against cancellation
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = T>,
) -> Result<T, SyncError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        out = fut => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancellable_prefers_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = cancellable(&cancel, async { 42 }).await;
        assert!(matches!(result, Err(SyncError::Cancelled)));

        let live = CancellationToken::new();
        assert_eq!(cancellable(&live, async { 42 }).await.unwrap(), 42);
    }

    #[test]
    fn test_outcome_accumulates() {
        let mut outcome = DeltaOutcome::default();
        let page = PageOutcome {
            rows: vec![],
            downloads: 2,
            conflicts: 1,
        };
        outcome.absorb(&page, 5);
        outcome.absorb(&page, 3);
        assert_eq!(outcome.page_count, 2);
        assert_eq!(outcome.item_count, 8);
        assert_eq!(outcome.downloads, 4);
        assert_eq!(outcome.conflicts, 2);
        assert!(!outcome.is_full_listing());
    }
}
