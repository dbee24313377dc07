//! Local change notifications
//!
//! [`FileWatcher`] turns `notify` events under a local root into
//! [`ChangeEvent`]s. [`ChangeTrigger`] feeds them through a
//! [`DebouncedChangeQueue`] and wakes the sync loop once a burst of changes
//! has gone quiet.
//!
//! ```text
//! notify ──→ FileWatcher ──→ mpsc ──→ ChangeTrigger ──→ Notify ──→ sync loop
//!                                          │
//!                                 DebouncedChangeQueue
//! ```
//!
//! Nothing here decides what to sync; a woken loop runs a full sync which
//! rescans the tree.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use notify::{
    event::{ModifyKind, RenameMode},
    EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use tokio::{
    sync::{mpsc, Notify},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::filesystem::is_partial_file;

const EVENT_BUFFER: usize = 1024;

/// A change observed under a watched root
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
}

impl ChangeEvent {
    /// The path the change leaves behind; the destination for renames
    pub fn path(&self) -> &Path {
        match self {
            ChangeEvent::Created(p) | ChangeEvent::Modified(p) | ChangeEvent::Deleted(p) => p,
            ChangeEvent::Renamed { to, .. } => to,
        }
    }
}

/// Recursive watcher over one local root
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FileWatcher {
    /// Start watching `root` recursively
    ///
    /// Events for the engine's own partial download files are dropped.
    ///
    /// # Errors
    /// Returns an error if the OS watcher cannot be created or the root
    /// cannot be watched (missing, permissions, watch limit)
    pub fn watch(root: &Path) -> Result<(Self, mpsc::Receiver<ChangeEvent>)> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    if let Some(change) = map_notify_event(&event) {
                        // The notify thread must never block on a slow consumer.
                        if let Err(e) = tx.try_send(change) {
                            debug!(error = %e, "Dropping change event");
                        }
                    }
                }
                Err(e) => error!(error = %e, "File watcher error"),
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", root.display()))?;
        info!(root = %root.display(), "Watching local changes");

        Ok((
            Self {
                watcher,
                root: root.to_path_buf(),
            },
            rx,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        if let Err(e) = self.watcher.unwatch(&self.root) {
            debug!(root = %self.root.display(), error = %e, "Unwatch failed");
        }
    }
}

fn map_notify_event(event: &notify::Event) -> Option<ChangeEvent> {
    let paths = &event.paths;
    let first = paths.first()?;

    let change = match &event.kind {
        EventKind::Create(_) => ChangeEvent::Created(first.clone()),
        EventKind::Remove(_) => ChangeEvent::Deleted(first.clone()),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() >= 2 => {
            ChangeEvent::Renamed {
                from: first.clone(),
                to: paths[1].clone(),
            }
        }
        EventKind::Modify(_) => ChangeEvent::Modified(first.clone()),
        _ => return None,
    };

    if is_partial_file(change.path()) {
        return None;
    }
    Some(change)
}

/// Coalesces bursts of changes per path
///
/// A path settles once no event for it has arrived for the debounce delay;
/// each new event restarts its window and replaces the pending event.
pub struct DebouncedChangeQueue {
    pending: HashMap<PathBuf, (ChangeEvent, Instant)>,
    delay: Duration,
}

impl DebouncedChangeQueue {
    pub fn new(delay: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            delay,
        }
    }

    pub fn push(&mut self, event: ChangeEvent) {
        self.pending
            .insert(event.path().to_path_buf(), (event, Instant::now()));
    }

    /// Remove and return every settled change
    pub fn poll(&mut self) -> Vec<ChangeEvent> {
        let now = Instant::now();
        let delay = self.delay;
        let mut settled = Vec::new();
        self.pending.retain(|_, (event, at)| {
            if now.duration_since(*at) >= delay {
                settled.push(event.clone());
                false
            } else {
                true
            }
        });
        settled
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Wakes a sync loop when debounced local changes settle
pub struct ChangeTrigger {
    events: mpsc::Receiver<ChangeEvent>,
    queue: DebouncedChangeQueue,
    wake: Arc<Notify>,
    poll_every: Duration,
}

impl ChangeTrigger {
    /// `wake` is notified once per settled burst
    pub fn new(events: mpsc::Receiver<ChangeEvent>, debounce: Duration, wake: Arc<Notify>) -> Self {
        Self {
            events,
            queue: DebouncedChangeQueue::new(debounce),
            wake,
            poll_every: (debounce / 2).max(Duration::from_millis(100)),
        }
    }

    /// Run until the watcher goes away or `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = self.events.recv() => match event {
                    Some(change) => self.queue.push(change),
                    None => {
                        if !self.queue.is_empty() {
                            self.wake.notify_one();
                        }
                        warn!("Change feed closed");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    let settled = self.queue.poll();
                    if !settled.is_empty() {
                        debug!(changes = settled.len(), "Local changes settled");
                        self.wake.notify_one();
                    }
                }
            }
        }
    }
}
