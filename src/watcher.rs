//! Filesystem notifications translated into index changes.
use crate::errors::ExplorerError;
use crate::graph::{ChangeKind, FileChange};
use crate::utils::file_walker::WalkOptions;
use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

/// Watches a root recursively and delivers [`FileChange`]s for corpus files.
///
/// Dropping the watcher stops notifications.
pub struct FileSystemWatcher {
    _watcher: RecommendedWatcher,
    receiver: Receiver<FileChange>,
}

impl FileSystemWatcher {
    /// # Errors
    /// Returns `ExplorerError::Watch` if the platform watcher cannot be created
    /// or `root` cannot be watched.
    pub fn new(root: &Path, walk: WalkOptions) -> Result<Self, ExplorerError> {
        let (tx, rx) = mpsc::channel();
        let base = root.to_path_buf();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                for change in convert_event(&event, &base, &walk) {
                    let _ = tx.send(change);
                }
            }
            Err(e) => tracing::warn!("Watcher error: {}", e),
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        tracing::debug!("Watching {}", root.display());
        Ok(Self { _watcher: watcher, receiver: rx })
    }

    /// Block until the next change; `None` once the watcher is gone.
    #[must_use]
    pub fn recv(&self) -> Option<FileChange> {
        self.receiver.recv().ok()
    }

    /// Wait up to `timeout` for a change, then keep collecting until `quiet`
    /// passes without a new one. Repeated notifications for a path collapse
    /// into the last one.
    #[must_use]
    pub fn recv_batch(&self, timeout: Duration, quiet: Duration) -> Vec<FileChange> {
        let mut batch: Vec<FileChange> = Vec::new();
        let Ok(first) = self.receiver.recv_timeout(timeout) else {
            return batch;
        };
        batch.push(first);
        let mut deadline = Instant::now() + quiet;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(left) {
                Ok(change) => {
                    batch.retain(|c| c.path != change.path);
                    batch.push(change);
                    deadline = Instant::now() + quiet;
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
            }
        }
        batch
    }
}

/// Map one notify event onto corpus changes.
///
/// Removals are passed through even for paths that do not look like corpus
/// files, since a removed directory can no longer be inspected.
#[must_use]
pub fn convert_event(event: &notify::Event, root: &Path, walk: &WalkOptions) -> Vec<FileChange> {
    let mut out = Vec::new();
    for path in &event.paths {
        let kind = match event.kind {
            EventKind::Create(_) => ChangeKind::Created,
            EventKind::Modify(ModifyKind::Name(_)) => {
                if path.exists() {
                    ChangeKind::Created
                } else {
                    ChangeKind::Deleted
                }
            }
            EventKind::Modify(_) => ChangeKind::Changed,
            EventKind::Remove(_) => ChangeKind::Deleted,
            _ => continue,
        };
        if path.is_dir() {
            continue;
        }
        if kind != ChangeKind::Deleted && !walk.accepts(root, path) {
            continue;
        }
        if kind == ChangeKind::Deleted && !path.starts_with(root) {
            continue;
        }
        out.push(FileChange { kind, path: path.clone() });
    }
    out
}
