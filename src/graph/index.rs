//! Precomputed forward/inverse reference maps over the whole corpus.
//!
//! The index answers "who references X" without rescanning. Queries read an
//! immutable snapshot behind an `RwLock`; a full build computes a fresh
//! snapshot off to the side and swaps it in only if no newer build started in
//! the meantime. Change notifications are applied per file by diffing the
//! file's old and new targets, so the inverse map never needs a rebuild.
use super::traversal::CallSite;
use super::{outgoing_references, PathResolver};
use crate::utils::cache::FileCache;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// One resolved reference from an indexed file. The target need not exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedReference {
    pub target: PathBuf,
    pub line: usize,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Changed,
    Created,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub kind: ChangeKind,
    pub path: PathBuf,
}

impl FileChange {
    #[must_use]
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self { kind, path: path.into() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    pub files: BTreeSet<PathBuf>,
    pub forward: HashMap<PathBuf, Vec<IndexedReference>>,
    pub inverse: HashMap<PathBuf, BTreeSet<PathBuf>>,
}

impl IndexSnapshot {
    fn from_forward(forward: HashMap<PathBuf, Vec<IndexedReference>>) -> Self {
        let mut snap = Self { files: forward.keys().cloned().collect(), ..Self::default() };
        for (file, refs) in &forward {
            for r in refs {
                snap.inverse.entry(r.target.clone()).or_default().insert(file.clone());
            }
        }
        snap.forward = forward;
        snap
    }

    fn targets_of(&self, file: &Path) -> BTreeSet<PathBuf> {
        self.forward
            .get(file)
            .map(|refs| refs.iter().map(|r| r.target.clone()).collect())
            .unwrap_or_default()
    }

    /// Replace `file`'s forward entry, patching only the inverse entries that changed.
    fn set_forward(&mut self, file: &Path, refs: Vec<IndexedReference>) {
        let old = self.targets_of(file);
        let new: BTreeSet<PathBuf> = refs.iter().map(|r| r.target.clone()).collect();
        for gone in old.difference(&new) {
            if let Some(callers) = self.inverse.get_mut(gone) {
                callers.remove(file);
                if callers.is_empty() {
                    self.inverse.remove(gone);
                }
            }
        }
        for added in new.difference(&old) {
            self.inverse.entry(added.clone()).or_default().insert(file.to_path_buf());
        }
        self.files.insert(file.to_path_buf());
        self.forward.insert(file.to_path_buf(), refs);
    }

    /// Drop `file` as a caller. Inverse entries naming it as a target stay,
    /// since other files still reference it.
    fn remove_file(&mut self, file: &Path) {
        for target in self.targets_of(file) {
            if let Some(callers) = self.inverse.get_mut(&target) {
                callers.remove(file);
                if callers.is_empty() {
                    self.inverse.remove(&target);
                }
            }
        }
        self.forward.remove(file);
        self.files.remove(file);
    }

    /// Whether the inverse map equals the one derived from the forward map.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let derived = Self::from_forward(self.forward.clone());
        derived.inverse == self.inverse && derived.files == self.files
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.forward.values().map(Vec::len).sum()
    }
}

/// Reverse-reference index shared between the query path and background builds.
#[derive(Debug, Default)]
pub struct WorkspaceIndex {
    snapshot: RwLock<IndexSnapshot>,
    ready: AtomicBool,
    started: AtomicU64,
    completed: AtomicU64,
    /// Changes seen while a build is in flight, replayed onto its result.
    pending: Mutex<Vec<FileChange>>,
}

impl WorkspaceIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Parse every file in `files` in parallel and publish the result.
    ///
    /// Returns `false` when a newer build started before this one finished;
    /// its result is then discarded.
    pub fn build(&self, files: &[PathBuf], cache: &FileCache, resolver: &PathResolver) -> bool {
        self.build_from(|| files.to_vec(), cache, resolver)
    }

    /// Like [`WorkspaceIndex::build`], but enumerates the corpus only after the
    /// build is registered, so changes that race with enumeration get replayed.
    pub fn build_from<F>(&self, list_files: F, cache: &FileCache, resolver: &PathResolver) -> bool
    where
        F: FnOnce() -> Vec<PathBuf>,
    {
        let generation = self.started.fetch_add(1, Ordering::AcqRel) + 1;
        let t0 = Instant::now();
        let files = list_files();
        let forward: HashMap<PathBuf, Vec<IndexedReference>> =
            files.par_iter().map(|f| (f.clone(), index_references(cache, resolver, f))).collect();
        let snap = IndexSnapshot::from_forward(forward);

        let mut pending = self.lock_pending();
        if self.started.load(Ordering::Acquire) != generation {
            tracing::warn!("Index build {} superseded by a newer build; discarding", generation);
            return false;
        }
        let (file_count, edge_count) = (snap.files.len(), snap.edge_count());
        *self.write() = snap;
        self.completed.store(generation, Ordering::Release);
        self.ready.store(true, Ordering::Release);
        let replay: Vec<FileChange> = pending.drain(..).collect();
        drop(pending);
        for change in &replay {
            self.apply_now(change, cache, resolver);
        }
        tracing::info!(
            "Indexed {} files, {} references in {:.2?} ({} queued changes replayed)",
            file_count,
            edge_count,
            t0.elapsed(),
            replay.len()
        );
        true
    }

    /// Apply one file notification.
    ///
    /// Changes arriving while a build is running are also queued for replay
    /// onto that build's snapshot; before the first build they are only queued.
    pub fn apply_change(&self, change: &FileChange, cache: &FileCache, resolver: &PathResolver) {
        cache.invalidate(&change.path);
        {
            let mut pending = self.lock_pending();
            if self.build_in_flight() {
                pending.push(change.clone());
            }
            if !self.is_ready() {
                return;
            }
        }
        self.apply_now(change, cache, resolver);
    }

    fn apply_now(&self, change: &FileChange, cache: &FileCache, resolver: &PathResolver) {
        match change.kind {
            ChangeKind::Changed | ChangeKind::Created => {
                // Read under the write lock so the last writer publishes the newest content
                let mut snap = self.write();
                let refs = index_references(cache, resolver, &change.path);
                snap.set_forward(&change.path, refs);
            }
            ChangeKind::Deleted => {
                let mut snap = self.write();
                if snap.files.contains(&change.path) {
                    snap.remove_file(&change.path);
                } else {
                    // A removed directory takes every indexed file beneath it
                    let under: Vec<PathBuf> =
                        snap.files.iter().filter(|f| f.starts_with(&change.path)).cloned().collect();
                    for f in under {
                        snap.remove_file(&f);
                    }
                }
            }
        }
        tracing::debug!("Index updated for {:?} {}", change.kind, change.path.display());
    }

    fn build_in_flight(&self) -> bool {
        self.started.load(Ordering::Acquire) != self.completed.load(Ordering::Acquire)
    }

    /// Files referencing `target`, sorted.
    #[must_use]
    pub fn direct_callers(&self, target: &Path) -> Vec<PathBuf> {
        self.read().inverse.get(target).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }

    /// Direct callers of `target` with the line of each caller's first reference to it.
    #[must_use]
    pub fn callers_with_sites(&self, target: &Path) -> Vec<CallSite> {
        let snap = self.read();
        let Some(callers) = snap.inverse.get(target) else {
            return Vec::new();
        };
        callers
            .iter()
            .filter_map(|caller| {
                let r = snap.forward.get(caller)?.iter().find(|r| r.target == target)?;
                Some(CallSite { caller: caller.clone(), line: r.line, alias: r.alias.clone() })
            })
            .collect()
    }

    #[must_use]
    pub fn forward_targets(&self, file: &Path) -> Vec<IndexedReference> {
        self.read().forward.get(file).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn files(&self) -> Vec<PathBuf> {
        self.read().files.iter().cloned().collect()
    }

    #[must_use]
    pub fn file_count(&self) -> usize {
        self.read().files.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.read().edge_count()
    }

    /// Clone of the current snapshot for whole-corpus analyses.
    #[must_use]
    pub fn snapshot(&self) -> IndexSnapshot {
        self.read().clone()
    }

    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.read().is_consistent()
    }

    /// Forget everything and return to the not-ready state.
    ///
    /// A build still running is superseded and will discard its result.
    pub fn clear(&self) {
        let mut pending = self.lock_pending();
        pending.clear();
        let generation = self.started.fetch_add(1, Ordering::AcqRel) + 1;
        self.completed.store(generation, Ordering::Release);
        *self.write() = IndexSnapshot::default();
        self.ready.store(false, Ordering::Release);
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexSnapshot> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexSnapshot> {
        self.snapshot.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<FileChange>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn index_references(cache: &FileCache, resolver: &PathResolver, file: &Path) -> Vec<IndexedReference> {
    outgoing_references(cache, resolver, file)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|o| {
            let target = o.target_path()?.to_path_buf();
            Some(IndexedReference { target, line: o.reference.source_line, alias: o.alias })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, Vec<PathBuf>) {
        let td = tempdir().unwrap();
        let a = td.path().join("a.yml");
        let b = td.path().join("b.yml");
        let t = td.path().join("t.yml");
        fs::write(&a, "steps:\n- template: t.yml\n").unwrap();
        fs::write(&b, "steps:\n- template: t.yml\n- template: gone.yml\n").unwrap();
        fs::write(&t, "steps: []\n").unwrap();
        (td, vec![a, b, t])
    }

    #[test]
    fn build_populates_inverse_including_missing_targets() {
        let (td, files) = setup();
        let (cache, resolver, index) = (FileCache::new(), PathResolver::new(), WorkspaceIndex::new());
        assert!(!index.is_ready());
        assert!(index.build(&files, &cache, &resolver));
        assert!(index.is_ready());
        assert_eq!(index.direct_callers(&td.path().join("t.yml")), vec![files[0].clone(), files[1].clone()]);
        assert_eq!(index.direct_callers(&td.path().join("gone.yml")), vec![files[1].clone()]);
        assert_eq!(index.edge_count(), 3);
        assert!(index.is_consistent());
    }

    #[test]
    fn edit_patches_inverse_incrementally() {
        let (td, files) = setup();
        let (cache, resolver, index) = (FileCache::new(), PathResolver::new(), WorkspaceIndex::new());
        index.build(&files, &cache, &resolver);
        fs::write(&files[0], "steps:\n- script: echo\n").unwrap();
        index.apply_change(&FileChange::new(ChangeKind::Changed, &files[0]), &cache, &resolver);
        assert_eq!(index.direct_callers(&td.path().join("t.yml")), vec![files[1].clone()]);
        assert!(index.is_consistent());
    }

    #[test]
    fn delete_keeps_callers_of_deleted_file() {
        let (td, files) = setup();
        let (cache, resolver, index) = (FileCache::new(), PathResolver::new(), WorkspaceIndex::new());
        index.build(&files, &cache, &resolver);
        fs::remove_file(&files[2]).unwrap();
        index.apply_change(&FileChange::new(ChangeKind::Deleted, &files[2]), &cache, &resolver);
        assert!(!index.files().contains(&files[2]));
        assert_eq!(index.direct_callers(&td.path().join("t.yml")).len(), 2);
        fs::remove_file(&files[1]).unwrap();
        index.apply_change(&FileChange::new(ChangeKind::Deleted, &files[1]), &cache, &resolver);
        assert!(index.direct_callers(&td.path().join("gone.yml")).is_empty());
        assert!(index.is_consistent());
    }

    #[test]
    fn changes_before_first_build_are_replayed() {
        let (td, files) = setup();
        let (cache, resolver, index) = (FileCache::new(), PathResolver::new(), WorkspaceIndex::new());
        let c = td.path().join("c.yml");
        fs::write(&c, "steps:\n- template: t.yml\n").unwrap();
        // Not ready and no build running: dropped, the build will see the file anyway
        index.apply_change(&FileChange::new(ChangeKind::Created, &c), &cache, &resolver);
        assert_eq!(index.file_count(), 0);
        let mut all = files.clone();
        all.push(c.clone());
        index.build(&all, &cache, &resolver);
        assert!(index.direct_callers(&td.path().join("t.yml")).contains(&c));
    }

    #[test]
    fn clear_during_build_discards_the_build() {
        let (_td, files) = setup();
        let (cache, resolver, index) = (FileCache::new(), PathResolver::new(), WorkspaceIndex::new());
        let published = index.build_from(
            || {
                index.clear();
                files.clone()
            },
            &cache,
            &resolver,
        );
        assert!(!published);
        assert!(!index.is_ready());
        assert_eq!(index.file_count(), 0);
        assert!(!index.build_in_flight());

        // Later changes are not queued for a build that no longer exists
        index.apply_change(&FileChange::new(ChangeKind::Changed, &files[0]), &cache, &resolver);
        assert!(index.lock_pending().is_empty());
        assert!(index.build(&files, &cache, &resolver));
        assert_eq!(index.file_count(), 3);
    }

    #[test]
    fn concurrent_edits_settle_on_the_latest_content() {
        let (td, files) = setup();
        let (cache, resolver, index) = (FileCache::new(), PathResolver::new(), WorkspaceIndex::new());
        index.build(&files, &cache, &resolver);
        let a = &files[0];
        // Whole-file replacement with a strictly increasing mtime per write
        let disk = Mutex::new(0i64);
        let dir = td.path();
        std::thread::scope(|scope| {
            for worker in 0..4 {
                let (cache, resolver, index, disk) = (&cache, &resolver, &index, &disk);
                scope.spawn(move || {
                    for round in 0..25 {
                        {
                            let mut tick = disk.lock().unwrap();
                            *tick += 1;
                            let staged = dir.join(format!("a.{worker}.tmp"));
                            fs::write(&staged, format!("steps:\n- template: w{worker}_{round}.yml\n")).unwrap();
                            let mtime = filetime::FileTime::from_unix_time(1_600_000_000 + *tick, 0);
                            filetime::set_file_mtime(&staged, mtime).unwrap();
                            fs::rename(&staged, a).unwrap();
                        }
                        index.apply_change(&FileChange::new(ChangeKind::Changed, a), cache, resolver);
                    }
                });
            }
        });

        let fresh = index_references(&FileCache::new(), &resolver, a);
        assert_eq!(fresh.len(), 1);
        assert_eq!(index.forward_targets(a), fresh);
        assert_eq!(index.direct_callers(&fresh[0].target), vec![a.clone()]);
        assert_eq!(index.direct_callers(&td.path().join("t.yml")), vec![files[1].clone()]);
        assert!(index.is_consistent());
    }
}
