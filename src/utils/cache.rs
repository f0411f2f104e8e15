//! Modification-time validated file content cache.
//!
//! The cache absorbs repeated reads of the same file within one interactive
//! burst (tree rebuild, parameter lookup and diagnostics touching the same
//! files). Freshness is decided by comparing the file's mtime with the one
//! recorded next to the cached text.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

#[derive(Debug, Clone)]
struct CachedFile {
    text: Arc<str>,
    modified: SystemTime,
}

#[derive(Debug, Default)]
pub struct FileCache {
    entries: Mutex<HashMap<PathBuf, CachedFile>>,
    disk_reads: AtomicUsize,
}

impl FileCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the text of `path`, reading from disk only when the mtime moved.
    ///
    /// Missing, unreadable and non-UTF-8 files yield `None`.
    pub fn read(&self, path: &Path) -> Option<Arc<str>> {
        let Some(before) = modified(path) else {
            self.invalidate(path);
            return None;
        };
        if let Some(hit) = self.lock().get(path) {
            if hit.modified == before {
                return Some(hit.text.clone());
            }
        }

        self.disk_reads.fetch_add(1, Ordering::Relaxed);
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!("Unreadable file {}: {}", path.display(), e);
                self.invalidate(path);
                return None;
            }
        };
        let text: Arc<str> = Arc::from(text.strip_prefix('\u{feff}').unwrap_or(&text));

        // Only store text whose mtime did not move while it was being read
        let mut entries = self.lock();
        if modified(path) == Some(before) {
            entries.insert(path.to_path_buf(), CachedFile { text: text.clone(), modified: before });
        } else {
            entries.remove(path);
        }
        Some(text)
    }

    /// Asks the filesystem; never answered from the cache.
    #[must_use]
    pub fn exists(&self, path: &Path) -> bool {
        fs::metadata(path).is_ok_and(|m| m.is_file())
    }

    pub fn invalidate(&self, path: &Path) {
        self.lock().remove(path);
    }

    pub fn invalidate_all(&self) {
        self.lock().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of times file content was actually read from disk.
    #[must_use]
    pub fn disk_reads(&self) -> usize {
        self.disk_reads.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, CachedFile>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    let meta = fs::metadata(path).ok()?;
    if !meta.is_file() {
        return None;
    }
    meta.modified().ok()
}
