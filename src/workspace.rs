//! Workspace context: one cache, resolver and index per opened root.
use crate::graph::{
    outgoing_references, ChangeKind, FileChange, GraphBuilder, OutgoingReference, PathResolver, TreeNode,
    WorkspaceGraph, WorkspaceIndex,
};
use crate::parser::{self, ParameterDeclaration};
use crate::utils::cache::FileCache;
use crate::utils::config::Config;
use crate::utils::file_walker::{self, WalkOptions};
use crate::utils::paths::{absolutize, normalize_lexically};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, Default)]
pub struct WorkspaceOptions {
    pub walk: WalkOptions,
}

impl WorkspaceOptions {
    /// Defaults overlaid with the `[workspace]` section of `cfg`.
    #[must_use]
    pub fn from_config(cfg: Option<&Config>) -> Self {
        let mut walk = WalkOptions::default();
        if let Some(ws) = cfg.and_then(|c| c.workspace.as_ref()) {
            if let Some(ext) = &ws.extensions {
                walk.extensions = ext.iter().map(|e| e.trim_start_matches('.').to_string()).collect();
            }
            if let Some(skip) = &ws.skip_dirs {
                walk.skip_dirs.clone_from(skip);
            }
            if let Some(respect) = ws.respect_ignore {
                walk.respect_ignore = respect;
            }
        }
        Self { walk }
    }
}

/// Shared state for every query against one root folder.
///
/// Cloning is cheap and clones share the cache, resolver and index.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    options: WorkspaceOptions,
    cache: Arc<FileCache>,
    resolver: Arc<PathResolver>,
    index: Arc<WorkspaceIndex>,
}

impl Workspace {
    /// Open `root` without indexing it. Upstream queries rescan until an index build completes.
    #[must_use]
    pub fn open(root: &Path, options: WorkspaceOptions) -> Self {
        Self {
            root: absolutize(root),
            options,
            cache: Arc::new(FileCache::new()),
            resolver: Arc::new(PathResolver::new()),
            index: Arc::new(WorkspaceIndex::new()),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn options(&self) -> &WorkspaceOptions {
        &self.options
    }

    #[must_use]
    pub fn cache(&self) -> &FileCache {
        &self.cache
    }

    #[must_use]
    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    #[must_use]
    pub fn index(&self) -> &WorkspaceIndex {
        &self.index
    }

    #[must_use]
    pub fn builder(&self) -> GraphBuilder<'_> {
        GraphBuilder::new(&self.cache, &self.resolver).with_index(&self.index)
    }

    /// Current corpus: the index's file set once ready, otherwise a fresh walk.
    #[must_use]
    pub fn files(&self) -> Vec<PathBuf> {
        if self.index.is_ready() {
            return self.index.files();
        }
        file_walker::yaml_files(&self.root, &self.options.walk)
    }

    /// Whether `path` is part of the corpus under this root.
    #[must_use]
    pub fn accepts(&self, path: &Path) -> bool {
        self.options.walk.accepts(&self.root, path)
    }

    /// Turn a user-supplied path into the absolute form used as node identity.
    ///
    /// Relative paths are tried against the current directory first, then the root.
    #[must_use]
    pub fn resolve_file(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            return normalize_lexically(file);
        }
        let from_cwd = absolutize(file);
        if from_cwd.is_file() {
            return from_cwd;
        }
        normalize_lexically(&self.root.join(file))
    }

    /// Build the index on the calling thread.
    pub fn build_index(&self) -> bool {
        run_index_build(&self.root, &self.options.walk, &self.cache, &self.resolver, &self.index)
    }

    /// Build the index on a background thread; the workspace stays queryable meanwhile.
    pub fn spawn_index_build(&self) -> JoinHandle<bool> {
        let ws = self.clone();
        thread::spawn(move || ws.build_index())
    }

    /// Build the index unless it is already ready.
    pub fn ensure_index(&self) {
        if !self.index.is_ready() {
            self.build_index();
        }
    }

    /// Route a file notification to the cache and index.
    ///
    /// Paths outside the corpus only invalidate the cache, except deletions,
    /// which may name a whole directory.
    pub fn apply_change(&self, change: &FileChange) {
        let path = normalize_lexically(&change.path);
        let change = FileChange { kind: change.kind, path };
        if change.kind != ChangeKind::Deleted && !self.accepts(&change.path) {
            self.cache.invalidate(&change.path);
            return;
        }
        self.index.apply_change(&change, &self.cache, &self.resolver);
    }

    #[must_use]
    pub fn parameters(&self, file: &Path) -> Vec<ParameterDeclaration> {
        self.cache.read(file).map(|t| parser::extract_parameters(&t)).unwrap_or_default()
    }

    /// Every statically resolvable reference of `file`; `None` if it cannot be read.
    #[must_use]
    pub fn references(&self, file: &Path) -> Option<Vec<OutgoingReference>> {
        outgoing_references(&self.cache, &self.resolver, file)
    }

    #[must_use]
    pub fn downstream(&self, file: &Path, depth: usize) -> TreeNode {
        self.builder().downstream(file, depth)
    }

    #[must_use]
    pub fn upstream(&self, file: &Path, depth: usize) -> TreeNode {
        let corpus = if self.index.is_ready() { Vec::new() } else { self.files() };
        self.builder().upstream(file, depth, &corpus)
    }

    #[must_use]
    pub fn workspace_graph(&self) -> WorkspaceGraph {
        self.builder().workspace_graph(&self.files())
    }

    /// Drop cached file contents, memoised repository roots and the index.
    pub fn close(&self) {
        self.cache.invalidate_all();
        self.resolver.clear();
        self.index.clear();
        tracing::debug!("Closed workspace {}", self.root.display());
    }
}

fn run_index_build(
    root: &Path,
    walk: &WalkOptions,
    cache: &FileCache,
    resolver: &PathResolver,
    index: &WorkspaceIndex,
) -> bool {
    index.build_from(|| file_walker::yaml_files(root, walk), cache, resolver)
}
