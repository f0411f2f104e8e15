use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::parser::{AliasTable, SELF_ALIAS};
use crate::utils::paths::normalize_lexically;

/// Directory whose presence marks a repository root.
pub const REPO_BOUNDARY_MARKER: &str = ".git";

/// Outcome of resolving one raw template reference.
///
/// Whether the target exists is not part of resolution; callers check the
/// file cache for that.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolvedReference {
    Path {
        absolute_path: PathBuf,
        /// Short name of the target repository; `None` for local and `@self` references.
        repository: Option<String>,
    },
    UnresolvedAlias { alias: String },
}

/// Split `path@alias` on the last `@`.
#[must_use]
pub fn split_alias(raw_ref: &str) -> (&str, Option<&str>) {
    match raw_ref.rsplit_once('@') {
        Some((path, alias)) => (path, Some(alias.trim())),
        None => (raw_ref, None),
    }
}

/// Resolves template references to absolute paths.
///
/// Repository roots are memoised per directory since every reference in the
/// same folder walks the same ancestors.
#[derive(Debug, Default)]
pub struct PathResolver {
    repo_roots: Mutex<HashMap<PathBuf, PathBuf>>,
}

impl PathResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `raw_ref` as written in `from_file`, using that file's alias table.
    ///
    /// Returns `None` for an empty reference. A missing or empty alias table
    /// resolves every non-`self` alias to [`ResolvedReference::UnresolvedAlias`].
    pub fn resolve(
        &self,
        raw_ref: &str,
        from_file: &Path,
        aliases: Option<&AliasTable>,
    ) -> Option<ResolvedReference> {
        let raw = raw_ref.trim();
        if raw.is_empty() {
            return None;
        }
        let (path_part, alias) = split_alias(raw);
        let path_part = path_part.trim();
        match alias {
            None | Some(SELF_ALIAS) => Some(ResolvedReference::Path {
                absolute_path: self.resolve_local(path_part, from_file),
                repository: None,
            }),
            Some(alias) => {
                let Some(short) = aliases.and_then(|t| t.get(alias)) else {
                    return Some(ResolvedReference::UnresolvedAlias { alias: alias.to_string() });
                };
                let root = self.repo_root(from_file);
                let siblings = root.parent().unwrap_or(&root);
                let target = siblings.join(short).join(strip_leading_slash(path_part));
                Some(ResolvedReference::Path {
                    absolute_path: normalize_lexically(&target),
                    repository: Some(short.clone()),
                })
            }
        }
    }

    fn resolve_local(&self, path_part: &str, from_file: &Path) -> PathBuf {
        if path_part.starts_with('/') {
            let root = self.repo_root(from_file);
            normalize_lexically(&root.join(strip_leading_slash(path_part)))
        } else {
            normalize_lexically(&containing_dir(from_file).join(path_part))
        }
    }

    /// Nearest ancestor of `from_file` containing [`REPO_BOUNDARY_MARKER`],
    /// or the file's own directory when there is none.
    pub fn repo_root(&self, from_file: &Path) -> PathBuf {
        let dir = containing_dir(from_file);
        if let Some(hit) = self.lock().get(dir) {
            return hit.clone();
        }
        let root = dir
            .ancestors()
            .find(|d| d.join(REPO_BOUNDARY_MARKER).exists())
            .unwrap_or(dir)
            .to_path_buf();
        self.lock().insert(dir.to_path_buf(), root.clone());
        root
    }

    /// Forget memoised repository roots (e.g. after a workspace folder change).
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, PathBuf>> {
        self.repo_roots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn containing_dir(file: &Path) -> &Path {
    file.parent().unwrap_or_else(|| Path::new("/"))
}

fn strip_leading_slash(path: &str) -> &str {
    path.trim_start_matches('/')
}
