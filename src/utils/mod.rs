pub mod cache;

pub mod table {
    fn width(cell: &str) -> usize {
        cell.chars().count()
    }

    fn sep(widths: &[usize]) -> String {
        let mut s = String::from("+");
        for w in widths {
            s.push_str(&"-".repeat(w + 2));
            s.push('+');
        }
        s
    }

    fn line(cells: &[String], widths: &[usize]) -> String {
        let mut s = String::from("|");
        for (cell, w) in cells.iter().zip(widths) {
            s.push(' ');
            s.push_str(cell);
            s.push_str(&" ".repeat(w.saturating_sub(width(cell))));
            s.push_str(" |");
        }
        s
    }

    /// Render an ASCII table; missing cells render empty, extra cells are dropped.
    #[must_use]
    pub fn render(headers: &[&str], rows: &[Vec<String>]) -> String {
        let mut widths: Vec<usize> = headers.iter().map(|h| width(h)).collect();
        for row in rows {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(width(cell));
            }
        }
        let border = sep(&widths);
        let header_cells: Vec<String> = headers.iter().map(|s| (*s).to_string()).collect();
        let mut out = format!("{border}\n{}\n{border}\n", line(&header_cells, &widths));
        for row in rows {
            let cells: Vec<String> =
                (0..headers.len()).map(|i| row.get(i).cloned().unwrap_or_default()).collect();
            out.push_str(&line(&cells, &widths));
            out.push('\n');
        }
        out.push_str(&border);
        out
    }
}

pub mod config {
    use crate::errors::ExplorerError;
    use serde::Deserialize;
    use std::fs;
    use std::path::{Path, PathBuf};

    pub const CONFIG_FILE_NAME: &str = "pipeline-explorer.toml";

    #[derive(Debug, Clone, Deserialize, Default)]
    pub struct WorkspaceConfig {
        pub extensions: Option<Vec<String>>,
        pub skip_dirs: Option<Vec<String>>,
        pub respect_ignore: Option<bool>,
    }

    #[derive(Debug, Clone, Deserialize, Default)]
    pub struct QueryConfig {
        pub default_format: Option<String>, // "text" | "json" | "dot"
        pub default_depth: Option<usize>,
    }

    #[derive(Debug, Clone, Deserialize, Default)]
    pub struct DotConfig {
        pub clusters: Option<bool>,
        pub legend: Option<bool>,
        pub theme: Option<String>,   // "light" | "dark"
        pub rankdir: Option<String>, // "LR" | "TB"
        pub splines: Option<String>, // "curved" | "ortho" | "polyline"
        pub rounded: Option<bool>,
    }

    #[derive(Debug, Clone, Deserialize, Default)]
    pub struct Config {
        pub workspace: Option<WorkspaceConfig>,
        pub query: Option<QueryConfig>,
        pub dot: Option<DotConfig>,
    }

    /// Load and parse a config file.
    ///
    /// # Errors
    /// Returns `ExplorerError::Io` if the file cannot be read and
    /// `ExplorerError::Config` if it is not valid TOML for [`Config`].
    pub fn load_config_at(path: &Path) -> Result<Config, ExplorerError> {
        let data = fs::read_to_string(path)?;
        toml::from_str::<Config>(&data)
            .map_err(|e| ExplorerError::Config { file: path.to_path_buf(), message: e.to_string() })
    }

    /// Load `pipeline-explorer.toml` from `root` if present.
    ///
    /// # Errors
    /// Returns an error only when the file exists but cannot be read or parsed.
    pub fn load_config_near(root: &Path) -> Result<Option<Config>, ExplorerError> {
        let p: PathBuf = root.join(CONFIG_FILE_NAME);
        if p.is_file() {
            load_config_at(&p).map(Some)
        } else {
            Ok(None)
        }
    }
}

pub mod file_walker {
    use std::ffi::OsStr;
    use std::path::{Path, PathBuf};

    pub const DEFAULT_EXTENSIONS: &[&str] = &["yml", "yaml"];
    pub const DEFAULT_SKIP_DIRS: &[&str] =
        &[".git", "node_modules", "target", "bin", "obj", "dist", "out", ".vscode"];

    #[derive(Debug, Clone)]
    pub struct WalkOptions {
        pub extensions: Vec<String>,
        pub skip_dirs: Vec<String>,
        /// Honour `.gitignore`/`.ignore` files.
        pub respect_ignore: bool,
    }

    impl Default for WalkOptions {
        fn default() -> Self {
            Self {
                extensions: DEFAULT_EXTENSIONS.iter().map(|s| (*s).to_string()).collect(),
                skip_dirs: DEFAULT_SKIP_DIRS.iter().map(|s| (*s).to_string()).collect(),
                respect_ignore: true,
            }
        }
    }

    impl WalkOptions {
        fn has_extension(&self, path: &Path) -> bool {
            path.extension()
                .and_then(OsStr::to_str)
                .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        }

        fn is_skipped_dir(&self, name: &OsStr) -> bool {
            name.to_str().is_some_and(|n| self.skip_dirs.iter().any(|d| d == n))
        }

        /// Whether a path under `root` belongs to the corpus (used for change notifications).
        #[must_use]
        pub fn accepts(&self, root: &Path, path: &Path) -> bool {
            let Ok(rel) = path.strip_prefix(root) else {
                return false;
            };
            let mut dirs = rel.components().rev().skip(1);
            self.has_extension(path) && !dirs.any(|c| self.is_skipped_dir(c.as_os_str()))
        }
    }

    /// Discover template files under `root`, sorted.
    #[must_use]
    pub fn yaml_files(root: &Path, opts: &WalkOptions) -> Vec<PathBuf> {
        let mut out = if opts.respect_ignore {
            walk_with_ignore(root, opts)
        } else {
            walk_all(root, opts)
        };
        out.sort();
        out
    }

    fn walk_with_ignore(root: &Path, opts: &WalkOptions) -> Vec<PathBuf> {
        let skip = opts.clone();
        let mut walker = ignore::WalkBuilder::new(root);
        // Pipeline folders are often hidden (.azure-pipelines), so hidden files stay in
        walker
            .follow_links(false)
            .hidden(false)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(false)
            .require_git(false)
            .ignore(true)
            .parents(true)
            .filter_entry(move |e| {
                !(e.depth() > 0
                    && e.file_type().is_some_and(|t| t.is_dir())
                    && skip.is_skipped_dir(e.file_name()))
            });
        walker
            .build()
            .flatten()
            .filter(|e| e.file_type().is_some_and(|t| t.is_file()))
            .map(ignore::DirEntry::into_path)
            .filter(|p| opts.has_extension(p))
            .collect()
    }

    fn walk_all(root: &Path, opts: &WalkOptions) -> Vec<PathBuf> {
        walkdir::WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !(e.file_type().is_dir() && e.depth() > 0 && opts.is_skipped_dir(e.file_name())))
            .flatten()
            .filter(|e| e.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .filter(|p| opts.has_extension(p))
            .collect()
    }
}

pub mod paths {
    use std::path::{Component, Path, PathBuf};

    /// Resolve `.` and `..` components without touching the filesystem.
    #[must_use]
    pub fn normalize_lexically(path: &Path) -> PathBuf {
        let mut out = PathBuf::new();
        for c in path.components() {
            match c {
                Component::CurDir => {}
                Component::ParentDir => match out.components().next_back() {
                    Some(Component::Normal(_)) => {
                        out.pop();
                    }
                    // `/..` is `/`
                    Some(Component::RootDir | Component::Prefix(_)) => {}
                    _ => out.push(".."),
                },
                other => out.push(other.as_os_str()),
            }
        }
        out
    }

    /// Make `path` absolute against the current directory and normalize it.
    #[must_use]
    pub fn absolutize(path: &Path) -> PathBuf {
        if path.is_absolute() {
            return normalize_lexically(path);
        }
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        normalize_lexically(&cwd.join(path))
    }

    /// Shorten `path` relative to `root` for display.
    #[must_use]
    pub fn display_relative(path: &Path, root: &Path) -> String {
        path.strip_prefix(root).unwrap_or(path).display().to_string()
    }

}
