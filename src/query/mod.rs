use serde::Serialize;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};

use crate::graph::{IndexSnapshot, Target, TreeNode};
use crate::parser::{self, ParameterDeclaration};
use crate::workspace::Workspace;

pub mod diagnostics;

pub use diagnostics::{check_file, Diagnostic, DiagnosticKind, Severity};

/// Query trait implemented by all query types.
///
/// Given a shared reference to a `Workspace`, returns a result of type `R`.
pub trait Query<R> {
    fn run(&self, ws: &Workspace) -> R;
}

/// Templates reachable from a file.
pub struct DownstreamQuery {
    pub file: PathBuf,
    pub depth: usize,
}

impl DownstreamQuery {
    #[must_use]
    pub fn new<P: AsRef<Path>>(file: P, depth: usize) -> Self {
        Self { file: file.as_ref().to_path_buf(), depth }
    }
}

impl Query<TreeNode> for DownstreamQuery {
    fn run(&self, ws: &Workspace) -> TreeNode {
        ws.downstream(&self.file, self.depth)
    }
}

/// Files that (transitively) reference a file.
pub struct UpstreamQuery {
    pub file: PathBuf,
    pub depth: usize,
}

impl UpstreamQuery {
    #[must_use]
    pub fn new<P: AsRef<Path>>(file: P, depth: usize) -> Self {
        Self { file: file.as_ref().to_path_buf(), depth }
    }
}

impl Query<TreeNode> for UpstreamQuery {
    fn run(&self, ws: &Workspace) -> TreeNode {
        ws.upstream(&self.file, self.depth)
    }
}

/// Parameters declared at the top of a template.
pub struct ParametersQuery {
    pub file: PathBuf,
}

impl ParametersQuery {
    pub fn new<P: AsRef<Path>>(file: P) -> Self {
        Self { file: file.as_ref().to_path_buf() }
    }
}

impl Query<Vec<ParameterDeclaration>> for ParametersQuery {
    fn run(&self, ws: &Workspace) -> Vec<ParameterDeclaration> {
        ws.parameters(&self.file)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReferenceStatus {
    Resolved { path: PathBuf, repository: Option<String> },
    Missing { path: PathBuf, repository: Option<String> },
    UnknownAlias { alias: String },
    /// Built at queue time from expressions; not followed.
    RuntimeExpression,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceRow {
    pub line: usize,
    pub raw_ref: String,
    #[serde(flatten)]
    pub status: ReferenceStatus,
}

/// Every `template:` reference in a file with its resolution outcome.
pub struct ReferencesQuery {
    pub file: PathBuf,
}

impl ReferencesQuery {
    pub fn new<P: AsRef<Path>>(file: P) -> Self {
        Self { file: file.as_ref().to_path_buf() }
    }
}

impl Query<Vec<ReferenceRow>> for ReferencesQuery {
    fn run(&self, ws: &Workspace) -> Vec<ReferenceRow> {
        let Some(text) = ws.cache().read(&self.file) else {
            return Vec::new();
        };
        let mut rows: Vec<ReferenceRow> = parser::extract_template_references(&text)
            .into_iter()
            .filter(parser::TemplateReference::is_runtime_expression)
            .map(|r| ReferenceRow {
                line: r.source_line,
                raw_ref: r.raw_ref,
                status: ReferenceStatus::RuntimeExpression,
            })
            .collect();
        for o in ws.references(&self.file).unwrap_or_default() {
            let status = match o.target {
                Target::File { path, repository } => ReferenceStatus::Resolved { path, repository },
                Target::Missing { path, repository } => ReferenceStatus::Missing { path, repository },
                Target::UnknownAlias { alias } => ReferenceStatus::UnknownAlias { alias },
            };
            rows.push(ReferenceRow { line: o.reference.source_line, raw_ref: o.reference.raw_ref, status });
        }
        rows.sort_by_key(|r| r.line);
        rows
    }
}

/// Problems at a file's call sites and in its own declarations.
pub struct DiagnosticsQuery {
    pub file: PathBuf,
}

impl DiagnosticsQuery {
    pub fn new<P: AsRef<Path>>(file: P) -> Self {
        Self { file: file.as_ref().to_path_buf() }
    }
}

impl Query<Vec<Diagnostic>> for DiagnosticsQuery {
    fn run(&self, ws: &Workspace) -> Vec<Diagnostic> {
        check_file(ws, &self.file)
    }
}

/// File-level adjacency over the corpus, restricted to targets that are corpus files.
struct Adjacency {
    files: Vec<PathBuf>,
    index: HashMap<PathBuf, usize>,
    out: Vec<Vec<usize>>,
}

impl Adjacency {
    fn from_snapshot(snap: &IndexSnapshot) -> Self {
        let files: Vec<PathBuf> = snap.files.iter().cloned().collect();
        let index: HashMap<PathBuf, usize> = files.iter().cloned().enumerate().map(|(i, p)| (p, i)).collect();
        let mut out: Vec<Vec<usize>> = vec![Vec::new(); files.len()];
        for (file, refs) in &snap.forward {
            let Some(&u) = index.get(file) else { continue };
            for r in refs {
                if let Some(&v) = index.get(&r.target) {
                    out[u].push(v);
                }
            }
        }
        for neigh in &mut out {
            neigh.sort_unstable();
            neigh.dedup();
        }
        Self { files, index, out }
    }
}

/// Detect reference cycles across the whole corpus (self-references included).
#[derive(Default)]
pub struct CycleDetectionQuery;

impl CycleDetectionQuery {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

struct CycleSearch<'a> {
    adj: &'a Adjacency,
    visited: Vec<bool>,
    on_stack: Vec<bool>,
    path: Vec<usize>,
    found: Vec<Vec<PathBuf>>,
}

impl CycleSearch<'_> {
    fn visit(&mut self, u: usize) {
        self.visited[u] = true;
        self.on_stack[u] = true;
        self.path.push(u);
        let adj = self.adj;
        for &v in &adj.out[u] {
            if !self.visited[v] {
                self.visit(v);
            } else if self.on_stack[v] {
                if let Some(pos) = self.path.iter().position(|&x| x == v) {
                    self.found.push(self.path[pos..].iter().map(|&i| adj.files[i].clone()).collect());
                }
            }
        }
        self.path.pop();
        self.on_stack[u] = false;
    }
}

impl Query<Vec<Vec<PathBuf>>> for CycleDetectionQuery {
    fn run(&self, ws: &Workspace) -> Vec<Vec<PathBuf>> {
        ws.ensure_index();
        let adj = Adjacency::from_snapshot(&ws.index().snapshot());
        let n = adj.files.len();
        let mut search = CycleSearch {
            adj: &adj,
            visited: vec![false; n],
            on_stack: vec![false; n],
            path: Vec::new(),
            found: Vec::new(),
        };
        for u in 0..n {
            if !search.visited[u] {
                search.visit(u);
            }
        }
        search.found
    }
}

/// Shortest reference chain between two files.
pub struct ShortestPathQuery {
    pub from: PathBuf,
    pub to: PathBuf,
}

impl ShortestPathQuery {
    #[must_use]
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(from: P, to: Q) -> Self {
        Self { from: from.as_ref().to_path_buf(), to: to.as_ref().to_path_buf() }
    }
}

impl Query<Vec<PathBuf>> for ShortestPathQuery {
    fn run(&self, ws: &Workspace) -> Vec<PathBuf> {
        ws.ensure_index();
        let adj = Adjacency::from_snapshot(&ws.index().snapshot());
        let (Some(&src), Some(&dst)) = (adj.index.get(&self.from), adj.index.get(&self.to)) else {
            return Vec::new();
        };
        let mut prev: Vec<Option<usize>> = vec![None; adj.files.len()];
        let mut seen = vec![false; adj.files.len()];
        let mut queue = VecDeque::from([src]);
        seen[src] = true;
        while let Some(u) = queue.pop_front() {
            if u == dst {
                break;
            }
            for &v in &adj.out[u] {
                if !seen[v] {
                    seen[v] = true;
                    prev[v] = Some(u);
                    queue.push_back(v);
                }
            }
        }
        if !seen[dst] {
            return Vec::new();
        }
        let mut chain = vec![dst];
        let mut cur = dst;
        while let Some(p) = prev[cur] {
            chain.push(p);
            cur = p;
        }
        chain.reverse();
        chain.into_iter().map(|i| adj.files[i].clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CentralityMetric {
    In,
    Out,
    Total,
}

/// Top-N files by number of distinct callers/targets.
pub struct HubsQuery {
    pub metric: CentralityMetric,
    pub top: usize,
}

impl HubsQuery {
    #[must_use]
    pub fn new(metric: CentralityMetric, top: usize) -> Self {
        Self { metric, top }
    }
}

// Rows are (file, in-degree, out-degree)
impl Query<Vec<(PathBuf, usize, usize)>> for HubsQuery {
    fn run(&self, ws: &Workspace) -> Vec<(PathBuf, usize, usize)> {
        ws.ensure_index();
        let snap = ws.index().snapshot();
        let mut rows: Vec<(PathBuf, usize, usize)> = snap
            .files
            .iter()
            .map(|f| {
                let indeg = snap.inverse.get(f).map_or(0, |callers| callers.iter().filter(|c| *c != f).count());
                let outdeg = snap.forward.get(f).map_or(0, |refs| {
                    refs.iter().map(|r| &r.target).filter(|t| *t != f).collect::<BTreeSet<_>>().len()
                });
                (f.clone(), indeg, outdeg)
            })
            .collect();
        let key = |r: &(PathBuf, usize, usize)| match self.metric {
            CentralityMetric::In => r.1,
            CentralityMetric::Out => r.2,
            CentralityMetric::Total => r.1 + r.2,
        };
        rows.sort_by(|a, b| key(b).cmp(&key(a)).then_with(|| a.0.cmp(&b.0)));
        rows.truncate(self.top);
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::WorkspaceOptions;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn references_report_every_outcome_in_line_order() {
        let td = tempdir().unwrap();
        fs::write(td.path().join("t.yml"), "steps: []\n").unwrap();
        fs::write(
            td.path().join("ci.yml"),
            "steps:\n- template: ${{ parameters.t }}\n- template: t.yml\n- template: gone.yml\n- template: a.yml@x\n",
        )
        .unwrap();
        let ws = Workspace::open(td.path(), WorkspaceOptions::default());
        let rows = ReferencesQuery::new(ws.root().join("ci.yml")).run(&ws);
        let lines: Vec<usize> = rows.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![1, 2, 3, 4]);
        assert_eq!(rows[0].status, ReferenceStatus::RuntimeExpression);
        assert!(matches!(rows[1].status, ReferenceStatus::Resolved { .. }));
        assert!(matches!(rows[2].status, ReferenceStatus::Missing { .. }));
        assert_eq!(rows[3].status, ReferenceStatus::UnknownAlias { alias: "x".to_string() });
    }

    #[test]
    fn cycles_and_paths_over_the_index() {
        let td = tempdir().unwrap();
        fs::write(td.path().join("a.yml"), "steps:\n- template: b.yml\n").unwrap();
        fs::write(td.path().join("b.yml"), "steps:\n- template: c.yml\n").unwrap();
        fs::write(td.path().join("c.yml"), "steps:\n- template: a.yml\n").unwrap();
        fs::write(td.path().join("d.yml"), "steps:\n- template: d.yml\n").unwrap();
        let ws = Workspace::open(td.path(), WorkspaceOptions::default());
        let cycles = CycleDetectionQuery::new().run(&ws);
        assert_eq!(cycles.len(), 2);
        assert!(cycles.iter().any(|c| c.len() == 3));
        assert!(cycles.iter().any(|c| c == &vec![ws.root().join("d.yml")]));

        let chain = ShortestPathQuery::new(ws.root().join("a.yml"), ws.root().join("c.yml")).run(&ws);
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn hubs_rank_by_distinct_callers() {
        let td = tempdir().unwrap();
        fs::write(td.path().join("shared.yml"), "steps: []\n").unwrap();
        for name in ["p1.yml", "p2.yml"] {
            fs::write(td.path().join(name), "steps:\n- template: shared.yml\n- template: shared.yml\n").unwrap();
        }
        let ws = Workspace::open(td.path(), WorkspaceOptions::default());
        let rows = HubsQuery::new(CentralityMetric::In, 1).run(&ws);
        assert_eq!(rows, vec![(ws.root().join("shared.yml"), 2, 0)]);
    }
}
