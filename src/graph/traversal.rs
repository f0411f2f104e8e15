//! Bounded downstream/upstream traversals producing trees.
//!
//! Both directions track the ancestors of the node being expanded, not every
//! node seen so far: a file reachable through two distinct paths (a diamond)
//! is expanded under each path, while a file that is already on the current
//! path becomes a leaf flagged as a cycle.
use super::{
    outgoing_references, EdgeDirection, GraphAccumulator, GraphBuilder, GraphEdge, GraphNode, NodeKey,
    NodeKind, Target, WorkspaceGraph,
};
use crate::parser;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Deepest traversal a query may request; shallower requests below 1 are raised to 1.
pub const MAX_DEPTH: usize = 10;

#[must_use]
pub fn clamp_depth(depth: usize) -> usize {
    depth.clamp(1, MAX_DEPTH)
}

/// One file that references a target, with the line of its first such reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    pub caller: PathBuf,
    pub line: usize,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub key: NodeKey,
    pub kind: NodeKind,
    pub label: String,
    /// Line of the reference linking this node to its parent: in the parent
    /// file for downstream trees, in this file for upstream trees.
    pub line: Option<usize>,
    pub alias: Option<String>,
    /// Set on leaves that would re-enter a file already on the current path.
    pub cycle: bool,
    pub parameter_count: usize,
    pub required_parameter_count: usize,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    fn leaf(key: NodeKey, kind: NodeKind, line: Option<usize>, alias: Option<String>) -> Self {
        let node = GraphNode::new(key, kind);
        Self {
            key: node.key,
            kind,
            label: node.label,
            line,
            alias,
            cycle: false,
            parameter_count: 0,
            required_parameter_count: 0,
            children: Vec::new(),
        }
    }

    /// Pre-order iterator over this node and all descendants.
    pub fn iter(&self) -> impl Iterator<Item = &TreeNode> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }

    #[must_use]
    pub fn count_cycles(&self) -> usize {
        self.iter().filter(|n| n.cycle).count()
    }

    /// Number of edge levels below this node.
    #[must_use]
    pub fn height(&self) -> usize {
        self.children.iter().map(|c| c.height() + 1).max().unwrap_or(0)
    }

    #[must_use]
    pub fn contains_path(&self, path: &Path) -> bool {
        self.iter().any(|n| n.key.path() == Some(path))
    }

    /// Flatten into a graph with one node per distinct key.
    ///
    /// Edges run from tree parent to tree child; `direction` records which way
    /// the tree was grown.
    #[must_use]
    pub fn to_graph(&self, direction: EdgeDirection) -> WorkspaceGraph {
        let mut acc = GraphAccumulator::default();
        self.collect_into(&mut acc, direction);
        acc.into_graph()
    }

    fn collect_into(&self, acc: &mut GraphAccumulator, direction: EdgeDirection) {
        let node = acc.add_node(GraphNode::new(self.key.clone(), self.kind));
        if !self.cycle {
            node.parameter_count = self.parameter_count;
            node.required_parameter_count = self.required_parameter_count;
        }
        for child in &self.children {
            child.collect_into(acc, direction);
            acc.add_edge(GraphEdge {
                source: self.key.clone(),
                target: child.key.clone(),
                direction,
                label: edge_label(child),
            });
        }
    }
}

fn edge_label(child: &TreeNode) -> Option<String> {
    match (&child.alias, child.cycle) {
        (Some(a), true) => Some(format!("@{a} (cycle)")),
        (Some(a), false) => Some(format!("@{a}")),
        (None, true) => Some("cycle".to_string()),
        (None, false) => None,
    }
}

impl GraphBuilder<'_> {
    /// Templates reachable from `file`, `depth` edge levels deep.
    #[must_use]
    pub fn downstream(&self, file: &Path, depth: usize) -> TreeNode {
        let mut on_path = HashSet::new();
        self.expand_downstream(file, None, None, 0, clamp_depth(depth), &mut on_path)
    }

    /// Files that reference `file`, `depth` edge levels up.
    ///
    /// Uses the workspace index when one is attached and ready, otherwise
    /// scans `corpus` for callers.
    #[must_use]
    pub fn upstream(&self, file: &Path, depth: usize, corpus: &[PathBuf]) -> TreeNode {
        let depth = clamp_depth(depth);
        let mut on_path = HashSet::new();
        if let Some(index) = self.index.filter(|i| i.is_ready()) {
            return self.expand_upstream(file, None, None, 0, depth, &mut on_path, &|t| {
                index.callers_with_sites(t)
            });
        }
        tracing::debug!("Index not ready; scanning {} files for callers", corpus.len());
        let memo: RefCell<HashMap<PathBuf, Vec<CallSite>>> = RefCell::new(HashMap::new());
        let scan = |t: &Path| -> Vec<CallSite> {
            if let Some(hit) = memo.borrow().get(t) {
                return hit.clone();
            }
            let sites = self.direct_callers_by_scan(t, corpus);
            memo.borrow_mut().insert(t.to_path_buf(), sites.clone());
            sites
        };
        self.expand_upstream(file, None, None, 0, depth, &mut on_path, &scan)
    }

    /// Direct callers of `target` found by re-reading every file in `corpus`.
    ///
    /// One call site per caller, ordered by caller path.
    #[must_use]
    pub fn direct_callers_by_scan(&self, target: &Path, corpus: &[PathBuf]) -> Vec<CallSite> {
        let mut sites: Vec<CallSite> = corpus
            .iter()
            .filter_map(|caller| {
                let outgoing = outgoing_references(self.cache, self.resolver, caller)?;
                outgoing.into_iter().find(|o| o.target_path() == Some(target)).map(|o| CallSite {
                    caller: caller.clone(),
                    line: o.reference.source_line,
                    alias: o.alias,
                })
            })
            .collect();
        sites.sort_by(|a, b| a.caller.cmp(&b.caller));
        sites
    }

    fn file_node(&self, file: &Path, line: Option<usize>, alias: Option<String>) -> TreeNode {
        let text = self.cache.read(file);
        let kind = if alias.is_some() {
            NodeKind::ExternalTemplate
        } else if text.as_deref().is_some_and(parser::is_pipeline_root) {
            NodeKind::PipelineRoot
        } else {
            NodeKind::LocalTemplate
        };
        let mut node = TreeNode::leaf(NodeKey::real(file), kind, line, alias);
        if let Some(text) = text {
            let params = parser::extract_parameters(&text);
            node.required_parameter_count = params.iter().filter(|p| p.required).count();
            node.parameter_count = params.len();
        }
        node
    }

    fn cycle_leaf(&self, file: &Path, line: usize, alias: Option<String>) -> TreeNode {
        let kind = if alias.is_some() { NodeKind::ExternalTemplate } else { self.classify(file) };
        let mut node = TreeNode::leaf(NodeKey::real(file), kind, Some(line), alias);
        node.cycle = true;
        node
    }

    fn expand_downstream(
        &self,
        file: &Path,
        line: Option<usize>,
        alias: Option<String>,
        level: usize,
        depth: usize,
        on_path: &mut HashSet<PathBuf>,
    ) -> TreeNode {
        let mut node = self.file_node(file, line, alias);
        if level >= depth {
            return node;
        }
        let Some(outgoing) = outgoing_references(self.cache, self.resolver, file) else {
            return node;
        };
        on_path.insert(file.to_path_buf());
        for o in outgoing {
            let key = o.key();
            let at = o.reference.source_line;
            let child = match o.target {
                Target::File { path, .. } if on_path.contains(&path) => self.cycle_leaf(&path, at, o.alias),
                Target::File { path, .. } => {
                    self.expand_downstream(&path, Some(at), o.alias, level + 1, depth, on_path)
                }
                Target::Missing { .. } => TreeNode::leaf(key, NodeKind::Missing, Some(at), o.alias),
                Target::UnknownAlias { alias } => {
                    TreeNode::leaf(key, NodeKind::UnknownAlias, Some(at), Some(alias))
                }
            };
            node.children.push(child);
        }
        on_path.remove(file);
        node
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_upstream(
        &self,
        file: &Path,
        line: Option<usize>,
        alias: Option<String>,
        level: usize,
        depth: usize,
        on_path: &mut HashSet<PathBuf>,
        callers: &dyn Fn(&Path) -> Vec<CallSite>,
    ) -> TreeNode {
        // Caller files are never reached through an alias of their own
        let mut node = self.file_node(file, line, None);
        node.alias = alias;
        if level >= depth {
            return node;
        }
        on_path.insert(file.to_path_buf());
        for site in callers(file) {
            let child = if on_path.contains(&site.caller) {
                let mut leaf = self.cycle_leaf(&site.caller, site.line, None);
                leaf.alias = site.alias;
                leaf
            } else {
                self.expand_upstream(&site.caller, Some(site.line), site.alias, level + 1, depth, on_path, callers)
            };
            node.children.push(child);
        }
        on_path.remove(file);
        node
    }
}
