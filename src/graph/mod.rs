//! Graph model and builders for template relationships.
//!
//! This module defines the node/edge model shared by every query shape
//! (`NodeKey`, `GraphNode`, `GraphEdge`, `WorkspaceGraph`), the per-file edge
//! extraction used by all traversals (`outgoing_references`) and the
//! whole-workspace graph builder. Bounded traversals live in `traversal`, the
//! precomputed reverse index in `index`.
use crate::parser::{self, TemplateReference, SELF_ALIAS};
use crate::utils::cache::FileCache;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

pub mod index;
pub mod resolver;
pub mod traversal;

pub use index::{ChangeKind, FileChange, IndexSnapshot, IndexedReference, WorkspaceIndex};
pub use resolver::{PathResolver, ResolvedReference};
pub use traversal::{CallSite, TreeNode, MAX_DEPTH};

/// Identity of a graph node.
///
/// Synthetic nodes carry enough of the broken reference to collapse repeats
/// into one node: missing files by target path, unknown aliases by alias and
/// raw reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKey {
    Real { path: PathBuf },
    Missing { path: PathBuf },
    UnknownAlias { alias: String, raw_ref: String },
}

impl NodeKey {
    #[must_use]
    pub fn real(path: &Path) -> Self {
        Self::Real { path: path.to_path_buf() }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Real { path } | Self::Missing { path } => Some(path),
            Self::UnknownAlias { .. } => None,
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Real { path } => write!(f, "file:{}", path.display()),
            Self::Missing { path } => write!(f, "missing:{}", path.display()),
            Self::UnknownAlias { alias, raw_ref } => write!(f, "alias:{alias}:{raw_ref}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    PipelineRoot,
    LocalTemplate,
    ExternalTemplate,
    Missing,
    UnknownAlias,
}

impl NodeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PipelineRoot => "pipeline",
            Self::LocalTemplate => "template",
            Self::ExternalTemplate => "external",
            Self::Missing => "missing",
            Self::UnknownAlias => "unknown-alias",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub key: NodeKey,
    pub kind: NodeKind,
    pub label: String,
    pub repository: Option<String>,
    pub parameter_count: usize,
    pub required_parameter_count: usize,
}

impl GraphNode {
    #[must_use]
    pub fn new(key: NodeKey, kind: NodeKind) -> Self {
        let label = label_for(&key);
        Self { key, kind, label, repository: None, parameter_count: 0, required_parameter_count: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeDirection {
    Downstream,
    Upstream,
    Undirected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: NodeKey,
    pub target: NodeKey,
    pub direction: EdgeDirection,
    /// `@alias` for cross-repository references.
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl WorkspaceGraph {
    #[must_use]
    pub fn node(&self, key: &NodeKey) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| &n.key == key)
    }

    #[must_use]
    pub fn node_for_path(&self, path: &Path) -> Option<&GraphNode> {
        self.node(&NodeKey::real(path))
    }

    pub fn edges_into<'a>(&'a self, key: &'a NodeKey) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |e| &e.target == key)
    }

    pub fn edges_from<'a>(&'a self, key: &'a NodeKey) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |e| &e.source == key)
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> impl Iterator<Item = &GraphNode> + '_ {
        self.nodes.iter().filter(move |n| n.kind == kind)
    }
}

/// Insertion-ordered node/edge collector that enforces unique node keys and
/// `(source, target, direction)` edge deduplication.
#[derive(Debug, Default)]
pub(crate) struct GraphAccumulator {
    nodes: Vec<GraphNode>,
    positions: HashMap<NodeKey, usize>,
    edges: Vec<GraphEdge>,
    edge_keys: HashSet<(NodeKey, NodeKey, EdgeDirection)>,
}

impl GraphAccumulator {
    /// Insert `node` unless its key is already present; returns the stored node.
    pub(crate) fn add_node(&mut self, node: GraphNode) -> &mut GraphNode {
        let idx = match self.positions.get(&node.key) {
            Some(&i) => i,
            None => {
                self.positions.insert(node.key.clone(), self.nodes.len());
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };
        &mut self.nodes[idx]
    }

    pub(crate) fn add_edge(&mut self, edge: GraphEdge) -> bool {
        let k = (edge.source.clone(), edge.target.clone(), edge.direction);
        if !self.edge_keys.insert(k) {
            return false;
        }
        self.edges.push(edge);
        true
    }

    pub(crate) fn nodes_mut(&mut self) -> impl Iterator<Item = &mut GraphNode> {
        self.nodes.iter_mut()
    }

    pub(crate) fn into_graph(self) -> WorkspaceGraph {
        WorkspaceGraph { nodes: self.nodes, edges: self.edges }
    }
}

/// Where one template reference points after resolution and existence probing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    File { path: PathBuf, repository: Option<String> },
    Missing { path: PathBuf, repository: Option<String> },
    UnknownAlias { alias: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingReference {
    pub reference: TemplateReference,
    /// Alias used by the reference, `None` for local and `@self` references.
    pub alias: Option<String>,
    pub target: Target,
}

impl OutgoingReference {
    #[must_use]
    pub fn key(&self) -> NodeKey {
        match &self.target {
            Target::File { path, .. } => NodeKey::Real { path: path.clone() },
            Target::Missing { path, .. } => NodeKey::Missing { path: path.clone() },
            Target::UnknownAlias { alias } => {
                NodeKey::UnknownAlias { alias: alias.clone(), raw_ref: self.reference.raw_ref.clone() }
            }
        }
    }

    /// Target path for resolved references, whether or not the file exists.
    #[must_use]
    pub fn target_path(&self) -> Option<&Path> {
        match &self.target {
            Target::File { path, .. } | Target::Missing { path, .. } => Some(path),
            Target::UnknownAlias { .. } => None,
        }
    }

    #[must_use]
    pub fn edge_label(&self) -> Option<String> {
        self.alias.as_ref().map(|a| format!("@{a}"))
    }
}

/// Resolve every statically resolvable reference of `file`.
///
/// Returns `None` when the file cannot be read. Runtime-expression
/// references and empty references are skipped.
pub fn outgoing_references(
    cache: &FileCache,
    resolver: &PathResolver,
    file: &Path,
) -> Option<Vec<OutgoingReference>> {
    let text = cache.read(file)?;
    let aliases = parser::extract_repository_aliases(&text);
    let mut out = Vec::new();
    for reference in parser::extract_template_references(&text) {
        if reference.is_runtime_expression() {
            continue;
        }
        let Some(resolved) = resolver.resolve(&reference.raw_ref, file, Some(&aliases)) else {
            continue;
        };
        let alias = resolver::split_alias(&reference.raw_ref)
            .1
            .filter(|a| *a != SELF_ALIAS)
            .map(str::to_string);
        let target = match resolved {
            ResolvedReference::Path { absolute_path, repository } => {
                if cache.exists(&absolute_path) {
                    Target::File { path: absolute_path, repository }
                } else {
                    Target::Missing { path: absolute_path, repository }
                }
            }
            ResolvedReference::UnresolvedAlias { alias } => Target::UnknownAlias { alias },
        };
        out.push(OutgoingReference { reference, alias, target });
    }
    Some(out)
}

/// Composes the parser, resolver and cache into graph-shaped answers.
#[derive(Debug, Clone, Copy)]
pub struct GraphBuilder<'a> {
    pub(crate) cache: &'a FileCache,
    pub(crate) resolver: &'a PathResolver,
    pub(crate) index: Option<&'a WorkspaceIndex>,
}

impl<'a> GraphBuilder<'a> {
    #[must_use]
    pub fn new(cache: &'a FileCache, resolver: &'a PathResolver) -> Self {
        Self { cache, resolver, index: None }
    }

    /// Consult `index` for upstream queries once it reports ready.
    #[must_use]
    pub fn with_index(mut self, index: &'a WorkspaceIndex) -> Self {
        self.index = Some(index);
        self
    }

    /// Build the corpus-level graph: one node per file, one edge per distinct reference.
    #[must_use]
    pub fn workspace_graph(&self, files: &[PathBuf]) -> WorkspaceGraph {
        let mut acc = GraphAccumulator::default();
        for file in files {
            acc.add_node(GraphNode::new(NodeKey::real(file), self.classify(file)));
        }

        for file in files {
            let Some(outgoing) = outgoing_references(self.cache, self.resolver, file) else {
                tracing::debug!("Skipping unreadable file {}", file.display());
                continue;
            };
            let source = NodeKey::real(file);
            for o in outgoing {
                let key = o.key();
                match &o.target {
                    Target::File { repository, .. } => {
                        let kind = if o.alias.is_some() {
                            NodeKind::ExternalTemplate
                        } else {
                            NodeKind::LocalTemplate
                        };
                        let node = acc.add_node(GraphNode::new(key.clone(), kind));
                        if o.alias.is_some() && node.kind == NodeKind::LocalTemplate {
                            node.kind = NodeKind::ExternalTemplate;
                        }
                        if node.repository.is_none() {
                            node.repository.clone_from(repository);
                        }
                    }
                    Target::Missing { repository, .. } => {
                        let node = acc.add_node(GraphNode::new(key.clone(), NodeKind::Missing));
                        if node.repository.is_none() {
                            node.repository.clone_from(repository);
                        }
                    }
                    Target::UnknownAlias { .. } => {
                        acc.add_node(GraphNode::new(key.clone(), NodeKind::UnknownAlias));
                    }
                }
                acc.add_edge(GraphEdge {
                    source: source.clone(),
                    target: key,
                    direction: EdgeDirection::Undirected,
                    label: o.edge_label(),
                });
            }
        }

        for node in acc.nodes_mut() {
            if let NodeKey::Real { path } = &node.key {
                let (total, required) = self.parameter_counts(path);
                node.parameter_count = total;
                node.required_parameter_count = required;
            }
        }
        acc.into_graph()
    }

    /// `PipelineRoot` if the file carries pipeline-only top-level keys, else `LocalTemplate`.
    #[must_use]
    pub fn classify(&self, file: &Path) -> NodeKind {
        match self.cache.read(file) {
            Some(text) if parser::is_pipeline_root(&text) => NodeKind::PipelineRoot,
            _ => NodeKind::LocalTemplate,
        }
    }

    /// `(declared, required)` parameter counts; `(0, 0)` for unreadable files.
    #[must_use]
    pub fn parameter_counts(&self, file: &Path) -> (usize, usize) {
        let Some(text) = self.cache.read(file) else {
            return (0, 0);
        };
        let params = parser::extract_parameters(&text);
        let required = params.iter().filter(|p| p.required).count();
        (params.len(), required)
    }
}

fn label_for(key: &NodeKey) -> String {
    match key {
        NodeKey::Real { path } | NodeKey::Missing { path } => path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().to_string()),
        NodeKey::UnknownAlias { raw_ref, .. } => raw_ref.clone(),
    }
}
