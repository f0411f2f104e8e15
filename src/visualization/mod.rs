use crate::graph::{GraphNode, NodeKey, NodeKind, TreeNode, WorkspaceGraph};
use crate::utils::paths::display_relative;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DotTheme {
    Light,
    Dark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankDir {
    LR,
    TB,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeStyle {
    Curved,
    Ortho,
    Polyline,
}

#[derive(Debug, Clone, Copy)]
pub struct DotOptions {
    /// Group nodes by the repository they live in.
    pub clusters: bool,
    pub legend: bool,
    pub theme: DotTheme,
    pub rankdir: RankDir,
    pub splines: EdgeStyle,
    pub rounded: bool,
}

impl Default for DotOptions {
    fn default() -> Self {
        Self {
            clusters: true,
            legend: true,
            theme: DotTheme::Light,
            rankdir: RankDir::LR,
            splines: EdgeStyle::Curved,
            rounded: true,
        }
    }
}

const LOCAL_CLUSTER: &str = "self";
const UNRESOLVED_CLUSTER: &str = "unresolved";

#[derive(Debug, Default)]
pub struct DotGenerator;

impl DotGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn generate_dot(&self, graph: &WorkspaceGraph) -> String {
        self.generate_dot_with_options(graph, DotOptions::default())
    }

    /// Render `graph` as a Graphviz digraph.
    #[must_use]
    pub fn generate_dot_with_options(&self, graph: &WorkspaceGraph, opts: DotOptions) -> String {
        let mut s = String::from("digraph Pipelines\n{\n");
        let rank = match opts.rankdir {
            RankDir::LR => "LR",
            RankDir::TB => "TB",
        };
        let splines = match opts.splines {
            EdgeStyle::Curved => "curved",
            EdgeStyle::Ortho => "ortho",
            EdgeStyle::Polyline => "polyline",
        };
        let node_style = if opts.rounded { "filled,rounded" } else { "filled" };
        let _ = write!(
            s,
            "  rankdir={rank};\n  graph [fontname=Helvetica, splines={splines}] ;\n  node [shape=box, fontsize=10, style=\"{node_style}\"] ;\n  edge [fontname=Helvetica, fontsize=9];\n"
        );

        if opts.clusters {
            let mut groups: BTreeMap<&str, Vec<&GraphNode>> = BTreeMap::new();
            for node in &graph.nodes {
                groups.entry(cluster_of(node)).or_default().push(node);
            }
            for (name, nodes) in groups {
                let _ = write!(
                    s,
                    "  subgraph \"cluster_{}\" {{\n    label=\"{}\";\n    color=lightgrey;\n",
                    escape_label(name),
                    escape_label(name)
                );
                for node in nodes {
                    write_node(&mut s, node, opts.theme, "    ");
                }
                s.push_str("  }\n");
            }
        } else {
            for node in &graph.nodes {
                write_node(&mut s, node, opts.theme, "  ");
            }
        }

        let broken: std::collections::HashSet<&NodeKey> = graph
            .nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Missing | NodeKind::UnknownAlias))
            .map(|n| &n.key)
            .collect();
        for edge in &graph.edges {
            let from = dot_id(&edge.source);
            let to = dot_id(&edge.target);
            let (color, style) = if broken.contains(&edge.target) {
                ("#d62728", "dashed")
            } else if edge.label.as_deref().is_some_and(|l| l.ends_with("cycle")) {
                ("#ff7f0e", "dotted")
            } else {
                ("#555555", "solid")
            };
            let label = edge.label.as_deref().map(escape_label).unwrap_or_default();
            let _ = writeln!(s, "  \"{from}\" -> \"{to}\" [label=\"{label}\", color=\"{color}\", style=\"{style}\"];");
        }

        if opts.legend {
            s.push_str("  subgraph cluster_legend {\n    label=\"Legend\";\n    color=grey;\n");
            for kind in [
                NodeKind::PipelineRoot,
                NodeKind::LocalTemplate,
                NodeKind::ExternalTemplate,
                NodeKind::Missing,
                NodeKind::UnknownAlias,
            ] {
                let (fill, shape) = style_for_kind(kind, opts.theme);
                let name = kind.as_str();
                let id = format!("legend_{name}");
                let _ = writeln!(s, "    \"{id}\" [label=\"{name}\", fillcolor=\"{fill}\", shape=\"{shape}\"];");
            }
            s.push_str("  }\n");
        }

        s.push_str("}\n");
        s
    }
}

fn cluster_of(node: &GraphNode) -> &str {
    match node.kind {
        NodeKind::UnknownAlias => UNRESOLVED_CLUSTER,
        _ => node.repository.as_deref().unwrap_or(LOCAL_CLUSTER),
    }
}

fn write_node(out: &mut String, node: &GraphNode, theme: DotTheme, indent: &str) {
    let id = dot_id(&node.key);
    let (fill, shape) = style_for_kind(node.kind, theme);
    let tooltip = match &node.key {
        NodeKey::Real { path } | NodeKey::Missing { path } => path.display().to_string(),
        NodeKey::UnknownAlias { raw_ref, .. } => raw_ref.clone(),
    };
    let label = if node.parameter_count > 0 {
        format!("{}\\n{} params ({} required)", escape_label(&node.label), node.parameter_count, node.required_parameter_count)
    } else {
        escape_label(&node.label)
    };
    let _ = writeln!(
        out,
        "{indent}\"{id}\" [label=\"{label}\", fillcolor=\"{fill}\", shape=\"{shape}\", tooltip=\"{}\"];",
        escape_label(&tooltip)
    );
}

/// Quoted-ID body for a node; distinct keys always give distinct ids.
fn dot_id(key: &NodeKey) -> String {
    escape_label(&key.to_string())
}

fn escape_label(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn style_for_kind(kind: NodeKind, theme: DotTheme) -> (&'static str, &'static str) {
    match (theme, kind) {
        (DotTheme::Light, NodeKind::PipelineRoot) => ("#e0f3ff", "component"),
        (DotTheme::Light, NodeKind::LocalTemplate) => ("#e8ffe0", "box"),
        (DotTheme::Light, NodeKind::ExternalTemplate) => ("#f0e0ff", "box3d"),
        (DotTheme::Light, NodeKind::Missing) => ("#ffe0e0", "note"),
        (DotTheme::Light, NodeKind::UnknownAlias) => ("#ffffe0", "octagon"),

        (DotTheme::Dark, NodeKind::PipelineRoot) => ("#124559", "component"),
        (DotTheme::Dark, NodeKind::LocalTemplate) => ("#0b6e4f", "box"),
        (DotTheme::Dark, NodeKind::ExternalTemplate) => ("#3c2a5a", "box3d"),
        (DotTheme::Dark, NodeKind::Missing) => ("#6a1e1e", "note"),
        (DotTheme::Dark, NodeKind::UnknownAlias) => ("#6b6b00", "octagon"),
    }
}

/// Render a traversal tree as indented text, paths shown relative to `root`.
#[must_use]
pub fn render_tree(tree: &TreeNode, root: &Path) -> String {
    let mut out = String::new();
    out.push_str(&tree_line(tree, root));
    out.push('\n');
    let n = tree.children.len();
    for (i, child) in tree.children.iter().enumerate() {
        render_child(child, root, "", i + 1 == n, &mut out);
    }
    out
}

fn render_child(node: &TreeNode, root: &Path, prefix: &str, last: bool, out: &mut String) {
    let _ = writeln!(out, "{prefix}{}{}", if last { "└── " } else { "├── " }, tree_line(node, root));
    let next = format!("{prefix}{}", if last { "    " } else { "│   " });
    let n = node.children.len();
    for (i, child) in node.children.iter().enumerate() {
        render_child(child, root, &next, i + 1 == n, out);
    }
}

fn tree_line(node: &TreeNode, root: &Path) -> String {
    let name = match &node.key {
        NodeKey::Real { path } | NodeKey::Missing { path } => display_relative(path, root),
        NodeKey::UnknownAlias { raw_ref, .. } => raw_ref.clone(),
    };
    let mut line = format!("{name} [{}]", node.kind.as_str());
    if let Some(l) = node.line {
        let _ = write!(line, " :{}", l + 1);
    }
    if node.parameter_count > 0 {
        let _ = write!(line, " ({} params, {} required)", node.parameter_count, node.required_parameter_count);
    }
    if node.cycle {
        line.push_str(" (cycle)");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgeDirection, GraphEdge};
    use std::path::PathBuf;

    fn sample() -> WorkspaceGraph {
        let ci = NodeKey::Real { path: PathBuf::from("/r/ci.yml") };
        let gone = NodeKey::Missing { path: PathBuf::from("/r/gone.yml") };
        let ext = NodeKey::Real { path: PathBuf::from("/shared/build.yml") };
        let mut ext_node = GraphNode::new(ext.clone(), NodeKind::ExternalTemplate);
        ext_node.repository = Some("shared".to_string());
        WorkspaceGraph {
            nodes: vec![
                GraphNode::new(ci.clone(), NodeKind::PipelineRoot),
                GraphNode::new(gone.clone(), NodeKind::Missing),
                ext_node,
            ],
            edges: vec![
                GraphEdge { source: ci.clone(), target: gone, direction: EdgeDirection::Undirected, label: None },
                GraphEdge {
                    source: ci,
                    target: ext,
                    direction: EdgeDirection::Undirected,
                    label: Some("@templates".to_string()),
                },
            ],
        }
    }

    #[test]
    fn node_ids_do_not_collide_on_punctuation() {
        let dashed = NodeKey::Real { path: PathBuf::from("/r/build-steps.yml") };
        let underscored = NodeKey::Real { path: PathBuf::from("/r/build_steps.yml") };
        assert_ne!(dot_id(&dashed), dot_id(&underscored));
        assert_eq!(dot_id(&NodeKey::Real { path: PathBuf::from("/r/a\"b.yml") }), "file:/r/a\\\"b.yml");

        let graph = WorkspaceGraph {
            nodes: vec![
                GraphNode::new(dashed.clone(), NodeKind::PipelineRoot),
                GraphNode::new(underscored.clone(), NodeKind::LocalTemplate),
            ],
            edges: vec![GraphEdge {
                source: dashed,
                target: underscored,
                direction: EdgeDirection::Undirected,
                label: None,
            }],
        };
        let dot = DotGenerator::new().generate_dot(&graph);
        assert!(dot.contains("\"file:/r/build-steps.yml\" [label="));
        assert!(dot.contains("\"file:/r/build_steps.yml\" [label="));
        assert!(dot.contains("\"file:/r/build-steps.yml\" -> \"file:/r/build_steps.yml\""));
    }

    #[test]
    fn escape_label_quotes() {
        assert_eq!(escape_label("a\"b"), "a\\\"b");
    }

    #[test]
    fn clusters_by_repository_and_styles_broken_edges() {
        let dot = DotGenerator::new().generate_dot(&sample());
        assert!(dot.starts_with("digraph Pipelines"));
        assert!(dot.contains("subgraph \"cluster_shared\""));
        assert!(dot.contains("subgraph \"cluster_self\""));
        assert!(dot.contains("label=\"@templates\""));
        assert!(dot.contains("color=\"#d62728\", style=\"dashed\""));
        assert!(dot.contains("cluster_legend"));
    }

    #[test]
    fn flat_output_without_legend() {
        let opts = DotOptions { clusters: false, legend: false, theme: DotTheme::Dark, ..DotOptions::default() };
        let dot = DotGenerator::new().generate_dot_with_options(&sample(), opts);
        assert!(!dot.contains("subgraph"));
        assert!(dot.contains("#124559"));
    }

    #[test]
    fn tree_text_marks_cycles_and_lines() {
        let root = Path::new("/r");
        let mut child = TreeNode {
            key: NodeKey::Real { path: PathBuf::from("/r/t/a.yml") },
            kind: NodeKind::LocalTemplate,
            label: "a.yml".to_string(),
            line: Some(2),
            alias: None,
            cycle: true,
            parameter_count: 0,
            required_parameter_count: 0,
            children: Vec::new(),
        };
        let mut top = child.clone();
        top.key = NodeKey::Real { path: PathBuf::from("/r/ci.yml") };
        top.kind = NodeKind::PipelineRoot;
        top.line = None;
        top.cycle = false;
        child.parameter_count = 2;
        child.required_parameter_count = 1;
        top.children.push(child);
        let text = render_tree(&top, root);
        assert_eq!(text, "ci.yml [pipeline]\n└── t/a.yml [template] :3 (2 params, 1 required) (cycle)\n");
    }
}
