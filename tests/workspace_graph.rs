use pipeline_relations_explorer::graph::{NodeKey, NodeKind};
use pipeline_relations_explorer::workspace::{Workspace, WorkspaceOptions};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

const CI: &str = "\
trigger:
- main
resources:
  repositories:
  - repository: tools
    type: git
    name: contoso/tools-repo
stages:
- template: stages/deploy.yml
- template: stages/deploy.yml
- template: stages/gone.yml
- template: jobs/gone.yml
- template: lint.yml@nowhere
- template: ${{ variables.stageTemplate }}
- template: steps/build.yml@tools
";

/// `<tmp>/main` is the workspace repository, `<tmp>/tools-repo` a sibling checkout.
fn fixture() -> (tempfile::TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    let main = dir.path().join("main");
    fs::create_dir_all(main.join(".git")).unwrap();
    fs::create_dir_all(dir.path().join("tools-repo/.git")).unwrap();
    write_file(&main.join("ci.yml"), CI);
    write_file(
        &main.join("stages/deploy.yml"),
        "parameters:\n- name: environment\n  type: string\n- name: region\n  default: eastus\nstages:\n- stage: x\n",
    );
    write_file(&main.join("README.yml.bak"), "not a template");
    write_file(&dir.path().join("tools-repo/steps/build.yml"), "steps:\n- script: make\n");
    (dir, main)
}

#[test]
fn one_node_per_corpus_file_and_per_distinct_target() {
    let (_dir, main) = fixture();
    let ws = Workspace::open(&main, WorkspaceOptions::default());
    let graph = ws.workspace_graph();

    let ci = graph.node_for_path(&main.join("ci.yml")).unwrap();
    assert_eq!(ci.kind, NodeKind::PipelineRoot);
    let deploy = graph.node_for_path(&main.join("stages/deploy.yml")).unwrap();
    assert_eq!(deploy.kind, NodeKind::PipelineRoot, "top-level stages: marks a pipeline root");
    assert_eq!((deploy.parameter_count, deploy.required_parameter_count), (2, 1));

    // The duplicate reference collapses into one edge
    let ci_key = NodeKey::real(&main.join("ci.yml"));
    let deploy_key = NodeKey::real(&main.join("stages/deploy.yml"));
    assert_eq!(graph.edges_from(&ci_key).filter(|e| e.target == deploy_key).count(), 1);

    let keys: Vec<&NodeKey> = graph.nodes.iter().map(|n| &n.key).collect();
    let unique: std::collections::HashSet<&NodeKey> = keys.iter().copied().collect();
    assert_eq!(keys.len(), unique.len());
}

#[test]
fn missing_targets_are_keyed_by_path_and_labelled_by_file_name() {
    let (_dir, main) = fixture();
    let ws = Workspace::open(&main, WorkspaceOptions::default());
    let graph = ws.workspace_graph();

    let missing: Vec<_> = graph.nodes_of_kind(NodeKind::Missing).collect();
    assert_eq!(missing.len(), 2, "same basename, different paths");
    assert!(missing.iter().all(|n| n.label == "gone.yml"));
    assert!(graph.node(&NodeKey::Missing { path: main.join("stages/gone.yml") }).is_some());
    assert!(graph.node(&NodeKey::Missing { path: main.join("jobs/gone.yml") }).is_some());
}

#[test]
fn one_missing_node_shared_by_every_file_that_names_it() {
    let (_dir, main) = fixture();
    write_file(&main.join("release.yml"), "trigger: none\nstages:\n- template: ./stages/../stages/gone.yml\n");
    write_file(&main.join("stages/extra.yml"), "stages:\n- template: gone.yml\n");
    let ws = Workspace::open(&main, WorkspaceOptions::default());
    let graph = ws.workspace_graph();

    let gone = NodeKey::Missing { path: main.join("stages/gone.yml") };
    assert_eq!(graph.nodes.iter().filter(|n| n.key == gone).count(), 1);
    assert_eq!(graph.nodes_of_kind(NodeKind::Missing).count(), 2);
    let mut callers: Vec<&NodeKey> = graph.edges_into(&gone).map(|e| &e.source).collect();
    callers.sort_by_key(|k| k.to_string());
    assert_eq!(
        callers,
        vec![
            &NodeKey::real(&main.join("ci.yml")),
            &NodeKey::real(&main.join("release.yml")),
            &NodeKey::real(&main.join("stages/extra.yml")),
        ]
    );
}

#[test]
fn unknown_alias_and_runtime_expressions() {
    let (_dir, main) = fixture();
    let ws = Workspace::open(&main, WorkspaceOptions::default());
    let graph = ws.workspace_graph();

    let unknown: Vec<_> = graph.nodes_of_kind(NodeKind::UnknownAlias).collect();
    assert_eq!(unknown.len(), 1);
    assert_eq!(unknown[0].label, "lint.yml@nowhere");
    assert_eq!(
        unknown[0].key,
        NodeKey::UnknownAlias { alias: "nowhere".to_string(), raw_ref: "lint.yml@nowhere".to_string() }
    );
    assert!(graph.nodes.iter().all(|n| !n.label.contains("${{")));
}

#[test]
fn cross_repository_target_is_external() {
    let (dir, main) = fixture();
    let ws = Workspace::open(&main, WorkspaceOptions::default());
    let graph = ws.workspace_graph();

    let ext_path = dir.path().join("tools-repo/steps/build.yml");
    let ext = graph.node_for_path(&ext_path).unwrap();
    assert_eq!(ext.kind, NodeKind::ExternalTemplate);
    assert_eq!(ext.repository.as_deref(), Some("tools-repo"));

    let edge = graph.edges_into(&ext.key).next().unwrap();
    assert_eq!(edge.label.as_deref(), Some("@tools"));
}

#[test]
fn graph_serializes_to_json() {
    let (_dir, main) = fixture();
    let ws = Workspace::open(&main, WorkspaceOptions::default());
    let json = serde_json::to_string(&ws.workspace_graph()).unwrap();
    assert!(json.contains("\"type\":\"missing\""));
    assert!(json.contains("\"kind\":\"external_template\""));
}

#[test]
fn downstream_tree_reaches_the_external_checkout() {
    let (dir, main) = fixture();
    let ws = Workspace::open(&main, WorkspaceOptions::default());
    let tree = ws.downstream(&main.join("ci.yml"), 3);
    assert!(tree.contains_path(&dir.path().join("tools-repo/steps/build.yml")));
    assert!(tree.contains_path(&main.join("stages/gone.yml")));
    assert_eq!(tree.count_cycles(), 0);
}
