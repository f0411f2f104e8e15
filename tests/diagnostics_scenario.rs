use pipeline_relations_explorer::query::{DiagnosticKind, DiagnosticsQuery, Query, Severity};
use pipeline_relations_explorer::workspace::{Workspace, WorkspaceOptions};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

const DEPLOY: &str = "\
parameters:
- name: environment
  type: string
  values:
  - dev
  - prod
- name: region
  type: string
  default: eastus
- name: verbose
  type: boolean
  default: false

stages:
- stage: deploy_${{ parameters.environment }}
  variables:
    location: ${{ parameters.region }}
";

#[test]
fn missing_required_parameter_is_reported_at_the_call_site() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write_file(&root.join("templates/deploy.yml"), DEPLOY);
    write_file(
        &root.join("ci.yml"),
        "trigger: none\nstages:\n- template: templates/deploy.yml\n  parameters:\n    region: westus\n",
    );

    let ws = Workspace::open(root, WorkspaceOptions::default());
    let diags = DiagnosticsQuery::new(root.join("ci.yml")).run(&ws);
    assert_eq!(diags.len(), 1, "{diags:?}");
    assert_eq!(diags[0].line, 2);
    assert_eq!(diags[0].severity, Severity::Error);
    assert!(matches!(
        &diags[0].kind,
        DiagnosticKind::MissingRequiredParameter { parameter, .. } if parameter == "environment"
    ));
}

#[test]
fn unknown_and_disallowed_values_point_at_the_parameter_line() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write_file(&root.join("templates/deploy.yml"), DEPLOY);
    write_file(
        &root.join("ci.yml"),
        "\
trigger: none
stages:
- template: templates/deploy.yml
  parameters:
    environment: staging
    colour: blue
- template: templates/deploy.yml
  parameters:
    environment: ${{ variables.env }}
",
    );

    let ws = Workspace::open(root, WorkspaceOptions::default());
    let diags = DiagnosticsQuery::new(root.join("ci.yml")).run(&ws);
    let kinds: Vec<(usize, &DiagnosticKind)> = diags.iter().map(|d| (d.line, &d.kind)).collect();
    assert_eq!(kinds.len(), 2, "{diags:?}");
    assert!(matches!(kinds[0], (4, DiagnosticKind::InvalidParameterValue { value, .. }) if value == "staging"));
    assert!(matches!(kinds[1], (5, DiagnosticKind::UnknownParameter { parameter, .. }) if parameter == "colour"));
}

#[test]
fn broken_references_and_unused_parameters() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write_file(
        &root.join("templates/job.yml"),
        "\
parameters:
- name: pool
  default: ubuntu-latest
- name: unused
  default: ''
jobs:
- job: build
  pool: ${{ parameters.pool }}
  steps:
  - template: ../steps/missing.yml
  - template: shared.yml@tools
",
    );

    let ws = Workspace::open(root, WorkspaceOptions::default());
    let diags = DiagnosticsQuery::new(root.join("templates/job.yml")).run(&ws);
    let summary: Vec<(usize, Severity)> = diags.iter().map(|d| (d.line, d.severity)).collect();
    assert_eq!(summary, vec![(3, Severity::Warning), (9, Severity::Error), (10, Severity::Error)]);
    assert!(matches!(&diags[0].kind, DiagnosticKind::UnusedParameter { parameter } if parameter == "unused"));
    assert!(matches!(&diags[1].kind, DiagnosticKind::MissingTemplate { .. }));
    assert!(matches!(&diags[2].kind, DiagnosticKind::UnknownAlias { alias } if alias == "tools"));

    let json = serde_json::to_string(&diags).unwrap();
    assert!(json.contains("\"kind\":\"unknown_alias\""));
    assert!(json.contains("\"severity\":\"error\""));
}
