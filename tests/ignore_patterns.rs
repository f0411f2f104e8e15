use pipeline_relations_explorer::utils::file_walker::{yaml_files, WalkOptions};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn make_project(root: &Path, entries: &[(&str, &str)]) {
    for (rel, body) in entries {
        let p = root.join(rel);
        if let Some(par) = p.parent() {
            fs::create_dir_all(par).unwrap();
        }
        fs::write(p, body).unwrap();
    }
}

fn names(files: &[PathBuf], root: &Path) -> Vec<String> {
    files.iter().map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/")).collect()
}

#[test]
fn gitignored_templates_are_skipped_unless_ignore_is_off() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    make_project(
        root,
        &[
            (".gitignore", "generated/\n"),
            ("ci.yml", "trigger: none\n"),
            ("generated/out.yml", "steps: []\n"),
        ],
    );

    let respected = yaml_files(root, &WalkOptions::default());
    assert_eq!(names(&respected, root), vec!["ci.yml"]);

    let all = yaml_files(root, &WalkOptions { respect_ignore: false, ..WalkOptions::default() });
    assert_eq!(names(&all, root), vec!["ci.yml", "generated/out.yml"]);
}

#[test]
fn nested_ignore_file_with_negation() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    make_project(
        root,
        &[
            ("templates/.ignore", "*.yaml\n!keep.yaml\n"),
            ("templates/keep.yaml", "steps: []\n"),
            ("templates/drop.yaml", "steps: []\n"),
            ("templates/stage.yml", "stages: []\n"),
        ],
    );
    let files = names(&yaml_files(root, &WalkOptions::default()), root);
    assert!(files.contains(&"templates/keep.yaml".to_string()));
    assert!(files.contains(&"templates/stage.yml".to_string()));
    assert!(!files.contains(&"templates/drop.yaml".to_string()));
}

#[test]
fn skip_dirs_apply_in_both_walk_modes() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    make_project(
        root,
        &[
            ("ci.yml", "trigger: none\n"),
            ("node_modules/pkg/action.yml", "runs: {}\n"),
            ("target/debug/x.yml", "a: 1\n"),
        ],
    );
    for respect_ignore in [true, false] {
        let opts = WalkOptions { respect_ignore, ..WalkOptions::default() };
        assert_eq!(names(&yaml_files(root, &opts), root), vec!["ci.yml"]);
    }
}

#[test]
fn hidden_pipeline_folders_are_walked() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    make_project(
        root,
        &[(".azure-pipelines/ci.yml", "trigger: none\n"), (".azure-pipelines/notes.txt", "- template: x.yml\n")],
    );
    let files = names(&yaml_files(root, &WalkOptions::default()), root);
    assert_eq!(files, vec![".azure-pipelines/ci.yml"]);
}

#[test]
fn accepts_matches_the_walk_filter() {
    let root = Path::new("/repo");
    let opts = WalkOptions::default();
    assert!(opts.accepts(root, Path::new("/repo/stages/build.YML")));
    assert!(!opts.accepts(root, Path::new("/repo/node_modules/a.yml")));
    assert!(!opts.accepts(root, Path::new("/repo/README.md")));
    assert!(!opts.accepts(root, Path::new("/elsewhere/a.yml")));
}
