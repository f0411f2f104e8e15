//! pipeline-relations-explorer: template relationships in Azure Pipelines YAML
//!
//! Scan a folder of pipeline YAML, resolve every `- template:` reference
//! (relative, repository-root-absolute, or `path@alias` through
//! `resources.repositories`) and answer navigation questions over the result.
//!
//! # Features
//! - Line-oriented structural parsing of parameters, aliases, call sites and passed parameters
//! - Bounded downstream and upstream trees with path-sensitive cycle detection
//! - Reverse-reference index, built in the background and maintained per file change
//! - Whole-workspace graph with synthetic nodes for missing files and unknown aliases
//! - Call-site diagnostics, cycles, shortest paths and hub files
//! - DOT and text rendering
//!
//! # Quickstart (Library)
//! ```no_run
//! use pipeline_relations_explorer::workspace::{Workspace, WorkspaceOptions};
//!
//! let ws = Workspace::open(std::path::Path::new("."), WorkspaceOptions::default());
//! ws.build_index();
//! let target = ws.resolve_file(std::path::Path::new("templates/build.yml"));
//! let tree = ws.upstream(&target, 3);
//! println!("{} direct callers", tree.children.len());
//! ```
//!
//! # Quickstart (CLI)
//! ```text
//! pipeline-relations-explorer graph --path . --dot graph.dot
//! pipeline-relations-explorer query upstream --path . --file templates/build.yml --depth 3
//! pipeline-relations-explorer query diagnostics --path . --file azure-pipelines.yml --fail-on-error
//! ```
pub mod app;
pub mod cli;
pub mod errors;
pub mod graph;
pub mod parser;
pub mod query;
pub mod utils;
pub mod visualization;
pub mod watcher;
pub mod workspace;
