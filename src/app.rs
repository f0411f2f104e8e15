use crate::cli::{
    Cli, Commands, DotArgs, DotRankDirArg, DotSplinesArg, DotThemeArg, MetricArg, OnOffArg, OutputFormat,
    QueryCommands, WorkspaceArgs, DEFAULT_DEPTH,
};
use crate::errors::ExplorerError;
use crate::graph::{EdgeDirection, NodeKind, TreeNode, WorkspaceGraph};
use crate::query::{
    CentralityMetric, CycleDetectionQuery, DiagnosticsQuery, HubsQuery, ParametersQuery, Query, ReferenceStatus,
    ReferencesQuery, Severity, ShortestPathQuery,
};
use crate::utils::config::{load_config_at, load_config_near, Config};
use crate::utils::paths::display_relative;
use crate::utils::table;
use crate::visualization::{render_tree, DotGenerator, DotOptions, DotTheme, EdgeStyle, RankDir};
use crate::watcher::FileSystemWatcher;
use crate::workspace::{Workspace, WorkspaceOptions};
use clap::CommandFactory;
use clap_complete::generate;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Exit code for a clean run.
pub const EXIT_OK: i32 = 0;
/// Exit code for runtime failures (I/O, config, watcher).
pub const EXIT_FAILURE: i32 = 1;
/// Exit code for invalid input (unknown focal file, unsupported format).
pub const EXIT_USAGE: i32 = 2;
/// Exit code for `--fail-on-error` when error diagnostics were reported.
pub const EXIT_DIAGNOSTICS: i32 = 3;

/// Run the CLI logic in-process.
///
/// Returns an exit code (0 = success).
#[must_use]
pub fn run_cli(cli: Cli) -> i32 {
    match execute(cli) {
        Ok(code) => code,
        Err(e @ ExplorerError::Query(_)) => {
            eprintln!("{e}");
            EXIT_USAGE
        }
        Err(e) => {
            eprintln!("Error: {e}");
            EXIT_FAILURE
        }
    }
}

/// Opened workspace plus the settings resolved for this invocation.
struct Session {
    ws: Workspace,
    config: Option<Config>,
    quiet: bool,
}

impl Session {
    fn open(args: &WorkspaceArgs, config_path: Option<&Path>, quiet: bool) -> Result<Self, ExplorerError> {
        let config = match config_path {
            Some(p) => Some(load_config_at(p)?),
            None => load_config_near(&args.path)?,
        };
        let mut options = WorkspaceOptions::from_config(config.as_ref());
        if args.no_ignore {
            options.walk.respect_ignore = false;
        }
        Ok(Self { ws: Workspace::open(&args.path, options), config, quiet })
    }

    /// Resolve a user-supplied focal file and require that it exists.
    fn focal(&self, file: &Path) -> Result<PathBuf, ExplorerError> {
        let resolved = self.ws.resolve_file(file);
        if self.ws.cache().exists(&resolved) {
            Ok(resolved)
        } else {
            Err(ExplorerError::Query(format!("File not found: {}", file.display())))
        }
    }

    fn format(&self, flag: Option<OutputFormat>) -> OutputFormat {
        if let Some(f) = flag {
            return f;
        }
        match self.config.as_ref().and_then(|c| c.query.as_ref()).and_then(|q| q.default_format.as_deref()) {
            Some("json") => OutputFormat::Json,
            Some("dot") => OutputFormat::Dot,
            _ => OutputFormat::Text,
        }
    }

    fn depth(&self, flag: Option<usize>) -> usize {
        flag.or_else(|| self.config.as_ref().and_then(|c| c.query.as_ref()).and_then(|q| q.default_depth))
            .unwrap_or(DEFAULT_DEPTH)
    }

    /// CLI flags first, then the `[dot]` config section, then defaults.
    fn dot_options(&self, args: &DotArgs) -> DotOptions {
        let mut opts = DotOptions::default();
        if let Some(dot) = self.config.as_ref().and_then(|c| c.dot.as_ref()) {
            if let Some(v) = dot.clusters {
                opts.clusters = v;
            }
            if let Some(v) = dot.legend {
                opts.legend = v;
            }
            if let Some(v) = &dot.theme {
                opts.theme = if v == "dark" { DotTheme::Dark } else { DotTheme::Light };
            }
            if let Some(v) = &dot.rankdir {
                opts.rankdir = if v == "TB" { RankDir::TB } else { RankDir::LR };
            }
            if let Some(v) = &dot.splines {
                opts.splines = match v.as_str() {
                    "ortho" => EdgeStyle::Ortho,
                    "polyline" => EdgeStyle::Polyline,
                    _ => EdgeStyle::Curved,
                };
            }
            if let Some(v) = dot.rounded {
                opts.rounded = v;
            }
        }
        if let Some(v) = args.dot_clusters {
            opts.clusters = v == OnOffArg::On;
        }
        if let Some(v) = args.dot_legend {
            opts.legend = v == OnOffArg::On;
        }
        if let Some(v) = args.dot_theme {
            opts.theme = match v {
                DotThemeArg::Light => DotTheme::Light,
                DotThemeArg::Dark => DotTheme::Dark,
            };
        }
        if let Some(v) = args.dot_rankdir {
            opts.rankdir = match v {
                DotRankDirArg::LR => RankDir::LR,
                DotRankDirArg::TB => RankDir::TB,
            };
        }
        if let Some(v) = args.dot_splines {
            opts.splines = match v {
                DotSplinesArg::Curved => EdgeStyle::Curved,
                DotSplinesArg::Ortho => EdgeStyle::Ortho,
                DotSplinesArg::Polyline => EdgeStyle::Polyline,
            };
        }
        if let Some(v) = args.dot_rounded {
            opts.rounded = v == OnOffArg::On;
        }
        opts
    }

    fn rel(&self, path: &Path) -> String {
        display_relative(path, self.ws.root())
    }
}

// Surfaces with -v
impl Drop for Session {
    fn drop(&mut self) {
        let cache = self.ws.cache();
        tracing::info!("{} disk reads, {} files cached", cache.disk_reads(), cache.len());
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, ExplorerError> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn no_dot(format: OutputFormat) -> Result<OutputFormat, ExplorerError> {
    if format == OutputFormat::Dot {
        return Err(ExplorerError::Query("DOT output is only available for downstream/upstream queries".to_string()));
    }
    Ok(format)
}

fn execute(cli: Cli) -> Result<i32, ExplorerError> {
    let quiet = cli.quiet;
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let bin_name = env!("CARGO_PKG_NAME");
            generate(shell, &mut cmd, bin_name, &mut io::stdout());
            Ok(EXIT_OK)
        }
        Commands::Graph { workspace, json, dot, dot_args } => {
            let s = Session::open(&workspace, config, quiet)?;
            run_graph(&s, json.as_deref(), dot.as_deref(), &dot_args)
        }
        Commands::Watch { workspace, file, depth } => {
            let s = Session::open(&workspace, config, quiet)?;
            run_watch(&s, file.as_deref(), depth)
        }
        Commands::Query { query } => run_query(query, config, quiet),
    }
}

fn run_graph(
    s: &Session,
    json: Option<&Path>,
    dot: Option<&Path>,
    dot_args: &DotArgs,
) -> Result<i32, ExplorerError> {
    let graph = s.ws.workspace_graph();
    if let Some(path) = json {
        fs::write(path, to_json(&graph)?)?;
    }
    if let Some(path) = dot {
        fs::write(path, DotGenerator::new().generate_dot_with_options(&graph, s.dot_options(dot_args)))?;
    }
    if !s.quiet {
        println!("{}", graph_summary(&graph));
    }
    Ok(EXIT_OK)
}

fn graph_summary(graph: &WorkspaceGraph) -> String {
    let count = |k: NodeKind| graph.nodes_of_kind(k).count();
    format!(
        "Graph: {} nodes, {} edges ({} pipelines, {} templates, {} external, {} missing, {} unknown alias)",
        graph.nodes.len(),
        graph.edges.len(),
        count(NodeKind::PipelineRoot),
        count(NodeKind::LocalTemplate),
        count(NodeKind::ExternalTemplate),
        count(NodeKind::Missing),
        count(NodeKind::UnknownAlias),
    )
}

fn print_tree(
    s: &Session,
    tree: &TreeNode,
    format: OutputFormat,
    direction: EdgeDirection,
    dot_args: &DotArgs,
) -> Result<(), ExplorerError> {
    match format {
        OutputFormat::Json => println!("{}", to_json(tree)?),
        OutputFormat::Dot => {
            let graph = tree.to_graph(direction);
            print!("{}", DotGenerator::new().generate_dot_with_options(&graph, s.dot_options(dot_args)));
        }
        OutputFormat::Text => print!("{}", render_tree(tree, s.ws.root())),
    }
    Ok(())
}

#[allow(clippy::too_many_lines)]
fn run_query(query: QueryCommands, config: Option<&Path>, quiet: bool) -> Result<i32, ExplorerError> {
    match query {
        QueryCommands::Downstream { workspace, file, depth, format, dot_args } => {
            let s = Session::open(&workspace, config, quiet)?;
            let file = s.focal(&file)?;
            let tree = s.ws.downstream(&file, s.depth(depth));
            print_tree(&s, &tree, s.format(format), EdgeDirection::Downstream, &dot_args)?;
            Ok(EXIT_OK)
        }
        QueryCommands::Upstream { workspace, file, depth, no_index, format, dot_args } => {
            let s = Session::open(&workspace, config, quiet)?;
            let file = s.focal(&file)?;
            if !no_index {
                s.ws.build_index();
            }
            let tree = s.ws.upstream(&file, s.depth(depth));
            print_tree(&s, &tree, s.format(format), EdgeDirection::Upstream, &dot_args)?;
            Ok(EXIT_OK)
        }
        QueryCommands::Parameters { workspace, file, format } => {
            let s = Session::open(&workspace, config, quiet)?;
            let file = s.focal(&file)?;
            let params = ParametersQuery::new(&file).run(&s.ws);
            if no_dot(s.format(format))? == OutputFormat::Json {
                println!("{}", to_json(&params)?);
            } else {
                let rows: Vec<Vec<String>> = params
                    .iter()
                    .map(|p| {
                        vec![
                            p.name.clone(),
                            p.param_type.clone(),
                            p.default_value.clone().unwrap_or_default(),
                            if p.required { "yes".to_string() } else { "no".to_string() },
                            (p.declaration_line + 1).to_string(),
                        ]
                    })
                    .collect();
                println!("{}", table::render(&["Name", "Type", "Default", "Required", "Line"], &rows));
            }
            Ok(EXIT_OK)
        }
        QueryCommands::References { workspace, file, format } => {
            let s = Session::open(&workspace, config, quiet)?;
            let file = s.focal(&file)?;
            let refs = ReferencesQuery::new(&file).run(&s.ws);
            if no_dot(s.format(format))? == OutputFormat::Json {
                println!("{}", to_json(&refs)?);
            } else {
                let rows: Vec<Vec<String>> = refs
                    .iter()
                    .map(|r| {
                        let (status, target) = match &r.status {
                            ReferenceStatus::Resolved { path, .. } => ("resolved", s.rel(path)),
                            ReferenceStatus::Missing { path, .. } => ("missing", s.rel(path)),
                            ReferenceStatus::UnknownAlias { alias } => ("unknown alias", format!("@{alias}")),
                            ReferenceStatus::RuntimeExpression => ("runtime expression", String::new()),
                        };
                        vec![(r.line + 1).to_string(), r.raw_ref.clone(), status.to_string(), target]
                    })
                    .collect();
                println!("{}", table::render(&["Line", "Reference", "Status", "Target"], &rows));
            }
            Ok(EXIT_OK)
        }
        QueryCommands::Diagnostics { workspace, file, format, fail_on_error } => {
            let s = Session::open(&workspace, config, quiet)?;
            let file = s.focal(&file)?;
            let diags = DiagnosticsQuery::new(&file).run(&s.ws);
            if no_dot(s.format(format))? == OutputFormat::Json {
                println!("{}", to_json(&diags)?);
            } else {
                for d in &diags {
                    println!("{}:{}: {}: {}", s.rel(&file), d.line + 1, d.severity.as_str(), d.message);
                }
                if !s.quiet {
                    let errors = diags.iter().filter(|d| d.severity == Severity::Error).count();
                    println!("{} diagnostics ({} errors)", diags.len(), errors);
                }
            }
            let has_errors = diags.iter().any(|d| d.severity == Severity::Error);
            Ok(if fail_on_error && has_errors { EXIT_DIAGNOSTICS } else { EXIT_OK })
        }
        QueryCommands::Cycles { workspace, format } => {
            let s = Session::open(&workspace, config, quiet)?;
            let cycles = CycleDetectionQuery::new().run(&s.ws);
            if no_dot(s.format(format))? == OutputFormat::Json {
                println!("{}", to_json(&cycles)?);
            } else {
                for cyc in &cycles {
                    let parts: Vec<String> = cyc.iter().map(|p| s.rel(p)).collect();
                    println!("{} -> {}", parts.join(" -> "), parts.first().cloned().unwrap_or_default());
                }
                if !s.quiet && cycles.is_empty() {
                    println!("No cycles found");
                }
            }
            Ok(EXIT_OK)
        }
        QueryCommands::Path { workspace, from, to, format } => {
            let s = Session::open(&workspace, config, quiet)?;
            let (from, to) = (s.focal(&from)?, s.focal(&to)?);
            let chain = ShortestPathQuery::new(&from, &to).run(&s.ws);
            if no_dot(s.format(format))? == OutputFormat::Json {
                println!("{}", to_json(&chain)?);
            } else if chain.is_empty() {
                if !s.quiet {
                    println!("No path from {} to {}", s.rel(&from), s.rel(&to));
                }
            } else {
                let parts: Vec<String> = chain.iter().map(|p| s.rel(p)).collect();
                println!("{}", parts.join(" -> "));
            }
            Ok(EXIT_OK)
        }
        QueryCommands::Hubs { workspace, metric, top, format } => {
            let s = Session::open(&workspace, config, quiet)?;
            let metric = match metric {
                MetricArg::In => CentralityMetric::In,
                MetricArg::Out => CentralityMetric::Out,
                MetricArg::Total => CentralityMetric::Total,
            };
            let rows = HubsQuery::new(metric, top).run(&s.ws);
            if no_dot(s.format(format))? == OutputFormat::Json {
                #[derive(Serialize)]
                struct HubRow {
                    file: String,
                    #[serde(rename = "in")]
                    indegree: usize,
                    #[serde(rename = "out")]
                    outdegree: usize,
                }
                let out: Vec<HubRow> = rows
                    .iter()
                    .map(|(p, i, o)| HubRow { file: s.rel(p), indegree: *i, outdegree: *o })
                    .collect();
                println!("{}", to_json(&out)?);
            } else {
                let rows: Vec<Vec<String>> =
                    rows.iter().map(|(p, i, o)| vec![s.rel(p), i.to_string(), o.to_string()]).collect();
                println!("{}", table::render(&["File", "In", "Out"], &rows));
            }
            Ok(EXIT_OK)
        }
    }
}

fn run_watch(s: &Session, file: Option<&Path>, depth: Option<usize>) -> Result<i32, ExplorerError> {
    let focal = file.map(|f| s.focal(f)).transpose()?;
    let depth = s.depth(depth);
    let indexing = s.ws.spawn_index_build();
    let watcher = FileSystemWatcher::new(s.ws.root(), s.ws.options().walk.clone())?;
    if !s.quiet {
        println!("Watching {} (Ctrl-C to stop)", s.ws.root().display());
    }
    if indexing.join().unwrap_or(false) && !s.quiet {
        println!("Indexed {} files", s.ws.index().file_count());
    }
    if let Some(f) = &focal {
        print!("{}", render_tree(&s.ws.upstream(f, depth), s.ws.root()));
    }
    loop {
        let batch = watcher.recv_batch(Duration::from_secs(3600), Duration::from_millis(200));
        if batch.is_empty() {
            continue;
        }
        for change in &batch {
            s.ws.apply_change(change);
            if !s.quiet {
                println!("{:?} {}", change.kind, s.rel(&change.path));
            }
        }
        if let Some(f) = &focal {
            print!("{}", render_tree(&s.ws.upstream(f, depth), s.ws.root()));
        }
    }
}
