use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Environment variable holding a `tracing` filter directive.
pub const LOG_ENV: &str = "PIPELINE_EXPLORER_LOG";

/// Traversal depth used when neither the flag nor the config sets one.
pub const DEFAULT_DEPTH: usize = 3;

#[derive(Debug, Parser)]
#[command(
    name = "pipeline-relations-explorer",
    version,
    about = "Explore template relationships in Azure Pipelines YAML repositories",
    long_about = "Navigate `- template:` references between pipeline YAML files, including cross-repository references through `resources.repositories` aliases. File discovery respects .gitignore and .ignore with parent traversal; global git excludes are disabled for determinism. Use --no-ignore to bypass ignore rules."
)]
pub struct Cli {
    /// Suppress informational output (errors are still printed)
    #[arg(short, long, global = true, default_value_t = false)]
    pub quiet: bool,
    /// Raise log verbosity: -v info, -vv debug (overridden by PIPELINE_EXPLORER_LOG)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
    /// Path to a TOML configuration file (default: pipeline-explorer.toml under --path)
    #[arg(long, global = true, env = "PIPELINE_EXPLORER_CONFIG")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    /// Graphviz DOT (tree queries only)
    Dot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OnOffArg {
    On,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DotThemeArg {
    Light,
    Dark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DotRankDirArg {
    #[value(name = "LR")]
    LR,
    #[value(name = "TB")]
    TB,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DotSplinesArg {
    Curved,
    Ortho,
    Polyline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MetricArg {
    In,
    Out,
    Total,
}

#[derive(Debug, Clone, Args)]
pub struct WorkspaceArgs {
    /// Workspace root to scan for pipeline YAML
    #[arg(short, long, default_value = ".")]
    pub path: PathBuf,
    /// Include files even if matched by .gitignore/.ignore
    #[arg(long, default_value_t = false)]
    pub no_ignore: bool,
}

/// DOT rendering flags; unset flags fall back to the `[dot]` config section.
#[derive(Debug, Clone, Default, Args)]
pub struct DotArgs {
    /// DOT: group nodes by repository
    #[arg(long, value_enum)]
    pub dot_clusters: Option<OnOffArg>,
    /// DOT: include legend
    #[arg(long, value_enum)]
    pub dot_legend: Option<OnOffArg>,
    /// DOT: color theme
    #[arg(long, value_enum)]
    pub dot_theme: Option<DotThemeArg>,
    /// DOT: rank direction
    #[arg(long, value_enum)]
    pub dot_rankdir: Option<DotRankDirArg>,
    /// DOT: edge splines style
    #[arg(long, value_enum)]
    pub dot_splines: Option<DotSplinesArg>,
    /// DOT: rounded node corners
    #[arg(long, value_enum)]
    pub dot_rounded: Option<OnOffArg>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Build the whole-workspace graph and optionally export it
    Graph {
        #[command(flatten)]
        workspace: WorkspaceArgs,
        /// Write the graph as JSON to this file
        #[arg(long)]
        json: Option<PathBuf>,
        /// Write the graph as Graphviz DOT to this file
        #[arg(long)]
        dot: Option<PathBuf>,
        #[command(flatten)]
        dot_args: DotArgs,
    },
    /// Run a query against the workspace
    Query {
        #[command(subcommand)]
        query: QueryCommands,
    },
    /// Keep an index warm and report changes as files are edited
    Watch {
        #[command(flatten)]
        workspace: WorkspaceArgs,
        /// Re-print this file's upstream tree after every change
        #[arg(long)]
        file: Option<PathBuf>,
        /// Depth of the re-printed tree (1-10)
        #[arg(long)]
        depth: Option<usize>,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Debug, Subcommand)]
pub enum QueryCommands {
    /// Templates referenced by a file, transitively
    Downstream {
        #[command(flatten)]
        workspace: WorkspaceArgs,
        /// Focal file (absolute, or relative to the current directory or --path)
        #[arg(long)]
        file: PathBuf,
        /// Traversal depth in edge levels (1-10)
        #[arg(long)]
        depth: Option<usize>,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
        #[command(flatten)]
        dot_args: DotArgs,
    },
    /// Files that reference a file, transitively
    Upstream {
        #[command(flatten)]
        workspace: WorkspaceArgs,
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        depth: Option<usize>,
        /// Scan the corpus instead of building the reverse index
        #[arg(long, default_value_t = false)]
        no_index: bool,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
        #[command(flatten)]
        dot_args: DotArgs,
    },
    /// Parameters declared by a template
    Parameters {
        #[command(flatten)]
        workspace: WorkspaceArgs,
        #[arg(long)]
        file: PathBuf,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Every template reference in a file with its resolution
    References {
        #[command(flatten)]
        workspace: WorkspaceArgs,
        #[arg(long)]
        file: PathBuf,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Check call sites and declarations in a file
    Diagnostics {
        #[command(flatten)]
        workspace: WorkspaceArgs,
        #[arg(long)]
        file: PathBuf,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
        /// Exit with code 3 when any error-severity diagnostic is reported
        #[arg(long, default_value_t = false)]
        fail_on_error: bool,
    },
    /// Detect reference cycles across the workspace
    Cycles {
        #[command(flatten)]
        workspace: WorkspaceArgs,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Shortest reference chain between two files
    Path {
        #[command(flatten)]
        workspace: WorkspaceArgs,
        #[arg(long)]
        from: PathBuf,
        #[arg(long)]
        to: PathBuf,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Files with the most distinct callers and/or targets
    Hubs {
        #[command(flatten)]
        workspace: WorkspaceArgs,
        #[arg(long, value_enum, default_value = "total")]
        metric: MetricArg,
        #[arg(long, default_value_t = 10)]
        top: usize,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
}

#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}
