use pipeline_relations_explorer::cli::{self, LOG_ENV};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let default = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() {
    let cli = cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    let code = pipeline_relations_explorer::app::run_cli(cli);
    if code != 0 {
        std::process::exit(code);
    }
}
