//! Command-line interface for codeanalyzer.

use clap::Parser;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::{AnalysisOptions, OutputFormat, ProjectConfig};
use crate::error::AnalyzerError;
use crate::pipeline::ProjectAnalyzer;
use crate::report;

/// Exit codes.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_ERROR: i32 = 2;

/// Static symbol-table extraction for Python projects.
///
/// Walks a Python project and emits one structured record per module:
/// imports, comments, classes, callables, variables and call sites. Level 2
/// adds a call graph from a CodeQL database.
#[derive(Parser, Debug)]
#[command(name = "codeanalyzer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Project root to analyze
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output directory (default: print JSON to stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Analysis level: 1 = symbol table, 2 = symbol table and call graph
    #[arg(short, long, default_value_t = 1)]
    pub analysis_level: u8,

    /// Build or reuse the CodeQL database
    #[arg(long)]
    pub codeql: bool,

    /// Ignore every cache and rebuild
    #[arg(long)]
    pub eager: bool,

    /// Analyze test files and test directories too
    #[arg(long)]
    pub include_tests: bool,

    /// Analyze only this file (relative to the input root)
    #[arg(long)]
    pub file_name: Option<PathBuf>,

    /// Directory holding the cache root (default: the input root)
    #[arg(short, long)]
    pub cache_dir: Option<PathBuf>,

    /// Remove the cache root when the run ends
    #[arg(long)]
    pub clear_cache: bool,

    /// Increase log verbosity (-v warn, -vv info, -vvv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Worker threads (default: one per core, or the project config)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Resolve types against an existing virtualenv
    #[arg(long)]
    pub virtualenv: Option<PathBuf>,

    /// Create a virtualenv for the project under the cache root
    #[arg(long)]
    pub provision_env: bool,

    /// JSON hints file with precomputed types and qualified names
    #[arg(long)]
    pub hints: Option<PathBuf>,

    /// Show a progress bar while extracting
    #[arg(long)]
    pub progress: bool,
}

/// Log filter for a `-v` count.
pub fn log_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        _ => "debug",
    }
}

/// Install the stderr subscriber. `RUST_LOG` wins over `-v`.
pub fn init_logging(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level(verbosity)));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Build run options: command line over project config over defaults.
pub fn build_options(cli: &Cli) -> Result<AnalysisOptions, AnalyzerError> {
    let mut options = AnalysisOptions::new(&cli.input);
    options.output = cli.output.clone();
    options.format = cli.format;
    options.analysis_level = cli.analysis_level;
    options.using_codeql = cli.codeql;
    options.rebuild_analysis = cli.eager;
    options.file_name = cli.file_name.clone();
    options.cache_dir = cli.cache_dir.clone();
    options.clear_cache = cli.clear_cache;
    options.verbosity = cli.verbose;
    options.jobs = cli.jobs.unwrap_or(0);
    options.virtualenv = cli.virtualenv.clone();
    options.provision_env = cli.provision_env;
    options.hints_file = cli.hints.clone();
    options.progress = cli.progress;

    if cli.input.is_dir() {
        let discovered = ProjectConfig::discover(&cli.input)
            .map_err(|e| AnalyzerError::InputValidation(format!("{:#}", e)))?;
        if let Some((path, config)) = discovered {
            debug!(config = %path.display(), "loaded project config");
            options.merge_project_config(&config);
        }
    }

    if cli.include_tests {
        options.skip_tests = false;
    }
    if let Some(jobs) = cli.jobs {
        options.jobs = jobs;
    }
    Ok(options)
}

/// Run the analysis command.
pub fn run(cli: &Cli) -> Result<(), AnalyzerError> {
    let options = build_options(cli)?;
    let analyzer = ProjectAnalyzer::new(options)?;
    let report = analyzer.run()?;

    let options = analyzer.options();
    let written = report::write_application(
        &report.application,
        options.format,
        options.output.as_deref(),
    )
    .map_err(AnalyzerError::output)?;

    report::write_summary(&report, written.as_deref());
    Ok(())
}

/// Run and map the outcome to an exit code.
pub fn execute(cli: &Cli) -> i32 {
    match run(cli) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            report::write_error(&e.to_string());
            EXIT_ERROR
        }
    }
}
