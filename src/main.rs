//! codeanalyzer CLI entry point.

use clap::Parser;
use codeanalyzer::cli::{self, Cli};

fn main() {
    let cli = Cli::parse();
    cli::init_logging(cli.verbose);
    std::process::exit(cli::execute(&cli));
}
