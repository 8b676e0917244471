mod checksum;
mod cli;
mod commands;
mod config;
mod dirhash;
mod error;
mod fetcher;
mod git;
mod logging;
mod models;
mod orchestrator;
mod output_projector;
mod parsers;
mod purl;
mod repo_id;
mod resolvers;
mod rooted_path;
mod run_cmd;

use clap::Parser;
use tracing::{error, info};

use crate::cli::{Cli, Command};

fn main() {
    let cli = Cli::parse();
    if let Err(err) = logging::init(cli.verbose) {
        eprintln!("error: failed to initialize logging: {err}");
        std::process::exit(1);
    }

    if let Err(err) = run(cli.command) {
        error!(error = %err, "command failed");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run(command: Command) -> anyhow::Result<()> {
    let config = config::load().map_err(|e| anyhow::anyhow!(e.friendly_message()))?;

    info!(command = command_name(&command), "starting command");

    commands::execute(command, &config)
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::FetchDeps { .. } => "fetch-deps",
        Command::GenerateEnv { .. } => "generate-env",
        Command::InjectFiles { .. } => "inject-files",
        Command::MergeSboms { .. } => "merge-sboms",
    }
}
