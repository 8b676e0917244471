mod fetch_deps;
mod generate_env;
mod inject_files;
mod merge_sboms;

use crate::cli::Command;
use crate::config::RuntimeConfig;

pub fn execute(command: Command, config: &RuntimeConfig) -> anyhow::Result<()> {
    match command {
        Command::FetchDeps {
            packages,
            source,
            output,
            flags,
        } => fetch_deps::run_fetch_deps(&packages, source, output, flags, config),
        Command::GenerateEnv {
            output,
            for_output_dir,
            format,
            output_format,
        } => generate_env::run_generate_env(output, for_output_dir, format, output_format),
        Command::InjectFiles { output, for_output_dir } => {
            inject_files::run_inject_files(output, for_output_dir, config)
        }
        Command::MergeSboms { sboms, output } => merge_sboms::run_merge_sboms(sboms, output),
    }
}
