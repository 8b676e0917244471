use std::path::PathBuf;

use anyhow::Context;

use crate::cli::{EnvFormat, OutputFormat};
use crate::output_projector;

pub fn run_generate_env(
    output: PathBuf,
    for_output_dir: Option<PathBuf>,
    format: EnvFormat,
    output_format: OutputFormat,
) -> anyhow::Result<()> {
    let rendered = output_projector::generate_env(&output, format, output_format)
        .map_err(|e| anyhow::anyhow!(e.friendly_message()))?;

    match for_output_dir {
        Some(path) => {
            std::fs::write(&path, rendered).with_context(|| format!("cannot write {}", path.display()))?;
        }
        None => print!("{rendered}"),
    }
    Ok(())
}
