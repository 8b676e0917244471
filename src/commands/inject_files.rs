use std::path::PathBuf;

use tracing::info;

use crate::config::RuntimeConfig;
use crate::output_projector;

pub fn run_inject_files(output: PathBuf, for_output_dir: PathBuf, config: &RuntimeConfig) -> anyhow::Result<()> {
    let written = output_projector::inject_files(&output, &for_output_dir, config)
        .map_err(|e| anyhow::anyhow!(e.friendly_message()))?;

    for path in &written {
        info!(path = %path.display(), "wrote project file");
    }
    println!("Wrote {} project file(s) into {}", written.len(), for_output_dir.display());
    Ok(())
}
