use std::path::PathBuf;

use anyhow::Context;

use crate::output_projector;

pub fn run_merge_sboms(sboms: Vec<PathBuf>, output: Option<PathBuf>) -> anyhow::Result<()> {
    let merged = output_projector::merge_sboms(&sboms).map_err(|e| anyhow::anyhow!(e.friendly_message()))?;
    let rendered = serde_json::to_string_pretty(&merged).context("failed to serialize merged SBOM")?;

    match output {
        Some(path) => {
            std::fs::write(&path, rendered + "\n").with_context(|| format!("cannot write {}", path.display()))?;
        }
        None => println!("{rendered}"),
    }
    Ok(())
}
