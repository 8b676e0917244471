use std::path::PathBuf;

use anyhow::Context;
use tracing::info;

use crate::config::RuntimeConfig;
use crate::models::input::{Flag, PackageInput, PackageType, Request};
use crate::{orchestrator, output_projector};

pub fn run_fetch_deps(
    packages: &str,
    source: PathBuf,
    output: PathBuf,
    flags: Vec<String>,
    config: &RuntimeConfig,
) -> anyhow::Result<()> {
    let source = std::fs::canonicalize(&source)
        .with_context(|| format!("source directory does not exist: {}", source.display()))?;
    std::fs::create_dir_all(&output)
        .with_context(|| format!("cannot create output directory {}", output.display()))?;
    let output = std::fs::canonicalize(&output)
        .with_context(|| format!("failed to resolve output directory {}", output.display()))?;

    let packages = parse_packages(packages).context("invalid packages argument")?;
    let flags = flags
        .iter()
        .map(|raw| Flag::parse(raw))
        .collect::<crate::error::Result<_>>()
        .context("invalid flags argument")?;

    let request = Request::new(&source, &output, packages, flags).context("invalid request")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let output_result = runtime
        .block_on(orchestrator::resolve_packages(&request, config))
        .map_err(|e| anyhow::anyhow!(e.friendly_message()))?;

    output_projector::write_output(&request, &output_result).map_err(|e| anyhow::anyhow!(e.friendly_message()))?;

    info!(
        component_count = output_result.components.len(),
        output = %output.display(),
        "fetch-deps finished"
    );
    println!(
        "Fetched {} component(s) into {}",
        output_result.components.len(),
        output.display()
    );
    Ok(())
}

/// Parse the `packages` CLI argument: a bare package manager name (e.g.
/// `npm`) as shorthand for a single default-path input of that type, or a
/// JSON array of `{"type": ..., "path": ..., ...}` objects.
fn parse_packages(raw: &str) -> anyhow::Result<Vec<PackageInput>> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('[') {
        let r#type = PackageType::parse(trimmed).map_err(|e| anyhow::anyhow!(e.friendly_message()))?;
        return Ok(vec![PackageInput::new(r#type)]);
    }

    let specs: Vec<PackageSpec> = serde_json::from_str(trimmed).context("packages is not valid JSON")?;
    specs
        .into_iter()
        .map(|spec| {
            let r#type = PackageType::parse(&spec.r#type).map_err(|e| anyhow::anyhow!(e.friendly_message()))?;
            let mut input = PackageInput::new(r#type);
            if let Some(path) = spec.path {
                input = input.with_path(path);
            }
            input.allow_binary = spec.allow_binary.unwrap_or(false);
            if let Some(rpm_options) = spec.rpm_options {
                input.rpm_options.ssl_verify = rpm_options.ssl_verify.unwrap_or(false);
                input.rpm_options.repo_ids = rpm_options.repo_ids.unwrap_or_default();
            }
            Ok(input)
        })
        .collect()
}

#[derive(serde::Deserialize)]
struct PackageSpec {
    r#type: String,
    path: Option<PathBuf>,
    allow_binary: Option<bool>,
    rpm_options: Option<RpmOptionsSpec>,
}

#[derive(serde::Deserialize)]
struct RpmOptionsSpec {
    ssl_verify: Option<bool>,
    repo_ids: Option<Vec<String>>,
}
