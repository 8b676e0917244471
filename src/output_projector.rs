//! Persisting a [`RequestOutput`] to disk after `fetch-deps`, and the
//! downstream commands (`generate-env`, `inject-files`, `merge-sboms`) that
//! read it back. Two files live at the root of the output directory:
//! `bom.json` (the CycloneDX SBOM) and `.build-config.json` (environment
//! variables and project files, plus the source directory they were
//! resolved against, so `inject-files` can re-root them onto a fresh
//! checkout).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use tracing::debug;

use crate::cli::{EnvFormat, OutputFormat};
use crate::config::RuntimeConfig;
use crate::error::{HermetoError, Result};
use crate::models::input::Request;
use crate::models::output::{EnvironmentVariableKind, ProjectFile, RequestOutput};
use crate::models::sbom::Sbom;
use crate::run_cmd;

const BOM_FILENAME: &str = "bom.json";
const BUILD_CONFIG_FILENAME: &str = ".build-config.json";

#[derive(Clone, Debug, Serialize, Deserialize)]
struct EnvVarDto {
    name: String,
    value: String,
    kind: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ProjectFileDto {
    path: PathBuf,
    template: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct BuildConfig {
    source_dir: PathBuf,
    environment_variables: Vec<EnvVarDto>,
    project_files: Vec<ProjectFileDto>,
}

/// Write `bom.json` and `.build-config.json` into `request.output_dir`.
pub fn write_output(request: &Request, output: &RequestOutput) -> Result<()> {
    let output_dir = request.output_dir.path();
    std::fs::create_dir_all(&output_dir)
        .map_err(|e| HermetoError::fetch_error(format!("cannot create {}: {e}", output_dir.display())))?;

    let sbom = Sbom::from_components(output.components.clone());
    write_json(&output_dir.join(BOM_FILENAME), &sbom)?;

    let config = BuildConfig {
        source_dir: request.source_dir.path(),
        environment_variables: output
            .environment_variables
            .iter()
            .map(|(name, (value, kind))| EnvVarDto {
                name: name.clone(),
                value: value.clone(),
                kind: kind_to_str(*kind).to_string(),
            })
            .collect(),
        project_files: output
            .project_files
            .iter()
            .map(|(path, template)| ProjectFileDto {
                path: path.clone(),
                template: template.clone(),
            })
            .collect(),
    };
    write_json(&output_dir.join(BUILD_CONFIG_FILENAME), &config)
}

fn kind_to_str(kind: EnvironmentVariableKind) -> &'static str {
    match kind {
        EnvironmentVariableKind::Literal => "literal",
        EnvironmentVariableKind::Path => "path",
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| HermetoError::unexpected_format(format!("failed to serialize {}: {e}", path.display())))?;
    std::fs::write(path, rendered + "\n")
        .map_err(|e| HermetoError::fetch_error(format!("cannot write {}: {e}", path.display())))
}

fn read_build_config(output_dir: &Path) -> Result<BuildConfig> {
    let path = output_dir.join(BUILD_CONFIG_FILENAME);
    let raw = std::fs::read_to_string(&path).map_err(|e| {
        HermetoError::invalid_input(format!(
            "cannot read {}: {e} (did you run fetch-deps against this output directory?)",
            path.display()
        ))
    })?;
    serde_json::from_str(&raw)
        .map_err(|e| HermetoError::unexpected_format(format!("{} is not a valid build config: {e}", path.display())))
}

/// Render the environment variables recorded for `output_dir` as either a
/// shell-sourceable script or a JSON object. `format` chooses the overall
/// shape; when rendering as a shell script, `output_format` chooses whether
/// each line is prefixed with `export`.
pub fn generate_env(output_dir: &Path, format: EnvFormat, output_format: OutputFormat) -> Result<String> {
    let config = read_build_config(output_dir)?;

    match format {
        EnvFormat::Json => {
            let pairs: Vec<(&str, &str)> = config
                .environment_variables
                .iter()
                .map(|v| (v.name.as_str(), v.value.as_str()))
                .collect();
            serde_json::to_string_pretty(&pairs)
                .map_err(|e| HermetoError::unexpected_format(format!("failed to render environment as json: {e}")))
        }
        EnvFormat::Env => {
            let prefix = match output_format {
                OutputFormat::Export => "export ",
                OutputFormat::Json => "",
            };
            let mut rendered = String::new();
            for var in &config.environment_variables {
                let value = render_value(&var.value, &var.kind, output_dir);
                rendered.push_str(&format!("{prefix}{}={}\n", var.name, shell_quote(&value)));
            }
            Ok(rendered)
        }
    }
}

fn render_value(value: &str, kind: &str, output_dir: &Path) -> String {
    if kind == "path" {
        value.replace("${output_dir}", &output_dir.to_string_lossy())
    } else {
        value.to_string()
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Write every recorded project file into `for_output_dir`, re-rooting each
/// one from the source directory it was originally resolved against, then
/// regenerate `createrepo_c` metadata for any RPM repos found under
/// `output_dir/deps/rpm`. Returns the list of project file paths written,
/// for the caller to log.
pub fn inject_files(output_dir: &Path, for_output_dir: &Path, config: &RuntimeConfig) -> Result<Vec<PathBuf>> {
    let build_config = read_build_config(output_dir)?;
    let mut written = Vec::with_capacity(build_config.project_files.len());

    for file in &build_config.project_files {
        let relative = file.path.strip_prefix(&build_config.source_dir).unwrap_or(&file.path);
        let dest = for_output_dir.join(relative);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HermetoError::fetch_error(format!("cannot create {}: {e}", parent.display())))?;
        }
        let project_file = ProjectFile::new(dest.clone(), file.template.clone());
        let rendered = project_file.render(output_dir);
        std::fs::write(&dest, rendered)
            .map_err(|e| HermetoError::fetch_error(format!("cannot write {}: {e}", dest.display())))?;
        written.push(dest);
    }

    generate_rpm_repos(output_dir, config)?;

    Ok(written)
}

/// Run `createrepo_c` over every `deps/rpm/<arch>/<repoid>` directory so the
/// downloaded packages can be consumed as a local DNF repo. Missing
/// `createrepo_c` or an empty/absent rpm tree is not an error: RPM packages
/// may simply not have been requested.
fn generate_rpm_repos(output_dir: &Path, config: &RuntimeConfig) -> Result<()> {
    let rpm_root = output_dir.join("deps").join("rpm");
    if !rpm_root.is_dir() {
        return Ok(());
    }

    let timeout = std::time::Duration::from_secs(config.subprocess_timeout_secs);
    for arch_entry in read_subdirs(&rpm_root)? {
        for repo_dir in read_subdirs(&arch_entry)? {
            debug!(repo = %repo_dir.display(), "regenerating createrepo_c metadata");
            run_cmd::run_and_check(
                "createrepo_c",
                &[repo_dir.to_str().ok_or_else(|| {
                    HermetoError::unexpected_format(format!("non-utf8 repo path {}", repo_dir.display()))
                })?],
                output_dir,
                timeout,
            )?;
        }
    }
    Ok(())
}

fn read_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| HermetoError::fetch_error(format!("cannot read {}: {e}", dir.display())))?;
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| HermetoError::fetch_error(format!("cannot read {}: {e}", dir.display())))?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

/// Merge two or more previously-written SBOMs (`merge-sboms`), deduplicating
/// components by purl the same way a single request's output is finalized.
pub fn merge_sboms(paths: &[PathBuf]) -> Result<Sbom> {
    let mut components = Vec::new();
    for path in paths {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| HermetoError::invalid_input(format!("cannot read {}: {e}", path.display())))?;
        let sbom: Sbom = serde_json::from_str(&raw)
            .map_err(|e| HermetoError::unexpected_format(format!("{} is not a valid SBOM: {e}", path.display())))?;
        components.extend(sbom.components);
    }
    Ok(Sbom::from_components(components))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::models::input::{PackageInput, PackageType};
    use crate::models::output::{EnvironmentVariable, PackageOutput};
    use crate::models::sbom::Component;

    fn sample_request(source: &Path, out: &Path) -> Request {
        std::fs::create_dir_all(source.join("pkg")).unwrap();
        let pkg = PackageInput::new(PackageType::Generic).with_path("pkg");
        Request::new(source, out, vec![pkg], BTreeSet::new()).unwrap()
    }

    #[test]
    fn write_output_then_generate_env_roundtrips_path_variables() {
        let source = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let request = sample_request(source.path(), out.path());

        let mut output = RequestOutput::new();
        output
            .merge(
                PackageOutput::new()
                    .with_component(Component::new("bar", "pkg:generic/bar"))
                    .with_environment_variable(EnvironmentVariable::path("GOMODCACHE", "${output_dir}/deps/gomod")),
            )
            .unwrap();
        output.finalize_components();

        write_output(&request, &output).unwrap();
        assert!(out.path().join(BOM_FILENAME).exists());
        assert!(out.path().join(BUILD_CONFIG_FILENAME).exists());

        let rendered = generate_env(out.path(), EnvFormat::Env, OutputFormat::Export).unwrap();
        assert!(rendered.contains("export GOMODCACHE="));
        assert!(rendered.contains("/deps/gomod"));
    }

    #[test]
    fn inject_files_rewrites_relative_to_for_output_dir() {
        let source = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let dest_checkout = tempfile::tempdir().unwrap();
        let request = sample_request(source.path(), out.path());

        let mut output = RequestOutput::new();
        output
            .merge(PackageOutput::new().with_project_file(ProjectFile::new(
                request.source_dir.path().join("pkg").join(".cargo").join("config.toml"),
                "directory = \"${output_dir}/deps/cargo\"",
            )))
            .unwrap();
        write_output(&request, &output).unwrap();

        let written = inject_files(out.path(), dest_checkout.path(), &RuntimeConfig::default()).unwrap();
        assert_eq!(written.len(), 1);
        let contents = std::fs::read_to_string(&written[0]).unwrap();
        assert!(contents.contains(&out.path().display().to_string()));
    }

    #[test]
    fn merge_sboms_deduplicates_shared_components() {
        let dir = tempfile::tempdir().unwrap();
        let a = Sbom::from_components(vec![Component::new("bar", "pkg:npm/bar@1.0.0")]);
        let b = Sbom::from_components(vec![Component::new("bar", "pkg:npm/bar@1.0.0")]);
        let path_a = dir.path().join("a.json");
        let path_b = dir.path().join("b.json");
        std::fs::write(&path_a, serde_json::to_string(&a).unwrap()).unwrap();
        std::fs::write(&path_b, serde_json::to_string(&b).unwrap()).unwrap();

        let merged = merge_sboms(&[path_a, path_b]).unwrap();
        assert_eq!(merged.components.len(), 1);
    }
}
