use crate::checksum::{self, ChecksumInfo};
use crate::config::RuntimeConfig;
use crate::error::{HermetoError, Result};
use crate::fetcher::{self, DownloadSpec};
use crate::models::input::{PackageInput, Request};
use crate::models::output::{EnvironmentVariable, PackageOutput, ProjectFile};
use crate::models::sbom::Component;
use crate::parsers::cargo_lock::{self, CargoPackageSource};
use crate::purl::PurlBuilder;
use crate::repo_id::RepoId;

use super::{deps_dir, ensure_dir, main_package_component};

const CARGO_CONFIG_TEMPLATE: &str = r#"[source.crates-io]
replace-with = "hermeto-vendored-sources"

[source.hermeto-vendored-sources]
directory = "${output_dir}/deps/cargo"
"#;

pub async fn resolve(request: &Request, package: &PackageInput, config: &RuntimeConfig) -> Result<PackageOutput> {
    let package_dir = request.source_dir.join_within_root(&package.path)?;
    let cargo_toml = package_dir.path().join("Cargo.toml");
    let cargo_lock_path = package_dir.path().join("Cargo.lock");

    if !cargo_lock_path.exists() {
        return Err(HermetoError::package_rejected(
            format!("no Cargo.lock found in {}", package_dir.path().display()),
            Some("Run 'cargo generate-lockfile' before prefetching.".to_string()),
        ));
    }

    let main_package = cargo_lock::resolve_main_package(&cargo_toml)?;

    let locked = cargo_lock::parse(&cargo_lock_path)?;
    let dest_dir = deps_dir(request, "cargo");
    ensure_dir(&dest_dir)?;

    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(config.insecure_skip_tls_verify)
        .build()
        .map_err(|e| HermetoError::fetch_error(format!("failed to build HTTP client: {e}")))?;

    let mut output = PackageOutput::new();
    if let Some(component) = main_package_component(
        request,
        &package_dir,
        "cargo",
        &main_package.name,
        main_package.version.as_deref(),
    ) {
        output.components.push(component);
    }

    for locked_package in &locked {
        let Some(component) = resolve_one(&client, &dest_dir, locked_package, config).await? else {
            continue;
        };
        output.components.push(component);
    }

    output = output
        .with_environment_variable(EnvironmentVariable::path("CARGO_HOME", "${output_dir}/deps/cargo/.cargo-home"))
        .with_project_file(ProjectFile::new(
            package_dir.path().join(".cargo").join("config.toml"),
            CARGO_CONFIG_TEMPLATE,
        ));

    Ok(output)
}

async fn resolve_one(
    client: &reqwest::Client,
    dest_dir: &std::path::Path,
    locked_package: &cargo_lock::CargoLockedPackage,
    config: &RuntimeConfig,
) -> Result<Option<Component>> {
    match &locked_package.source {
        CargoPackageSource::Local => Ok(None),
        CargoPackageSource::CratesIo => {
            let url = format!(
                "https://static.crates.io/crates/{0}/{0}-{1}.crate",
                locked_package.name, locked_package.version
            );
            let dest = dest_dir.join(format!("{}-{}.crate", locked_package.name, locked_package.version));
            fetcher::get_file(client, &DownloadSpec::new(url.clone(), dest.clone()), config).await?;

            let Some(checksum) = &locked_package.checksum else {
                return Err(HermetoError::package_rejected(
                    format!("Cargo.lock entry for '{}' has no checksum", locked_package.name),
                    None,
                ));
            };
            checksum::must_match_any(&dest, &[ChecksumInfo::new("sha256", checksum.clone())])?;

            let purl = PurlBuilder::new("cargo", locked_package.name.clone())
                .version(locked_package.version.clone())
                .build();
            Ok(Some(
                Component::new(locked_package.name.clone(), purl)
                    .with_version(locked_package.version.clone())
                    .with_external_reference(url),
            ))
        }
        CargoPackageSource::Git { url, commit } => {
            let repo_id = RepoId::new(url, commit)?;
            let dest = dest_dir.join(format!("{}-{commit}.tar.gz", locked_package.name));
            let work_dir = tempfile::tempdir().map_err(|e| HermetoError::fetch_error(e.to_string()))?;
            crate::git::clone_as_tarball(url, commit, work_dir.path(), &dest)?;

            let purl = PurlBuilder::new("cargo", locked_package.name.clone())
                .version(locked_package.version.clone())
                .qualifier("vcs_url", repo_id.as_vcs_url_qualifier())
                .build();
            Ok(Some(
                Component::new(locked_package.name.clone(), purl).with_version(locked_package.version.clone()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_template_references_output_dir_placeholder_only() {
        assert!(CARGO_CONFIG_TEMPLATE.contains("${output_dir}/deps/cargo"));
    }
}
