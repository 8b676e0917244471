use crate::checksum::{self, ChecksumInfo};
use crate::config::RuntimeConfig;
use crate::error::{HermetoError, Result};
use crate::fetcher::{self, DownloadSpec};
use crate::models::input::{PackageInput, Request};
use crate::models::output::PackageOutput;
use crate::models::sbom::{Component, ComponentType, Property};
use crate::parsers::rpm;
use crate::purl::PurlBuilder;

use super::{deps_dir, ensure_dir};

pub async fn resolve(request: &Request, package: &PackageInput, config: &RuntimeConfig) -> Result<PackageOutput> {
    let package_dir = request.source_dir.join_within_root(&package.path)?;
    let lockfile_path = package_dir.path().join("rpms.lock.yaml");
    let lockfile = rpm::parse(&lockfile_path)?;

    let dest_dir = deps_dir(request, "rpm");
    ensure_dir(&dest_dir)?;

    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(config.insecure_skip_tls_verify || !package.rpm_options.ssl_verify)
        .build()
        .map_err(|e| HermetoError::fetch_error(format!("failed to build HTTP client: {e}")))?;

    let mut output = PackageOutput::new();
    for arch in &lockfile.arches {
        let arch_dir = dest_dir.join(&arch.arch);
        ensure_dir(&arch_dir)?;

        for locked in arch.packages.iter() {
            let repo_dir = arch_dir.join(repoid_dir(&locked.repoid));
            ensure_dir(&repo_dir)?;
            output.components.push(
                resolve_one(&client, &repo_dir, locked, &arch.arch, config).await?,
            );
        }
        for locked in arch.source.iter() {
            let repo_dir = arch_dir.join(repoid_dir(&locked.repoid));
            ensure_dir(&repo_dir)?;
            let component = resolve_one(&client, &repo_dir, locked, &arch.arch, config).await?;
            output.components.push(component.with_type(ComponentType::File));
        }
    }

    Ok(output)
}

/// Lockfile entries with no `repoid` share a single synthetic directory so
/// `createrepo_c` still has a well-formed repo to index at inject-files time.
fn repoid_dir(repoid: &str) -> &str {
    if repoid.is_empty() { "unknown-repo" } else { repoid }
}

async fn resolve_one(
    client: &reqwest::Client,
    arch_dir: &std::path::Path,
    locked: &rpm::RpmLockedPackage,
    arch: &str,
    config: &RuntimeConfig,
) -> Result<Component> {
    if !locked.repoid.is_empty() && !locked.repoid.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(HermetoError::unexpected_format(format!(
            "repoid '{}' contains unexpected characters",
            locked.repoid
        )));
    }

    let filename = locked
        .url
        .rsplit('/')
        .next()
        .ok_or_else(|| HermetoError::unexpected_format(format!("cannot derive filename from url '{}'", locked.url)))?;
    let dest = arch_dir.join(filename);
    fetcher::get_file(client, &DownloadSpec::new(locked.url.clone(), dest.clone()), config).await?;

    let checksum_info = ChecksumInfo::parse_specifier(&locked.checksum)?;
    checksum::must_match_any(&dest, &[checksum_info])?;

    let name = locked.name.clone().unwrap_or_else(|| derive_name_from_filename(filename));
    let purl = PurlBuilder::new("rpm", name.clone())
        .qualifier("arch", arch.to_string())
        .qualifier("repository_id", locked.repoid.clone())
        .build();

    Ok(Component::new(name, purl)
        .with_external_reference(locked.url.clone())
        .with_property(Property::new("cachi2:rpm:repoid", locked.repoid.clone())))
}

fn derive_name_from_filename(filename: &str) -> String {
    filename.trim_end_matches(".rpm").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_name_from_filename_strips_rpm_extension() {
        assert_eq!(derive_name_from_filename("bar-1.0-1.el9.x86_64.rpm"), "bar-1.0-1.el9.x86_64");
    }

    #[test]
    fn repoid_dir_falls_back_for_missing_repoid() {
        assert_eq!(repoid_dir(""), "unknown-repo");
        assert_eq!(repoid_dir("ubi9-baseos"), "ubi9-baseos");
    }
}
