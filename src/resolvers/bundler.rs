use crate::config::RuntimeConfig;
use crate::error::{HermetoError, Result};
use crate::fetcher::{self, DownloadSpec};
use crate::models::input::{PackageInput, Request};
use crate::models::output::PackageOutput;
use crate::models::sbom::{Component, Property};
use crate::parsers::bundler::{self, BundlerSource};
use crate::purl::PurlBuilder;
use crate::repo_id::RepoId;

use super::{deps_dir, directory_name, ensure_dir, main_package_component};

pub async fn resolve(request: &Request, package: &PackageInput, config: &RuntimeConfig) -> Result<PackageOutput> {
    let package_dir = request.source_dir.join_within_root(&package.path)?;
    let lockfile_path = package_dir.path().join("Gemfile.lock");
    let gems = bundler::parse(&lockfile_path)?;

    let dest_dir = deps_dir(request, "bundler");
    ensure_dir(&dest_dir)?;

    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(config.insecure_skip_tls_verify)
        .build()
        .map_err(|e| HermetoError::fetch_error(format!("failed to build HTTP client: {e}")))?;

    let mut output = PackageOutput::new();
    let main_name = directory_name(&package_dir);
    if let Some(component) = main_package_component(request, &package_dir, "gem", &main_name, None) {
        output.components.push(component);
    }

    for gem in &gems {
        if let Some(component) = resolve_one(&client, &dest_dir, gem, config).await? {
            output.components.push(component);
        }
    }
    Ok(output)
}

async fn resolve_one(
    client: &reqwest::Client,
    dest_dir: &std::path::Path,
    gem: &bundler::BundlerLockedGem,
    config: &RuntimeConfig,
) -> Result<Option<Component>> {
    match &gem.source {
        BundlerSource::Path => Ok(None),
        BundlerSource::Git { remote, revision } => {
            if revision.len() != 40 || !revision.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(HermetoError::unexpected_format(format!(
                    "bundler git gem '{}' is not pinned to a full commit sha: '{revision}'",
                    gem.name
                )));
            }
            let repo_id = RepoId::new(remote, revision)?;
            let dest = dest_dir.join(format!("{}-{revision}.tar.gz", gem.name));
            let work_dir = tempfile::tempdir().map_err(|e| HermetoError::fetch_error(e.to_string()))?;
            crate::git::clone_as_tarball(remote, revision, work_dir.path(), &dest)?;

            let purl = PurlBuilder::new("gem", gem.name.clone())
                .version(gem.version.clone())
                .qualifier("vcs_url", repo_id.as_vcs_url_qualifier())
                .build();
            Ok(Some(Component::new(gem.name.clone(), purl).with_version(gem.version.clone())))
        }
        BundlerSource::Gem { remote } => {
            let (version, platform) = split_platform(&gem.version);
            let url = format!("{}/gems/{}-{}.gem", remote.trim_end_matches('/'), gem.name, gem.version);
            let dest = dest_dir.join(format!("{}-{}.gem", gem.name, gem.version));
            fetcher::get_file(client, &DownloadSpec::new(url.clone(), dest), config).await?;

            let purl = PurlBuilder::new("gem", gem.name.clone()).version(version.to_string()).build();
            let mut component = Component::new(gem.name.clone(), purl)
                .with_version(version.to_string())
                .with_external_reference(url);
            if let Some(platform) = platform {
                component = component.with_property(Property::new("cachi2:bundler:package:binary", "true"));
                component = component.with_property(Property::new("cachi2:bundler:platform", platform.to_string()));
            }
            Ok(Some(component))
        }
    }
}

/// Split a bundler version like `1.13.0-x86_64-linux` into its version and
/// platform parts. Pure-ruby gems have no platform suffix.
fn split_platform(version: &str) -> (&str, Option<&str>) {
    match version.split_once('-') {
        Some((v, platform)) if platform != "ruby" => (v, Some(platform)),
        _ => (version, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_platform_suffix() {
        assert_eq!(split_platform("1.13.0-x86_64-linux"), ("1.13.0", Some("x86_64-linux")));
    }

    #[test]
    fn pure_ruby_version_has_no_platform() {
        assert_eq!(split_platform("1.13.0"), ("1.13.0", None));
    }
}
