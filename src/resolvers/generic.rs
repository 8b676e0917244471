use crate::checksum::{self, ChecksumInfo};
use crate::config::RuntimeConfig;
use crate::error::{HermetoError, Result};
use crate::fetcher::{self, DownloadSpec};
use crate::models::input::{PackageInput, Request};
use crate::models::output::PackageOutput;
use crate::models::sbom::Component;
use crate::parsers::generic;
use crate::purl::PurlBuilder;

use super::{deps_dir, ensure_dir};

pub async fn resolve(request: &Request, package: &PackageInput, config: &RuntimeConfig) -> Result<PackageOutput> {
    let package_dir = request.source_dir.join_within_root(&package.path)?;
    let lockfile_path = package_dir.path().join("cachi2_generic.yaml");
    let lockfile = generic::parse(&lockfile_path)?;

    let dest_dir = deps_dir(request, "generic");
    ensure_dir(&dest_dir)?;

    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(config.insecure_skip_tls_verify)
        .build()
        .map_err(|e| HermetoError::fetch_error(format!("failed to build HTTP client: {e}")))?;

    let mut output = PackageOutput::new();
    for artifact in &lockfile.artifacts {
        output.components.push(resolve_one(&client, &dest_dir, artifact, config).await?);
    }
    Ok(output)
}

async fn resolve_one(
    client: &reqwest::Client,
    dest_dir: &std::path::Path,
    artifact: &generic::GenericLockedArtifact,
    config: &RuntimeConfig,
) -> Result<Component> {
    let filename = artifact
        .download_url
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            HermetoError::unexpected_format(format!("cannot derive filename from url '{}'", artifact.download_url))
        })?;
    let dest = dest_dir.join(filename);
    fetcher::get_file(client, &DownloadSpec::new(artifact.download_url.clone(), dest.clone()), config).await?;

    let checksum_info = ChecksumInfo::parse_specifier(&artifact.checksum)?;
    checksum::must_match_any(&dest, &[checksum_info])?;

    let name = artifact.target.clone().unwrap_or_else(|| filename.to_string());
    let mut purl = PurlBuilder::new("generic", name.clone()).qualifier("download_url", artifact.download_url.clone());
    if let Some(target) = &artifact.target {
        purl = purl.subpath(target.clone());
    }

    Ok(Component::new(name, purl.build()).with_external_reference(artifact.download_url.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_one_rejects_url_with_no_filename() {
        let client = reqwest::Client::new();
        let config = RuntimeConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let artifact = generic::GenericLockedArtifact {
            download_url: "https://example.com/".to_string(),
            target: None,
            checksum: "sha256:abc".to_string(),
        };
        let err = resolve_one(&client, dir.path(), &artifact, &config).await.unwrap_err();
        assert!(matches!(err, HermetoError::UnexpectedFormat { .. }));
    }
}
