use base64::Engine;

use crate::checksum::{self, ChecksumInfo};
use crate::config::RuntimeConfig;
use crate::error::{HermetoError, Result};
use crate::fetcher::{self, DownloadSpec};
use crate::models::input::{PackageInput, Request};
use crate::models::output::{PackageOutput, ProjectFile};
use crate::models::sbom::{Component, Property};
use crate::parsers::npm::{self, LockedNpmPackage};
use crate::purl::PurlBuilder;
use crate::repo_id::RepoId;

use super::{deps_dir, ensure_dir, directory_name, main_package_component};

pub async fn resolve(request: &Request, package: &PackageInput, config: &RuntimeConfig) -> Result<PackageOutput> {
    let package_dir = request.source_dir.join_within_root(&package.path)?;
    let lockfile_path = package_dir.path().join("package-lock.json");
    if !lockfile_path.exists() {
        return Err(HermetoError::package_rejected(
            format!("no package-lock.json found in {}", package_dir.path().display()),
            Some("Run 'npm install' to generate a lockfile before prefetching.".to_string()),
        ));
    }

    let locked = npm::parse(&lockfile_path)?;
    let lockfile_contents = std::fs::read_to_string(&lockfile_path)
        .map_err(|e| HermetoError::fetch_error(format!("cannot read {}: {e}", lockfile_path.display())))?;
    let dest_dir = deps_dir(request, "npm");
    ensure_dir(&dest_dir)?;

    let mut output = PackageOutput::new();
    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(config.insecure_skip_tls_verify)
        .build()
        .map_err(|e| HermetoError::fetch_error(format!("failed to build HTTP client: {e}")))?;

    let (main_name, main_version) = npm::read_main_package(&lockfile_path)?;
    let main_name = main_name.unwrap_or_else(|| directory_name(&package_dir));
    if let Some(component) =
        main_package_component(request, &package_dir, "npm", &main_name, main_version.as_deref())
    {
        output.components.push(component);
    }

    for entry in &locked {
        if entry.is_link_or_root {
            continue;
        }
        let component = resolve_one(&client, &dest_dir, entry, config, request).await?;
        output.components.push(component);
    }

    // npm lockfiles are written back verbatim so `inject-files` has
    // something to template at consume time, per spec.md §4.5 point 7.
    output = output.with_project_file(ProjectFile::new(lockfile_path, lockfile_contents));

    Ok(output)
}

async fn resolve_one(
    client: &reqwest::Client,
    dest_dir: &std::path::Path,
    entry: &LockedNpmPackage,
    config: &RuntimeConfig,
    request: &Request,
) -> Result<Component> {
    let purl;
    let mut component;

    match entry.resolved.as_deref().and_then(npm::git_source_hint) {
        Some((url, rev)) => {
            let commit = if looks_like_full_commit(&rev) {
                rev
            } else {
                return Err(HermetoError::unexpected_format(format!(
                    "npm git dependency '{}' is not pinned to a full commit sha: '{rev}'",
                    entry.name
                )));
            };
            let repo_id = RepoId::new(&url, &commit)?;
            let dest = dest_dir.join(format!("{}-{}.tar.gz", sanitize(&entry.name), commit));
            let work_dir = tempfile::tempdir().map_err(|e| HermetoError::fetch_error(e.to_string()))?;
            crate::git::clone_as_tarball(&url, &commit, work_dir.path(), &dest)?;

            purl = PurlBuilder::new("npm", entry.name.clone())
                .version(entry.version.clone())
                .qualifier("vcs_url", repo_id.as_vcs_url_qualifier())
                .build();
            component = Component::new(entry.name.clone(), purl).with_version(entry.version.clone());
        }
        None => {
            let Some(resolved) = &entry.resolved else {
                return Err(HermetoError::package_rejected(
                    format!("package '{}' in package-lock.json has no 'resolved' url", entry.name),
                    None,
                ));
            };
            let dest = dest_dir.join(format!("{}-{}.tgz", sanitize(&entry.name), entry.version));
            fetcher::get_file(client, &DownloadSpec::new(resolved.clone(), dest.clone()), config).await?;

            if let Some(integrity) = &entry.integrity {
                let checksums = parse_integrity(integrity)?;
                checksum::must_match_any(&dest, &checksums)?;
            }

            purl = PurlBuilder::new("npm", entry.name.clone())
                .version(entry.version.clone())
                .build();
            component = Component::new(entry.name.clone(), purl)
                .with_version(entry.version.clone())
                .with_external_reference(resolved.clone());
        }
    }

    if entry.bundled {
        component = component.with_property(Property::new("cdx:npm:package:bundled", "true"));
    }
    if entry.dev {
        component = component.with_property(Property::new("cdx:npm:package:development", "true"));
    }

    let _ = request;
    Ok(component)
}

fn looks_like_full_commit(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn sanitize(name: &str) -> String {
    name.replace('/', "-")
}

/// Parse an npm `integrity` field (`<algo>-<base64 digest>`, possibly
/// several space-separated entries) into `ChecksumInfo`s our hex-based
/// checksum module can verify against.
fn parse_integrity(integrity: &str) -> Result<Vec<ChecksumInfo>> {
    let mut out = Vec::new();
    for entry in integrity.split_whitespace() {
        let (algo, b64) = entry.split_once('-').ok_or_else(|| {
            HermetoError::unexpected_format(format!("malformed npm integrity value: '{entry}'"))
        })?;
        let algo = match algo {
            "sha512" => "sha512",
            "sha1" => "sha1",
            "sha256" => "sha256",
            "md5" => "md5",
            other => {
                return Err(HermetoError::unsupported_feature(
                    format!("unsupported npm integrity algorithm '{other}'"),
                    "Known algorithms: sha512, sha256, sha1, md5.",
                ));
            }
        };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| HermetoError::unexpected_format(format!("invalid base64 in integrity value '{entry}': {e}")))?;
        let hex = bytes.iter().map(|b| format!("{b:02x}")).collect::<String>();
        out.push(ChecksumInfo::new(algo, hex));
    }
    if out.is_empty() {
        return Err(HermetoError::unexpected_format("empty integrity value"));
    }
    Ok(out)
}
