//! `yarn.lock` resolution, covering both Yarn Classic (v1) and Yarn
//! Berry lockfile dialects. Both share the same `"spec": { version,
//! resolved, integrity }` block shape; Classic encodes the shasum as a
//! `#<sha1>` URL fragment instead of an `integrity` line when resolving
//! straight from the npm registry.

use base64::Engine;

use crate::checksum::{self, ChecksumInfo};
use crate::config::RuntimeConfig;
use crate::error::{HermetoError, Result};
use crate::fetcher::{self, DownloadSpec};
use crate::models::input::{PackageInput, Request};
use crate::models::output::{PackageOutput, ProjectFile};
use crate::models::sbom::Component;
use crate::purl::PurlBuilder;

use super::{deps_dir, ensure_dir};

#[derive(Clone, Debug, PartialEq, Eq)]
struct YarnEntry {
    name: String,
    version: String,
    resolved: String,
    integrity: Option<String>,
}

pub async fn resolve(
    request: &Request,
    package: &PackageInput,
    config: &RuntimeConfig,
    classic: bool,
) -> Result<PackageOutput> {
    let package_dir = request.source_dir.join_within_root(&package.path)?;
    let lockfile_path = package_dir.path().join("yarn.lock");
    if !lockfile_path.exists() {
        return Err(HermetoError::package_rejected(
            format!("no yarn.lock found in {}", package_dir.path().display()),
            Some("Run 'yarn install' to generate a lockfile before prefetching.".to_string()),
        ));
    }

    let raw = std::fs::read_to_string(&lockfile_path)
        .map_err(|e| HermetoError::package_rejected(format!("cannot read {}: {e}", lockfile_path.display()), None))?;
    let entries = parse_yarn_lock(&raw)?;

    let ecosystem = if classic { "yarn-classic" } else { "yarn" };
    let dest_dir = deps_dir(request, ecosystem);
    ensure_dir(&dest_dir)?;

    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(config.insecure_skip_tls_verify)
        .build()
        .map_err(|e| HermetoError::fetch_error(format!("failed to build HTTP client: {e}")))?;

    let mut output = PackageOutput::new();
    for entry in &entries {
        let component = resolve_one(&client, &dest_dir, entry, config).await?;
        output.components.push(component);
    }

    // yarn.lock is written back verbatim so `inject-files` has something to
    // template at consume time, per spec.md §4.5 point 7.
    output = output.with_project_file(ProjectFile::new(lockfile_path, raw));
    Ok(output)
}

async fn resolve_one(
    client: &reqwest::Client,
    dest_dir: &std::path::Path,
    entry: &YarnEntry,
    config: &RuntimeConfig,
) -> Result<Component> {
    let (base_url, shasum_fragment) = match entry.resolved.split_once('#') {
        Some((url, frag)) => (url.to_string(), Some(frag.to_string())),
        None => (entry.resolved.clone(), None),
    };

    let dest = dest_dir.join(format!("{}-{}.tgz", entry.name.replace('/', "-"), entry.version));
    fetcher::get_file(client, &DownloadSpec::new(base_url.clone(), dest.clone()), config).await?;

    let checksums = match (&entry.integrity, &shasum_fragment) {
        (Some(integrity), _) => parse_integrity(integrity)?,
        (None, Some(sha1)) => vec![ChecksumInfo::new("sha1", sha1.to_ascii_lowercase())],
        (None, None) => {
            return Err(HermetoError::package_rejected(
                format!("no integrity or shasum available for '{}@{}'", entry.name, entry.version),
                Some("Regenerate yarn.lock with a yarn version that records integrity hashes.".to_string()),
            ));
        }
    };
    checksum::must_match_any(&dest, &checksums)?;

    let purl = PurlBuilder::new("npm", entry.name.clone())
        .version(entry.version.clone())
        .build();
    Ok(Component::new(entry.name.clone(), purl)
        .with_version(entry.version.clone())
        .with_external_reference(base_url))
}

fn parse_integrity(integrity: &str) -> Result<Vec<ChecksumInfo>> {
    let (algo, b64) = integrity
        .split_once('-')
        .ok_or_else(|| HermetoError::unexpected_format(format!("malformed integrity value: '{integrity}'")))?;
    let algo = match algo {
        "sha512" | "sha256" | "sha1" | "md5" => algo,
        other => {
            return Err(HermetoError::unsupported_feature(
                format!("unsupported integrity algorithm '{other}'"),
                "Known algorithms: sha512, sha256, sha1, md5.",
            ));
        }
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| HermetoError::unexpected_format(format!("invalid base64 in '{integrity}': {e}")))?;
    let hex = bytes.iter().map(|b| format!("{b:02x}")).collect::<String>();
    Ok(vec![ChecksumInfo::new(algo, hex)])
}

/// A small, line-oriented parser for both yarn.lock dialects. Handles the
/// one shape that matters for prefetch: a quoted-or-bare spec header
/// followed by indented `version`/`resolved`/`integrity` fields. Nested
/// `dependencies:` blocks are skipped.
fn parse_yarn_lock(raw: &str) -> Result<Vec<YarnEntry>> {
    let mut entries = Vec::new();
    let mut name: Option<String> = None;
    let mut version: Option<String> = None;
    let mut resolved: Option<String> = None;
    let mut integrity: Option<String> = None;

    let flush = |name: &mut Option<String>,
                 version: &mut Option<String>,
                 resolved: &mut Option<String>,
                 integrity: &mut Option<String>,
                 entries: &mut Vec<YarnEntry>| {
        if let (Some(n), Some(v), Some(r)) = (name.take(), version.take(), resolved.take()) {
            entries.push(YarnEntry {
                name: n,
                version: v,
                resolved: r,
                integrity: integrity.take(),
            });
        } else {
            *integrity = None;
        }
    };

    for line in raw.lines() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !line.starts_with(' ') {
            flush(&mut name, &mut version, &mut resolved, &mut integrity, &mut entries);
            let header = line.trim_end_matches(':');
            let first_spec = header.split(", ").next().unwrap_or(header);
            name = parse_spec_name(first_spec);
            continue;
        }

        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("version ") {
            version = Some(unquote(rest));
        } else if let Some(rest) = trimmed.strip_prefix("resolved ") {
            resolved = Some(unquote(rest));
        } else if let Some(rest) = trimmed.strip_prefix("integrity ") {
            integrity = Some(unquote(rest));
        }
    }
    flush(&mut name, &mut version, &mut resolved, &mut integrity, &mut entries);

    Ok(entries)
}

fn parse_spec_name(spec: &str) -> Option<String> {
    let spec = unquote(spec);
    // "@scope/name@^1.0.0" or "name@^1.0.0"; the last '@' separates the
    // range from the package name, except when the name itself starts
    // with '@' (scoped package).
    if let Some(rest) = spec.strip_prefix('@') {
        rest.find('@').map(|idx| format!("@{}", &rest[..idx]))
    } else {
        spec.split_once('@').map(|(name, _)| name.to_string())
    }
}

fn unquote(s: &str) -> String {
    s.trim().trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scoped_and_unscoped_specs() {
        let raw = r#"
"@scope/bar@^1.0.0":
  version "1.0.0"
  resolved "https://registry.yarnpkg.com/@scope/bar/-/bar-1.0.0.tgz#abcdef"
  integrity sha512-aGVsbG8=

baz@^2.0.0:
  version "2.0.0"
  resolved "https://registry.yarnpkg.com/baz/-/baz-2.0.0.tgz#123456"
"#;
        let entries = parse_yarn_lock(raw).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "@scope/bar");
        assert_eq!(entries[1].name, "baz");
        assert!(entries[1].integrity.is_none());
    }

    #[test]
    fn parse_integrity_rejects_bad_algorithm() {
        let err = parse_integrity("sha3-deadbeef").unwrap_err();
        assert!(matches!(err, HermetoError::UnsupportedFeature { .. }));
    }
}
