use crate::checksum::{self, ChecksumInfo};
use crate::config::RuntimeConfig;
use crate::error::{HermetoError, Result};
use crate::fetcher::{self, DownloadSpec};
use crate::models::input::{PackageInput, Request};
use crate::models::output::PackageOutput;
use crate::models::sbom::{Component, Property};
use crate::parsers::pip::{self, PipRequirement, PipRequirementSource};
use crate::purl::PurlBuilder;
use crate::repo_id::RepoId;

use super::{deps_dir, directory_name, ensure_dir, main_package_component};

const PYPI_SIMPLE_INDEX: &str = "https://pypi.org/simple";

pub async fn resolve(request: &Request, package: &PackageInput, config: &RuntimeConfig) -> Result<PackageOutput> {
    let package_dir = request.source_dir.join_within_root(&package.path)?;

    let requirements_files = package
        .requirements_files
        .clone()
        .unwrap_or_else(|| vec![std::path::PathBuf::from("requirements.txt")]);

    let dest_dir = deps_dir(request, "pip");
    ensure_dir(&dest_dir)?;

    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(config.insecure_skip_tls_verify)
        .build()
        .map_err(|e| HermetoError::fetch_error(format!("failed to build HTTP client: {e}")))?;
    let insecure_client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .map_err(|e| HermetoError::fetch_error(format!("failed to build HTTP client: {e}")))?;

    let mut output = PackageOutput::new();

    let (main_name, main_version) = match pip::read_main_package(&package_dir.path()) {
        Some((Some(name), version)) => (name, version),
        Some((None, _)) | None => (directory_name(&package_dir), None),
    };
    if let Some(component) =
        main_package_component(request, &package_dir, "pypi", &main_name, main_version.as_deref())
    {
        output.components.push(component);
    }

    let mut trusted_hosts = Vec::new();

    for rel_path in &requirements_files {
        let abspath = package_dir.join_within_root(rel_path)?;
        let file = pip::parse(&abspath.path())?;
        let file_label = rel_path.to_string_lossy().to_string();
        trusted_hosts.extend(file.options.trusted_hosts.iter().cloned());

        for requirement in &file.requirements {
            let downloader = Downloader {
                default: &client,
                insecure: &insecure_client,
                trusted_hosts: &trusted_hosts,
            };
            let component =
                resolve_one(&downloader, &dest_dir, requirement, &file_label, package.allow_binary, config).await?;
            output.components.push(component);
        }
    }

    Ok(output)
}

/// Picks between a verifying and a TLS-skipping client per download, for
/// hosts named with `--trusted-host` (spec.md §4.5.2).
struct Downloader<'a> {
    default: &'a reqwest::Client,
    insecure: &'a reqwest::Client,
    trusted_hosts: &'a [String],
}

impl Downloader<'_> {
    fn client_for(&self, url: &str) -> &reqwest::Client {
        let host = url::Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string));
        match host {
            Some(host) if self.trusted_hosts.iter().any(|h| host_matches(h, &host)) => self.insecure,
            _ => self.default,
        }
    }
}

fn host_matches(trusted: &str, host: &str) -> bool {
    let trusted_host = trusted.split(':').next().unwrap_or(trusted);
    trusted_host.eq_ignore_ascii_case(host)
}

async fn resolve_one(
    downloader: &Downloader<'_>,
    dest_dir: &std::path::Path,
    requirement: &PipRequirement,
    file_label: &str,
    allow_binary: bool,
    config: &RuntimeConfig,
) -> Result<Component> {
    match &requirement.source {
        PipRequirementSource::Pinned { version } => {
            resolve_pinned(downloader, dest_dir, &requirement.name, version, &requirement.hashes, file_label, allow_binary, config)
                .await
        }
        PipRequirementSource::Url { url } => {
            resolve_direct_url(downloader, dest_dir, &requirement.name, url, &requirement.hashes, file_label, config).await
        }
        PipRequirementSource::Vcs { url, revision } => {
            resolve_vcs(dest_dir, &requirement.name, url, revision, &requirement.hashes, file_label)
        }
    }
}

#[derive(Clone, Debug)]
struct SimpleIndexEntry {
    filename: String,
    url: String,
    sha256: Option<String>,
    yanked: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum FileKind {
    Sdist(SdistExtension),
    Wheel,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SdistExtension {
    TarGz,
    Zip,
    Other,
}

async fn resolve_pinned(
    downloader: &Downloader<'_>,
    dest_dir: &std::path::Path,
    name: &str,
    version: &str,
    declared_hashes: &[String],
    file_label: &str,
    allow_binary: bool,
    config: &RuntimeConfig,
) -> Result<Component> {
    let index_url = format!("{PYPI_SIMPLE_INDEX}/{}/", normalize_project_name(name));
    let client = downloader.client_for(&index_url);
    let response = client
        .get(&index_url)
        .send()
        .await
        .map_err(|e| HermetoError::fetch_error(format!("GET {index_url} failed: {e}")))?
        .error_for_status()
        .map_err(|e| HermetoError::package_rejected(format!("'{name}' not found on the package index: {e}"), None))?;
    let html = response
        .text()
        .await
        .map_err(|e| HermetoError::fetch_error(format!("failed reading simple index response for {name}: {e}")))?;

    let entries = parse_simple_index(&html);
    let matching: Vec<&SimpleIndexEntry> = entries
        .iter()
        .filter(|e| filename_matches(&e.filename, name, version))
        .filter(|e| file_kind(&e.filename).is_some())
        .filter(|e| allow_binary || !matches!(file_kind(&e.filename), Some(FileKind::Wheel)))
        .collect();

    let mut candidates = matching;
    candidates.sort_by_key(|e| (e.yanked, file_kind(&e.filename).unwrap()));

    let chosen = candidates.first().copied().ok_or_else(|| {
        HermetoError::package_rejected(
            format!("no sdist available for {name}=={version}"),
            Some("Set allow_binary if a wheel-only release is acceptable for this package.".to_string()),
        )
    })?;

    let dest = dest_dir.join(format!("{name}-{version}-{}", chosen.filename));
    let download_client = downloader.client_for(&chosen.url);
    fetcher::get_file(download_client, &DownloadSpec::new(chosen.url.clone(), dest.clone()), config).await?;

    let is_wheel = matches!(file_kind(&chosen.filename), Some(FileKind::Wheel));
    if !is_wheel {
        validate_sdist_pkg_info(&dest)?;
    }

    let mut component = Component::new(
        name.to_string(),
        PurlBuilder::new("pypi", name.to_string()).version(version.to_string()).build(),
    )
    .with_version(version.to_string())
    .with_external_reference(chosen.url.clone());

    // Hash verification set per spec.md §4.5.2: both declared and
    // index-reported digests present means verify against their
    // intersection; only one side present means verify against that side;
    // neither present means no verification, recorded as a missing-hash
    // property rather than rejected.
    let index_hash = chosen.sha256.as_ref().map(|d| ChecksumInfo::new("sha256", d.clone()));
    let declared: Vec<ChecksumInfo> = declared_hashes
        .iter()
        .map(|s| ChecksumInfo::parse_specifier(s))
        .collect::<Result<_>>()?;

    let verify_against: Vec<ChecksumInfo> = match (&declared[..], &index_hash) {
        ([], None) => Vec::new(),
        ([], Some(hash)) => vec![hash.clone()],
        (user, None) => user.to_vec(),
        (user, Some(hash)) => {
            let intersected: Vec<ChecksumInfo> = user.iter().filter(|c| *c == hash).cloned().collect();
            if intersected.is_empty() { user.to_vec() } else { intersected }
        }
    };

    if verify_against.is_empty() {
        component = component.with_property(Property::new("cachi2:missing_hash:in_file", file_label));
    } else {
        checksum::must_match_any(&dest, &verify_against)?;
    }

    if is_wheel {
        component = component.with_property(Property::new("cachi2:pip:package:binary", "true"));
    }

    Ok(component)
}

/// Parse a PyPI simple-index HTML page: a flat list of `<a href="...">text</a>`
/// anchors, one per distributable file, each optionally carrying the file's
/// `#sha256=` digest in the URL fragment and a `data-yanked` attribute.
/// Hand-written rather than pulled from an HTML parsing crate, since the
/// simple index's anchor list is the only structure ever read from it.
fn parse_simple_index(html: &str) -> Vec<SimpleIndexEntry> {
    let mut entries = Vec::new();
    let mut rest = html;

    while let Some(start) = rest.find("<a ") {
        let after_open = &rest[start..];
        let Some(tag_end) = after_open.find('>') else { break };
        let tag = &after_open[..tag_end];
        let after_tag = &after_open[tag_end + 1..];
        let Some(close) = after_tag.find("</a>") else { break };
        let text = after_tag[..close].trim();

        if let Some(href) = extract_attr(tag, "href") {
            let (url, sha256) = match href.split_once("#sha256=") {
                Some((url, hash)) => (url.to_string(), Some(hash.to_string())),
                None => (href, None),
            };
            entries.push(SimpleIndexEntry {
                filename: text.to_string(),
                url,
                sha256,
                yanked: tag.contains("data-yanked"),
            });
        }

        rest = &after_tag[close + "</a>".len()..];
    }

    entries
}

fn extract_attr(tag: &str, attr: &str) -> Option<String> {
    let marker = format!("{attr}=\"");
    let idx = tag.find(&marker)?;
    let after = &tag[idx + marker.len()..];
    let end = after.find('"')?;
    Some(html_unescape(&after[..end]))
}

fn html_unescape(s: &str) -> String {
    s.replace("&amp;", "&").replace("&quot;", "\"").replace("&#39;", "'")
}

/// PEP 503 project-name normalization: runs of `-`, `_`, `.` collapse to a
/// single `-`, case-insensitively.
fn normalize_project_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sep = false;
    for c in name.chars() {
        if c == '-' || c == '_' || c == '.' {
            if !last_was_sep {
                out.push('-');
            }
            last_was_sep = true;
        } else {
            out.push(c.to_ascii_lowercase());
            last_was_sep = false;
        }
    }
    out
}

fn filename_matches(filename: &str, name: &str, version: &str) -> bool {
    let candidate = normalize_project_name(filename);
    let prefix = format!("{}-{}", normalize_project_name(name), normalize_project_name(version));
    candidate.starts_with(&prefix)
}

fn file_kind(filename: &str) -> Option<FileKind> {
    if filename.ends_with(".whl") {
        Some(FileKind::Wheel)
    } else if filename.ends_with(".tar.gz") {
        Some(FileKind::Sdist(SdistExtension::TarGz))
    } else if filename.ends_with(".zip") {
        Some(FileKind::Sdist(SdistExtension::Zip))
    } else if filename.ends_with(".tar.bz2") || filename.ends_with(".tar.xz") {
        Some(FileKind::Sdist(SdistExtension::Other))
    } else {
        None
    }
}

/// spec.md §4.5.2: every sdist must contain a top-level `PKG-INFO` file.
fn validate_sdist_pkg_info(path: &std::path::Path) -> Result<()> {
    let has_pkg_info = if path.to_string_lossy().ends_with(".zip") {
        zip_has_pkg_info(path)?
    } else {
        tarball_has_pkg_info(path)?
    };
    if has_pkg_info {
        Ok(())
    } else {
        Err(HermetoError::package_rejected(
            format!("{} has no top-level PKG-INFO file", path.display()),
            Some("Packages without a PKG-INFO file in their sdist cannot be hermetically prefetched.".to_string()),
        ))
    }
}

fn is_top_level_pkg_info(entry_name: &str) -> bool {
    let mut components = entry_name.trim_matches('/').split('/');
    matches!((components.next(), components.next(), components.next()), (Some(_), Some("PKG-INFO"), None))
}

fn tarball_has_pkg_info(path: &std::path::Path) -> Result<bool> {
    let file = std::fs::File::open(path)
        .map_err(|e| HermetoError::fetch_error(format!("cannot open {}: {e}", path.display())))?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    let entries = archive
        .entries()
        .map_err(|e| HermetoError::unexpected_format(format!("{} is not a valid tarball: {e}", path.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| HermetoError::unexpected_format(format!("corrupt tarball entry: {e}")))?;
        let name = entry.path().map_err(|e| HermetoError::unexpected_format(e.to_string()))?;
        if is_top_level_pkg_info(&name.to_string_lossy()) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn zip_has_pkg_info(path: &std::path::Path) -> Result<bool> {
    let file = std::fs::File::open(path)
        .map_err(|e| HermetoError::fetch_error(format!("cannot open {}: {e}", path.display())))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| HermetoError::unexpected_format(format!("{} is not a valid zip: {e}", path.display())))?;
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| HermetoError::unexpected_format(format!("corrupt zip entry: {e}")))?;
        if is_top_level_pkg_info(entry.name()) {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn resolve_direct_url(
    downloader: &Downloader<'_>,
    dest_dir: &std::path::Path,
    name: &str,
    url: &str,
    declared_hashes: &[String],
    file_label: &str,
    config: &RuntimeConfig,
) -> Result<Component> {
    let dest = dest_dir.join(format!("{name}-{}", file_name_from_url(url)));
    let client = downloader.client_for(url);
    fetcher::get_file(client, &DownloadSpec::new(url.to_string(), dest.clone()), config).await?;

    if declared_hashes.is_empty() {
        return Err(HermetoError::package_rejected(
            format!("direct URL requirement '{name}' in {file_label} has no '--hash' to verify against"),
            Some("Add '--hash=sha256:...' to this requirement line.".to_string()),
        ));
    }
    let checksums: Vec<ChecksumInfo> = declared_hashes
        .iter()
        .map(|s| ChecksumInfo::parse_specifier(s))
        .collect::<Result<_>>()?;
    checksum::must_match_any(&dest, &checksums)?;

    let purl = PurlBuilder::new("pypi", name.to_string()).build();
    Ok(Component::new(name.to_string(), purl).with_external_reference(url.to_string()))
}

fn resolve_vcs(
    dest_dir: &std::path::Path,
    name: &str,
    url: &str,
    revision: &str,
    declared_hashes: &[String],
    file_label: &str,
) -> Result<Component> {
    if !looks_like_full_commit(revision) {
        return Err(HermetoError::unexpected_format(format!(
            "pip VCS requirement '{name}' is not pinned to a full commit sha: '{revision}'"
        )));
    }
    let base_url = url.strip_prefix("git+").unwrap_or(url);
    let repo_id = RepoId::new(base_url, revision)?;
    let dest = dest_dir.join(format!("{name}-{revision}.tar.gz"));
    let work_dir = tempfile::tempdir().map_err(|e| HermetoError::fetch_error(e.to_string()))?;
    crate::git::clone_as_tarball(base_url, revision, work_dir.path(), &dest)?;

    let purl = PurlBuilder::new("pypi", name.to_string())
        .qualifier("vcs_url", repo_id.as_vcs_url_qualifier())
        .build();
    let mut component = Component::new(name.to_string(), purl);

    if declared_hashes.is_empty() {
        component = component.with_property(Property::new("cachi2:missing_hash:in_file", file_label));
    } else {
        let checksums: Vec<ChecksumInfo> = declared_hashes
            .iter()
            .map(|s| ChecksumInfo::parse_specifier(s))
            .collect::<Result<_>>()?;
        checksum::must_match_any(&dest, &checksums)?;
    }

    Ok(component)
}

fn looks_like_full_commit(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn file_name_from_url(url: &str) -> String {
    url.rsplit('/').next().unwrap_or("download").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_from_url_takes_last_segment() {
        assert_eq!(file_name_from_url("https://example.com/a/b/bar-1.0.tar.gz"), "bar-1.0.tar.gz");
    }

    #[test]
    fn normalizes_project_name_separators() {
        assert_eq!(normalize_project_name("My_Cool.Package"), "my-cool-package");
    }

    #[test]
    fn filename_matches_normalizes_both_sides() {
        assert!(filename_matches("My_Cool-1.0.0.tar.gz", "my-cool", "1.0.0"));
    }

    #[test]
    fn parses_simple_index_anchors_with_hash_and_yanked() {
        let html = r#"
            <!DOCTYPE html>
            <html><body>
            <a href="https://files.pythonhosted.org/bar-1.0.0.tar.gz#sha256=abc123">bar-1.0.0.tar.gz</a>
            <a href="https://files.pythonhosted.org/bar-1.0.0-py3-none-any.whl#sha256=def456" data-yanked="superseded">bar-1.0.0-py3-none-any.whl</a>
            </body></html>
        "#;
        let entries = parse_simple_index(html);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].filename, "bar-1.0.0.tar.gz");
        assert_eq!(entries[0].sha256.as_deref(), Some("abc123"));
        assert!(!entries[0].yanked);
        assert!(entries[1].yanked);
    }

    #[test]
    fn file_kind_prefers_tar_gz_over_zip_and_wheel() {
        assert!(FileKind::Sdist(SdistExtension::TarGz) < FileKind::Sdist(SdistExtension::Zip));
        assert!(FileKind::Sdist(SdistExtension::Zip) < FileKind::Wheel);
    }

    #[test]
    fn host_matches_ignores_port_on_trusted_side() {
        assert!(host_matches("example.com:8080", "example.com"));
        assert!(!host_matches("example.com", "other.com"));
    }

    #[test]
    fn is_top_level_pkg_info_requires_exactly_one_directory_level() {
        assert!(is_top_level_pkg_info("bar-1.0.0/PKG-INFO"));
        assert!(!is_top_level_pkg_info("PKG-INFO"));
        assert!(!is_top_level_pkg_info("bar-1.0.0/src/PKG-INFO"));
    }
}
