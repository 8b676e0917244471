//! `requirements.txt` parsing. pip's requirements grammar has no schema
//! file to deserialize against, so this is a hand-written line parser
//! covering the constructs hermetic prefetch needs to resolve: pinned
//! versions, direct URLs/VCS requirements, per-line `--hash=`, environment
//! markers (consumed and discarded, since a hermetic environment is fixed
//! at prefetch time) and `-r`/`-c` includes.

use std::path::{Path, PathBuf};

use crate::error::{HermetoError, Result};

use super::read_to_string;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipRequirementSource {
    /// `name==1.2.3`, resolved against PyPI (or a custom index).
    Pinned { version: String },
    /// `name @ https://example.com/name-1.2.3.tar.gz`
    Url { url: String },
    /// `name @ git+https://example.com/org/repo.git@<rev>`
    Vcs { url: String, revision: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipRequirement {
    pub name: String,
    pub source: PipRequirementSource,
    pub hashes: Vec<String>,
    pub line_number: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipRequirementsFile {
    pub requirements: Vec<PipRequirement>,
    pub options: PipGlobalOptions,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipGlobalOptions {
    pub no_binary: Vec<String>,
    /// `--require-hashes`: once set, every requirement line (not only URL
    /// and VCS ones) must carry at least one `--hash=`.
    pub require_hashes: bool,
    /// Hosts named with `--trusted-host` (`host` or `host:port`), for which
    /// TLS certificate verification is disabled on download.
    pub trusted_hosts: Vec<String>,
}

/// Rejected closed set of index/link-selection flags: hermetic prefetch
/// resolves every package itself and cannot honor an alternate index or a
/// local wheel directory.
const REJECTED_FLAG_PREFIXES: &[(&str, &str)] = &[
    ("-i ", "-i"),
    ("--index-url ", "--index-url"),
    ("--extra-index-url ", "--extra-index-url"),
    ("-f ", "-f"),
    ("--find-links ", "--find-links"),
    ("--only-binary ", "--only-binary"),
];

/// Parse `path`, recursively following `-r`/`--requirement` includes
/// relative to the including file's directory.
pub fn parse(path: &Path) -> Result<PipRequirementsFile> {
    let mut file = PipRequirementsFile::default();
    parse_into(path, &mut file)?;
    enforce_hash_requirements(&file)?;
    Ok(file)
}

/// spec.md §4.4 point 4: once `--require-hashes` is in effect, or any line
/// carries a `--hash`, every requirement line must have at least one hash.
/// URL and VCS requirements always require a hash, regardless of the flag.
fn enforce_hash_requirements(file: &PipRequirementsFile) -> Result<()> {
    let any_hash_present = file.requirements.iter().any(|r| !r.hashes.is_empty());
    let hashes_required = file.options.require_hashes || any_hash_present;

    for requirement in &file.requirements {
        let always_required = matches!(
            requirement.source,
            PipRequirementSource::Url { .. } | PipRequirementSource::Vcs { .. }
        );
        if requirement.hashes.is_empty() && (hashes_required || always_required) {
            return Err(HermetoError::package_rejected(
                format!(
                    "requirement '{}' on line {} has no --hash, but hashes are required",
                    requirement.name, requirement.line_number
                ),
                Some("Add a --hash=<algo>:<digest> value to this requirement.".to_string()),
            ));
        }
    }
    Ok(())
}

fn parse_into(path: &Path, out: &mut PipRequirementsFile) -> Result<()> {
    let raw = read_to_string(path)?;
    let joined = join_continuations(&raw);

    for (line_number, line) in joined.iter().enumerate() {
        let line_number = line_number + 1;
        let trimmed = strip_comment(line).trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("-r ").or_else(|| trimmed.strip_prefix("--requirement ")) {
            let included = resolve_relative(path, rest.trim());
            parse_into(&included, out)?;
            continue;
        }
        if trimmed.starts_with("-c ") || trimmed.starts_with("--constraint ") {
            continue; // constraints narrow versions, they don't add requirements
        }
        if trimmed == "--no-index" || trimmed.starts_with("--no-index ") {
            return Err(rejected_flag(path, line_number, "--no-index"));
        }
        if let Some((_, flag)) = REJECTED_FLAG_PREFIXES.iter().find(|(prefix, _)| trimmed.starts_with(prefix)) {
            return Err(rejected_flag(path, line_number, flag));
        }
        if let Some(rest) = trimmed.strip_prefix("--no-binary ") {
            out.options.no_binary.push(rest.trim().to_string());
            continue;
        }
        if trimmed == "--require-hashes" || trimmed.starts_with("--require-hashes ") {
            out.options.require_hashes = true;
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("--trusted-host ") {
            out.options.trusted_hosts.push(rest.trim().to_string());
            continue;
        }
        if trimmed.starts_with("-e ") || trimmed.starts_with("--editable ") {
            return Err(HermetoError::unsupported_feature(
                format!("editable requirement on line {line_number} of {}", path.display()),
                "Editable (-e) requirements install from a local path and cannot be hermetically prefetched.",
            ));
        }

        out.requirements.push(parse_requirement_line(trimmed, line_number, path)?);
    }

    Ok(())
}

fn parse_requirement_line(line: &str, line_number: usize, path: &Path) -> Result<PipRequirement> {
    let (spec, hash_parts) = split_hashes(line);
    let spec = strip_marker(spec).trim();

    if let Some((name, url)) = spec.split_once('@') {
        let name = name.trim().to_string();
        // Strip a trailing `#egg=...` (or other) fragment: it has no bearing
        // on the clone/download itself, only on the (already-known) name.
        let url = url.trim().split_once('#').map(|(base, _)| base).unwrap_or(url.trim()).to_string();
        if name.is_empty() || url.is_empty() {
            return Err(malformed(path, line_number, line));
        }
        let source = if let Some(rest) = url.strip_prefix("git+") {
            let (base, revision) = rest.rsplit_once('@').ok_or_else(|| malformed(path, line_number, line))?;
            PipRequirementSource::Vcs {
                url: format!("git+{base}"),
                revision: revision.to_string(),
            }
        } else {
            PipRequirementSource::Url { url }
        };
        return Ok(PipRequirement {
            name,
            source,
            hashes: hash_parts,
            line_number,
        });
    }

    let (name, version) = spec
        .split_once("==")
        .ok_or_else(|| {
            HermetoError::package_rejected(
                format!(
                    "requirement on line {line_number} of {} is not pinned to an exact version: '{line}'",
                    path.display()
                ),
                Some("Pin every requirement with '==' so the resolved source is reproducible.".to_string()),
            )
        })?;

    Ok(PipRequirement {
        name: name.trim().to_string(),
        source: PipRequirementSource::Pinned {
            version: version.trim().to_string(),
        },
        hashes: hash_parts,
        line_number,
    })
}

fn rejected_flag(path: &Path, line_number: usize, flag: &str) -> HermetoError {
    HermetoError::unsupported_feature(
        format!("'{flag}' on line {line_number} of {} selects an alternate package index", path.display()),
        "Hermetic prefetch resolves every package itself; remove index/link-selection flags from requirements files.",
    )
}

fn malformed(path: &Path, line_number: usize, line: &str) -> HermetoError {
    HermetoError::unexpected_format(format!(
        "cannot parse requirement on line {line_number} of {}: '{line}'",
        path.display()
    ))
}

fn split_hashes(line: &str) -> (&str, Vec<String>) {
    let mut hashes = Vec::new();
    let mut spec_end = line.len();
    for (idx, _) in line.match_indices("--hash=") {
        if spec_end == line.len() {
            spec_end = idx;
        }
        let rest = &line[idx + "--hash=".len()..];
        let token = rest.split_whitespace().next().unwrap_or("");
        if !token.is_empty() {
            hashes.push(token.to_string());
        }
    }
    (line[..spec_end].trim_end(), hashes)
}

fn strip_marker(spec: &str) -> &str {
    spec.split(';').next().unwrap_or(spec)
}

fn strip_comment(line: &str) -> &str {
    match line.find(" #").or_else(|| line.strip_prefix('#').map(|_| 0)) {
        Some(0) => "",
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn join_continuations(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for line in raw.lines() {
        if let Some(stripped) = line.strip_suffix('\\') {
            current.push_str(stripped);
            current.push(' ');
        } else {
            current.push_str(line);
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn resolve_relative(including_file: &Path, rest: &str) -> PathBuf {
    let base = including_file.parent().unwrap_or_else(|| Path::new("."));
    base.join(rest)
}

/// A pip project's own name/version, read from whichever of
/// `pyproject.toml`'s `[project]` table or `setup.cfg`'s `[metadata]`
/// section is present, in that order. `None` when neither file declares a
/// name, leaving the caller to fall back to the repository origin.
pub fn read_main_package(package_dir: &Path) -> Option<(Option<String>, Option<String>)> {
    if let Some(found) = read_pyproject_toml(&package_dir.join("pyproject.toml")) {
        return Some(found);
    }
    read_setup_cfg(&package_dir.join("setup.cfg"))
}

fn read_pyproject_toml(path: &Path) -> Option<(Option<String>, Option<String>)> {
    let raw = std::fs::read_to_string(path).ok()?;
    let value: toml::Value = toml::from_str(&raw).ok()?;
    let project = value.get("project")?;
    let name = project.get("name").and_then(|v| v.as_str()).map(str::to_string);
    let version = project.get("version").and_then(|v| v.as_str()).map(str::to_string);
    name.as_ref()?;
    Some((name, version))
}

/// A minimal `setup.cfg` `[metadata]` reader: `name = ...` / `version = ...`
/// key-value lines under a `[metadata]` section header. Does not resolve
/// `attr:`/`file:` directives to their referenced source.
fn read_setup_cfg(path: &Path) -> Option<(Option<String>, Option<String>)> {
    let raw = std::fs::read_to_string(path).ok()?;
    let mut in_metadata = false;
    let mut name = None;
    let mut version = None;

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            in_metadata = trimmed == "[metadata]";
            continue;
        }
        if !in_metadata {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("name") {
            if let Some(value) = rest.trim_start().strip_prefix('=') {
                name = Some(value.trim().to_string());
            }
        } else if let Some(rest) = trimmed.strip_prefix("version") {
            if let Some(value) = rest.trim_start().strip_prefix('=') {
                version = Some(value.trim().to_string());
            }
        }
    }

    name.as_ref()?;
    Some((name, version))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn parses_pinned_requirement_with_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "requirements.txt", "bar==1.0.0 --hash=sha256:abc\n");
        let file = parse(&path).unwrap();
        assert_eq!(file.requirements.len(), 1);
        assert_eq!(file.requirements[0].name, "bar");
        assert_eq!(
            file.requirements[0].source,
            PipRequirementSource::Pinned {
                version: "1.0.0".to_string()
            }
        );
        assert_eq!(file.requirements[0].hashes, vec!["sha256:abc".to_string()]);
    }

    #[test]
    fn rejects_unpinned_requirement() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "requirements.txt", "bar>=1.0.0\n");
        let err = parse(&path).unwrap_err();
        assert!(matches!(err, HermetoError::PackageRejected { .. }));
    }

    #[test]
    fn rejects_editable_requirement() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "requirements.txt", "-e ./local-pkg\n");
        let err = parse(&path).unwrap_err();
        assert!(matches!(err, HermetoError::UnsupportedFeature { .. }));
    }

    #[test]
    fn parses_vcs_requirement() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "requirements.txt",
            "bar @ git+https://example.com/org/bar.git@abc123 --hash=sha256:abc\n",
        );
        let file = parse(&path).unwrap();
        assert_eq!(
            file.requirements[0].source,
            PipRequirementSource::Vcs {
                url: "git+https://example.com/org/bar.git".to_string(),
                revision: "abc123".to_string(),
            }
        );
    }

    #[test]
    fn vcs_requirement_without_a_hash_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "requirements.txt",
            "bar @ git+https://example.com/org/bar.git@abc123\n",
        );
        let err = parse(&path).unwrap_err();
        assert!(matches!(err, HermetoError::PackageRejected { .. }));
    }

    #[test]
    fn strips_egg_fragment_from_vcs_requirement() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "requirements.txt",
            "cnr_server @ git+https://github.com/quay/appr.git@abc123#egg=cnr_server --hash=sha256:abc\n",
        );
        let file = parse(&path).unwrap();
        assert_eq!(
            file.requirements[0].source,
            PipRequirementSource::Vcs {
                url: "git+https://github.com/quay/appr.git".to_string(),
                revision: "abc123".to_string(),
            }
        );
    }

    #[test]
    fn follows_nested_requirement_includes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "base.txt", "foo==1.0.0\n");
        let path = write(dir.path(), "requirements.txt", "-r base.txt\nbar==2.0.0\n");
        let file = parse(&path).unwrap();
        assert_eq!(file.requirements.len(), 2);
    }

    #[test]
    fn rejects_index_url_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "requirements.txt", "--index-url https://example.com/simple\nbar==1.0.0\n");
        let err = parse(&path).unwrap_err();
        assert!(matches!(err, HermetoError::UnsupportedFeature { .. }));
    }

    #[test]
    fn rejects_only_binary_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "requirements.txt", "--only-binary :all:\nbar==1.0.0\n");
        let err = parse(&path).unwrap_err();
        assert!(matches!(err, HermetoError::UnsupportedFeature { .. }));
    }

    #[test]
    fn require_hashes_flag_demands_a_hash_on_every_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "requirements.txt", "--require-hashes\nbar==1.0.0\n");
        let err = parse(&path).unwrap_err();
        assert!(matches!(err, HermetoError::PackageRejected { .. }));
    }

    #[test]
    fn trusted_host_flag_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "requirements.txt",
            "--trusted-host example.com\nbar==1.0.0 --hash=sha256:abc\n",
        );
        let file = parse(&path).unwrap();
        assert_eq!(file.options.trusted_hosts, vec!["example.com".to_string()]);
    }

    #[test]
    fn strips_environment_markers() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "requirements.txt",
            "bar==1.0.0; python_version >= \"3.8\"\n",
        );
        let file = parse(&path).unwrap();
        assert_eq!(file.requirements[0].name, "bar");
    }

    #[test]
    fn reads_main_package_from_pyproject_toml() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "pyproject.toml",
            "[project]\nname = \"my-app\"\nversion = \"1.2.3\"\n",
        );
        let (name, version) = read_main_package(dir.path()).unwrap();
        assert_eq!(name.as_deref(), Some("my-app"));
        assert_eq!(version.as_deref(), Some("1.2.3"));
    }

    #[test]
    fn reads_main_package_from_setup_cfg_when_no_pyproject_toml() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "setup.cfg", "[metadata]\nname = my-app\nversion = 2.0.0\n");
        let (name, version) = read_main_package(dir.path()).unwrap();
        assert_eq!(name.as_deref(), Some("my-app"));
        assert_eq!(version.as_deref(), Some("2.0.0"));
    }

    #[test]
    fn read_main_package_is_none_without_project_metadata() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_main_package(dir.path()).is_none());
    }
}
