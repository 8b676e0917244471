//! `package-lock.json` parsing (lockfile versions 1, 2 and 3).

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{HermetoError, Result};

use super::read_to_string;

/// One package entry normalized out of a `package-lock.json`, regardless
/// of which lockfile version it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockedNpmPackage {
    /// `node_modules/...` path the entry was keyed under (v2/v3), or the
    /// bare name for a v1-style recursive entry.
    pub path: String,
    pub name: String,
    pub version: String,
    pub resolved: Option<String>,
    pub integrity: Option<String>,
    pub dev: bool,
    pub bundled: bool,
    /// `true` for the root package and for `file:`-resolved workspace
    /// members linked via a symlink, neither of which is fetched.
    pub is_link_or_root: bool,
}

#[derive(Debug, Deserialize)]
struct PackageLock {
    #[serde(rename = "lockfileVersion")]
    lockfile_version: Option<u32>,
    name: Option<String>,
    version: Option<String>,
    packages: Option<BTreeMap<String, PackagesEntry>>,
    dependencies: Option<BTreeMap<String, DependenciesEntry>>,
}

#[derive(Debug, Deserialize)]
struct PackagesEntry {
    name: Option<String>,
    version: Option<String>,
    resolved: Option<String>,
    integrity: Option<String>,
    #[serde(default)]
    dev: bool,
    #[serde(default)]
    bundled: bool,
    link: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct DependenciesEntry {
    version: Option<String>,
    resolved: Option<String>,
    integrity: Option<String>,
    #[serde(default)]
    dev: bool,
    #[serde(default)]
    bundled: bool,
    dependencies: Option<BTreeMap<String, DependenciesEntry>>,
}

pub fn parse(path: &Path) -> Result<Vec<LockedNpmPackage>> {
    let lock = read_lock(path)?;
    match lock.lockfile_version {
        Some(v) if v >= 2 => parse_v2_or_v3(lock),
        _ => parse_v1(lock),
    }
}

/// The root project's own name/version, for building its main-package SBOM
/// component. v2/v3 lockfiles carry this on the `""` entry of `packages`;
/// v1 lockfiles (and v2/v3 lockfiles missing that entry) fall back to the
/// lockfile's own top-level `name`/`version` fields.
pub fn read_main_package(path: &Path) -> Result<(Option<String>, Option<String>)> {
    let lock = read_lock(path)?;
    if let Some(entries) = &lock.packages {
        if let Some(root) = entries.get("") {
            let name = root.name.clone().or_else(|| lock.name.clone());
            let version = root.version.clone().or_else(|| lock.version.clone());
            return Ok((name, version));
        }
    }
    Ok((lock.name, lock.version))
}

fn read_lock(path: &Path) -> Result<PackageLock> {
    let raw = read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| {
        HermetoError::package_rejected(
            format!("{} is not a valid package-lock.json: {e}", path.display()),
            None,
        )
    })
}

fn parse_v2_or_v3(lock: PackageLock) -> Result<Vec<LockedNpmPackage>> {
    let mut packages = Vec::new();
    let Some(entries) = lock.packages else {
        return Ok(packages);
    };

    for (key, entry) in entries {
        if key.is_empty() {
            continue; // the root package itself
        }
        let Some(name) = package_name_from_key(&key) else {
            continue;
        };
        let Some(version) = entry.version else {
            // workspace-local / file: deps without a version are not fetched
            continue;
        };

        packages.push(LockedNpmPackage {
            path: key,
            name,
            version,
            resolved: entry.resolved.clone(),
            integrity: entry.integrity,
            dev: entry.dev,
            bundled: entry.bundled,
            is_link_or_root: entry.link.unwrap_or(false),
        });
    }

    Ok(packages)
}

fn parse_v1(lock: PackageLock) -> Result<Vec<LockedNpmPackage>> {
    let mut packages = Vec::new();
    if let Some(deps) = lock.dependencies {
        collect_v1(&deps, &mut packages);
    }
    Ok(packages)
}

fn collect_v1(deps: &BTreeMap<String, DependenciesEntry>, out: &mut Vec<LockedNpmPackage>) {
    for (name, entry) in deps {
        if let Some(version) = &entry.version {
            out.push(LockedNpmPackage {
                path: name.clone(),
                name: name.clone(),
                version: version.clone(),
                resolved: entry.resolved.clone(),
                integrity: entry.integrity.clone(),
                dev: entry.dev,
                bundled: entry.bundled,
                is_link_or_root: false,
            });
        }
        if let Some(nested) = &entry.dependencies {
            collect_v1(nested, out);
        }
    }
}

fn package_name_from_key(key: &str) -> Option<String> {
    let marker = "node_modules/";
    let idx = key.rfind(marker)?;
    let name = &key[idx + marker.len()..];
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// A resolved entry pointing at a git remote rather than the npm registry,
/// e.g. `"resolved": "git+ssh://git@github.com/org/repo.git#<sha>"`.
pub fn git_source_hint(resolved: &str) -> Option<(String, String)> {
    let trimmed = resolved.strip_prefix("git+").unwrap_or(resolved);
    if !(trimmed.starts_with("ssh://")
        || trimmed.starts_with("http://")
        || trimmed.starts_with("https://")
        || trimmed.starts_with("git://"))
    {
        return None;
    }
    let (url, rev) = trimmed.rsplit_once('#')?;
    if url.is_empty() || rev.is_empty() {
        return None;
    }
    Some((url.to_string(), rev.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &std::path::Path, content: &str) -> std::path::PathBuf {
        let path = dir.join("package-lock.json");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn parses_v3_packages_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"{
                "lockfileVersion": 3,
                "packages": {
                    "": {"name": "root"},
                    "node_modules/bar": {
                        "version": "1.0.0",
                        "resolved": "https://registry.npmjs.org/bar/-/bar-1.0.0.tgz",
                        "integrity": "sha512-abc"
                    },
                    "node_modules/dev-only": {
                        "version": "2.0.0",
                        "dev": true
                    }
                }
            }"#,
        );
        let packages = parse(&path).unwrap();
        assert_eq!(packages.len(), 2);
        let bar = packages.iter().find(|p| p.name == "bar").unwrap();
        assert_eq!(bar.version, "1.0.0");
        assert!(!bar.dev);
        let dev = packages.iter().find(|p| p.name == "dev-only").unwrap();
        assert!(dev.dev);
    }

    #[test]
    fn parses_v1_recursive_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"{
                "lockfileVersion": 1,
                "dependencies": {
                    "bar": {
                        "version": "1.0.0",
                        "resolved": "https://registry.npmjs.org/bar/-/bar-1.0.0.tgz",
                        "dependencies": {
                            "baz": {"version": "0.1.0"}
                        }
                    }
                }
            }"#,
        );
        let packages = parse(&path).unwrap();
        assert_eq!(packages.len(), 2);
        assert!(packages.iter().any(|p| p.name == "baz"));
    }

    #[test]
    fn rejects_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "not json");
        let err = parse(&path).unwrap_err();
        assert!(matches!(err, HermetoError::PackageRejected { .. }));
    }

    #[test]
    fn git_source_hint_parses_git_plus_ssh_resolved() {
        let hint = git_source_hint("git+ssh://git@github.com/org/repo.git#abc123").unwrap();
        assert_eq!(hint.0, "ssh://git@github.com/org/repo.git");
        assert_eq!(hint.1, "abc123");
    }

    #[test]
    fn git_source_hint_is_none_for_registry_tarball() {
        assert!(git_source_hint("https://registry.npmjs.org/bar/-/bar-1.0.0.tgz").is_none());
    }

    #[test]
    fn reads_main_package_from_root_packages_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"{
                "name": "fallback-name",
                "lockfileVersion": 3,
                "packages": {
                    "": {"name": "my-app", "version": "1.0.0"},
                    "node_modules/bar": {"version": "1.0.0"}
                }
            }"#,
        );
        let (name, version) = read_main_package(&path).unwrap();
        assert_eq!(name.as_deref(), Some("my-app"));
        assert_eq!(version.as_deref(), Some("1.0.0"));
    }

    #[test]
    fn reads_main_package_from_v1_top_level_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"{
                "name": "my-app",
                "version": "2.0.0",
                "lockfileVersion": 1,
                "dependencies": {}
            }"#,
        );
        let (name, version) = read_main_package(&path).unwrap();
        assert_eq!(name.as_deref(), Some("my-app"));
        assert_eq!(version.as_deref(), Some("2.0.0"));
    }
}
