//! `Cargo.lock` parsing. Mirrors `cargo::main::CargoPackage` from the
//! system this tool reimplements: every `[[package]]` entry with a
//! `source` is either a registry crate (`source = "registry+..."`) or a
//! git dependency (`source = "git+<url>?...#<commit>"`); path dependencies
//! (no `source` key) are the local workspace and are never fetched.

use std::path::Path;

use serde::Deserialize;

use crate::error::{HermetoError, Result};

use super::read_to_string;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CargoPackageSource {
    CratesIo,
    Git { url: String, commit: String },
    /// A workspace member or path dependency: nothing to fetch.
    Local,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CargoLockedPackage {
    pub name: String,
    pub version: String,
    pub source: CargoPackageSource,
    pub checksum: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CargoLockFile {
    package: Vec<CargoLockPackageEntry>,
}

#[derive(Debug, Deserialize)]
struct CargoLockPackageEntry {
    name: String,
    version: String,
    source: Option<String>,
    checksum: Option<String>,
}

pub fn parse(path: &Path) -> Result<Vec<CargoLockedPackage>> {
    let raw = read_to_string(path)?;
    let lock: CargoLockFile = toml::from_str(&raw).map_err(|e| {
        HermetoError::package_rejected(format!("{} is not a valid Cargo.lock: {e}", path.display()), None)
    })?;

    lock.package
        .into_iter()
        .map(|entry| {
            let source = classify_source(&entry.name, entry.source.as_deref())?;
            Ok(CargoLockedPackage {
                name: entry.name,
                version: entry.version,
                source,
                checksum: entry.checksum,
            })
        })
        .collect()
}

fn classify_source(name: &str, source: Option<&str>) -> Result<CargoPackageSource> {
    let Some(source) = source else {
        return Ok(CargoPackageSource::Local);
    };

    if let Some(rest) = source.strip_prefix("registry+") {
        if rest.starts_with("https://github.com/rust-lang/crates.io-index") {
            return Ok(CargoPackageSource::CratesIo);
        }
        return Err(HermetoError::unsupported_feature(
            format!("package '{name}' is pinned to a non-crates.io registry: {rest}"),
            "Only the crates.io registry is supported for hermetic prefetch.",
        ));
    }

    if let Some(rest) = source.strip_prefix("git+") {
        let (url, commit) = rest.rsplit_once('#').ok_or_else(|| {
            HermetoError::unexpected_format(format!(
                "git source for package '{name}' is missing a pinned commit: {source}"
            ))
        })?;
        let url = url.split('?').next().unwrap_or(url);
        return Ok(CargoPackageSource::Git {
            url: url.to_string(),
            commit: commit.to_string(),
        });
    }

    Err(HermetoError::unsupported_feature(
        format!("package '{name}' has an unrecognized Cargo.lock source: {source}"),
        "Only crates.io registry and git sources are supported.",
    ))
}

/// The workspace's main package, read from `Cargo.toml`, for building its
/// own SBOM component (spec.md §4.5 point 5). A virtual workspace manifest
/// (no `[package]` table) has no single main package name or version of its
/// own, so it falls back to the manifest directory's name with no version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CargoMainPackage {
    pub name: String,
    pub version: Option<String>,
}

pub fn resolve_main_package(cargo_toml_path: &Path) -> Result<CargoMainPackage> {
    let raw = read_to_string(cargo_toml_path)?;
    let manifest: CargoManifest = toml::from_str(&raw).map_err(|e| {
        HermetoError::package_rejected(
            format!("{} is not a valid Cargo.toml: {e}", cargo_toml_path.display()),
            None,
        )
    })?;

    if let Some(package) = manifest.package {
        return Ok(CargoMainPackage {
            name: package.name,
            version: package.version,
        });
    }

    if manifest.workspace.is_some() {
        let name = cargo_toml_path
            .parent()
            .and_then(|dir| dir.file_name())
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "workspace".to_string());
        return Ok(CargoMainPackage { name, version: None });
    }

    Err(HermetoError::unexpected_format(format!(
        "{} has neither a [package] nor a [workspace] table",
        cargo_toml_path.display()
    )))
}

#[derive(Debug, Deserialize)]
struct CargoManifest {
    package: Option<CargoManifestPackage>,
    workspace: Option<CargoManifestWorkspace>,
}

#[derive(Debug, Deserialize)]
struct CargoManifestPackage {
    name: String,
    version: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CargoManifestWorkspace {}
