//! `rpms.lock.yaml` parsing, following the `RedhatRpmsLock` schema this
//! tool's reimplemented system validates against.

use std::path::Path;

use serde::Deserialize;

use crate::error::{HermetoError, Result};

use super::read_to_string;

const SUPPORTED_LOCKFILE_VERSION: u32 = 1;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct RpmLockFile {
    #[serde(rename = "lockfileVersion")]
    pub lockfile_version: u32,
    #[serde(rename = "lockfileVendor")]
    pub lockfile_vendor: String,
    pub arches: Vec<RpmArch>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct RpmArch {
    pub arch: String,
    #[serde(default)]
    pub packages: Vec<RpmLockedPackage>,
    #[serde(default)]
    pub source: Vec<RpmLockedPackage>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct RpmLockedPackage {
    pub url: String,
    pub repoid: String,
    pub size: u64,
    pub checksum: String,
    #[serde(default)]
    pub name: Option<String>,
}

pub fn parse(path: &Path) -> Result<RpmLockFile> {
    let raw = read_to_string(path)?;
    let lock: RpmLockFile = serde_yml::from_str(&raw).map_err(|e| {
        HermetoError::package_rejected(format!("{} is not a valid rpms.lock.yaml: {e}", path.display()), None)
    })?;

    if lock.lockfile_vendor != "redhat" {
        return Err(HermetoError::unsupported_feature(
            format!("unsupported lockfileVendor '{}'", lock.lockfile_vendor),
            "Only the 'redhat' rpm lockfile vendor is supported.",
        ));
    }
    if lock.lockfile_version != SUPPORTED_LOCKFILE_VERSION {
        return Err(HermetoError::unsupported_feature(
            format!("unsupported lockfileVersion {}", lock.lockfile_version),
            format!("Only lockfileVersion {SUPPORTED_LOCKFILE_VERSION} is supported."),
        ));
    }

    for arch in &lock.arches {
        for package in arch.packages.iter().chain(arch.source.iter()) {
            crate::checksum::ChecksumInfo::parse_specifier(&package.checksum)?;
        }
    }

    Ok(lock)
}
