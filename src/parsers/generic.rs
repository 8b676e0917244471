//! `cachi2_generic.yaml` parsing: a flat list of arbitrary URLs to fetch
//! and verify, with no dependency graph or package-manager semantics.

use std::path::Path;

use serde::Deserialize;

use crate::error::{HermetoError, Result};

use super::read_to_string;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct GenericLockedArtifact {
    pub download_url: String,
    #[serde(default)]
    pub target: Option<String>,
    pub checksum: String,
}

#[derive(Clone, Debug, Deserialize, Default, PartialEq, Eq)]
pub struct GenericLockFile {
    #[serde(default)]
    pub artifacts: Vec<GenericLockedArtifact>,
}

pub fn parse(path: &Path) -> Result<GenericLockFile> {
    let raw = read_to_string(path)?;
    let lock: GenericLockFile = serde_yml::from_str(&raw).map_err(|e| {
        HermetoError::package_rejected(
            format!("{} is not a valid cachi2_generic.yaml: {e}", path.display()),
            None,
        )
    })?;

    for artifact in &lock.artifacts {
        crate::checksum::ChecksumInfo::parse_specifier(&artifact.checksum)?;
    }

    Ok(lock)
}
