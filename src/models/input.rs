use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{HermetoError, Result};
use crate::rooted_path::RootedPath;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Flag {
    CgoDisable,
    ForceGomodTidy,
    GomodVendor,
    GomodVendorCheck,
    DevPackageManagers,
}

impl Flag {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "cgo-disable" => Ok(Self::CgoDisable),
            "force-gomod-tidy" => Ok(Self::ForceGomodTidy),
            "gomod-vendor" => Ok(Self::GomodVendor),
            "gomod-vendor-check" => Ok(Self::GomodVendorCheck),
            "dev-package-managers" => Ok(Self::DevPackageManagers),
            other => Err(HermetoError::invalid_input(format!("unknown flag: {other}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PackageType {
    Bundler,
    Cargo,
    Generic,
    Gomod,
    Npm,
    Pip,
    Rpm,
    Yarn,
    YarnClassic,
}

impl PackageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bundler => "bundler",
            Self::Cargo => "cargo",
            Self::Generic => "generic",
            Self::Gomod => "gomod",
            Self::Npm => "npm",
            Self::Pip => "pip",
            Self::Rpm => "rpm",
            Self::Yarn => "yarn",
            Self::YarnClassic => "yarn-classic",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "bundler" => Ok(Self::Bundler),
            "cargo" => Ok(Self::Cargo),
            "generic" => Ok(Self::Generic),
            "gomod" => Ok(Self::Gomod),
            "npm" => Ok(Self::Npm),
            "pip" => Ok(Self::Pip),
            "rpm" => Ok(Self::Rpm),
            "yarn" => Ok(Self::Yarn),
            "yarn-classic" => Ok(Self::YarnClassic),
            other => Err(HermetoError::invalid_input(format!(
                "unknown package type: {other}"
            ))),
        }
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, Self::Cargo | Self::Rpm)
    }
}

/// Structured DNF/SSL options carried by an `rpm` package input.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RpmOptions {
    pub ssl_verify: bool,
    pub repo_ids: Vec<String>,
}

/// A single entry of the `packages` list in a [`Request`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageInput {
    pub r#type: PackageType,
    pub path: PathBuf,
    pub requirements_files: Option<Vec<PathBuf>>,
    pub requirements_build_files: Option<Vec<PathBuf>>,
    pub allow_binary: bool,
    pub rpm_options: RpmOptions,
}

impl PackageInput {
    pub fn new(r#type: PackageType) -> Self {
        Self {
            r#type,
            path: PathBuf::from("."),
            requirements_files: None,
            requirements_build_files: None,
            allow_binary: false,
            rpm_options: RpmOptions::default(),
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    fn validate_path(&self) -> Result<()> {
        if self.path.is_absolute() {
            return Err(HermetoError::invalid_input(format!(
                "package path must be relative: {}",
                self.path.display()
            )));
        }
        if self.path.components().any(|c| c.as_os_str() == "..") {
            return Err(HermetoError::invalid_input(format!(
                "package path contains '..': {}",
                self.path.display()
            )));
        }
        Ok(())
    }
}

/// Immutable per-invocation request: the single input every resolver and
/// the orchestrator consume.
#[derive(Clone, Debug)]
pub struct Request {
    pub source_dir: RootedPath,
    pub output_dir: RootedPath,
    pub packages: Vec<PackageInput>,
    pub flags: BTreeSet<Flag>,
}

impl Request {
    /// Build and fully validate a `Request`. `source_dir`/`output_dir` are
    /// resolved to absolute, canonical paths; `packages` are de-duplicated
    /// by `(type, path)`, rejecting conflicting duplicates; every package
    /// path is checked to exist as a directory under `source_dir` without
    /// escaping it (even via symlinks).
    pub fn new(
        source_dir: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
        packages: Vec<PackageInput>,
        flags: BTreeSet<Flag>,
    ) -> Result<Self> {
        let source_dir = resolve_absolute(source_dir.as_ref())?;
        let output_dir = resolve_absolute(output_dir.as_ref())?;

        if packages.is_empty() {
            return Err(HermetoError::invalid_input("packages cannot be empty"));
        }

        let packages = dedupe_packages(packages)?;

        let source_root = RootedPath::new(source_dir)?;
        for package in &packages {
            package.validate_path()?;
            let abspath = source_root.join_within_root(&package.path)?;
            if !abspath.is_dir() {
                return Err(HermetoError::invalid_input(format!(
                    "package path does not exist (or is not a directory): {}",
                    package.path.display()
                )));
            }
        }

        Ok(Self {
            source_dir: source_root,
            output_dir: RootedPath::new(output_dir)?,
            packages,
            flags,
        })
    }

    pub fn has_flag(&self, flag: Flag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn packages_of_type(&self, r#type: PackageType) -> impl Iterator<Item = &PackageInput> {
        self.packages.iter().filter(move |p| p.r#type == r#type)
    }

    pub fn requested_types(&self) -> BTreeSet<PackageType> {
        self.packages.iter().map(|p| p.r#type).collect()
    }
}

fn resolve_absolute(path: &Path) -> Result<PathBuf> {
    if !path.is_absolute() {
        return Err(HermetoError::invalid_input(format!(
            "path must be absolute: {}",
            path.display()
        )));
    }
    path.canonicalize().map_err(|e| {
        HermetoError::invalid_input(format!("failed to resolve path {}: {e}", path.display()))
    })
}

fn dedupe_packages(packages: Vec<PackageInput>) -> Result<Vec<PackageInput>> {
    let mut seen: Vec<PackageInput> = Vec::new();
    for package in packages {
        let existing = seen
            .iter()
            .find(|p| p.r#type == package.r#type && p.path == package.path);
        match existing {
            Some(existing) if existing == &package => {}
            Some(_) => {
                return Err(HermetoError::invalid_input(format!(
                    "conflicting duplicate package input for type={:?} path={}",
                    package.r#type,
                    package.path.display()
                )));
            }
            None => seen.push(package),
        }
    }
    Ok(seen)
}
