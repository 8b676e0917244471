//! `go.mod` / `go.sum` parsing: locked module versions, their `go.sum`
//! hashes, and `replace` directives (both local-path and module-to-module
//! forms).

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{HermetoError, Result};

use super::read_to_string;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GoModule {
    pub path: String,
    pub version: String,
}

/// The right-hand side of a `replace` directive: either another module at a
/// pinned version, or a local filesystem path (relative to the `go.mod`
/// that declares it).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplaceTarget {
    LocalPath(String),
    Module { path: String, version: String },
}

/// `replace OLD_PATH [OLD_VERSION] => NEW` — redirects one module
/// requirement to a different source without changing the requirement
/// itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplaceDirective {
    pub old_path: String,
    pub old_version: Option<String>,
    pub new: ReplaceTarget,
}

impl ReplaceDirective {
    /// Whether this directive applies to a given required `(path, version)`
    /// pair: the old path must match, and the old version (if the directive
    /// pins one) must match too.
    pub fn applies_to(&self, path: &str, version: &str) -> bool {
        self.old_path == path && self.old_version.as_deref().is_none_or(|v| v == version)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GoModFile {
    pub module: String,
    pub go_version: Option<String>,
    pub requires: Vec<GoModule>,
    pub replaces: Vec<ReplaceDirective>,
}

impl GoModFile {
    /// The effective target for a required module: the `replace` directive
    /// that applies to it, if any.
    pub fn replacement_for(&self, module: &GoModule) -> Option<&ReplaceDirective> {
        self.replaces.iter().find(|r| r.applies_to(&module.path, &module.version))
    }
}

pub fn parse_go_mod(path: &Path) -> Result<GoModFile> {
    let raw = read_to_string(path)?;
    let mut file = GoModFile::default();
    let mut in_require_block = false;
    let mut in_replace_block = false;

    for raw_line in raw.lines() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("module ") {
            file.module = rest.trim().to_string();
            continue;
        }
        if let Some(rest) = line.strip_prefix("go ") {
            file.go_version = Some(rest.trim().to_string());
            continue;
        }
        if line == "require (" {
            in_require_block = true;
            continue;
        }
        if in_require_block && line == ")" {
            in_require_block = false;
            continue;
        }
        if in_require_block {
            if let Some(module) = parse_require_line(line) {
                file.requires.push(module);
            }
            continue;
        }
        if line == "replace (" {
            in_replace_block = true;
            continue;
        }
        if in_replace_block && line == ")" {
            in_replace_block = false;
            continue;
        }
        if in_replace_block {
            if let Some(replace) = parse_replace_line(line) {
                file.replaces.push(replace);
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("require ") {
            if let Some(module) = parse_require_line(rest) {
                file.requires.push(module);
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("replace ") {
            if let Some(replace) = parse_replace_line(rest) {
                file.replaces.push(replace);
            }
        }
    }

    if file.module.is_empty() {
        return Err(HermetoError::package_rejected(
            format!("{} has no 'module' directive", path.display()),
            None,
        ));
    }

    Ok(file)
}

fn parse_require_line(line: &str) -> Option<GoModule> {
    let line = line.trim().trim_end_matches("// indirect").trim();
    let mut parts = line.split_whitespace();
    let module_path = parts.next()?.to_string();
    let version = parts.next()?.to_string();
    Some(GoModule {
        path: module_path,
        version,
    })
}

/// `OLD_PATH [OLD_VERSION] => NEW_PATH [NEW_VERSION]`. The new side is a
/// local path (no version follows) when it starts with `./`, `../`, or `/`;
/// otherwise it's a module path and must carry a version.
fn parse_replace_line(line: &str) -> Option<ReplaceDirective> {
    let (left, right) = line.split_once("=>")?;
    let mut left_parts = left.split_whitespace();
    let old_path = left_parts.next()?.to_string();
    let old_version = left_parts.next().map(|s| s.to_string());

    let mut right_parts = right.split_whitespace();
    let new_path = right_parts.next()?;
    let new = if new_path.starts_with("./") || new_path.starts_with("../") || new_path.starts_with('/') {
        ReplaceTarget::LocalPath(new_path.to_string())
    } else {
        let new_version = right_parts.next()?.to_string();
        ReplaceTarget::Module {
            path: new_path.to_string(),
            version: new_version,
        }
    };

    Some(ReplaceDirective {
        old_path,
        old_version,
        new,
    })
}

fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// `module version hash` or `module version/go.mod hash` lines from
/// `go.sum`, keyed by `(module, version)` with the `/go.mod` suffix
/// stripped off the version so both hash kinds for a module land together.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GoSumEntry {
    pub h1_hash: Option<String>,
    pub go_mod_h1_hash: Option<String>,
}

pub fn parse_go_sum(path: &Path) -> Result<BTreeMap<(String, String), GoSumEntry>> {
    let raw = read_to_string(path)?;
    let mut entries: BTreeMap<(String, String), GoSumEntry> = BTreeMap::new();

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let module = parts
            .next()
            .ok_or_else(|| HermetoError::unexpected_format(format!("malformed go.sum line: '{line}'")))?;
        let version_field = parts
            .next()
            .ok_or_else(|| HermetoError::unexpected_format(format!("malformed go.sum line: '{line}'")))?;
        let hash = parts
            .next()
            .ok_or_else(|| HermetoError::unexpected_format(format!("malformed go.sum line: '{line}'")))?;

        let (version, is_go_mod_hash) = match version_field.strip_suffix("/go.mod") {
            Some(v) => (v, true),
            None => (version_field, false),
        };

        let entry = entries
            .entry((module.to_string(), version.to_string()))
            .or_default();
        if is_go_mod_hash {
            entry.go_mod_h1_hash = Some(hash.to_string());
        } else {
            entry.h1_hash = Some(hash.to_string());
        }
    }

    Ok(entries)
}

/// A module recorded in `vendor/modules.txt`, used to verify a pre-built
/// vendor directory matches `go.mod` when `gomod-vendor-check` is set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VendoredModule {
    pub path: String,
    pub version: String,
}

pub fn parse_vendor_modules_txt(path: &Path) -> Result<Vec<VendoredModule>> {
    let raw = read_to_string(path)?;
    let mut modules = Vec::new();
    for line in raw.lines() {
        let Some(rest) = line.strip_prefix("# ") else {
            continue;
        };
        let mut parts = rest.split_whitespace();
        let Some(module_path) = parts.next() else {
            continue;
        };
        let Some(version) = parts.next() else {
            continue;
        };
        if !version.starts_with('v') {
            continue; // "## explicit" and similar annotation lines
        }
        modules.push(VendoredModule {
            path: module_path.to_string(),
            version: version.to_string(),
        });
    }
    Ok(modules)
}
