//! `Gemfile.lock` parsing, hand-written since no Ruby runtime is available
//! to shell out to a bundler helper script (see module-level Open
//! Question resolution in the design notes).

use std::path::Path;

use crate::error::{HermetoError, Result};

use super::read_to_string;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BundlerSource {
    Gem { remote: String },
    Git { remote: String, revision: String },
    /// A `PATH` section entry: a local gem, never fetched.
    Path,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BundlerLockedGem {
    pub name: String,
    pub version: String,
    pub source: BundlerSource,
}

pub fn parse(path: &Path) -> Result<Vec<BundlerLockedGem>> {
    let raw = read_to_string(path)?;
    let mut gems = Vec::new();

    let mut lines = raw.lines().peekable();
    while let Some(line) = lines.next() {
        match line.trim_end() {
            "GEM" => parse_source_block(&mut lines, &mut gems, |remote| BundlerSource::Gem {
                remote: remote.unwrap_or_default(),
            })?,
            "GIT" => parse_git_block(&mut lines, &mut gems)?,
            "PATH" => parse_source_block(&mut lines, &mut gems, |_| BundlerSource::Path)?,
            _ => {}
        }
    }

    if gems.is_empty() {
        return Err(HermetoError::package_rejected(
            format!("{} has no GEM, GIT or PATH sections with specs", path.display()),
            None,
        ));
    }

    Ok(gems)
}

fn parse_source_block<'a, I, F>(lines: &mut std::iter::Peekable<I>, gems: &mut Vec<BundlerLockedGem>, make_source: F) -> Result<()>
where
    I: Iterator<Item = &'a str>,
    F: Fn(Option<String>) -> BundlerSource,
{
    let mut remote = None;
    while let Some(line) = lines.peek() {
        let trimmed = line.trim();
        if line.is_empty() || !line.starts_with(' ') {
            break;
        }
        if let Some(rest) = trimmed.strip_prefix("remote: ") {
            remote = Some(rest.to_string());
            lines.next();
            continue;
        }
        if trimmed == "specs:" {
            lines.next();
            read_specs(lines, gems, || make_source(remote.clone()))?;
            break;
        }
        lines.next();
    }
    Ok(())
}

fn parse_git_block<'a, I>(lines: &mut std::iter::Peekable<I>, gems: &mut Vec<BundlerLockedGem>) -> Result<()>
where
    I: Iterator<Item = &'a str>,
{
    let mut remote = None;
    let mut revision = None;
    while let Some(line) = lines.peek() {
        let trimmed = line.trim();
        if line.is_empty() || !line.starts_with(' ') {
            break;
        }
        if let Some(rest) = trimmed.strip_prefix("remote: ") {
            remote = Some(rest.to_string());
            lines.next();
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("revision: ") {
            revision = Some(rest.to_string());
            lines.next();
            continue;
        }
        if trimmed == "specs:" {
            lines.next();
            let remote = remote.clone().unwrap_or_default();
            let revision = revision.clone().unwrap_or_default();
            read_specs(lines, gems, || BundlerSource::Git {
                remote: remote.clone(),
                revision: revision.clone(),
            })?;
            break;
        }
        lines.next();
    }
    Ok(())
}

/// Read `name (version)` spec lines (and their indented dependency lines,
/// which are skipped) until the block's indentation ends.
fn read_specs<'a, I, F>(lines: &mut std::iter::Peekable<I>, gems: &mut Vec<BundlerLockedGem>, make_source: F) -> Result<()>
where
    I: Iterator<Item = &'a str>,
    F: Fn() -> BundlerSource,
{
    while let Some(line) = lines.peek() {
        if line.is_empty() {
            break;
        }
        let indent = line.len() - line.trim_start().len();
        if indent < 4 {
            break;
        }
        let trimmed = line.trim();
        // Top-level specs are indented exactly 4 spaces; nested dependency
        // lines (>=6) describe a version constraint, not a locked gem.
        if indent == 4 {
            if let Some((name, version)) = parse_spec_line(trimmed) {
                gems.push(BundlerLockedGem {
                    name,
                    version,
                    source: make_source(),
                });
            }
        }
        lines.next();
    }
    Ok(())
}

fn parse_spec_line(line: &str) -> Option<(String, String)> {
    let (name, rest) = line.split_once(" (")?;
    let version = rest.strip_suffix(')')?;
    Some((name.trim().to_string(), version.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, content: &str) -> std::path::PathBuf {
        let path = dir.join("Gemfile.lock");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn parses_gem_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "GEM\n  remote: https://rubygems.org/\n  specs:\n    bar (1.0.0)\n      dep1 (~> 2.0)\n\nPLATFORMS\n  ruby\n\nDEPENDENCIES\n  bar\n",
        );
        let gems = parse(&path).unwrap();
        assert_eq!(gems.len(), 1);
        assert_eq!(gems[0].name, "bar");
        assert_eq!(gems[0].version, "1.0.0");
        assert_eq!(
            gems[0].source,
            BundlerSource::Gem {
                remote: "https://rubygems.org/".to_string()
            }
        );
    }

    #[test]
    fn parses_git_section_with_revision() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "GIT\n  remote: https://github.com/org/baz.git\n  revision: abc123\n  specs:\n    baz (0.1.0)\n\nPLATFORMS\n  ruby\n",
        );
        let gems = parse(&path).unwrap();
        assert_eq!(
            gems[0].source,
            BundlerSource::Git {
                remote: "https://github.com/org/baz.git".to_string(),
                revision: "abc123".to_string(),
            }
        );
    }

    #[test]
    fn rejects_lockfile_with_no_specs() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "PLATFORMS\n  ruby\n");
        let err = parse(&path).unwrap_err();
        assert!(matches!(err, HermetoError::PackageRejected { .. }));
    }
}
