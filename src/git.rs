//! Git source materialization: clone a repository at a pinned commit and
//! package the checkout as a `.tar.gz`, the form the gomod and generic
//! resolvers archive vendored git dependencies in.

use std::fs::File;
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;
use git2::{FetchOptions, RemoteCallbacks, Repository};
use tar::Builder as TarBuilder;
use tracing::debug;

use crate::error::{HermetoError, Result};

/// Clone `url` at `commit` into a scratch checkout under `work_dir`, then
/// archive it as a gzipped tarball at `dest_tar_gz` with every entry nested
/// under a top-level `app/` directory. `work_dir` and `dest_tar_gz` are
/// both caller-owned; this function performs no cleanup of `work_dir`.
pub fn clone_as_tarball(
    url: &str,
    commit: &str,
    work_dir: &Path,
    dest_tar_gz: &Path,
) -> Result<()> {
    // Respected by libgit2's ssh/http transports; prevents a stuck
    // interactive credential prompt when the remote requires auth we don't
    // have.
    std::env::set_var("GIT_TERMINAL_PROMPT", "0");

    let checkout_path = work_dir.join("checkout");
    let repo = clone_bare_then_checkout(url, commit, &checkout_path)?;
    drop(repo);

    write_tarball(&checkout_path, dest_tar_gz)
}

fn clone_bare_then_checkout(url: &str, commit: &str, checkout_path: &Path) -> Result<Repository> {
    let repo = Repository::init(checkout_path).map_err(|e| {
        HermetoError::fetch_error(format!("failed to init scratch repo at {}: {e}", checkout_path.display()))
    })?;

    {
        let mut remote = repo
            .remote_anonymous(url)
            .map_err(|e| HermetoError::fetch_error(format!("invalid git remote '{url}': {e}")))?;

        let mut options = fetch_options(url);
        // commit-shaped revisions and tags/branches both resolve via this
        // refspec; the commit is located afterwards by rev-parse.
        remote
            .fetch(
                &["+refs/heads/*:refs/remotes/origin/*", "+refs/tags/*:refs/tags/*"],
                Some(&mut options),
                None,
            )
            .map_err(|e| {
                HermetoError::fetch_error(format!("git fetch of {url} failed: {e}"))
            })?;
    }

    let oid = repo
        .revparse_single(commit)
        .map_err(|e| {
            HermetoError::package_rejected(
                format!("commit '{commit}' not found in {url}: {e}"),
                Some("Check that the pinned commit or tag exists on the remote.".to_string()),
            )
        })?
        .id();

    let commit_obj = repo
        .find_commit(oid)
        .map_err(|e| HermetoError::fetch_error(format!("commit {oid} missing after fetch: {e}")))?;

    repo.checkout_tree(commit_obj.as_object(), None)
        .map_err(|e| HermetoError::fetch_error(format!("checkout of {commit} failed: {e}")))?;
    repo.set_head_detached(oid)
        .map_err(|e| HermetoError::fetch_error(format!("set_head_detached failed: {e}")))?;

    Ok(repo)
}

fn fetch_options(url: &str) -> FetchOptions<'static> {
    let mut callbacks = RemoteCallbacks::new();
    let url = url.to_string();
    callbacks.transfer_progress(move |stats| {
        debug!(
            git_url = %url,
            received_objects = stats.received_objects(),
            total_objects = stats.total_objects(),
            "git transfer progress"
        );
        true
    });

    let mut options = FetchOptions::new();
    options.remote_callbacks(callbacks);
    options
}

fn write_tarball(checkout_path: &Path, dest_tar_gz: &Path) -> Result<()> {
    let file = File::create(dest_tar_gz).map_err(|e| {
        HermetoError::fetch_error(format!("cannot create {}: {e}", dest_tar_gz.display()))
    })?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut archive = TarBuilder::new(encoder);

    archive
        .append_dir_all("app", checkout_path)
        .map_err(|e| HermetoError::fetch_error(format!("failed to build tarball: {e}")))?;

    archive
        .into_inner()
        .and_then(|enc| enc.finish())
        .map_err(|e| HermetoError::fetch_error(format!("failed to finalize tarball: {e}")))?;

    Ok(())
}

/// Root-relative path git archives are nested under; resolvers computing
/// extraction paths use this rather than re-deriving the literal.
pub const TARBALL_ROOT: &str = "app";

/// Resolve a Go main module's version from its repository's tags, per
/// spec.md §4.5.1:
/// 1. the highest semver tag pointing directly at `HEAD` whose major version
///    matches the module path's `/vN` suffix (if any),
/// 2. otherwise a pseudo-version built from the highest reachable tag with a
///    matching major, or `vN.0.0-<timestamp>-<hash>` if none exists.
pub fn resolve_main_module_version(repo_dir: &Path, module_path: &str) -> Result<String> {
    let repo = Repository::discover(repo_dir)
        .map_err(|e| HermetoError::fetch_error(format!("cannot discover git repository at {}: {e}", repo_dir.display())))?;
    let head = repo
        .head()
        .and_then(|h| h.peel_to_commit())
        .map_err(|e| HermetoError::fetch_error(format!("repository at {} has no HEAD commit: {e}", repo_dir.display())))?;

    let declared_major = module_major_suffix(module_path);

    let mut tagged: Vec<(SemVer, git2::Oid)> = Vec::new();
    repo.tag_foreach(|oid, name_bytes| {
        if let Ok(name) = std::str::from_utf8(name_bytes) {
            if let Some(tag_name) = name.strip_prefix("refs/tags/") {
                if let Some(version) = SemVer::parse(tag_name) {
                    if major_matches(&version, declared_major) {
                        if let Ok(obj) = repo.find_object(oid, None) {
                            if let Ok(peeled) = obj.peel(git2::ObjectType::Commit) {
                                tagged.push((version, peeled.id()));
                            }
                        }
                    }
                }
            }
        }
        true
    })
    .map_err(|e| HermetoError::fetch_error(format!("failed walking tags in {}: {e}", repo_dir.display())))?;

    let at_head = tagged
        .iter()
        .filter(|(_, oid)| *oid == head.id())
        .map(|(version, _)| version)
        .max();
    if let Some(version) = at_head {
        return Ok(version.to_string());
    }

    let mut revwalk = repo
        .revwalk()
        .map_err(|e| HermetoError::fetch_error(format!("failed walking history in {}: {e}", repo_dir.display())))?;
    revwalk
        .push(head.id())
        .map_err(|e| HermetoError::fetch_error(format!("failed walking history in {}: {e}", repo_dir.display())))?;
    let reachable: std::collections::HashSet<git2::Oid> = revwalk.filter_map(|r| r.ok()).collect();

    let reachable_base = tagged
        .iter()
        .filter(|(_, oid)| reachable.contains(oid))
        .map(|(version, _)| version)
        .max();

    let ts = format_utc_timestamp(head.time().seconds());
    let hash12 = &head.id().to_string()[..12];

    Ok(match reachable_base {
        Some(version) if version.prerelease.is_none() => {
            format!("v{}.{}.{}-0.{ts}-{hash12}", version.major, version.minor, version.patch)
        }
        Some(version) => {
            format!("v{}.{}.{}-pre.0.{ts}-{hash12}", version.major, version.minor, version.patch)
        }
        None => format!("v{}.0.0-{ts}-{hash12}", declared_major.unwrap_or(0)),
    })
}

fn module_major_suffix(module_path: &str) -> Option<u64> {
    let last = module_path.rsplit('/').next()?;
    last.strip_prefix('v')?.parse::<u64>().ok().filter(|&n| n >= 2)
}

fn major_matches(version: &SemVer, declared_major: Option<u64>) -> bool {
    match declared_major {
        Some(m) => version.major == m,
        None => version.major == 0 || version.major == 1,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct SemVer {
    major: u64,
    minor: u64,
    patch: u64,
    prerelease: Option<String>,
}

impl SemVer {
    fn parse(tag: &str) -> Option<Self> {
        let rest = tag.strip_prefix('v')?;
        let (core, prerelease) = match rest.split_once('-') {
            Some((c, p)) => (c, Some(p.split('+').next().unwrap_or(p).to_string())),
            None => (rest.split('+').next().unwrap_or(rest), None),
        };
        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self { major, minor, patch, prerelease })
    }
}

impl std::fmt::Display for SemVer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

impl PartialOrd for SemVer {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SemVer {
    /// A release (no prerelease suffix) outranks a prerelease at the same
    /// `major.minor.patch`; this crate doesn't otherwise order prerelease
    /// identifiers against each other.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.major, self.minor, self.patch, self.prerelease.is_none())
            .cmp(&(other.major, other.minor, other.patch, other.prerelease.is_none()))
    }
}

/// UTC `yyyymmddhhmmss` timestamp from a Unix time, using Howard Hinnant's
/// `civil_from_days` algorithm (no calendar crate is in the dependency
/// stack this crate draws from).
fn format_utc_timestamp(unix_seconds: i64) -> String {
    let days = unix_seconds.div_euclid(86400);
    let secs_of_day = unix_seconds.rem_euclid(86400);
    let (year, month, day) = civil_from_days(days);
    let hour = secs_of_day / 3600;
    let minute = (secs_of_day % 3600) / 60;
    let second = secs_of_day % 60;
    format!("{year:04}{month:02}{day:02}{hour:02}{minute:02}{second:02}")
}

fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tarball_root_is_app() {
        assert_eq!(TARBALL_ROOT, "app");
    }

    #[test]
    fn semver_parse_round_trips_release_and_prerelease() {
        assert_eq!(SemVer::parse("v1.2.3").unwrap().to_string(), "v1.2.3");
        assert_eq!(SemVer::parse("v1.2.3-rc.1").unwrap().to_string(), "v1.2.3-rc.1");
        assert!(SemVer::parse("not-a-version").is_none());
    }

    #[test]
    fn release_outranks_prerelease_at_same_version() {
        let release = SemVer::parse("v1.0.0").unwrap();
        let prerelease = SemVer::parse("v1.0.0-rc.1").unwrap();
        assert!(release > prerelease);
    }

    #[test]
    fn format_utc_timestamp_matches_known_instant() {
        // 2024-01-02T03:04:05Z
        assert_eq!(format_utc_timestamp(1704164645), "20240102030405");
    }

    #[test]
    fn main_module_version_prefers_tag_pointing_at_head() {
        let repo_dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(repo_dir.path()).unwrap();
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        std::fs::write(repo_dir.path().join("go.mod"), "module example.com/foo\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("go.mod")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let commit = repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
        repo.tag_lightweight("v1.2.3", &repo.find_object(commit, None).unwrap(), false)
            .unwrap();

        let version = resolve_main_module_version(repo_dir.path(), "example.com/foo").unwrap();
        assert_eq!(version, "v1.2.3");
    }

    #[test]
    fn main_module_version_falls_back_to_pseudo_version_without_a_tag() {
        let repo_dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(repo_dir.path()).unwrap();
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        std::fs::write(repo_dir.path().join("go.mod"), "module example.com/foo\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("go.mod")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();

        let version = resolve_main_module_version(repo_dir.path(), "example.com/foo").unwrap();
        assert!(version.starts_with("v0.0.0-"));
    }

    #[test]
    fn clone_rejects_unresolvable_commit() {
        let work_dir = tempfile::tempdir().unwrap();
        let repo_dir = tempfile::tempdir().unwrap();
        Repository::init(repo_dir.path()).unwrap();

        let dest = work_dir.path().join("out.tar.gz");
        let err = clone_as_tarball(
            &repo_dir.path().to_string_lossy(),
            "deadbeefdeadbeefdeadbeefdeadbeefdeadbeef",
            work_dir.path(),
            &dest,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            HermetoError::FetchError { .. } | HermetoError::PackageRejected { .. }
        ));
    }
}
