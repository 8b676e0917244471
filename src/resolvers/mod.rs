//! One resolver per package manager: each takes a [`PackageInput`] plus
//! the shared [`Request`]/[`RuntimeConfig`], fetches and verifies the
//! locked sources under `output_dir/deps/<ecosystem>`, and returns the
//! SBOM components, environment variables and project files that package
//! contributes.

pub mod bundler;
pub mod cargo;
pub mod generic;
pub mod gomod;
pub mod npm;
pub mod pip;
pub mod rpm;
pub mod yarn;

use crate::config::RuntimeConfig;
use crate::error::{HermetoError, Result};
use crate::models::input::{PackageInput, PackageType, Request};
use crate::models::output::PackageOutput;
use crate::models::sbom::Component;
use crate::purl::PurlBuilder;
use crate::repo_id::RepoId;
use crate::rooted_path::RootedPath;

/// Dispatch a single package input to its resolver.
pub async fn resolve_package(
    request: &Request,
    package: &PackageInput,
    config: &RuntimeConfig,
) -> Result<PackageOutput> {
    match package.r#type {
        PackageType::Npm => npm::resolve(request, package, config).await,
        PackageType::Yarn => resolve_on_working_copy(request, package, config, false).await,
        PackageType::YarnClassic => resolve_on_working_copy(request, package, config, true).await,
        PackageType::Pip => pip::resolve(request, package, config).await,
        PackageType::Cargo => cargo::resolve(request, package, config).await,
        PackageType::Gomod => gomod::resolve(request, package, config).await,
        PackageType::Rpm => rpm::resolve(request, package, config).await,
        PackageType::Bundler => bundler::resolve(request, package, config).await,
        PackageType::Generic => generic::resolve(request, package, config).await,
    }
}

/// Yarn resolution runs against a scoped copy of `source_dir`: copy it into
/// a tempdir, resolve there, then rewrite the returned project files'
/// absolute paths back onto the real `source_dir`. The tempdir (and its
/// copy) is removed on every exit path via `TempDir`'s `Drop`, mirroring
/// the original's `contextlib`-managed scratch working copy.
async fn resolve_on_working_copy(
    request: &Request,
    package: &PackageInput,
    config: &RuntimeConfig,
    classic: bool,
) -> Result<PackageOutput> {
    let work_dir = tempfile::tempdir().map_err(|e| HermetoError::fetch_error(e.to_string()))?;
    copy_tree(&request.source_dir.path(), work_dir.path())?;

    let scoped_request = Request {
        source_dir: RootedPath::new(work_dir.path())?,
        output_dir: request.output_dir.clone(),
        packages: vec![package.clone()],
        flags: request.flags.clone(),
    };

    let mut output = yarn::resolve(&scoped_request, package, config, classic).await?;
    for project_file in output.project_files.iter_mut() {
        if let Ok(relative) = project_file.abspath.strip_prefix(work_dir.path()) {
            project_file.abspath = request.source_dir.path().join(relative);
        }
    }
    Ok(output)
}

fn copy_tree(src: &std::path::Path, dest: &std::path::Path) -> Result<()> {
    std::fs::create_dir_all(dest)
        .map_err(|e| HermetoError::fetch_error(format!("cannot create {}: {e}", dest.display())))?;
    let entries = std::fs::read_dir(src)
        .map_err(|e| HermetoError::fetch_error(format!("cannot read {}: {e}", src.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| HermetoError::fetch_error(format!("cannot read {}: {e}", src.display())))?;
        let file_type = entry
            .file_type()
            .map_err(|e| HermetoError::fetch_error(format!("cannot stat {}: {e}", entry.path().display())))?;
        let dest_path = dest.join(entry.file_name());
        if file_type.is_dir() {
            copy_tree(&entry.path(), &dest_path)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &dest_path)
                .map_err(|e| HermetoError::fetch_error(format!("cannot copy {}: {e}", entry.path().display())))?;
        }
        // Symlinks within the source tree are skipped: the working copy only
        // needs to reproduce the files yarn.lock resolution actually reads.
    }
    Ok(())
}

/// The `deps/<ecosystem>` directory a resolver downloads sources into,
/// created on first use.
pub(crate) fn deps_dir(request: &Request, ecosystem: &str) -> std::path::PathBuf {
    request.output_dir.path().join("deps").join(ecosystem)
}

pub(crate) fn ensure_dir(path: &std::path::Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| {
        crate::error::HermetoError::fetch_error(format!("cannot create {}: {e}", path.display()))
    })
}

/// Build the main package's own SBOM component per spec.md §4.5 point 5:
/// its purl carries a `vcs_url` qualifier built from the repository's
/// `RepoID`, with `package_dir`'s path relative to `source_dir` appended as
/// a subpath when the package isn't the repository root. Returns `None`
/// when `source_dir` isn't a git checkout (bare fixture directories in
/// tests, source trees extracted without `.git`) — there is no RepoID to
/// build the purl from, so no main-package component is emitted.
pub(crate) fn main_package_component(
    request: &Request,
    package_dir: &RootedPath,
    ecosystem: &str,
    name: &str,
    version: Option<&str>,
) -> Option<Component> {
    let repo_id = RepoId::from_source_repo(&request.source_dir.path()).ok()?;
    let subpath = package_dir.subpath_from_root();

    let mut builder = PurlBuilder::new(ecosystem, name.to_string())
        .maybe_version(version.map(str::to_string))
        .qualifier("vcs_url", repo_id.as_vcs_url_qualifier());
    if subpath != std::path::Path::new("") {
        builder = builder.subpath(subpath.to_string_lossy().to_string());
    }

    let mut component = Component::new(name.to_string(), builder.build());
    if let Some(version) = version {
        component = component.with_version(version.to_string());
    }
    Some(component)
}

/// A main package's name, derived from the repository origin's last path
/// segment, for ecosystems whose project metadata doesn't declare one
/// explicitly (e.g. a pip project with no `pyproject.toml`/`setup.cfg`).
pub(crate) fn repo_derived_name(repo_id: &RepoId) -> String {
    let trimmed = repo_id.canonical_url.trim_end_matches('/').trim_end_matches(".git");
    trimmed.rsplit('/').next().unwrap_or(trimmed).to_string()
}

/// A package's directory name, used as a last-resort main-package name when
/// neither project metadata nor a repository is available to name it from.
pub(crate) fn directory_name(package_dir: &RootedPath) -> String {
    package_dir
        .path()
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "package".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_tree_reproduces_nested_files() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("nested")).unwrap();
        std::fs::write(src.path().join("yarn.lock"), "lockfile contents\n").unwrap();
        std::fs::write(src.path().join("nested").join("file.txt"), "hi\n").unwrap();

        copy_tree(src.path(), dest.path()).unwrap();

        assert_eq!(
            std::fs::read_to_string(dest.path().join("yarn.lock")).unwrap(),
            "lockfile contents\n"
        );
        assert_eq!(
            std::fs::read_to_string(dest.path().join("nested").join("file.txt")).unwrap(),
            "hi\n"
        );
    }
}
