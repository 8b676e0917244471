use std::path::{Component, Path, PathBuf};

use crate::error::{HermetoError, Result};

/// A path with an immovable root: every descent through
/// [`RootedPath::join_within_root`] is checked to still resolve (following
/// symlinks) inside `root`.
///
/// This is the only path type the downloader, parsers and resolvers are
/// allowed to use when touching a file whose name comes from lockfile data
/// or gets written as output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootedPath {
    root: PathBuf,
    subpath: PathBuf,
}

impl RootedPath {
    /// Construct a `RootedPath` at its own root. `root` must be absolute;
    /// relative or unresolved input is rejected.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_absolute() {
            return Err(HermetoError::invalid_input(format!(
                "RootedPath root must be absolute: {}",
                root.display()
            )));
        }
        Ok(Self {
            root,
            subpath: PathBuf::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The absolute path this value currently points at (`root/subpath`).
    pub fn path(&self) -> PathBuf {
        self.root.join(&self.subpath)
    }

    /// Join one or more relative components, canonicalizing the result
    /// (resolving `.`, `..` and symlinks) and rejecting the join if it would
    /// escape `root`. The join is checked lexically first (no `..` allowed
    /// to step above the root even before symlink resolution), then again
    /// after following symlinks, matching the "following symlinks" wording
    /// in the containment contract.
    pub fn join_within_root(&self, relative: impl AsRef<Path>) -> Result<Self> {
        let relative = relative.as_ref();
        let joined = self.root.join(&self.subpath).join(relative);
        let lexical = lexically_normalize(&joined);
        if !lexical.starts_with(&self.root) {
            return Err(HermetoError::path_outside_root(self.root.clone(), joined));
        }

        let resolved = resolve_following_symlinks(&lexical).unwrap_or(lexical.clone());
        let canonical_root =
            resolve_following_symlinks(&self.root).unwrap_or_else(|| self.root.clone());
        if !resolved.starts_with(&canonical_root) {
            return Err(HermetoError::path_outside_root(self.root.clone(), joined));
        }

        let subpath = lexical
            .strip_prefix(&self.root)
            .expect("checked above")
            .to_path_buf();

        Ok(Self {
            root: self.root.clone(),
            subpath,
        })
    }

    /// The path relative to `root`, guaranteed to contain no `..` component.
    pub fn subpath_from_root(&self) -> &Path {
        &self.subpath
    }

    pub fn exists(&self) -> bool {
        self.path().exists()
    }

    pub fn is_dir(&self) -> bool {
        self.path().is_dir()
    }
}

/// Resolve `.`/`..` components lexically without touching the filesystem.
/// Used so that an input like `foo/../../bar` is rejected even if the
/// intermediate directories don't exist yet (e.g. an output path we're about
/// to create).
fn lexically_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolve symlinks along the path, tolerating components that don't exist
/// yet (an output file we haven't created). Returns `None` only if an
/// existing ancestor directory can't be canonicalized for a reason other
/// than "not found" (e.g. a permissions error), in which case the caller
/// falls back to the lexical form.
fn resolve_following_symlinks(path: &Path) -> Option<PathBuf> {
    let mut existing = path;
    let mut missing_tail = Vec::new();
    loop {
        if existing.exists() {
            break;
        }
        match existing.file_name() {
            Some(name) => {
                missing_tail.push(name.to_owned());
                existing = existing.parent()?;
            }
            None => break,
        }
    }

    let canonical_existing = if existing.as_os_str().is_empty() {
        PathBuf::new()
    } else {
        std::fs::canonicalize(existing).ok()?
    };

    let mut resolved = canonical_existing;
    for component in missing_tail.into_iter().rev() {
        resolved.push(component);
    }
    Some(resolved)
}
