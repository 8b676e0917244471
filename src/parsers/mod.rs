//! Lockfile parsers: each module reads one ecosystem's lockfile format and
//! produces a normalized list of locked packages. Parsers never touch the
//! network or the filesystem outside the package directory they're given;
//! resolving a locked package into a fetched, checksummed source tree is
//! the resolvers' job (see [`crate::resolvers`]).

pub mod bundler;
pub mod cargo_lock;
pub mod generic;
pub mod gomod;
pub mod npm;
pub mod pip;
pub mod rpm;

use std::path::Path;

use crate::error::{HermetoError, Result};

pub(crate) fn read_to_string(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        HermetoError::package_rejected(
            format!("cannot read {}: {e}", path.display()),
            Some(format!(
                "Make sure {} exists and is a lockfile this tool can parse.",
                path.display()
            )),
        )
    })
}
