//! Top-level fan-out: resolve every package in a [`Request`] and fold the
//! results into one [`RequestOutput`]. Packages are resolved one at a time,
//! in a deterministic order (sorted by package type name, then path), never
//! two at once — a single package's failure aborts the whole request, since
//! a partially-populated output directory would be silently wrong rather
//! than merely incomplete.

use tracing::info;

use crate::config::RuntimeConfig;
use crate::error::{HermetoError, Result};
use crate::models::input::{Flag, Request};
use crate::models::output::RequestOutput;
use crate::resolvers;

pub async fn resolve_packages(request: &Request, config: &RuntimeConfig) -> Result<RequestOutput> {
    info!(
        package_count = request.packages.len(),
        types = ?request.requested_types(),
        "resolving packages"
    );

    for r#type in request.requested_types() {
        if r#type.is_dev() && !request.has_flag(Flag::DevPackageManagers) {
            return Err(HermetoError::unsupported_feature(
                format!("package type '{}' is a development-only package manager", r#type.as_str()),
                "Pass the 'dev-package-managers' flag to opt into cargo/rpm prefetching.",
            ));
        }
    }

    let mut ordered: Vec<_> = request.packages.iter().collect();
    ordered.sort_by_key(|package| (package.r#type.as_str(), package.path.clone()));

    let mut result = RequestOutput::new();
    for package in ordered {
        let output = resolvers::resolve_package(request, package, config).await?;
        result.merge(output)?;
    }
    result.finalize_components();

    info!(component_count = result.components.len(), "finished resolving packages");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::models::input::{PackageInput, PackageType};

    #[tokio::test]
    async fn resolving_an_unreachable_npm_package_reports_a_package_rejected_error() {
        let source = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("package.json"), "{}").unwrap();
        // No package-lock.json present: npm resolution must fail cleanly
        // rather than the orchestrator panicking or hanging.
        let request = Request::new(
            source.path(),
            out.path(),
            vec![PackageInput::new(PackageType::Npm)],
            BTreeSet::new(),
        )
        .unwrap();
        let config = RuntimeConfig::default();
        let err = resolve_packages(&request, &config).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::HermetoError::PackageRejected { .. } | crate::error::HermetoError::FetchError { .. }
        ));
    }

    #[tokio::test]
    async fn cargo_is_rejected_without_the_dev_package_managers_flag() {
        let source = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let request = Request::new(
            source.path(),
            out.path(),
            vec![PackageInput::new(PackageType::Cargo)],
            BTreeSet::new(),
        )
        .unwrap();
        let config = RuntimeConfig::default();
        let err = resolve_packages(&request, &config).await.unwrap_err();
        assert!(matches!(err, crate::error::HermetoError::UnsupportedFeature { .. }));
    }
}
