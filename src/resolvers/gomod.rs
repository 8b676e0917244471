use std::collections::BTreeMap;

use crate::config::RuntimeConfig;
use crate::dirhash;
use crate::error::{HermetoError, Result};
use crate::fetcher::{self, DownloadSpec};
use crate::models::input::{Flag, PackageInput, Request};
use crate::models::output::{EnvironmentVariable, PackageOutput, ProjectFile};
use crate::models::sbom::Component;
use crate::parsers::gomod::{self, GoSumEntry, ReplaceTarget};
use crate::purl::PurlBuilder;
use crate::rooted_path::RootedPath;

use super::{deps_dir, ensure_dir};

const GOPROXY: &str = "https://proxy.golang.org";

pub async fn resolve(request: &Request, package: &PackageInput, config: &RuntimeConfig) -> Result<PackageOutput> {
    let package_dir = request.source_dir.join_within_root(&package.path)?;
    let go_mod_path = package_dir.path().join("go.mod");
    let go_sum_path = package_dir.path().join("go.sum");

    let go_mod = gomod::parse_go_mod(&go_mod_path)?;

    if !go_sum_path.exists() {
        return Err(HermetoError::package_rejected(
            format!("{} has no go.sum", package_dir.path().display()),
            Some("Run 'go mod tidy' to generate go.sum.".to_string()),
        ));
    }
    let go_sum = gomod::parse_go_sum(&go_sum_path)?;

    if request.has_flag(Flag::GomodVendorCheck) {
        verify_vendor_consistency(&package_dir.path().join("vendor").join("modules.txt"), &go_mod)?;
    }

    let dest_dir = deps_dir(request, "gomod");
    ensure_dir(&dest_dir)?;

    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(config.insecure_skip_tls_verify)
        .build()
        .map_err(|e| HermetoError::fetch_error(format!("failed to build HTTP client: {e}")))?;

    let mut output = PackageOutput::new();

    // The main module itself never comes from the proxy: its version is
    // read off the repository's tags, and its packages off the working
    // tree, per spec.md §4.5.1.
    let main_version = crate::git::resolve_main_module_version(&package_dir.path(), &go_mod.module)
        .unwrap_or_else(|_| "v0.0.0".to_string());
    output.components.push(main_module_component(&go_mod.module, &main_version));
    for dir in dirhash::list_package_relative_dirs_fs(&package_dir.path())? {
        let import_path = join_import_path(&go_mod.module, &dir);
        output
            .components
            .push(package_component(&import_path, Some(&main_version)));
    }

    for module in &go_mod.requires {
        match go_mod.replacement_for(module) {
            Some(replace) => match &replace.new {
                ReplaceTarget::LocalPath(rel) => {
                    output.components.extend(resolve_local_replace(&package_dir, &go_mod.module, rel)?);
                }
                ReplaceTarget::Module { path, version } => {
                    let resolved = resolve_module(&client, &dest_dir, path, version, &go_sum, config).await?;
                    output.components.push(resolved.module);
                    output.components.extend(resolved.packages);
                }
            },
            None => {
                let resolved = resolve_module(&client, &dest_dir, &module.path, &module.version, &go_sum, config).await?;
                output.components.push(resolved.module);
                output.components.extend(resolved.packages);
            }
        }
    }

    let mut env_vars = vec![
        EnvironmentVariable::path("GOMODCACHE", "${output_dir}/deps/gomod"),
        EnvironmentVariable::literal("GOFLAGS", "-mod=mod"),
    ];
    if request.has_flag(Flag::CgoDisable) {
        env_vars.push(EnvironmentVariable::literal("CGO_ENABLED", "0"));
    }
    for env_var in env_vars {
        output = output.with_environment_variable(env_var);
    }

    if request.has_flag(Flag::GomodVendor) {
        output = output.with_project_file(ProjectFile::new(
            package_dir.path().join(".go-vendor-marker"),
            "vendor",
        ));
    }

    Ok(output)
}

struct ResolvedModule {
    module: Component,
    packages: Vec<Component>,
}

async fn resolve_module(
    client: &reqwest::Client,
    dest_dir: &std::path::Path,
    module_path: &str,
    version: &str,
    go_sum: &BTreeMap<(String, String), GoSumEntry>,
    config: &RuntimeConfig,
) -> Result<ResolvedModule> {
    let entry = go_sum.get(&(module_path.to_string(), version.to_string()));
    let Some(entry) = entry else {
        return Err(HermetoError::package_rejected(
            format!("go.sum has no entry for {module_path} {version}"),
            None,
        ));
    };

    let escaped = escape_module_path(module_path);
    let zip_url = format!("{GOPROXY}/{escaped}/@v/{}.zip", escape_version(version));
    let mod_url = format!("{GOPROXY}/{escaped}/@v/{}.mod", escape_version(version));

    let zip_dest = dest_dir.join(format!("{}-{version}.zip", module_path.replace('/', "-")));
    fetcher::get_file(client, &DownloadSpec::new(zip_url.clone(), zip_dest.clone()), config).await?;

    if let Some(expected) = &entry.h1_hash {
        let computed = dirhash::hash1_zip(&zip_dest, module_path, version)?;
        if &computed != expected {
            return Err(HermetoError::package_rejected(
                format!("{module_path}@{version} zip hash mismatch: go.sum says {expected}, computed {computed}"),
                Some("The module content does not match go.sum; this would also fail 'go mod verify'.".to_string()),
            ));
        }
    }

    if let Some(expected_go_mod_hash) = &entry.go_mod_h1_hash {
        let mod_dest = dest_dir.join(format!("{}-{version}.mod", module_path.replace('/', "-")));
        fetcher::get_file(client, &DownloadSpec::new(mod_url, mod_dest.clone()), config).await?;
        let data = std::fs::read(&mod_dest)
            .map_err(|e| HermetoError::fetch_error(format!("cannot read {}: {e}", mod_dest.display())))?;
        let computed = dirhash::hash1_go_mod(module_path, version, &data);
        if &computed != expected_go_mod_hash {
            return Err(HermetoError::package_rejected(
                format!("{module_path}@{version} go.mod hash mismatch"),
                None,
            ));
        }
    }

    let module = Component::new(module_path.to_string(), module_purl(module_path, Some(version)))
        .with_version(version.to_string())
        .with_external_reference(zip_url);

    let mut packages = Vec::new();
    for dir in dirhash::list_package_relative_dirs(&zip_dest, module_path, version)? {
        let import_path = join_import_path(module_path, &dir);
        packages.push(package_component(&import_path, Some(version)));
    }

    Ok(ResolvedModule { module, packages })
}

/// A local `replace` target never goes through the proxy and carries no
/// version of its own: only its packages (recomputed under the main
/// module's import path) are recorded, not a `?type=module` component.
fn resolve_local_replace(package_dir: &RootedPath, main_module: &str, rel: &str) -> Result<Vec<Component>> {
    let target_dir = package_dir.join_within_root(rel)?;
    let normalized = normalize_local_replace_path(rel);
    let real_import_base = join_import_path(main_module, &normalized);

    let mut packages = Vec::new();
    for dir in dirhash::list_package_relative_dirs_fs(&target_dir.path())? {
        let import_path = join_import_path(&real_import_base, &dir);
        packages.push(package_component(&import_path, None));
    }
    Ok(packages)
}

/// Join an import path with a package subdirectory (or leave it alone when
/// `dir` is the module/replacement root, represented as `""`).
fn join_import_path(base: &str, dir: &str) -> String {
    if dir.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{dir}")
    }
}

/// Normalize a local `replace` target's relative path (`./vendored/net`,
/// `../sibling`) by dropping `.` segments and resolving `..` against the
/// path built so far, so it can be joined onto the main module's path to
/// recompute the replaced packages' real import path.
fn normalize_local_replace_path(rel: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for segment in rel.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out.join("/")
}

fn main_module_component(module_path: &str, version: &str) -> Component {
    Component::new(module_path.to_string(), module_purl(module_path, Some(version))).with_version(version.to_string())
}

fn module_purl(module_path: &str, version: Option<&str>) -> String {
    PurlBuilder::new("golang", module_path.to_string())
        .maybe_version(version.map(str::to_string))
        .qualifier("type", "module")
        .build()
}

fn package_component(import_path: &str, version: Option<&str>) -> Component {
    let purl = PurlBuilder::new("golang", import_path.to_string())
        .maybe_version(version.map(str::to_string))
        .qualifier("type", "package")
        .build();
    let mut component = Component::new(import_path.to_string(), purl);
    if let Some(version) = version {
        component = component.with_version(version.to_string());
    }
    component
}

fn verify_vendor_consistency(modules_txt: &std::path::Path, go_mod: &gomod::GoModFile) -> Result<()> {
    if !modules_txt.exists() {
        return Err(HermetoError::package_rejected(
            "gomod-vendor-check was requested but vendor/modules.txt is missing",
            Some("Run 'go mod vendor' first.".to_string()),
        ));
    }
    let vendored = gomod::parse_vendor_modules_txt(modules_txt)?;
    for module in &go_mod.requires {
        let found = vendored.iter().any(|v| v.path == module.path && v.version == module.version);
        if !found {
            return Err(HermetoError::package_rejected(
                format!(
                    "vendor/modules.txt is out of sync with go.mod: {} {} is missing",
                    module.path, module.version
                ),
                Some("Run 'go mod vendor' to regenerate the vendor directory.".to_string()),
            ));
        }
    }
    Ok(())
}

/// Go module proxy path escaping: every uppercase letter is replaced with
/// `!` followed by its lowercase form.
fn escape_module_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        if c.is_ascii_uppercase() {
            out.push('!');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn escape_version(version: &str) -> String {
    escape_module_path(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_uppercase_module_path_segments() {
        assert_eq!(escape_module_path("github.com/BurntSushi/toml"), "github.com/!burnt!sushi/toml");
    }

    #[test]
    fn leaves_lowercase_paths_untouched() {
        assert_eq!(escape_module_path("golang.org/x/net"), "golang.org/x/net");
    }

    #[test]
    fn normalizes_dot_slash_prefixed_replace_path() {
        assert_eq!(normalize_local_replace_path("./vendored/net"), "vendored/net");
    }

    #[test]
    fn normalizes_parent_relative_replace_path() {
        assert_eq!(normalize_local_replace_path("../other"), "other");
    }

    #[test]
    fn join_import_path_leaves_module_root_untouched() {
        assert_eq!(join_import_path("example.com/foo", ""), "example.com/foo");
        assert_eq!(join_import_path("example.com/foo", "sub"), "example.com/foo/sub");
    }

    #[test]
    fn resolve_local_replace_recomputes_import_path_under_main_module() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("vendored").join("net")).unwrap();
        std::fs::write(dir.path().join("vendored").join("net").join("net.go"), "package net\n").unwrap();

        let package_dir = RootedPath::new(dir.path()).unwrap();
        let packages = resolve_local_replace(&package_dir, "example.com/foo", "./vendored/net").unwrap();
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].name, "example.com/foo/vendored/net");
        assert!(packages[0].version.is_none());
    }

    #[test]
    fn resolve_local_replace_rejects_paths_that_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        let package_dir = RootedPath::new(dir.path()).unwrap().join_within_root("sub").unwrap();
        let err = resolve_local_replace(&package_dir, "example.com/foo", "../../outside").unwrap_err();
        assert!(matches!(err, HermetoError::PathOutsideRoot { .. }));
    }
}
