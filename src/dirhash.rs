//! `go.sum`'s `h1:` module hash algorithm (`golang.org/x/mod/sumdb/dirhash.Hash1`):
//! sha256 every file in the module zip, sort the `sha256  path` lines, then
//! sha256 the sorted listing and base64-encode it.

use std::io::Read;

use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::{HermetoError, Result};

/// Compute the `h1:...` hash of a module zip as downloaded from a Go
/// module proxy, where every entry is nested under `<module>@<version>/`.
pub fn hash1_zip(zip_path: &std::path::Path, module: &str, version: &str) -> Result<String> {
    let file = std::fs::File::open(zip_path)
        .map_err(|e| HermetoError::fetch_error(format!("cannot open {}: {e}", zip_path.display())))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| HermetoError::unexpected_format(format!("{} is not a valid zip: {e}", zip_path.display())))?;

    let prefix = format!("{module}@{version}/");
    let mut lines: Vec<String> = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| HermetoError::unexpected_format(format!("corrupt zip entry: {e}")))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if name.contains('\n') {
            return Err(HermetoError::unexpected_format("zip entry name contains a newline"));
        }

        let mut hasher = Sha256::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = entry
                .read(&mut buf)
                .map_err(|e| HermetoError::unexpected_format(format!("failed reading zip entry '{name}': {e}")))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        lines.push(format!("{hex}  {prefix}{}", name.trim_start_matches(&prefix)));
    }

    lines.sort();

    let mut outer = Sha256::new();
    for line in &lines {
        outer.update(line.as_bytes());
        outer.update(b"\n");
    }
    let sum = outer.finalize();
    let encoded = base64::engine::general_purpose::STANDARD.encode(sum);
    Ok(format!("h1:{encoded}"))
}

/// Enumerate the Go package directories present in a module zip, as a
/// best-effort static stand-in for `go list -deps -json`'s compiled-package
/// set (no Go toolchain is available to ask it directly). A "package
/// directory" is any directory (the module root included, represented as
/// `""`) containing at least one `.go` file that isn't a `_test.go` file,
/// excluding `vendor/`, `testdata/`, and any path component starting with
/// `.` or `_` (the same directories `go build` itself ignores).
pub fn list_package_relative_dirs(zip_path: &std::path::Path, module: &str, version: &str) -> Result<Vec<String>> {
    let file = std::fs::File::open(zip_path)
        .map_err(|e| HermetoError::fetch_error(format!("cannot open {}: {e}", zip_path.display())))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| HermetoError::unexpected_format(format!("{} is not a valid zip: {e}", zip_path.display())))?;

    let prefix = format!("{module}@{version}/");
    let mut dirs = std::collections::BTreeSet::new();

    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| HermetoError::unexpected_format(format!("corrupt zip entry: {e}")))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name();
        let Some(relative) = name.strip_prefix(&prefix) else {
            continue;
        };
        let Some(file_name) = relative.rsplit('/').next() else {
            continue;
        };
        if !file_name.ends_with(".go") || file_name.ends_with("_test.go") {
            continue;
        }
        let dir = relative.rfind('/').map(|idx| &relative[..idx]).unwrap_or("");
        if is_ignored_go_dir(dir) {
            continue;
        }
        dirs.insert(dir.to_string());
    }

    Ok(dirs.into_iter().collect())
}

fn is_ignored_go_dir(dir: &str) -> bool {
    dir.split('/').any(|segment| {
        segment == "vendor" || segment == "testdata" || segment.starts_with('.') || segment.starts_with('_')
    })
}

/// Filesystem equivalent of [`list_package_relative_dirs`], used for the
/// main module and local `replace` targets that live on disk rather than in
/// a downloaded module zip.
pub fn list_package_relative_dirs_fs(root: &std::path::Path) -> Result<Vec<String>> {
    let mut dirs = std::collections::BTreeSet::new();
    walk_go_dir(root, root, &mut dirs)?;
    Ok(dirs.into_iter().collect())
}

fn walk_go_dir(root: &std::path::Path, dir: &std::path::Path, out: &mut std::collections::BTreeSet<String>) -> Result<()> {
    let relative = dir.strip_prefix(root).unwrap_or(std::path::Path::new(""));
    let relative = relative.to_string_lossy().replace('\\', "/");
    if is_ignored_go_dir(&relative) {
        return Ok(());
    }

    let entries = std::fs::read_dir(dir)
        .map_err(|e| HermetoError::fetch_error(format!("cannot read {}: {e}", dir.display())))?;

    let mut has_go_file = false;
    let mut subdirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| HermetoError::fetch_error(format!("cannot read {}: {e}", dir.display())))?;
        let file_type = entry
            .file_type()
            .map_err(|e| HermetoError::fetch_error(format!("cannot stat {}: {e}", entry.path().display())))?;
        if file_type.is_dir() {
            subdirs.push(entry.path());
        } else if file_type.is_file() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(".go") && !name.ends_with("_test.go") {
                has_go_file = true;
            }
        }
    }

    if has_go_file {
        out.insert(relative);
    }
    for subdir in subdirs {
        walk_go_dir(root, &subdir, out)?;
    }
    Ok(())
}

/// Compute the `h1:...` hash of a single `go.mod` file's contents, the
/// form used for `go.sum`'s `<module> <version>/go.mod` lines.
pub fn hash1_go_mod(module: &str, version: &str, data: &[u8]) -> String {
    let inner_hex: String = Sha256::digest(data).iter().map(|b| format!("{b:02x}")).collect();
    let line = format!("{inner_hex}  {module}@{version}/go.mod\n");
    let mut outer = Sha256::new();
    outer.update(line.as_bytes());
    let sum = outer.finalize();
    format!("h1:{}", base64::engine::general_purpose::STANDARD.encode(sum))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_zip(path: &std::path::Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn hash_is_deterministic_regardless_of_entry_order() {
        let dir = tempfile::tempdir().unwrap();
        let zip_a = dir.path().join("a.zip");
        let zip_b = dir.path().join("b.zip");

        build_zip(
            &zip_a,
            &[
                ("example.com/foo@v1.0.0/go.mod", b"module example.com/foo\n"),
                ("example.com/foo@v1.0.0/foo.go", b"package foo\n"),
            ],
        );
        build_zip(
            &zip_b,
            &[
                ("example.com/foo@v1.0.0/foo.go", b"package foo\n"),
                ("example.com/foo@v1.0.0/go.mod", b"module example.com/foo\n"),
            ],
        );

        let hash_a = hash1_zip(&zip_a, "example.com/foo", "v1.0.0").unwrap();
        let hash_b = hash1_zip(&zip_b, "example.com/foo", "v1.0.0").unwrap();
        assert_eq!(hash_a, hash_b);
        assert!(hash_a.starts_with("h1:"));
    }

    #[test]
    fn lists_package_dirs_and_skips_tests_and_vendor() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("pkg.zip");
        build_zip(
            &zip_path,
            &[
                ("example.com/foo@v1.0.0/go.mod", b"module example.com/foo\n"),
                ("example.com/foo@v1.0.0/foo.go", b"package foo\n"),
                ("example.com/foo@v1.0.0/foo_test.go", b"package foo\n"),
                ("example.com/foo@v1.0.0/sub/bar.go", b"package sub\n"),
                ("example.com/foo@v1.0.0/vendor/dep/dep.go", b"package dep\n"),
                ("example.com/foo@v1.0.0/testdata/fixture.go", b"package testdata\n"),
            ],
        );
        let dirs = list_package_relative_dirs(&zip_path, "example.com/foo", "v1.0.0").unwrap();
        assert_eq!(dirs, vec!["".to_string(), "sub".to_string()]);
    }

    #[test]
    fn lists_fs_package_dirs_and_skips_tests_and_vendor() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.go"), "package main\n").unwrap();
        std::fs::write(dir.path().join("main_test.go"), "package main\n").unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("sub.go"), "package sub\n").unwrap();
        std::fs::create_dir_all(dir.path().join("vendor").join("dep")).unwrap();
        std::fs::write(dir.path().join("vendor").join("dep").join("dep.go"), "package dep\n").unwrap();

        let dirs = list_package_relative_dirs_fs(dir.path()).unwrap();
        assert_eq!(dirs, vec!["".to_string(), "sub".to_string()]);
    }

    #[test]
    fn different_contents_produce_different_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let zip_a = dir.path().join("a.zip");
        let zip_b = dir.path().join("b.zip");
        build_zip(&zip_a, &[("example.com/foo@v1.0.0/go.mod", b"module example.com/foo\n")]);
        build_zip(&zip_b, &[("example.com/foo@v1.0.0/go.mod", b"module example.com/foo2\n")]);

        assert_ne!(
            hash1_zip(&zip_a, "example.com/foo", "v1.0.0").unwrap(),
            hash1_zip(&zip_b, "example.com/foo", "v1.0.0").unwrap()
        );
    }
}
