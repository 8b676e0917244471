use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use git2::Repository;
use predicates::prelude::*;
use serde_json::{Value, json};
use std::path::Path;
use tempfile::TempDir;

fn cmd() -> Command {
    cargo_bin_cmd!("hermeto")
}

fn read_json(path: &Path) -> Value {
    let bytes = std::fs::read(path).expect("read json file");
    serde_json::from_slice(&bytes).expect("parse json")
}

fn init_local_git_repo(path: &Path) -> String {
    std::fs::create_dir_all(path).expect("create local git repo dir");
    let repo = Repository::init(path).expect("init repo");

    std::fs::write(path.join("README.md"), "fixture repo\n").expect("write fixture file");

    let mut index = repo.index().expect("index");
    index.add_path(Path::new("README.md")).expect("add path to index");
    index.write().expect("write index");

    let tree_id = index.write_tree().expect("write tree");
    let tree = repo.find_tree(tree_id).expect("find tree");
    let sig = git2::Signature::now("hermeto-test", "hermeto-test@example.com").expect("signature");

    let oid = repo
        .commit(Some("HEAD"), &sig, &sig, "initial commit", &tree, &[])
        .expect("commit");

    oid.to_string()
}

#[test]
fn fetch_deps_rejects_npm_package_with_no_lockfile() {
    let temp = TempDir::new().expect("tempdir");
    let output = temp.path().join("out");

    cmd()
        .current_dir(temp.path())
        .args([
            "fetch-deps",
            "npm",
            "--source",
            &temp.path().display().to_string(),
            "--output",
            &output.display().to_string(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no package-lock.json"));
}

#[test]
fn fetch_deps_resolves_npm_git_dependency_and_writes_bom() {
    let temp = TempDir::new().expect("tempdir");
    let repo_path = temp.path().join("source-repo");
    let revision = init_local_git_repo(&repo_path);
    let output = temp.path().join("out");

    let package_lock = json!({
        "name": "fixture-js-npm",
        "version": "1.0.0",
        "lockfileVersion": 3,
        "packages": {
            "": {
                "name": "fixture-js-npm",
                "version": "1.0.0",
                "dependencies": {
                    "demo-git-package": "1.0.0"
                }
            },
            "node_modules/demo-git-package": {
                "version": "1.0.0",
                "resolved": format!("git+{}#{}", repo_path.display(), revision),
            }
        }
    });
    std::fs::write(
        temp.path().join("package-lock.json"),
        serde_json::to_vec_pretty(&package_lock).expect("serialize lock"),
    )
    .expect("write package-lock");

    cmd()
        .current_dir(temp.path())
        .args([
            "fetch-deps",
            "npm",
            "--source",
            &temp.path().display().to_string(),
            "--output",
            &output.display().to_string(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Fetched 1 component"));

    let bom = read_json(&output.join("bom.json"));
    let components = bom.get("components").and_then(Value::as_array).expect("components array");
    assert_eq!(components.len(), 1);
    assert_eq!(
        components[0].get("purl").and_then(Value::as_str).expect("purl"),
        format!("pkg:npm/demo-git-package@1.0.0?vcs_url=git%2B{}%40{revision}", repo_path.display())
    );

    assert!(output.join(".build-config.json").exists());
}

#[test]
fn fetch_deps_resolves_pip_vcs_dependency_without_hash_as_missing_hash() {
    let temp = TempDir::new().expect("tempdir");
    let repo_path = temp.path().join("source-repo");
    let revision = init_local_git_repo(&repo_path);
    let output = temp.path().join("out");

    std::fs::write(
        temp.path().join("requirements.txt"),
        format!("cnr_server @ git+{}@{revision}#egg=cnr_server\n", repo_path.display()),
    )
    .expect("write requirements.txt");

    cmd()
        .current_dir(temp.path())
        .args([
            "fetch-deps",
            "pip",
            "--source",
            &temp.path().display().to_string(),
            "--output",
            &output.display().to_string(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Fetched 1 component"));

    let bom = read_json(&output.join("bom.json"));
    let components = bom.get("components").and_then(Value::as_array).expect("components array");
    assert_eq!(components.len(), 1);

    let properties = components[0]
        .get("properties")
        .and_then(Value::as_array)
        .expect("properties array");
    let missing_hash = properties.iter().any(|p| {
        p.get("name").and_then(Value::as_str) == Some("cachi2:missing_hash:in_file")
            && p.get("value").and_then(Value::as_str) == Some("requirements.txt")
    });
    assert!(missing_hash, "expected a missing_hash:in_file property, got {properties:?}");
}

#[test]
fn merge_sboms_deduplicates_components_across_files() {
    let temp = TempDir::new().expect("tempdir");
    let a = temp.path().join("a.json");
    let b = temp.path().join("b.json");
    let out = temp.path().join("merged.json");

    let sbom = json!({
        "bomFormat": "CycloneDX",
        "specVersion": "1.4",
        "version": 1,
        "metadata": {"tools": [{"vendor": "red hat", "name": "cachi2"}]},
        "components": [{
            "name": "bar",
            "purl": "pkg:npm/bar@1.0.0",
            "type": "library",
            "properties": [{"name": "cachi2:found_by", "value": "cachi2"}]
        }]
    });
    std::fs::write(&a, serde_json::to_vec(&sbom).unwrap()).unwrap();
    std::fs::write(&b, serde_json::to_vec(&sbom).unwrap()).unwrap();

    cmd()
        .args([
            "merge-sboms",
            &a.display().to_string(),
            &b.display().to_string(),
            "--output",
            &out.display().to_string(),
        ])
        .assert()
        .success();

    let merged = read_json(&out);
    assert_eq!(
        merged.get("components").and_then(Value::as_array).expect("components").len(),
        1
    );
}

#[test]
fn generate_env_and_inject_files_roundtrip_after_fetch_deps() {
    let temp = TempDir::new().expect("tempdir");
    let cargo_dir = temp.path().join("project");
    std::fs::create_dir_all(&cargo_dir).expect("create project dir");
    std::fs::write(
        cargo_dir.join("Cargo.toml"),
        "[package]\nname = \"fixture\"\nversion = \"0.1.0\"\nedition = \"2021\"\n",
    )
    .expect("write Cargo.toml");
    std::fs::write(cargo_dir.join("Cargo.lock"), "version = 3\npackage = []\n").expect("write empty Cargo.lock");
    let output = temp.path().join("out");

    cmd()
        .current_dir(&cargo_dir)
        .args([
            "fetch-deps",
            "cargo",
            "--source",
            &cargo_dir.display().to_string(),
            "--output",
            &output.display().to_string(),
        ])
        .assert()
        .success();

    cmd()
        .args(["generate-env", &output.display().to_string()])
        .assert()
        .success()
        .stdout(predicate::str::contains("export CARGO_HOME="));

    let checkout = temp.path().join("checkout");
    std::fs::create_dir_all(&checkout).expect("create checkout dir");
    cmd()
        .args([
            "inject-files",
            &output.display().to_string(),
            "--for-output-dir",
            &checkout.display().to_string(),
        ])
        .assert()
        .success();

    let rendered = std::fs::read_to_string(checkout.join(".cargo").join("config.toml")).expect("read rendered config");
    assert!(rendered.contains(&output.display().to_string()));
}
