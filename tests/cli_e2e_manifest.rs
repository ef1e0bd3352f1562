//! End-to-end tests for the `repo-mirror manifest` command.

#[allow(dead_code)]
mod common;
use common::prelude::*;

use repo_mirror::manifest::Manifest;

#[test]
fn test_manifest_check_missing_file() {
    let fixture = MirrorFixture::new();

    fixture
        .command()
        .arg("manifest")
        .arg("--check")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Cannot read manifest"));
}

#[test]
fn test_manifest_check_valid_file() {
    let mut manifest = Manifest::new();
    manifest.insert("/pub/a.git", entry("a", 100));
    manifest.insert("/pub/b.git", entry("b", 200));
    let fixture = MirrorFixture::new().with_local_manifest(&manifest, 200);

    fixture
        .command()
        .arg("manifest")
        .arg("--check")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("lists 2 repositories"));
}

#[test]
fn test_manifest_check_empty_file() {
    let fixture = MirrorFixture::new().with_local_manifest(&Manifest::new(), 200);

    fixture
        .command()
        .arg("manifest")
        .arg("--check")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("lists no repositories"));
}

#[test]
fn test_manifest_check_corrupt_file() {
    let fixture = MirrorFixture::new();
    fixture
        .child("mirror/manifest.js.gz")
        .write_binary(b"not gzip at all")
        .unwrap();

    fixture.command().arg("manifest").arg("--check").assert().code(1);
}

#[test]
fn test_manifest_of_empty_mirror_is_unchanged() {
    let fixture = MirrorFixture::new();

    fixture
        .command()
        .arg("manifest")
        .assert()
        .code(4)
        .stdout(predicate::str::contains("up to date"));
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_manifest_regenerates_from_disk() {
    if !git_available() {
        return;
    }
    let fixture = MirrorFixture::new();
    let repo = fixture.repo_path("/pub/a.git");
    std::fs::create_dir_all(repo.parent().unwrap()).unwrap();
    let work = fixture.child("work");
    work.create_dir_all().unwrap();
    let git = |dir: &std::path::Path, args: &[&str]| {
        let status = std::process::Command::new("git")
            .current_dir(dir)
            .args(args)
            .env("GIT_AUTHOR_NAME", "Test")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "Test")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    };
    git(work.path(), &["init", "-q"]);
    git(work.path(), &["commit", "-q", "--allow-empty", "-m", "initial"]);
    git(
        fixture.path(),
        &["clone", "-q", "--mirror", work.path().to_str().unwrap(), repo.to_str().unwrap()],
    );

    fixture
        .command()
        .arg("manifest")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("Wrote 1 repositories"));

    let manifest = Manifest::load(&fixture.local_manifest());
    let entry = manifest.get("/pub/a.git").unwrap();
    assert_eq!(entry.fingerprint.as_ref().map(String::len), Some(64));

    // A second run finds nothing new.
    fixture.command().arg("manifest").assert().code(4);
}
