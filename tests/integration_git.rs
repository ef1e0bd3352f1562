//! Full cycles against real git repositories.
//!
//! These tests need a `git` binary and are only run with
//! `cargo test --features integration-tests`.

#[allow(dead_code)]
mod common;
use common::prelude::*;

use std::path::Path;
use std::process::Command;

use repo_mirror::fingerprint::fingerprint_refs;
use repo_mirror::git::{GitOperations, SystemGit};
use repo_mirror::manifest::{Manifest, ManifestEntry};

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .current_dir(dir)
        .args(args)
        .env("GIT_AUTHOR_NAME", "Mirror Test")
        .env("GIT_AUTHOR_EMAIL", "mirror@example.com")
        .env("GIT_COMMITTER_NAME", "Mirror Test")
        .env("GIT_COMMITTER_EMAIL", "mirror@example.com")
        .status()
        .expect("Failed to run git");
    assert!(status.success(), "git {:?} failed in {}", args, dir.display());
}

/// Creates `<origin>/<path>` with one commit, pushed from a work tree.
fn seed_origin(fixture: &MirrorFixture, path: &str) {
    let bare = fixture.origin().join(path.trim_start_matches('/'));
    std::fs::create_dir_all(&bare).unwrap();
    git(&bare, &["init", "-q", "--bare"]);

    let work = fixture.path().join("work").join(path.trim_start_matches('/'));
    std::fs::create_dir_all(&work).unwrap();
    git(&work, &["init", "-q"]);
    git(&work, &["commit", "-q", "--allow-empty", "-m", "initial"]);
    git(&work, &["push", "-q", bare.to_str().unwrap(), "HEAD:refs/heads/main"]);
}

fn push_commit(fixture: &MirrorFixture, path: &str, message: &str) {
    let bare = fixture.origin().join(path.trim_start_matches('/'));
    let work = fixture.path().join("work").join(path.trim_start_matches('/'));
    git(&work, &["commit", "-q", "--allow-empty", "-m", message]);
    git(&work, &["push", "-q", bare.to_str().unwrap(), "HEAD:refs/heads/main"]);
}

/// The manifest an upstream mirror would publish for the origin.
fn origin_manifest(fixture: &MirrorFixture, paths: &[&str], modified: i64) -> Manifest {
    let mut manifest = Manifest::new();
    for path in paths {
        let bare = fixture.origin().join(path.trim_start_matches('/'));
        let refs = SystemGit.show_ref(&bare).unwrap();
        let mut entry =
            ManifestEntry::new(modified).with_fingerprint(fingerprint_refs(&refs, &[]).unwrap());
        entry.description = Some(format!("Mirror of {}", path));
        manifest.insert(*path, entry);
    }
    manifest
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_pull_clones_then_updates() {
    if !git_available() {
        return;
    }
    let fixture = MirrorFixture::new();
    seed_origin(&fixture, "/pub/a.git");
    let manifest = origin_manifest(&fixture, &["/pub/a.git"], 1_700_000_000);
    let fixture = fixture.with_remote_manifest(&manifest, 1_700_000_000);

    fixture
        .command()
        .arg("pull")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("1 cloned"));

    let repo = fixture.repo_path("/pub/a.git");
    assert!(repo.join("HEAD").is_file());
    let description = std::fs::read_to_string(repo.join("description")).unwrap();
    assert_eq!(description.trim(), "Mirror of /pub/a.git");
    assert!(repo.join("info/web/last-modified").is_file());

    push_commit(&fixture, "/pub/a.git", "second");
    let manifest = origin_manifest(&fixture, &["/pub/a.git"], 1_700_000_100);
    let fixture = fixture.with_remote_manifest(&manifest, 1_700_000_100);

    fixture
        .command()
        .arg("pull")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("1 updated"));

    let local = Manifest::load(&fixture.local_manifest());
    let remote = origin_manifest(&fixture, &["/pub/a.git"], 1_700_000_100);
    assert_eq!(local, remote);
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_missing_origin_repository_fails_the_clone() {
    if !git_available() {
        return;
    }
    let fixture = MirrorFixture::new();
    seed_origin(&fixture, "/pub/a.git");
    let mut manifest = origin_manifest(&fixture, &["/pub/a.git"], 1_700_000_000);
    manifest.insert("/pub/ghost.git", entry("ghost", 1_700_000_000));
    let fixture = fixture.with_remote_manifest(&manifest, 1_700_000_000);

    fixture
        .command()
        .arg("pull")
        .assert()
        .code(3)
        .stdout(predicate::str::contains("1 cloned"))
        .stdout(predicate::str::contains("1 failed"));

    assert!(!fixture.repo_path("/pub/ghost.git").exists());
    let local = Manifest::load(&fixture.local_manifest());
    assert!(local.contains("/pub/a.git"));
    assert!(!local.contains("/pub/ghost.git"));
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_fsck_force_checks_every_repository() {
    if !git_available() {
        return;
    }
    let fixture = MirrorFixture::new();
    seed_origin(&fixture, "/pub/a.git");
    let manifest = origin_manifest(&fixture, &["/pub/a.git"], 1_700_000_000);
    let fixture = fixture.with_remote_manifest(&manifest, 1_700_000_000);
    fixture.command().arg("pull").assert().code(0);

    fixture
        .command()
        .arg("fsck")
        .arg("--force")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("1 checked on schedule"));

    let status = std::fs::read_to_string(fixture.toplevel().join(".fsck-status.js")).unwrap();
    assert!(status.contains("s_elapsed"));
    assert!(!status.contains("never"));
}
