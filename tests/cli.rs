use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::write;
use tempfile::tempdir;

/// A CI environment with repository identity but no AWS secrets.
fn ci_command() -> Command {
    let mut cmd = Command::cargo_bin("build-publisher").expect("Binary exists");
    cmd.env("TRAVIS_REPO_SLUG", "acme/api")
        .env("TRAVIS_COMMIT", "5f2c9e1d")
        .env("TRAVIS_BRANCH", "develop")
        .env("TRAVIS_BUILD_NUMBER", "42")
        .env("TRAVIS_PULL_REQUEST", "false")
        .env("TRAVIS_SECURE_ENV_VARS", "true")
        .env_remove("AWS_ACCESS_KEY_ID")
        .env_remove("AWS_SECRET_ACCESS_KEY")
        .env_remove("S3_BUCKET")
        .env_remove("S3_KEY");
    cmd
}

#[test]
fn publish_without_access_key_exits_with_one() {
    let build = tempdir().unwrap();
    write(build.path().join("index.html"), "<html></html>").unwrap();

    ci_command()
        .arg("publish")
        .arg("--no-notify")
        .env("TRAVIS_BUILD_DIR", build.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("AWS_ACCESS_KEY_ID"));

    assert!(
        !build.path().join(".s3d").exists(),
        "nothing may be written before credentials are checked"
    );
}

#[test]
fn check_without_secret_key_exits_with_one() {
    ci_command()
        .arg("check")
        .env("AWS_ACCESS_KEY_ID", "AKIATEST")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("AWS_SECRET_ACCESS_KEY"));
}

#[test]
fn verify_fingerprints_reports_unhashed_assets() {
    let dir = tempdir().unwrap();
    write(dir.path().join("app.a1b2c3d4e5f6a7b8c9d0.js"), "ok").unwrap();
    write(dir.path().join("app.js"), "nope").unwrap();
    write(dir.path().join("manifest.json"), "{}").unwrap();

    Command::cargo_bin("build-publisher")
        .expect("Binary exists")
        .arg("verify-fingerprints")
        .arg(dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("app.js"));
}

#[test]
fn verify_fingerprints_succeeds_on_hashed_assets() {
    let dir = tempdir().unwrap();
    write(dir.path().join("app.a1b2c3d4e5f6a7b8c9d0.js"), "ok").unwrap();
    write(dir.path().join("0123456789abcdef0123.css.map"), "ok").unwrap();
    write(dir.path().join("assets.json"), "{}").unwrap();

    Command::cargo_bin("build-publisher")
        .expect("Binary exists")
        .arg("verify-fingerprints")
        .arg(dir.path())
        .arg("--manifest")
        .arg("assets.json")
        .assert()
        .success()
        .stdout(predicate::str::contains("fingerprinted"));
}

#[test]
fn metadata_writes_build_record() {
    let build = tempdir().unwrap();

    ci_command()
        .arg("metadata")
        .env("TRAVIS_BUILD_DIR", build.path())
        .assert()
        .success()
        .stdout(predicate::str::contains(".s3d"));

    let record = std::fs::read_to_string(build.path().join(".s3d")).unwrap();
    let record: serde_json::Value = serde_json::from_str(&record).unwrap();
    assert_eq!(record["repo_name"], "api");
    assert_eq!(record["pull_request"], "false");
    assert_eq!(record["repo_url"], "https://github.com/acme/api");
}

#[test]
fn missing_repository_slug_is_a_configuration_error() {
    ci_command()
        .arg("metadata")
        .env_remove("TRAVIS_REPO_SLUG")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("TRAVIS_REPO_SLUG"));
}
