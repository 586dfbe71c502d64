use std::env;
use std::fs::write;
use std::path::PathBuf;

use build_publisher::context::RunContext;
use build_publisher::load_config::{load_settings, resolve};
use chrono::{TimeZone, Utc};
use serial_test::serial;
use tempfile::NamedTempFile;

const OVERRIDES: &[&str] = &[
    "S3_BUCKET",
    "S3_KEY",
    "S3_GLOBAL",
    "S3_GLOBAL_DIR",
    "S3_GLOBAL_KEY",
    "SQS_QUEUE_NAME",
    "AWS_REGION",
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "ARCHIVE_TARGET",
    "ARCHIVE_EXCLUDES",
    "CACHE_DIR",
    "TAG_NAME",
    "TAG_BRANCH_PATTERN",
    "RELAY_URL",
    "RELAY_USER",
    "RELAY_PASSWORD",
    "RELAY_BINARY_BRANCH",
    "TRAVIS_BUILD_DIR",
];

fn clear_env() {
    for name in OVERRIDES {
        env::remove_var(name);
    }
}

fn set_ci_env() {
    env::set_var("TRAVIS_REPO_SLUG", "acme/web");
    env::set_var("TRAVIS_COMMIT", "a1b2c3d4");
    env::set_var("TRAVIS_BRANCH", "feature/login");
    env::set_var("TRAVIS_BUILD_NUMBER", "7");
    env::set_var("TRAVIS_PULL_REQUEST", "false");
    env::set_var("TRAVIS_SECURE_ENV_VARS", "true");
}

/// A static config file plus secrets from the environment resolves into a full config.
#[tokio::test]
#[serial]
async fn test_load_config_success_injects_env_secrets() {
    clear_env();
    set_ci_env();
    let config_yaml = r#"
production_bucket: acme-builds
queue_name: deployments
months_back: 2
excludes:
  - node_modules
relay:
  url: https://relay.example.com/hooks
  binary_branch: master
hints:
  runlist: "role[web]"
"#;
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), config_yaml).unwrap();

    env::set_var("AWS_ACCESS_KEY_ID", "AKIATEST");
    env::set_var("AWS_SECRET_ACCESS_KEY", "top-secret-test-key");
    env::set_var("ARCHIVE_EXCLUDES", "*.log");
    env::set_var("TRAVIS_BUILD_DIR", "/tmp/build");

    let settings = load_settings(Some(config_file.path())).expect("Config should load");
    let ctx = RunContext::from_env().expect("CI context should load");
    let now = Utc.with_ymd_and_hms(2024, 1, 15, 8, 30, 0).unwrap();
    let config = resolve(&ctx, settings, now).expect("Config should resolve");

    assert_eq!(config.bucket, "acme-builds");
    assert_eq!(config.key, "web/feature/login/2024/01/a1b2c3d4.tar.gz");
    assert_eq!(config.queue_name.as_deref(), Some("deployments"));
    assert_eq!(config.months_back, 2);
    assert_eq!(config.excludes, vec!["node_modules", "*.log"]);
    assert_eq!(config.build_dir, PathBuf::from("/tmp/build"));
    assert_eq!(config.hints.runlist.as_deref(), Some("role[web]"));

    let relay = config.relay.as_ref().expect("relay configured");
    assert_eq!(relay.binary_branch.as_deref(), Some("master"));
    assert_eq!(relay.binary_path, "artifacts");

    let credentials = config.credentials().expect("credentials from env");
    assert_eq!(credentials.access_key_id, "AKIATEST");
    assert_eq!(credentials.secret_access_key.expose(), "top-secret-test-key");
    clear_env();
}

/// Secrets in the YAML file are ignored; they only ever come from the environment.
#[tokio::test]
#[serial]
async fn test_load_config_ignores_secrets_in_file() {
    clear_env();
    set_ci_env();
    let config_yaml = r#"
bucket: from-file
access_key_id: AKIAFROMFILE
secret_access_key: nope
"#;
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), config_yaml).unwrap();

    let settings = load_settings(Some(config_file.path())).expect("Config should load");
    assert_eq!(settings.bucket.as_deref(), Some("from-file"));
    assert_eq!(settings.access_key_id, None);
    assert_eq!(settings.secret_access_key, None);
}

/// Environment overrides take precedence over the file.
#[tokio::test]
#[serial]
async fn test_load_config_env_overrides_file() {
    clear_env();
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), "bucket: from-file\nregion: eu-west-1\n").unwrap();

    env::set_var("S3_BUCKET", "from-env");
    env::set_var("S3_GLOBAL", "1");

    let settings = load_settings(Some(config_file.path())).expect("Config should load");
    assert_eq!(settings.bucket.as_deref(), Some("from-env"));
    assert_eq!(settings.region.as_deref(), Some("eu-west-1"));
    assert_eq!(settings.global, Some(true));
    clear_env();
}

/// An invalid YAML file is reported as a parse error.
#[tokio::test]
#[serial]
async fn test_load_config_errors_for_invalid_file() {
    clear_env();
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), b"not-yaml: [:::").unwrap();

    let err = load_settings(Some(config_file.path())).unwrap_err();
    let msg = err.to_string();
    assert!(
        msg.contains("parse") || msg.contains("YAML"),
        "Parse error expected, got: {msg}"
    );
}

/// A config path that does not exist is an error, not silently ignored.
#[tokio::test]
#[serial]
async fn test_load_config_errors_for_missing_file() {
    clear_env();
    let err = load_settings(Some(std::path::Path::new("/nonexistent/publisher.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
