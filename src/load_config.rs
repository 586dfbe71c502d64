use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::config::{
    default_primary_branches, PublishConfig, RelayConfig, Settings, DEFAULT_BINARY_PATH,
    DEFAULT_DEVELOPMENT_BUCKET, DEFAULT_GLOBAL_DIR, DEFAULT_MANIFEST, DEFAULT_METADATA_FILE,
    DEFAULT_PRODUCTION_BUCKET, DEFAULT_REGION, DEFAULT_TAG_BRANCH_PATTERN, MAX_MONTHS_BACK,
};
use crate::context::{Credentials, RunContext, Secret};
use crate::error::PublishError;
use crate::keys;

/// Loads the optional static YAML config file (no secrets) and layers the
/// environment on top of it. Secrets only ever come from the environment.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let settings = match path {
        Some(path) => read_settings_file(path)?,
        None => {
            info!("No config file given, using environment and defaults only");
            Settings::default()
        }
    };
    Ok(apply_env(settings, |name| std::env::var(name).ok()))
}

fn read_settings_file(path: &Path) -> Result<Settings> {
    info!(config_path = ?path, "Loading configuration from file");

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path, "Failed to read config file");
            return Err(anyhow::anyhow!("Failed to read config file {:?}: {}", path, e));
        }
    };

    match serde_yaml::from_str::<Settings>(&content) {
        Ok(settings) => {
            info!(config_path = ?path, "Parsed config YAML successfully");
            Ok(settings)
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path, "Failed to parse config YAML");
            Err(anyhow::anyhow!("Failed to parse config YAML: {e}"))
        }
    }
}

/// Overrides `settings` with the environment variables visible through `lookup`.
/// Empty variables count as unset.
pub fn apply_env<F>(mut settings: Settings, lookup: F) -> Settings
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    macro_rules! override_with {
        ($field:expr, $name:literal) => {
            if let Some(v) = var($name) {
                $field = Some(v.into());
            }
        };
    }

    override_with!(settings.bucket, "S3_BUCKET");
    override_with!(settings.key, "S3_KEY");
    override_with!(settings.global_dir, "S3_GLOBAL_DIR");
    override_with!(settings.global_key, "S3_GLOBAL_KEY");
    override_with!(settings.region, "AWS_REGION");
    override_with!(settings.queue_name, "SQS_QUEUE_NAME");
    override_with!(settings.build_dir, "TRAVIS_BUILD_DIR");
    override_with!(settings.cache_dir, "CACHE_DIR");
    override_with!(settings.archive_target, "ARCHIVE_TARGET");
    override_with!(settings.tag_name, "TAG_NAME");
    override_with!(settings.tag_branch_pattern, "TAG_BRANCH_PATTERN");
    override_with!(settings.relay.url, "RELAY_URL");
    override_with!(settings.relay.username, "RELAY_USER");
    override_with!(settings.relay.password, "RELAY_PASSWORD");
    override_with!(settings.relay.binary_branch, "RELAY_BINARY_BRANCH");
    override_with!(settings.access_key_id, "AWS_ACCESS_KEY_ID");
    override_with!(settings.secret_access_key, "AWS_SECRET_ACCESS_KEY");

    if let Some(v) = var("S3_GLOBAL") {
        settings.global = Some(matches!(v.trim(), "1" | "true" | "TRUE" | "yes"));
    }
    if let Some(v) = var("ARCHIVE_EXCLUDES") {
        settings.excludes.extend(
            v.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
        );
    }
    settings
}

/// Applies the default rules to every absent value. Performs no I/O.
pub fn resolve(
    ctx: &RunContext,
    settings: Settings,
    now: DateTime<Utc>,
) -> Result<PublishConfig, PublishError> {
    let repo = ctx.repo_name.as_str();

    let bucket = settings.bucket.unwrap_or_else(|| {
        if ctx.secure_env {
            settings
                .production_bucket
                .unwrap_or_else(|| DEFAULT_PRODUCTION_BUCKET.to_string())
        } else {
            settings
                .development_bucket
                .unwrap_or_else(|| DEFAULT_DEVELOPMENT_BUCKET.to_string())
        }
    });

    let key = settings.key.unwrap_or_else(|| {
        use chrono::Datelike;
        keys::branch_key(repo, &ctx.branch, now.year(), now.month(), &ctx.commit)
    });

    let global_dir = settings
        .global_dir
        .unwrap_or_else(|| DEFAULT_GLOBAL_DIR.to_string());
    let global_key = settings.global_key.unwrap_or_else(|| {
        keys::default_global_key(repo, &global_dir, ctx.pull_request, &ctx.commit)
    });

    let cache_dir = settings
        .cache_dir
        .unwrap_or_else(|| std::env::temp_dir().join(repo));
    let archive_target = settings
        .archive_target
        .unwrap_or_else(|| cache_dir.join(format!("{repo}.{}", keys::ARCHIVE_EXTENSION)));

    let tag_name = settings
        .tag_name
        .unwrap_or_else(|| format!("{}-{}", ctx.branch, now.format("%Y%m%d-%H%M")));

    let credentials = match (settings.access_key_id, settings.secret_access_key) {
        (Some(access_key_id), Some(secret)) => Ok(Credentials {
            access_key_id,
            secret_access_key: Secret::new(secret),
        }),
        (None, _) => Err("AWS_ACCESS_KEY_ID"),
        (_, None) => Err("AWS_SECRET_ACCESS_KEY"),
    };

    let relay = settings.relay.url.map(|url| {
        if settings.relay.username.is_some() != settings.relay.password.is_some() {
            warn!("Only one of relay username/password is set, relay calls will not authenticate");
        }
        RelayConfig {
            url,
            username: settings.relay.username,
            password: settings.relay.password.map(Secret::new),
            binary_branch: settings.relay.binary_branch,
            binary_path: settings
                .relay
                .binary_path
                .unwrap_or_else(|| DEFAULT_BINARY_PATH.to_string()),
        }
    });

    let months_back = settings.months_back.unwrap_or(1);
    if months_back > MAX_MONTHS_BACK {
        return Err(PublishError::Config(format!(
            "months_back must be at most {MAX_MONTHS_BACK}, got {months_back}"
        )));
    }

    let metadata_file = match settings.metadata_file {
        Some(name) if name.trim().is_empty() => None,
        Some(name) => Some(name),
        None => Some(DEFAULT_METADATA_FILE.to_string()),
    };

    let config = PublishConfig {
        bucket,
        key,
        global: settings.global.unwrap_or(false),
        global_dir,
        global_key,
        region: settings.region.unwrap_or_else(|| DEFAULT_REGION.to_string()),
        credentials,
        queue_name: settings.queue_name,
        build_dir: settings.build_dir.unwrap_or_else(|| PathBuf::from(".")),
        cache_dir,
        archive_target,
        excludes: settings.excludes,
        tag_name,
        tag_branch_pattern: settings
            .tag_branch_pattern
            .unwrap_or_else(|| DEFAULT_TAG_BRANCH_PATTERN.to_string()),
        primary_branches: settings
            .primary_branches
            .unwrap_or_else(default_primary_branches),
        months_back,
        metadata_file,
        manifest: settings
            .manifest
            .unwrap_or_else(|| DEFAULT_MANIFEST.to_string()),
        relay,
        hints: settings.hints,
        now,
    };
    config.trace_loaded(ctx);
    Ok(config)
}
