// build-publisher/src/config.rs

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::context::{Credentials, RunContext};
use crate::error::PublishError;

pub const DEFAULT_PRODUCTION_BUCKET: &str = "ci-builds-production";
pub const DEFAULT_DEVELOPMENT_BUCKET: &str = "ci-builds-development";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_GLOBAL_DIR: &str = "_global_";
pub const DEFAULT_METADATA_FILE: &str = ".s3d";
pub const DEFAULT_MANIFEST: &str = "manifest.json";
pub const DEFAULT_TAG_BRANCH_PATTERN: &str = "^(master|main)$";
pub const DEFAULT_BINARY_PATH: &str = "artifacts";
pub const DEFAULT_HOOK_TYPE: &str = "build_published";
pub const DEFAULT_SCM_PROVIDER: &str = "github";
/// Upper bound on the trailing months searched by the duplicate detector.
pub const MAX_MONTHS_BACK: u32 = 12;

/// Branches whose artifacts are reused when the same commit is built elsewhere.
pub fn default_primary_branches() -> Vec<String> {
    ["master", "main", "develop"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Optional, unresolved settings. Loaded from the YAML config file and then
/// overridden by environment variables; every absent value gets a default
/// during [`crate::load_config::resolve`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bucket: Option<String>,
    pub production_bucket: Option<String>,
    pub development_bucket: Option<String>,
    pub key: Option<String>,
    pub global: Option<bool>,
    pub global_dir: Option<String>,
    pub global_key: Option<String>,
    pub region: Option<String>,
    pub queue_name: Option<String>,
    pub build_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub archive_target: Option<PathBuf>,
    pub excludes: Vec<String>,
    pub tag_name: Option<String>,
    pub tag_branch_pattern: Option<String>,
    pub primary_branches: Option<Vec<String>>,
    pub months_back: Option<u32>,
    pub metadata_file: Option<String>,
    pub manifest: Option<String>,
    pub relay: RelaySettings,
    pub hints: NotifyHints,
    #[serde(skip)]
    pub access_key_id: Option<String>,
    #[serde(skip)]
    pub secret_access_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub url: Option<String>,
    pub binary_branch: Option<String>,
    pub binary_path: Option<String>,
    #[serde(skip)]
    pub username: Option<String>,
    #[serde(skip)]
    pub password: Option<String>,
}

/// Optional deployment-routing hints carried in the deployment descriptor.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotifyHints {
    pub hook_type: Option<String>,
    pub scm_provider: Option<String>,
    pub chef_app_attr: Option<String>,
    pub url_affix: Option<String>,
    pub runlist: Option<String>,
    /// Replaces the generated JSON body entirely.
    pub message: Option<String>,
}

impl NotifyHints {
    /// Fields absent from `self` are taken from `other`.
    pub fn or(self, other: NotifyHints) -> NotifyHints {
        NotifyHints {
            hook_type: self.hook_type.or(other.hook_type),
            scm_provider: self.scm_provider.or(other.scm_provider),
            chef_app_attr: self.chef_app_attr.or(other.chef_app_attr),
            url_affix: self.url_affix.or(other.url_affix),
            runlist: self.runlist.or(other.runlist),
            message: self.message.or(other.message),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<crate::context::Secret>,
    pub binary_branch: Option<String>,
    pub binary_path: String,
}

/// Fully resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub bucket: String,
    /// Branch-scoped dated key of this run's artifact.
    pub key: String,
    pub global: bool,
    pub global_dir: String,
    pub global_key: String,
    pub region: String,
    /// Either both AWS secrets, or the name of the first missing one.
    pub credentials: Result<Credentials, &'static str>,
    pub queue_name: Option<String>,
    pub build_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub archive_target: PathBuf,
    pub excludes: Vec<String>,
    pub tag_name: String,
    pub tag_branch_pattern: String,
    pub primary_branches: Vec<String>,
    pub months_back: u32,
    pub metadata_file: Option<String>,
    pub manifest: String,
    pub relay: Option<RelayConfig>,
    pub hints: NotifyHints,
    pub now: DateTime<Utc>,
}

impl PublishConfig {
    /// Credentials for remote calls. Checked before the first remote call of
    /// every command that talks to the object store or the queue.
    pub fn credentials(&self) -> Result<&Credentials, PublishError> {
        self.credentials
            .as_ref()
            .map_err(|missing| PublishError::MissingSecret(*missing))
    }

    pub fn trace_loaded(&self, ctx: &RunContext) {
        info!(
            bucket = %self.bucket,
            key = %self.key,
            global = self.global,
            global_key = %self.global_key,
            region = %self.region,
            pull_request = ctx.pull_request.is_pull_request(),
            credentials = self.credentials.is_ok(),
            "Resolved publish configuration"
        );
        debug!(?self, "Publish configuration (full debug)");
    }
}
