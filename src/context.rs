//! Per-run CI context: repository identity, commit, branch and PR state.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::PublishError;

/// Pull request state of a CI run. The CI system reports `false` for
/// non-PR (merge) builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullRequest {
    None,
    Number(u64),
}

impl PullRequest {
    pub fn parse(raw: &str) -> Result<Self, PublishError> {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("false") {
            return Ok(PullRequest::None);
        }
        raw.parse::<u64>()
            .map(PullRequest::Number)
            .map_err(|_| PublishError::Config(format!("invalid pull request id `{raw}`")))
    }

    pub fn is_pull_request(&self) -> bool {
        matches!(self, PullRequest::Number(_))
    }
}

impl fmt::Display for PullRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PullRequest::None => f.write_str("false"),
            PullRequest::Number(n) => write!(f, "{n}"),
        }
    }
}

impl Serialize for PullRequest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Secret string whose value never reaches logs or debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: Secret,
}

/// Everything known about the CI run before any defaults are applied.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub repo_slug: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub commit: String,
    pub branch: String,
    pub build_number: String,
    pub pull_request: PullRequest,
    /// The CI system exposed encrypted variables to this run.
    pub secure_env: bool,
    /// Set by the duplicate detector when it ran in continue mode and found
    /// an existing artifact for this commit.
    pub build_exists: bool,
}

impl RunContext {
    /// Builds the context from CI environment variables, read through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PublishError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| PublishError::Config(format!("{name} is not set")))
        };

        let repo_slug = required("TRAVIS_REPO_SLUG")?;
        let (repo_owner, repo_name) = split_slug(&repo_slug)?;
        let commit = required("TRAVIS_COMMIT")?;
        let branch = required("TRAVIS_BRANCH")?;
        let build_number = lookup("TRAVIS_BUILD_NUMBER").unwrap_or_else(|| "0".to_string());
        let pull_request = PullRequest::parse(&lookup("TRAVIS_PULL_REQUEST").unwrap_or_default())?;
        let secure_env = lookup("TRAVIS_SECURE_ENV_VARS")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let ctx = RunContext {
            repo_slug,
            repo_owner,
            repo_name,
            commit,
            branch,
            build_number,
            pull_request,
            secure_env,
            build_exists: false,
        };
        ctx.trace_loaded();
        Ok(ctx)
    }

    pub fn from_env() -> Result<Self, PublishError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn repo_url(&self) -> String {
        format!("https://github.com/{}", self.repo_slug)
    }

    pub fn trace_loaded(&self) {
        info!(
            repo = %self.repo_slug,
            commit = %self.commit,
            branch = %self.branch,
            build_number = %self.build_number,
            pull_request = %self.pull_request,
            secure_env = self.secure_env,
            "Loaded run context"
        );
        debug!(?self, "Run context (full debug)");
    }
}

/// Splits `owner/name` at the first slash. Both halves must be non-empty.
pub fn split_slug(slug: &str) -> Result<(String, String), PublishError> {
    match slug.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() => {
            Ok((owner.to_string(), name.to_string()))
        }
        _ => Err(PublishError::Config(format!(
            "repository slug `{slug}` is not of the form owner/name"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn slug_splits_at_the_slash() {
        let (owner, name) = split_slug("acme/web-frontend").unwrap();
        assert_eq!(owner, "acme");
        assert_eq!(name, "web-frontend");
    }

    #[test]
    fn slug_without_slash_is_a_configuration_error() {
        let err = split_slug("web-frontend").unwrap_err();
        assert!(matches!(err, PublishError::Config(_)));
        assert!(split_slug("acme/").is_err());
    }

    #[test]
    fn pull_request_sentinel_means_merge_build() {
        assert_eq!(PullRequest::parse("false").unwrap(), PullRequest::None);
        assert_eq!(PullRequest::parse("42").unwrap(), PullRequest::Number(42));
        assert!(PullRequest::parse("abc").is_err());
        assert_eq!(PullRequest::Number(7).to_string(), "7");
    }

    #[test]
    fn context_reads_ci_variables() {
        let ctx = RunContext::from_lookup(lookup(&[
            ("TRAVIS_REPO_SLUG", "acme/api"),
            ("TRAVIS_COMMIT", "abc123"),
            ("TRAVIS_BRANCH", "develop"),
            ("TRAVIS_BUILD_NUMBER", "17"),
            ("TRAVIS_PULL_REQUEST", "false"),
            ("TRAVIS_SECURE_ENV_VARS", "true"),
        ]))
        .unwrap();
        assert_eq!(ctx.repo_owner, "acme");
        assert_eq!(ctx.repo_name, "api");
        assert_eq!(ctx.pull_request, PullRequest::None);
        assert!(ctx.secure_env);
        assert!(!ctx.build_exists);
        assert_eq!(ctx.repo_url(), "https://github.com/acme/api");
    }

    #[test]
    fn missing_commit_is_reported() {
        let err = RunContext::from_lookup(lookup(&[
            ("TRAVIS_REPO_SLUG", "acme/api"),
            ("TRAVIS_BRANCH", "develop"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("TRAVIS_COMMIT"));
    }

    #[test]
    fn secrets_are_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{secret:?}"), "Secret(***)");
        assert_eq!(secret.to_string(), "***");
        assert_eq!(secret.expose(), "hunter2");
    }
}
