//! Object-key conventions and the target locations derived for a run.
//!
//! ```text
//! <repo>/<branch>/<YYYY>/<MM>/<commit>.tar.gz   branch scoped
//! <repo>/<branch>/latest.tar.gz                 branch latest pointer
//! <repo>/_global_/<commit>.tar.gz               global per commit
//! <repo>/_global_/<branch>.tar.gz               global per branch
//! <repo>/_global_/pr-<number>.tar.gz            global per pull request
//! ```

use chrono::{DateTime, Datelike, Utc};

use crate::config::PublishConfig;
use crate::context::{PullRequest, RunContext};
use crate::contract::TargetLocation;

pub const ARCHIVE_EXTENSION: &str = "tar.gz";

pub fn branch_key(repo: &str, branch: &str, year: i32, month: u32, commit: &str) -> String {
    format!("{repo}/{branch}/{year:04}/{month:02}/{commit}.{ARCHIVE_EXTENSION}")
}

pub fn latest_key(repo: &str, branch: &str) -> String {
    format!("{repo}/{branch}/latest.{ARCHIVE_EXTENSION}")
}

pub fn global_commit_key(repo: &str, global_dir: &str, commit: &str) -> String {
    format!("{repo}/{global_dir}/{commit}.{ARCHIVE_EXTENSION}")
}

pub fn global_branch_key(repo: &str, global_dir: &str, branch: &str) -> String {
    format!("{repo}/{global_dir}/{branch}.{ARCHIVE_EXTENSION}")
}

pub fn global_pr_key(repo: &str, global_dir: &str, number: u64) -> String {
    format!("{repo}/{global_dir}/pr-{number}.{ARCHIVE_EXTENSION}")
}

/// Canonical global key: per commit for merge builds, per PR otherwise.
pub fn default_global_key(
    repo: &str,
    global_dir: &str,
    pull_request: PullRequest,
    commit: &str,
) -> String {
    match pull_request {
        PullRequest::None => global_commit_key(repo, global_dir, commit),
        PullRequest::Number(n) => global_pr_key(repo, global_dir, n),
    }
}

/// `(year, month)` of `now` followed by the `months_back` preceding months.
pub fn trailing_months(now: DateTime<Utc>, months_back: u32) -> Vec<(i32, u32)> {
    let mut year = now.year();
    let mut month = now.month();
    let mut months = Vec::with_capacity(months_back as usize + 1);
    months.push((year, month));
    for _ in 0..months_back {
        if month == 1 {
            month = 12;
            year -= 1;
        } else {
            month -= 1;
        }
        months.push((year, month));
    }
    months
}

/// Storage prefix advertised to downstream consumers: the artifact URI
/// without its archive extension.
pub fn storage_prefix(location: &TargetLocation) -> String {
    let key = location
        .key
        .strip_suffix(&format!(".{ARCHIVE_EXTENSION}"))
        .unwrap_or(&location.key);
    format!("s3://{}/{}", location.bucket, key)
}

/// All locations a run reads from or writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Targets {
    pub primary: TargetLocation,
    pub latest: TargetLocation,
    /// The canonical global location (`PublishConfig::global_key`).
    pub global: TargetLocation,
    /// Global per-branch pointer; merge builds only.
    pub global_branch: Option<TargetLocation>,
}

impl Targets {
    pub fn derive(ctx: &RunContext, config: &PublishConfig) -> Self {
        let bucket = config.bucket.as_str();
        let global_branch = match ctx.pull_request {
            PullRequest::None => Some(TargetLocation::new(
                bucket,
                global_branch_key(&ctx.repo_name, &config.global_dir, &ctx.branch),
            )),
            PullRequest::Number(_) => None,
        };
        Targets {
            primary: TargetLocation::new(bucket, config.key.clone()),
            latest: TargetLocation::new(bucket, latest_key(&ctx.repo_name, &ctx.branch)),
            global: TargetLocation::new(bucket, config.global_key.clone()),
            global_branch,
        }
    }

    /// Pointers refreshed from the primary artifact after an upload, in order.
    pub fn pointers(&self, include_global: bool) -> Vec<TargetLocation> {
        let mut pointers = vec![self.latest.clone()];
        if include_global {
            pointers.push(self.global.clone());
            if let Some(branch) = &self.global_branch {
                pointers.push(branch.clone());
            }
        }
        pointers
    }
}
