//! Tags the built commit in version control when the branch asks for it.

use regex::Regex;
use tracing::{error, info};

use crate::command;
use crate::context::RunContext;
use crate::error::{PublishError, StoreError};

const GIT: &str = "git";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagOutcome {
    Tagged { tag: String },
    Skipped(String),
}

pub fn tag_args(tag: &str, commit: &str) -> Vec<String> {
    vec!["tag".into(), tag.into(), commit.into()]
}

pub fn push_tag_args(remote: &str, tag: &str) -> Vec<String> {
    vec!["push".into(), remote.into(), tag.into()]
}

/// Tagging applies to merge builds on branches matching `pattern`.
pub fn should_tag(ctx: &RunContext, pattern: &str) -> Result<bool, PublishError> {
    if ctx.pull_request.is_pull_request() {
        return Ok(false);
    }
    let re = Regex::new(pattern)
        .map_err(|e| PublishError::Config(format!("invalid tag branch pattern `{pattern}`: {e}")))?;
    Ok(re.is_match(&ctx.branch))
}

/// Creates `tag` on the run's commit and pushes it to `origin`.
pub async fn tag_build(
    ctx: &RunContext,
    tag: &str,
    pattern: &str,
) -> Result<TagOutcome, PublishError> {
    if !should_tag(ctx, pattern)? {
        info!(branch = %ctx.branch, pattern, "[TAG] Branch does not match, not tagging");
        return Ok(TagOutcome::Skipped(format!(
            "branch `{}` does not match `{pattern}`",
            ctx.branch
        )));
    }

    run_git("git tag", tag_args(tag, &ctx.commit)).await?;
    run_git("git push", push_tag_args("origin", tag)).await?;
    info!(tag, commit = %ctx.commit, "[TAG] Tagged and pushed");
    Ok(TagOutcome::Tagged {
        tag: tag.to_string(),
    })
}

async fn run_git(operation: &'static str, args: Vec<String>) -> Result<(), PublishError> {
    command::run(GIT, operation, &args, &[])
        .await
        .map(|_| ())
        .map_err(|e: StoreError| {
            error!(error = %e, operation, "[TAG][ERROR] git command failed");
            PublishError::Tag(e)
        })
}
