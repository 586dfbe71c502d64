//! Duplicate detection: reuse an artifact already published for this commit.
//!
//! Candidate locations are the dated branch keys of the current branch and
//! the primary branches, for the current and trailing months. The first hit
//! is copied server-side to this run's primary location and branch latest
//! pointer, so a commit merged from one branch into another is never rebuilt.
//!
//! A lookup that fails (network, permissions) counts as "not found": a
//! redundant upload is preferred over wrongly skipping a build. Such failures
//! are logged as `lookup_failed`, separate from a confirmed `absent`.

use tracing::{error, info, warn};

use crate::config::PublishConfig;
use crate::context::RunContext;
use crate::contract::{ObjectStore, TargetLocation};
use crate::keys::{self, Targets};

/// What to do once an existing artifact is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Stop the run successfully.
    #[default]
    Halt,
    /// Record `build_exists` on the run context and let post-steps run.
    Continue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// No reusable artifact; build and publish.
    NotFound,
    /// Existing artifact copied into place; skip the build.
    Found {
        source: TargetLocation,
        /// Whether the branch latest pointer now refers to the artifact.
        latest_updated: bool,
    },
}

impl Detection {
    pub fn is_found(&self) -> bool {
        matches!(self, Detection::Found { .. })
    }
}

/// Outcome of one HEAD query, keeping "absent" apart from "could not tell".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Present { revision: Option<String> },
    Absent,
    Failed(String),
}

pub async fn lookup<S: ObjectStore + ?Sized>(store: &S, location: &TargetLocation) -> Lookup {
    match store.head_object(location).await {
        Ok(Some(head)) => Lookup::Present {
            revision: head.revision,
        },
        Ok(None) => Lookup::Absent,
        Err(e) => Lookup::Failed(e.to_string()),
    }
}

/// Branch scopes to search: the current branch first, then the primaries.
pub fn candidate_scopes(ctx: &RunContext, config: &PublishConfig) -> Vec<String> {
    let mut scopes = vec![ctx.branch.clone()];
    for branch in &config.primary_branches {
        if !scopes.contains(branch) {
            scopes.push(branch.clone());
        }
    }
    scopes
}

/// Every dated location that could hold this commit's artifact, in search order.
pub fn candidate_locations(ctx: &RunContext, config: &PublishConfig) -> Vec<TargetLocation> {
    let months = keys::trailing_months(config.now, config.months_back);
    let mut locations = Vec::new();
    for scope in candidate_scopes(ctx, config) {
        for (year, month) in &months {
            locations.push(TargetLocation::new(
                config.bucket.clone(),
                keys::branch_key(&ctx.repo_name, &scope, *year, *month, &ctx.commit),
            ));
        }
    }
    locations
}

/// Searches the branch scopes for this commit's artifact.
pub async fn detect_duplicate<S: ObjectStore + ?Sized>(
    store: &S,
    ctx: &mut RunContext,
    config: &PublishConfig,
    policy: DuplicatePolicy,
) -> Detection {
    let targets = Targets::derive(ctx, config);
    info!(commit = %ctx.commit, "[DETECT] Looking for an existing artifact");

    for candidate in candidate_locations(ctx, config) {
        match lookup(store, &candidate).await {
            Lookup::Present { .. } => {
                info!(location = %candidate, "[DETECT] Existing artifact found");
                if let Some(detection) = adopt(store, &candidate, &targets).await {
                    apply_policy(ctx, policy);
                    return detection;
                }
            }
            Lookup::Absent => {
                info!(location = %candidate, outcome = "absent", "[DETECT] No artifact");
            }
            Lookup::Failed(reason) => {
                warn!(
                    location = %candidate,
                    outcome = "lookup_failed",
                    error = %reason,
                    "[DETECT] Lookup failed, treating as not found"
                );
            }
        }
    }

    info!(commit = %ctx.commit, "[DETECT] No existing artifact, a fresh build is needed");
    Detection::NotFound
}

/// Checks the canonical global location and matches on the stored revision,
/// since the global key does not always encode the commit.
pub async fn detect_global<S: ObjectStore + ?Sized>(
    store: &S,
    ctx: &mut RunContext,
    config: &PublishConfig,
    policy: DuplicatePolicy,
) -> Detection {
    let targets = Targets::derive(ctx, config);
    let global = targets.global.clone();
    info!(location = %global, commit = %ctx.commit, "[DETECT] Checking global artifact");

    match lookup(store, &global).await {
        Lookup::Present {
            revision: Some(revision),
        } if revision == ctx.commit => {
            info!(location = %global, "[DETECT] Global artifact matches this commit");
            if let Some(detection) = adopt(store, &global, &targets).await {
                apply_policy(ctx, policy);
                return detection;
            }
        }
        Lookup::Present { revision } => {
            info!(
                location = %global,
                stored_revision = revision.as_deref().unwrap_or("<none>"),
                "[DETECT] Global artifact is from another revision"
            );
        }
        Lookup::Absent => {
            info!(location = %global, outcome = "absent", "[DETECT] No global artifact");
        }
        Lookup::Failed(reason) => {
            warn!(
                location = %global,
                outcome = "lookup_failed",
                error = %reason,
                "[DETECT] Global lookup failed, treating as not found"
            );
        }
    }
    Detection::NotFound
}

/// Copies `source` into the run's primary location and latest pointer.
/// Returns `None` when the primary copy failed, so the caller publishes afresh.
async fn adopt<S: ObjectStore + ?Sized>(
    store: &S,
    source: &TargetLocation,
    targets: &Targets,
) -> Option<Detection> {
    if !source.same_object(&targets.primary) {
        if let Err(e) = store.copy_object(source, &targets.primary).await {
            error!(
                source = %source,
                destination = %targets.primary,
                error = %e,
                "[DETECT][ERROR] Could not copy existing artifact, publishing afresh"
            );
            return None;
        }
        info!(source = %source, destination = %targets.primary, "[DETECT] Copied artifact");
    }

    let latest_updated = match store.copy_object(source, &targets.latest).await {
        Ok(()) => {
            info!(destination = %targets.latest, "[DETECT] Updated latest pointer");
            true
        }
        Err(e) => {
            warn!(
                destination = %targets.latest,
                error = %e,
                "[DETECT] Latest pointer update failed"
            );
            false
        }
    };

    Some(Detection::Found {
        source: source.clone(),
        latest_updated,
    })
}

fn apply_policy(ctx: &mut RunContext, policy: DuplicatePolicy) {
    match policy {
        DuplicatePolicy::Halt => {
            info!("[DETECT] Build already exists, halting");
        }
        DuplicatePolicy::Continue => {
            info!("[DETECT] Build already exists, continuing with post-steps");
            ctx.build_exists = true;
        }
    }
}
