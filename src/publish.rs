//! Uploading artifacts, refreshing derived pointers and syncing directories.

use tracing::{error, info, warn};

use crate::archive::Artifact;
use crate::context::RunContext;
use crate::contract::{ObjectMetadata, ObjectStore, SyncRequest, TargetLocation};
use crate::error::{PublishError, SideChannelError};
use crate::keys::Targets;

/// One pointer that could not be refreshed after a successful upload.
#[derive(Debug)]
pub struct PointerFailure {
    pub pointer: TargetLocation,
    pub error: SideChannelError,
}

#[derive(Debug)]
pub struct UploadReport {
    pub location: TargetLocation,
    pub artifact: Artifact,
    pub pointers_updated: Vec<TargetLocation>,
    pub pointer_failures: Vec<PointerFailure>,
}

pub fn upload_metadata(ctx: &RunContext, timestamp: chrono::DateTime<chrono::Utc>) -> ObjectMetadata {
    ObjectMetadata {
        revision: ctx.commit.clone(),
        pull_request: ctx.pull_request.to_string(),
        timestamp: timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
    }
}

/// Uploads the artifact to the primary location, then copies it server-side
/// to each pointer. Upload failure is fatal; pointer failures are collected.
pub async fn publish_artifact<S: ObjectStore + ?Sized>(
    store: &S,
    ctx: &RunContext,
    targets: &Targets,
    mut artifact: Artifact,
    include_global: bool,
    timestamp: chrono::DateTime<chrono::Utc>,
) -> Result<UploadReport, PublishError> {
    let metadata = upload_metadata(ctx, timestamp);
    info!(
        location = %targets.primary,
        checksum = %artifact.checksum,
        size = artifact.size,
        "[PUBLISH] Uploading artifact"
    );

    let receipt = store
        .put_object(&artifact.path, &targets.primary, &metadata)
        .await
        .map_err(|e| {
            error!(location = %targets.primary, error = %e, "[PUBLISH][ERROR] Upload failed");
            PublishError::Upload {
                location: targets.primary.uri(),
                source: e,
            }
        })?;
    artifact.etag = receipt.etag;
    info!(
        location = %targets.primary,
        etag = artifact.etag.as_deref().unwrap_or("<unknown>"),
        "[PUBLISH] Upload complete"
    );

    let mut pointers_updated = Vec::new();
    let mut pointer_failures = Vec::new();
    for pointer in targets.pointers(include_global) {
        match store.copy_object(&targets.primary, &pointer).await {
            Ok(()) => {
                info!(pointer = %pointer, "[PUBLISH] Pointer updated");
                pointers_updated.push(pointer);
            }
            Err(e) => {
                warn!(pointer = %pointer, error = %e, "[PUBLISH] Pointer update failed");
                pointer_failures.push(PointerFailure {
                    pointer,
                    error: e.into(),
                });
            }
        }
    }

    Ok(UploadReport {
        location: targets.primary.clone(),
        artifact,
        pointers_updated,
        pointer_failures,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced { destination: String },
    /// Pull-request builds never sync.
    SkippedPullRequest,
}

/// Mirrors a local directory to a bucket prefix. Skipped for pull requests.
pub async fn sync_directory<S: ObjectStore + ?Sized>(
    store: &S,
    ctx: &RunContext,
    request: &SyncRequest,
) -> Result<SyncOutcome, PublishError> {
    if ctx.pull_request.is_pull_request() {
        info!(
            pull_request = %ctx.pull_request,
            "[SYNC] Pull request build, skipping directory sync"
        );
        return Ok(SyncOutcome::SkippedPullRequest);
    }

    let destination = request.destination_uri();
    info!(
        source = %request.source_dir.display(),
        destination = %destination,
        acl = %request.acl,
        filters = request.filters.len(),
        "[SYNC] Syncing directory"
    );
    store.sync_dir(request).await.map_err(|e| {
        error!(destination = %destination, error = %e, "[SYNC][ERROR] Directory sync failed");
        PublishError::Sync {
            location: destination.clone(),
            source: e,
        }
    })?;
    Ok(SyncOutcome::Synced { destination })
}
