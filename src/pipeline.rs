//! High-level pipeline: orchestrates detect → archive → upload → notify for one CI run.
//!
//! # Stages
//! - **Duplicate detection**: look for an artifact already built from this
//!   commit; on a hit, copy it into place and either halt or continue with
//!   the post-steps only (see [`DuplicatePolicy`]).
//! - **Archive & publish**: archive the build directory, write the build
//!   record next to it, upload the archive and refresh the derived pointers.
//!   The build record never goes into the archive, so the same tree always
//!   yields the same checksum.
//! - **Post-steps**: deployment notification, binary relay, tagging and the
//!   audit log. All of them are best-effort.
//!
//! # Error Handling
//! Missing credentials fail before the first remote call. Archive and upload
//! failures abort with a [`PublishError`]. Pointer, notification, tagging and
//! audit failures are logged and recorded in the [`PublishReport`] only.

use std::path::PathBuf;

use tracing::{error, info, warn};

use crate::archive;
use crate::config::PublishConfig;
use crate::context::RunContext;
use crate::contract::{ObjectStore, QueueClient, TargetLocation};
use crate::detect::{self, Detection, DuplicatePolicy};
use crate::error::PublishError;
use crate::keys::Targets;
use crate::metadata::{self, AuditRecord, BuildRecord};
use crate::notify::{self, Delivery, DeploymentDescriptor, NotificationBody, RelayClient};
use crate::publish::{self, UploadReport};
use crate::tag::{self, TagOutcome};

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub policy: DuplicatePolicy,
    /// Also check the canonical global location, matching on revision.
    pub check_global: bool,
    pub notify: bool,
    pub tag: bool,
    pub audit_log: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// A fresh artifact was built and uploaded.
    Published,
    /// An existing artifact was reused and the run stopped.
    DuplicateHalted { source: TargetLocation },
    /// An existing artifact was reused and the post-steps ran.
    DuplicateContinued { source: TargetLocation },
}

#[derive(Debug)]
pub struct PublishReport {
    pub outcome: PublishOutcome,
    pub targets: Targets,
    pub upload: Option<UploadReport>,
    pub record_path: Option<PathBuf>,
    pub notification: Option<Delivery>,
    pub binary_relay: Option<Delivery>,
    pub tag: Option<TagOutcome>,
}

/// Runs the whole publish pipeline for `ctx`.
pub async fn publish<S, Q>(
    store: &S,
    queue: Option<&Q>,
    relay: Option<&RelayClient>,
    ctx: &mut RunContext,
    config: &PublishConfig,
    options: &PublishOptions,
) -> Result<PublishReport, PublishError>
where
    S: ObjectStore + ?Sized,
    Q: QueueClient + ?Sized,
{
    config.credentials()?;
    let targets = Targets::derive(ctx, config);
    info!(
        repo = %ctx.repo_slug,
        commit = %ctx.commit,
        primary = %targets.primary,
        "[PIPELINE] Starting publish"
    );

    let mut detection = detect::detect_duplicate(store, ctx, config, options.policy).await;
    if !detection.is_found() && options.check_global {
        detection = detect::detect_global(store, ctx, config, options.policy).await;
    }

    let outcome = match detection {
        Detection::Found { source, .. } => match options.policy {
            DuplicatePolicy::Halt => {
                info!(source = %source, "[PIPELINE] Build already published, nothing to do");
                return Ok(PublishReport {
                    outcome: PublishOutcome::DuplicateHalted { source },
                    targets,
                    upload: None,
                    record_path: None,
                    notification: None,
                    binary_relay: None,
                    tag: None,
                });
            }
            DuplicatePolicy::Continue => PublishOutcome::DuplicateContinued { source },
        },
        Detection::NotFound => PublishOutcome::Published,
    };

    let record = BuildRecord::new(ctx, &targets.primary, config.now);
    let mut record_path = None;
    let mut upload = None;

    if !ctx.build_exists {
        let artifact = archive::create_archive(
            &config.build_dir,
            &config.archive_target,
            &archive_excludes(config),
        )
        .await
        .map_err(|e| {
            error!(error = %e, "[PIPELINE][ERROR] Archive step failed");
            e
        })?;

        // Written after archiving: the record changes per run, the artifact must not.
        if let Some(file_name) = &config.metadata_file {
            record_path = Some(metadata::write_build_record(
                &record,
                &config.build_dir,
                file_name,
            )?);
        }

        let report =
            publish::publish_artifact(store, ctx, &targets, artifact, config.global, config.now)
                .await?;

        if let Some(path) = &options.audit_log {
            let audit = AuditRecord::new(ctx, &report.location, &report.artifact, config.now);
            if let Err(e) = metadata::append_audit_record(&audit, path) {
                warn!(error = %e, path = %path.display(), "[PIPELINE] Audit record not written");
            }
        }
        upload = Some(report);
    } else {
        info!("[PIPELINE] Build exists, skipping archive and upload");
    }

    let mut notification = None;
    let mut binary_relay = None;
    if options.notify {
        let descriptor = DeploymentDescriptor::new(record, &config.hints);
        match NotificationBody::new(&descriptor, config.hints.message.as_deref()) {
            Ok(body) => {
                notification = notify::notify_best_effort(
                    ctx,
                    queue,
                    config.queue_name.as_deref(),
                    relay,
                    &body,
                )
                .await;
            }
            Err(e) => warn!(error = %e, "[PIPELINE] Could not build notification body"),
        }
        if let Some(report) = &upload {
            binary_relay = notify::relay_binary_best_effort(
                ctx,
                relay,
                &report.artifact.path,
                &report.location,
            )
            .await;
        }
    }

    let mut tag_outcome = None;
    if options.tag {
        match tag::tag_build(ctx, &config.tag_name, &config.tag_branch_pattern).await {
            Ok(outcome) => tag_outcome = Some(outcome),
            Err(e) => warn!(error = %e, "[PIPELINE] Tagging failed, continuing"),
        }
    }

    info!(outcome = ?outcome, "[PIPELINE] Publish finished");
    Ok(PublishReport {
        outcome,
        targets,
        upload,
        record_path,
        notification,
        binary_relay,
        tag: tag_outcome,
    })
}

/// Configured exclusions plus the build record, which a previous run may have
/// left in the build directory.
fn archive_excludes(config: &PublishConfig) -> Vec<String> {
    let mut excludes = config.excludes.clone();
    if let Some(file_name) = &config.metadata_file {
        excludes.push(globset::escape(file_name));
    }
    excludes
}
