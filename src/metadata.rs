//! The build record written next to the build (`.s3d`) and the optional
//! append-only audit log consumed by external reporting.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::archive::Artifact;
use crate::context::{PullRequest, RunContext};
use crate::contract::TargetLocation;
use crate::error::PublishError;
use crate::keys;

/// Identity of a build and where its artifact lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildRecord {
    pub repo_url: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub repo_slug: String,
    pub revision: String,
    pub branch: String,
    pub build_number: String,
    pub pull_request: PullRequest,
    pub s3_prefix: String,
    /// UNIX seconds.
    pub timestamp: i64,
}

impl BuildRecord {
    pub fn new(ctx: &RunContext, location: &TargetLocation, now: DateTime<Utc>) -> Self {
        BuildRecord {
            repo_url: ctx.repo_url(),
            repo_owner: ctx.repo_owner.clone(),
            repo_name: ctx.repo_name.clone(),
            repo_slug: ctx.repo_slug.clone(),
            revision: ctx.commit.clone(),
            branch: ctx.branch.clone(),
            build_number: ctx.build_number.clone(),
            pull_request: ctx.pull_request,
            s3_prefix: keys::storage_prefix(location),
            timestamp: now.timestamp(),
        }
    }
}

/// Writes the record as pretty JSON to `dir/file_name` and returns the path.
pub fn write_build_record(
    record: &BuildRecord,
    dir: &Path,
    file_name: &str,
) -> Result<PathBuf, PublishError> {
    let path = dir.join(file_name);
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| PublishError::Config(format!("could not encode build record: {e}")))?;
    std::fs::write(&path, json)?;
    info!(path = %path.display(), revision = %record.revision, "Wrote build record");
    Ok(path)
}

/// One row per published commit and checksum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub commit: String,
    pub checksum: String,
    pub branch: String,
    pub repo_name: String,
    pub repo_url: String,
    pub pull_request: PullRequest,
    pub bucket: String,
    pub object_path: String,
    pub etag: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        ctx: &RunContext,
        location: &TargetLocation,
        artifact: &Artifact,
        created_at: DateTime<Utc>,
    ) -> Self {
        AuditRecord {
            commit: ctx.commit.clone(),
            checksum: artifact.checksum.clone(),
            branch: ctx.branch.clone(),
            repo_name: ctx.repo_name.clone(),
            repo_url: ctx.repo_url(),
            pull_request: ctx.pull_request,
            bucket: location.bucket.clone(),
            object_path: location.key.clone(),
            etag: artifact.etag.clone(),
            created_at,
        }
    }
}

/// Appends the record as a single JSON line.
pub fn append_audit_record(record: &AuditRecord, path: &Path) -> Result<(), PublishError> {
    let line = serde_json::to_string(record)
        .map_err(|e| PublishError::Config(format!("could not encode audit record: {e}")))?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{line}")?;
    info!(path = %path.display(), commit = %record.commit, "Appended audit record");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx() -> RunContext {
        RunContext {
            repo_slug: "acme/api".into(),
            repo_owner: "acme".into(),
            repo_name: "api".into(),
            commit: "abc".into(),
            branch: "master".into(),
            build_number: "5".into(),
            pull_request: PullRequest::None,
            secure_env: true,
            build_exists: false,
        }
    }

    #[test]
    fn build_record_json_shape() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap();
        let loc = TargetLocation::new("builds", "api/master/2024/03/abc.tar.gz");
        let record = BuildRecord::new(&ctx(), &loc, now);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["repo_slug"], "acme/api");
        assert_eq!(json["pull_request"], "false");
        assert_eq!(json["s3_prefix"], "s3://builds/api/master/2024/03/abc");
        assert_eq!(json["timestamp"], now.timestamp());
    }

    #[test]
    fn audit_log_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let loc = TargetLocation::new("builds", "api/master/2024/03/abc.tar.gz");
        let artifact = Artifact {
            path: PathBuf::from("api.tar.gz"),
            checksum: "f".repeat(64),
            size: 10,
            etag: Some("etag".into()),
        };
        let record = AuditRecord::new(&ctx(), &loc, &artifact, Utc::now());
        append_audit_record(&record, &path).unwrap();
        append_audit_record(&record, &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        let row: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(row["object_path"], "api/master/2024/03/abc.tar.gz");
        assert_eq!(row["etag"], "etag");
    }
}
