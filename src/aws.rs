//! `aws` CLI driver for the [`ObjectStore`] and [`QueueClient`] contracts.
//!
//! Every invocation is described by an argument builder returning a list of
//! discrete arguments; optional flags are added as separate elements, never
//! spliced into a string.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::command;
use crate::config::PublishConfig;
use crate::context::Credentials;
use crate::contract::{
    ObjectHead, ObjectMetadata, ObjectStore, QueueClient, SyncFilter, SyncRequest,
    TargetLocation, UploadReceipt,
};
use crate::error::{PublishError, StoreError};

const AWS: &str = "aws";

pub struct AwsCli {
    region: String,
    credentials: Credentials,
}

impl AwsCli {
    pub fn new(region: impl Into<String>, credentials: Credentials) -> Self {
        AwsCli {
            region: region.into(),
            credentials,
        }
    }

    /// Fails with [`PublishError::MissingSecret`] when the credentials are incomplete.
    pub fn from_config(config: &PublishConfig) -> Result<Self, PublishError> {
        let credentials = config.credentials()?.clone();
        info!(
            region = %config.region,
            access_key_set = !credentials.access_key_id.is_empty(),
            "Initialized aws CLI client"
        );
        Ok(AwsCli::new(config.region.clone(), credentials))
    }

    async fn run(&self, operation: &'static str, args: Vec<String>) -> Result<String, StoreError> {
        let envs = [
            ("AWS_ACCESS_KEY_ID", self.credentials.access_key_id.as_str()),
            (
                "AWS_SECRET_ACCESS_KEY",
                self.credentials.secret_access_key.expose(),
            ),
            ("AWS_DEFAULT_REGION", self.region.as_str()),
        ];
        command::run(AWS, operation, &args, &envs)
            .await
            .map(|out| out.stdout)
    }
}

fn args<const N: usize>(fixed: [&str; N]) -> Vec<String> {
    fixed.iter().map(|s| s.to_string()).collect()
}

pub fn head_object_args(location: &TargetLocation, region: &str) -> Vec<String> {
    let mut a = args(["s3api", "head-object", "--bucket"]);
    a.push(location.bucket.clone());
    a.push("--key".into());
    a.push(location.key.clone());
    a.extend(args(["--region"]));
    a.push(region.to_string());
    a.extend(args(["--output", "json"]));
    a
}

/// `bucket/key` with every key segment percent-encoded, as `--copy-source` expects.
pub fn copy_source(source: &TargetLocation) -> String {
    let key = source
        .key
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    format!("{}/{}", source.bucket, key)
}

pub fn copy_object_args(
    source: &TargetLocation,
    destination: &TargetLocation,
    region: &str,
) -> Vec<String> {
    let mut a = args(["s3api", "copy-object", "--copy-source"]);
    a.push(copy_source(source));
    a.push("--bucket".into());
    a.push(destination.bucket.clone());
    a.push("--key".into());
    a.push(destination.key.clone());
    a.push("--acl".into());
    a.push(destination.acl.to_string());
    a.extend(args(["--metadata-directive", "COPY", "--region"]));
    a.push(region.to_string());
    a
}

pub fn put_object_args(
    file: &Path,
    destination: &TargetLocation,
    metadata: &ObjectMetadata,
    region: &str,
) -> Result<Vec<String>, serde_json::Error> {
    let mut a = args(["s3api", "put-object", "--bucket"]);
    a.push(destination.bucket.clone());
    a.push("--key".into());
    a.push(destination.key.clone());
    a.push("--body".into());
    a.push(file.display().to_string());
    a.push("--acl".into());
    a.push(destination.acl.to_string());
    a.push("--metadata".into());
    a.push(serde_json::to_string(metadata)?);
    a.push("--region".into());
    a.push(region.to_string());
    a.extend(args(["--output", "json"]));
    Ok(a)
}

pub fn sync_args(request: &SyncRequest, region: &str) -> Vec<String> {
    let mut a = args(["s3", "sync"]);
    a.push(request.source_dir.display().to_string());
    a.push(request.destination_uri());
    a.push("--acl".into());
    a.push(request.acl.to_string());
    for filter in &request.filters {
        match filter {
            SyncFilter::Include(p) => a.extend(["--include".to_string(), p.clone()]),
            SyncFilter::Exclude(p) => a.extend(["--exclude".to_string(), p.clone()]),
        }
    }
    a.push("--region".into());
    a.push(region.to_string());
    a
}

pub fn queue_url_args(queue_name: &str, region: &str) -> Vec<String> {
    let mut a = args(["sqs", "get-queue-url", "--queue-name"]);
    a.push(queue_name.to_string());
    a.push("--region".into());
    a.push(region.to_string());
    a.extend(args(["--query", "QueueUrl", "--output", "text"]));
    a
}

pub fn send_message_args(queue_url: &str, body: &str, region: &str) -> Vec<String> {
    let mut a = args(["sqs", "send-message", "--queue-url"]);
    a.push(queue_url.to_string());
    a.push("--message-body".into());
    a.push(body.to_string());
    a.push("--region".into());
    a.push(region.to_string());
    a
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HeadObjectOutput {
    #[serde(rename = "ETag")]
    e_tag: Option<String>,
    last_modified: Option<String>,
    #[serde(default)]
    metadata: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PutObjectOutput {
    #[serde(rename = "ETag")]
    e_tag: Option<String>,
}

fn unquote(etag: String) -> String {
    etag.trim_matches('"').to_string()
}

/// Parses `head-object` JSON output.
pub fn parse_head_output(stdout: &str) -> Result<ObjectHead, StoreError> {
    let out: HeadObjectOutput =
        serde_json::from_str(stdout).map_err(|e| StoreError::Output {
            operation: "s3api head-object",
            message: e.to_string(),
        })?;
    Ok(ObjectHead {
        etag: out.e_tag.map(unquote),
        revision: out.metadata.get("revision").cloned(),
        last_modified: out.last_modified,
    })
}

/// The CLI reports a missing key as a 404 on stderr.
pub fn is_not_found(err: &StoreError) -> bool {
    match err {
        StoreError::Command { stderr, .. } => {
            stderr.contains("(404)") || stderr.contains("Not Found") || stderr.contains("NoSuchKey")
        }
        _ => false,
    }
}

#[async_trait]
impl ObjectStore for AwsCli {
    async fn head_object(
        &self,
        location: &TargetLocation,
    ) -> Result<Option<ObjectHead>, StoreError> {
        let args = head_object_args(location, &self.region);
        match self.run("s3api head-object", args).await {
            Ok(stdout) => parse_head_output(&stdout).map(Some),
            Err(e) if is_not_found(&e) => {
                debug!(location = %location, "Object not found");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn copy_object(
        &self,
        source: &TargetLocation,
        destination: &TargetLocation,
    ) -> Result<(), StoreError> {
        let args = copy_object_args(source, destination, &self.region);
        self.run("s3api copy-object", args).await.map(|_| ())
    }

    async fn put_object(
        &self,
        file: &Path,
        destination: &TargetLocation,
        metadata: &ObjectMetadata,
    ) -> Result<UploadReceipt, StoreError> {
        let args = put_object_args(file, destination, metadata, &self.region).map_err(|e| {
            StoreError::Output {
                operation: "s3api put-object",
                message: e.to_string(),
            }
        })?;
        let stdout = self.run("s3api put-object", args).await?;
        let etag = match serde_json::from_str::<PutObjectOutput>(&stdout) {
            Ok(out) => out.e_tag.map(unquote),
            Err(e) => {
                warn!(error = %e, "Could not parse put-object output, entity tag unknown");
                None
            }
        };
        Ok(UploadReceipt { etag })
    }

    async fn sync_dir(&self, request: &SyncRequest) -> Result<(), StoreError> {
        let args = sync_args(request, &self.region);
        self.run("s3 sync", args).await.map(|_| ())
    }
}

#[async_trait]
impl QueueClient for AwsCli {
    async fn queue_url(&self, queue_name: &str) -> Result<String, StoreError> {
        let stdout = self
            .run("sqs get-queue-url", queue_url_args(queue_name, &self.region))
            .await?;
        let url = stdout.trim();
        if url.is_empty() || url == "None" {
            return Err(StoreError::Output {
                operation: "sqs get-queue-url",
                message: format!("no URL returned for queue `{queue_name}`"),
            });
        }
        Ok(url.to_string())
    }

    async fn send_message(&self, queue_url: &str, body: &str) -> Result<(), StoreError> {
        self.run(
            "sqs send-message",
            send_message_args(queue_url, body, &self.region),
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::Acl;
    use std::path::PathBuf;

    #[test]
    fn head_object_arguments_are_discrete() {
        let loc = TargetLocation::new("builds", "api/my branch/latest.tar.gz");
        assert_eq!(
            head_object_args(&loc, "eu-west-1"),
            vec![
                "s3api",
                "head-object",
                "--bucket",
                "builds",
                "--key",
                "api/my branch/latest.tar.gz",
                "--region",
                "eu-west-1",
                "--output",
                "json"
            ]
        );
    }

    #[test]
    fn copy_is_server_side_and_keeps_metadata() {
        let src = TargetLocation::new("builds", "api/master/2024/03/abc.tar.gz");
        let dst = TargetLocation::new("builds", "api/develop/latest.tar.gz");
        let a = copy_object_args(&src, &dst, "us-east-1");
        assert_eq!(a[3], "builds/api/master/2024/03/abc.tar.gz");
        assert!(a.windows(2).any(|w| w == ["--metadata-directive", "COPY"]));
        assert!(a.windows(2).any(|w| w == ["--acl", "private"]));
    }

    #[test]
    fn copy_source_encodes_key_segments() {
        let src = TargetLocation::new("builds", "api/feat a+b#1%/2024/03/abc.tar.gz");
        assert_eq!(
            copy_source(&src),
            "builds/api/feat%20a%2Bb%231%25/2024/03/abc.tar.gz"
        );
        let dst = TargetLocation::new("builds", "api/feat a+b#1%/latest.tar.gz");
        let a = copy_object_args(&src, &dst, "us-east-1");
        assert_eq!(a[3], "builds/api/feat%20a%2Bb%231%25/2024/03/abc.tar.gz");
        // The destination key is a plain argument and stays unencoded.
        assert!(a.windows(2).any(|w| w == ["--key", "api/feat a+b#1%/latest.tar.gz"]));
    }

    #[test]
    fn put_object_carries_metadata_as_json() {
        let dst = TargetLocation::new("builds", "api/master/latest.tar.gz");
        let meta = ObjectMetadata {
            revision: "abc".into(),
            pull_request: "false".into(),
            timestamp: "2024-03-09T14:07:33Z".into(),
        };
        let a = put_object_args(Path::new("/tmp/api.tar.gz"), &dst, &meta, "us-east-1").unwrap();
        let idx = a.iter().position(|x| x == "--metadata").unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&a[idx + 1]).unwrap();
        assert_eq!(parsed["revision"], "abc");
        assert_eq!(parsed["pull_request"], "false");
    }

    #[test]
    fn sync_filters_keep_their_order() {
        let req = SyncRequest {
            source_dir: PathBuf::from("dist"),
            bucket: "assets".into(),
            prefix: "app".into(),
            acl: Acl::PublicRead,
            filters: vec![
                SyncFilter::Exclude("*".into()),
                SyncFilter::Include("*.js".into()),
            ],
        };
        assert_eq!(
            sync_args(&req, "us-east-1"),
            vec![
                "s3",
                "sync",
                "dist",
                "s3://assets/app",
                "--acl",
                "public-read",
                "--exclude",
                "*",
                "--include",
                "*.js",
                "--region",
                "us-east-1"
            ]
        );
    }

    #[test]
    fn message_body_is_a_single_argument() {
        let body = r#"{"a": "b c; rm -rf /"}"#;
        let a = send_message_args("https://sqs/q", body, "us-east-1");
        assert_eq!(a[5], body);
        assert_eq!(a.len(), 8);
    }

    #[test]
    fn head_output_parses_revision_and_etag() {
        let out = r#"{"ETag": "\"d41d8cd98f00b204e9800998ecf8427e\"", "LastModified": "Sat, 09 Mar 2024 14:07:33 GMT", "Metadata": {"revision": "abc"}}"#;
        let head = parse_head_output(out).unwrap();
        assert_eq!(head.etag.as_deref(), Some("d41d8cd98f00b204e9800998ecf8427e"));
        assert_eq!(head.revision.as_deref(), Some("abc"));
    }

    #[test]
    fn not_found_is_recognised() {
        let err = StoreError::Command {
            operation: "s3api head-object",
            status: Some(254),
            stderr: "An error occurred (404) when calling the HeadObject operation: Not Found".into(),
        };
        assert!(is_not_found(&err));
        let denied = StoreError::Command {
            operation: "s3api head-object",
            status: Some(254),
            stderr: "An error occurred (403) when calling the HeadObject operation: Forbidden".into(),
        };
        assert!(!is_not_found(&denied));
    }
}
