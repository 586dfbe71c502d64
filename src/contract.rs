//! # contract: interfaces to the object store and the message queue
//!
//! The pipeline never talks to S3 or SQS directly. It goes through the
//! [`ObjectStore`] and [`QueueClient`] traits defined here, which are
//! implemented by the `aws` CLI driver ([`crate::aws::AwsCli`]) in production
//! and by `mockall` mocks in tests.
//!
//! ## Mocking & Testing
//! - Both traits are annotated for `mockall`; with the default
//!   `test-export-mocks` feature `MockObjectStore` and `MockQueueClient` are
//!   exported for integration tests.
//!
//! ## Lookup semantics
//! - [`ObjectStore::head_object`] returns `Ok(None)` only when the store
//!   confirmed the key is absent. Any other failure is an `Err`; callers decide
//!   whether to treat it as absent.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use serde::Serialize;

use crate::error::StoreError;

/// Canned access-control setting applied to uploaded or copied objects.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Acl {
    #[default]
    Private,
    PublicRead,
    Other(String),
}

impl Acl {
    pub fn as_str(&self) -> &str {
        match self {
            Acl::Private => "private",
            Acl::PublicRead => "public-read",
            Acl::Other(s) => s,
        }
    }
}

impl From<&str> for Acl {
    fn from(s: &str) -> Self {
        match s {
            "private" => Acl::Private,
            "public-read" => Acl::PublicRead,
            other => Acl::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Acl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an artifact is or will be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetLocation {
    pub bucket: String,
    pub key: String,
    pub acl: Acl,
}

impl TargetLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        TargetLocation {
            bucket: bucket.into(),
            key: key.into(),
            acl: Acl::Private,
        }
    }

    pub fn with_acl(mut self, acl: Acl) -> Self {
        self.acl = acl;
        self
    }

    /// `s3://bucket/key`
    pub fn uri(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }

    /// Same object, ignoring the ACL.
    pub fn same_object(&self, other: &TargetLocation) -> bool {
        self.bucket == other.bucket && self.key == other.key
    }
}

impl fmt::Display for TargetLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

/// What a HEAD query learned about an existing object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectHead {
    pub etag: Option<String>,
    /// Commit recorded in the object's `revision` metadata.
    pub revision: Option<String>,
    pub last_modified: Option<String>,
}

/// Metadata attached to every uploaded artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectMetadata {
    pub revision: String,
    pub pull_request: String,
    /// ISO-8601 upload time.
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReceipt {
    pub etag: Option<String>,
}

/// Pass-through include/exclude filter for a directory sync. Order matters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncFilter {
    Include(String),
    Exclude(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub source_dir: PathBuf,
    pub bucket: String,
    pub prefix: String,
    pub acl: Acl,
    pub filters: Vec<SyncFilter>,
}

impl SyncRequest {
    pub fn destination_uri(&self) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("s3://{}", self.bucket)
        } else {
            format!("s3://{}/{}", self.bucket, prefix)
        }
    }
}

/// Object-store operations needed by the detector and the publisher.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// HEAD the object. `Ok(None)` means the store confirmed it does not exist.
    async fn head_object(&self, location: &TargetLocation)
        -> Result<Option<ObjectHead>, StoreError>;

    /// Server-side copy; the bytes never leave the store.
    async fn copy_object(
        &self,
        source: &TargetLocation,
        destination: &TargetLocation,
    ) -> Result<(), StoreError>;

    /// Upload a local file with the given metadata.
    async fn put_object(
        &self,
        file: &Path,
        destination: &TargetLocation,
        metadata: &ObjectMetadata,
    ) -> Result<UploadReceipt, StoreError>;

    /// Mirror a local directory to a bucket prefix.
    async fn sync_dir(&self, request: &SyncRequest) -> Result<(), StoreError>;
}

/// Message-queue operations used by the notifier.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Resolve a queue URL from its name.
    async fn queue_url(&self, queue_name: &str) -> Result<String, StoreError>;

    async fn send_message(&self, queue_url: &str, body: &str) -> Result<(), StoreError>;
}
