//! Error types for the publishing pipeline.
//!
//! Fatal failures surface as [`PublishError`] and decide the process exit code.
//! Best-effort side channels (notification, pointer copies, tagging inside a
//! publish) report through [`SideChannelError`] instead, so a failure there can
//! never be mistaken for a failed publish.

use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single object-store, queue or version-control command.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{operation}` exited with status {status:?}: {stderr}")]
    Command {
        operation: &'static str,
        status: Option<i32>,
        stderr: String,
    },

    #[error("unexpected output from `{operation}`: {message}")]
    Output {
        operation: &'static str,
        message: String,
    },
}

impl StoreError {
    /// Exit status of the underlying command, when it ran to completion.
    pub fn status(&self) -> Option<i32> {
        match self {
            StoreError::Command { status, .. } => *status,
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("required secret {0} is not set")]
    MissingSecret(&'static str),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("archiving {path} failed: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checksum of {path} failed: {source}")]
    Checksum {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("upload to {location} failed: {source}")]
    Upload {
        location: String,
        #[source]
        source: StoreError,
    },

    #[error("sync to {location} failed: {source}")]
    Sync {
        location: String,
        #[source]
        source: StoreError,
    },

    #[error("files without a content fingerprint in their name: {}", files.join(", "))]
    Fingerprint { files: Vec<String> },

    #[error("tagging failed: {0}")]
    Tag(#[source] StoreError),

    #[error("notification failed: {0}")]
    Notify(#[source] SideChannelError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PublishError {
    /// Process exit code for this failure. Collaborator exit statuses are
    /// propagated when the command ran and reported one.
    pub fn exit_code(&self) -> i32 {
        match self {
            PublishError::Upload { source, .. }
            | PublishError::Sync { source, .. }
            | PublishError::Tag(source) => match source.status() {
                Some(code) if code != 0 => code,
                _ => 1,
            },
            _ => 1,
        }
    }
}

/// Failure in a best-effort side channel.
#[derive(Debug, Error)]
pub enum SideChannelError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("relay request failed: {0}")]
    Relay(#[from] reqwest::Error),

    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not encode descriptor: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type SideChannelResult<T = ()> = Result<T, SideChannelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_failure_propagates_collaborator_status() {
        let err = PublishError::Upload {
            location: "s3://bucket/key".into(),
            source: StoreError::Command {
                operation: "s3api put-object",
                status: Some(255),
                stderr: "boom".into(),
            },
        };
        assert_eq!(err.exit_code(), 255);
    }

    #[test]
    fn configuration_failures_exit_with_one() {
        assert_eq!(PublishError::MissingSecret("AWS_ACCESS_KEY_ID").exit_code(), 1);
        assert_eq!(
            PublishError::Fingerprint {
                files: vec!["app.js".into()]
            }
            .exit_code(),
            1
        );
    }
}
