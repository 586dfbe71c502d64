//! build-publisher: package CI builds, reuse duplicate builds and publish
//! artifacts to S3.
//!
//! The crate is organised as a pipeline of small modules:
//!
//! - [`context`] and [`load_config`] turn CI environment variables and an
//!   optional YAML file into a [`config::PublishConfig`].
//! - [`detect`] finds artifacts already published for the commit.
//! - [`archive`] and [`publish`] build, upload and point to new artifacts.
//! - [`notify`] tells deployment tooling about the result.
//! - [`pipeline`] strings the stages together; [`cli`] exposes them.
//!
//! Remote side effects go through the traits in [`contract`], implemented by
//! [`aws::AwsCli`] and mocked in tests.

pub mod archive;
pub mod aws;
pub mod cli;
pub mod command;
pub mod config;
pub mod context;
pub mod contract;
pub mod detect;
pub mod error;
pub mod fingerprint;
pub mod keys;
pub mod load_config;
pub mod metadata;
pub mod notify;
pub mod pipeline;
pub mod publish;
pub mod tag;

pub use cli::{run, Cli, Commands};
pub use error::PublishError;
