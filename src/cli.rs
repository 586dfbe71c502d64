use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};

use crate::aws::AwsCli;
use crate::config::{NotifyHints, PublishConfig, Settings};
use crate::context::RunContext;
use crate::contract::{Acl, SyncFilter, SyncRequest};
use crate::detect::{self, DuplicatePolicy};
use crate::error::PublishError;
use crate::fingerprint;
use crate::keys::Targets;
use crate::load_config::{load_settings, resolve};
use crate::metadata::{self, BuildRecord};
use crate::notify::{self, DeploymentDescriptor, NotificationBody, RelayClient};
use crate::pipeline::{self, PublishOptions, PublishOutcome};
use crate::publish;
use crate::tag;

/// CLI for build-publisher: package, deduplicate and publish CI builds.
#[derive(Parser)]
#[clap(
    name = "build-publisher",
    version,
    about = "Package CI build directories, reuse duplicate builds and publish artifacts to S3"
)]
pub struct Cli {
    /// Path to a YAML file with static (non-secret) settings
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Detect duplicates, archive, upload, refresh pointers and notify
    Publish {
        /// Keep going with post-steps when the build already exists
        #[clap(long)]
        continue_if_exists: bool,
        /// Also match the canonical global artifact by revision
        #[clap(long)]
        global: bool,
        /// Skip the deployment notification
        #[clap(long)]
        no_notify: bool,
        /// Tag the commit when the branch matches the tag pattern
        #[clap(long)]
        tag: bool,
        /// Append an audit record (JSON line) to this file
        #[clap(long)]
        audit_log: Option<PathBuf>,
        #[clap(flatten)]
        hints: HintArgs,
    },
    /// Only run duplicate detection
    Check {
        #[clap(long)]
        continue_if_exists: bool,
        /// Check the canonical global artifact instead of the branch scopes
        #[clap(long)]
        global: bool,
    },
    /// Sync a local directory to a bucket prefix (skipped for pull requests)
    Sync {
        #[clap(long)]
        source: PathBuf,
        /// Defaults to the resolved bucket
        #[clap(long)]
        bucket: Option<String>,
        #[clap(long, default_value = "")]
        prefix: String,
        #[clap(long, default_value = "private")]
        acl: String,
        /// Filter flags passed through in order, e.g. `-- --exclude '*' --include '*.js'`
        #[clap(last = true, allow_hyphen_values = true)]
        filters: Vec<String>,
    },
    /// Fail when a file name does not embed a content hash
    VerifyFingerprints {
        dir: PathBuf,
        /// Manifest file exempt from the check
        #[clap(long)]
        manifest: Option<String>,
    },
    /// Send the deployment notification only
    Notify {
        #[clap(flatten)]
        hints: HintArgs,
    },
    /// Tag the commit and push the tag
    Tag,
    /// Write the build record file into the build directory
    Metadata {
        /// Directory to write into; defaults to the build directory
        #[clap(long)]
        dir: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct HintArgs {
    #[clap(long)]
    pub scm_provider: Option<String>,
    #[clap(long)]
    pub chef_app_attr: Option<String>,
    #[clap(long)]
    pub url_affix: Option<String>,
    #[clap(long)]
    pub runlist: Option<String>,
    #[clap(long)]
    pub hook_type: Option<String>,
    /// Free-form message sent instead of the generated descriptor
    #[clap(long)]
    pub message: Option<String>,
}

impl From<HintArgs> for NotifyHints {
    fn from(args: HintArgs) -> Self {
        NotifyHints {
            hook_type: args.hook_type,
            scm_provider: args.scm_provider,
            chef_app_attr: args.chef_app_attr,
            url_affix: args.url_affix,
            runlist: args.runlist,
            message: args.message,
        }
    }
}

/// Turns pass-through `--include P` / `--exclude P` flags into ordered filters.
pub fn parse_sync_filters(raw: &[String]) -> Result<Vec<SyncFilter>, PublishError> {
    let mut filters = Vec::new();
    let mut iter = raw.iter();
    while let Some(flag) = iter.next() {
        let (name, inline) = match flag.split_once('=') {
            Some((name, value)) => (name, Some(value.to_string())),
            None => (flag.as_str(), None),
        };
        let value = match inline {
            Some(v) => v,
            None => iter
                .next()
                .cloned()
                .ok_or_else(|| PublishError::Config(format!("{name} needs a pattern")))?,
        };
        match name {
            "--include" => filters.push(SyncFilter::Include(value)),
            "--exclude" => filters.push(SyncFilter::Exclude(value)),
            other => {
                return Err(PublishError::Config(format!(
                    "unsupported sync filter flag `{other}`"
                )))
            }
        }
    }
    Ok(filters)
}

fn prepare(settings: Settings) -> Result<(RunContext, PublishConfig)> {
    let ctx = RunContext::from_env()?;
    let config = resolve(&ctx, settings, Utc::now())?;
    Ok((ctx, config))
}

fn relay_client(config: &PublishConfig) -> Option<RelayClient> {
    config.relay.clone().map(RelayClient::new)
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");
    let settings = load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Publish {
            continue_if_exists,
            global,
            no_notify,
            tag,
            audit_log,
            hints,
        } => {
            let mut settings = settings;
            settings.hints = NotifyHints::from(hints).or(settings.hints);
            let (mut ctx, config) = prepare(settings)?;
            let store = AwsCli::from_config(&config)?;
            let relay = relay_client(&config);
            let options = PublishOptions {
                policy: policy(continue_if_exists),
                check_global: global,
                notify: !no_notify,
                tag,
                audit_log,
            };
            println!("Publish starting...");
            let report =
                pipeline::publish(&store, Some(&store), relay.as_ref(), &mut ctx, &config, &options)
                    .await?;
            match &report.outcome {
                PublishOutcome::Published => println!("Publish complete."),
                PublishOutcome::DuplicateHalted { source } => {
                    println!("Build already exists at {source}, publish skipped.")
                }
                PublishOutcome::DuplicateContinued { source } => {
                    println!("Build already exists at {source}, post-steps ran.")
                }
            }
            println!("Report:");
            println!("{:#?}", report);
        }
        Commands::Check {
            continue_if_exists,
            global,
        } => {
            let (mut ctx, config) = prepare(settings)?;
            let store = AwsCli::from_config(&config)?;
            let policy = policy(continue_if_exists);
            let detection = if global {
                detect::detect_global(&store, &mut ctx, &config, policy).await
            } else {
                detect::detect_duplicate(&store, &mut ctx, &config, policy).await
            };
            println!("BUILD_EXISTS={}", detection.is_found());
            println!("{:#?}", detection);
        }
        Commands::Sync {
            source,
            bucket,
            prefix,
            acl,
            filters,
        } => {
            let (ctx, config) = prepare(settings)?;
            let filters = parse_sync_filters(&filters)?;
            let store = AwsCli::from_config(&config)?;
            let request = SyncRequest {
                source_dir: source,
                bucket: bucket.unwrap_or_else(|| config.bucket.clone()),
                prefix,
                acl: Acl::from(acl.as_str()),
                filters,
            };
            let outcome = publish::sync_directory(&store, &ctx, &request).await?;
            println!("{:#?}", outcome);
        }
        Commands::VerifyFingerprints { dir, manifest } => {
            let manifest = manifest
                .or(settings.manifest)
                .unwrap_or_else(|| crate::config::DEFAULT_MANIFEST.to_string());
            fingerprint::verify_fingerprints(&dir, &manifest)?;
            println!("All files in {} are fingerprinted.", dir.display());
        }
        Commands::Notify { hints } => {
            let mut settings = settings;
            settings.hints = NotifyHints::from(hints).or(settings.hints);
            let (ctx, config) = prepare(settings)?;
            let queue = if ctx.secure_env {
                Some(AwsCli::from_config(&config)?)
            } else {
                None
            };
            let relay = relay_client(&config);
            let targets = Targets::derive(&ctx, &config);
            let record = BuildRecord::new(&ctx, &targets.primary, config.now);
            let descriptor = DeploymentDescriptor::new(record, &config.hints);
            let body = NotificationBody::new(&descriptor, config.hints.message.as_deref())
                .map_err(PublishError::Notify)?;
            let delivery = notify::notify_best_effort(
                &ctx,
                queue.as_ref(),
                config.queue_name.as_deref(),
                relay.as_ref(),
                &body,
            )
            .await;
            println!("{:#?}", delivery);
        }
        Commands::Tag => {
            let (ctx, config) = prepare(settings)?;
            let outcome = tag::tag_build(&ctx, &config.tag_name, &config.tag_branch_pattern).await?;
            println!("{:#?}", outcome);
        }
        Commands::Metadata { dir } => {
            let (ctx, config) = prepare(settings)?;
            let targets = Targets::derive(&ctx, &config);
            let record = BuildRecord::new(&ctx, &targets.primary, config.now);
            let dir = dir.unwrap_or_else(|| config.build_dir.clone());
            let file_name = config
                .metadata_file
                .as_deref()
                .unwrap_or(crate::config::DEFAULT_METADATA_FILE);
            let path = metadata::write_build_record(&record, &dir, file_name)?;
            println!("Wrote {}", path.display());
        }
    }

    let exit_span = tracing::info_span!("exit");
    exit_span.in_scope(|| {
        tracing::info!("run finished");
    });
    Ok(())
}

fn policy(continue_if_exists: bool) -> DuplicatePolicy {
    if continue_if_exists {
        DuplicatePolicy::Continue
    } else {
        DuplicatePolicy::Halt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn sync_filters_keep_order() {
        let filters =
            parse_sync_filters(&strings(&["--exclude", "*", "--include=*.js", "--include", "*.css"]))
                .unwrap();
        assert_eq!(
            filters,
            vec![
                SyncFilter::Exclude("*".into()),
                SyncFilter::Include("*.js".into()),
                SyncFilter::Include("*.css".into()),
            ]
        );
    }

    #[test]
    fn unknown_or_incomplete_filters_are_rejected() {
        assert!(parse_sync_filters(&strings(&["--delete"])).is_err());
        assert!(parse_sync_filters(&strings(&["--exclude"])).is_err());
    }

    #[test]
    fn cli_parses_pass_through_filters() {
        let cli = Cli::try_parse_from([
            "build-publisher",
            "sync",
            "--source",
            "dist",
            "--prefix",
            "static",
            "--acl",
            "public-read",
            "--",
            "--exclude",
            "*.map",
        ])
        .unwrap();
        match cli.command {
            Commands::Sync { filters, acl, .. } => {
                assert_eq!(filters, vec!["--exclude", "*.map"]);
                assert_eq!(acl, "public-read");
            }
            _ => panic!("expected sync"),
        }
    }
}
