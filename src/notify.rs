//! Deployment notifications.
//!
//! With secure credentials the deployment descriptor goes straight onto the
//! deployment queue. Without them it is posted to an HTTP relay, which holds
//! the queue credentials on the build's behalf. Every path here is
//! best-effort: failures come back as [`SideChannelError`] and never fail a
//! build on their own.

use std::path::Path;

use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{NotifyHints, RelayConfig, DEFAULT_HOOK_TYPE, DEFAULT_SCM_PROVIDER};
use crate::context::RunContext;
use crate::contract::{QueueClient, TargetLocation};
use crate::error::{SideChannelError, SideChannelResult};
use crate::metadata::BuildRecord;

/// Header carrying the destination key on binary relay uploads.
pub const ARTIFACT_KEY_HEADER: &str = "X-Artifact-Key";

/// JSON body announcing a published build to deployment tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentDescriptor {
    #[serde(flatten)]
    pub record: BuildRecord,
    pub hook_type: String,
    pub chef_app_attr: Option<String>,
    pub url_affix: Option<String>,
    pub runlist: Option<String>,
    pub scm_provider: String,
}

impl DeploymentDescriptor {
    pub fn new(record: BuildRecord, hints: &NotifyHints) -> Self {
        DeploymentDescriptor {
            record,
            hook_type: hints
                .hook_type
                .clone()
                .unwrap_or_else(|| DEFAULT_HOOK_TYPE.to_string()),
            chef_app_attr: hints.chef_app_attr.clone(),
            url_affix: hints.url_affix.clone(),
            runlist: hints.runlist.clone(),
            scm_provider: hints
                .scm_provider
                .clone()
                .unwrap_or_else(|| DEFAULT_SCM_PROVIDER.to_string()),
        }
    }
}

/// The outbound message: either the descriptor JSON or the caller's
/// free-form message, which replaces it entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationBody {
    pub content: String,
    pub is_json: bool,
}

impl NotificationBody {
    pub fn new(descriptor: &DeploymentDescriptor, message: Option<&str>) -> SideChannelResult<Self> {
        match message {
            Some(message) => Ok(NotificationBody {
                content: message.to_string(),
                is_json: false,
            }),
            None => Ok(NotificationBody {
                content: serde_json::to_string(descriptor)?,
                is_json: true,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Queue { queue_url: String },
    Relay { status: u16 },
    Skipped(&'static str),
}

/// HTTP relay for builds without queue credentials.
pub struct RelayClient {
    client: reqwest::Client,
    config: RelayConfig,
}

impl RelayClient {
    pub fn new(config: RelayConfig) -> Self {
        RelayClient {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.config.username, &self.config.password) {
            (Some(user), Some(password)) => builder.basic_auth(user, Some(password.expose())),
            _ => builder,
        }
    }

    /// POST of the notification body to the relay root. Basic auth only when
    /// both username and password are configured.
    pub fn build_request(&self, body: &NotificationBody) -> reqwest::Result<reqwest::Request> {
        let content_type = if body.is_json {
            "application/json"
        } else {
            "text/plain; charset=utf-8"
        };
        self.with_auth(self.client.post(&self.config.url))
            .header(CONTENT_TYPE, HeaderValue::from_static(content_type))
            .body(body.content.clone())
            .build()
    }

    /// POST of raw archive bytes to `<relay>/<binary path>`, naming the
    /// destination object in [`ARTIFACT_KEY_HEADER`].
    pub fn build_binary_request(
        &self,
        bytes: Vec<u8>,
        destination: &TargetLocation,
    ) -> reqwest::Result<reqwest::Request> {
        let url = format!(
            "{}/{}",
            self.config.url.trim_end_matches('/'),
            self.config.binary_path.trim_start_matches('/')
        );
        self.with_auth(self.client.post(url))
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(
                ARTIFACT_KEY_HEADER,
                format!("{}/{}", destination.bucket, destination.key),
            )
            .body(bytes)
            .build()
    }

    async fn execute(&self, request: reqwest::Request) -> SideChannelResult<u16> {
        let response = self.client.execute(request).await?.error_for_status()?;
        Ok(response.status().as_u16())
    }

    pub async fn post(&self, body: &NotificationBody) -> SideChannelResult<u16> {
        let request = self.build_request(body)?;
        self.execute(request).await
    }

    pub async fn post_binary(
        &self,
        archive: &Path,
        destination: &TargetLocation,
    ) -> SideChannelResult<u16> {
        let bytes = tokio::fs::read(archive)
            .await
            .map_err(|source| SideChannelError::Read {
                path: archive.to_path_buf(),
                source,
            })?;
        let request = self.build_binary_request(bytes, destination)?;
        self.execute(request).await
    }
}

/// Delivers the notification: queue when secure credentials are available,
/// relay otherwise.
pub async fn notify<Q: QueueClient + ?Sized>(
    ctx: &RunContext,
    queue: Option<&Q>,
    queue_name: Option<&str>,
    relay: Option<&RelayClient>,
    body: &NotificationBody,
) -> SideChannelResult<Delivery> {
    if ctx.secure_env {
        let (Some(queue), Some(queue_name)) = (queue, queue_name) else {
            info!("[NOTIFY] No deployment queue configured, skipping notification");
            return Ok(Delivery::Skipped("no queue configured"));
        };
        let queue_url = queue.queue_url(queue_name).await?;
        queue.send_message(&queue_url, &body.content).await?;
        info!(queue = %queue_name, "[NOTIFY] Deployment descriptor queued");
        return Ok(Delivery::Queue { queue_url });
    }

    let Some(relay) = relay else {
        info!("[NOTIFY] No relay configured and no secure credentials, skipping notification");
        return Ok(Delivery::Skipped("no relay configured"));
    };
    let status = relay.post(body).await?;
    info!(status, url = %relay.config().url, "[NOTIFY] Deployment descriptor relayed");
    Ok(Delivery::Relay { status })
}

/// Like [`notify`], but any failure is logged and turned into `None`.
pub async fn notify_best_effort<Q: QueueClient + ?Sized>(
    ctx: &RunContext,
    queue: Option<&Q>,
    queue_name: Option<&str>,
    relay: Option<&RelayClient>,
    body: &NotificationBody,
) -> Option<Delivery> {
    match notify(ctx, queue, queue_name, relay, body).await {
        Ok(delivery) => Some(delivery),
        Err(e) => {
            warn!(error = %e, "[NOTIFY] Notification failed, continuing");
            None
        }
    }
}

/// Ships the raw archive through the relay, for builds on the relay's binary
/// branch that have no credentials of their own.
pub async fn relay_binary_best_effort(
    ctx: &RunContext,
    relay: Option<&RelayClient>,
    archive: &Path,
    destination: &TargetLocation,
) -> Option<Delivery> {
    let relay = relay?;
    if ctx.secure_env || relay.config().binary_branch.as_deref() != Some(ctx.branch.as_str()) {
        return None;
    }
    match relay.post_binary(archive, destination).await {
        Ok(status) => {
            info!(status, destination = %destination, "[NOTIFY] Archive relayed");
            Some(Delivery::Relay { status })
        }
        Err(e) => {
            warn!(error = %e, destination = %destination, "[NOTIFY] Binary relay failed, continuing");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{PullRequest, Secret};
    use chrono::{TimeZone, Utc};
    use reqwest::header::AUTHORIZATION;

    fn record() -> BuildRecord {
        let ctx = RunContext {
            repo_slug: "acme/api".into(),
            repo_owner: "acme".into(),
            repo_name: "api".into(),
            commit: "abc".into(),
            branch: "master".into(),
            build_number: "5".into(),
            pull_request: PullRequest::Number(3),
            secure_env: false,
            build_exists: false,
        };
        let loc = TargetLocation::new("builds", "api/master/2024/03/abc.tar.gz");
        BuildRecord::new(&ctx, &loc, Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap())
    }

    fn relay(username: Option<&str>, password: Option<&str>) -> RelayClient {
        RelayClient::new(RelayConfig {
            url: "https://relay.example.com/hooks/".into(),
            username: username.map(str::to_string),
            password: password.map(Secret::new),
            binary_branch: Some("master".into()),
            binary_path: "artifacts".into(),
        })
    }

    #[test]
    fn descriptor_flattens_record_and_hints() {
        let hints = NotifyHints {
            runlist: Some("role[web]".into()),
            url_affix: Some("canary".into()),
            ..NotifyHints::default()
        };
        let json = serde_json::to_value(DeploymentDescriptor::new(record(), &hints)).unwrap();
        assert_eq!(json["repo_name"], "api");
        assert_eq!(json["pull_request"], "3");
        assert_eq!(json["hook_type"], DEFAULT_HOOK_TYPE);
        assert_eq!(json["scm_provider"], "github");
        assert_eq!(json["runlist"], "role[web]");
        assert_eq!(json["url_affix"], "canary");
        assert!(json["chef_app_attr"].is_null());
    }

    #[test]
    fn free_form_message_replaces_body() {
        let desc = DeploymentDescriptor::new(record(), &NotifyHints::default());
        let body = NotificationBody::new(&desc, Some("deploy now")).unwrap();
        assert_eq!(body.content, "deploy now");
        assert!(!body.is_json);
    }

    #[test]
    fn relay_without_credentials_sends_no_auth_header() {
        let desc = DeploymentDescriptor::new(record(), &NotifyHints::default());
        let body = NotificationBody::new(&desc, None).unwrap();
        let request = relay(None, None).build_request(&body).unwrap();
        assert!(request.headers().get(AUTHORIZATION).is_none());

        let request = relay(Some("ci"), None).build_request(&body).unwrap();
        assert!(request.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn relay_with_both_credentials_sends_basic_auth() {
        let desc = DeploymentDescriptor::new(record(), &NotifyHints::default());
        let body = NotificationBody::new(&desc, None).unwrap();
        let request = relay(Some("ci"), Some("pw")).build_request(&body).unwrap();
        let auth = request.headers().get(AUTHORIZATION).unwrap().to_str().unwrap();
        assert!(auth.starts_with("Basic "));
        assert_eq!(
            request.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn binary_request_targets_binary_path_with_key_header() {
        let loc = TargetLocation::new("builds", "api/master/latest.tar.gz");
        let request = relay(None, None)
            .build_binary_request(vec![1, 2, 3], &loc)
            .unwrap();
        assert_eq!(
            request.url().as_str(),
            "https://relay.example.com/hooks/artifacts"
        );
        assert_eq!(
            request.headers().get(ARTIFACT_KEY_HEADER).unwrap(),
            "builds/api/master/latest.tar.gz"
        );
    }
}
