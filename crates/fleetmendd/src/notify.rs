//! Operator notification channels.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use fleetmend_core::config::NotificationConfig;
use fleetmend_health::gateway::GatewayFuture;
use fleetmend_health::{GatewayError, Notifier};
use fleetmend_state::InstanceDescriptor;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Pick the notifier for a configuration: a webhook when a URL is set,
/// otherwise the log.
pub fn notifier_from_config(config: &NotificationConfig) -> Result<Arc<dyn Notifier>, GatewayError> {
    match config.url.as_deref() {
        Some(url) => Ok(Arc::new(WebhookNotifier::new(url, config.token.clone())?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}

/// Body posted to the webhook.
#[derive(Debug, Serialize, PartialEq)]
pub struct FailureNotice<'a> {
    pub text: String,
    pub instance_id: &'a str,
    pub name: &'a str,
    pub repository: &'a str,
    pub environment: &'a str,
    pub build_number: u32,
    pub last_error: Option<&'a str>,
}

impl<'a> FailureNotice<'a> {
    pub fn new(instance: &'a InstanceDescriptor) -> Self {
        Self {
            text: format!(
                "Service {} on {} ({}) keeps failing its health check",
                instance.repository, instance.instance_id, instance.environment
            ),
            instance_id: &instance.instance_id,
            name: &instance.instance_name,
            repository: &instance.repository,
            environment: &instance.environment,
            build_number: instance.build_number,
            last_error: instance.last_error_code.as_deref(),
        }
    }
}

/// Records failures in the log only.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify<'a>(&'a self, instance: &'a InstanceDescriptor) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            warn!(
                instance_id = %instance.instance_id,
                repository = %instance.repository,
                environment = %instance.environment,
                "service failure notice (no notification channel configured)"
            );
            Ok(())
        })
    }
}

/// POSTs a JSON [`FailureNotice`] to an HTTP(S) webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: reqwest::Url,
    token: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: &str, token: Option<String>) -> Result<Self, GatewayError> {
        let url = reqwest::Url::parse(url)
            .map_err(|_| GatewayError::Precondition(format!("invalid notification url {url}")))?;
        if !matches!(url.scheme(), "http" | "https") || !url.has_host() {
            return Err(GatewayError::Precondition(format!(
                "notification url must be http(s)://host[:port]/path, got {url}"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(NOTIFY_TIMEOUT)
            .user_agent(concat!("fleetmendd/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::Precondition(format!("http client: {e}")))?;
        Ok(Self { client, url, token })
    }
}

impl Notifier for WebhookNotifier {
    fn notify<'a>(&'a self, instance: &'a InstanceDescriptor) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let mut req = self.client.post(self.url.clone()).json(&FailureNotice::new(instance));
            if let Some(token) = &self.token {
                req = req.bearer_auth(token);
            }
            let resp = req.send().await.map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Api("notification timed out".into())
                } else {
                    GatewayError::Api(e.to_string())
                }
            })?;
            let status = resp.status();
            if !status.is_success() {
                return Err(GatewayError::Api(format!("webhook answered {}", status.as_u16())));
            }
            info!(instance_id = %instance.instance_id, "failure notification sent");
            Ok(())
        })
    }
}
