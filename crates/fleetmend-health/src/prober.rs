//! Health probe logic.
//!
//! Builds the health URL for an instance from its routing tags and issues a
//! single bounded GET. Redirects are never followed: a 3xx answer means the
//! service is up.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::debug;

use fleetmend_core::config::RoutingConfig;
use fleetmend_state::InstanceDescriptor;

/// Boxed future alias for probe results.
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = Result<bool, ProbeError>> + Send + 'a>>;

/// Transport-level probe failures. An unhealthy HTTP status is not an error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("invalid health url {0}")]
    InvalidUrl(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("http handshake failed: {0}")]
    Handshake(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Probes one instance and records the observation on its descriptor.
///
/// `Ok(true)` is healthy, `Ok(false)` is a clean unhealthy answer, and
/// `Err` means the service could not be reached at all.
pub trait HealthProbe: Send + Sync {
    fn probe<'a>(&'a self, instance: &'a mut InstanceDescriptor) -> ProbeFuture<'a>;
}

/// HTTP prober used in production.
#[derive(Debug, Clone)]
pub struct HttpProber {
    routing: RoutingConfig,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(routing: RoutingConfig) -> Self {
        let timeout = routing.probe_timeout();
        Self { routing, timeout }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl HealthProbe for HttpProber {
    fn probe<'a>(&'a self, instance: &'a mut InstanceDescriptor) -> ProbeFuture<'a> {
        Box::pin(async move {
            // Nothing to probe yet: an instance without network identity
            // counts as healthy.
            let Some(url) = health_url(instance, &self.routing) else {
                return Ok(true);
            };

            let result = http_get_status(&url, self.timeout).await;
            let checked_at = Utc::now();
            match result {
                Ok(status) if (1..400).contains(&status) => {
                    instance.mark_online(checked_at);
                    Ok(true)
                }
                Ok(status) => {
                    debug!(instance_id = %instance.instance_id, status, %url, "health probe unhealthy status");
                    instance.mark_offline(checked_at, format!("status {status}"));
                    Ok(false)
                }
                Err(e) => {
                    instance.mark_offline(checked_at, e.to_string());
                    Err(e)
                }
            }
        })
    }
}

/// Build the health URL for an instance, or `None` if it has no address.
///
/// - gateway repositories: `http://<addr>:<gateway port>/healthcheck`
/// - root-mounted services: `http://<addr>:<port>/<health path>`
/// - everything else: `http://<addr>:<port>/<path name>/healthcheck`
///
/// `<port>` is the alternate port for the alternate path family, otherwise
/// the default port.
pub fn health_url(instance: &InstanceDescriptor, routing: &RoutingConfig) -> Option<String> {
    let address = instance.probe_address()?;

    if let Some(port) = routing.gateways.get(&instance.repository) {
        return Some(format!("http://{address}:{port}/healthcheck"));
    }

    let path = instance.path_name.trim().trim_matches('/');
    let port = if routing.alternate_port_paths.iter().any(|p| p == path) {
        routing.alternate_port
    } else {
        routing.default_port
    };

    if instance.is_root_path() {
        Some(format!("http://{address}:{port}/{}", instance.health_path))
    } else {
        Some(format!("http://{address}:{port}/{path}/healthcheck"))
    }
}

/// Perform one GET and return the status code.
async fn http_get_status(url: &str, timeout: Duration) -> Result<u16, ProbeError> {
    let uri: http::Uri = url
        .parse()
        .map_err(|_| ProbeError::InvalidUrl(url.to_string()))?;
    let authority = uri
        .authority()
        .ok_or_else(|| ProbeError::InvalidUrl(url.to_string()))?
        .clone();
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let result = tokio::time::timeout(timeout, async {
        let stream = tokio::net::TcpStream::connect(authority.as_str())
            .await
            .map_err(|e| ProbeError::Connect(e.to_string()))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| ProbeError::Handshake(e.to_string()))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(path.as_str())
            .header("host", authority.as_str())
            .header("user-agent", "fleetmend-health/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .map_err(|e| ProbeError::Request(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| ProbeError::Request(e.to_string()))?;
        Ok::<u16, ProbeError>(resp.status().as_u16())
    })
    .await;

    match result {
        Ok(status) => status,
        Err(_) => {
            debug!(%url, "health probe timed out");
            Err(ProbeError::Timeout(timeout))
        }
    }
}
