//! Reachability probing.
//!
//! A probe answers one question: is the endpoint reachable right now?
//! Probes never return errors - timeouts, refused connections, and
//! non-success statuses all normalize to `false`. Retry policy belongs to
//! the caller.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL, PRAGMA};
use reqwest::Client;
use tracing::{debug, warn};

/// A single reachability check against a fixed endpoint.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Returns whether the endpoint answered within the deadline.
    async fn probe(&self) -> bool;
}

/// HTTP GET probe with cache-busting headers and a per-request deadline.
pub struct HttpProbe {
    endpoint: String,
    timeout: Duration,
    client: Client,
}

impl HttpProbe {
    /// Creates a probe for `endpoint` with the given per-request deadline.
    ///
    /// Falls back to the default client if the builder fails (it only fails
    /// on TLS backend misconfiguration).
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Probe client builder failed, using default client");
                Client::new()
            });

        Self {
            endpoint: endpoint.into(),
            timeout,
            client,
        }
    }

    /// The endpoint this probe checks.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn cache_busting_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        headers
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn probe(&self) -> bool {
        let result = self
            .client
            .get(&self.endpoint)
            .headers(Self::cache_busting_headers())
            .timeout(self.timeout)
            .send()
            .await;

        match result {
            Ok(response) => {
                let reachable = response.status().is_success();
                debug!(
                    endpoint = %self.endpoint,
                    status = response.status().as_u16(),
                    reachable,
                    "Probe completed"
                );
                reachable
            }
            Err(e) => {
                debug!(endpoint = %self.endpoint, error = %e, "Probe failed");
                false
            }
        }
    }
}
