//! Clustered coordinator client
//!
//! Consumer-side dispatcher for participant applications that want
//! failover across several coordinator instances. Only `start_lra` and
//! `list_lras` are load-balanced; every verb against an existing LRA is
//! routed to the coordinator base embedded in the LRA id.

mod errors;
mod selector;

pub use errors::ClientError;
pub use selector::{selector_for, Rejecting, RoundRobin, Selector, Sticky};

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::id::{encode_uri_component, LraId};
use crate::lra::{LraData, LraStatus};

/// Configuration for the clustered client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterClientConfig {
    /// Coordinator base URLs, in failover order
    #[serde(default)]
    pub urls: Vec<String>,

    /// Selection method: `round-robin`, `sticky`, or a tag for an
    /// external discovery layer (which disables in-process balancing)
    #[serde(default = "default_method")]
    pub method: String,

    /// Logical service name forwarded to external discovery
    #[serde(default)]
    pub service_name: String,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Maximum attempts across the instance list
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_method() -> String {
    "round-robin".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_max_retries() -> u32 {
    3
}

impl Default for ClusterClientConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            method: default_method(),
            service_name: String::new(),
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

/// Multi-coordinator client with failover.
pub struct ClusterClient {
    http: reqwest::Client,
    selector: Box<dyn Selector>,
    config: ClusterClientConfig,
}

impl ClusterClient {
    pub fn new(config: ClusterClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        let selector = selector_for(&config.method, config.urls.clone());
        Ok(Self {
            http,
            selector,
            config,
        })
    }

    /// Whether requests are actually balanced across instances.
    pub fn is_load_balancing(&self) -> bool {
        self.selector.is_load_balancing()
    }

    // ==================
    // Load-balanced verbs
    // ==================

    /// Begins a new LRA on whichever coordinator the selector picks.
    pub async fn start_lra(
        &self,
        client_id: &str,
        time_limit_ms: i64,
        parent: Option<&str>,
    ) -> Result<LraId, ClientError> {
        let response = self
            .send_balanced(|http, base| {
                let mut url = format!(
                    "{}/start?ClientID={}&TimeLimit={}",
                    base.trim_end_matches('/'),
                    encode_uri_component(client_id),
                    time_limit_ms
                );
                if let Some(parent) = parent {
                    url.push_str("&ParentLRA=");
                    url.push_str(&encode_uri_component(parent));
                }
                http.post(url)
            })
            .await?;

        let body = expect_status(response, 201).await?;
        Ok(LraId::parse(body.trim())?)
    }

    /// Lists LRAs on whichever coordinator the selector picks.
    pub async fn list_lras(&self) -> Result<Vec<LraData>, ClientError> {
        let response = self
            .send_balanced(|http, base| http.get(format!("{}/", base.trim_end_matches('/'))))
            .await?;
        let body = expect_status(response, 200).await?;
        serde_json::from_str(&body).map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    // ==================
    // Per-LRA verbs (affinity-routed)
    // ==================

    /// Drives the complete phase on the minting coordinator.
    pub async fn close(&self, id: &LraId) -> Result<LraStatus, ClientError> {
        self.end(id, "close").await
    }

    /// Drives the compensate phase on the minting coordinator.
    pub async fn cancel(&self, id: &LraId) -> Result<LraStatus, ClientError> {
        self.end(id, "cancel").await
    }

    async fn end(&self, id: &LraId, verb: &str) -> Result<LraStatus, ClientError> {
        let response = self
            .http
            .put(format!("{}/{}", id.as_str(), verb))
            .send()
            .await?;
        let body = expect_status(response, 200).await?;
        parse_status(&body)
    }

    /// Reads the current status from the minting coordinator.
    pub async fn get_status(&self, id: &LraId) -> Result<LraStatus, ClientError> {
        let response = self
            .http
            .get(format!("{}/status", id.as_str()))
            .send()
            .await?;
        let body = expect_status(response, 200).await?;
        parse_status(&body)
    }

    /// Replaces the deadline on the minting coordinator.
    pub async fn renew(&self, id: &LraId, time_limit_ms: i64) -> Result<(), ClientError> {
        let response = self
            .http
            .put(format!("{}/renew?TimeLimit={}", id.as_str(), time_limit_ms))
            .send()
            .await?;
        expect_status(response, 200).await?;
        Ok(())
    }

    /// Enlists a participant by its base URI; the coordinator derives
    /// the callback endpoints. Returns the recovery URI.
    pub async fn join(
        &self,
        id: &LraId,
        participant_base: &str,
        time_limit_ms: i64,
    ) -> Result<String, ClientError> {
        let response = self
            .http
            .put(format!("{}?TimeLimit={}", id.as_str(), time_limit_ms))
            .body(participant_base.to_string())
            .send()
            .await?;
        let body = expect_status(response, 200).await?;
        Ok(body.trim().to_string())
    }

    /// Removes an enlistment named by its recovery URI or endpoint URL.
    pub async fn leave(&self, id: &LraId, participant_url: &str) -> Result<(), ClientError> {
        let response = self
            .http
            .put(format!("{}/remove", id.as_str()))
            .body(participant_url.to_string())
            .send()
            .await?;
        expect_status(response, 200).await?;
        Ok(())
    }

    /// Tries instances in selector order until one answers without a
    /// connection error or 5xx, bounded by `max_retries`.
    async fn send_balanced<F>(&self, build: F) -> Result<reqwest::Response, ClientError>
    where
        F: Fn(&reqwest::Client, &str) -> reqwest::RequestBuilder,
    {
        let max_attempts = self.config.max_retries.max(1) as usize;
        let mut attempts = Vec::new();

        for _ in 0..max_attempts {
            let Some(base) = self.selector.next() else {
                break;
            };
            match build(&self.http, &base).send().await {
                Ok(response) if response.status().is_server_error() => {
                    debug!(%base, status = response.status().as_u16(), "instance failed, moving on");
                    attempts.push(format!("{}: HTTP {}", base, response.status().as_u16()));
                    self.selector.mark_failed(&base);
                }
                Ok(response) => return Ok(response),
                Err(e) => {
                    debug!(%base, error = %e, "instance unreachable, moving on");
                    attempts.push(format!("{}: {}", base, e));
                    self.selector.mark_failed(&base);
                }
            }
        }

        Err(ClientError::Unavailable {
            attempted: attempts.len(),
            attempts,
        })
    }
}

async fn expect_status(response: reqwest::Response, expected: u16) -> Result<String, ClientError> {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    if status != expected {
        return Err(ClientError::UnexpectedStatus { status, body });
    }
    Ok(body)
}

fn parse_status(body: &str) -> Result<LraStatus, ClientError> {
    body.trim()
        .parse::<LraStatus>()
        .map_err(|e| ClientError::InvalidResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: ClusterClientConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.method, "round-robin");
        assert_eq!(config.max_retries, 3);
        assert!(config.urls.is_empty());
    }

    #[test]
    fn test_unknown_method_disables_balancing() {
        let client = ClusterClient::new(ClusterClientConfig {
            urls: vec!["http://c1:1".into(), "http://c2:1".into()],
            method: "invalid-lb-algorithm".into(),
            ..Default::default()
        })
        .unwrap();
        assert!(!client.is_load_balancing());
    }

    #[tokio::test]
    async fn test_unknown_method_requests_fail_unavailable() {
        let client = ClusterClient::new(ClusterClientConfig {
            urls: vec!["http://c1:1".into()],
            method: "least-requests".into(),
            ..Default::default()
        })
        .unwrap();
        let err = client.start_lra("t", 0, None).await.unwrap_err();
        match err {
            ClientError::Unavailable { attempted, .. } => assert_eq!(attempted, 0),
            other => panic!("expected Unavailable, got {:?}", other),
        }
    }
}
