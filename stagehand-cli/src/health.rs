use async_trait::async_trait;
use tokio::net::TcpStream;

use stagehand_core::graph::Resource;
use stagehand_core::health::{HealthProbe, ProbeCheck, ProbeExecutor};
use stagehand_core::model::HealthState;

/// Probes resource endpoints over the network.
///
/// `ping` is a TCP connect. `http` is a GET when built with `health-http`,
/// otherwise it falls back to the TCP check.
#[derive(Clone, Default)]
pub struct NetworkProber {
    #[cfg(feature = "health-http")]
    client: reqwest::Client,
}

impl NetworkProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check health via TCP connection
    async fn check_tcp(&self, resource: &Resource) -> HealthState {
        let Some(endpoint) = &resource.endpoint else {
            return HealthState::Unknown;
        };
        let Some(port) = endpoint.port else {
            return HealthState::Unknown;
        };
        match TcpStream::connect((endpoint.host.as_str(), port)).await {
            Ok(_) => HealthState::Healthy,
            Err(e) => {
                tracing::debug!(resource = %resource.id, error = %e, "tcp probe failed");
                HealthState::Unhealthy
            }
        }
    }

    #[cfg(feature = "health-http")]
    async fn check_http(&self, resource: &Resource, path: &str, expected: u16) -> HealthState {
        let Some(url) = resource.endpoint.as_ref().and_then(|e| e.url(path)) else {
            return HealthState::Unknown;
        };
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().as_u16() == expected => HealthState::Healthy,
            Ok(resp) => {
                tracing::debug!(resource = %resource.id, url = %url, status = %resp.status(), "http probe failed");
                HealthState::Unhealthy
            }
            Err(e) => {
                tracing::debug!(resource = %resource.id, url = %url, error = %e, "http probe failed");
                HealthState::Unhealthy
            }
        }
    }

    /// Fallback HTTP check when reqwest is not available
    #[cfg(not(feature = "health-http"))]
    async fn check_http(&self, resource: &Resource, _path: &str, _expected: u16) -> HealthState {
        self.check_tcp(resource).await
    }
}

#[async_trait]
impl ProbeExecutor for NetworkProber {
    async fn check(&self, resource: &Resource, probe: &HealthProbe) -> HealthState {
        match &probe.check {
            ProbeCheck::Ping => self.check_tcp(resource).await,
            ProbeCheck::Http {
                path,
                expected_status,
            } => self.check_http(resource, path, *expected_status).await,
        }
    }
}
