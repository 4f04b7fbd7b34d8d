use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use super::transport::{is_success, HttpTransport};
use super::types::{HealthResult, HealthStatus, ServiceHealth};

pub const HEALTH_PATHS: [&str; 3] = ["/health", "/api/health", "/"];
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTarget {
    pub name: String,
    pub base_url: String,
}

impl ServiceTarget {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
        }
    }

    fn candidate_urls(&self) -> impl Iterator<Item = String> + '_ {
        let base = self.base_url.trim_end_matches('/');
        HEALTH_PATHS.iter().map(move |path| format!("{base}{path}"))
    }
}

/// Probe every service concurrently and fold the results.
pub async fn check_health(
    transport: &dyn HttpTransport,
    targets: &[ServiceTarget],
    timeout: Duration,
) -> HealthResult {
    let services = join_all(
        targets
            .iter()
            .map(|target| check_service(transport, target, timeout)),
    )
    .await;

    HealthResult {
        status: aggregate_status(&services),
        services,
        checked_at: Utc::now(),
    }
}

/// Walk the candidate endpoints in order. The first endpoint that answers at
/// all decides: 2xx is `Ok`, anything else `Degraded`. Only transport
/// failures and timeouts move on to the next candidate; if none answers the
/// service is in `Error`.
pub async fn check_service(
    transport: &dyn HttpTransport,
    target: &ServiceTarget,
    timeout: Duration,
) -> ServiceHealth {
    for url in target.candidate_urls() {
        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, transport.get(&url, timeout)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(status)) => {
                let health = if is_success(status) {
                    HealthStatus::Ok
                } else {
                    log::debug!("health check {url} answered {status}");
                    HealthStatus::Degraded
                };
                return ServiceHealth {
                    name: target.name.clone(),
                    status: health,
                    url: Some(url),
                    http_status: Some(status),
                    latency_ms: Some(latency_ms),
                };
            }
            Ok(Err(err)) => log::debug!("health check {url} failed: {err:#}"),
            Err(_) => log::debug!("health check {url} timed out after {timeout:?}"),
        }
    }

    ServiceHealth {
        name: target.name.clone(),
        status: HealthStatus::Error,
        url: None,
        http_status: None,
        latency_ms: None,
    }
}

pub fn aggregate_status(services: &[ServiceHealth]) -> HealthStatus {
    services
        .iter()
        .map(|service| service.status)
        .max()
        .unwrap_or(HealthStatus::Ok)
}
