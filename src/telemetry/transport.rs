use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

/// HTTP seam used by the health probe and the delivery loop. Implementations
/// return the response status code; transport-level failures are errors.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<u16>;

    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<u16>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("studio-pulse/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, timeout: Duration) -> Result<u16> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;

        Ok(response.status().as_u16())
    }

    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<u16> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?;

        Ok(response.status().as_u16())
    }
}

pub(crate) fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}
