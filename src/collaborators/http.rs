//! HTTP collaborators: frontend form submission and deployment health.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::{DeploymentHealth, FormSubmission, FrontendSubmitter, HealthStatus, SubmitResponse};
use crate::error::ConvergeError;

/// Upper bound on a single HTTP request; the loop's own step timeout
/// is usually tighter.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Longest response body kept in a [`SubmitResponse`] or [`HealthStatus`].
const MAX_BODY_CHARS: usize = 4096;

fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("converge/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

fn truncate(body: String) -> String {
    if body.chars().count() <= MAX_BODY_CHARS {
        body
    } else {
        body.chars().take(MAX_BODY_CHARS).collect()
    }
}

/// POSTs the form payload as JSON to the service's submission endpoint.
#[derive(Debug, Clone)]
pub struct HttpFrontend {
    client: reqwest::Client,
    url: String,
}

impl HttpFrontend {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            url: url.into(),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl FrontendSubmitter for HttpFrontend {
    async fn submit(&self, form: &FormSubmission) -> Result<SubmitResponse> {
        debug!("Submitting form for '{}' to {}", form.service_name, self.url);

        let response = match self.client.post(&self.url).json(&form.payload).send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => {
                return Err(ConvergeError::collaborator_structural(
                    "frontend",
                    format!("invalid request to {}: {e}", self.url),
                )
                .into());
            }
            Err(e) => {
                return Ok(SubmitResponse {
                    success: false,
                    status_code: 0,
                    response: serde_json::Value::Null,
                    error: Some(e.to_string()),
                })
            }
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str(&text)
            .unwrap_or_else(|_| serde_json::Value::String(truncate(text)));

        Ok(SubmitResponse {
            success: status.is_success(),
            status_code: status.as_u16(),
            error: (!status.is_success()).then(|| format!("HTTP {status}")),
            response: body,
        })
    }
}

/// GETs the deployed service and optionally looks for a marker string in
/// the response body (e.g. the merged commit's short SHA).
#[derive(Debug, Clone)]
pub struct HttpHealthCheck {
    client: reqwest::Client,
}

impl HttpHealthCheck {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: build_client()?,
        })
    }
}

#[async_trait]
impl DeploymentHealth for HttpHealthCheck {
    async fn check(&self, url: &str, expected_marker: Option<&str>) -> Result<HealthStatus> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Health check request to {url} failed"))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let marker_ok = expected_marker.is_none_or(|marker| body.contains(marker));
        debug!(
            "Health check {}: HTTP {}, marker {}",
            url,
            status.as_u16(),
            if marker_ok { "found" } else { "missing" }
        );

        Ok(HealthStatus {
            healthy: status.is_success() && marker_ok,
            body: truncate(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_keeps_short_bodies() {
        assert_eq!(truncate("ok".to_string()), "ok");
        let long = "x".repeat(MAX_BODY_CHARS + 10);
        assert_eq!(truncate(long).len(), MAX_BODY_CHARS);
    }

    #[tokio::test]
    async fn test_unreachable_frontend_is_a_failed_response() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let frontend = HttpFrontend::new("http://127.0.0.1:9/submit").unwrap();
        let form = FormSubmission {
            service_name: "svc".into(),
            payload: serde_json::json!({ "q": 1 }),
        };
        let response = frontend.submit(&form).await.unwrap();
        assert!(!response.success);
        assert_eq!(response.status_code, 0);
        assert!(!response.is_structural_failure());
    }
}
