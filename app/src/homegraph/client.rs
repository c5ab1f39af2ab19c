use std::sync::Arc;

use infrastructure::HttpClientConfig;
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use serde_json::Value;

use super::retry::RetryConfig;
use super::{HomeGraph, report_state_body, request_sync_body};
use crate::device::Device;
use crate::state::StateCache;

#[derive(Debug, derive_more::Display, derive_more::Error)]
enum CallError {
    #[display("Request failed: {source}")]
    Transport { source: reqwest_middleware::Error },

    #[display("Request returned {status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl CallError {
    fn is_retryable(&self) -> bool {
        match self {
            CallError::Transport { .. } => true,
            CallError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HomeGraphClient {
    client: ClientWithMiddleware,
    base_url: String,
    agent_user_id: String,
    retry: RetryConfig,
}

impl HomeGraphClient {
    pub fn new(
        base_url: &str,
        agent_user_id: &str,
        access_token: Option<String>,
        retry: RetryConfig,
    ) -> anyhow::Result<Self> {
        let client = HttpClientConfig::new(access_token).new_tracing_client()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            agent_user_id: agent_user_id.to_owned(),
            retry,
        })
    }

    async fn post(&self, path: &str, body: &Value) -> anyhow::Result<()> {
        let url = format!("{}{}", self.base_url, path);
        let mut backoff = self.retry.backoff();

        loop {
            let error = match self.try_post(&url, body).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            let attempts = backoff.attempts() + 1;
            if !error.is_retryable() || !self.retry.allows_retry_after(attempts) {
                anyhow::bail!("Calling {} failed after {} attempts: {}", url, attempts, error);
            }

            let delay = backoff.next_delay();
            tracing::warn!("Calling {} failed, retrying in {:?}: {}", url, delay, error);
            tokio::time::sleep(delay).await;
            backoff.bump();
        }
    }

    async fn try_post(&self, url: &str, body: &Value) -> Result<(), CallError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|source| CallError::Transport { source })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(CallError::Status { status, body })
    }
}

impl HomeGraph for HomeGraphClient {
    #[tracing::instrument(skip(self))]
    async fn request_sync(&self) -> anyhow::Result<()> {
        self.post("/v1/devices:requestSync", &request_sync_body(&self.agent_user_id))
            .await?;

        tracing::info!("Requested device sync");
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(devices = devices.len()))]
    async fn send_state_updates(&self, devices: &[Arc<Device>], cache: &StateCache) -> anyhow::Result<()> {
        if devices.is_empty() {
            return Ok(());
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let body = report_state_body(&request_id, &self.agent_user_id, devices, cache);

        tracing::debug!("Reporting state {}", body);
        self.post("/v1/devices:reportStateAndNotification", &body).await?;

        infrastructure::meter::increment("gbridge_state_reported", &[]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_statuses_are_retried() {
        let status = |status| CallError::Status {
            status,
            body: String::new(),
        };

        assert!(status(StatusCode::SERVICE_UNAVAILABLE).is_retryable());
        assert!(status(StatusCode::TOO_MANY_REQUESTS).is_retryable());
        assert!(!status(StatusCode::UNAUTHORIZED).is_retryable());
        assert!(!status(StatusCode::BAD_REQUEST).is_retryable());
    }

    #[test]
    fn test_base_url_without_trailing_slash() {
        let client = HomeGraphClient::new("http://localhost:8080/", "user", None, RetryConfig::default()).unwrap();

        assert_eq!(client.base_url, "http://localhost:8080");
    }
}
