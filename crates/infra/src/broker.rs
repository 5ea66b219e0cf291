use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::time::sleep;

use pipeboard_domain::error::DomainError;

use crate::config::AppConfig;

const PLATFORM_TOKEN_HEADER: &str = "X-Platform-Token";

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker configuration error: {0}")]
    Configuration(String),
    #[error("broker transport error: {0}")]
    Transport(String),
    #[error("{0}")]
    Upstream(String),
    #[error("broker response decode error: {0}")]
    InvalidResponse(String),
}

impl From<BrokerError> for DomainError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Upstream(message) => DomainError::Upstream(message),
            other => DomainError::Upstream(other.to_string()),
        }
    }
}

/// Request/response client for sibling plugin services reached over the
/// message-bus HTTP bridge. Transient failures are retried with capped
/// exponential backoff; the per-call deadline comes from the HTTP client
/// timeout.
#[derive(Debug, Clone)]
pub struct PluginRpcClient {
    http: reqwest::Client,
    base_url: String,
    subdomain: String,
    platform_token: Option<String>,
    retry_max_attempts: u32,
    retry_backoff_base: Duration,
    retry_backoff_max: Duration,
}

impl PluginRpcClient {
    pub fn from_config(config: &AppConfig) -> Self {
        let timeout = Duration::from_millis(config.rpc_timeout_mandatory_ms.max(1));
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let token = config.broker_platform_token.trim().to_string();
        Self {
            http,
            base_url: config.broker_base_url.trim_end_matches('/').to_string(),
            subdomain: config.subdomain.clone(),
            platform_token: if token.is_empty() { None } else { Some(token) },
            retry_max_attempts: config.rpc_retry_max_attempts.max(1),
            retry_backoff_base: Duration::from_millis(config.rpc_backoff_base_ms),
            retry_backoff_max: Duration::from_millis(config.rpc_backoff_max_ms),
        }
    }

    /// Calls `action` on `service`, returning the `data` half of the
    /// response envelope. An error status in the envelope surfaces as
    /// [`BrokerError::Upstream`] with the service's own message.
    pub async fn request(
        &self,
        service: &str,
        action: &str,
        data: Value,
    ) -> Result<Value, BrokerError> {
        let url = format!("{}/{service}", self.base_url);
        let payload = json!({
            "subdomain": self.subdomain,
            "action": action,
            "data": data,
        });

        let attempts = self.retry_max_attempts;
        for attempt in 0..attempts {
            let mut request = self
                .http
                .post(&url)
                .header("accept", "application/json")
                .json(&payload);
            if let Some(token) = &self.platform_token {
                request = request.header(PLATFORM_TOKEN_HEADER, token);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    if attempt + 1 < attempts {
                        sleep(backoff_for_attempt(
                            self.retry_backoff_base,
                            self.retry_backoff_max,
                            attempt,
                        ))
                        .await;
                        continue;
                    }
                    return Err(BrokerError::Transport(err.to_string()));
                }
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if attempt + 1 < attempts {
                    sleep(backoff_for_attempt(
                        self.retry_backoff_base,
                        self.retry_backoff_max,
                        attempt,
                    ))
                    .await;
                    continue;
                }
                let message = response.text().await.unwrap_or_default();
                return Err(BrokerError::Upstream(format!(
                    "status {}: {message}",
                    status.as_u16()
                )));
            }
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(BrokerError::Upstream(format!(
                    "status {}: {message}",
                    status.as_u16()
                )));
            }

            let envelope = response
                .json::<Value>()
                .await
                .map_err(|err| BrokerError::InvalidResponse(err.to_string()))?;
            return unwrap_envelope(envelope);
        }

        Err(BrokerError::Transport(
            "retry loop exited unexpectedly".to_string(),
        ))
    }
}

fn unwrap_envelope(envelope: Value) -> Result<Value, BrokerError> {
    match envelope.get("status").and_then(Value::as_str) {
        Some("success") => Ok(envelope.get("data").cloned().unwrap_or(Value::Null)),
        Some(_) => {
            let message = envelope
                .get("errorMessage")
                .and_then(Value::as_str)
                .unwrap_or("unknown upstream error")
                .to_string();
            Err(BrokerError::Upstream(message))
        }
        None => Err(BrokerError::InvalidResponse(
            "response envelope missing status".to_string(),
        )),
    }
}

fn backoff_for_attempt(base: Duration, max: Duration, attempt: u32) -> Duration {
    if base.is_zero() {
        return Duration::from_millis(1);
    }
    let multiplier = 1u64 << attempt.min(8);
    let base_ms = base.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    let delay_ms = base_ms.saturating_mul(multiplier).max(1);
    if max_ms == 0 {
        Duration::from_millis(delay_ms)
    } else {
        Duration::from_millis(delay_ms.min(max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(500);
        assert_eq!(backoff_for_attempt(base, max, 0), Duration::from_millis(100));
        assert_eq!(backoff_for_attempt(base, max, 1), Duration::from_millis(200));
        assert_eq!(backoff_for_attempt(base, max, 4), Duration::from_millis(500));
    }

    #[test]
    fn envelope_success_returns_data() {
        let data = unwrap_envelope(json!({"status": "success", "data": {"ok": true}}))
            .expect("data");
        assert_eq!(data, json!({"ok": true}));
    }

    #[test]
    fn envelope_error_carries_service_message() {
        let err = unwrap_envelope(json!({
            "status": "error",
            "errorMessage": "There has no enough score to subtract"
        }))
        .expect_err("error envelope");
        assert!(matches!(err, BrokerError::Upstream(message) if message.contains("score")));
    }
}
