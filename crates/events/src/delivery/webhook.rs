//! Webhook delivery with exponential-backoff retry.
//!
//! [`WebhookDelivery`] posts a JSON-encoded [`DeliveryPayload`] to the
//! notification gateway that fans web and push notifications out to
//! browsers and devices. Failed attempts are retried up to three times with
//! exponential backoff (1 s, 2 s, 4 s). Every request carries an
//! `Idempotency-Key` header so the gateway can drop repeats.

use std::time::Duration;

use async_trait::async_trait;
use quill_core::channels::DeliveryChannel;
use quill_core::types::DbId;
use serde::Serialize;

use super::{DeliveryDispatcher, DeliveryPayload, DispatchError};

/// Retry delays in seconds (exponential backoff: 1s, 2s, 4s).
const RETRY_DELAYS_SECS: [u64; 3] = [1, 2, 4];

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for webhook delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

impl WebhookError {
    /// Client errors other than 408 and 429 will not succeed on retry.
    fn is_retryable(&self) -> bool {
        match self {
            WebhookError::Request(_) => true,
            WebhookError::HttpStatus(code) => !(400..500).contains(code) || *code == 408 || *code == 429,
        }
    }
}

// ---------------------------------------------------------------------------
// WebhookConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Gateway endpoint receiving web and push notifications.
    pub url: String,
}

impl WebhookConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` if `NOTIFY_WEBHOOK_URL` is not set, signalling that
    /// web and push delivery are not configured.
    ///
    /// | Variable             | Required | Default |
    /// |----------------------|----------|---------|
    /// | `NOTIFY_WEBHOOK_URL` | yes      | none    |
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("NOTIFY_WEBHOOK_URL").ok()?;
        if url.trim().is_empty() {
            return None;
        }
        Some(Self { url })
    }
}

// ---------------------------------------------------------------------------
// WebhookDelivery
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct WebhookBody<'a> {
    user_id: DbId,
    channel: DeliveryChannel,
    payload: &'a DeliveryPayload,
}

/// Delivers notifications to the gateway webhook.
pub struct WebhookDelivery {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookDelivery {
    /// Create a delivery service with a pre-configured HTTP client.
    pub fn new(config: WebhookConfig) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, config })
    }

    /// Post one payload with retry.
    ///
    /// Returns `Ok(())` on the first successful attempt.
    pub async fn post(
        &self,
        user_id: DbId,
        channel: DeliveryChannel,
        payload: &DeliveryPayload,
    ) -> Result<(), WebhookError> {
        let body = WebhookBody {
            user_id,
            channel,
            payload,
        };
        let key = payload.idempotency_key();
        let url = self.config.url.as_str();

        for (attempt, delay_secs) in RETRY_DELAYS_SECS.iter().enumerate() {
            match self.try_send(&key, &body).await {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_retryable() => {
                    tracing::warn!(url, key = %key, error = %e, "Webhook rejected delivery");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        url,
                        key = %key,
                        error = %e,
                        "Webhook delivery attempt failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(*delay_secs)).await;
                }
            }
        }

        // Final attempt after the last backoff.
        self.try_send(&key, &body).await.inspect_err(|e| {
            tracing::warn!(url, key = %key, error = %e, "Webhook delivery failed after all retries");
        })
    }

    /// Execute a single POST request and check the response status.
    async fn try_send(&self, key: &str, body: &WebhookBody<'_>) -> Result<(), WebhookError> {
        let response = self
            .client
            .post(&self.config.url)
            .header(IDEMPOTENCY_HEADER, key)
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(WebhookError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl DeliveryDispatcher for WebhookDelivery {
    async fn deliver(
        &self,
        user_id: DbId,
        channel: DeliveryChannel,
        payload: &DeliveryPayload,
    ) -> Result<(), DispatchError> {
        Ok(self.post(user_id, channel, payload).await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_does_not_panic() {
        let config = WebhookConfig {
            url: "http://localhost:9/notify".into(),
        };
        assert!(WebhookDelivery::new(config).is_ok());
    }

    #[test]
    fn webhook_error_display_http_status() {
        let err = WebhookError::HttpStatus(502);
        assert_eq!(err.to_string(), "Webhook returned HTTP 502");
    }

    #[test]
    fn webhook_error_display_request() {
        // Build a reqwest error from an invalid URL.
        let req_err = reqwest::Client::new().get("://bad").build().unwrap_err();
        let err = WebhookError::Request(req_err);
        assert!(err.to_string().contains("HTTP request failed"));
    }

    #[test]
    fn client_errors_are_not_retried() {
        assert!(!WebhookError::HttpStatus(400).is_retryable());
        assert!(!WebhookError::HttpStatus(410).is_retryable());
        assert!(WebhookError::HttpStatus(429).is_retryable());
        assert!(WebhookError::HttpStatus(408).is_retryable());
        assert!(WebhookError::HttpStatus(503).is_retryable());
    }

    #[test]
    fn from_env_requires_url() {
        std::env::remove_var("NOTIFY_WEBHOOK_URL");
        assert!(WebhookConfig::from_env().is_none());
    }
}
