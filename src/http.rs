//! JSON-over-HTTP calls with retry and exponential backoff.
//!
//! Shared by the embedding and LLM providers:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - Other 4xx → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ProviderError;

/// Send the request built by `build` until it succeeds, fails permanently,
/// or `max_retries` retries are spent. `label` names the provider in errors.
pub async fn post_json_with_retry<F>(
    label: &str,
    max_retries: u32,
    build: F,
) -> Result<Value, ProviderError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(provider = label, attempt, ?delay, "retrying request");
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json::<Value>().await.map_err(|e| {
                        ProviderError::Other(format!("{} returned invalid JSON: {}", label, e))
                    });
                }

                let body = response.text().await.unwrap_or_default();
                let err = ProviderError::from_status(status.as_u16(), &body);
                if !err.is_transient() {
                    return Err(err);
                }
                warn!(provider = label, attempt, error = %err, "transient provider error");
                last_err = Some(err);
            }
            Err(e) => {
                warn!(provider = label, attempt, error = %e, "provider connection error");
                last_err = Some(ProviderError::Unavailable(format!(
                    "{} connection error: {}",
                    label, e
                )));
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| ProviderError::Other(format!("{} failed after retries", label))))
}

/// Build a client with a per-request timeout.
pub fn client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}
