//! Thin clients for the external providers (AI vision, shipping carrier,
//! OAuth token endpoints). All of them share one retry policy: exponential
//! backoff, retrying only on network errors, timeouts and 5xx responses.
//! 4xx responses are the provider's final answer and are never retried.

use log::warn;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("provider not configured")]
    Unconfigured,
    /// Definitive 4xx from the provider.
    #[error("provider rejected the request: {0}")]
    Rejected(u16),
    #[error("provider unavailable after retries: {0}")]
    Exhausted(String),
}

/// Base delay for the backoff ladder (1s, 2s, 4s). Overridable so tests
/// against a local mock server don't sleep for real.
fn base_delay_ms() -> u64 {
    std::env::var("UPSTREAM_RETRY_BASE_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1000)
}

/// Sends a request built by `make`, retrying transient failures with
/// exponential backoff. The builder closure is re-invoked per attempt since
/// a `RequestBuilder` is consumed by `send`.
pub async fn send_with_retry<F>(make: F) -> Result<reqwest::Response, UpstreamError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last = String::new();
    for attempt in 0..MAX_ATTEMPTS {
        if attempt > 0 {
            let delay = base_delay_ms() << (attempt - 1);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        match make().send().await {
            Ok(resp) if resp.status().is_server_error() => {
                last = format!("status {}", resp.status());
                warn!("upstream attempt {} failed: {last}", attempt + 1);
            }
            Ok(resp) if resp.status().is_client_error() => {
                return Err(UpstreamError::Rejected(resp.status().as_u16()));
            }
            Ok(resp) => return Ok(resp),
            Err(e) => {
                last = e.to_string();
                warn!("upstream attempt {} failed: {last}", attempt + 1);
            }
        }
    }
    Err(UpstreamError::Exhausted(last))
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_default()
}

// ---------------- AI vision ----------------

/// Image → structured clothing attributes. Best effort: callers are expected
/// to fall back to manual entry when this fails.
pub async fn analyze_garment(bytes: Vec<u8>, mime: &str) -> Result<Value, UpstreamError> {
    let base = std::env::var("VISION_API_URL").map_err(|_| UpstreamError::Unconfigured)?;
    let key = std::env::var("VISION_API_KEY").unwrap_or_default();
    let url = format!("{}/v1/analyze", base.trim_end_matches('/'));
    let client = http_client();
    let mime = mime.to_string();
    let resp = send_with_retry(|| {
        client
            .post(&url)
            .bearer_auth(&key)
            .header(reqwest::header::CONTENT_TYPE, mime.clone())
            .body(bytes.clone())
    })
    .await?;
    resp.json::<Value>()
        .await
        .map_err(|e| UpstreamError::Exhausted(e.to_string()))
}

// ---------------- Shipping carrier ----------------

pub async fn track_shipment(tracking_number: &str) -> Result<Value, UpstreamError> {
    let base = std::env::var("CARRIER_API_URL").map_err(|_| UpstreamError::Unconfigured)?;
    let url = format!(
        "{}/v1/track/{}",
        base.trim_end_matches('/'),
        urlencoding::encode(tracking_number)
    );
    let client = http_client();
    let resp = send_with_retry(|| client.get(&url)).await?;
    resp.json::<Value>()
        .await
        .map_err(|e| UpstreamError::Exhausted(e.to_string()))
}
