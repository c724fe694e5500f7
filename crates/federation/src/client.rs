//! `ActivityPub` HTTP client for delivering activities.
//!
//! Sends signed POST requests to remote inboxes and classifies the result.

use std::time::Duration;

use chrono::{DateTime, Utc};
use herald_common::{AppError, AppResult, DeliveryOutcome, FederationConfig};
use reqwest::{Client, header::HeaderMap};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::signer::HttpSigner;

/// `ActivityPub` HTTP client.
#[derive(Clone)]
pub struct ApClient {
    client: Client,
    user_agent: String,
}

impl ApClient {
    /// Create a new client.
    pub fn new(config: &FederationConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Config(format!("failed to create HTTP client: {e}")))?;

        let user_agent = config.user_agent.clone().unwrap_or_else(|| {
            format!(
                "herald/{} (+{})",
                env!("CARGO_PKG_VERSION"),
                config.instance_url
            )
        });

        Ok(Self { client, user_agent })
    }

    /// User-Agent sent with every request.
    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Deliver an activity to a remote inbox.
    ///
    /// 2xx is delivered. 429 and 5xx are retryable, honouring `Retry-After`.
    /// Other statuses, invalid inbox URLs and signing failures are permanent.
    /// Transport errors are retryable.
    pub async fn deliver(
        &self,
        inbox_url: &str,
        activity: &Value,
        signer: &HttpSigner,
    ) -> DeliveryOutcome {
        let url = match Url::parse(inbox_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            Ok(url) => {
                return DeliveryOutcome::permanent(format!(
                    "unsupported inbox scheme: {}",
                    url.scheme()
                ));
            }
            Err(e) => return DeliveryOutcome::permanent(format!("invalid inbox url: {e}")),
        };

        let body = match serde_json::to_vec(activity) {
            Ok(body) => body,
            Err(e) => return DeliveryOutcome::permanent(format!("unserializable activity: {e}")),
        };

        let headers = match signer.sign_request("POST", &url, &body) {
            Ok(headers) => headers,
            Err(e) => return DeliveryOutcome::permanent(format!("signing failed: {e}")),
        };

        let activity_type = activity
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("Unknown");
        debug!(inbox = %inbox_url, activity_type, "Delivering activity");

        let response = match self
            .client
            .post(url)
            .headers(headers)
            .header("User-Agent", &self.user_agent)
            .header("Content-Type", "application/activity+json")
            .header("Accept", "application/activity+json, application/ld+json")
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(inbox = %inbox_url, error = %e, "Delivery request failed");
                return DeliveryOutcome::retryable(format!("request failed: {e}"));
            }
        };

        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers(), Utc::now());
        let outcome = DeliveryOutcome::from_status(status, retry_after);

        match &outcome {
            DeliveryOutcome::Delivered => {
                info!(inbox = %inbox_url, status, "Activity delivered");
            }
            DeliveryOutcome::Retryable { .. } => {
                warn!(inbox = %inbox_url, status, ?retry_after, "Remote inbox asked to retry");
            }
            DeliveryOutcome::Permanent { .. } => {
                let body = response.text().await.unwrap_or_default();
                warn!(inbox = %inbox_url, status, body = %body, "Remote inbox rejected activity");
            }
            DeliveryOutcome::Deferred { .. } => {}
        }

        outcome
    }
}

/// Parse a `Retry-After` header given as seconds or an HTTP date.
fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get("retry-after")?.to_str().ok()?.trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?;
    (at.with_timezone(&Utc) - now).to_std().ok()
}
