//! HTTP client that replays queued events against the remote API.
//!
//! One call to [`ApiClient::send`] is exactly one network attempt, bounded by
//! the configured request timeout. Classifying the response is left to the
//! reconciler.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Url;
use tracing::{debug, info_span, warn, Instrument};

use crate::shared::config::{ConfigError, SyncConfig};
use crate::shared::error::DeliveryFailure;
use crate::shared::event::QueuedEvent;

/// Response bodies longer than this are truncated before being kept
const MAX_BODY_BYTES: usize = 1024;

/// What the server answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResponse {
    /// HTTP status code
    pub status_code: u16,
    /// Response body, truncated
    pub body: String,
    /// Time from send to response headers
    pub duration: Duration,
}

/// Delivery client shared by every pass in one context
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
    default_headers: BTreeMap<String, String>,
}

impl ApiClient {
    /// Build a client from the sync configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Client` if the HTTP client cannot be configured.
    pub fn new(config: &SyncConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.clone(),
            timeout: config.request_timeout,
            default_headers: config.default_headers.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve an event target into a full URL.
    ///
    /// Absolute `http://` and `https://` targets are used as-is; anything else
    /// is appended to the API base, keeping the base path (`/v1` + `/denuncias`
    /// gives `/v1/denuncias`).
    pub fn resolve_target(&self, target: &str) -> Result<Url, DeliveryFailure> {
        let target = target.trim();
        let lowered = target.to_ascii_lowercase();

        let raw = if lowered.starts_with("http://") || lowered.starts_with("https://") {
            target.to_string()
        } else {
            format!(
                "{}/{}",
                self.base_url.as_str().trim_end_matches('/'),
                target.trim_start_matches('/')
            )
        };

        Url::parse(&raw).map_err(|e| DeliveryFailure::invalid_request(format!("target '{}': {}", target, e)))
    }

    /// Headers for one attempt.
    ///
    /// Computed defaults first, then configured defaults, then the event's own
    /// headers; later layers replace earlier ones case-insensitively.
    pub fn build_headers(&self, event: &QueuedEvent) -> Result<HeaderMap, DeliveryFailure> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static("idempotency-key"),
            header_value(&event.idempotency_key)?,
        );

        for (name, value) in self.default_headers.iter().chain(event.headers.iter()) {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| DeliveryFailure::invalid_request(format!("header name '{}': {}", name, e)))?;
            headers.insert(name, header_value(value)?);
        }

        Ok(headers)
    }

    /// Make exactly one attempt to deliver `event`.
    ///
    /// Any HTTP response, whatever its status, is `Ok`. Transport problems map
    /// to `Network` or `Timeout`; an event that cannot be turned into a request
    /// maps to `InvalidRequest`.
    pub async fn send(&self, event: &QueuedEvent) -> Result<DeliveryResponse, DeliveryFailure> {
        let span = info_span!(
            "deliver_event",
            event_id = %event.id,
            kind = %event.kind,
            method = %event.method,
            attempt = event.attempts.saturating_add(1)
        );

        async move {
            let url = self.resolve_target(&event.target)?;
            let headers = self.build_headers(event)?;

            let mut request = self
                .client
                .request(event.method.into(), url.clone())
                .headers(headers);
            if let Some(payload) = &event.payload {
                request = request.body(payload.as_bytes().to_vec());
            }

            debug!(%url, "sending queued event");
            let started = Instant::now();

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(duration_ms = started.elapsed().as_millis() as u64, "request failed: {}", e);
                    if e.is_timeout() {
                        return Err(DeliveryFailure::timeout(self.timeout.as_millis() as u64));
                    }
                    if e.is_connect() {
                        return Err(DeliveryFailure::network(format!("connection failed: {}", e)));
                    }
                    return Err(DeliveryFailure::network(e.to_string()));
                }
            };

            let duration = started.elapsed();
            let status_code = response.status().as_u16();
            let body = match response.bytes().await {
                Ok(bytes) => truncate_body(&bytes),
                Err(e) => format!("[failed to read response body: {}]", e),
            };

            debug!(status = status_code, duration_ms = duration.as_millis() as u64, "received response");

            Ok(DeliveryResponse {
                status_code,
                body,
                duration,
            })
        }
        .instrument(span)
        .await
    }
}

fn header_value(value: &str) -> Result<HeaderValue, DeliveryFailure> {
    HeaderValue::from_str(value)
        .map_err(|e| DeliveryFailure::invalid_request(format!("header value '{}': {}", value, e)))
}

fn truncate_body(bytes: &[u8]) -> String {
    if bytes.len() > MAX_BODY_BYTES {
        let truncated = String::from_utf8_lossy(&bytes[..MAX_BODY_BYTES]);
        format!("{}... (truncated)", truncated)
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}
