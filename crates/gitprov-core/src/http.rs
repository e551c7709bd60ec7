//! Shared pieces of the per-provider HTTP wrappers.
//!
//! Each adapter owns its own request builder (base URL, auth headers); the
//! helpers here turn transport failures and non-success responses into the
//! error taxonomy so no `reqwest` error ever reaches a caller.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::{Error, Result};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// User agent sent by every adapter.
pub const USER_AGENT: &str = "gitprov";

/// Build a `reqwest` client with the crate user agent and a bounded timeout.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| Error::TransientNetwork(format!("failed to build HTTP client: {}", e)))
}

/// Convert a transport-level failure (no HTTP status) into the taxonomy.
pub fn map_transport_error(error: reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::TransientNetwork(format!("request timed out: {}", error))
    } else if error.is_connect() {
        Error::TransientNetwork(format!("connection failed: {}", error))
    } else {
        Error::TransientNetwork(error.to_string())
    }
}

/// Parse `Retry-After` as delta-seconds or an HTTP-date.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let wait = at.with_timezone(&Utc) - Utc::now();
    Some(wait.num_seconds().max(0) as u64)
}

/// Read a header as a string, if present and valid UTF-8.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Whether an RFC 8288 `Link` header advertises a `rel="next"` page.
pub fn has_next_link(headers: &HeaderMap) -> bool {
    header_str(headers, "link").is_some_and(|link| {
        link.split(',')
            .any(|part| part.split(';').skip(1).any(|p| p.trim() == "rel=\"next\""))
    })
}

/// Turn a non-success response into an error, reading the body as message.
pub async fn error_from_response(provider: &str, response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let retry_after = parse_retry_after(response.headers());
    let message = response.text().await.unwrap_or_default();
    warn!(
        provider = provider,
        status = status,
        message = message.as_str(),
        "API error response"
    );
    Error::from_status(status, message, retry_after)
}

/// Decode a successful JSON body.
pub async fn decode_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let bytes = response.bytes().await.map_err(map_transport_error)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::TransientNetwork(format!("malformed response: {}", e)))
}
