//! Shared HTTP client construction for the event-stream and unary sessions.

use crate::{Error, ErrorContext, Result};
use reqwest::Proxy;
use std::env;
use std::time::Duration;

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.parse::<T>().ok())
}

/// Build the HTTP client used by the HTTP-based sessions.
///
/// No request timeout is installed: a long generation stream is a normal
/// condition here. Pooling and proxy are env-overridable:
/// - `GENAI_HTTP_POOL_MAX_IDLE_PER_HOST` (default 32)
/// - `GENAI_HTTP_POOL_IDLE_TIMEOUT_SECS` (default 90)
/// - `GENAI_PROXY_URL`
pub fn build_http_client() -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(env_parse("GENAI_HTTP_POOL_MAX_IDLE_PER_HOST").unwrap_or(32))
        .pool_idle_timeout(Some(Duration::from_secs(
            env_parse("GENAI_HTTP_POOL_IDLE_TIMEOUT_SECS").unwrap_or(90),
        )));

    if let Ok(proxy_url) = env::var("GENAI_PROXY_URL") {
        match Proxy::all(&proxy_url) {
            Ok(proxy) => builder = builder.proxy(proxy),
            Err(e) => tracing::warn!("Ignoring invalid GENAI_PROXY_URL {}: {}", proxy_url, e),
        }
    }

    builder.build().map_err(|e| {
        Error::configuration_with_context(
            format!("failed to build HTTP client: {}", e),
            ErrorContext::new().with_source("http"),
        )
    })
}
