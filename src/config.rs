//! Endpoint configuration.
//!
//! The three transports are usually fronted by one CDN domain with fixed path
//! prefixes; each endpoint can also be given explicitly.

use crate::{Error, ErrorContext, Result};
use serde::Deserialize;
use std::env;
use std::path::Path;
use url::Url;

pub const ENV_CDN_DOMAIN: &str = "GENAI_CDN_DOMAIN";
pub const ENV_SOCKET_URL: &str = "GENAI_SOCKET_URL";
pub const ENV_EVENT_STREAM_URL: &str = "GENAI_EVENT_STREAM_URL";
pub const ENV_UNARY_URL: &str = "GENAI_UNARY_URL";

/// Base locations of the three generation endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// `ws://` or `wss://` URL of the socket endpoint.
    pub socket: Url,
    /// `http(s)://` URL the event stream is opened against.
    pub event_stream: Url,
    /// `http(s)://` base URL; requests go to `{unary}/generate`.
    pub unary: Url,
}

#[derive(Debug, Default, Deserialize)]
struct RawEndpoints {
    #[serde(default)]
    cdn_domain: Option<String>,
    #[serde(default)]
    socket: Option<String>,
    #[serde(default)]
    event_stream: Option<String>,
    #[serde(default)]
    unary: Option<String>,
}

impl EndpointConfig {
    pub fn new(socket: &str, event_stream: &str, unary: &str) -> Result<Self> {
        let socket = parse_endpoint("endpoints.socket", socket, &["ws", "wss"])?;
        let event_stream = parse_endpoint("endpoints.event_stream", event_stream, &["http", "https"])?;
        let unary = parse_endpoint("endpoints.unary", unary, &["http", "https"])?;
        Ok(Self {
            socket,
            event_stream,
            unary,
        })
    }

    /// Layout behind a single CDN domain: `/ws/`, `/sse/` and `/api`.
    pub fn from_cdn_domain(domain: &str) -> Result<Self> {
        let domain = strip_scheme(domain).trim_end_matches('/');
        if domain.is_empty() {
            return Err(missing_domain());
        }
        Self::new(
            &format!("wss://{}/ws/", domain),
            &format!("https://{}/sse/", domain),
            &format!("https://{}/api", domain),
        )
    }

    /// Read `GENAI_CDN_DOMAIN`, with per-endpoint overrides.
    pub fn from_env() -> Result<Self> {
        Self::from_raw(RawEndpoints {
            cdn_domain: env::var(ENV_CDN_DOMAIN).ok(),
            socket: env::var(ENV_SOCKET_URL).ok(),
            event_stream: env::var(ENV_EVENT_STREAM_URL).ok(),
            unary: env::var(ENV_UNARY_URL).ok(),
        })
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let raw: RawEndpoints = serde_yaml::from_str(yaml)?;
        Self::from_raw(raw)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    fn from_raw(raw: RawEndpoints) -> Result<Self> {
        let base = match raw.cdn_domain.as_deref().filter(|d| !d.trim().is_empty()) {
            Some(domain) => Some(Self::from_cdn_domain(domain.trim())?),
            None => None,
        };

        let pick = |explicit: Option<String>, fallback: Option<&Url>| -> Option<String> {
            explicit
                .filter(|s| !s.trim().is_empty())
                .or_else(|| fallback.map(|u| u.to_string()))
        };

        match (
            pick(raw.socket, base.as_ref().map(|b| &b.socket)),
            pick(raw.event_stream, base.as_ref().map(|b| &b.event_stream)),
            pick(raw.unary, base.as_ref().map(|b| &b.unary)),
        ) {
            (Some(socket), Some(event_stream), Some(unary)) => {
                Self::new(&socket, &event_stream, &unary)
            }
            _ => Err(missing_domain()),
        }
    }

    /// Full URL of the unary generate call.
    pub fn unary_generate_url(&self) -> String {
        format!("{}/generate", self.unary.as_str().trim_end_matches('/'))
    }
}

fn strip_scheme(domain: &str) -> &str {
    domain
        .trim()
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or_else(|| domain.trim())
}

fn missing_domain() -> Error {
    Error::configuration_with_context(
        "CDN domain is not configured",
        ErrorContext::new()
            .with_field_path(ENV_CDN_DOMAIN)
            .with_source("config"),
    )
}

fn parse_endpoint(field: &str, raw: &str, schemes: &[&str]) -> Result<Url> {
    let url = Url::parse(raw.trim()).map_err(|e| {
        Error::configuration_with_context(
            format!("invalid endpoint URL: {}", e),
            ErrorContext::new()
                .with_field_path(field)
                .with_details(raw)
                .with_source("config"),
        )
    })?;
    if !schemes.contains(&url.scheme()) {
        return Err(Error::configuration_with_context(
            format!(
                "unsupported scheme '{}', expected one of: {}",
                url.scheme(),
                schemes.join(", ")
            ),
            ErrorContext::new()
                .with_field_path(field)
                .with_details(raw)
                .with_source("config"),
        ));
    }
    Ok(url)
}
