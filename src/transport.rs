//! HTTP transport layer for delivering event payloads to the collector

use crate::errors::{DispatchError, Result};
use crate::event::EnvironmentInfo;
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, Response};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

pub const APP_KEY_HEADER: &str = "App-Key";
/// Carries the whole environment descriptor as compact JSON
pub const ENVIRONMENT_HEADER: &str = "X-Environment-Info";

/// A fully built collector request
#[derive(Debug, Clone, PartialEq)]
pub struct WebRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl WebRequest {
    /// Build a POST with the credential, content type and environment descriptor set
    pub fn build(url: &str, app_key: &str, env: &EnvironmentInfo, payload: String) -> Self {
        Self {
            url: url.to_string(),
            headers: vec![
                (APP_KEY_HEADER.to_string(), app_key.to_string()),
                (CONTENT_TYPE.as_str().to_string(), "application/json".to_string()),
                (USER_AGENT.as_str().to_string(), env.user_agent()),
                (ENVIRONMENT_HEADER.to_string(), env.to_json()),
            ],
            body: payload,
        }
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| DispatchError::Transport(format!("Invalid header name {}: {}", name, e)))?;
            let value = HeaderValue::from_bytes(value.as_bytes())
                .map_err(|e| DispatchError::Transport(format!("Invalid header value for {}: {}", name, e)))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

/// Sends a request and reports whether the collector accepted it.
///
/// `Ok(false)` is a non-success status, `Err` is a failure to get any
/// response at all. Dispatchers treat both as "not delivered".
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: WebRequest) -> Result<bool>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Client whose requests give up after `http_timeout`
    pub fn new(http_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(DispatchError::Http)?;

        Ok(Self {
            client,
            timeout: http_timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn handle_response(&self, response: Response, url: &str) -> bool {
        let status = response.status();

        if status.is_success() {
            debug!("Payload accepted by {}", url);
            return true;
        }

        let error_body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());

        match status.as_u16() {
            400 => warn!("Collector rejected payload as bad request: {}", error_body),
            401 | 403 => warn!("Collector refused the app key ({}): {}", status, error_body),
            404 => warn!("Collector endpoint not found at {}: {}", url, error_body),
            413 => warn!("Payload too large: {}", error_body),
            429 => warn!("Rate limited by collector: {}", error_body),
            500..=599 => warn!("Collector server error {}: {}", status, error_body),
            _ => warn!("Unexpected response {} from collector: {}", status, error_body),
        }

        false
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: WebRequest) -> Result<bool> {
        let headers = request.header_map()?;

        debug!("POST {} ({} bytes)", request.url, request.body.len());

        let response = timeout(
            self.timeout,
            self.client
                .post(&request.url)
                .headers(headers)
                .body(request.body)
                .send(),
        )
        .await
        .map_err(|_| DispatchError::Transport("Request timeout".to_string()))?
        .map_err(DispatchError::Http)?;

        Ok(self.handle_response(response, &request.url).await)
    }
}
