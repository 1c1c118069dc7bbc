//! HTTP access to the dashboard API
//!
//! One shared `reqwest` client with a cookie jar, so the `arcanas_session`
//! cookie set at login travels on every REST call, the SSE stream and the
//! WebSocket handshake.

use std::sync::Arc;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error};
use url::Url;

use crate::config::ApiConfig;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("API Error: {} {}", .status.as_u16(), .status.canonical_reason().unwrap_or(""))]
    Status { status: StatusCode, body: String },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
}

impl ApiError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Http(e) => e.status(),
            _ => None,
        }
    }
}

/// Shared client for every dashboard endpoint
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    /// Same cookie jar, never a timeout: SSE responses stay open indefinitely
    streaming: Client,
    cookies: Arc<Jar>,
    base_url: Url,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let base_url = parse_base(&config.base_url)?;
        let cookies = Arc::new(Jar::default());

        let mut builder = Client::builder().cookie_provider(cookies.clone());
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;
        let streaming = Client::builder().cookie_provider(cookies.clone()).build()?;

        Ok(Self { http, streaming, cookies, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub(crate) fn streaming(&self) -> &Client {
        &self.streaming
    }

    /// `<base>/<endpoint>` with the endpoint's leading slash optional
    pub fn endpoint_url(&self, endpoint: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(endpoint.trim_start_matches('/'))?)
    }

    /// SSE stream location: `<base>/events`
    pub fn events_url(&self) -> Result<Url, ApiError> {
        self.endpoint_url("events")
    }

    /// WebSocket location: the base URL with `http(s)` swapped for `ws(s)`, then `/ws`
    pub fn websocket_url(&self) -> Result<Url, ApiError> {
        let mut url = self.endpoint_url("ws")?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => return Err(ApiError::UnsupportedScheme(other.to_string())),
        };
        url.set_scheme(scheme)
            .map_err(|_| ApiError::UnsupportedScheme(scheme.to_string()))?;
        Ok(url)
    }

    /// `Cookie` header value the jar holds for `url`, if any.
    ///
    /// WebSocket URLs are looked up under their HTTP equivalent.
    pub fn cookie_header(&self, url: &Url) -> Option<String> {
        let mut lookup = url.clone();
        let http_scheme = match url.scheme() {
            "ws" => Some("http"),
            "wss" => Some("https"),
            _ => None,
        };
        if let Some(scheme) = http_scheme {
            lookup.set_scheme(scheme).ok()?;
        }
        self.cookies
            .cookies(&lookup)
            .and_then(|value| value.to_str().ok().map(str::to_string))
    }

    /// JSON request against `<base>/<endpoint>`.
    ///
    /// Non-2xx answers become [`ApiError::Status`]; every failure is logged here.
    pub async fn request<T, B>(&self, method: Method, endpoint: &str, body: Option<&B>) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let result = self.send(method.clone(), endpoint, body).await;
        if let Err(e) = &result {
            error!(%method, endpoint, error = %e, "API request failed");
        }
        result
    }

    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        self.request::<T, ()>(Method::GET, endpoint, None).await
    }

    pub async fn post<T, B>(&self, endpoint: &str, body: Option<&B>) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, endpoint, body).await
    }

    async fn send<T, B>(&self, method: Method, endpoint: &str, body: Option<&B>) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.endpoint_url(endpoint)?;
        debug!(%method, %url, "API request");

        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            // `json` sets Content-Type: application/json
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }
        Ok(response.json().await?)
    }
}

fn parse_base(raw: &str) -> Result<Url, ApiError> {
    // Keep the last path segment when joining endpoints
    let normalized = format!("{}/", raw.trim_end_matches('/'));
    let url = Url::parse(&normalized)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ApiError::UnsupportedScheme(other.to_string())),
    }
}
