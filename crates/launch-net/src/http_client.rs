use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;

/// Content type sent with raw-body POST requests.
pub const RAW_BODY_CONTENT_TYPE: &str = "text/plain; charset=UTF-8";

const DEFAULT_MAX_ATTEMPTS: usize = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const ERROR_BODY_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
/// Public struct `HttpRetryConfig` used across launch components.
pub struct HttpRetryConfig {
    pub max_attempts: usize,
    pub retry_delay_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for HttpRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl HttpRetryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Enumerates supported request shapes.
pub enum HttpRequestSpec {
    Get { url: String },
    PostForm { url: String, fields: Vec<(String, String)> },
    PostRaw { url: String, body: String },
}

impl HttpRequestSpec {
    pub fn get(url: impl Into<String>) -> Self {
        Self::Get { url: url.into() }
    }

    pub fn post_form<K, V>(url: impl Into<String>, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::PostForm {
            url: url.into(),
            fields: fields
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    pub fn post_raw(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self::PostRaw {
            url: url.into(),
            body: body.into(),
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Get { url } | Self::PostForm { url, .. } | Self::PostRaw { url, .. } => url,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Self::Get { .. } => "GET",
            Self::PostForm { .. } | Self::PostRaw { .. } => "POST",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `HttpResponse` used across launch components.
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Enumerates supported `TransportError` values.
pub enum TransportError {
    #[error("failed to create request: {0}")]
    InvalidRequest(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_builder() {
            Self::InvalidRequest(error.to_string())
        } else if error.is_timeout() {
            Self::Timeout(error.to_string())
        } else if error.is_connect() {
            Self::Connect(error.to_string())
        } else {
            Self::Other(error.to_string())
        }
    }
}

#[derive(Debug, Error)]
/// Enumerates supported `HttpClientError` values.
pub enum HttpClientError {
    #[error("failed to build http client: {0}")]
    ClientBuild(#[from] reqwest::Error),
    #[error("request to {url} could not be created: {message}")]
    InvalidRequest { url: String, message: String },
    #[error("request to {url} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        url: String,
        attempts: usize,
        last_status: Option<u16>,
        last_error: String,
    },
}

/// Performs a single HTTP exchange. Implementations must not retry.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: &HttpRequestSpec) -> Result<HttpResponse, TransportError>;
}

/// Trait contract for sending a request and receiving the response body.
#[async_trait]
pub trait HttpSender: Send + Sync {
    async fn send(&self, request: HttpRequestSpec) -> Result<String, HttpClientError>;
}

#[derive(Debug, Clone)]
/// `reqwest`-backed transport with a request-level timeout.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(request_timeout: Duration) -> Result<Self, HttpClientError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &HttpRequestSpec) -> Result<HttpResponse, TransportError> {
        let builder = match request {
            HttpRequestSpec::Get { url } => self.client.get(url),
            HttpRequestSpec::PostForm { url, fields } => self.client.post(url).form(fields),
            HttpRequestSpec::PostRaw { url, body } => self
                .client
                .post(url)
                .header(CONTENT_TYPE, RAW_BODY_CONTENT_TYPE)
                .body(body.clone()),
        };
        let prepared = builder.build()?;
        let response = self.client.execute(prepared).await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

/// Retries failed requests a fixed number of times with a fixed delay.
#[derive(Clone)]
pub struct RetryingHttpClient {
    transport: Arc<dyn HttpTransport>,
    config: HttpRetryConfig,
}

impl std::fmt::Debug for RetryingHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingHttpClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RetryingHttpClient {
    pub fn new(config: HttpRetryConfig) -> Result<Self, HttpClientError> {
        let transport = ReqwestTransport::new(config.request_timeout())?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: HttpRetryConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &HttpRetryConfig {
        &self.config
    }
}

#[async_trait]
impl HttpSender for RetryingHttpClient {
    async fn send(&self, request: HttpRequestSpec) -> Result<String, HttpClientError> {
        let max_attempts = self.config.max_attempts.max(1);
        let retry_delay = self.config.retry_delay();
        let url = request.url().to_string();
        let mut last_status = None;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.transport.execute(&request).await {
                Ok(response) if response.is_success() => {
                    tracing::debug!(
                        method = request.method(),
                        url = %url,
                        attempt,
                        status = response.status,
                        "http request succeeded"
                    );
                    return Ok(response.body);
                }
                Ok(response) => {
                    last_status = Some(response.status);
                    last_error = describe_status(&response);
                }
                Err(TransportError::InvalidRequest(message)) => {
                    return Err(HttpClientError::InvalidRequest { url, message });
                }
                Err(error) => {
                    last_status = None;
                    last_error = error.to_string();
                }
            }

            if attempt < max_attempts {
                tracing::warn!(
                    method = request.method(),
                    url = %url,
                    attempt,
                    max_attempts,
                    error = %last_error,
                    "http request failed; retrying"
                );
                sleep(retry_delay).await;
            }
        }

        Err(HttpClientError::RetriesExhausted {
            url,
            attempts: max_attempts,
            last_status,
            last_error,
        })
    }
}

fn describe_status(response: &HttpResponse) -> String {
    let body = response.body.trim();
    if body.is_empty() {
        return format!("HTTP {}", response.status);
    }
    let preview = body.chars().take(ERROR_BODY_PREVIEW_CHARS).collect::<String>();
    format!("HTTP {}: {preview}", response.status)
}
