//! HTTP transport layer for the Airtable API.
//!
//! The orchestrator talks to the network only through [`HttpTransport`], so
//! tests can swap in [`crate::mocks::MockHttpTransport`].

use crate::config::PoolConfig;
use crate::errors::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header::HeaderMap, Client, Method, StatusCode};
use std::time::Duration;
use url::Url;

/// HTTP transport abstraction for testability.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send an HTTP request and receive a response.
    ///
    /// Non-2xx statuses are returned as responses, not errors; only failures
    /// to complete the exchange are reported as [`TransportError`].
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// HTTP request representation.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Request URL.
    pub url: Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Option<Bytes>,
    /// Deadline for this exchange.
    pub timeout: Option<Duration>,
}

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET method.
    Get,
    /// POST method.
    Post,
    /// PUT method.
    Put,
    /// PATCH method.
    Patch,
    /// DELETE method.
    Delete,
}

impl HttpMethod {
    /// Returns the method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        }
    }
}

/// HTTP response representation.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Response status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
}

impl HttpResponse {
    /// Creates a new HTTP response.
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Returns the `Retry-After` header as a duration, if it holds whole seconds.
    pub fn retry_after(&self) -> Option<Duration> {
        self.headers
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

/// Reqwest-based HTTP transport implementation.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Creates a new reqwest transport.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Creates a transport with its own connection pool.
    pub fn with_pool(connect_timeout: Duration, pool: &PoolConfig) -> Result<Self, TransportError> {
        let mut builder = Client::builder()
            .connect_timeout(connect_timeout)
            .pool_max_idle_per_host(pool.max_idle_per_host);
        if let Some(idle) = pool.idle_timeout {
            builder = builder.pool_idle_timeout(idle);
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::Http(format!("Failed to create client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let method: Method = request.method.into();
        let mut req = self
            .client
            .request(method, request.url)
            .headers(request.headers);

        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        if let Some(body) = request.body {
            req = req.body(body);
        }

        let response = req.send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(HttpResponse::new(status, headers, body))
    }
}
