//! Mock implementations for testing.
//!
//! [`MockHttpTransport`] replays scripted responses and records every request
//! it receives, so tests can assert on exchange counts, URLs and bodies.

use crate::errors::TransportError;
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Failure injected instead of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Exchange deadline exceeded.
    Timeout,
    /// Connection reset.
    Network,
}

/// Mock response configuration
#[derive(Debug, Clone)]
pub struct MockResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Bytes,
    /// Delay before response
    pub delay: Option<Duration>,
    /// Failure to return instead
    pub failure: Option<MockFailure>,
}

impl MockResponse {
    /// Create a response with the given status and JSON body
    pub fn json<T: Serialize>(status: u16, data: &T) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: serde_json::to_vec(data).map(Bytes::from).unwrap_or_default(),
            delay: None,
            failure: None,
        }
    }

    /// Create a 200 response with a JSON body
    pub fn ok<T: Serialize>(data: &T) -> Self {
        Self::json(200, data)
    }

    /// Create an Airtable error response
    pub fn error(status: u16, error_type: &str, message: &str) -> Self {
        Self::json(
            status,
            &serde_json::json!({"error": {"type": error_type, "message": message}}),
        )
    }

    /// Create a 429 response with a `Retry-After` header
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::error(429, "RATE_LIMIT_REACHED", "Rate limit exceeded")
            .with_header("retry-after", &retry_after_secs.to_string())
    }

    /// Create a transport failure
    pub fn failure(failure: MockFailure) -> Self {
        Self {
            status: 0,
            headers: Vec::new(),
            body: Bytes::new(),
            delay: None,
            failure: Some(failure),
        }
    }

    /// Add a header
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Add delay to response
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn into_result(self) -> Result<HttpResponse, TransportError> {
        match self.failure {
            Some(MockFailure::Timeout) => {
                return Err(TransportError::Timeout("mock timeout".to_string()))
            }
            Some(MockFailure::Network) => {
                return Err(TransportError::Network("mock connection reset".to_string()))
            }
            None => {}
        }

        let status = StatusCode::from_u16(self.status)
            .map_err(|e| TransportError::Http(format!("invalid mock status: {}", e)))?;
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }
        Ok(HttpResponse::new(status, headers, self.body))
    }
}

/// Recorded request for verification
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Request method
    pub method: HttpMethod,
    /// Request URL
    pub url: Url,
    /// Request headers
    pub headers: HeaderMap,
    /// Request body
    pub body: Option<Bytes>,
    /// When the request reached the transport
    pub at: Instant,
}

impl RecordedRequest {
    /// Parses the body as JSON.
    pub fn json(&self) -> Option<serde_json::Value> {
        self.body
            .as_ref()
            .and_then(|b| serde_json::from_slice(b).ok())
    }

    /// All values of a query parameter.
    pub fn query_values(&self, key: &str) -> Vec<String> {
        self.url
            .query_pairs()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
            .collect()
    }

    /// A header value as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

type Handler = Box<dyn Fn(&HttpRequest) -> MockResponse + Send + Sync>;

/// Mock HTTP transport for testing
pub struct MockHttpTransport {
    /// Queue of responses to return
    responses: Mutex<VecDeque<MockResponse>>,
    /// Computes a response when the queue is empty
    handler: Option<Handler>,
    /// Recorded requests
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockHttpTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            handler: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Add a response to the queue
    pub fn add_response(self, response: MockResponse) -> Self {
        self.responses.lock().push_back(response);
        self
    }

    /// Add multiple responses
    pub fn add_responses(self, responses: impl IntoIterator<Item = MockResponse>) -> Self {
        self.responses.lock().extend(responses);
        self
    }

    /// Answer requests with `handler` once the queue is empty
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&HttpRequest) -> MockResponse + Send + Sync + 'static,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Wraps the transport in an `Arc` for sharing with a client
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests received
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Get the last recorded request
    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.requests.lock().last().cloned()
    }

    /// Get remaining response count
    pub fn remaining_responses(&self) -> usize {
        self.responses.lock().len()
    }

    fn next_response(&self, request: &HttpRequest) -> MockResponse {
        if let Some(response) = self.responses.lock().pop_front() {
            return response;
        }
        match &self.handler {
            Some(handler) => handler(request),
            None => MockResponse::error(500, "MOCK_EXHAUSTED", "No mock response configured"),
        }
    }
}

impl Default for MockHttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for MockHttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(RecordedRequest {
            method: request.method,
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            at: Instant::now(),
        });

        let response = self.next_response(&request);

        if let Some(delay) = response.delay {
            tokio::time::sleep(delay).await;
        }

        response.into_result()
    }
}
