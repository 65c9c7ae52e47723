//! HTTP client abstraction for making page requests.
//!
//! This module defines the `HttpClient` trait to abstract HTTP request execution,
//! enabling testability with mock implementations.

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// A single GET request against the datastore API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Base URL of the API (e.g., <http://localhost:8085>)
    pub base_url: String,
    /// Path portion of the URL (e.g., "/data/abc")
    pub path: String,
    /// Query parameters in the order they are sent
    pub query: Vec<(String, String)>,
    /// Name of the header carrying the session token
    pub auth_header: String,
    /// Session token, if any
    pub token: Option<String>,
}

impl HttpRequest {
    /// Path plus query string, as used in logs and error messages.
    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query = self
            .query
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.path, query)
    }

    /// Look up a query parameter by name.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Response from an HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body as a string
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Trait for executing HTTP requests.
///
/// This abstraction allows for different implementations (production vs. testing)
/// and makes the pagination logic testable without making real HTTP calls.
///
/// # Example
/// ```ignore
/// let client = ReqwestHttpClient::new();
/// let response = client.execute(&request, 5000).await?;
/// println!("Status: {}, Body: {}", response.status, response.body);
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync + Clone {
    /// Execute a GET request.
    ///
    /// Non-2xx statuses are returned as responses, not errors; only transport
    /// failures (network, timeout, invalid URL) produce an `Err`.
    async fn execute(&self, request: &HttpRequest, timeout_ms: u64) -> Result<HttpResponse>;
}

// ============================================================================
// Production Implementation using reqwest
// ============================================================================

/// Production HTTP client using reqwest.
#[derive(Clone, Default)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    #[tracing::instrument(skip(self, request), fields(path = %request.path))]
    async fn execute(&self, request: &HttpRequest, timeout_ms: u64) -> Result<HttpResponse> {
        let url = format!("{}{}", request.base_url.trim_end_matches('/'), request.path);

        tracing::debug!(
            url = %url,
            query = ?request.query,
            timeout_ms = timeout_ms,
            "Executing HTTP request"
        );

        let mut req = self
            .client
            .get(&url)
            .query(&request.query)
            .timeout(Duration::from_millis(timeout_ms));

        if let Some(token) = request.token.as_deref() {
            req = req.header(request.auth_header.as_str(), token);
        }

        let response = req.send().await.map_err(|e| {
            tracing::error!(url = %url, error = %e, "HTTP request failed");
            e
        })?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        tracing::debug!(
            path = %request.path,
            status = status,
            response_len = body.len(),
            "HTTP request completed"
        );

        Ok(HttpResponse { status, body })
    }
}

// ============================================================================
// Test/Mock Implementation
// ============================================================================

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::oneshot;

/// Mock HTTP client for testing.
///
/// Responses are queued per path (without query string) and served in FIFO
/// order, so consecutive pages of one entity are queued under the same key.
///
/// # Example
/// ```ignore
/// let mock = MockHttpClient::new();
/// mock.add_response(
///     "/data/sensor-1",
///     Ok(HttpResponse {
///         status: 200,
///         body: r#"{"total":0,"data":{"e":[]}}"#.to_string(),
///     }),
/// );
/// ```
#[derive(Clone)]
pub struct MockHttpClient {
    responses: Arc<Mutex<HashMap<String, Vec<MockResponse>>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    in_flight: Arc<AtomicUsize>,
}

/// A mock response that can optionally wait for a trigger before completing.
enum MockResponse {
    Immediate(Result<HttpResponse>),
    Triggered {
        response: Result<HttpResponse>,
        trigger: Option<oneshot::Receiver<()>>,
    },
}

/// Record of a call made to the mock HTTP client.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub path: String,
    pub path_and_query: String,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    pub token: Option<String>,
    pub timeout_ms: u64,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Add a predetermined response for a path.
    ///
    /// Multiple responses can be added for the same path; they are returned in
    /// FIFO order.
    pub fn add_response(&self, path: &str, response: Result<HttpResponse>) {
        self.responses
            .lock()
            .entry(path.to_string())
            .or_default()
            .push(MockResponse::Immediate(response));
    }

    /// Add a response that waits for a manual trigger before completing.
    ///
    /// Returns a sender that when triggered (by sending `()` or dropping) lets
    /// the request complete with the given response.
    pub fn add_response_with_trigger(
        &self,
        path: &str,
        response: Result<HttpResponse>,
    ) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.responses
            .lock()
            .entry(path.to_string())
            .or_default()
            .push(MockResponse::Triggered {
                response,
                trigger: Some(rx),
            });
        tx
    }

    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of requests currently executing.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

impl Default for MockHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn execute(&self, request: &HttpRequest, timeout_ms: u64) -> Result<HttpResponse> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlightGuard {
            in_flight: self.in_flight.clone(),
        };

        self.calls.lock().push(MockCall {
            path: request.path.clone(),
            path_and_query: request.path_and_query(),
            page: request.query_param("page").and_then(|p| p.parse().ok()),
            per_page: request.query_param("per_page").and_then(|p| p.parse().ok()),
            token: request.token.clone(),
            timeout_ms,
        });

        let mock_response = {
            let mut responses = self.responses.lock();
            responses
                .get_mut(&request.path)
                .filter(|queue| !queue.is_empty())
                .map(|queue| queue.remove(0))
        };

        match mock_response {
            Some(MockResponse::Immediate(response)) => response,
            Some(MockResponse::Triggered { response, trigger }) => {
                if let Some(rx) = trigger {
                    let _ = rx.await;
                }
                response
            }
            None => Err(crate::error::ExportError::Other(anyhow::anyhow!(
                "No mock response configured for GET {}",
                request.path
            ))),
        }
    }
}

/// Decrements the in-flight counter when dropped, even if the request future is cancelled.
struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &str, page: u64) -> HttpRequest {
        HttpRequest {
            base_url: "http://hds.local".to_string(),
            path: path.to_string(),
            query: vec![
                ("per_page".to_string(), "10".to_string()),
                ("page".to_string(), page.to_string()),
            ],
            auth_header: "X-Auth-Token".to_string(),
            token: Some("ticket".to_string()),
        }
    }

    #[test]
    fn test_path_and_query() {
        assert_eq!(request("/data/a", 3).path_and_query(), "/data/a?per_page=10&page=3");
    }

    #[tokio::test]
    async fn test_mock_client_fifo_per_path() {
        let mock = MockHttpClient::new();
        for body in ["first", "second"] {
            mock.add_response(
                "/data/a",
                Ok(HttpResponse {
                    status: 200,
                    body: body.to_string(),
                }),
            );
        }

        let first = mock.execute(&request("/data/a", 1), 5000).await.unwrap();
        let second = mock.execute(&request("/data/a", 2), 5000).await.unwrap();
        assert_eq!(first.body, "first");
        assert_eq!(second.body, "second");

        let calls = mock.get_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].page, Some(2));
        assert_eq!(calls[1].per_page, Some(10));
        assert_eq!(calls[0].token.as_deref(), Some("ticket"));
    }

    #[tokio::test]
    async fn test_mock_client_no_response() {
        let mock = MockHttpClient::new();
        assert!(mock.execute(&request("/data/missing", 1), 5000).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_client_with_trigger() {
        let mock = MockHttpClient::new();
        let trigger = mock.add_response_with_trigger(
            "/data/a",
            Ok(HttpResponse {
                status: 200,
                body: "triggered".to_string(),
            }),
        );

        let mock_clone = mock.clone();
        let handle =
            tokio::spawn(async move { mock_clone.execute(&request("/data/a", 1), 5000).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());
        assert_eq!(mock.in_flight_count(), 1);

        trigger.send(()).unwrap();
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.body, "triggered");
        assert_eq!(mock.in_flight_count(), 0);
    }
}
