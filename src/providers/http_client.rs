//! Resilient HTTP transport for marketplace APIs
//!
//! This module wraps an HTTP backend with the rate governor, response
//! classification and retries with capped exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{HttpSettings, RetrySettings};
use crate::providers::rate_governor::{RateGovernor, RateKey};
use crate::providers::traits::{fragment, MarketplaceError, MarketplaceResult};

// ============================================================================
// Request / Response
// ============================================================================

/// One logical API call
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    /// Rate budget this call draws from
    pub key: RateKey,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>, key: RateKey) -> Self {
        ApiRequest {
            method,
            url: url.into(),
            key,
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
        }
    }

    /// Build a GET request
    pub fn get(url: impl Into<String>, key: RateKey) -> Self {
        Self::new(Method::GET, url, key)
    }

    /// Build a POST request
    pub fn post(url: impl Into<String>, key: RateKey) -> Self {
        Self::new(Method::POST, url, key)
    }

    /// Add a header to the request
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    /// Add a query parameter
    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Add JSON body to the request
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Add a typed JSON body
    pub fn json_body<T: Serialize>(self, body: &T) -> MarketplaceResult<Self> {
        let value = serde_json::to_value(body)
            .map_err(|e| MarketplaceError::parse(format!("request body: {}", e), ""))?;
        Ok(self.json(value))
    }

    /// Path portion of the URL, for logs
    pub fn endpoint(&self) -> &str {
        match self.url.find("://") {
            Some(scheme_end) => {
                let rest = &self.url[scheme_end + 3..];
                rest.find('/').map(|i| &rest[i..]).unwrap_or("/")
            }
            None => &self.url,
        }
    }
}

/// Raw HTTP response, body fully read
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Bytes,
    pub content_type: Option<String>,
    /// Parsed `Retry-After` header (seconds form)
    pub retry_after: Option<Duration>,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        ApiResponse {
            status,
            body: body.into(),
            content_type: None,
            retry_after: None,
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parse the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> MarketplaceResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            MarketplaceError::parse(format!("JSON parse error: {}", e), &self.text())
        })
    }
}

// ============================================================================
// Backend
// ============================================================================

/// Failure below the HTTP status level
#[derive(Debug, Clone)]
pub enum BackendError {
    Timeout(String),
    Network(String),
}

/// Executes a single HTTP exchange, no retries
#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, BackendError>;
}

/// Production backend on top of reqwest
pub struct ReqwestBackend {
    client: Client,
}

impl ReqwestBackend {
    pub fn new(settings: &HttpSettings) -> MarketplaceResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .pool_max_idle_per_host(settings.pool_max_idle_per_host)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| MarketplaceError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(ReqwestBackend { client })
    }
}

fn backend_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(err.to_string())
    } else {
        BackendError::Network(err.to_string())
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, BackendError> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .query(&request.query);

        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(backend_error)?;

        let status = response.status().as_u16();
        let headers = response.headers();
        let content_type = headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let retry_after = headers
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response.bytes().await.map_err(backend_error)?;

        Ok(ApiResponse {
            status,
            body,
            content_type,
            retry_after,
        })
    }
}

// ============================================================================
// Classification
// ============================================================================

/// How a status code is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    RateLimited,
    ServerError,
    ClientError,
}

pub fn classify(status: u16) -> ResponseClass {
    match status {
        200..=299 => ResponseClass::Success,
        429 => ResponseClass::RateLimited,
        500..=599 => ResponseClass::ServerError,
        // 4xx and anything unexpected is the caller's problem
        _ => ResponseClass::ClientError,
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Rate-governed, retrying transport shared by all adapters
pub struct ResilientTransport {
    backend: Arc<dyn HttpBackend>,
    governor: Arc<RateGovernor>,
    retry: RetrySettings,
}

impl ResilientTransport {
    pub fn new(backend: Arc<dyn HttpBackend>, governor: Arc<RateGovernor>, retry: RetrySettings) -> Self {
        ResilientTransport {
            backend,
            governor,
            retry,
        }
    }

    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    /// Delay before retry number `attempt + 1`.
    ///
    /// `min(base * 2^attempt, max)`, jittered into `[d/2, d]`, never shorter
    /// than the previous delay or the server's `Retry-After`.
    fn backoff_delay(&self, attempt: u32, previous: Duration, retry_after: Option<Duration>) -> Duration {
        let exponential = self
            .retry
            .base_delay()
            .saturating_mul(1u32 << attempt.min(20));
        let capped = exponential.min(self.retry.max_delay());

        let jittered = if self.retry.jitter {
            let factor = rand::thread_rng().gen_range(0.5..=1.0);
            capped.mul_f64(factor)
        } else {
            capped
        };

        jittered.max(previous).max(retry_after.unwrap_or_default())
    }

    /// Send a request, retrying rate-limited and transient failures.
    ///
    /// Client errors are returned immediately; exhausting the retry budget
    /// returns the last failure with its body attached.
    pub async fn send(&self, request: &ApiRequest) -> MarketplaceResult<ApiResponse> {
        let mut attempt: u32 = 0;
        let mut previous_delay = Duration::ZERO;

        loop {
            self.governor.admit(request.key).await;

            debug!(
                marketplace = %request.key.marketplace,
                endpoint = request.endpoint(),
                attempt,
                "Executing marketplace request"
            );

            let attempts = attempt + 1;
            let (error, retry_after) = match self.backend.execute(request).await {
                Ok(response) => match classify(response.status) {
                    ResponseClass::Success => return Ok(response),
                    ResponseClass::ClientError => {
                        warn!(
                            marketplace = %request.key.marketplace,
                            endpoint = request.endpoint(),
                            status = response.status,
                            "Marketplace rejected request"
                        );
                        return Err(MarketplaceError::ClientError {
                            status: response.status,
                            body: fragment(&response.text()),
                        });
                    }
                    ResponseClass::RateLimited => (
                        MarketplaceError::RateLimited {
                            attempts,
                            body: fragment(&response.text()),
                        },
                        response.retry_after,
                    ),
                    ResponseClass::ServerError => (
                        MarketplaceError::ServerFault {
                            status: response.status,
                            attempts,
                            body: fragment(&response.text()),
                        },
                        None,
                    ),
                },
                Err(BackendError::Timeout(_)) => (MarketplaceError::Timeout { attempts }, None),
                Err(BackendError::Network(message)) => {
                    (MarketplaceError::Transient { attempts, message }, None)
                }
            };

            if attempt >= self.retry.max_retries {
                warn!(
                    marketplace = %request.key.marketplace,
                    endpoint = request.endpoint(),
                    attempts,
                    error = %error,
                    "Retry budget exhausted"
                );
                return Err(error);
            }

            let delay = self.backoff_delay(attempt, previous_delay, retry_after);
            warn!(
                marketplace = %request.key.marketplace,
                endpoint = request.endpoint(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying marketplace request"
            );
            tokio::time::sleep(delay).await;

            previous_delay = delay;
            attempt += 1;
        }
    }

    /// Send and parse the JSON body
    pub async fn send_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> MarketplaceResult<T> {
        self.send(request).await?.json()
    }

    /// Send and return the body bytes untouched
    pub async fn send_raw(&self, request: &ApiRequest) -> MarketplaceResult<Bytes> {
        Ok(self.send(request).await?.body)
    }
}

// ============================================================================
// Scripted backend for tests
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// A call as seen by the scripted backend
    #[derive(Debug, Clone)]
    pub struct RecordedCall {
        pub method: Method,
        pub url: String,
        pub headers: Vec<(String, String)>,
        pub query: Vec<(String, String)>,
        pub body: Option<serde_json::Value>,
        pub at: tokio::time::Instant,
    }

    struct Route {
        method: Method,
        url_contains: String,
        responses: VecDeque<Result<ApiResponse, BackendError>>,
    }

    /// Replays canned responses per route; the last response of a route repeats
    #[derive(Default)]
    pub struct ScriptedBackend {
        routes: Mutex<Vec<Route>>,
        calls: Mutex<Vec<RecordedCall>>,
    }

    impl ScriptedBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn route(
            self,
            method: Method,
            url_contains: &str,
            responses: Vec<Result<ApiResponse, BackendError>>,
        ) -> Self {
            self.routes.lock().push(Route {
                method,
                url_contains: url_contains.to_string(),
                responses: responses.into(),
            });
            self
        }

        pub fn json_route(self, method: Method, url_contains: &str, bodies: Vec<serde_json::Value>) -> Self {
            let responses = bodies
                .into_iter()
                .map(|b| Ok(ApiResponse::new(200, b.to_string())))
                .collect();
            self.route(method, url_contains, responses)
        }

        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().clone()
        }

        pub fn calls_to(&self, url_contains: &str) -> Vec<RecordedCall> {
            self.calls
                .lock()
                .iter()
                .filter(|c| c.url.contains(url_contains))
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl HttpBackend for ScriptedBackend {
        async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, BackendError> {
            self.calls.lock().push(RecordedCall {
                method: request.method.clone(),
                url: request.url.clone(),
                headers: request.headers.clone(),
                query: request.query.clone(),
                body: request.body.clone(),
                at: tokio::time::Instant::now(),
            });

            let mut routes = self.routes.lock();
            let route = routes
                .iter_mut()
                .find(|r| r.method == request.method && request.url.contains(&r.url_contains));

            match route {
                Some(route) if route.responses.len() > 1 => route
                    .responses
                    .pop_front()
                    .unwrap_or_else(|| Err(BackendError::Network("script exhausted".into()))),
                Some(route) => route
                    .responses
                    .front()
                    .cloned()
                    .unwrap_or_else(|| Err(BackendError::Network("script exhausted".into()))),
                None => Err(BackendError::Network(format!("no route for {}", request.url))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedBackend;
    use super::*;
    use crate::config::RateLimitSettings;
    use crate::domain::MarketplaceId;
    use crate::providers::rate_governor::EndpointClass;
    use std::collections::HashMap;

    fn key() -> RateKey {
        RateKey::new(MarketplaceId::Wildberries, EndpointClass::General)
    }

    fn transport(backend: Arc<ScriptedBackend>, limits: RateLimitSettings, max_retries: u32) -> ResilientTransport {
        let retry = RetrySettings {
            max_retries,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter: true,
        };
        ResilientTransport::new(backend, Arc::new(RateGovernor::new(limits)), retry)
    }

    fn status(code: u16) -> Result<ApiResponse, BackendError> {
        Ok(ApiResponse::new(code, format!("{{\"status\":{}}}", code)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_rate_limit_with_monotonic_backoff() {
        let backend = Arc::new(
            ScriptedBackend::new().route(Method::GET, "/stocks", vec![status(429), status(429), status(200)]),
        );
        let transport = transport(backend.clone(), RateLimitSettings::uniform(0), 5);

        let response = transport
            .send(&ApiRequest::get("https://example.test/stocks", key()))
            .await
            .unwrap();
        assert_eq!(response.status, 200);

        let calls = backend.calls();
        assert_eq!(calls.len(), 3);
        let first_wait = calls[1].at - calls[0].at;
        let second_wait = calls[2].at - calls[1].at;
        assert!(first_wait >= Duration::from_millis(500));
        assert!(second_wait >= first_wait);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_not_retried() {
        let backend = Arc::new(ScriptedBackend::new().route(Method::GET, "/stocks", vec![status(400)]));
        let transport = transport(backend.clone(), RateLimitSettings::uniform(0), 5);

        let err = transport
            .send(&ApiRequest::get("https://example.test/stocks", key()))
            .await
            .unwrap_err();

        assert!(matches!(err, MarketplaceError::ClientError { status: 400, .. }));
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_server_errors_surface_last_body() {
        let backend = Arc::new(ScriptedBackend::new().route(
            Method::GET,
            "/stocks",
            vec![Ok(ApiResponse::new(503, "maintenance"))],
        ));
        let transport = transport(backend.clone(), RateLimitSettings::uniform(0), 2);

        let err = transport
            .send(&ApiRequest::get("https://example.test/stocks", key()))
            .await
            .unwrap_err();

        match err {
            MarketplaceError::ServerFault { status, attempts, body } => {
                assert_eq!(status, 503);
                assert_eq!(attempts, 3);
                assert_eq!(body, "maintenance");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(backend.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failure_is_transient() {
        let backend = Arc::new(ScriptedBackend::new().route(
            Method::GET,
            "/stocks",
            vec![
                Err(BackendError::Network("connection reset".into())),
                Err(BackendError::Timeout("read timeout".into())),
                status(200),
            ],
        ));
        let transport = transport(backend.clone(), RateLimitSettings::uniform(0), 5);

        let response = transport
            .send(&ApiRequest::get("https://example.test/stocks", key()))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(backend.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_a_floor() {
        let mut limited = ApiResponse::new(429, "slow down");
        limited.retry_after = Some(Duration::from_secs(7));
        let backend = Arc::new(ScriptedBackend::new().route(Method::GET, "/stocks", vec![Ok(limited), status(200)]));
        let transport = transport(backend.clone(), RateLimitSettings::uniform(0), 5);

        transport
            .send(&ApiRequest::get("https://example.test/stocks", key()))
            .await
            .unwrap();

        let calls = backend.calls();
        assert!(calls[1].at - calls[0].at >= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_consults_governor_before_each_call() {
        let backend = Arc::new(ScriptedBackend::new().route(Method::GET, "/supplier/stocks", vec![status(200)]));
        let mut limits = RateLimitSettings::uniform(0);
        limits.wildberries = HashMap::from([(EndpointClass::Statistics, 60_000)]);
        let transport = transport(backend.clone(), limits, 0);

        let stats = RateKey::new(MarketplaceId::Wildberries, EndpointClass::Statistics);
        let request = ApiRequest::get("https://example.test/api/v1/supplier/stocks", stats);
        transport.send(&request).await.unwrap();
        transport.send(&request).await.unwrap();

        let calls = backend.calls();
        assert!(calls[1].at - calls[0].at >= Duration::from_secs(60));
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(204), ResponseClass::Success);
        assert_eq!(classify(429), ResponseClass::RateLimited);
        assert_eq!(classify(502), ResponseClass::ServerError);
        assert_eq!(classify(404), ResponseClass::ClientError);
    }

    #[test]
    fn test_endpoint_strips_host() {
        let request = ApiRequest::get("https://api-seller.ozon.ru/v1/report/info", key());
        assert_eq!(request.endpoint(), "/v1/report/info");
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let response = ApiResponse::new(200, "<html>gateway</html>");
        let err = response.json::<serde_json::Value>().unwrap_err();
        assert!(matches!(err, MarketplaceError::ParseError { ref fragment, .. } if fragment.contains("gateway")));
    }
}
