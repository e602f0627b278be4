//! HTTP client for a Valhalla provider
//!
//! Posts JSON bodies, classifies the outcome into the error taxonomy and retries
//! rate-limited requests with jittered exponential backoff inside a time budget.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use rand::Rng;
use reqwest::{ClientBuilder, StatusCode, Url};
use serde_json::Value;

use crate::core::error::{Error, Result};
use crate::core::request::value_label;

/// User-Agent sent with every request
pub const USER_AGENT: &str = concat!("ValhallaLayers@v", env!("VALHALLA_LAYERS_VERSION"));

/// Default retry budget measured from the first attempt
pub const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_secs(60);

/// Called before a rate-limited request is retried
pub type RateLimitCallback = Arc<dyn Fn() + Send + Sync>;

/// A routing provider: where to send requests and with which key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    pub key: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "Valhalla FOSSGIS".to_string(),
            base_url: "https://valhalla1.openstreetmap.de".to_string(),
            key: String::new(),
        }
    }
}

/// Timeouts for a client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Budget for one request including all rate-limit retries
    pub retry_timeout: Duration,
    /// Transport timeout of a single attempt
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            retry_timeout: DEFAULT_RETRY_TIMEOUT,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// What the last request looked like, for debug display
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub url: Option<String>,
    pub response_time: Duration,
    pub status_code: Option<u16>,
}

/// Delay before attempt `retry_count`: `1.5^(retry_count - 1) * jitter` seconds
///
/// The first attempt (`retry_count == 0`) is never delayed.
pub fn backoff_delay(retry_count: u32, jitter: f64) -> Option<Duration> {
    if retry_count == 0 {
        return None;
    }
    let seconds = 1.5_f64.powi(retry_count as i32 - 1) * jitter;
    Some(Duration::from_secs_f64(seconds))
}

/// Uniform jitter factor in `[0.5, 1.5)`
pub fn jitter() -> f64 {
    rand::rng().random_range(0.5..1.5)
}

/// Error text of a failed response: the body's `error` member, else the reason phrase
fn error_message(status: StatusCode, text: &str) -> Option<String> {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| v.get("error").map(value_label))
        .or_else(|| status.canonical_reason().map(str::to_string))
        .or_else(|| (!text.is_empty()).then(|| text.to_string()))
}

/// Client bound to one provider
pub struct Client {
    http: reqwest::Client,
    provider: ProviderConfig,
    options: ClientOptions,
    on_rate_limit: Option<RateLimitCallback>,
    diagnostics: Diagnostics,
}

impl Client {
    /// Create a client with default timeouts
    pub fn new(provider: ProviderConfig) -> Result<Self> {
        Self::with_options(provider, ClientOptions::default())
    }

    /// Create a client with custom timeouts
    pub fn with_options(provider: ProviderConfig, options: ClientOptions) -> Result<Self> {
        let http = ClientBuilder::new()
            .timeout(options.request_timeout)
            .connect_timeout(options.connect_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::InvalidInput(format!("cannot create HTTP client: {e}")))?;

        Ok(Self {
            http,
            provider,
            options,
            on_rate_limit: None,
            diagnostics: Diagnostics::default(),
        })
    }

    /// Register the observer notified before each rate-limit retry
    pub fn on_rate_limit(&mut self, callback: RateLimitCallback) {
        self.on_rate_limit = Some(callback);
    }

    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// `{base_url}{path}?{sorted, url-encoded params}`
    pub fn url_for(&self, path: &str) -> Result<Url> {
        let mut params = BTreeMap::new();
        params.insert("access_token", self.provider.key.as_str());

        let base = self.provider.base_url.trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}{path}")).map_err(|e| {
            Error::InvalidInput(format!("invalid provider URL '{}': {e}", self.provider.base_url))
        })?;
        url.query_pairs_mut().extend_pairs(params);
        Ok(url)
    }

    /// POST `body` to `path` and return the parsed response
    pub async fn request(&mut self, path: &str, body: &Value) -> Result<Value> {
        self.send(path, body, None, 0).await
    }

    /// POST with an explicit position in a retry chain
    ///
    /// `first_request_time` anchors the retry budget; `None` starts a new chain.
    pub async fn send(
        &mut self,
        path: &str,
        body: &Value,
        first_request_time: Option<Instant>,
        retry_count: u32,
    ) -> Result<Value> {
        let first_request_time = first_request_time.unwrap_or_else(Instant::now);
        let mut retry_count = retry_count;

        loop {
            match self.attempt(path, body, first_request_time, retry_count).await {
                Err(Error::OverQueryLimit { .. }) => {
                    if let Some(callback) = &self.on_rate_limit {
                        callback();
                    }
                    retry_count += 1;
                }
                other => return other,
            }
        }
    }

    async fn attempt(
        &mut self,
        path: &str,
        body: &Value,
        first_request_time: Instant,
        retry_count: u32,
    ) -> Result<Value> {
        if first_request_time.elapsed() > self.options.retry_timeout {
            return Err(Error::Timeout(format!(
                "Retry budget of {}s exhausted after {retry_count} retries.",
                self.options.retry_timeout.as_secs_f64()
            )));
        }

        if let Some(delay) = backoff_delay(retry_count, jitter()) {
            debug!("Backing off {:.2}s before retry {retry_count}", delay.as_secs_f64());
            tokio::time::sleep(delay).await;
        }

        let url = self.url_for(path)?;
        self.diagnostics.url = Some(url.to_string());
        debug!(
            "url: {url}\nParameters: {}",
            serde_json::to_string_pretty(body).unwrap_or_default()
        );

        let start = Instant::now();
        let sent = self.http.post(url).json(body).send().await;
        self.diagnostics.response_time = start.elapsed();

        let response = match sent {
            Ok(response) => response,
            Err(err) => {
                self.diagnostics.status_code = None;
                return Err(self.transport_error(err));
            }
        };

        let status = response.status();
        self.diagnostics.status_code = Some(status.as_u16());
        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        let feature_id = body.get("id").map(value_label);

        if !status.is_success() {
            let code = status.as_u16();
            let message = error_message(status, &text);
            return Err(match code {
                401 => Error::InvalidKey { status: code.to_string(), message },
                429 => {
                    warn!("OverQueryLimit: Query limit exceeded");
                    Error::OverQueryLimit { status: code.to_string(), message }
                }
                400..=499 => {
                    warn!(
                        "Feature ID {} caused a ApiError: {}",
                        feature_id.as_deref().unwrap_or_default(),
                        message.as_deref().unwrap_or_default()
                    );
                    Error::ApiError { status: code.to_string(), message, feature_id }
                }
                _ => Error::GenericServerError { status: code.to_string(), message },
            });
        }

        let parsed: Value = serde_json::from_str(&text)?;

        // Some deployments report errors with HTTP 200
        if let Some(error) = parsed.get("error") {
            return Err(Error::ApiError {
                status: parsed.get("status_code").map(value_label).unwrap_or_default(),
                message: Some(value_label(error)),
                feature_id,
            });
        }

        Ok(parsed)
    }

    fn transport_error(&self, err: reqwest::Error) -> Error {
        if err.is_connect() {
            Error::GenericServerError {
                status: "1".to_string(),
                message: Some(format!("Host {} not valid.", self.provider.base_url)),
            }
        } else {
            Error::from(err)
        }
    }

    /// Human-readable account of the last request, shown whether it failed or not
    pub fn debug_summary(&self, body: Option<&Value>, error: Option<&Error>) -> String {
        let mut summary = String::new();
        if let Some(url) = &self.diagnostics.url {
            summary.push_str(&format!("url: {url}\n"));
        }
        if let Some(body) = body {
            summary.push_str(&format!(
                "Parameters:\n{}\n",
                serde_json::to_string_pretty(body).unwrap_or_default()
            ));
        }
        summary.push_str(&format!(
            "Response time: {:.3} s\n",
            self.diagnostics.response_time.as_secs_f64()
        ));
        if let Some(code) = self.diagnostics.status_code {
            summary.push_str(&format!("Status code: {code}\n"));
        }
        if let Some(error) = error {
            summary.push_str(&format!("{}: {}\n", error.kind(), error));
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base_url: &str) -> ProviderConfig {
        ProviderConfig {
            name: "test".to_string(),
            base_url: base_url.to_string(),
            key: "secret key".to_string(),
        }
    }

    #[test]
    fn test_backoff_delay() {
        assert_eq!(backoff_delay(0, 1.0), None);
        assert_eq!(backoff_delay(1, 1.0), Some(Duration::from_secs_f64(1.0)));
        assert_eq!(backoff_delay(3, 1.0), Some(Duration::from_secs_f64(2.25)));

        // Jitter scales 2.25s into [1.125, 3.375)
        for _ in 0..100 {
            let delay = backoff_delay(3, jitter()).unwrap().as_secs_f64();
            assert!((1.125..3.375).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn test_url_has_sorted_encoded_params() {
        let client = Client::new(provider("http://localhost:8002/")).unwrap();
        let url = client.url_for("/route").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8002/route?access_token=secret+key");
        assert!(USER_AGENT.starts_with("ValhallaLayers@v"));
    }

    #[tokio::test]
    async fn test_successful_request_records_diagnostics() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/route"))
            .and(query_param("access_token", "secret key"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"trip": {"legs": []}})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut client = Client::new(provider(&mock_server.uri())).unwrap();
        let response = client.request("/route", &json!({"id": 1})).await.unwrap();

        assert_eq!(response, json!({"trip": {"legs": []}}));
        assert_eq!(client.diagnostics().status_code, Some(200));
        assert!(client.diagnostics().url.as_deref().unwrap().contains("/route?access_token="));

        let summary = client.debug_summary(Some(&json!({"id": 1})), None);
        assert!(summary.contains("Parameters:"));
        assert!(summary.contains("Status code: 200"));
    }

    #[tokio::test]
    async fn test_401_is_invalid_key() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;

        let mut client = Client::new(provider(&mock_server.uri())).unwrap();
        let err = client.request("/route", &json!({"id": 1})).await.unwrap_err();
        assert!(matches!(err, Error::InvalidKey { ref status, .. } if status == "401"));
        assert!(err.aborts_batch());
    }

    #[tokio::test]
    async fn test_451_is_api_error_with_feature_id() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(451)
                    .set_body_json(json!({"error": "No path could be found", "status_code": 451})),
            )
            .mount(&mock_server)
            .await;

        let mut client = Client::new(provider(&mock_server.uri())).unwrap();
        let err = client
            .request("/route", &json!({"id": "A & X"}))
            .await
            .unwrap_err();
        match err {
            Error::ApiError { status, message, feature_id } => {
                assert_eq!(status, "451");
                assert_eq!(message.as_deref(), Some("No path could be found"));
                assert_eq!(feature_id.as_deref(), Some("A & X"));
            }
            other => panic!("expected ApiError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_in_200_body_is_api_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"error": "Failed to parse json request", "status_code": 400})),
            )
            .mount(&mock_server)
            .await;

        let mut client = Client::new(provider(&mock_server.uri())).unwrap();
        let err = client.request("/isochrone", &json!({"id": 7})).await.unwrap_err();
        assert_eq!(err.kind(), "ApiError");
        assert_eq!(err.to_string(), "400 (Failed to parse json request)");
    }

    #[tokio::test]
    async fn test_500_is_generic_server_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let mut client = Client::new(provider(&mock_server.uri())).unwrap();
        let err = client.request("/route", &json!({})).await.unwrap_err();
        assert!(matches!(err, Error::GenericServerError { ref status, .. } if status == "503"));
    }

    #[tokio::test]
    async fn test_429_retries_then_times_out_when_budget_exhausted() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_delay(Duration::from_millis(50)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let notified = Arc::new(AtomicUsize::new(0));
        let options = ClientOptions {
            retry_timeout: Duration::from_millis(10),
            ..Default::default()
        };
        let mut client = Client::with_options(provider(&mock_server.uri()), options).unwrap();
        let counter = notified.clone();
        client.on_rate_limit(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let err = client.request("/route", &json!({"id": 1})).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)), "got {err:?}");
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_429_then_success_is_invisible_to_caller() {
        let mock_server = MockServer::start().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        Mock::given(method("POST"))
            .respond_with(move |_: &wiremock::Request| {
                if calls_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                    ResponseTemplate::new(429)
                } else {
                    ResponseTemplate::new(200).set_body_json(json!({"ok": true}))
                }
            })
            .mount(&mock_server)
            .await;

        let mut client = Client::new(provider(&mock_server.uri())).unwrap();
        let response = client.request("/route", &json!({"id": 1})).await.unwrap();
        assert_eq!(response, json!({"ok": true}));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_slow_response_is_timeout() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;

        let options = ClientOptions {
            request_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let mut client = Client::with_options(provider(&mock_server.uri()), options).unwrap();
        let err = client.request("/route", &json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "Timeout");
        assert_eq!(err.to_string(), "Request timed out.");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_generic_server_error() {
        // Nothing listens on port 9 (discard) on a test machine
        let mut client = Client::new(provider("http://127.0.0.1:9")).unwrap();
        let err = client.request("/route", &json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "1 (Host http://127.0.0.1:9 not valid.)");
    }
}
