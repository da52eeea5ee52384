//! Datadog REST client.
//!
//! Adds authentication headers, maps HTTP statuses onto [`ApiError`]s and
//! retries rate-limited and server-side failures with exponential backoff.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::error::{ApiError, ProviderError, Result};

use super::transport::{ApiRequest, ApiResponse, HttpMethod, Transport};

/// Default API URL.
pub const DEFAULT_API_URL: &str = "https://api.datadoghq.com";

/// Fallback wait for a 429 without a usable reset header.
const DEFAULT_RATE_LIMIT_WAIT_SECS: u64 = 1;

/// How failed requests are retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retry 429 and 5xx responses at all.
    pub enabled: bool,
    /// Total time budget across attempts.
    pub timeout: Duration,
    /// First backoff interval in seconds.
    pub backoff_base: f64,
    /// Growth factor between attempts.
    pub backoff_multiplier: f64,
    /// Retries after the first attempt.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_secs(60),
            backoff_base: 2.0,
            backoff_multiplier: 2.0,
            max_retries: 3,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (0-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.backoff_base * self.backoff_multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(self.timeout)
    }
}

/// Client for the Datadog v1 and v2 REST APIs.
#[derive(Debug, Clone)]
pub struct DatadogClient {
    transport: Arc<dyn Transport>,
    base_url: String,
    api_key: Option<String>,
    app_key: Option<String>,
    retry: RetryPolicy,
    user_agent: String,
}

impl DatadogClient {
    /// Creates a client for `base_url` (no trailing slash needed).
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        base_url: &str,
        api_key: Option<String>,
        app_key: Option<String>,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            app_key,
            retry: RetryPolicy::default(),
            user_agent: format!(
                "terraform-provider-datadog/{} (rust)",
                env!("CARGO_PKG_VERSION")
            ),
        }
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The API base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The retry policy in use.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Resolves a path (`/api/v1/monitor`) or absolute URL into a full URL.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{path}", self.base_url)
        }
    }

    fn build_request(&self, method: HttpMethod, path: &str, body: Option<&str>) -> ApiRequest {
        let mut request = ApiRequest::new(method, self.url(path))
            .header("Accept", "application/json")
            .header("User-Agent", self.user_agent.clone());
        if let Some(key) = &self.api_key {
            request = request.header("DD-API-KEY", key.clone());
        }
        if let Some(key) = &self.app_key {
            request = request.header("DD-APPLICATION-KEY", key.clone());
        }
        if let Some(body) = body {
            request = request
                .header("Content-Type", "application/json")
                .body(body);
        }
        request
    }

    /// Sends a request, retrying per policy, and returns the successful response.
    ///
    /// # Errors
    ///
    /// Returns the mapped [`ApiError`] for non-2xx statuses once retries are exhausted.
    pub async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&str>,
    ) -> Result<ApiResponse> {
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            let request = self.build_request(method, path, body);
            debug!("{method} {path}");
            if let Some(body) = body {
                trace!("request body: {body}");
            }

            let result = self
                .transport
                .send(request)
                .await
                .and_then(|response| check_status(response, path));

            let err = match result {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            if !self.retry.enabled || !err.is_retryable() || attempt >= self.retry.max_retries {
                return Err(err);
            }

            let delay = match &err {
                ProviderError::Api(ApiError::RateLimited { retry_after_secs }) => {
                    Duration::from_secs(*retry_after_secs)
                }
                _ => self.retry.backoff(attempt),
            };
            if started.elapsed() + delay > self.retry.timeout {
                warn!("Retry timeout reached for {method} {path}");
                return Err(err);
            }

            attempt += 1;
            debug!(
                "Retry attempt {attempt} of {} after {:?}: {err}",
                self.retry.max_retries, delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// `GET` returning the raw response.
    ///
    /// # Errors
    ///
    /// See [`DatadogClient::request`].
    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.request(HttpMethod::Get, path, None).await
    }

    /// `POST` a JSON body, returning the raw response.
    ///
    /// # Errors
    ///
    /// See [`DatadogClient::request`].
    pub async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<ApiResponse> {
        let body = to_body(body)?;
        self.request(HttpMethod::Post, path, Some(&body)).await
    }

    /// `PUT` a JSON body, returning the raw response.
    ///
    /// # Errors
    ///
    /// See [`DatadogClient::request`].
    pub async fn put<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<ApiResponse> {
        let body = to_body(body)?;
        self.request(HttpMethod::Put, path, Some(&body)).await
    }

    /// `PATCH` a JSON body, returning the raw response.
    ///
    /// # Errors
    ///
    /// See [`DatadogClient::request`].
    pub async fn patch<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<ApiResponse> {
        let body = to_body(body)?;
        self.request(HttpMethod::Patch, path, Some(&body)).await
    }

    /// `DELETE`, discarding the body.
    ///
    /// # Errors
    ///
    /// See [`DatadogClient::request`].
    pub async fn delete(&self, path: &str) -> Result<()> {
        self.request(HttpMethod::Delete, path, None).await.map(|_| ())
    }

    /// `DELETE` with a JSON body.
    ///
    /// # Errors
    ///
    /// See [`DatadogClient::request`].
    pub async fn delete_with_body<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<()> {
        let body = to_body(body)?;
        self.request(HttpMethod::Delete, path, Some(&body))
            .await
            .map(|_| ())
    }

    /// Sends an already serialised JSON body and parses the JSON response.
    ///
    /// # Errors
    ///
    /// See [`DatadogClient::request`]; also fails when the response is not JSON.
    pub async fn send_raw(&self, method: HttpMethod, path: &str, body: &str) -> Result<Value> {
        let response = self.request(method, path, Some(body)).await?;
        parse_body(&response)
    }

    /// `GET` and deserialize the JSON response.
    ///
    /// # Errors
    ///
    /// See [`DatadogClient::request`]; also fails when the response cannot be decoded.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.get(path).await?;
        parse_body(&response)
    }

    /// `POST` a JSON body and deserialize the response.
    ///
    /// # Errors
    ///
    /// See [`DatadogClient::request`].
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        self.send_json(HttpMethod::Post, path, body).await
    }

    /// `PUT` a JSON body and deserialize the response.
    ///
    /// # Errors
    ///
    /// See [`DatadogClient::request`].
    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        self.send_json(HttpMethod::Put, path, body).await
    }

    /// `PATCH` a JSON body and deserialize the response.
    ///
    /// # Errors
    ///
    /// See [`DatadogClient::request`].
    pub async fn patch_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        self.send_json(HttpMethod::Patch, path, body).await
    }

    async fn send_json<B, T>(&self, method: HttpMethod, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let body = to_body(body)?;
        let response = self.request(method, path, Some(&body)).await?;
        parse_body(&response)
    }

    /// Checks the configured keys with `GET /api/v1/validate`.
    ///
    /// # Errors
    ///
    /// Returns an authentication error when the keys are rejected.
    pub async fn validate_keys(&self) -> Result<()> {
        let body: Value = self.get_json("/api/v1/validate").await?;
        if body.get("valid").and_then(Value::as_bool) == Some(false) {
            return Err(ApiError::AuthenticationFailed {
                message: "API key is not valid".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

fn to_body<B: Serialize>(body: &B) -> Result<String> {
    serde_json::to_string(body).map_err(|e| {
        ProviderError::internal(format!("Failed to serialize request body: {e}"))
    })
}

fn parse_body<T: DeserializeOwned>(response: &ApiResponse) -> Result<T> {
    let text = if response.body.trim().is_empty() {
        "null"
    } else {
        response.body.as_str()
    };
    serde_json::from_str(text).map_err(|e| {
        ApiError::invalid_response(format!("Failed to parse response: {e}")).into()
    })
}

/// Maps a raw response onto the error taxonomy.
///
/// # Errors
///
/// Returns an [`ApiError`] for every non-2xx status.
pub fn check_status(response: ApiResponse, path: &str) -> Result<ApiResponse> {
    match response.status {
        200..=299 => Ok(response),
        401 | 403 => Err(ApiError::AuthenticationFailed {
            message: format!("{} {}", response.status, error_messages(&response.body)),
        }
        .into()),
        404 => Err(ApiError::NotFound {
            path: path.to_string(),
        }
        .into()),
        429 => {
            let retry_after_secs = response
                .header("x-ratelimit-reset")
                .or_else(|| response.header("retry-after"))
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_RATE_LIMIT_WAIT_SECS);
            Err(ApiError::RateLimited { retry_after_secs }.into())
        }
        status => Err(ApiError::api_error(status, error_messages(&response.body)).into()),
    }
}

/// Extracts the `errors` array of a Datadog error body, joined with `; `.
///
/// v1 errors are strings; v2 errors are objects with `detail` or `title`.
#[must_use]
pub fn error_messages(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    let Some(errors) = value.get("errors").and_then(Value::as_array) else {
        return body.trim().to_string();
    };
    errors
        .iter()
        .map(|e| match e {
            Value::String(s) => s.clone(),
            Value::Object(o) => o
                .get("detail")
                .or_else(|| o.get("title"))
                .and_then(Value::as_str)
                .map_or_else(|| e.to_string(), str::to_string),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::MockTransport;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            enabled: true,
            timeout: Duration::from_secs(5),
            backoff_base: 0.001,
            backoff_multiplier: 2.0,
            max_retries: 3,
        }
    }

    fn client_for(server: &MockServer) -> DatadogClient {
        let transport = Arc::new(crate::client::HttpTransport::new().unwrap());
        DatadogClient::new(
            transport,
            &server.uri(),
            Some("api".to_string()),
            Some("app".to_string()),
        )
        .with_retry(fast_retry())
    }

    #[tokio::test]
    async fn test_sends_auth_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/validate"))
            .and(header("DD-API-KEY", "api"))
            .and(header("DD-APPLICATION-KEY", "app"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"valid": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(client.validate_keys().await.is_ok());
    }

    #[tokio::test]
    async fn test_put_sends_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v1/monitor/7"))
            .and(header("Content-Type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"id":7}"#))
            .expect(1)
            .mount(&server)
            .await;

        let response = client_for(&server)
            .put("/api/v1/monitor/7", &json!({"name": "cpu"}))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, r#"{"id":7}"#);
    }

    #[tokio::test]
    async fn test_maps_not_found_and_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/monitor/1"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"errors": ["Monitor not found"]})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/monitor"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"errors": ["The value provided for parameter 'query' is invalid"]})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.get("/api/v1/monitor/1").await.unwrap_err();
        assert!(err.is_not_found());

        let err = client
            .post_json::<_, Value>("/api/v1/monitor", &json!({"name": "x"}))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert!(err.to_string().contains("parameter 'query' is invalid"));
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/team/abc"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/team/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"id": "abc"}})))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let body: Value = client.get_json("/api/v2/team/abc").await.unwrap();
        assert_eq!(body["data"]["id"], "abc");
    }

    #[tokio::test]
    async fn test_no_retry_when_disabled() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_| Ok(ApiResponse::new(503, "")));

        let client = DatadogClient::new(Arc::new(transport), DEFAULT_API_URL, None, None)
            .with_retry(RetryPolicy::disabled());
        let err = client.get("/api/v1/dashboard/x").await.unwrap_err();
        assert_eq!(err.status(), Some(503));
    }

    #[tokio::test]
    async fn test_rate_limit_respects_max_retries() {
        let mut transport = MockTransport::new();
        transport.expect_send().times(2).returning(|_| {
            let mut response = ApiResponse::new(429, "");
            response
                .headers
                .insert("x-ratelimit-reset".to_string(), "0".to_string());
            Ok(response)
        });

        let policy = RetryPolicy {
            max_retries: 1,
            ..fast_retry()
        };
        let client = DatadogClient::new(Arc::new(transport), DEFAULT_API_URL, None, None)
            .with_retry(policy);
        let err = client.get("/api/v1/monitor").await.unwrap_err();
        assert_eq!(err.status(), Some(429));
    }

    #[test]
    fn test_error_messages_v2_objects() {
        let body = r#"{"errors":[{"title":"Bad Request","detail":"handle already taken"}]}"#;
        assert_eq!(error_messages(body), "handle already taken");
        assert_eq!(error_messages("plain text"), "plain text");
    }

    #[test]
    fn test_backoff_grows() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(8));
    }

    #[test]
    fn test_absolute_urls_pass_through() {
        let client = DatadogClient::new(
            Arc::new(MockTransport::new()),
            "https://api.datadoghq.eu/",
            None,
            None,
        );
        assert_eq!(client.url("/api/v1/monitor"), "https://api.datadoghq.eu/api/v1/monitor");
        assert_eq!(client.url("https://ip-ranges.datadoghq.eu/"), "https://ip-ranges.datadoghq.eu/");
    }
}
