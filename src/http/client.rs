//! Rate-limit aware REST client.
//!
//! Every request holds the lock of its route key for the whole attempt
//! sequence, so at most one request per key is in flight. A global `429`
//! pauses all keys together. Server errors are retried within the policy
//! budget; rate limits are retried until they clear.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::http::ratelimit::{GlobalCooldown, RateLimitInfo, RouteKey, RouteLocks};
use crate::retry::RetryPolicy;

const ERROR_BODY_SNIPPET_LEN: usize = 220;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HttpDefaults;

impl HttpDefaults {
    pub const BASE_URL: &'static str = "https://discord.com/api/v10";
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
    /// Wait applied to a `429` that carries no usable `retry-after`.
    pub const RETRY_AFTER: Duration = Duration::from_secs(1);
    pub const USER_AGENT: &'static str =
        concat!("DiscordBot (", env!("CARGO_PKG_NAME"), ", ", env!("CARGO_PKG_VERSION"), ")");
}

#[derive(Clone, Debug)]
pub struct HttpClientOptions {
    pub connect_timeout: Duration,
    pub attempt_timeout: Duration,
    /// Budget and backoff for `5xx` and transport failures.
    pub retry_policy: RetryPolicy,
    pub default_retry_after: Duration,
    pub user_agent: String,
}

impl Default for HttpClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: HttpDefaults::CONNECT_TIMEOUT,
            attempt_timeout: HttpDefaults::ATTEMPT_TIMEOUT,
            retry_policy: RetryPolicy::server_errors(),
            default_retry_after: HttpDefaults::RETRY_AFTER,
            user_agent: HttpDefaults::USER_AGENT.to_string(),
        }
    }
}

/// File uploaded alongside a request body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub data: Vec<u8>,
    pub content_type: Option<String>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("http client not started; call start() first")]
    NotStarted,

    #[error("invalid authorization token header")]
    InvalidToken,

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("rate limited (global={global}), retry after {retry_after:?}")]
    RateLimited { retry_after: Duration, global: bool },

    #[error("http status {status}: {message}")]
    RequestFailed {
        status: StatusCode,
        message: String,
        code: Option<u64>,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HttpError {
    /// Whether the error counts against the retry budget and may succeed on
    /// another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_timeout() || err.is_connect(),
            Self::RequestFailed { status, .. } => status.is_server_error(),
            _ => false,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::PermissionDenied { .. } => Some(StatusCode::FORBIDDEN),
            Self::NotFound { .. } => Some(StatusCode::NOT_FOUND),
            Self::RateLimited { .. } => Some(StatusCode::TOO_MANY_REQUESTS),
            Self::RequestFailed { status, .. } => Some(*status),
            Self::Transport(err) => err.status(),
            _ => None,
        }
    }
}

struct HttpInner {
    token: SecretString,
    base_url: String,
    options: HttpClientOptions,
    http: RwLock<Option<Client>>,
    routes: RouteLocks,
    global: GlobalCooldown,
}

/// Shared REST client. Clones share the connection pool and all locks.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<HttpInner>,
}

impl HttpClient {
    pub fn new(token: SecretString) -> Self {
        Self::with_options(token, HttpClientOptions::default())
    }

    pub fn with_options(token: SecretString, options: HttpClientOptions) -> Self {
        Self::build(token, HttpDefaults::BASE_URL.to_string(), options)
    }

    /// Returns a not-yet-started client targeting another API root.
    pub fn with_base_url(self, base_url: impl Into<String>) -> Self {
        Self::build(
            self.inner.token.clone(),
            base_url.into().trim_end_matches('/').to_string(),
            self.inner.options.clone(),
        )
    }

    fn build(token: SecretString, base_url: String, options: HttpClientOptions) -> Self {
        Self {
            inner: Arc::new(HttpInner {
                token,
                base_url,
                options,
                http: RwLock::new(None),
                routes: RouteLocks::new(),
                global: GlobalCooldown::new(),
            }),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Builds the connection pool with the credential attached. Idempotent.
    pub fn start(&self) -> Result<(), HttpError> {
        let mut http = self
            .inner
            .http
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if http.is_some() {
            return Ok(());
        }

        let mut authorization =
            HeaderValue::from_str(&format!("Bot {}", self.inner.token.expose_secret()))
                .map_err(|_| HttpError::InvalidToken)?;
        authorization.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, authorization);
        if let Ok(user_agent) = HeaderValue::from_str(&self.inner.options.user_agent) {
            headers.insert(USER_AGENT, user_agent);
        }

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(self.inner.options.connect_timeout)
            .build()?;
        *http = Some(client);
        info!(event = "http_client_started", base_url = %self.inner.base_url);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.inner
            .http
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Drops the connection pool. The client can be started again.
    pub fn close(&self) {
        let previous = self
            .inner
            .http
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            info!(event = "http_client_closed");
        }
    }

    /// Number of distinct route keys seen so far.
    pub fn route_count(&self) -> usize {
        self.inner.routes.len()
    }

    /// Sends a request and returns the decoded response body.
    ///
    /// `route` is the path below the API root, e.g. `/channels/1/messages`.
    /// Attachments switch the body to multipart with the JSON carried in a
    /// `payload_json` part.
    pub async fn request(
        &self,
        method: Method,
        route: &str,
        body: Option<&Value>,
        attachments: &[Attachment],
    ) -> Result<Value, HttpError> {
        let http = self.pool()?;
        let key = RouteKey::new(&method, route);
        let url = self.endpoint(route);
        let policy = &self.inner.options.retry_policy;
        let max_attempts = policy.max_attempts.max(1);

        let _route = self.inner.routes.acquire(&key).await;
        let mut failed_attempts = 0;

        loop {
            self.inner.global.wait_clear().await;

            let error = match self
                .send_attempt(&http, method.clone(), &url, body, attachments)
                .await
            {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            match error {
                HttpError::RateLimited {
                    retry_after,
                    global,
                } => {
                    warn!(
                        event = "http_rate_limited",
                        route = %key,
                        global,
                        retry_after_ms = retry_after.as_millis() as u64
                    );
                    if global {
                        self.inner.global.hold_for(retry_after).await;
                    } else {
                        tokio::time::sleep(retry_after).await;
                    }
                }
                error if error.is_retryable() => {
                    failed_attempts += 1;
                    if failed_attempts >= max_attempts {
                        warn!(
                            event = "http_retry_budget_exhausted",
                            route = %key,
                            attempts = failed_attempts,
                            error = %error
                        );
                        return Err(error);
                    }
                    let delay = policy.delay_for_attempt(failed_attempts);
                    debug!(
                        event = "http_retry_scheduled",
                        route = %key,
                        attempt = failed_attempts,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error
                    );
                    tokio::time::sleep(delay).await;
                }
                error => return Err(error),
            }
        }
    }

    fn pool(&self) -> Result<Client, HttpError> {
        self.inner
            .http
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(HttpError::NotStarted)
    }

    fn endpoint(&self, route: &str) -> String {
        format!("{}/{}", self.inner.base_url, route.trim_start_matches('/'))
    }

    async fn send_attempt(
        &self,
        http: &Client,
        method: Method,
        url: &str,
        body: Option<&Value>,
        attachments: &[Attachment],
    ) -> Result<Value, HttpError> {
        let mut builder = http
            .request(method, url)
            .timeout(self.inner.options.attempt_timeout);

        if attachments.is_empty() {
            if let Some(body) = body {
                builder = builder.json(body);
            }
        } else {
            builder = builder.multipart(multipart_form(body, attachments)?);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await?;

        classify_response(
            status,
            &headers,
            decode_body(&text),
            self.inner.options.default_retry_after,
        )
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.inner.base_url)
            .field("started", &self.is_started())
            .field("routes", &self.route_count())
            .finish_non_exhaustive()
    }
}

fn multipart_form(body: Option<&Value>, attachments: &[Attachment]) -> Result<Form, HttpError> {
    let mut form = Form::new();
    if let Some(body) = body {
        form = form.text("payload_json", serde_json::to_string(body)?);
    }
    for (index, attachment) in attachments.iter().enumerate() {
        let mut part = Part::bytes(attachment.data.clone()).file_name(attachment.filename.clone());
        if let Some(content_type) = attachment.content_type.as_deref() {
            part = part.mime_str(content_type)?;
        }
        form = form.part(format!("files[{index}]"), part);
    }
    Ok(form)
}

/// Decodes a response body, wrapping non-JSON text as `{"text": ...}`.
fn decode_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| json!({ "text": text }))
}

fn error_message(body: &Value, fallback: &str) -> String {
    if let Some(message) = body.get("message").and_then(Value::as_str) {
        return message.to_string();
    }
    match body.get("text").and_then(Value::as_str) {
        Some(text) if !text.is_empty() => text.chars().take(ERROR_BODY_SNIPPET_LEN).collect(),
        _ => fallback.to_string(),
    }
}

fn classify_response(
    status: StatusCode,
    headers: &HeaderMap,
    body: Value,
    default_retry_after: Duration,
) -> Result<Value, HttpError> {
    if status.is_success() {
        return Ok(body);
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let info = RateLimitInfo::from_response(headers, &body, default_retry_after);
            Err(HttpError::RateLimited {
                retry_after: info.retry_after,
                global: info.global,
            })
        }
        StatusCode::FORBIDDEN => Err(HttpError::PermissionDenied {
            message: error_message(&body, "Forbidden"),
        }),
        StatusCode::NOT_FOUND => Err(HttpError::NotFound {
            message: error_message(&body, "Not found"),
        }),
        _ => Err(HttpError::RequestFailed {
            status,
            message: error_message(&body, "HTTP error"),
            code: body.get("code").and_then(Value::as_u64),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::header::{HeaderMap, HeaderValue};
    use reqwest::{Method, StatusCode};
    use secrecy::SecretString;
    use serde_json::{json, Value};

    use super::{
        classify_response, decode_body, HttpClient, HttpDefaults, HttpError,
    };

    const DEFAULT: Duration = Duration::from_secs(1);

    fn client() -> HttpClient {
        HttpClient::new(SecretString::new("test-token".to_string()))
    }

    #[test]
    fn success_returns_body() {
        let body = json!({"id": "1"});
        let value = classify_response(StatusCode::OK, &HeaderMap::new(), body.clone(), DEFAULT)
            .expect("2xx is success");
        assert_eq!(value, body);
    }

    #[test]
    fn forbidden_and_not_found_are_typed_and_final() {
        let forbidden = classify_response(
            StatusCode::FORBIDDEN,
            &HeaderMap::new(),
            json!({"message": "Missing Access", "code": 50001}),
            DEFAULT,
        )
        .expect_err("403");
        match &forbidden {
            HttpError::PermissionDenied { message } => assert_eq!(message, "Missing Access"),
            other => panic!("unexpected error variant: {other:?}"),
        }
        assert!(!forbidden.is_retryable());

        let missing =
            classify_response(StatusCode::NOT_FOUND, &HeaderMap::new(), Value::Null, DEFAULT)
                .expect_err("404");
        match &missing {
            HttpError::NotFound { message } => assert_eq!(message, "Not found"),
            other => panic!("unexpected error variant: {other:?}"),
        }
        assert!(!missing.is_retryable());
    }

    #[test]
    fn rate_limit_reads_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("0.2"));
        headers.insert("x-ratelimit-global", HeaderValue::from_static("true"));
        let err = classify_response(StatusCode::TOO_MANY_REQUESTS, &headers, Value::Null, DEFAULT)
            .expect_err("429");
        match err {
            HttpError::RateLimited {
                retry_after,
                global,
            } => {
                assert_eq!(retry_after, Duration::from_millis(200));
                assert!(global);
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn server_errors_are_retryable_other_statuses_are_not() {
        let server = classify_response(
            StatusCode::BAD_GATEWAY,
            &HeaderMap::new(),
            decode_body("<html>bad gateway</html>"),
            DEFAULT,
        )
        .expect_err("502");
        assert!(server.is_retryable());
        assert_eq!(server.status(), Some(StatusCode::BAD_GATEWAY));

        let bad_request = classify_response(
            StatusCode::BAD_REQUEST,
            &HeaderMap::new(),
            json!({"message": "Invalid Form Body", "code": 50035}),
            DEFAULT,
        )
        .expect_err("400");
        assert!(!bad_request.is_retryable());
        match bad_request {
            HttpError::RequestFailed {
                status,
                message,
                code,
            } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(message, "Invalid Form Body");
                assert_eq!(code, Some(50035));
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn non_json_body_is_wrapped_and_empty_body_is_null() {
        assert_eq!(decode_body("plain"), json!({"text": "plain"}));
        assert_eq!(decode_body(""), Value::Null);
        assert_eq!(decode_body("[1,2]"), json!([1, 2]));
    }

    #[test]
    fn endpoint_joins_base_and_route() {
        let client = client().with_base_url("http://127.0.0.1:8080/api/");
        assert_eq!(client.base_url(), "http://127.0.0.1:8080/api");
        assert_eq!(
            client.endpoint("/channels/1"),
            "http://127.0.0.1:8080/api/channels/1"
        );
        assert_eq!(client.endpoint("users/@me"), "http://127.0.0.1:8080/api/users/@me");
    }

    #[test]
    fn defaults_target_production_api() {
        assert_eq!(client().base_url(), HttpDefaults::BASE_URL);
    }

    #[tokio::test]
    async fn request_before_start_is_configuration_error() {
        let err = client()
            .request(Method::GET, "/users/@me", None, &[])
            .await
            .expect_err("not started");
        assert!(matches!(err, HttpError::NotStarted));
    }

    #[test]
    fn start_is_idempotent_and_close_resets() {
        let client = client();
        client.start().expect("start");
        client.start().expect("start again");
        assert!(client.is_started());
        client.close();
        client.close();
        assert!(!client.is_started());
    }

    #[test]
    fn token_with_newline_is_rejected() {
        let client = HttpClient::new(SecretString::new("bad\ntoken".to_string()));
        assert!(matches!(client.start(), Err(HttpError::InvalidToken)));
    }
}
