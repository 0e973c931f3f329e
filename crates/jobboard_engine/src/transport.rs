use std::future::Future;
use std::time::Duration;

use board_logging::{board_debug, board_warn};
use jobboard_core::{ApiError, ApiErrorKind};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde_json::Value;

use crate::config::Config;

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Retry `n` waits `retry_base_delay * n` before going out.
    pub retry_base_delay: Duration,
    /// Retries for GET requests that do not specify their own.
    pub default_get_retries: u32,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            retry_base_delay: Duration::from_secs(1),
            default_get_retries: 2,
        }
    }
}

/// Per-request overrides. `max_retries: None` means the method default:
/// [`TransportSettings::default_get_retries`] for GET and zero for POST.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
}

impl RequestOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn get_json(&self, path: &str, options: RequestOptions) -> Result<Value, ApiError>;

    /// Mutating call. Not retried unless `options.max_retries` is set, so a
    /// lost response never triggers the side effect twice.
    async fn post_json(
        &self,
        path: &str,
        body: &Value,
        options: RequestOptions,
    ) -> Result<Value, ApiError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    config: Config,
    settings: TransportSettings,
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: Config, settings: TransportSettings) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|err| ApiError::new(ApiErrorKind::Network, err.to_string()))?;
        Ok(Self {
            config,
            settings,
            client,
        })
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        timeout: Duration,
    ) -> Result<Value, ApiError> {
        let mut request = self
            .client
            .request(method, url)
            .timeout(timeout)
            .header(ACCEPT, "application/json");
        if let Some(body) = body {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(map_reqwest_error)?;
        classify_response(status, &text)
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn get_json(&self, path: &str, options: RequestOptions) -> Result<Value, ApiError> {
        let url = self.config.http_url(path)?;
        let timeout = options.timeout.unwrap_or(self.settings.request_timeout);
        let max_retries = options
            .max_retries
            .unwrap_or(self.settings.default_get_retries);
        let this = self;
        let url = url.as_str();
        retry_linear(max_retries, self.settings.retry_base_delay, move |_| {
            this.send_once(Method::GET, url, None, timeout)
        })
        .await
    }

    async fn post_json(
        &self,
        path: &str,
        body: &Value,
        options: RequestOptions,
    ) -> Result<Value, ApiError> {
        let url = self.config.http_url(path)?;
        let timeout = options.timeout.unwrap_or(self.settings.request_timeout);
        let max_retries = options.max_retries.unwrap_or(0);
        let this = self;
        let url = url.as_str();
        retry_linear(max_retries, self.settings.retry_base_delay, move |_| {
            this.send_once(Method::POST, url, Some(body), timeout)
        })
        .await
    }
}

/// Runs `attempt` until it succeeds, fails with something other than a
/// timeout or connection failure, or `max_retries` retries are used up.
/// Retry `n` (1-based) is preceded by a `base_delay * n` pause.
pub(crate) async fn retry_linear<T, F, Fut>(
    max_retries: u32,
    base_delay: Duration,
    mut attempt: F,
) -> Result<T, ApiError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut retries = 0;
    loop {
        match attempt(retries).await {
            Err(err)
                if retries < max_retries
                    && matches!(err.kind, ApiErrorKind::Timeout | ApiErrorKind::Network) =>
            {
                retries += 1;
                let delay = base_delay * retries;
                board_warn!(
                    "Request failed ({}); retry {}/{} in {:?}",
                    err,
                    retries,
                    max_retries,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}

/// Maps an HTTP status and body to the JSON payload or a typed error.
pub(crate) fn classify_response(status: u16, body: &str) -> Result<Value, ApiError> {
    match status {
        200..=299 => {
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(body).map_err(|err| {
                ApiError::new(ApiErrorKind::InvalidJson, err.to_string()).with_status(status)
            })
        }
        404 => Err(ApiError::new(ApiErrorKind::NotFound, "resource not found").with_status(status)),
        409 => Err(ApiError::new(
            ApiErrorKind::Conflict,
            extract_reason(body).unwrap_or_else(|| "request conflicts with current state".into()),
        )
        .with_status(status)),
        401 | 403 => Err(ApiError::new(
            ApiErrorKind::Unauthorized,
            extract_reason(body).unwrap_or_else(|| "not authorized".into()),
        )
        .with_status(status)),
        400 => Err(ApiError::new(
            ApiErrorKind::BadRequest,
            extract_reason(body).unwrap_or_else(|| "bad request".into()),
        )
        .with_status(status)),
        500..=599 => {
            board_debug!("Server error {} body: {}", status, body);
            Err(ApiError::new(ApiErrorKind::ServerError, format!("server returned {status}"))
                .with_status(status))
        }
        _ => Err(
            ApiError::new(ApiErrorKind::Unknown, format!("unexpected status {status}"))
                .with_status(status),
        ),
    }
}

/// Pulls a human-readable reason out of an error body.
fn extract_reason(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["reason", "detail", "error", "message"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(ToOwned::to_owned)
}

fn map_reqwest_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        return ApiError::new(ApiErrorKind::Timeout, err.to_string());
    }
    ApiError::new(ApiErrorKind::Network, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[test]
    fn conflict_reason_becomes_message() {
        let err = classify_response(409, r#"{"reason":"already running"}"#).unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::Conflict);
        assert_eq!(err.message, "already running");
        assert_eq!(err.status, Some(409));
        assert!(!err.is_retryable());
    }

    #[test]
    fn server_errors_are_retryable() {
        let err = classify_response(503, "").unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::ServerError);
        assert!(err.is_retryable());
    }

    #[test]
    fn empty_success_body_is_null() {
        assert_eq!(classify_response(204, ""), Ok(Value::Null));
        assert_eq!(
            classify_response(200, "{oops").unwrap_err().kind,
            ApiErrorKind::InvalidJson
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retries_wait_linearly_growing_delays() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();
        let counter = calls.clone();
        let result: Result<(), ApiError> =
            retry_linear(2, Duration::from_millis(100), move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::new(ApiErrorKind::Timeout, "slow"))
                }
            })
            .await;

        assert_eq!(result.unwrap_err().kind, ApiErrorKind::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), ApiError> = retry_linear(5, Duration::from_secs(1), move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::new(ApiErrorKind::ServerError, "boom"))
            }
        })
        .await;

        assert_eq!(result.unwrap_err().kind, ApiErrorKind::ServerError);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
