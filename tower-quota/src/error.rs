/// Errors produced by the quota middleware.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LimitError {
    /// The caller's window has no quota left.
    ///
    /// When the `axum` feature is enabled, this converts to `429 Too Many Requests`
    /// with `Retry-After` and `X-RateLimit-*` headers.
    #[error("Quota of {limit} exhausted; window resets at {reset}")]
    Exhausted {
        /// The configured maximum for the window.
        limit: u64,
        /// Epoch seconds at which the window resets.
        reset: u64,
    },

    /// The quota store did not answer within the configured deadline.
    ///
    /// When the `axum` feature is enabled, this converts to `408 Request Timeout`.
    #[error("Request timed out waiting for the quota store")]
    Timeout,

    /// The quota store failed and the layer is not failing open.
    ///
    /// The string contains the `Display` representation of the store error.
    /// When the `axum` feature is enabled, this converts to `503 Service Unavailable`.
    #[error("Quota store unavailable: {0}")]
    Store(String),
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for LimitError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::HeaderName;
        use axum::http::HeaderValue;
        use axum::http::StatusCode;
        use window_quota::Clock;
        use window_quota::SystemClock;

        let (status, headers) = match self {
            Self::Exhausted { limit, reset } => {
                let now_ms = SystemClock.now_ms();
                let retry_after = reset.saturating_mul(1000).saturating_sub(now_ms).div_ceil(1000).max(1);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    vec![
                        (axum::http::header::RETRY_AFTER, HeaderValue::from(retry_after)),
                        (HeaderName::from_static("x-ratelimit-limit"), HeaderValue::from(limit)),
                        (HeaderName::from_static("x-ratelimit-remaining"), HeaderValue::from(0u64)),
                        (HeaderName::from_static("x-ratelimit-reset"), HeaderValue::from(reset)),
                    ],
                )
            }
            Self::Timeout => (StatusCode::REQUEST_TIMEOUT, vec![]),
            Self::Store(_) => (StatusCode::SERVICE_UNAVAILABLE, vec![]),
        };

        let mut response = (status, self.to_string()).into_response();
        for (name, value) in headers {
            response.headers_mut().insert(name, value);
        }
        response
    }
}
