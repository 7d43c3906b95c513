use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tower::Layer;
use window_quota::QuotaError;
use window_quota::QuotaPolicy;
use window_quota::Store;

use crate::service::QuotaService;

/// Applies a shared fixed-window quota to requests.
///
/// `key` maps each request to the identifier whose quota it consumes;
/// requests it maps to `None` pass through untouched.
pub struct QuotaLayer<St, K> {
    store: Arc<St>,
    policy: QuotaPolicy,
    key: Arc<K>,
    fail_open: bool,
    timeout: Option<Duration>,
}

impl<St, K> Clone for QuotaLayer<St, K> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            policy: self.policy,
            key: Arc::clone(&self.key),
            fail_open: self.fail_open,
            timeout: self.timeout,
        }
    }
}

impl<St, K> fmt::Debug for QuotaLayer<St, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaLayer")
            .field("policy", &self.policy)
            .field("fail_open", &self.fail_open)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<St, K> QuotaLayer<St, K>
where
    St: Store,
{
    /// Create a QuotaLayer
    ///
    /// # Errors
    ///
    /// Returns [`QuotaError::InvalidConfig`] if `policy` does not validate.
    pub fn new(store: Arc<St>, policy: QuotaPolicy, key: K) -> Result<Self, QuotaError> {
        policy.validate()?;
        Ok(QuotaLayer {
            store,
            policy,
            key: Arc::new(key),
            fail_open: false,
            timeout: None,
        })
    }

    /// Set whether requests should be let through when the store fails.
    ///
    /// If `false` (the default), a store failure rejects the request with
    /// `LimitError::Store`.
    pub fn with_fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    /// Set a deadline for the whole quota query, retries included.
    ///
    /// If the store has not settled the query in time, the service
    /// will return `LimitError::Timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<St, K, S> Layer<S> for QuotaLayer<St, K> {
    type Service = QuotaService<St, K, S>;

    fn layer(&self, service: S) -> Self::Service {
        let mut svc = QuotaService::new(
            service,
            Arc::clone(&self.store),
            self.policy,
            Arc::clone(&self.key),
        )
        .with_fail_open(self.fail_open);
        if let Some(timeout) = self.timeout {
            svc = svc.with_timeout(timeout);
        }
        svc
    }
}
