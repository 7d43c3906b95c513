use std::fmt;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use futures::future::BoxFuture;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use tokio::time::timeout;
use tower::BoxError;
use tower::Service;
use tracing::debug;
use tracing::warn;
use window_quota::QuotaPolicy;
use window_quota::Store;
use window_quota::Tracker;

use crate::error::LimitError;

#[derive(Clone, Debug)]
struct QuotaServiceMetrics {
    rejected: Counter<u64>,
    store_errors: Counter<u64>,
}

pub struct QuotaService<St, K, S> {
    inner: S,
    store: Arc<St>,
    policy: QuotaPolicy,
    key: Arc<K>,
    fail_open: bool,
    timeout: Option<Duration>,
    instruments: QuotaServiceMetrics,
}

impl<St, K, S> Clone for QuotaService<St, K, S>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            store: Arc::clone(&self.store),
            policy: self.policy,
            key: Arc::clone(&self.key),
            fail_open: self.fail_open,
            timeout: self.timeout,
            instruments: self.instruments.clone(),
        }
    }
}

impl<St, K, S> fmt::Debug for QuotaService<St, K, S>
where
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaService")
            .field("inner", &self.inner)
            .field("policy", &self.policy)
            .field("fail_open", &self.fail_open)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<St, K, S, Req> Service<Req> for QuotaService<St, K, S>
where
    St: Store + 'static,
    K: Fn(&Req) -> Option<String> + Send + Sync + 'static,
    S: Service<Req, Error = BoxError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<S::Response, BoxError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Quota is only consumed once a request is actually dispatched.
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        // Take the service that was driven to readiness, leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let Some(identifier) = (self.key)(&req).filter(|id| !id.is_empty()) else {
            return Box::pin(inner.call(req));
        };

        let tracker = Tracker::new(identifier, self.policy, Arc::clone(&self.store));
        let fail_open = self.fail_open;
        let deadline = self.timeout;
        let instruments = self.instruments.clone();

        Box::pin(async move {
            let tracker = tracker.map_err(|e| LimitError::Store(e.to_string()))?;
            let outcome = match deadline {
                Some(deadline) => timeout(deadline, tracker.query())
                    .await
                    .map_err(|_| LimitError::Timeout)?,
                None => tracker.query().await,
            };

            match outcome {
                Ok(quota) if quota.is_exhausted() => {
                    debug!(identifier = tracker.identifier(), reset = quota.reset, "quota exhausted");
                    instruments.rejected.add(1, &[]);
                    return Err(Box::new(LimitError::Exhausted {
                        limit: quota.total,
                        reset: quota.reset,
                    }) as BoxError);
                }
                Ok(_) => {}
                Err(err) => {
                    instruments.store_errors.add(1, &[]);
                    if !fail_open {
                        return Err(Box::new(LimitError::Store(err.to_string())) as BoxError);
                    }
                    warn!(
                        identifier = tracker.identifier(),
                        error = %err,
                        "quota store failed; letting request through"
                    );
                }
            }

            inner.call(req).await
        })
    }
}

impl<St, K, S> QuotaService<St, K, S> {
    pub fn new(inner: S, store: Arc<St>, policy: QuotaPolicy, key: Arc<K>) -> Self {
        let meter = global::meter("quota_service");
        let instruments = QuotaServiceMetrics {
            rejected: meter.u64_counter("quota_rejected").build(),
            store_errors: meter.u64_counter("quota_store_errors").build(),
        };

        Self {
            inner,
            store,
            policy,
            key,
            fail_open: false,
            timeout: None,
            instruments,
        }
    }

    pub fn with_fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
