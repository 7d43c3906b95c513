use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use futures::future::Ready;
use futures::future::ready;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::ServiceExt;
use window_quota::BatchResult;
use window_quota::Command;
use window_quota::MemoryStore;
use window_quota::QuotaError;
use window_quota::QuotaPolicy;
use window_quota::Session;
use window_quota::Store;
use window_quota::StoreError;

use super::*;

#[derive(Clone)]
struct MockService {
    pub count: Arc<AtomicUsize>,
}

impl Service<String> for MockService {
    type Response = ();
    type Error = BoxError;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: String) -> Self::Future {
        self.count.fetch_add(1, Ordering::SeqCst);
        if req == "boom" {
            ready(Err("inner failure".into()))
        } else {
            ready(Ok(()))
        }
    }
}

fn mock() -> (MockService, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    (
        MockService {
            count: count.clone(),
        },
        count,
    )
}

fn policy(maximum: u32) -> QuotaPolicy {
    QuotaPolicy::new(NonZeroU32::new(maximum).unwrap(), Duration::from_secs(60))
}

fn by_request(req: &String) -> Option<String> {
    if req == "anonymous" {
        None
    } else {
        Some(req.clone())
    }
}

async fn hit<S>(svc: &mut S, id: &str) -> Result<(), BoxError>
where
    S: Service<String, Response = (), Error = BoxError>,
{
    svc.ready().await?.call(id.to_string()).await
}

fn limit_error(err: &BoxError) -> &LimitError {
    err.downcast_ref::<LimitError>()
        .expect("error should be a LimitError")
}

// A store that never connects
struct DownStore;

struct DownSession;

impl Store for DownStore {
    type Session = DownSession;

    async fn session(&self) -> Result<DownSession, StoreError> {
        Err(StoreError::Connection("connection refused".to_string()))
    }
}

impl Session for DownSession {
    async fn watch(&mut self, _key: &str) -> Result<(), StoreError> {
        unreachable!()
    }

    async fn unwatch(&mut self) -> Result<(), StoreError> {
        unreachable!()
    }

    async fn get_many(&mut self, _keys: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
        unreachable!()
    }

    async fn exec(&mut self, _commands: &[Command]) -> Result<BatchResult, StoreError> {
        unreachable!()
    }
}

// A store that takes a long time to hand out a session
struct SlowStore(MemoryStore);

impl Store for SlowStore {
    type Session = <MemoryStore as Store>::Session;

    async fn session(&self) -> Result<Self::Session, StoreError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        self.0.session().await
    }
}

#[tokio::test]
async fn test_rejects_after_maximum() {
    let store = Arc::new(MemoryStore::new());
    let (inner, count) = mock();
    let mut service = QuotaLayer::new(store, policy(3), by_request)
        .unwrap()
        .layer(inner);

    for _ in 0..3 {
        hit(&mut service, "alice").await.unwrap();
    }

    let err = hit(&mut service, "alice").await.unwrap_err();

    assert!(matches!(
        limit_error(&err),
        LimitError::Exhausted { limit: 3, .. }
    ));
    assert_eq!(count.load(Ordering::SeqCst), 3, "Inner service should only see 3 hits");
}

#[tokio::test]
async fn test_identifiers_are_independent() {
    let store = Arc::new(MemoryStore::new());
    let (inner, count) = mock();
    let mut service = QuotaLayer::new(store, policy(1), by_request)
        .unwrap()
        .layer(inner);

    hit(&mut service, "alice").await.unwrap();
    hit(&mut service, "bob").await.unwrap();
    assert!(hit(&mut service, "alice").await.is_err());
    assert!(hit(&mut service, "bob").await.is_err());

    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unkeyed_requests_bypass_quota() {
    let store = Arc::new(MemoryStore::new());
    let (inner, count) = mock();
    let mut service = QuotaLayer::new(store.clone(), policy(1), by_request)
        .unwrap()
        .layer(inner);

    for _ in 0..5 {
        hit(&mut service, "anonymous").await.unwrap();
    }

    assert_eq!(count.load(Ordering::SeqCst), 5);
    assert_eq!(store.stats().writes, 0);
}

#[tokio::test]
async fn test_shared_state_across_clones() {
    let store = Arc::new(MemoryStore::new());
    let layer = QuotaLayer::new(store, policy(1), by_request).unwrap();

    let (inner1, _) = mock();
    let (inner2, count2) = mock();
    let mut svc1 = layer.layer(inner1);
    let mut svc2 = layer.layer(inner2);

    hit(&mut svc1, "carol").await.unwrap();

    // svc2 is a different instance but draws from the same window
    let err = hit(&mut svc2, "carol").await.unwrap_err();
    assert!(matches!(limit_error(&err), LimitError::Exhausted { .. }));
    assert_eq!(count2.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_inner_errors_pass_through() {
    let store = Arc::new(MemoryStore::new());
    let (inner, _) = mock();
    let mut service = QuotaLayer::new(store, policy(10), by_request)
        .unwrap()
        .layer(inner);

    let err = hit(&mut service, "boom").await.unwrap_err();

    assert!(err.downcast_ref::<LimitError>().is_none());
    assert_eq!(err.to_string(), "inner failure");
}

#[tokio::test]
async fn test_store_failure_rejects_by_default() {
    let (inner, count) = mock();
    let mut service = QuotaLayer::new(Arc::new(DownStore), policy(10), by_request)
        .unwrap()
        .layer(inner);

    let err = hit(&mut service, "dave").await.unwrap_err();

    assert!(matches!(limit_error(&err), LimitError::Store(msg) if msg.contains("connection refused")));
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_store_failure_can_fail_open() {
    let (inner, count) = mock();
    let mut service = QuotaLayer::new(Arc::new(DownStore), policy(10), by_request)
        .unwrap()
        .with_fail_open(true)
        .layer(inner);

    hit(&mut service, "dave").await.expect("Should let the request through");
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_store_times_out() {
    let (inner, count) = mock();
    let store = Arc::new(SlowStore(MemoryStore::new()));
    let mut service = QuotaLayer::new(store, policy(10), by_request)
        .unwrap()
        .with_timeout(Duration::from_millis(50))
        .layer(inner);

    let err = hit(&mut service, "erin").await.unwrap_err();

    assert!(matches!(limit_error(&err), LimitError::Timeout));
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_concurrent_hammer() {
    let capacity = 20;
    let store = Arc::new(MemoryStore::new());
    let (inner, count) = mock();
    let service = QuotaLayer::new(store, policy(capacity).unbounded(), by_request)
        .unwrap()
        .layer(inner);

    let mut handles = vec![];
    for _ in 0..50 {
        let mut svc = service.clone();
        handles.push(tokio::spawn(async move {
            hit(&mut svc, "frank").await
        }));
    }

    let results = futures::future::join_all(handles).await;
    let success = results
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(()))))
        .count();

    assert_eq!(success, capacity as usize);
    assert_eq!(count.load(Ordering::SeqCst), capacity as usize);
}

#[test]
fn test_invalid_policy_is_rejected() {
    let bad = policy(1).with_duration(Duration::ZERO);
    let err = QuotaLayer::new(Arc::new(MemoryStore::new()), bad, by_request).unwrap_err();
    assert!(matches!(err, QuotaError::InvalidConfig(_)));
}

#[cfg(feature = "axum")]
mod responses {
    use axum::http::StatusCode;
    use axum::http::header::RETRY_AFTER;
    use axum::response::IntoResponse;
    use axum::response::Response;
    use window_quota::Clock;
    use window_quota::SystemClock;

    use super::*;

    fn header<'a>(response: &'a Response, name: &str) -> &'a str {
        response
            .headers()
            .get(name)
            .unwrap_or_else(|| panic!("missing header {name}"))
            .to_str()
            .unwrap()
    }

    #[test]
    fn test_exhausted_maps_to_429_with_headers() {
        let reset = SystemClock.now_ms() / 1000 + 120;
        let response = LimitError::Exhausted { limit: 5, reset }.into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = header(&response, RETRY_AFTER.as_str()).parse().unwrap();
        assert!((119..=120).contains(&retry_after), "Retry-After was {retry_after}");
        assert_eq!(header(&response, "x-ratelimit-limit"), "5");
        assert_eq!(header(&response, "x-ratelimit-remaining"), "0");
        assert_eq!(header(&response, "x-ratelimit-reset"), reset.to_string());
    }

    #[test]
    fn test_elapsed_reset_still_asks_for_one_second() {
        let response = LimitError::Exhausted { limit: 5, reset: 1 }.into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header(&response, RETRY_AFTER.as_str()), "1");
    }

    #[test]
    fn test_timeout_maps_to_408() {
        let response = LimitError::Timeout.into_response();

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert!(response.headers().get(RETRY_AFTER).is_none());
    }

    #[test]
    fn test_store_failure_maps_to_503() {
        let response = LimitError::Store("connection refused".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
    }
}
