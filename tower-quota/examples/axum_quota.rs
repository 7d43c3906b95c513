use axum::{
    Router, error_handling::HandleErrorLayer, extract::Request, http::StatusCode,
    response::IntoResponse, routing::get,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tower::BoxError;
use tower::ServiceBuilder;
use tower_quota::{LimitError, QuotaLayer};
use window_quota::{MemoryStore, QuotaPolicy};

#[tokio::main]
async fn main() {
    // 1. Setup Store and Policy (5 requests per client per minute)
    let store = Arc::new(MemoryStore::new());
    let policy = QuotaPolicy::new(
        NonZeroU32::new(5).expect("non-zero"),
        Duration::from_secs(60),
    );

    // 2. Setup the Quota Layer, keyed on the caller's API key
    let quota_layer = QuotaLayer::new(store, policy, |req: &Request| {
        req.headers()
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    })
    .expect("valid quota policy")
    .with_timeout(Duration::from_millis(250));

    // 3. Build the Router
    let app = Router::new()
        .route("/", get(|| async { "Hello, Quota!" }))
        .layer(
            ServiceBuilder::new()
                // 1. The outermost layer: catches BoxError and returns Response
                .layer(HandleErrorLayer::new(handle_quota_error))
                // 2. The middle layer: introduces BoxError
                .layer(quota_layer)
                // 3. Converts the Route's Infallible to BoxError
                .map_err(BoxError::from),
        );

    // 4. Serve
    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000")
        .await
        .unwrap();
    println!("Listening on http://127.0.0.1:3000 (try: curl -i -H 'x-api-key: demo' localhost:3000)");

    axum::serve(listener, app).await.unwrap();
}

async fn handle_quota_error(err: BoxError) -> impl IntoResponse {
    if let Some(limit_err) = err.downcast_ref::<LimitError>() {
        limit_err.clone().into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Service Error").into_response()
    }
}
