//! # Tower Quota
//!
//! `tower-quota` puts a [`window_quota::Tracker`] in front of a
//! [Tower](https://github.com/tower-rs/tower) service, so that every instance of
//! a horizontally scaled service draws from the same fixed-window quota.
//!
//! ## The Layer
//! [`QuotaLayer`] derives an identifier from each request and consumes one
//! unit of that identifier's quota before calling the inner service:
//!
//! 1. **Exhaustion**: once the window is spent, requests fail with
//!    `LimitError::Exhausted` carrying the limit and the reset time.
//! 2. **Deadlines**: `with_timeout` bounds the store round trips, failing with
//!    `LimitError::Timeout`.
//! 3. **Store Failures**: rejected with `LimitError::Store`, or let through
//!    with `with_fail_open(true)`.
//!
//! Errors from the inner service are passed through untouched.
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`LimitError`], allowing automatic conversion
//!   to HTTP status codes (429, 408, 503).

mod error;
mod layer;
mod service;

#[cfg(test)]
mod tests;

pub use error::LimitError;
pub use layer::QuotaLayer;
pub use service::QuotaService;
