//! # window-quota
//!
//! `window-quota` tracks fixed-window quotas that are shared by many
//! independent processes through one key-value store.
//!
//! ## Core Philosophy
//!
//! There is no coordinator and no lock. Every [`Tracker`] reads the window,
//! computes the next state locally, and commits it with the store's
//! optimistic-concurrency primitives (WATCH plus a conditional, transactional
//! batch). Losing a race is not an error: the tracker discards what it
//! computed and starts again from a fresh read.
//!
//! ## Key Concepts
//!
//! * **Windows**: each identifier owns two keys, `limit:<id>:count` and
//!   `limit:<id>:reset`, created together and expiring together. A window is
//!   created lazily by the first query after the previous one expired.
//! * **Phases**: a query loops through Probe → Create | Decrement, going back
//!   to Probe whenever a concurrent writer wins.
//! * **Store Trait**: any backend with watch/conditional-set semantics. An
//!   in-memory [`MemoryStore`] ships with the crate; Redis is behind the
//!   `redis` feature.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use window_quota::MemoryStore;
//! use window_quota::QuotaPolicy;
//! use window_quota::Tracker;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = Arc::new(MemoryStore::new());
//! let tracker = Tracker::new("user:42", QuotaPolicy::default(), store).unwrap();
//!
//! let quota = tracker.query().await.unwrap();
//! if !quota.is_exhausted() {
//!     // Request allowed
//! }
//! # });
//! ```

mod clock;
mod config;
mod error;
mod memory;
#[cfg(feature = "redis")]
mod redis_store;
mod store;
mod tracker;

pub use clock::Clock;
pub use clock::ManualClock;
pub use clock::SystemClock;
pub use config::DEFAULT_DURATION;
pub use config::DEFAULT_MAX_ATTEMPTS;
pub use config::DEFAULT_MAXIMUM;
pub use config::MAX_DURATION;
pub use config::QuotaPolicy;
pub use error::QuotaError;
pub use error::StoreError;
pub use memory::MemorySession;
pub use memory::MemoryStats;
pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisSession;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use store::BatchResult;
pub use store::Command;
pub use store::Reply;
pub use store::Session;
pub use store::Store;
pub use tracker::KEY_PREFIX;
pub use tracker::Quota;
pub use tracker::Tracker;
