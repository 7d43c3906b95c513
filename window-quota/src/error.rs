/// Errors raised by a [`Store`](crate::Store) implementation.
///
/// These are transport or protocol failures. A lost optimistic-concurrency race
/// is never a `StoreError`; it is reported as [`BatchResult::Aborted`](crate::BatchResult).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store connection failed: {0}")]
    Connection(String),

    /// The store rejected a command or returned a reply we cannot interpret.
    #[error("store command failed: {0}")]
    Command(String),

    /// An error reported by the Redis client.
    #[cfg(feature = "redis")]
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

/// Errors produced by [`Tracker`](crate::Tracker).
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    /// A store error, passed through untouched.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The tracker was constructed with an unusable configuration.
    #[error("invalid quota configuration: {0}")]
    InvalidConfig(String),

    /// A window key holds something that is not an integer.
    #[error("malformed value {value:?} stored at {key}")]
    Malformed { key: String, value: String },

    /// Every attempt in the retry budget lost to a concurrent writer.
    #[error("gave up on {identifier} after {attempts} conflicting attempts")]
    Contended { identifier: String, attempts: u32 },
}
