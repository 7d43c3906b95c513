use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::Clock;
use crate::Command;
use crate::QuotaError;
use crate::QuotaPolicy;
use crate::Session;
use crate::Store;
use crate::StoreError;
use crate::SystemClock;

/// Namespace for every key a tracker touches.
pub const KEY_PREFIX: &str = "limit";

/// The state of a window after a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// The querying tracker's configured maximum.
    pub total: u64,
    /// Units left in the window, including the ones just consumed.
    /// Never negative; `0` means the window is spent.
    pub remaining: u64,
    /// Epoch seconds at which the window ends.
    pub reset: u64,
}

impl Quota {
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Time from `now_ms` until the window resets.
    pub fn reset_in(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.reset.saturating_mul(1000).saturating_sub(now_ms))
    }
}

/// Where a query is in its Probe → Create | Decrement loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Probe,
    Create,
    Decrement { count: i64, reset: i64 },
}

/// What a Create batch managed to write.
enum Created {
    Window(Quota),
    /// The count key was written but a reset key already existed.
    CountOnly,
    /// A concurrent writer created the window first.
    Nothing,
}

/// A fixed-window quota shared through a [`Store`].
///
/// Any number of trackers, in any number of processes, may query the same
/// identifier. They never coordinate directly: each query watches the window's
/// counter, computes the next state locally, and commits it in a watched
/// batch. A batch that loses to a concurrent writer is discarded and the query
/// starts over from a fresh read.
///
/// A reset key left behind without its count is adopted: the query writes the
/// count, then aligns it to the surviving reset. Each query is charged once.
pub struct Tracker<S> {
    identifier: String,
    count_key: String,
    reset_key: String,
    policy: QuotaPolicy,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S> Clone for Tracker<S> {
    fn clone(&self) -> Self {
        Self {
            identifier: self.identifier.clone(),
            count_key: self.count_key.clone(),
            reset_key: self.reset_key.clone(),
            policy: self.policy,
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S> fmt::Debug for Tracker<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("identifier", &self.identifier)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<S> fmt::Display for Tracker<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Tracker id='{}', duration='{}', max='{}'>",
            self.identifier,
            self.policy.duration.as_millis(),
            self.policy.maximum
        )
    }
}

impl<S: Store> Tracker<S> {
    /// Creates a tracker for `identifier` on the wall clock.
    ///
    /// # Errors
    ///
    /// Returns [`QuotaError::InvalidConfig`] for an empty identifier or an
    /// invalid policy. Nothing is read from or written to the store.
    pub fn new(
        identifier: impl Into<String>,
        policy: QuotaPolicy,
        store: Arc<S>,
    ) -> Result<Self, QuotaError> {
        Self::with_clock(identifier, policy, store, Arc::new(SystemClock))
    }

    pub fn with_clock(
        identifier: impl Into<String>,
        policy: QuotaPolicy,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, QuotaError> {
        let identifier = identifier.into();
        if identifier.is_empty() {
            return Err(QuotaError::InvalidConfig(
                "identifier must not be empty".to_string(),
            ));
        }
        policy.validate()?;

        Ok(Self {
            count_key: format!("{KEY_PREFIX}:{identifier}:count"),
            reset_key: format!("{KEY_PREFIX}:{identifier}:reset"),
            identifier,
            policy,
            store,
            clock,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// Consumes one unit. See [`query_by`](Self::query_by).
    pub async fn query(&self) -> Result<Quota, QuotaError> {
        self.query_by(NonZeroU32::MIN).await
    }

    /// Consumes `decr_by` units from the current window, creating the window
    /// if none exists, and returns the state after consumption.
    ///
    /// Once a window is spent, further queries return `remaining == 0`
    /// without writing to the store.
    ///
    /// # Errors
    ///
    /// Store errors are returned as [`QuotaError::Store`] and never retried.
    /// [`QuotaError::Contended`] is returned when every attempt allowed by
    /// [`QuotaPolicy::max_attempts`] lost a race to another writer.
    pub async fn query_by(&self, decr_by: NonZeroU32) -> Result<Quota, QuotaError> {
        let mut session = self.store.session().await?;
        let mut attempt = 0u32;
        let mut phase = Phase::Probe;
        // Units still to take from the counter. Drops to zero once a create
        // has written our consumption into the count key.
        let mut charge = i64::from(decr_by.get());

        loop {
            trace!(identifier = %self.identifier, attempt, ?phase, "quota phase");
            phase = match phase {
                Phase::Probe => {
                    if let Some(max) = self.policy.max_attempts
                        && attempt >= max
                    {
                        warn!(
                            identifier = %self.identifier,
                            attempts = attempt,
                            "quota retry budget exhausted"
                        );
                        return Err(QuotaError::Contended {
                            identifier: self.identifier.clone(),
                            attempts: attempt,
                        });
                    }
                    attempt += 1;
                    self.probe(&mut session).await?
                }
                Phase::Create => {
                    charge = i64::from(decr_by.get());
                    match self.create(&mut session, decr_by).await? {
                        Created::Window(quota) => return Ok(quota),
                        Created::CountOnly => {
                            debug!(identifier = %self.identifier, attempt, "adopting existing reset key");
                            charge = 0;
                            Phase::Probe
                        }
                        Created::Nothing => {
                            debug!(identifier = %self.identifier, attempt, "lost window creation race");
                            Phase::Probe
                        }
                    }
                }
                Phase::Decrement { count, reset } => {
                    match self.decrement(&mut session, count, reset, charge).await? {
                        Some(quota) => return Ok(quota),
                        None => {
                            debug!(identifier = %self.identifier, attempt, count, "lost decrement race");
                            Phase::Probe
                        }
                    }
                }
            };
        }
    }

    async fn probe(&self, session: &mut S::Session) -> Result<Phase, QuotaError> {
        session.watch(&self.count_key).await?;
        let mut values = session
            .get_many(&[self.count_key.as_str(), self.reset_key.as_str()])
            .await?
            .into_iter();

        // A window exists only while both keys do.
        match (values.next().flatten(), values.next().flatten()) {
            (Some(count), Some(reset)) => Ok(Phase::Decrement {
                count: parse(&self.count_key, count)?,
                reset: parse(&self.reset_key, reset)?,
            }),
            _ => Ok(Phase::Create),
        }
    }

    async fn create(
        &self,
        session: &mut S::Session,
        decr_by: NonZeroU32,
    ) -> Result<Created, QuotaError> {
        let now = self.clock.now_ms();
        let ttl = self.policy.duration;
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let reset = now.saturating_add(ttl_ms) / 1000;
        let maximum = i64::from(self.policy.maximum.get());
        // The creator's own consumption is folded into the initial count.
        let remaining = (maximum - (i64::from(decr_by.get()) - 1)).max(0);

        let result = session
            .exec(&[
                Command::SetIfAbsent {
                    key: self.count_key.clone(),
                    value: remaining,
                    ttl,
                },
                Command::SetIfAbsent {
                    key: self.reset_key.clone(),
                    value: reset as i64,
                    ttl,
                },
            ])
            .await?;

        if let Some(msg) = result.first_error() {
            return Err(StoreError::Command(msg.to_string()).into());
        }
        if !result.took_effect() {
            return Ok(Created::Nothing);
        }
        // A surviving reset key means the window is older than our count;
        // go round again and realign against it without charging twice.
        if !result.all_ok() {
            return Ok(Created::CountOnly);
        }

        Ok(Created::Window(Quota {
            total: maximum as u64,
            remaining: remaining as u64,
            reset,
        }))
    }

    /// `None` means the counter changed or vanished since the probe.
    async fn decrement(
        &self,
        session: &mut S::Session,
        count: i64,
        reset: i64,
        charge: i64,
    ) -> Result<Option<Quota>, QuotaError> {
        let total = u64::from(self.policy.maximum.get());
        let reset_secs = reset.max(0) as u64;

        if count <= 0 {
            session.unwatch().await?;
            return Ok(Some(Quota {
                total,
                remaining: 0,
                reset: reset_secs,
            }));
        }

        let now = self.clock.now_ms() as i64;
        // Realign both keys to the nominal window end. A window that outlived
        // its end by a fraction of a second gets the shortest legal expiry.
        let ttl_ms = reset.saturating_mul(1000).saturating_sub(now).max(1);
        let ttl = Duration::from_millis(ttl_ms as u64);
        let next = count - charge;

        let result = session
            .exec(&[
                Command::SetIfPresent {
                    key: self.count_key.clone(),
                    value: next,
                    ttl,
                },
                Command::Expire {
                    key: self.reset_key.clone(),
                    ttl,
                },
            ])
            .await?;

        if let Some(msg) = result.first_error() {
            return Err(StoreError::Command(msg.to_string()).into());
        }
        if !result.took_effect() {
            return Ok(None);
        }

        Ok(Some(Quota {
            total,
            remaining: next.max(0) as u64,
            reset: reset_secs,
        }))
    }
}

fn parse(key: &str, value: String) -> Result<i64, QuotaError> {
    value.trim().parse().map_err(|_| QuotaError::Malformed {
        key: key.to_string(),
        value,
    })
}
