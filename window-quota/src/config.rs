use std::num::NonZeroU32;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::QuotaError;

pub const DEFAULT_MAXIMUM: u32 = 2500;
pub const DEFAULT_DURATION: Duration = Duration::from_millis(3_600_000);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 128;
/// Longest window a policy may describe. Window ends are stored as signed
/// epoch milliseconds, so anything longer could not be added to the clock.
pub const MAX_DURATION: Duration = Duration::from_millis(i64::MAX as u64 / 2);

/// How much quota a window holds, how long it lives, and how hard a tracker
/// fights for it under contention.
///
/// The policy lives only in the client. Nothing here is written to the store,
/// so trackers that disagree on `maximum` for one identifier will each report
/// their own value as `total`.
///
/// ```
/// use window_quota::QuotaPolicy;
///
/// let policy: QuotaPolicy = serde_json::from_str(r#"{ "maximum": 100, "duration_ms": 60000 }"#).unwrap();
/// assert_eq!(policy.maximum.get(), 100);
/// assert_eq!(policy.max_attempts, Some(128));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaPolicy {
    pub maximum: NonZeroU32,
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
    /// Upper bound on Probe attempts per query. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            maximum: NonZeroU32::new(DEFAULT_MAXIMUM).unwrap_or(NonZeroU32::MIN),
            duration: DEFAULT_DURATION,
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
        }
    }
}

impl QuotaPolicy {
    pub fn new(maximum: NonZeroU32, duration: Duration) -> Self {
        Self {
            maximum,
            duration,
            ..Self::default()
        }
    }

    pub fn with_maximum(mut self, maximum: NonZeroU32) -> Self {
        self.maximum = maximum;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Give up with [`QuotaError::Contended`] after `attempts` lost races.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Retry lost races without limit.
    ///
    /// Under sustained contention on one identifier a query may then never
    /// return; callers should impose their own deadline.
    pub fn unbounded(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    pub fn validate(&self) -> Result<(), QuotaError> {
        if self.duration.as_millis() == 0 {
            return Err(QuotaError::InvalidConfig(
                "duration must be at least one millisecond".to_string(),
            ));
        }
        if self.duration > MAX_DURATION {
            return Err(QuotaError::InvalidConfig(format!(
                "duration must not exceed {} ms",
                MAX_DURATION.as_millis()
            )));
        }
        if self.max_attempts == Some(0) {
            return Err(QuotaError::InvalidConfig(
                "max_attempts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
