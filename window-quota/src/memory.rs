use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::BatchResult;
use crate::Clock;
use crate::Command;
use crate::Reply;
use crate::Session;
use crate::Store;
use crate::StoreError;
use crate::SystemClock;

/// Expired keys are swept out of the map at most this often.
const SWEEP_INTERVAL_MS: u64 = 1_000;

fn expiry(now: u64, ttl: Duration) -> u64 {
    now.saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<u64>,
    version: u64,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    next_version: u64,
    last_sweep: u64,
}

impl State {
    /// Drop `key` if it has expired, then return its live entry.
    fn live(&mut self, key: &str, now: u64) -> Option<&mut Entry> {
        let expired = self
            .entries
            .get(key)
            .is_some_and(|e| e.expires_at.is_some_and(|at| at <= now));
        if expired {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    /// Drop every expired key, unless a sweep ran within the last interval.
    fn sweep(&mut self, now: u64) {
        if now.saturating_sub(self.last_sweep) < SWEEP_INTERVAL_MS {
            return;
        }
        self.last_sweep = now;
        self.entries
            .retain(|_, e| e.expires_at.is_none_or(|at| at > now));
    }

    fn version(&mut self, key: &str, now: u64) -> Option<u64> {
        self.live(key, now).map(|e| e.version)
    }

    fn bump(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    fn put(&mut self, key: &str, value: i64, ttl: Duration, now: u64) {
        let version = self.bump();
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(expiry(now, ttl)),
                version,
            },
        );
    }

    fn apply(&mut self, command: &Command, now: u64) -> Reply {
        match command {
            Command::SetIfAbsent { ttl, .. } | Command::SetIfPresent { ttl, .. }
                if ttl.is_zero() =>
            {
                Reply::Error("ERR invalid expire time in 'set' command".to_string())
            }
            Command::SetIfAbsent { key, value, ttl } => {
                if self.live(key, now).is_some() {
                    return Reply::Nil;
                }
                self.put(key, *value, *ttl, now);
                Reply::Ok
            }
            Command::SetIfPresent { key, value, ttl } => {
                if self.live(key, now).is_none() {
                    return Reply::Nil;
                }
                self.put(key, *value, *ttl, now);
                Reply::Ok
            }
            Command::Expire { key, ttl } => {
                if self.live(key, now).is_none() {
                    return Reply::Integer(0);
                }
                if ttl.is_zero() {
                    self.entries.remove(key.as_str());
                    return Reply::Integer(1);
                }
                let version = self.bump();
                if let Some(entry) = self.entries.get_mut(key.as_str()) {
                    entry.expires_at = Some(expiry(now, *ttl));
                    entry.version = version;
                }
                Reply::Integer(1)
            }
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
    committed: AtomicU64,
    aborted: AtomicU64,
    writes: AtomicU64,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Connection("memory store poisoned".to_string()))
    }
}

/// Counters describing what a [`MemoryStore`] has been asked to do.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    /// Batches that ran.
    pub committed: u64,
    /// Batches dropped because a watched key changed.
    pub aborted: u64,
    /// Commands that modified a key.
    pub writes: u64,
}

/// An in-process [`Store`] with Redis-compatible watch and expiry semantics.
///
/// Cloning is cheap and every clone sees the same keys, so clones stand in
/// for independent processes sharing one server.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a store whose key expiry follows `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                clock,
                committed: AtomicU64::new(0),
                aborted: AtomicU64::new(0),
                writes: AtomicU64::new(0),
            }),
        }
    }

    /// Number of keys held, including expired keys not yet swept.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.shared.lock()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            committed: self.shared.committed.load(Ordering::SeqCst),
            aborted: self.shared.aborted.load(Ordering::SeqCst),
            writes: self.shared.writes.load(Ordering::SeqCst),
        }
    }

    /// Reads a key, ignoring watches.
    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.shared.clock.now_ms();
        let mut state = self.shared.lock()?;
        Ok(state.live(key, now).map(|e| e.value.clone()))
    }

    /// Remaining time to live of a key, if it exists and expires.
    pub fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = self.shared.clock.now_ms();
        let mut state = self.shared.lock()?;
        Ok(state
            .live(key, now)
            .and_then(|e| e.expires_at)
            .map(|at| Duration::from_millis(at.saturating_sub(now))))
    }

    /// Unconditionally writes a key, as an unrelated client would.
    pub fn set(
        &self,
        key: &str,
        value: impl Into<String>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let now = self.shared.clock.now_ms();
        let mut state = self.shared.lock()?;
        let version = state.bump();
        state.entries.insert(
            key.to_string(),
            Entry {
                value: value.into(),
                expires_at: ttl.map(|ttl| expiry(now, ttl)),
                version,
            },
        );
        self.shared.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Deletes a key, as an unrelated client would.
    pub fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut state = self.shared.lock()?;
        let removed = state.entries.remove(key).is_some();
        if removed {
            self.shared.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(removed)
    }
}

impl Store for MemoryStore {
    type Session = MemorySession;

    async fn session(&self) -> Result<MemorySession, StoreError> {
        Ok(MemorySession {
            shared: Arc::clone(&self.shared),
            watched: Vec::new(),
        })
    }
}

/// A [`Session`] over a [`MemoryStore`].
#[derive(Debug)]
pub struct MemorySession {
    shared: Arc<Shared>,
    watched: Vec<(String, Option<u64>)>,
}

impl Session for MemorySession {
    async fn watch(&mut self, key: &str) -> Result<(), StoreError> {
        let now = self.shared.clock.now_ms();
        let version = self.shared.lock()?.version(key, now);
        self.watched.push((key.to_string(), version));
        Ok(())
    }

    async fn unwatch(&mut self) -> Result<(), StoreError> {
        self.watched.clear();
        Ok(())
    }

    async fn get_many(&mut self, keys: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
        let now = self.shared.clock.now_ms();
        let mut state = self.shared.lock()?;
        Ok(keys
            .iter()
            .map(|key| state.live(key, now).map(|e| e.value.clone()))
            .collect())
    }

    async fn exec(&mut self, commands: &[Command]) -> Result<BatchResult, StoreError> {
        let watched = std::mem::take(&mut self.watched);
        let now = self.shared.clock.now_ms();
        let mut state = self.shared.lock()?;
        state.sweep(now);

        let dirty = watched
            .iter()
            .any(|(key, seen)| state.version(key, now) != *seen);
        if dirty {
            self.shared.aborted.fetch_add(1, Ordering::SeqCst);
            return Ok(BatchResult::Aborted);
        }

        let replies: Vec<Reply> = commands.iter().map(|c| state.apply(c, now)).collect();
        let writes = replies
            .iter()
            .filter(|r| matches!(r, Reply::Ok | Reply::Integer(1)))
            .count() as u64;
        self.shared.writes.fetch_add(writes, Ordering::SeqCst);
        self.shared.committed.fetch_add(1, Ordering::SeqCst);
        Ok(BatchResult::Committed(replies))
    }
}
