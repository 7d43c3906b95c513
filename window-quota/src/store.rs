//! The store capability a [`Tracker`](crate::Tracker) needs.
//!
//! A store is anything offering Redis-like optimistic concurrency: conditional
//! writes with millisecond expiry, expiry refresh, multi-key reads, and a
//! WATCH-guarded transactional batch. Client-specific reply shapes are
//! normalized into [`BatchResult`] by the adapter, never by the tracker.

use std::time::Duration;

use crate::StoreError;

/// A single write inside a transactional batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `SET key value PX ttl NX`
    SetIfAbsent {
        key: String,
        value: i64,
        ttl: Duration,
    },
    /// `SET key value PX ttl XX`
    SetIfPresent {
        key: String,
        value: i64,
        ttl: Duration,
    },
    /// `PEXPIRE key ttl`
    Expire { key: String, ttl: Duration },
}

impl Command {
    pub fn key(&self) -> &str {
        match self {
            Command::SetIfAbsent { key, .. }
            | Command::SetIfPresent { key, .. }
            | Command::Expire { key, .. } => key,
        }
    }
}

/// A normalized reply to one [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    /// The command's condition did not hold (e.g. `NX` on an existing key).
    Nil,
    Integer(i64),
    /// The command itself failed inside the batch.
    Error(String),
}

/// The outcome of executing a watched batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchResult {
    /// A watched key changed after the watch; nothing ran.
    Aborted,
    /// Every command ran; one reply per command, in order.
    Committed(Vec<Reply>),
}

impl BatchResult {
    /// Normalize the "bare values" convention, where an aborted transaction is
    /// reported as no reply list at all.
    pub fn from_values(values: Option<Vec<Reply>>) -> Self {
        match values {
            Some(replies) => BatchResult::Committed(replies),
            None => BatchResult::Aborted,
        }
    }

    /// Normalize the "paired" convention, where each entry carries its own
    /// error slot next to the value.
    pub fn from_pairs(pairs: Option<Vec<(Option<String>, Reply)>>) -> Self {
        let Some(pairs) = pairs else {
            return BatchResult::Aborted;
        };
        BatchResult::Committed(
            pairs
                .into_iter()
                .map(|(err, reply)| match err {
                    Some(msg) => Reply::Error(msg),
                    None => reply,
                })
                .collect(),
        )
    }

    /// Did the batch commit *and* did its leading conditional write apply?
    ///
    /// A watch abort and a failed `NX`/`XX` condition both mean a concurrent
    /// writer got there first; callers treat them identically.
    pub fn took_effect(&self) -> bool {
        match self {
            BatchResult::Aborted => false,
            BatchResult::Committed(replies) => matches!(replies.first(), Some(Reply::Ok)),
        }
    }

    /// Did every command in a committed batch reply `Ok`?
    pub fn all_ok(&self) -> bool {
        match self {
            BatchResult::Aborted => false,
            BatchResult::Committed(replies) => replies.iter().all(|r| *r == Reply::Ok),
        }
    }

    /// The first in-batch command error, if any.
    pub fn first_error(&self) -> Option<&str> {
        match self {
            BatchResult::Aborted => None,
            BatchResult::Committed(replies) => replies.iter().find_map(|r| match r {
                Reply::Error(msg) => Some(msg.as_str()),
                _ => None,
            }),
        }
    }
}

/// A long-lived, shared handle to the backing store.
#[trait_variant::make(Send)]
pub trait Store: Send + Sync {
    type Session: Session;

    /// Open a session pinned to one connection.
    ///
    /// Watches are connection state, so a probe and the batch that depends on
    /// it must run through the same session.
    async fn session(&self) -> Result<Self::Session, StoreError>;
}

/// One connection's worth of store operations.
#[trait_variant::make(Send)]
pub trait Session: Send {
    /// Watch `key`; the next [`exec`](Session::exec) aborts if it changes.
    async fn watch(&mut self, key: &str) -> Result<(), StoreError>;

    /// Drop every watch held by this session.
    async fn unwatch(&mut self) -> Result<(), StoreError>;

    /// Read several keys at once, outside any transaction.
    async fn get_many(&mut self, keys: &[&str]) -> Result<Vec<Option<String>>, StoreError>;

    /// Run `commands` as one transaction, guarded by the current watches.
    /// Watches are released afterwards whatever the outcome.
    async fn exec(&mut self, commands: &[Command]) -> Result<BatchResult, StoreError>;
}
