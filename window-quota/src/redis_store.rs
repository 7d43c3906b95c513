//! [`Store`] adapter for Redis, built on the `redis` crate.
//!
//! Requires the `redis` feature.

use redis::aio::MultiplexedConnection;
use redis::Client;
use redis::Value;

use crate::BatchResult;
use crate::Command;
use crate::Reply;
use crate::Session;
use crate::Store;
use crate::StoreError;

/// A Redis server shared by every tracker that holds this handle.
///
/// Every [`Store::session`] call, and so every query, dials a fresh
/// connection: WATCH state belongs to a connection, so a shared multiplexed
/// connection would let concurrent queries see each other's watches. Expect
/// one connect round trip per query on top of the protocol's own commands.
#[derive(Debug, Clone)]
pub struct RedisStore {
    client: Client,
}

impl RedisStore {
    pub fn open(url: &str) -> Result<Self, StoreError> {
        Ok(Self::from_client(Client::open(url)?))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

impl Store for RedisStore {
    type Session = RedisSession;

    /// Each session gets its own connection: WATCH is connection state and
    /// must not leak into commands issued by other tasks.
    async fn session(&self) -> Result<RedisSession, StoreError> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(RedisSession { conn })
    }
}

/// A [`Session`] owning one Redis connection.
pub struct RedisSession {
    conn: MultiplexedConnection,
}

impl Session for RedisSession {
    async fn watch(&mut self, key: &str) -> Result<(), StoreError> {
        let _: () = redis::cmd("WATCH")
            .arg(key)
            .query_async(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn unwatch(&mut self) -> Result<(), StoreError> {
        let _: () = redis::cmd("UNWATCH").query_async(&mut self.conn).await?;
        Ok(())
    }

    async fn get_many(&mut self, keys: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut self.conn)
            .await?;
        Ok(values)
    }

    async fn exec(&mut self, commands: &[Command]) -> Result<BatchResult, StoreError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for command in commands {
            match command {
                Command::SetIfAbsent { key, value, ttl } => {
                    pipe.cmd("SET")
                        .arg(key)
                        .arg(*value)
                        .arg("PX")
                        .arg(ttl.as_millis() as u64)
                        .arg("NX");
                }
                Command::SetIfPresent { key, value, ttl } => {
                    pipe.cmd("SET")
                        .arg(key)
                        .arg(*value)
                        .arg("PX")
                        .arg(ttl.as_millis() as u64)
                        .arg("XX");
                }
                Command::Expire { key, ttl } => {
                    pipe.cmd("PEXPIRE").arg(key).arg(ttl.as_millis() as u64);
                }
            }
        }

        // EXEC answers nil when a watched key changed.
        let values: Option<Vec<Value>> = pipe.query_async(&mut self.conn).await?;
        Ok(BatchResult::from_values(
            values.map(|values| values.into_iter().map(reply).collect()),
        ))
    }
}

fn reply(value: Value) -> Reply {
    match value {
        Value::Okay => Reply::Ok,
        Value::SimpleString(s) if s == "OK" => Reply::Ok,
        Value::Nil => Reply::Nil,
        Value::Int(n) => Reply::Integer(n),
        other => Reply::Error(format!("unexpected reply {other:?}")),
    }
}
