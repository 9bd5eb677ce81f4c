//! Redis-backed shared store.
//!
//! Presence for one key is a sorted set of uids scored by their expiry
//! deadline plus a hash of uid to user info. Deadlines come from the Redis
//! server clock so every process agrees on what has expired. Both keys carry
//! a native `PEXPIRE`, so a channel nobody refreshes disappears on its own.
//! Multi-command primitives run as Lua scripts or `MULTI` pipelines.
//!
//! The connection is a [`ConnectionManager`]: after Redis restarts or the link
//! drops, the failing call reports [`StoreError::Unavailable`] and later calls
//! go over a fresh connection.

use super::{SharedStore, StoreError, StoreResult};
use ::redis::aio::ConnectionManager;
use ::redis::{Client, RedisError, Script};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::info;

// Scripts write after reading `TIME`; effect replication makes that legal on
// Redis 3.2 through 4 and is the default from 5 on.
const REFRESH_SCRIPT: &str = r"
redis.replicate_commands()
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
local ttl = tonumber(ARGV[3])
redis.call('ZADD', KEYS[1], now + ttl, ARGV[1])
redis.call('HSET', KEYS[2], ARGV[1], ARGV[2])
redis.call('PEXPIRE', KEYS[1], ttl)
redis.call('PEXPIRE', KEYS[2], ttl)
return 1
";

const LIVE_SCRIPT: &str = r"
redis.replicate_commands()
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
local expired = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', now)
for _, uid in ipairs(expired) do
    redis.call('HDEL', KEYS[2], uid)
end
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now)
return redis.call('HGETALL', KEYS[2])
";

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_timeout()
        {
            Self::Unavailable(err.to_string())
        } else {
            Self::Protocol(err.to_string())
        }
    }
}

/// Shared store on a Redis server.
pub struct RedisStore {
    conn: ConnectionManager,
    refresh: Script,
    live: Script,
}

impl RedisStore {
    /// Connect to the Redis server at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the server is unreachable.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(url = %url, "Connected to Redis");
        Ok(Self {
            conn,
            refresh: Script::new(REFRESH_SCRIPT),
            live: Script::new(LIVE_SCRIPT),
        })
    }

    fn members_key(key: &str) -> String {
        format!("{key}:members")
    }

    fn info_key(key: &str) -> String {
        format!("{key}:info")
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = ::redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = ::redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = ::redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    async fn presence_refresh(
        &self,
        key: &str,
        uid: &str,
        user_info: &str,
        ttl: Duration,
    ) -> StoreResult<()> {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut invocation = self.refresh.prepare_invoke();
        invocation
            .key(Self::members_key(key))
            .key(Self::info_key(key))
            .arg(uid)
            .arg(user_info)
            .arg(ttl_ms);

        let mut conn = self.conn.clone();
        let _: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(())
    }

    async fn presence_remove(&self, key: &str, uid: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = ::redis::pipe()
            .atomic()
            .cmd("ZREM")
            .arg(Self::members_key(key))
            .arg(uid)
            .ignore()
            .cmd("HDEL")
            .arg(Self::info_key(key))
            .arg(uid)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn presence_live(&self, key: &str) -> StoreResult<Vec<(String, String)>> {
        let mut invocation = self.live.prepare_invoke();
        invocation.key(Self::members_key(key)).key(Self::info_key(key));

        let mut conn = self.conn.clone();
        let flat: Vec<String> = invocation.invoke_async(&mut conn).await?;
        if flat.len() % 2 != 0 {
            return Err(StoreError::Protocol(
                "HGETALL returned an odd number of elements".to_string(),
            ));
        }

        let mut pairs = Vec::with_capacity(flat.len() / 2);
        let mut iter = flat.into_iter();
        while let (Some(uid), Some(info)) = (iter.next(), iter.next()) {
            pairs.push((uid, info));
        }
        Ok(pairs)
    }

    async fn list_push_trim(&self, key: &str, value: Bytes, cap: usize) -> StoreResult<()> {
        let start = -i64::try_from(cap).unwrap_or(i64::MAX);
        let mut conn = self.conn.clone();
        let _: () = ::redis::pipe()
            .atomic()
            .cmd("RPUSH")
            .arg(key)
            .arg(&value[..])
            .ignore()
            .cmd("LTRIM")
            .arg(key)
            .arg(start)
            .arg(-1)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn list_range(&self, key: &str) -> StoreResult<Vec<Bytes>> {
        let mut conn = self.conn.clone();
        let values: Vec<Vec<u8>> = ::redis::cmd("LRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;
        Ok(values.into_iter().map(Bytes::from).collect())
    }
}
