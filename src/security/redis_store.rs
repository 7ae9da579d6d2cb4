//! Redis-backed counters shared by every instance.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Script;
use tokio::sync::OnceCell;

use crate::security::store::{CounterStore, StoreError, WindowCount, MAX_WINDOW};

const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

const DECREMENT_SCRIPT: &str = r#"
local count = tonumber(redis.call('GET', KEYS[1]) or '0')
if count > 0 then
    return redis.call('DECR', KEYS[1])
end
return 0
"#;

pub struct RedisStore {
    client: redis::Client,
    conn: OnceCell<MultiplexedConnection>,
    increment: Script,
    decrement: Script,
}

impl RedisStore {
    /// Parse the URL. No connection is made until the first command.
    pub fn open(url: &str) -> Result<Self, StoreError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            conn: OnceCell::new(),
            increment: Script::new(INCREMENT_SCRIPT),
            decrement: Script::new(DECREMENT_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let conn = self.client.get_multiplexed_async_connection().await?;
                tracing::info!("Connected to Redis counter store");
                Ok::<_, StoreError>(conn)
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let mut conn = self.connection().await?;
        let window_ms = window.min(MAX_WINDOW).as_millis().max(1) as u64;
        let reply: Vec<i64> = self
            .increment
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;

        match reply.as_slice() {
            [count, ttl] => Ok(WindowCount {
                count: (*count).max(0) as u64,
                reset_after: Duration::from_millis((*ttl).max(0) as u64),
            }),
            other => Err(StoreError::Reply(format!("{other:?}"))),
        }
    }

    async fn decrement(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: i64 = self.decrement.key(key).invoke_async(&mut conn).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_rejected() {
        assert!(RedisStore::open("not a url").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_errors() {
        let store = RedisStore::open("redis://127.0.0.1:1/").unwrap();
        assert!(store.increment("k", Duration::from_secs(1)).await.is_err());
    }
}
