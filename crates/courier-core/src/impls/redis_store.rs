//! Redis store implementation (feature `redis`).
//!
//! Ready lists are Redis lists and the delayed/reserved indexes are sorted sets.
//! Each ready list `L` has a companion `L:notify` list holding one token per pushed
//! item; a blocked pop waits on it with `BLPOP` over a connection checked out of a
//! small idle pool, so the shared multiplexed connection is never held by a blocking
//! command. One connection exists per concurrent waiter and is reused afterwards.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, Script};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::StoreError;
use crate::ports::Store;

/// KEYS: set, list, notify. ARGV: member.
const PROMOTE: &str = r"
if redis.call('zrem', KEYS[1], ARGV[1]) == 1 then
    redis.call('rpush', KEYS[2], ARGV[1])
    redis.call('rpush', KEYS[3], 1)
    return 1
end
return 0
";

/// KEYS: list, reserved, notify. ARGV: score.
const POP_RESERVE: &str = r"
local job = redis.call('lpop', KEYS[1])
if job then
    redis.call('zadd', KEYS[2], ARGV[1], job)
    redis.call('lpop', KEYS[3])
end
return job
";

fn store_error(e: RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
        StoreError::Connection(e.to_string())
    } else {
        StoreError::Command(e.to_string())
    }
}

fn notify_key(list: &str) -> String {
    format!("{list}:notify")
}

#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    conn: MultiplexedConnection,
    /// Idle connections for `BLPOP`.
    blocking: Arc<Mutex<Vec<MultiplexedConnection>>>,
    promote: Arc<Script>,
    pop_reserve: Arc<Script>,
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(store_error)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(store_error)?;
        debug!(url, "connected to redis");
        Ok(Self {
            client,
            conn,
            blocking: Arc::new(Mutex::new(Vec::new())),
            promote: Arc::new(Script::new(PROMOTE)),
            pop_reserve: Arc::new(Script::new(POP_RESERVE)),
        })
    }

    async fn try_pop_reserve(&self, list: &str, reserved: &str, score: i64) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let popped: Option<String> = self
            .pop_reserve
            .key(list)
            .key(reserved)
            .key(notify_key(list))
            .arg(score)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(popped)
    }

    /// Wait up to `timeout` for a notify token on `list`.
    async fn wait_for_push(&self, list: &str, timeout: Duration) -> Result<(), StoreError> {
        let idle = self.blocking.lock().await.pop();
        let mut conn = match idle {
            Some(conn) => conn,
            None => self
                .client
                .get_multiplexed_async_connection()
                .await
                .map_err(store_error)?,
        };
        // a failed connection is dropped, not returned to the pool
        let _token: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(notify_key(list))
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        self.blocking.lock().await.push(conn);
        Ok(())
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn push_ready(&self, list: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .cmd("RPUSH")
            .arg(list)
            .arg(value)
            .ignore()
            .cmd("RPUSH")
            .arg(notify_key(list))
            .arg(1)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn append(&self, list: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("RPUSH")
            .arg(list)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn schedule(&self, set: &str, score: i64, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("ZADD")
            .arg(set)
            .arg(score)
            .arg(member)
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn due(&self, set: &str, max_score: i64, limit: usize) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("ZRANGEBYSCORE")
            .arg(set)
            .arg("-inf")
            .arg(max_score)
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async::<Vec<String>>(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn promote(&self, set: &str, list: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let moved: i64 = self
            .promote
            .key(set)
            .key(list)
            .key(notify_key(list))
            .arg(member)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(moved == 1)
    }

    async fn pop_reserve(
        &self,
        list: &str,
        reserved: &str,
        score: i64,
        wait: Duration,
    ) -> Result<Option<String>, StoreError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(value) = self.try_pop_reserve(list, reserved, score).await? {
                return Ok(Some(value));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            self.wait_for_push(list, remaining).await?;
        }
    }

    async fn unschedule(&self, set: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("ZREM")
            .arg(set)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(removed > 0)
    }

    async fn remove(&self, list: &str, value: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("LREM")
            .arg(list)
            .arg(1)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(removed > 0)
    }

    async fn range(&self, list: &str, offset: usize, limit: usize) -> Result<Vec<String>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        redis::cmd("LRANGE")
            .arg(list)
            .arg(offset)
            .arg(offset.saturating_add(limit - 1))
            .query_async::<Vec<String>>(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn list_len(&self, list: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("LLEN")
            .arg(list)
            .query_async::<u64>(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn set_len(&self, set: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("ZCARD")
            .arg(set)
            .query_async::<u64>(&mut conn)
            .await
            .map_err(store_error)
    }
}

/// Needs a live server: set `COURIER_TEST_REDIS_URL`, otherwise every test returns early.
#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> Option<(RedisStore, String)> {
        let url = std::env::var("COURIER_TEST_REDIS_URL").ok()?;
        let store = RedisStore::connect(&url).await.ok()?;
        // fresh key space per test
        let prefix = format!("courier-test:{}:", ulid::Ulid::new());
        Some((store, prefix))
    }

    #[tokio::test]
    async fn pop_reserve_moves_head_into_reserved_set() {
        let Some((store, p)) = store().await else {
            return;
        };
        let (list, reserved) = (format!("{p}q"), format!("{p}q:reserved"));
        store.push_ready(&list, "a").await.unwrap();
        store.push_ready(&list, "b").await.unwrap();

        let popped = store
            .pop_reserve(&list, &reserved, 42, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(popped.as_deref(), Some("a"));
        assert_eq!(store.list_len(&list).await.unwrap(), 1);
        assert_eq!(store.due(&reserved, 42, 10).await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn blocked_pop_wakes_on_push() {
        let Some((store, p)) = store().await else {
            return;
        };
        let list = format!("{p}q");
        let waiter = tokio::spawn({
            let store = store.clone();
            let list = list.clone();
            let reserved = format!("{p}q:reserved");
            async move {
                store
                    .pop_reserve(&list, &reserved, 0, Duration::from_secs(5))
                    .await
                    .unwrap()
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        store.push_ready(&list, "hello").await.unwrap();
        assert_eq!(waiter.await.unwrap().as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn promote_is_exactly_once() {
        let Some((store, p)) = store().await else {
            return;
        };
        let (set, list) = (format!("{p}q:delayed"), format!("{p}q"));
        store.schedule(&set, 10, "x").await.unwrap();

        assert!(store.promote(&set, &list, "x").await.unwrap());
        assert!(!store.promote(&set, &list, "x").await.unwrap());
        assert_eq!(store.range(&list, 0, 10).await.unwrap(), vec!["x"]);
        assert!(store.remove(&list, "x").await.unwrap());
        assert_eq!(store.set_len(&set).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn blocking_connection_is_reused_between_waits() {
        let Some((store, p)) = store().await else {
            return;
        };
        let (list, reserved) = (format!("{p}q"), format!("{p}q:reserved"));
        for _ in 0..3 {
            let popped = store
                .pop_reserve(&list, &reserved, 0, Duration::from_millis(50))
                .await
                .unwrap();
            assert!(popped.is_none());
        }
        assert_eq!(store.blocking.lock().await.len(), 1);
    }
}
