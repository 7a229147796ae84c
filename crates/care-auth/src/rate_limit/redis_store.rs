//! Redis sorted-set window, shared by every API process.
//!
//! Each key is a ZSET of attempt timestamps (ms). Pruning, counting, and the
//! conditional insert run in one Lua script so concurrent logins cannot
//! both take the last slot.

use chrono::Utc;
use rand_core::{OsRng, RngCore};
use redis::aio::ConnectionManager;
use redis::Script;

use super::{Decision, RateLimitError, Window};

const SLIDING_WINDOW: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
local allowed = 0
if count < limit then
  redis.call('ZADD', key, now, ARGV[4])
  count = count + 1
  allowed = 1
end
redis.call('PEXPIRE', key, window)
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local oldest_ms = now
if oldest[2] then
  oldest_ms = tonumber(oldest[2])
end
return {allowed, count, oldest_ms}
"#;

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    script: std::sync::Arc<Script>,
}

impl RedisStore {
    /// Open a managed connection and PING it once.
    pub async fn connect(url: &str) -> Result<Self, RateLimitError> {
        let client = redis::Client::open(url)?;
        let mut conn = ConnectionManager::new(client).await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(Self {
            conn,
            script: std::sync::Arc::new(Script::new(SLIDING_WINDOW)),
        })
    }

    pub async fn hit(&self, key: &str, window: Window) -> Result<Decision, RateLimitError> {
        let now_ms = Utc::now().timestamp_millis();
        let window_ms = i64::try_from(window.period.as_millis()).unwrap_or(i64::MAX / 2);
        let member = format!("{now_ms}-{:016x}", OsRng.next_u64());

        let mut conn = self.conn.clone();
        let (allowed, count, oldest_ms): (i64, i64, i64) = self
            .script
            .key(key)
            .arg(now_ms)
            .arg(window_ms)
            .arg(window.limit)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;

        let until_clear_ms = (oldest_ms + window_ms - now_ms).max(0);
        let until_secs = (until_clear_ms + 999) / 1000;
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        let allowed = allowed == 1;
        Ok(Decision {
            allowed,
            limit: window.limit,
            remaining: window.limit.saturating_sub(count),
            retry_after: if allowed {
                0
            } else {
                u64::try_from(until_secs).unwrap_or(1).max(1)
            },
            reset_at: Utc::now().timestamp() + until_secs,
        })
    }

    pub async fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }
}
