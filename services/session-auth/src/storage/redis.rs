//! Redis-backed keyed store.
//!
//! The two compound operations run as Lua scripts so Redis executes each one
//! without interleaving other commands.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use rust_common::{FixedWindow, Guard, KeyWrite, KeyedStore, PlatformError, WindowOutcome};
use std::time::Duration;

/// KEYS[1] counter, KEYS[2] block marker.
/// ARGV[1] limit, ARGV[2] window ms, ARGV[3] block ms (0 disables the marker).
/// Returns the new count, or -1 when limited.
static FIXED_WINDOW: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
local count = tonumber(redis.call('GET', KEYS[1]) or '0')
if count == nil then
    return redis.error_reply('corrupt counter')
end
if count >= tonumber(ARGV[1]) then
    if tonumber(ARGV[3]) > 0 and redis.call('EXISTS', KEYS[2]) == 0 then
        redis.call('SET', KEYS[2], '1', 'PX', ARGV[3])
    end
    return -1
end
local current = redis.call('INCR', KEYS[1])
if current == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return current
",
    )
});

/// KEYS[1] guard key, KEYS[2..] write targets.
/// ARGV[1] '1' if the guard expects a value, ARGV[2] expected value,
/// then (value, ttl ms) pairs, ttl 0 meaning persistent.
static GUARDED_WRITE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
local actual = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
    if actual ~= ARGV[2] then return 0 end
else
    if actual then return 0 end
end
for i = 2, #KEYS do
    local value = ARGV[2 * i - 1]
    local ttl = tonumber(ARGV[2 * i])
    if ttl > 0 then
        redis.call('SET', KEYS[i], value, 'PX', ttl)
    else
        redis.call('SET', KEYS[i], value)
    end
end
return 1
",
    )
});

/// Keyed store over a shared Redis connection.
#[derive(Clone)]
pub struct RedisKeyedStore {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisKeyedStore {
    /// Connect to `redis_url`, prefixing every key with `namespace:`.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Unavailable`] if Redis is unreachable.
    pub async fn connect(redis_url: &str, namespace: impl Into<String>) -> Result<Self, PlatformError> {
        let client = redis::Client::open(redis_url).map_err(unavailable)?;
        let conn = ConnectionManager::new(client).await.map_err(unavailable)?;

        Ok(Self {
            conn,
            namespace: namespace.into(),
        })
    }

    fn namespaced_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

fn unavailable(err: redis::RedisError) -> PlatformError {
    if err.is_timeout() {
        PlatformError::Timeout(err.to_string())
    } else {
        PlatformError::unavailable(err.to_string())
    }
}

fn millis(ttl: Duration) -> Result<u64, PlatformError> {
    u64::try_from(ttl.as_millis())
        .map_err(|_| PlatformError::invalid_input(format!("TTL out of range: {ttl:?}")))
}

#[async_trait]
impl KeyedStore for RedisKeyedStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PlatformError> {
        let mut conn = self.conn.clone();
        conn.get(self.namespaced_key(key)).await.map_err(unavailable)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), PlatformError> {
        let mut conn = self.conn.clone();
        let key = self.namespaced_key(key);
        match ttl {
            Some(ttl) => conn
                .pset_ex::<_, _, ()>(key, value, millis(ttl)?)
                .await
                .map_err(unavailable),
            None => conn.set::<_, _, ()>(key, value).await.map_err(unavailable),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, PlatformError> {
        let mut conn = self.conn.clone();
        conn.exists(self.namespaced_key(key)).await.map_err(unavailable)
    }

    async fn delete(&self, key: &str) -> Result<(), PlatformError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.namespaced_key(key)).await.map_err(unavailable)
    }

    async fn hit_fixed_window(
        &self,
        key: &str,
        policy: &FixedWindow,
    ) -> Result<WindowOutcome, PlatformError> {
        let mut conn = self.conn.clone();
        let counter_key = self.namespaced_key(key);
        let block_key = self.namespaced_key(&FixedWindow::block_key(key));

        let result: i64 = FIXED_WINDOW
            .key(&counter_key)
            .key(&block_key)
            .arg(policy.limit)
            .arg(millis(policy.window)?)
            .arg(millis(policy.block)?)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                if e.to_string().contains("corrupt counter") {
                    PlatformError::corrupt(key, e.to_string())
                } else {
                    unavailable(e)
                }
            })?;

        Ok(u64::try_from(result).map_or(WindowOutcome::Limited, |count| WindowOutcome::Allowed { count }))
    }

    async fn guarded_write(&self, guard: &Guard, writes: &[KeyWrite]) -> Result<bool, PlatformError> {
        let mut conn = self.conn.clone();

        let mut invocation = GUARDED_WRITE.key(self.namespaced_key(&guard.key));
        invocation
            .arg(if guard.expected.is_some() { "1" } else { "0" })
            .arg(guard.expected.as_deref().unwrap_or(""));
        for write in writes {
            let ttl = write.ttl.map(millis).transpose()?.unwrap_or(0);
            invocation
                .key(self.namespaced_key(&write.key))
                .arg(&write.value)
                .arg(ttl);
        }

        let applied: i64 = invocation.invoke_async(&mut conn).await.map_err(unavailable)?;
        Ok(applied == 1)
    }
}
