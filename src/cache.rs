//! KV cache. A typed get/set/mget/delete/counter/set/list
//! surface over a remote store, with pattern delete via cursor-based scan
//! and a health probe. Every caller passes an already-namespaced key; this
//! module never accepts a bare, unbounded key pattern for anything but the
//! cursor-scanning `delete_matching`.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("transient cache error: {0}")]
    Transient(String),
    #[error("cache write failed: {0}")]
    WriteFailed(String),
}

#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get_raw(&self, key: &str) -> Option<String>;
    async fn set_raw(&self, key: &str, value: String, ttl_secs: u64) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    async fn exists(&self, key: &str) -> bool;
    async fn increment(&self, key: &str, delta: i64) -> Result<i64, CacheError>;
    async fn sadd(&self, key: &str, member: &str) -> Result<(), CacheError>;
    async fn srem(&self, key: &str, member: &str) -> Result<(), CacheError>;
    async fn smembers(&self, key: &str) -> Vec<String>;
    async fn rpush(&self, key: &str, value: String) -> Result<(), CacheError>;
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Vec<String>;
    async fn delete_matching(&self, pattern: &str) -> Result<u64, CacheError>;
    async fn healthy(&self) -> bool;

    /// Sliding-window counter used by the rate limiter: push `now_ms` into the
    /// sorted set at `key`, evict entries older than `now_ms - window_ms`, and
    /// return the count remaining after eviction (including the new entry).
    /// Must be atomic against concurrent callers on the same key.
    async fn sliding_window_count(&self, key: &str, now_ms: i64, window_ms: i64, ttl_secs: u64) -> Result<u64, CacheError>;

    /// `SET key token NX PX ttl_ms` — used by the distributed lock to acquire
    /// a lease with a fencing token. Returns true if the lease was acquired.
    async fn set_nx_px(&self, key: &str, token: &str, ttl_ms: u64) -> Result<bool, CacheError>;

    /// Release/extend a lease only if the stored token still matches.
    async fn compare_delete(&self, key: &str, token: &str) -> Result<bool, CacheError>;
    async fn compare_extend(&self, key: &str, token: &str, ttl_ms: u64) -> Result<bool, CacheError>;
}

pub async fn get<T: DeserializeOwned>(cache: &dyn KvCache, key: &str) -> Option<T> {
    let raw = cache.get_raw(key).await?;
    serde_json::from_str(&raw).ok()
}

pub async fn set<T: Serialize>(cache: &dyn KvCache, key: &str, value: &T, ttl_secs: u64) -> Result<(), CacheError> {
    let raw = serde_json::to_string(value).map_err(|e| CacheError::WriteFailed(e.to_string()))?;
    cache.set_raw(key, raw, ttl_secs).await
}

/// Redis-backed implementation. Transient transport errors are retried with
/// bounded exponential backoff; a permanent read error is reported as
/// absent (`None`) so callers fall back to the relational store, a
/// permanent write error is surfaced.
pub struct RedisCache {
    manager: ConnectionManager,
    sliding_window_script: redis::Script,
    set_nx_px_script: redis::Script,
    compare_delete_script: redis::Script,
    compare_extend_script: redis::Script,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> redis::RedisResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self {
            manager,
            sliding_window_script: redis::Script::new(
                r"
                redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
                redis.call('ZADD', KEYS[1], ARGV[2], ARGV[3])
                redis.call('EXPIRE', KEYS[1], ARGV[4])
                return redis.call('ZCARD', KEYS[1])
                ",
            ),
            set_nx_px_script: redis::Script::new(
                r"
                if redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2]) then
                    return 1
                else
                    return 0
                end
                ",
            ),
            compare_delete_script: redis::Script::new(
                r"
                if redis.call('GET', KEYS[1]) == ARGV[1] then
                    return redis.call('DEL', KEYS[1])
                else
                    return 0
                end
                ",
            ),
            compare_extend_script: redis::Script::new(
                r"
                if redis.call('GET', KEYS[1]) == ARGV[1] then
                    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
                else
                    return 0
                end
                ",
            ),
        })
    }

    async fn with_retry<T, F, Fut>(&self, mut attempt: F) -> Result<T, CacheError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = redis::RedisResult<T>>,
    {
        let mut backoff_ms = 10u64;
        let mut last_err = None;
        for _ in 0..3 {
            match attempt().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_connection_dropped() || e.is_timeout() => {
                    last_err = Some(e);
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
                Err(e) => return Err(CacheError::WriteFailed(e.to_string())),
            }
        }
        Err(CacheError::Transient(last_err.map(|e| e.to_string()).unwrap_or_default()))
    }
}

#[async_trait]
impl KvCache for RedisCache {
    async fn get_raw(&self, key: &str) -> Option<String> {
        let mut conn = self.manager.clone();
        conn.get::<_, Option<String>>(key).await.ok().flatten()
    }

    async fn set_raw(&self, key: &str, value: String, ttl_secs: u64) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        self.with_retry(|| {
            let mut conn = conn.clone();
            let key = key.to_string();
            let value = value.clone();
            async move {
                if ttl_secs > 0 {
                    conn.set_ex::<_, _, ()>(key, value, ttl_secs).await
                } else {
                    conn.set::<_, _, ()>(key, value).await
                }
            }
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await.map_err(|e| CacheError::WriteFailed(e.to_string()))
    }

    async fn exists(&self, key: &str) -> bool {
        let mut conn = self.manager.clone();
        conn.exists(key).await.unwrap_or(false)
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        let mut conn = self.manager.clone();
        conn.incr(key, delta).await.map_err(|e| CacheError::WriteFailed(e.to_string()))
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        conn.sadd::<_, _, ()>(key, member).await.map_err(|e| CacheError::WriteFailed(e.to_string()))
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        conn.srem::<_, _, ()>(key, member).await.map_err(|e| CacheError::WriteFailed(e.to_string()))
    }

    async fn smembers(&self, key: &str) -> Vec<String> {
        let mut conn = self.manager.clone();
        conn.smembers(key).await.unwrap_or_default()
    }

    async fn rpush(&self, key: &str, value: String) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        conn.rpush::<_, _, ()>(key, value).await.map_err(|e| CacheError::WriteFailed(e.to_string()))
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Vec<String> {
        let mut conn = self.manager.clone();
        conn.lrange(key, start as isize, stop as isize).await.unwrap_or_default()
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, CacheError> {
        let mut conn = self.manager.clone();
        let mut cursor: u64 = 0;
        let mut deleted = 0u64;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::WriteFailed(e.to_string()))?;
            if !keys.is_empty() {
                let n: u64 = conn.del(&keys).await.map_err(|e| CacheError::WriteFailed(e.to_string()))?;
                deleted += n;
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(deleted)
    }

    async fn healthy(&self) -> bool {
        let mut conn = self.manager.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await.is_ok()
    }

    async fn sliding_window_count(&self, key: &str, now_ms: i64, window_ms: i64, ttl_secs: u64) -> Result<u64, CacheError> {
        let mut conn = self.manager.clone();
        let cutoff = now_ms - window_ms;
        let member = format!("{now_ms}-{}", uuid::Uuid::new_v4());
        self.sliding_window_script
            .key(key)
            .arg(cutoff)
            .arg(now_ms)
            .arg(member)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CacheError::WriteFailed(e.to_string()))
    }

    async fn set_nx_px(&self, key: &str, token: &str, ttl_ms: u64) -> Result<bool, CacheError> {
        let mut conn = self.manager.clone();
        let ok: i64 = self
            .set_nx_px_script
            .key(key)
            .arg(token)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CacheError::WriteFailed(e.to_string()))?;
        Ok(ok == 1)
    }

    async fn compare_delete(&self, key: &str, token: &str) -> Result<bool, CacheError> {
        let mut conn = self.manager.clone();
        let n: i64 = self
            .compare_delete_script
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CacheError::WriteFailed(e.to_string()))?;
        Ok(n == 1)
    }

    async fn compare_extend(&self, key: &str, token: &str, ttl_ms: u64) -> Result<bool, CacheError> {
        let mut conn = self.manager.clone();
        let n: i64 = self
            .compare_extend_script
            .key(key)
            .arg(token)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CacheError::WriteFailed(e.to_string()))?;
        Ok(n == 1)
    }
}

/// In-process stand-in used by the test suite so engine tests don't depend
/// on a running Redis instance. Implements the same contract, including the
/// atomic sliding-window and fencing-token semantics, over a single mutex.
#[derive(Default)]
pub struct FakeCache {
    inner: StdMutex<FakeCacheInner>,
}

#[derive(Default)]
struct FakeCacheInner {
    strings: HashMap<String, String>,
    sets: HashMap<String, std::collections::HashSet<String>>,
    lists: HashMap<String, Vec<String>>,
    sorted: HashMap<String, Vec<(String, i64)>>,
}

#[async_trait]
impl KvCache for FakeCache {
    async fn get_raw(&self, key: &str) -> Option<String> {
        self.inner.lock().unwrap().strings.get(key).cloned()
    }

    async fn set_raw(&self, key: &str, value: String, _ttl_secs: u64) -> Result<(), CacheError> {
        self.inner.lock().unwrap().strings.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut inner = self.inner.lock().unwrap();
        inner.strings.remove(key);
        inner.sets.remove(key);
        inner.lists.remove(key);
        inner.sorted.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> bool {
        self.inner.lock().unwrap().strings.contains_key(key)
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.strings.entry(key.to_string()).or_insert_with(|| "0".to_string());
        let current: i64 = entry.parse().unwrap_or(0);
        let next = current + delta;
        *entry = next.to_string();
        Ok(next)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), CacheError> {
        self.inner.lock().unwrap().sets.entry(key.to_string()).or_default().insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), CacheError> {
        if let Some(set) = self.inner.lock().unwrap().sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Vec<String> {
        self.inner.lock().unwrap().sets.get(key).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }

    async fn rpush(&self, key: &str, value: String) -> Result<(), CacheError> {
        self.inner.lock().unwrap().lists.entry(key.to_string()).or_default().push(value);
        Ok(())
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let Some(list) = inner.lists.get(key) else { return vec![] };
        let len = list.len() as isize;
        let norm = |i: isize| if i < 0 { (len + i).max(0) } else { i.min(len) };
        let (s, e) = (norm(start), norm(stop) + 1);
        if s >= e {
            return vec![];
        }
        list[s as usize..e.min(len) as usize].to_vec()
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, CacheError> {
        let prefix = pattern.trim_end_matches('*');
        let mut inner = self.inner.lock().unwrap();
        let keys: Vec<String> = inner.strings.keys().filter(|k| k.starts_with(prefix)).cloned().collect();
        let count = keys.len() as u64;
        for k in keys {
            inner.strings.remove(&k);
        }
        Ok(count)
    }

    async fn healthy(&self) -> bool {
        true
    }

    async fn sliding_window_count(&self, key: &str, now_ms: i64, window_ms: i64, _ttl_secs: u64) -> Result<u64, CacheError> {
        let mut inner = self.inner.lock().unwrap();
        let entries = inner.sorted.entry(key.to_string()).or_default();
        let cutoff = now_ms - window_ms;
        entries.retain(|(_, score)| *score > cutoff);
        entries.push((uuid::Uuid::new_v4().to_string(), now_ms));
        Ok(entries.len() as u64)
    }

    async fn set_nx_px(&self, key: &str, token: &str, _ttl_ms: u64) -> Result<bool, CacheError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.strings.contains_key(key) {
            return Ok(false);
        }
        inner.strings.insert(key.to_string(), token.to_string());
        Ok(true)
    }

    async fn compare_delete(&self, key: &str, token: &str) -> Result<bool, CacheError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.strings.get(key).map(|v| v.as_str()) == Some(token) {
            inner.strings.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn compare_extend(&self, key: &str, token: &str, _ttl_ms: u64) -> Result<bool, CacheError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.strings.get(key).map(|v| v.as_str()) == Some(token))
    }
}
