use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use seamgraph_core::{Result, SeamGraphError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The remote key-value tier: TTL-expiring byte entries with pattern
/// scans and deletes. Implementations must treat every failure as
/// recoverable; the manager degrades to a miss.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;
    async fn delete(&self, keys: &[String]) -> Result<usize>;
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>>;
    async fn ping(&self) -> bool;
}

/// Redis-backed remote tier.
pub struct RedisRemoteCache {
    url: String,
    connection: Mutex<Option<ConnectionManager>>,
}

impl RedisRemoteCache {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection: Mutex::new(None),
        }
    }

    fn connection(&self) -> Result<ConnectionManager> {
        self.connection
            .lock()
            .clone()
            .ok_or_else(|| SeamGraphError::CacheUnavailable("redis not connected".to_string()))
    }
}

#[async_trait]
impl RemoteCache for RedisRemoteCache {
    async fn connect(&self) -> Result<()> {
        let client = redis::Client::open(self.url.as_str())
            .map_err(|e| SeamGraphError::CacheUnavailable(e.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| SeamGraphError::CacheUnavailable(e.to_string()))?;
        *self.connection.lock() = Some(manager);
        info!("redis cache backend connected");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection()?;
        conn.get(key)
            .await
            .map_err(|e| SeamGraphError::CacheUnavailable(e.to_string()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut conn = self.connection()?;
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| SeamGraphError::CacheUnavailable(e.to_string()))
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection()?;
        conn.del::<_, usize>(keys.to_vec())
            .await
            .map_err(|e| SeamGraphError::CacheUnavailable(e.to_string()))
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.connection()?;
        conn.keys(pattern)
            .await
            .map_err(|e| SeamGraphError::CacheUnavailable(e.to_string()))
    }

    async fn ping(&self) -> bool {
        let Ok(mut conn) = self.connection() else {
            return false;
        };
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => true,
            Err(e) => {
                warn!("redis ping failed: {}", e);
                false
            }
        }
    }
}

/// In-process remote tier with the same TTL and pattern semantics.
/// Useful for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryRemoteCache {
    entries: DashMap<String, (Vec<u8>, Option<Instant>)>,
}

impl MemoryRemoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn expired(deadline: &Option<Instant>) -> bool {
        deadline.map(|d| Instant::now() > d).unwrap_or(false)
    }
}

/// Glob match supporting `*` wildcards only, the subset the cache uses.
fn glob_match(pattern: &str, candidate: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == candidate;
    }

    let mut remaining = candidate;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            let Some(rest) = remaining.strip_prefix(part) else {
                return false;
            };
            remaining = rest;
        } else if i == parts.len() - 1 {
            return remaining.ends_with(part);
        } else {
            let Some(found) = remaining.find(part) else {
                return false;
            };
            remaining = &remaining[found + part.len()..];
        }
    }
    true
}

#[async_trait]
impl RemoteCache for MemoryRemoteCache {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let is_expired = match self.entries.get(key) {
            Some(entry) if !Self::expired(&entry.1) => return Ok(Some(entry.0.clone())),
            Some(_) => true,
            None => false,
        };
        if is_expired {
            drop(self.entries.remove(key));
            debug!("expired cache entry {}", key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let deadline = Instant::now().checked_add(ttl);
        self.entries.insert(key.to_string(), (value, deadline));
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        let mut removed = 0;
        for key in keys {
            if self.entries.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| glob_match(pattern, key))
            .collect())
    }

    async fn ping(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_wildcard_segments() {
        assert!(glob_match("code_graph:*", "code_graph:nodes:a.py"));
        assert!(glob_match("code_graph:analysis:*a.py*", "code_graph:analysis:deps:a.py:x"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exact:no"));
        assert!(!glob_match("code_graph:metadata:*", "other:metadata:a"));
    }

    #[tokio::test]
    async fn memory_remote_honors_ttl() {
        let cache = MemoryRemoteCache::new();
        cache
            .set("k", b"v".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));

        cache
            .set("gone", b"v".to_vec(), Duration::from_secs(0))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(cache.get("gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn scan_and_delete_by_pattern() {
        let cache = MemoryRemoteCache::new();
        for key in ["p:nodes:a", "p:nodes:b", "p:edges:a"] {
            cache
                .set(key, b"v".to_vec(), Duration::from_secs(60))
                .await
                .unwrap();
        }

        let mut keys = cache.scan_keys("p:nodes:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["p:nodes:a".to_string(), "p:nodes:b".to_string()]);

        assert_eq!(cache.delete(&keys).await.unwrap(), 2);
        assert!(cache.scan_keys("p:nodes:*").await.unwrap().is_empty());
    }
}
