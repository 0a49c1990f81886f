use crate::codec;
use crate::metrics::{CacheMetrics, CacheStatsReport};
use crate::remote::RemoteCache;
use dashmap::DashMap;
use parking_lot::Mutex;
use seamgraph_core::{
    CacheSettings, CacheStrategy, FileMetadata, Result, SeamGraphError, UniversalNode,
    UniversalRelationship,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const NODES_NS: &str = "nodes";
const EDGES_NS: &str = "edges";
const META_NS: &str = "metadata";
const ANALYSIS_NS: &str = "analysis";

/// Two-tier cache: an in-process map in front of a remote KV store.
/// Remote failures are downgraded to misses; the memory tier is
/// authoritative only within the process lifetime.
pub struct HybridCacheManager {
    prefix: String,
    default_ttl: Duration,
    compression_threshold: usize,
    strategy: Mutex<CacheStrategy>,
    remote: Option<Arc<dyn RemoteCache>>,
    remote_available: AtomicBool,
    memory: DashMap<String, serde_json::Value>,
    metrics: CacheMetrics,
}

impl HybridCacheManager {
    pub fn new(settings: &CacheSettings, remote: Option<Arc<dyn RemoteCache>>) -> Self {
        Self {
            prefix: settings.prefix.clone(),
            default_ttl: Duration::from_secs(settings.default_ttl_s),
            compression_threshold: settings.compression_threshold_bytes,
            strategy: Mutex::new(settings.strategy),
            remote,
            remote_available: AtomicBool::new(false),
            memory: DashMap::new(),
            metrics: CacheMetrics::default(),
        }
    }

    /// Connect the remote tier according to the strategy. `RemoteOnly`
    /// fails hard when the remote is unreachable; `RemoteFallback`
    /// downgrades to memory-only; `Hybrid` degrades but keeps running.
    pub async fn initialize(&self) -> Result<bool> {
        let strategy = *self.strategy.lock();
        if strategy == CacheStrategy::MemoryOnly {
            info!("cache manager initialized in memory-only mode");
            return Ok(true);
        }

        let connected = match &self.remote {
            None => false,
            Some(remote) => match remote.connect().await {
                Ok(()) => remote.ping().await,
                Err(e) => {
                    warn!("remote cache connect failed: {}", e);
                    false
                }
            },
        };
        self.remote_available.store(connected, Ordering::SeqCst);

        if connected {
            info!("hybrid cache manager initialized with remote backend");
            return Ok(true);
        }

        match strategy {
            CacheStrategy::RemoteOnly => Err(SeamGraphError::CacheUnavailable(
                "remote backend required but unavailable".to_string(),
            )),
            CacheStrategy::RemoteFallback => {
                warn!("remote unavailable, falling back to memory-only mode");
                *self.strategy.lock() = CacheStrategy::MemoryOnly;
                Ok(true)
            }
            _ => {
                warn!("remote unavailable, hybrid cache degraded to memory tier");
                Ok(true)
            }
        }
    }

    pub async fn close(&self) {
        self.memory.clear();
        self.remote_available.store(false, Ordering::SeqCst);
        info!("cache manager closed");
    }

    fn should_use_remote(&self) -> bool {
        if self.remote.is_none() || !self.remote_available.load(Ordering::SeqCst) {
            return false;
        }
        matches!(
            *self.strategy.lock(),
            CacheStrategy::RemoteOnly | CacheStrategy::Hybrid | CacheStrategy::RemoteFallback
        )
    }

    fn make_key(&self, namespace: &str, rest: &str) -> String {
        format!("{}:{}:{}", self.prefix, namespace, rest)
    }

    async fn remote_get_raw(&self, key: &str) -> Option<Vec<u8>> {
        let remote = self.remote.as_ref()?;
        let started = Instant::now();
        let result = remote.get(key).await;
        self.metrics
            .record_remote_get(started.elapsed().as_secs_f64() * 1000.0);
        match result {
            Ok(value) => value,
            Err(e) => {
                debug!("remote get failed for {}: {}", key, e);
                self.metrics.errors_remote.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn remote_set_raw(&self, key: &str, value: Vec<u8>, ttl: Duration) -> bool {
        let Some(remote) = self.remote.as_ref() else {
            return false;
        };
        let started = Instant::now();
        let result = remote.set(key, value, ttl).await;
        self.metrics
            .record_remote_set(started.elapsed().as_secs_f64() * 1000.0);
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("remote set failed for {}: {}", key, e);
                self.metrics.errors_remote.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    async fn fetch_typed<T: serde::de::DeserializeOwned + serde::Serialize>(
        &self,
        full_key: &str,
    ) -> Option<T> {
        if let Some(entry) = self.memory.get(full_key) {
            self.metrics.hits_memory.fetch_add(1, Ordering::Relaxed);
            match serde_json::from_value(entry.value().clone()) {
                Ok(value) => return Some(value),
                Err(e) => {
                    debug!("memory entry for {} failed to decode: {}", full_key, e);
                    self.metrics
                        .errors_serialization
                        .fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if self.should_use_remote() {
            if let Some(bytes) = self.remote_get_raw(full_key).await {
                match codec::decode::<T>(&bytes) {
                    Ok(value) => {
                        self.metrics.hits_remote.fetch_add(1, Ordering::Relaxed);
                        if let Ok(json) = serde_json::to_value(&value) {
                            self.memory.insert(full_key.to_string(), json);
                        }
                        return Some(value);
                    }
                    Err(e) => {
                        warn!("cache entry for {} failed to decode: {}", full_key, e);
                        self.metrics
                            .errors_serialization
                            .fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }

        self.metrics.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    async fn store_typed<T: serde::Serialize>(
        &self,
        full_key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        match serde_json::to_value(value) {
            Ok(json) => {
                self.memory.insert(full_key.to_string(), json);
            }
            Err(e) => {
                warn!("failed to serialize entry for {}: {}", full_key, e);
                self.metrics
                    .errors_serialization
                    .fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }

        if !self.should_use_remote() {
            return true;
        }
        let bytes = match codec::encode(value, self.compression_threshold) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to encode entry for {}: {}", full_key, e);
                self.metrics
                    .errors_serialization
                    .fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };
        self.remote_set_raw(full_key, bytes, ttl.unwrap_or(self.default_ttl))
            .await
    }

    // ------------------------------------------------------------------
    // Generic analysis-result caching
    // ------------------------------------------------------------------

    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let started = Instant::now();
        self.metrics.ops_get.fetch_add(1, Ordering::Relaxed);
        let result = self
            .fetch_typed::<serde_json::Value>(&self.make_key(ANALYSIS_NS, key))
            .await;
        self.metrics
            .record_total(started.elapsed().as_secs_f64() * 1000.0);
        result
    }

    pub async fn set(&self, key: &str, value: &serde_json::Value, ttl: Option<Duration>) -> bool {
        self.metrics.ops_set.fetch_add(1, Ordering::Relaxed);
        self.store_typed(&self.make_key(ANALYSIS_NS, key), value, ttl)
            .await
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.metrics.ops_delete.fetch_add(1, Ordering::Relaxed);
        let full_key = self.make_key(ANALYSIS_NS, key);
        self.memory.remove(&full_key);

        if !self.should_use_remote() {
            return true;
        }
        let Some(remote) = self.remote.as_ref() else {
            return true;
        };
        let keys = if full_key.contains('*') {
            remote.scan_keys(&full_key).await.unwrap_or_default()
        } else {
            vec![full_key]
        };
        match remote.delete(&keys).await {
            Ok(_) => true,
            Err(e) => {
                warn!("remote delete failed: {}", e);
                self.metrics.errors_remote.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // File-identity validation and per-file payloads
    // ------------------------------------------------------------------

    /// True only when the remote tier holds metadata for this path and
    /// the stored (mtime, size, hash) triple equals the file's current
    /// identity.
    pub async fn is_file_cached_and_valid(&self, path: &Path) -> bool {
        if !self.should_use_remote() {
            return false;
        }
        let key = self.make_key(META_NS, &path.to_string_lossy());
        let Some(bytes) = self.remote_get_raw(&key).await else {
            return false;
        };
        let Ok(stored) = codec::decode::<FileMetadata>(&bytes) else {
            return false;
        };
        let Ok(current) = FileMetadata::from_path(path) else {
            return false;
        };
        stored.modification_time == current.modification_time
            && stored.size == current.size
            && stored.content_hash == current.content_hash
    }

    pub async fn set_file_metadata(&self, metadata: &FileMetadata) -> bool {
        if !self.should_use_remote() {
            return false;
        }
        let key = self.make_key(META_NS, &metadata.file_path);
        match codec::encode(metadata, self.compression_threshold) {
            Ok(bytes) => self.remote_set_raw(&key, bytes, self.default_ttl).await,
            Err(e) => {
                warn!("failed to encode metadata for {}: {}", metadata.file_path, e);
                false
            }
        }
    }

    pub async fn get_file_nodes(&self, path: &str) -> Option<Vec<UniversalNode>> {
        self.metrics.ops_get.fetch_add(1, Ordering::Relaxed);
        self.fetch_typed(&self.make_key(NODES_NS, path)).await
    }

    /// Cache a file's nodes and refresh its identity metadata.
    pub async fn set_file_nodes(&self, path: &str, nodes: &[UniversalNode]) -> bool {
        self.metrics.ops_set.fetch_add(1, Ordering::Relaxed);
        if let Ok(metadata) = FileMetadata::from_path(Path::new(path)) {
            self.set_file_metadata(&metadata).await;
        }
        self.store_typed(&self.make_key(NODES_NS, path), &nodes.to_vec(), None)
            .await
    }

    pub async fn get_file_relationships(&self, path: &str) -> Option<Vec<UniversalRelationship>> {
        self.metrics.ops_get.fetch_add(1, Ordering::Relaxed);
        self.fetch_typed(&self.make_key(EDGES_NS, path)).await
    }

    pub async fn set_file_relationships(
        &self,
        path: &str,
        relationships: &[UniversalRelationship],
    ) -> bool {
        self.metrics.ops_set.fetch_add(1, Ordering::Relaxed);
        self.store_typed(
            &self.make_key(EDGES_NS, path),
            &relationships.to_vec(),
            None,
        )
        .await
    }

    /// Drop every cache entry tied to a file: memory keys containing the
    /// path, the file's three namespaces, and analysis entries that
    /// mention the path. Returns the number of entries removed.
    pub async fn invalidate_file(&self, path: &str) -> usize {
        let memory_keys: Vec<String> = self
            .memory
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| key.contains(path))
            .collect();
        let mut removed = memory_keys.len();
        for key in memory_keys {
            self.memory.remove(&key);
        }

        if self.should_use_remote() {
            if let Some(remote) = self.remote.as_ref() {
                let mut keys = vec![
                    self.make_key(NODES_NS, path),
                    self.make_key(EDGES_NS, path),
                    self.make_key(META_NS, path),
                ];
                let analysis_pattern = format!("{}:{}:*{}*", self.prefix, ANALYSIS_NS, path);
                keys.extend(remote.scan_keys(&analysis_pattern).await.unwrap_or_default());
                match remote.delete(&keys).await {
                    Ok(count) => removed += count,
                    Err(e) => {
                        warn!("remote invalidation failed for {}: {}", path, e);
                        self.metrics.errors_remote.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }

        info!("invalidated {} cache entries for {}", removed, path);
        removed
    }

    /// Wipe every entry under the project prefix, both tiers.
    pub async fn clear_all(&self) -> bool {
        self.memory.clear();

        if !self.should_use_remote() {
            return true;
        }
        let Some(remote) = self.remote.as_ref() else {
            return true;
        };
        let pattern = format!("{}:*", self.prefix);
        match remote.scan_keys(&pattern).await {
            Ok(keys) => match remote.delete(&keys).await {
                Ok(count) => {
                    info!("cleared {} remote cache entries", count);
                    true
                }
                Err(e) => {
                    warn!("remote clear failed: {}", e);
                    false
                }
            },
            Err(e) => {
                warn!("remote scan failed during clear: {}", e);
                false
            }
        }
    }

    /// Paths that currently have cached identity metadata.
    pub async fn cached_files(&self) -> Vec<String> {
        if !self.should_use_remote() {
            return Vec::new();
        }
        let Some(remote) = self.remote.as_ref() else {
            return Vec::new();
        };
        let prefix = format!("{}:{}:", self.prefix, META_NS);
        remote
            .scan_keys(&format!("{}*", prefix))
            .await
            .unwrap_or_default()
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(|s| s.to_string()))
            .collect()
    }

    /// Entry counts per namespace on the remote tier.
    pub async fn estimate_cache_size(&self) -> HashMap<String, usize> {
        let mut sizes = HashMap::new();
        if !self.should_use_remote() {
            return sizes;
        }
        let Some(remote) = self.remote.as_ref() else {
            return sizes;
        };
        for namespace in [NODES_NS, EDGES_NS, ANALYSIS_NS, META_NS] {
            let pattern = format!("{}:{}:*", self.prefix, namespace);
            let count = remote.scan_keys(&pattern).await.map(|k| k.len()).unwrap_or(0);
            sizes.insert(namespace.to_string(), count);
        }
        sizes
    }

    pub fn get_cache_stats(&self) -> CacheStatsReport {
        let strategy = match *self.strategy.lock() {
            CacheStrategy::MemoryOnly => "memory_only",
            CacheStrategy::RemoteOnly => "remote_only",
            CacheStrategy::Hybrid => "hybrid",
            CacheStrategy::RemoteFallback => "remote_fallback",
        };
        self.metrics.report(
            strategy,
            self.remote_available.load(Ordering::SeqCst),
            self.memory.len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemoteCache;
    use seamgraph_core::{Location, NodeType, RelationshipType};
    use std::io::Write;

    fn hybrid_with_memory_remote() -> HybridCacheManager {
        HybridCacheManager::new(
            &CacheSettings::default(),
            Some(Arc::new(MemoryRemoteCache::new())),
        )
    }

    fn sample_node(path: &str) -> UniversalNode {
        UniversalNode::new(
            format!("function:{}:f:1", path),
            "f",
            NodeType::Function,
            Location::new(path, 1, 2, "Python"),
        )
    }

    #[tokio::test]
    async fn get_populates_memory_from_remote() {
        let cache = hybrid_with_memory_remote();
        cache.initialize().await.unwrap();

        cache.set("deps", &serde_json::json!({"n": 1}), None).await;
        // Simulate a fresh process: the memory tier is empty.
        cache.memory.clear();

        assert_eq!(
            cache.get("deps").await,
            Some(serde_json::json!({"n": 1}))
        );
        let stats = cache.get_cache_stats();
        assert_eq!(stats.hits_remote, 1);

        // Second read is an L1 hit.
        cache.get("deps").await;
        assert_eq!(cache.get_cache_stats().hits_memory, 1);
    }

    #[tokio::test]
    async fn memory_only_never_reports_valid_files() {
        let settings = CacheSettings {
            strategy: CacheStrategy::MemoryOnly,
            ..CacheSettings::default()
        };
        let cache = HybridCacheManager::new(&settings, None);
        cache.initialize().await.unwrap();

        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "def f(): pass").unwrap();
        assert!(!cache.is_file_cached_and_valid(tmp.path()).await);
    }

    #[tokio::test]
    async fn remote_fallback_downgrades_when_unconfigured() {
        let settings = CacheSettings {
            strategy: CacheStrategy::RemoteFallback,
            ..CacheSettings::default()
        };
        let cache = HybridCacheManager::new(&settings, None);
        assert!(cache.initialize().await.unwrap());
        assert_eq!(cache.get_cache_stats().strategy, "memory_only");
    }

    #[tokio::test]
    async fn remote_only_without_backend_is_an_error() {
        let settings = CacheSettings {
            strategy: CacheStrategy::RemoteOnly,
            ..CacheSettings::default()
        };
        let cache = HybridCacheManager::new(&settings, None);
        assert!(cache.initialize().await.is_err());
    }

    #[tokio::test]
    async fn file_identity_validation_tracks_content_changes() {
        let cache = hybrid_with_memory_remote();
        cache.initialize().await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mod.py");
        std::fs::write(&file, "def f(): pass\n").unwrap();
        let path_str = file.to_string_lossy().to_string();

        assert!(!cache.is_file_cached_and_valid(&file).await);
        cache
            .set_file_nodes(&path_str, &[sample_node(&path_str)])
            .await;
        assert!(cache.is_file_cached_and_valid(&file).await);

        std::fs::write(&file, "def f(): pass\n\ndef g(): pass\n").unwrap();
        assert!(!cache.is_file_cached_and_valid(&file).await);
    }

    #[tokio::test]
    async fn file_payloads_round_trip_with_enum_strings() {
        let cache = hybrid_with_memory_remote();
        cache.initialize().await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mod.py");
        std::fs::write(&file, "def f(): pass\n").unwrap();
        let path_str = file.to_string_lossy().to_string();

        let node = sample_node(&path_str);
        let edge = UniversalRelationship::new(
            format!("contains:{}:x", path_str),
            format!("file:{}", path_str),
            node.id.clone(),
            RelationshipType::Contains,
        );
        cache.set_file_nodes(&path_str, &[node.clone()]).await;
        cache
            .set_file_relationships(&path_str, &[edge.clone()])
            .await;

        let nodes = cache.get_file_nodes(&path_str).await.unwrap();
        assert_eq!(nodes, vec![node]);
        let edges = cache.get_file_relationships(&path_str).await.unwrap();
        assert_eq!(edges, vec![edge]);
    }

    #[tokio::test]
    async fn invalidate_file_clears_every_namespace_and_mentions() {
        let cache = hybrid_with_memory_remote();
        cache.initialize().await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mod.py");
        std::fs::write(&file, "def f(): pass\n").unwrap();
        let path_str = file.to_string_lossy().to_string();

        cache
            .set_file_nodes(&path_str, &[sample_node(&path_str)])
            .await;
        cache.set_file_relationships(&path_str, &[]).await;
        cache
            .set(
                &format!("complexity:{}", path_str),
                &serde_json::json!(3),
                None,
            )
            .await;
        cache.set("unrelated", &serde_json::json!(1), None).await;

        let removed = cache.invalidate_file(&path_str).await;
        assert!(removed >= 4);
        assert!(cache.get_file_nodes(&path_str).await.is_none());
        assert!(!cache.is_file_cached_and_valid(&file).await);
        assert_eq!(cache.get("unrelated").await, Some(serde_json::json!(1)));
    }

    #[tokio::test]
    async fn clear_all_wipes_the_project_prefix() {
        let cache = hybrid_with_memory_remote();
        cache.initialize().await.unwrap();

        cache.set("a", &serde_json::json!(1), None).await;
        cache.set("b", &serde_json::json!(2), None).await;
        assert!(cache.clear_all().await);
        assert!(cache.get("a").await.is_none());
        assert!(cache.estimate_cache_size().await["analysis"] == 0);
    }

    #[tokio::test]
    async fn cached_files_lists_paths_with_metadata() {
        let cache = hybrid_with_memory_remote();
        cache.initialize().await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tracked.py");
        std::fs::write(&file, "def f(): pass\n").unwrap();
        let path_str = file.to_string_lossy().to_string();

        cache
            .set_file_nodes(&path_str, &[sample_node(&path_str)])
            .await;
        assert_eq!(cache.cached_files().await, vec![path_str]);
    }
}
