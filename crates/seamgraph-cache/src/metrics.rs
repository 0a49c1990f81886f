use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

const TIMING_WINDOW: usize = 100;

/// Lock-light counters plus bounded timing rings for cache operations.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub hits_memory: AtomicU64,
    pub hits_remote: AtomicU64,
    pub misses: AtomicU64,
    pub ops_get: AtomicU64,
    pub ops_set: AtomicU64,
    pub ops_delete: AtomicU64,
    pub errors_remote: AtomicU64,
    pub errors_serialization: AtomicU64,
    remote_get_ms: Mutex<VecDeque<f64>>,
    remote_set_ms: Mutex<VecDeque<f64>>,
    total_ms: Mutex<VecDeque<f64>>,
}

impl CacheMetrics {
    pub fn record_remote_get(&self, ms: f64) {
        Self::push_sample(&self.remote_get_ms, ms);
    }

    pub fn record_remote_set(&self, ms: f64) {
        Self::push_sample(&self.remote_set_ms, ms);
    }

    pub fn record_total(&self, ms: f64) {
        Self::push_sample(&self.total_ms, ms);
    }

    fn push_sample(ring: &Mutex<VecDeque<f64>>, ms: f64) {
        let mut ring = ring.lock();
        if ring.len() >= TIMING_WINDOW {
            ring.pop_front();
        }
        ring.push_back(ms);
    }

    fn average(ring: &Mutex<VecDeque<f64>>) -> f64 {
        let ring = ring.lock();
        if ring.is_empty() {
            0.0
        } else {
            ring.iter().sum::<f64>() / ring.len() as f64
        }
    }

    pub fn report(&self, strategy: &str, remote_available: bool, memory_keys: usize) -> CacheStatsReport {
        let hits_memory = self.hits_memory.load(Ordering::Relaxed);
        let hits_remote = self.hits_remote.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits_memory + hits_remote + misses;

        CacheStatsReport {
            strategy: strategy.to_string(),
            remote_available,
            memory_keys,
            hits_memory,
            hits_remote,
            misses,
            hit_rate: if total > 0 {
                (hits_memory + hits_remote) as f64 / total as f64
            } else {
                0.0
            },
            ops_get: self.ops_get.load(Ordering::Relaxed),
            ops_set: self.ops_set.load(Ordering::Relaxed),
            ops_delete: self.ops_delete.load(Ordering::Relaxed),
            errors_remote: self.errors_remote.load(Ordering::Relaxed),
            errors_serialization: self.errors_serialization.load(Ordering::Relaxed),
            avg_remote_get_ms: Self::average(&self.remote_get_ms),
            avg_remote_set_ms: Self::average(&self.remote_set_ms),
            avg_total_ms: Self::average(&self.total_ms),
        }
    }
}

/// Snapshot exposed by `get_cache_stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsReport {
    pub strategy: String,
    pub remote_available: bool,
    pub memory_keys: usize,
    pub hits_memory: u64,
    pub hits_remote: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub ops_get: u64,
    pub ops_set: u64,
    pub ops_delete: u64,
    pub errors_remote: u64,
    pub errors_serialization: u64,
    pub avg_remote_get_ms: f64,
    pub avg_remote_set_ms: f64,
    pub avg_total_ms: f64,
}
