pub mod codec;
pub mod manager;
pub mod metrics;
pub mod remote;

pub use manager::HybridCacheManager;
pub use metrics::{CacheMetrics, CacheStatsReport};
pub use remote::{MemoryRemoteCache, RedisRemoteCache, RemoteCache};
