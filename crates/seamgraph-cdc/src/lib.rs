pub mod backend;
pub mod event;
pub mod manager;
pub mod sync;

pub use backend::{CdcBackend, MemoryCdcBackend, RedisCdcBackend, StreamInfo, Subscription};
pub use event::{CdcEvent, CdcEventType};
pub use manager::{CdcManager, EventHandler};
pub use sync::{ExternalStoreSync, Neo4jGraphStore, SyncStatistics};
