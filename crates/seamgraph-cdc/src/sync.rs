use crate::backend::CdcBackend;
use crate::event::{CdcEvent, CdcEventType};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use seamgraph_core::{ExternalGraphStore, Result, SeamGraphError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Counters for one sync worker.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SyncStatistics {
    pub total_processed: u64,
    pub nodes_synced: u64,
    pub edges_synced: u64,
    pub errors: u64,
    pub last_id: String,
    pub timestamp: String,
}

/// Bolt-protocol graph store speaking a Cypher-like dialect.
pub struct Neo4jGraphStore {
    graph: neo4rs::Graph,
}

impl Neo4jGraphStore {
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = neo4rs::Graph::new(uri, user, password)
            .await
            .map_err(|e| SeamGraphError::ExternalStoreUnavailable(e.to_string()))?;
        info!("connected to external graph store at {}", uri);
        Ok(Self { graph })
    }
}

#[async_trait]
impl ExternalGraphStore for Neo4jGraphStore {
    async fn execute(
        &self,
        query: &str,
        params: HashMap<String, serde_json::Value>,
    ) -> Result<Vec<HashMap<String, serde_json::Value>>> {
        let mut q = neo4rs::query(query);
        for (key, value) in params {
            q = match value {
                serde_json::Value::String(s) => q.param(&key, s),
                serde_json::Value::Bool(b) => q.param(&key, b),
                serde_json::Value::Number(n) if n.is_i64() => {
                    q.param(&key, n.as_i64().unwrap_or_default())
                }
                serde_json::Value::Number(n) => q.param(&key, n.as_f64().unwrap_or_default()),
                serde_json::Value::Null => q.param(&key, ""),
                other => q.param(&key, other.to_string()),
            };
        }

        let mut stream = self
            .graph
            .execute(q)
            .await
            .map_err(|e| SeamGraphError::ExternalStoreUnavailable(e.to_string()))?;

        let mut rows = Vec::new();
        while let Some(row) = stream
            .next()
            .await
            .map_err(|e| SeamGraphError::ExternalStoreUnavailable(e.to_string()))?
        {
            match row.to::<HashMap<String, serde_json::Value>>() {
                Ok(map) => rows.push(map),
                Err(e) => warn!("undecodable external-store row: {}", e),
            }
        }
        Ok(rows)
    }

    async fn is_healthy(&self) -> bool {
        self.graph.run(neo4rs::query("RETURN 1")).await.is_ok()
    }
}

fn node_label(node_type: &str) -> &'static str {
    match node_type {
        "module" => "Module",
        "class" => "Class",
        "function" | "method" => "Function",
        "variable" => "Variable",
        "import" => "Import",
        _ => "Node",
    }
}

fn relationship_label(relationship_type: &str) -> &'static str {
    match relationship_type {
        "contains" => "CONTAINS",
        "calls" => "CALLS",
        "imports" => "IMPORTS",
        "references" => "REFERENCES",
        "inherits" => "INHERITS",
        "seam" => "SEAM",
        _ => "RELATES_TO",
    }
}

/// Translate one CDC event into an idempotent Cypher mutation. Returns
/// `None` for analysis lifecycle events, which have no store footprint.
pub fn event_to_cypher(
    event: &CdcEvent,
) -> Option<(String, HashMap<String, serde_json::Value>)> {
    match event.event_type {
        CdcEventType::NodeAdded | CdcEventType::NodeUpdated => {
            let label = node_label(event.data["node_type"].as_str().unwrap_or_default());
            let query = format!(
                "MERGE (n:{} {{id: $id}}) \
                 SET n.name = $name, n.node_type = $node_type, n.language = $language, \
                     n.file = $file, n.line = $line, n.complexity = $complexity",
                label
            );
            let params = HashMap::from([
                ("id".to_string(), serde_json::json!(event.entity_id)),
                ("name".to_string(), event.data["name"].clone()),
                ("node_type".to_string(), event.data["node_type"].clone()),
                ("language".to_string(), event.data["language"].clone()),
                (
                    "file".to_string(),
                    event.data["location"]["file_path"].clone(),
                ),
                (
                    "line".to_string(),
                    event.data["location"]["start_line"].clone(),
                ),
                (
                    "complexity".to_string(),
                    event.data["complexity"].clone(),
                ),
            ]);
            Some((query, params))
        }
        CdcEventType::NodeDeleted => Some((
            "MATCH (n {id: $id}) DETACH DELETE n".to_string(),
            HashMap::from([("id".to_string(), serde_json::json!(event.entity_id))]),
        )),
        CdcEventType::RelationshipAdded => {
            let label =
                relationship_label(event.data["relationship_type"].as_str().unwrap_or_default());
            let query = format!(
                "MATCH (source {{id: $source_id}}) \
                 MATCH (target {{id: $target_id}}) \
                 MERGE (source)-[r:{} {{id: $id}}]->(target) \
                 SET r.strength = $strength",
                label
            );
            let params = HashMap::from([
                ("id".to_string(), serde_json::json!(event.entity_id)),
                ("source_id".to_string(), event.data["source_id"].clone()),
                ("target_id".to_string(), event.data["target_id"].clone()),
                ("strength".to_string(), event.data["strength"].clone()),
            ]);
            Some((query, params))
        }
        CdcEventType::RelationshipDeleted => Some((
            "MATCH ()-[r {id: $id}]->() DELETE r".to_string(),
            HashMap::from([("id".to_string(), serde_json::json!(event.entity_id))]),
        )),
        CdcEventType::GraphReset => Some((
            "MATCH (n) DETACH DELETE n".to_string(),
            HashMap::new(),
        )),
        CdcEventType::AnalysisStarted
        | CdcEventType::AnalysisCompleted
        | CdcEventType::AnalysisProgress => None,
    }
}

/// Consumes the CDC stream from an owned offset and mirrors each event
/// into the external store. Batches apply in order; a failed event stops
/// the batch so the offset never skips past unapplied mutations, and
/// MERGE semantics make re-application safe.
pub struct ExternalStoreSync {
    backend: Arc<dyn CdcBackend>,
    store: Arc<dyn ExternalGraphStore>,
    last_id: Mutex<String>,
    stats: Mutex<SyncStatistics>,
}

impl ExternalStoreSync {
    pub fn new(backend: Arc<dyn CdcBackend>, store: Arc<dyn ExternalGraphStore>) -> Self {
        Self {
            backend,
            store,
            last_id: Mutex::new("0".to_string()),
            stats: Mutex::new(SyncStatistics::default()),
        }
    }

    pub fn statistics(&self) -> SyncStatistics {
        let mut stats = self.stats.lock().clone();
        stats.last_id = self.last_id.lock().clone();
        stats.timestamp = Utc::now().to_rfc3339();
        stats
    }

    /// Read and apply up to `max_events` events. Advances `last_id` only
    /// past successfully applied entries.
    pub async fn process_batch(&self, max_events: usize) -> Result<usize> {
        let start = self.last_id.lock().clone();
        let entries = self.backend.read_range(&start, max_events).await?;

        let mut applied = 0usize;
        for (stream_id, fields) in entries {
            let event = match CdcEvent::from_redis_format(&fields) {
                Ok(event) => event,
                Err(e) => {
                    warn!("skipping undecodable CDC entry {}: {}", stream_id, e);
                    self.stats.lock().errors += 1;
                    *self.last_id.lock() = stream_id;
                    continue;
                }
            };

            let Some((query, params)) = event_to_cypher(&event) else {
                *self.last_id.lock() = stream_id;
                continue;
            };

            match self.store.execute(&query, params).await {
                Ok(_) => {
                    let mut stats = self.stats.lock();
                    stats.total_processed += 1;
                    match event.event_type {
                        CdcEventType::NodeAdded | CdcEventType::NodeUpdated => {
                            stats.nodes_synced += 1
                        }
                        CdcEventType::RelationshipAdded => stats.edges_synced += 1,
                        _ => {}
                    }
                    drop(stats);
                    *self.last_id.lock() = stream_id;
                    applied += 1;
                }
                Err(e) => {
                    // Leave last_id untouched: the batch resumes here.
                    warn!("external store apply failed at {}: {}", stream_id, e);
                    self.stats.lock().errors += 1;
                    return Err(e);
                }
            }
        }

        debug!("sync batch applied {} events", applied);
        Ok(applied)
    }

    /// Run until `shutdown` flips to true, retrying with a fixed backoff
    /// when the store is unreachable.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>, batch_size: usize) {
        info!("external-store sync worker started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                result = self.process_batch(batch_size) => {
                    match result {
                        Ok(0) => tokio::time::sleep(Duration::from_millis(500)).await,
                        Ok(_) => {}
                        Err(e) => {
                            warn!("sync batch failed, backing off: {}", e);
                            tokio::time::sleep(RECONNECT_BACKOFF).await;
                        }
                    }
                }
            }
        }
        info!("external-store sync worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryCdcBackend;
    use crate::manager::CdcManager;
    use seamgraph_core::{
        Location, NodeType, RelationshipType, UniversalNode, UniversalRelationship,
    };

    /// Records every statement instead of talking to a real store.
    #[derive(Default)]
    struct RecordingStore {
        statements: Mutex<Vec<String>>,
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl ExternalGraphStore for RecordingStore {
        async fn execute(
            &self,
            query: &str,
            _params: HashMap<String, serde_json::Value>,
        ) -> Result<Vec<HashMap<String, serde_json::Value>>> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(SeamGraphError::ExternalStoreUnavailable("down".to_string()));
            }
            self.statements.lock().push(query.to_string());
            Ok(Vec::new())
        }

        async fn is_healthy(&self) -> bool {
            true
        }
    }

    fn sample_node() -> UniversalNode {
        UniversalNode::new(
            "function:a.py:f:1",
            "f",
            NodeType::Function,
            Location::new("a.py", 1, 2, "Python"),
        )
        .with_complexity(2)
    }

    #[test]
    fn node_events_become_merge_statements() {
        let event = CdcEvent::new(
            CdcEventType::NodeAdded,
            "function:a.py:f:1",
            "node",
            serde_json::to_value(sample_node()).unwrap(),
        );
        let (query, params) = event_to_cypher(&event).unwrap();
        assert!(query.starts_with("MERGE (n:Function {id: $id})"));
        assert_eq!(params["name"], "f");
        assert_eq!(params["line"], 1);
    }

    #[test]
    fn relationship_events_match_then_merge() {
        let rel = UniversalRelationship::new("calls:a:b", "a", "b", RelationshipType::Calls);
        let event = CdcEvent::new(
            CdcEventType::RelationshipAdded,
            rel.id.clone(),
            "relationship",
            serde_json::to_value(&rel).unwrap(),
        );
        let (query, _) = event_to_cypher(&event).unwrap();
        assert!(query.contains("MATCH (source {id: $source_id})"));
        assert!(query.contains("MERGE (source)-[r:CALLS {id: $id}]->(target)"));
    }

    #[test]
    fn analysis_events_have_no_store_footprint() {
        let event = CdcEvent::new(
            CdcEventType::AnalysisProgress,
            "analysis",
            "metadata",
            serde_json::json!({"percentage": 50}),
        );
        assert!(event_to_cypher(&event).is_none());
    }

    #[tokio::test]
    async fn worker_applies_batches_in_order_and_tracks_offset() {
        let backend = Arc::new(MemoryCdcBackend::new());
        let manager = CdcManager::new(Some(backend.clone()));
        manager.publish_node_added(&sample_node()).await;
        manager
            .publish_relationship_added(&UniversalRelationship::new(
                "calls:a:b",
                "function:a.py:f:1",
                "function:a.py:g:5",
                RelationshipType::Calls,
            ))
            .await;
        manager.publish_analysis_completed(2, 1, 3.0).await;

        let store = Arc::new(RecordingStore::default());
        let sync = ExternalStoreSync::new(backend.clone(), store.clone());

        assert_eq!(sync.process_batch(10).await.unwrap(), 2);
        let statements = store.statements.lock().clone();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("MERGE"));
        assert!(statements[1].starts_with("MATCH (source"));

        let stats = sync.statistics();
        assert_eq!(stats.nodes_synced, 1);
        assert_eq!(stats.edges_synced, 1);
        assert_eq!(stats.last_id, "0-3");

        // Nothing new: the offset holds and no statements repeat.
        assert_eq!(sync.process_batch(10).await.unwrap(), 0);
        assert_eq!(store.statements.lock().len(), 2);
    }

    #[tokio::test]
    async fn failed_apply_keeps_the_offset_for_retry() {
        let backend = Arc::new(MemoryCdcBackend::new());
        let manager = CdcManager::new(Some(backend.clone()));
        manager.publish_node_added(&sample_node()).await;

        let store = Arc::new(RecordingStore::default());
        store.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        let sync = ExternalStoreSync::new(backend.clone(), store.clone());

        assert!(sync.process_batch(10).await.is_err());
        assert_eq!(sync.statistics().last_id, "0");

        // Recovery replays the same entry; MERGE keeps it idempotent.
        store.fail.store(false, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(sync.process_batch(10).await.unwrap(), 1);
        assert_eq!(sync.statistics().last_id, "0-1");
    }
}
