use crate::backend::{CdcBackend, StreamInfo, Subscription};
use crate::event::{CdcEvent, CdcEventType};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use seamgraph_core::{Result, UniversalNode, UniversalRelationship};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Locally registered event handler. Handlers run isolated: one
/// handler's panic or error does not affect the others.
pub type EventHandler = Arc<dyn Fn(CdcEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Publishes graph-mutation events to the durable stream and the
/// fan-out topic, and dispatches locally registered handlers. With no
/// backend configured the manager is a no-op publisher, but local
/// handlers still fire.
pub struct CdcManager {
    backend: Option<Arc<dyn CdcBackend>>,
    handlers: RwLock<HashMap<CdcEventType, Vec<EventHandler>>>,
}

impl CdcManager {
    pub fn new(backend: Option<Arc<dyn CdcBackend>>) -> Self {
        Self {
            backend,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Register a handler for one event type.
    pub fn on_event(&self, event_type: CdcEventType, handler: EventHandler) {
        self.handlers
            .write()
            .entry(event_type)
            .or_default()
            .push(handler);
    }

    /// Append to the stream, publish the compact notification, then run
    /// local handlers. Producer-side failures are logged and swallowed;
    /// the stream is authoritative for consumers.
    pub async fn publish_event(&self, event: CdcEvent) {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.append(event.to_redis_format()).await {
                error!("failed to append CDC event: {}", e);
            }
            if let Err(e) = backend.notify(event.to_notification()).await {
                error!("failed to publish CDC notification: {}", e);
            }
            debug!("CDC event published: {}", event.event_type);
        }

        self.dispatch_handlers(event).await;
    }

    async fn dispatch_handlers(&self, event: CdcEvent) {
        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();

        let event_type = event.event_type;
        for handler in handlers {
            let event = event.clone();
            // Spawned so a panicking handler cannot take down the rest.
            let task = tokio::spawn(async move { handler(event).await });
            if let Err(e) = task.await {
                error!("CDC handler failed for {}: {}", event_type, e);
            }
        }
    }

    // ------------------------------------------------------------------
    // Convenience publishers
    // ------------------------------------------------------------------

    pub async fn publish_node_added(&self, node: &UniversalNode) {
        let data = serde_json::to_value(node).unwrap_or_default();
        self.publish_event(CdcEvent::new(
            CdcEventType::NodeAdded,
            node.id.clone(),
            "node",
            data,
        ))
        .await;
    }

    pub async fn publish_node_deleted(&self, node_id: &str) {
        self.publish_event(CdcEvent::new(
            CdcEventType::NodeDeleted,
            node_id,
            "node",
            serde_json::json!({ "node_id": node_id }),
        ))
        .await;
    }

    pub async fn publish_relationship_added(&self, relationship: &UniversalRelationship) {
        let data = serde_json::to_value(relationship).unwrap_or_default();
        self.publish_event(CdcEvent::new(
            CdcEventType::RelationshipAdded,
            relationship.id.clone(),
            "relationship",
            data,
        ))
        .await;
    }

    pub async fn publish_relationship_deleted(&self, relationship_id: &str) {
        self.publish_event(CdcEvent::new(
            CdcEventType::RelationshipDeleted,
            relationship_id,
            "relationship",
            serde_json::json!({ "relationship_id": relationship_id }),
        ))
        .await;
    }

    pub async fn publish_graph_reset(&self) {
        self.publish_event(CdcEvent::new(
            CdcEventType::GraphReset,
            "graph",
            "metadata",
            serde_json::json!({}),
        ))
        .await;
    }

    pub async fn publish_analysis_started(&self, project_root: &str) {
        self.publish_event(CdcEvent::new(
            CdcEventType::AnalysisStarted,
            "analysis",
            "metadata",
            serde_json::json!({ "project_root": project_root }),
        ))
        .await;
    }

    pub async fn publish_analysis_progress(&self, percentage: u8, message: &str) {
        self.publish_event(CdcEvent::new(
            CdcEventType::AnalysisProgress,
            "analysis",
            "metadata",
            serde_json::json!({ "percentage": percentage, "message": message }),
        ))
        .await;
    }

    pub async fn publish_analysis_completed(
        &self,
        node_count: usize,
        edge_count: usize,
        duration_ms: f64,
    ) {
        self.publish_event(CdcEvent::new(
            CdcEventType::AnalysisCompleted,
            "analysis",
            "metadata",
            serde_json::json!({
                "node_count": node_count,
                "edge_count": edge_count,
                "duration_ms": duration_ms,
            }),
        ))
        .await;
    }

    // ------------------------------------------------------------------
    // Stream reads
    // ------------------------------------------------------------------

    /// Replay events in append order. The entry's stream id backfills a
    /// missing `event_id`.
    pub async fn read_stream(&self, start: &str, count: usize) -> Vec<CdcEvent> {
        let Some(backend) = &self.backend else {
            return Vec::new();
        };
        let entries = match backend.read_range(start, count).await {
            Ok(entries) => entries,
            Err(e) => {
                error!("failed to read CDC stream: {}", e);
                return Vec::new();
            }
        };

        let mut events = Vec::with_capacity(entries.len());
        for (stream_id, mut fields) in entries {
            if fields
                .get("event_id")
                .map(|id| id.is_empty())
                .unwrap_or(true)
            {
                fields.insert("event_id".to_string(), stream_id.clone());
            }
            match CdcEvent::from_redis_format(&fields) {
                Ok(event) => events.push(event),
                Err(e) => error!("undecodable CDC entry {}: {}", stream_id, e),
            }
        }
        events
    }

    pub async fn stream_info(&self) -> Result<StreamInfo> {
        match &self.backend {
            Some(backend) => backend.stream_info().await,
            None => Ok(StreamInfo::default()),
        }
    }

    /// Subscribe to the lossy fan-out topic. Dropping the subscription
    /// ends the loop; the manager never blocks shutdown on consumers.
    pub async fn subscribe(&self) -> Result<Option<Subscription>> {
        match &self.backend {
            Some(backend) => Ok(Some(backend.subscribe().await?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryCdcBackend;
    use seamgraph_core::{Location, NodeType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager_with_memory_backend() -> (CdcManager, Arc<MemoryCdcBackend>) {
        let backend = Arc::new(MemoryCdcBackend::new());
        (CdcManager::new(Some(backend.clone())), backend)
    }

    fn sample_node() -> UniversalNode {
        UniversalNode::new(
            "function:a.py:f:1",
            "f",
            NodeType::Function,
            Location::new("a.py", 1, 2, "Python"),
        )
    }

    #[tokio::test]
    async fn replay_returns_events_in_publish_order() {
        let (manager, _) = manager_with_memory_backend();

        manager.publish_node_added(&sample_node()).await;
        manager
            .publish_relationship_added(&UniversalRelationship::new(
                "calls:a:b",
                "a",
                "b",
                seamgraph_core::RelationshipType::Calls,
            ))
            .await;
        manager.publish_analysis_completed(2, 1, 12.5).await;

        let events = manager.read_stream("0", 10).await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type, CdcEventType::NodeAdded);
        assert_eq!(events[1].event_type, CdcEventType::RelationshipAdded);
        assert_eq!(events[2].event_type, CdcEventType::AnalysisCompleted);
        // Replayed events keep their original ids.
        assert_eq!(events[0].entity_id, "function:a.py:f:1");
        assert!(!events[0].event_id.is_empty());
    }

    #[tokio::test]
    async fn node_payloads_carry_enum_strings() {
        let (manager, _) = manager_with_memory_backend();
        manager.publish_node_added(&sample_node()).await;

        let events = manager.read_stream("0", 1).await;
        assert_eq!(events[0].data["node_type"], "function");
        assert_eq!(events[0].data["location"]["file_path"], "a.py");
    }

    #[tokio::test]
    async fn local_handlers_fire_without_a_backend() {
        let manager = CdcManager::disabled();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = seen.clone();
        manager.on_event(
            CdcEventType::NodeDeleted,
            Arc::new(move |_event| {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            }),
        );

        manager.publish_node_deleted("function:a.py:f:1").await;
        manager.publish_graph_reset().await; // no handler registered
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(manager.read_stream("0", 10).await.is_empty());
    }

    #[tokio::test]
    async fn a_panicking_handler_does_not_stop_the_rest() {
        let (manager, _) = manager_with_memory_backend();
        let seen = Arc::new(AtomicUsize::new(0));

        manager.on_event(
            CdcEventType::GraphReset,
            Arc::new(|_event| Box::pin(async { panic!("handler bug") })),
        );
        let counter = seen.clone();
        manager.on_event(
            CdcEventType::GraphReset,
            Arc::new(move |_event| {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            }),
        );

        manager.publish_graph_reset().await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fan_out_subscribers_see_compact_notifications() {
        let (manager, _) = manager_with_memory_backend();
        let mut subscription = manager.subscribe().await.unwrap().unwrap();

        manager.publish_node_deleted("n1").await;
        let payload = subscription.next().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed["event_type"], "node_deleted");
        assert_eq!(parsed["entity_id"], "n1");
    }
}
