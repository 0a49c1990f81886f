use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// An external graph database reachable over a bolt-style connection and
/// queried in a Cypher-like dialect. Node and relationship writes must be
/// idempotent (MERGE semantics) so replayed CDC batches are safe.
#[async_trait]
pub trait ExternalGraphStore: Send + Sync {
    /// Run a query and return its rows as loosely-typed maps.
    async fn execute(
        &self,
        query: &str,
        params: HashMap<String, serde_json::Value>,
    ) -> Result<Vec<HashMap<String, serde_json::Value>>>;

    /// Cheap liveness probe.
    async fn is_healthy(&self) -> bool;
}
