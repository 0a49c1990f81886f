use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use seamgraph_core::{
    GraphSettings, NodeType, RelationshipType, Result, SeamGraphError, UniversalNode,
    UniversalRelationship,
};
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

const NAME_CACHE_CAPACITY: usize = 10_000;

/// A structural change to the graph, emitted after the mutation commits.
/// The analysis layer converts these into CDC events; at most one
/// mutation record is produced per graph change.
#[derive(Debug, Clone)]
pub enum GraphMutation {
    NodeAdded(UniversalNode),
    NodeRemoved(String),
    RelationshipAdded(UniversalRelationship),
    RelationshipRemoved(String),
    Cleared,
}

pub(crate) struct NodeRecord {
    pub node: UniversalNode,
    pub index: NodeIndex,
}

pub(crate) struct EdgeRecord {
    pub relationship: UniversalRelationship,
    pub index: EdgeIndex,
}

#[derive(Default)]
pub(crate) struct GraphInner {
    /// Arena storage. Node payloads are external node ids, edge payloads
    /// are external relationship ids; the reverse direction lives on the
    /// records, so no separate handle-to-id map can drift.
    pub arena: StableDiGraph<String, String>,
    pub nodes: HashMap<String, NodeRecord>,
    pub relationships: HashMap<String, EdgeRecord>,
    pub nodes_by_type: HashMap<NodeType, HashSet<String>>,
    pub nodes_by_language: HashMap<String, HashSet<String>>,
    pub file_to_nodes: HashMap<String, HashSet<String>>,
    pub processed_files: HashSet<String>,
}

#[derive(Debug, Clone)]
pub(crate) enum MemoValue {
    Scores(HashMap<String, f64>),
    IdGroups(Vec<Vec<String>>),
    Path(Vec<String>),
    Matrix(HashMap<String, HashMap<String, f64>>),
}

pub(crate) struct MemoCache {
    generation: u64,
    entries: HashMap<String, MemoValue>,
}

/// Per-project graph statistics.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct GraphStatistics {
    pub total_nodes: usize,
    pub total_relationships: usize,
    pub total_files: usize,
    pub node_types: HashMap<String, usize>,
    pub languages: HashMap<String, usize>,
    pub relationship_types: HashMap<String, usize>,
}

/// Thread-safe, index-addressed directed code graph.
///
/// A single reader-writer lock guards the storage: read-only queries run
/// concurrently, mutations serialize behind the write path. Every
/// structural change bumps the generation counter, which lazily discards
/// memoized algorithm results and cached name lookups.
pub struct UniversalGraph {
    pub(crate) inner: RwLock<GraphInner>,
    generation: AtomicU64,
    pub(crate) recursion_patterns: Vec<String>,
    pub(crate) memo: Mutex<MemoCache>,
    name_cache: Mutex<LruCache<(String, bool), (u64, Vec<String>)>>,
    mutation_tx: Mutex<Option<UnboundedSender<GraphMutation>>>,
}

impl Default for UniversalGraph {
    fn default() -> Self {
        Self::new(&GraphSettings::default())
    }
}

impl UniversalGraph {
    pub fn new(settings: &GraphSettings) -> Self {
        Self {
            inner: RwLock::new(GraphInner::default()),
            generation: AtomicU64::new(0),
            recursion_patterns: settings.recursion_name_patterns.clone(),
            memo: Mutex::new(MemoCache {
                generation: 0,
                entries: HashMap::new(),
            }),
            name_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(NAME_CACHE_CAPACITY).unwrap(),
            )),
            mutation_tx: Mutex::new(None),
        }
    }

    /// Wire a channel that receives one record per committed mutation.
    pub fn set_mutation_sender(&self, tx: UnboundedSender<GraphMutation>) {
        *self.mutation_tx.lock() = Some(tx);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn emit(&self, mutation: GraphMutation) {
        if let Some(tx) = self.mutation_tx.lock().as_ref() {
            let _ = tx.send(mutation);
        }
    }

    // ------------------------------------------------------------------
    // CRUD
    // ------------------------------------------------------------------

    /// Insert a node. Re-inserting an existing id replaces the node
    /// in-place: the previous node and its edges are dropped from the
    /// arena and the new node gets a fresh handle.
    pub fn add_node(&self, node: UniversalNode) {
        {
            let mut inner = self.inner.write();
            if inner.nodes.contains_key(&node.id) {
                debug!("node {} already exists, replacing", node.id);
                Self::remove_node_locked(&mut inner, &node.id);
            }

            let index = inner.arena.add_node(node.id.clone());

            inner
                .nodes_by_type
                .entry(node.node_type)
                .or_default()
                .insert(node.id.clone());
            if !node.language.is_empty() {
                inner
                    .nodes_by_language
                    .entry(node.language.clone())
                    .or_default()
                    .insert(node.id.clone());
            }
            inner
                .file_to_nodes
                .entry(node.location.file_path.clone())
                .or_default()
                .insert(node.id.clone());

            inner.nodes.insert(
                node.id.clone(),
                NodeRecord {
                    node: node.clone(),
                    index,
                },
            );
        }
        self.touch();
        self.emit(GraphMutation::NodeAdded(node));
    }

    /// Insert an edge. If either endpoint is absent the edge is dropped
    /// with a debug log and is not retried when the node arrives later.
    pub fn add_relationship(&self, relationship: UniversalRelationship) {
        let added = {
            let mut inner = self.inner.write();

            let source_index = match inner.nodes.get(&relationship.source_id) {
                Some(record) => record.index,
                None => {
                    debug!(
                        "dropping relationship {}: missing source {}",
                        relationship.id, relationship.source_id
                    );
                    return;
                }
            };
            let target_index = match inner.nodes.get(&relationship.target_id) {
                Some(record) => record.index,
                None => {
                    debug!(
                        "dropping relationship {}: missing target {}",
                        relationship.id, relationship.target_id
                    );
                    return;
                }
            };

            if inner.relationships.contains_key(&relationship.id) {
                debug!("relationship {} already exists, replacing", relationship.id);
                Self::remove_relationship_locked(&mut inner, &relationship.id);
            }

            let index = inner
                .arena
                .add_edge(source_index, target_index, relationship.id.clone());
            inner.relationships.insert(
                relationship.id.clone(),
                EdgeRecord {
                    relationship: relationship.clone(),
                    index,
                },
            );
            true
        };
        if added {
            self.touch();
            self.emit(GraphMutation::RelationshipAdded(relationship));
        }
    }

    /// Create a SEAM edge between two nodes in different languages.
    pub fn create_seam(&self, source_id: &str, target_id: &str) -> Result<UniversalRelationship> {
        let (source_lang, target_lang) = {
            let inner = self.inner.read();
            let source = inner
                .nodes
                .get(source_id)
                .ok_or_else(|| SeamGraphError::NotFound(source_id.to_string()))?;
            let target = inner
                .nodes
                .get(target_id)
                .ok_or_else(|| SeamGraphError::NotFound(target_id.to_string()))?;
            (source.node.language.clone(), target.node.language.clone())
        };

        if source_lang == target_lang {
            return Err(SeamGraphError::InvalidInput(format!(
                "seam endpoints share language {}",
                source_lang
            )));
        }

        let relationship = UniversalRelationship::new(
            format!("seam:{}:{}", source_id, target_id),
            source_id,
            target_id,
            RelationshipType::Seam,
        )
        .with_metadata("source_language", source_lang)
        .with_metadata("target_language", target_lang);

        self.add_relationship(relationship.clone());
        Ok(relationship)
    }

    fn remove_relationship_locked(inner: &mut GraphInner, relationship_id: &str) {
        if let Some(record) = inner.relationships.remove(relationship_id) {
            inner.arena.remove_edge(record.index);
        }
    }

    fn remove_node_locked(inner: &mut GraphInner, node_id: &str) -> Vec<String> {
        let Some(record) = inner.nodes.remove(node_id) else {
            return Vec::new();
        };
        let node = record.node;

        // Incident edges drop with the arena entry; collect their ids
        // first so the relationship map stays consistent.
        let mut dropped_edges: Vec<String> = Vec::new();
        for direction in [Direction::Outgoing, Direction::Incoming] {
            for edge in inner.arena.edges_directed(record.index, direction) {
                dropped_edges.push(edge.weight().clone());
            }
        }
        for edge_id in &dropped_edges {
            inner.relationships.remove(edge_id);
        }
        inner.arena.remove_node(record.index);

        if let Some(ids) = inner.nodes_by_type.get_mut(&node.node_type) {
            ids.remove(node_id);
        }
        if let Some(ids) = inner.nodes_by_language.get_mut(&node.language) {
            ids.remove(node_id);
        }
        if let Some(ids) = inner.file_to_nodes.get_mut(&node.location.file_path) {
            ids.remove(node_id);
        }

        dropped_edges
    }

    /// Remove every node whose `location.file_path` equals `path` and
    /// drop the path from the processed-files set. Returns the number of
    /// nodes removed.
    pub fn remove_file_nodes(&self, path: &str) -> usize {
        let (removed_nodes, removed_edges) = {
            let mut inner = self.inner.write();
            let Some(ids) = inner.file_to_nodes.remove(path) else {
                inner.processed_files.remove(path);
                return 0;
            };

            let mut removed_edges = Vec::new();
            let mut removed_nodes = Vec::new();
            for node_id in ids {
                if inner.nodes.contains_key(&node_id) {
                    removed_edges.extend(Self::remove_node_locked(&mut inner, &node_id));
                    removed_nodes.push(node_id);
                }
            }
            inner.processed_files.remove(path);
            (removed_nodes, removed_edges)
        };

        if removed_nodes.is_empty() && removed_edges.is_empty() {
            return 0;
        }

        self.touch();
        debug!("removed {} nodes from file {}", removed_nodes.len(), path);
        for edge_id in removed_edges {
            self.emit(GraphMutation::RelationshipRemoved(edge_id));
        }
        let count = removed_nodes.len();
        for node_id in removed_nodes {
            self.emit(GraphMutation::NodeRemoved(node_id));
        }
        count
    }

    /// Wipe the arena, all maps and indexes. The generation counter keeps
    /// increasing so stale memoized results can never be observed.
    pub fn clear(&self) {
        {
            let mut inner = self.inner.write();
            info!(
                "clearing graph: {} nodes, {} relationships, {} files",
                inner.nodes.len(),
                inner.relationships.len(),
                inner.processed_files.len()
            );
            *inner = GraphInner::default();
        }
        self.touch();
        self.emit(GraphMutation::Cleared);
    }

    // ------------------------------------------------------------------
    // Processed-file tracking
    // ------------------------------------------------------------------

    pub fn mark_file_processed(&self, path: &str) {
        self.inner.write().processed_files.insert(path.to_string());
    }

    pub fn is_file_processed(&self, path: &str) -> bool {
        self.inner.read().processed_files.contains(path)
    }

    pub fn processed_files(&self) -> HashSet<String> {
        self.inner.read().processed_files.clone()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn get_node(&self, node_id: &str) -> Option<UniversalNode> {
        self.inner
            .read()
            .nodes
            .get(node_id)
            .map(|record| record.node.clone())
    }

    pub fn get_relationship(&self, relationship_id: &str) -> Option<UniversalRelationship> {
        self.inner
            .read()
            .relationships
            .get(relationship_id)
            .map(|record| record.relationship.clone())
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.inner.read().relationships.len()
    }

    /// Name lookup over the full node map. Exact or case-insensitive
    /// substring matching; results are cached per generation in a
    /// bounded LRU.
    pub fn find_nodes_by_name(&self, name: &str, exact: bool) -> Vec<UniversalNode> {
        let generation = self.generation();
        let key = (name.to_string(), exact);

        if let Some((cached_gen, ids)) = self.name_cache.lock().get(&key) {
            if *cached_gen == generation {
                let inner = self.inner.read();
                return ids
                    .iter()
                    .filter_map(|id| inner.nodes.get(id).map(|r| r.node.clone()))
                    .collect();
            }
        }

        let needle = name.to_lowercase();
        let inner = self.inner.read();
        let mut results = Vec::new();
        for record in inner.nodes.values() {
            let matched = if exact {
                record.node.name == name
            } else {
                record.node.name.to_lowercase().contains(&needle)
            };
            if matched {
                results.push(record.node.clone());
            }
        }
        drop(inner);

        let ids = results.iter().map(|n| n.id.clone()).collect();
        self.name_cache.lock().put(key, (generation, ids));
        results
    }

    pub fn get_nodes_by_type(&self, node_type: NodeType) -> Vec<UniversalNode> {
        let inner = self.inner.read();
        inner
            .nodes_by_type
            .get(&node_type)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.nodes.get(id).map(|r| r.node.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_nodes_by_language(&self, language: &str) -> Vec<UniversalNode> {
        let inner = self.inner.read();
        inner
            .nodes_by_language
            .get(language)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.nodes.get(id).map(|r| r.node.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_relationships_from(&self, node_id: &str) -> Vec<UniversalRelationship> {
        self.relationships_directed(node_id, Direction::Outgoing)
    }

    pub fn get_relationships_to(&self, node_id: &str) -> Vec<UniversalRelationship> {
        self.relationships_directed(node_id, Direction::Incoming)
    }

    fn relationships_directed(&self, node_id: &str, direction: Direction) -> Vec<UniversalRelationship> {
        let inner = self.inner.read();
        let Some(record) = inner.nodes.get(node_id) else {
            return Vec::new();
        };
        inner
            .arena
            .edges_directed(record.index, direction)
            .filter_map(|edge| {
                inner
                    .relationships
                    .get(edge.weight())
                    .map(|r| r.relationship.clone())
            })
            .collect()
    }

    pub fn get_relationships_by_type(
        &self,
        relationship_type: RelationshipType,
    ) -> Vec<UniversalRelationship> {
        self.inner
            .read()
            .relationships
            .values()
            .filter(|record| record.relationship.relationship_type == relationship_type)
            .map(|record| record.relationship.clone())
            .collect()
    }

    pub fn get_seam_relationships(&self) -> Vec<UniversalRelationship> {
        self.get_relationships_by_type(RelationshipType::Seam)
    }

    pub fn all_nodes(&self) -> Vec<UniversalNode> {
        self.inner
            .read()
            .nodes
            .values()
            .map(|record| record.node.clone())
            .collect()
    }

    pub fn all_relationships(&self) -> Vec<UniversalRelationship> {
        self.inner
            .read()
            .relationships
            .values()
            .map(|record| record.relationship.clone())
            .collect()
    }

    pub fn get_statistics(&self) -> GraphStatistics {
        let inner = self.inner.read();

        let mut node_types = HashMap::new();
        for (node_type, ids) in &inner.nodes_by_type {
            node_types.insert(node_type.to_string(), ids.len());
        }

        let mut languages = HashMap::new();
        for (language, ids) in &inner.nodes_by_language {
            languages.insert(language.clone(), ids.len());
        }

        let mut relationship_types = HashMap::new();
        for record in inner.relationships.values() {
            *relationship_types
                .entry(record.relationship.relationship_type.to_string())
                .or_insert(0) += 1;
        }

        GraphStatistics {
            total_nodes: inner.nodes.len(),
            total_relationships: inner.relationships.len(),
            total_files: inner.processed_files.len(),
            node_types,
            languages,
            relationship_types,
        }
    }

    // ------------------------------------------------------------------
    // Memoization keyed by generation
    // ------------------------------------------------------------------

    pub(crate) fn memo_get(&self, key: &str) -> Option<MemoValue> {
        let generation = self.generation();
        let mut memo = self.memo.lock();
        if memo.generation != generation {
            memo.entries.clear();
            memo.generation = generation;
            return None;
        }
        memo.entries.get(key).cloned()
    }

    /// Store a memoized result computed at `generation`. Results from a
    /// superseded generation are discarded instead of stored.
    pub(crate) fn memo_put(&self, generation: u64, key: String, value: MemoValue) {
        if self.generation() != generation {
            return;
        }
        let mut memo = self.memo.lock();
        if memo.generation != generation {
            memo.entries.clear();
            memo.generation = generation;
        }
        memo.entries.insert(key, value);
    }
}
