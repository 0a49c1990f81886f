use crate::entry::{EntryDetector, EntryPointCandidate};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use seamgraph_cache::HybridCacheManager;
use seamgraph_cdc::CdcManager;
use seamgraph_core::{
    CallChainResponse, ExternalGraphStore, GraphStatsResponse, NodeResponse, NodeType,
    RelationshipResponse, RelationshipType, Result, SeamGraphConfig, SeamGraphError,
    SearchResultResponse, SeamResponse, TraversalResponse,
};
use seamgraph_graph::{GraphMutation, QueryRouter, UniversalGraph};
use seamgraph_parser::UniversalParser;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

static SYMBOL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

const MAX_SYMBOL_LEN: usize = 200;

/// Snapshot of the external watcher integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileWatcherStats {
    pub enabled: bool,
    pub running: bool,
    pub debounce_s: f64,
    pub batches_received: u64,
}

/// Orchestrates project analysis: walks the repository through the
/// parser, keeps the graph and caches consistent, emits CDC lifecycle
/// events, and exposes the high-level query surface.
///
/// One analysis runs at a time; change callbacks cancel any in-flight
/// run and apply an incremental update, falling back to a full
/// reanalysis on error.
pub struct AnalysisEngine {
    config: SeamGraphConfig,
    graph: Arc<UniversalGraph>,
    parser: Arc<UniversalParser>,
    cache: Option<Arc<HybridCacheManager>>,
    cdc: Arc<CdcManager>,
    router: Arc<QueryRouter>,
    detector: EntryDetector,
    analyzed: AtomicBool,
    last_analysis: Mutex<Option<DateTime<Utc>>>,
    analysis_lock: tokio::sync::Mutex<()>,
    analysis_task: Mutex<Option<AbortHandle>>,
    pump_started: AtomicBool,
    cdc_pump: Mutex<Option<AbortHandle>>,
    watcher_enabled: AtomicBool,
    watcher_running: AtomicBool,
    watch_batches: AtomicU64,
}

impl AnalysisEngine {
    pub fn new(config: SeamGraphConfig) -> Arc<Self> {
        Self::with_services(config, None, CdcManager::disabled(), None)
    }

    pub fn with_services(
        config: SeamGraphConfig,
        cache: Option<Arc<HybridCacheManager>>,
        cdc: CdcManager,
        external: Option<Arc<dyn ExternalGraphStore>>,
    ) -> Arc<Self> {
        let graph = Arc::new(UniversalGraph::new(&config.graph));
        let parser = Arc::new(UniversalParser::new(
            graph.clone(),
            cache.clone(),
            &config.parser,
        ));
        let router = Arc::new(QueryRouter::new(
            graph.clone(),
            external,
            config.router.hop_threshold,
        ));

        Arc::new(Self {
            config,
            graph,
            parser,
            cache,
            cdc: Arc::new(cdc),
            router,
            detector: EntryDetector::new(),
            analyzed: AtomicBool::new(false),
            last_analysis: Mutex::new(None),
            analysis_lock: tokio::sync::Mutex::new(()),
            analysis_task: Mutex::new(None),
            pump_started: AtomicBool::new(false),
            cdc_pump: Mutex::new(None),
            watcher_enabled: AtomicBool::new(false),
            watcher_running: AtomicBool::new(false),
            watch_batches: AtomicU64::new(0),
        })
    }

    pub fn graph(&self) -> Arc<UniversalGraph> {
        self.graph.clone()
    }

    pub fn router(&self) -> Arc<QueryRouter> {
        self.router.clone()
    }

    pub fn cdc(&self) -> Arc<CdcManager> {
        self.cdc.clone()
    }

    /// Forward graph mutations into CDC events, one event per mutation.
    fn ensure_cdc_pump(self: &Arc<Self>) {
        if self.pump_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<GraphMutation>();
        self.graph.set_mutation_sender(tx);

        let cdc = self.cdc.clone();
        let pump = tokio::spawn(async move {
            while let Some(mutation) = rx.recv().await {
                match mutation {
                    GraphMutation::NodeAdded(node) => cdc.publish_node_added(&node).await,
                    GraphMutation::NodeRemoved(id) => cdc.publish_node_deleted(&id).await,
                    GraphMutation::RelationshipAdded(rel) => {
                        cdc.publish_relationship_added(&rel).await
                    }
                    GraphMutation::RelationshipRemoved(id) => {
                        cdc.publish_relationship_deleted(&id).await
                    }
                    GraphMutation::Cleared => cdc.publish_graph_reset().await,
                }
            }
        });
        *self.cdc_pump.lock() = Some(pump.abort_handle());
    }

    // ------------------------------------------------------------------
    // Analysis lifecycle
    // ------------------------------------------------------------------

    /// Run the full analysis if no valid one exists yet. Queries call
    /// this lazily before touching the graph.
    pub async fn ensure_analyzed(self: &Arc<Self>) -> Result<()> {
        self.ensure_cdc_pump();
        if self.analyzed.load(Ordering::SeqCst) {
            return Ok(());
        }

        let _guard = self.analysis_lock.lock().await;
        if self.analyzed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.run_full_analysis().await
    }

    /// Caller must hold `analysis_lock`.
    async fn run_full_analysis(self: &Arc<Self>) -> Result<()> {
        let root = self.config.project_root.clone();
        info!("analyzing project {}", root.display());
        let started = Instant::now();
        self.cdc
            .publish_analysis_started(&root.to_string_lossy())
            .await;

        let engine = self.clone();
        let task = tokio::spawn(async move {
            engine.parser.parse_directory(&engine.config.project_root).await
        });
        let abort_handle = task.abort_handle();
        *self.analysis_task.lock() = Some(abort_handle.clone());

        let timeout = Duration::from_secs(self.config.analysis.timeout_s);
        let outcome = tokio::time::timeout(timeout, task).await;
        *self.analysis_task.lock() = None;

        match outcome {
            Err(_) => {
                abort_handle.abort();
                Err(SeamGraphError::Timeout(
                    "project analysis timed out - the project may be too large".to_string(),
                ))
            }
            Ok(Err(join_error)) if join_error.is_cancelled() => Err(SeamGraphError::Internal(
                "analysis cancelled by a newer change batch".to_string(),
            )),
            Ok(Err(join_error)) => Err(SeamGraphError::Internal(join_error.to_string())),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Ok(Ok(parsed))) => {
                self.analyzed.store(true, Ordering::SeqCst);
                *self.last_analysis.lock() = Some(Utc::now());
                let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
                info!(
                    "analysis complete: {} files in {:.0} ms",
                    parsed, duration_ms
                );
                self.cdc
                    .publish_analysis_completed(
                        self.graph.node_count(),
                        self.graph.relationship_count(),
                        duration_ms,
                    )
                    .await;
                if self.watcher_enabled.load(Ordering::SeqCst) {
                    self.watcher_running.store(true, Ordering::SeqCst);
                }
                Ok(())
            }
        }
    }

    /// Debounced change callback for the external file watcher: cancels
    /// any running analysis, then updates incrementally.
    pub async fn on_files_changed(self: &Arc<Self>, changed: Vec<String>) {
        self.watch_batches.fetch_add(1, Ordering::SeqCst);

        if let Some(task) = self.analysis_task.lock().take() {
            info!("cancelling in-flight analysis for a change batch");
            task.abort();
        }

        if self.analyzed.load(Ordering::SeqCst) && !changed.is_empty() {
            if let Err(e) = self.incremental_update(&changed).await {
                warn!("incremental update failed: {}, falling back to full reanalysis", e);
                self.analyzed.store(false, Ordering::SeqCst);
                if let Err(e) = self.ensure_analyzed().await {
                    warn!("fallback reanalysis failed: {}", e);
                }
            }
        } else {
            self.analyzed.store(false, Ordering::SeqCst);
            if let Err(e) = self.ensure_analyzed().await {
                warn!("reanalysis after change batch failed: {}", e);
            }
        }
    }

    async fn incremental_update(self: &Arc<Self>, changed: &[String]) -> Result<()> {
        let _guard = self.analysis_lock.lock().await;
        info!("incremental update for {} files", changed.len());

        let mut removed = 0usize;
        for path in changed {
            removed += self.graph.remove_file_nodes(path);
        }
        debug!("removed {} nodes from changed files", removed);

        for path in changed {
            let file = Path::new(path);
            if !file.exists() {
                continue;
            }
            if !self.parser.parse_file(file).await? {
                return Err(SeamGraphError::ParseFailure(format!(
                    "failed to re-parse changed file {}",
                    path
                )));
            }
        }
        Ok(())
    }

    /// Drop all derived state and analyze from scratch.
    pub async fn force_reanalysis(self: &Arc<Self>) -> Result<()> {
        info!("forcing complete reanalysis");
        self.analyzed.store(false, Ordering::SeqCst);
        self.graph.clear();
        self.ensure_analyzed().await
    }

    // ------------------------------------------------------------------
    // Watcher contract
    // ------------------------------------------------------------------

    /// The debounce window the external watcher must apply before
    /// invoking `on_files_changed`.
    pub fn watcher_debounce(&self) -> Duration {
        Duration::from_secs_f64(self.config.watcher.debounce_s)
    }

    pub fn register_watcher(&self) {
        self.watcher_enabled.store(true, Ordering::SeqCst);
        self.watcher_running.store(true, Ordering::SeqCst);
    }

    pub fn stop_watcher(&self) {
        self.watcher_running.store(false, Ordering::SeqCst);
    }

    pub fn get_file_watcher_stats(&self) -> FileWatcherStats {
        FileWatcherStats {
            enabled: self.watcher_enabled.load(Ordering::SeqCst),
            running: self.watcher_running.load(Ordering::SeqCst),
            debounce_s: self.config.watcher.debounce_s,
            batches_received: self.watch_batches.load(Ordering::SeqCst),
        }
    }

    // ------------------------------------------------------------------
    // Query surface
    // ------------------------------------------------------------------

    fn validate_symbol(symbol: &str) -> Result<()> {
        if symbol.is_empty() {
            return Err(SeamGraphError::InvalidInput(
                "symbol must be a non-empty string".to_string(),
            ));
        }
        if symbol.len() > MAX_SYMBOL_LEN {
            return Err(SeamGraphError::InvalidInput(format!(
                "symbol name too long (max {} characters)",
                MAX_SYMBOL_LEN
            )));
        }
        if !SYMBOL_RE.is_match(symbol) {
            return Err(SeamGraphError::InvalidInput(
                "symbol contains invalid characters".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn get_project_stats(self: &Arc<Self>) -> Result<serde_json::Value> {
        self.ensure_analyzed().await?;
        let stats = self.graph.get_statistics();
        Ok(serde_json::json!({
            "total_files": stats.total_files,
            "total_nodes": stats.total_nodes,
            "total_relationships": stats.total_relationships,
            "node_types": stats.node_types,
            "languages": stats.languages,
            "relationship_types": stats.relationship_types,
            "project_root": self.config.project_root.to_string_lossy(),
            "last_analysis": self.last_analysis.lock().as_ref().map(|t| t.to_rfc3339()),
            "file_watcher": self.get_file_watcher_stats(),
        }))
    }

    pub async fn find_symbol_definition(
        self: &Arc<Self>,
        symbol: &str,
    ) -> Result<Vec<NodeResponse>> {
        Self::validate_symbol(symbol)?;
        self.ensure_analyzed().await?;
        Ok(self
            .graph
            .find_nodes_by_name(symbol, false)
            .iter()
            .map(NodeResponse::from)
            .collect())
    }

    pub async fn find_symbol_references(
        self: &Arc<Self>,
        symbol: &str,
    ) -> Result<Vec<NodeResponse>> {
        Self::validate_symbol(symbol)?;
        self.ensure_analyzed().await?;

        let mut references = Vec::new();
        for definition in self.graph.find_nodes_by_name(symbol, false) {
            for rel in self.graph.get_relationships_to(&definition.id) {
                if rel.relationship_type != RelationshipType::References {
                    continue;
                }
                if let Some(source) = self.graph.get_node(&rel.source_id) {
                    references.push(NodeResponse::from(&source));
                }
            }
        }
        Ok(references)
    }

    pub async fn find_function_callers(
        self: &Arc<Self>,
        function_name: &str,
    ) -> Result<Vec<NodeResponse>> {
        Self::validate_symbol(function_name)?;
        self.ensure_analyzed().await?;

        let mut callers = Vec::new();
        for function in self.graph.find_nodes_by_name(function_name, false) {
            if function.node_type != NodeType::Function {
                continue;
            }
            for rel in self.graph.get_relationships_to(&function.id) {
                if rel.relationship_type != RelationshipType::Calls {
                    continue;
                }
                if let Some(caller) = self.graph.get_node(&rel.source_id) {
                    callers.push(NodeResponse::from(&caller));
                }
            }
        }
        Ok(callers)
    }

    pub async fn find_function_callees(
        self: &Arc<Self>,
        function_name: &str,
    ) -> Result<Vec<NodeResponse>> {
        Self::validate_symbol(function_name)?;
        self.ensure_analyzed().await?;

        let mut callees = Vec::new();
        for function in self.graph.find_nodes_by_name(function_name, false) {
            if function.node_type != NodeType::Function {
                continue;
            }
            for rel in self.graph.get_relationships_from(&function.id) {
                if rel.relationship_type != RelationshipType::Calls {
                    continue;
                }
                if let Some(callee) = self.graph.get_node(&rel.target_id) {
                    callees.push(NodeResponse::from(&callee));
                }
            }
        }
        Ok(callees)
    }

    /// Functions at or above the complexity threshold, most complex
    /// first, with risk bands.
    pub async fn analyze_complexity(
        self: &Arc<Self>,
        threshold: u32,
    ) -> Result<Vec<serde_json::Value>> {
        self.ensure_analyzed().await?;

        let mut functions: Vec<_> = self
            .graph
            .get_nodes_by_type(NodeType::Function)
            .into_iter()
            .filter(|node| node.complexity >= threshold)
            .collect();
        functions.sort_by(|a, b| b.complexity.cmp(&a.complexity));

        Ok(functions
            .iter()
            .map(|node| {
                let risk = if node.complexity > 20 {
                    "high"
                } else if node.complexity > 10 {
                    "moderate"
                } else {
                    "low"
                };
                serde_json::json!({
                    "name": node.name,
                    "file": node.location.file_path,
                    "line": node.location.start_line,
                    "complexity": node.complexity,
                    "risk": risk,
                })
            })
            .collect())
    }

    /// File-level import map derived from IMPORT nodes.
    pub async fn get_dependency_graph(self: &Arc<Self>) -> Result<serde_json::Value> {
        self.ensure_analyzed().await?;

        let mut files: HashMap<String, Vec<String>> = HashMap::new();
        let mut total_imports = 0usize;
        for import in self.graph.get_nodes_by_type(NodeType::Import) {
            files
                .entry(import.location.file_path.clone())
                .or_default()
                .push(import.name.clone());
            total_imports += 1;
        }
        for targets in files.values_mut() {
            targets.sort();
        }

        Ok(serde_json::json!({
            "files": files,
            "total_imports": total_imports,
        }))
    }

    pub async fn detect_entry_points(self: &Arc<Self>) -> Result<Vec<EntryPointCandidate>> {
        self.ensure_analyzed().await?;

        let nodes = self.graph.all_nodes();
        let file_contents: HashMap<String, String> = nodes
            .iter()
            .filter(|node| node.node_type == NodeType::Module)
            .filter_map(|node| {
                node.content
                    .as_ref()
                    .map(|content| (node.location.file_path.clone(), content.clone()))
            })
            .collect();

        Ok(self.detector.detect_entry_points(&nodes, &file_contents))
    }

    /// Composite report: statistics, hotspots, cycles, seams and likely
    /// entry points.
    pub async fn get_code_insights(self: &Arc<Self>) -> Result<serde_json::Value> {
        self.ensure_analyzed().await?;

        let stats = self.graph.get_statistics();
        let hotspots = self.analyze_complexity(10).await?;
        let cycles = self.graph.detect_cycles();
        let seams = self.graph.get_seam_relationships();
        let entry_points = self.detect_entry_points().await?;

        Ok(serde_json::json!({
            "statistics": stats,
            "complexity_hotspots": hotspots.into_iter().take(5).collect::<Vec<_>>(),
            "cycle_count": cycles.len(),
            "cycles": cycles.into_iter().take(10).collect::<Vec<_>>(),
            "seam_count": seams.len(),
            "entry_points": entry_points.into_iter().take(10).collect::<Vec<_>>(),
        }))
    }

    // ------------------------------------------------------------------
    // Wire-contract responses for external interfaces
    // ------------------------------------------------------------------

    /// Depth-bounded traversal from a node, projected onto the canonical
    /// wire records.
    pub async fn traverse(
        self: &Arc<Self>,
        start_node_id: &str,
        max_depth: u32,
        include_seams: bool,
    ) -> Result<TraversalResponse> {
        self.ensure_analyzed().await?;
        if self.graph.get_node(start_node_id).is_none() {
            return Err(SeamGraphError::NotFound(start_node_id.to_string()));
        }

        let started = Instant::now();
        let traversal = self
            .graph
            .dfs_traversal_with_depth(start_node_id, max_depth, include_seams);

        let mut visited: Vec<String> = Vec::new();
        let mut depths: Vec<u32> = traversal.nodes_by_depth.keys().copied().collect();
        depths.sort();
        for depth in &depths {
            visited.extend(traversal.nodes_by_depth[depth].iter().cloned());
        }

        let nodes: Vec<NodeResponse> = visited
            .iter()
            .filter_map(|id| self.graph.get_node(id))
            .map(|node| NodeResponse::from(&node))
            .collect();

        let visited_set: std::collections::HashSet<&String> = visited.iter().collect();
        let mut edges = Vec::new();
        for id in &visited {
            for rel in self.graph.get_relationships_from(id) {
                if visited_set.contains(&rel.target_id) {
                    edges.push(RelationshipResponse::from(&rel));
                }
            }
        }

        Ok(TraversalResponse {
            nodes,
            edges,
            stats: HashMap::from([
                (
                    "total_nodes".to_string(),
                    serde_json::json!(traversal.total_nodes),
                ),
                (
                    "max_depth_reached".to_string(),
                    serde_json::json!(traversal.max_depth_reached),
                ),
                (
                    "seam_edges".to_string(),
                    serde_json::json!(traversal.seam_edges.len()),
                ),
            ]),
            execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            query_type: "dfs_traversal".to_string(),
            start_node_id: Some(start_node_id.to_string()),
            max_depth: Some(max_depth),
        })
    }

    /// Name search projected onto the canonical search record.
    pub async fn search_nodes(
        self: &Arc<Self>,
        query: &str,
        limit: usize,
    ) -> Result<SearchResultResponse> {
        Self::validate_symbol(query)?;
        self.ensure_analyzed().await?;

        let matches = self.graph.find_nodes_by_name(query, false);
        let total_count = matches.len();
        Ok(SearchResultResponse {
            results: matches
                .iter()
                .take(limit)
                .map(NodeResponse::from)
                .collect(),
            total_count,
            query: query.to_string(),
            filters: HashMap::from([("limit".to_string(), serde_json::json!(limit))]),
        })
    }

    /// BFS call chain between two nodes, seam-aware.
    pub async fn find_call_chain(
        self: &Arc<Self>,
        start_node_id: &str,
        end_node_id: Option<&str>,
        follow_seams: bool,
        max_depth: u32,
    ) -> Result<CallChainResponse> {
        self.ensure_analyzed().await?;
        if self.graph.get_node(start_node_id).is_none() {
            return Err(SeamGraphError::NotFound(start_node_id.to_string()));
        }

        let started = Instant::now();
        let hops = self
            .graph
            .find_call_chain(start_node_id, end_node_id, follow_seams, max_depth);

        let mut chain_ids = vec![start_node_id.to_string()];
        let mut edges = Vec::new();
        let mut seam_count = 0usize;
        for (from, to) in &hops {
            if chain_ids.last().map(|id| id == from).unwrap_or(false) {
                chain_ids.push(to.clone());
            }
            if let Some(rel) = self
                .graph
                .get_relationships_from(from)
                .into_iter()
                .find(|rel| &rel.target_id == to)
            {
                if rel.relationship_type == RelationshipType::Seam {
                    seam_count += 1;
                }
                edges.push(RelationshipResponse::from(&rel));
            }
        }

        Ok(CallChainResponse {
            chain: chain_ids
                .iter()
                .filter_map(|id| self.graph.get_node(id))
                .map(|node| NodeResponse::from(&node))
                .collect(),
            edges,
            has_seams: seam_count > 0,
            seam_count,
            total_hops: hops.len(),
            execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    /// Every cross-language seam edge with resolved endpoint details.
    pub async fn get_seams(self: &Arc<Self>) -> Result<Vec<SeamResponse>> {
        self.ensure_analyzed().await?;

        Ok(self
            .graph
            .get_seam_relationships()
            .iter()
            .filter_map(|rel| {
                let source = self.graph.get_node(&rel.source_id)?;
                let target = self.graph.get_node(&rel.target_id)?;
                Some(SeamResponse {
                    id: rel.id.clone(),
                    source_id: source.id.clone(),
                    source_name: source.name.clone(),
                    source_language: source.language.clone(),
                    target_id: target.id.clone(),
                    target_name: target.name.clone(),
                    target_language: target.language.clone(),
                    metadata: rel.metadata.clone(),
                })
            })
            .collect())
    }

    /// Graph statistics in the canonical wire shape, with a complexity
    /// histogram over function nodes.
    pub async fn get_graph_stats(self: &Arc<Self>) -> Result<GraphStatsResponse> {
        self.ensure_analyzed().await?;

        let started = Instant::now();
        let stats = self.graph.get_statistics();
        let mut complexity_distribution: HashMap<String, usize> = HashMap::new();
        for node in self.graph.get_nodes_by_type(NodeType::Function) {
            let band = match node.complexity {
                0..=5 => "1-5",
                6..=10 => "6-10",
                11..=20 => "11-20",
                _ => "21+",
            };
            *complexity_distribution.entry(band.to_string()).or_insert(0) += 1;
        }

        Ok(GraphStatsResponse {
            total_nodes: stats.total_nodes,
            total_relationships: stats.total_relationships,
            node_types: stats.node_types,
            relationship_types: stats.relationship_types,
            languages: stats.languages,
            seam_count: self.graph.get_seam_relationships().len(),
            complexity_distribution,
            execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    pub fn get_cache_stats(&self) -> Option<seamgraph_cache::CacheStatsReport> {
        self.cache.as_ref().map(|cache| cache.get_cache_stats())
    }

    /// Cancel background work and release cache and CDC resources.
    pub async fn cleanup(self: &Arc<Self>) {
        info!("cleaning up analysis engine");
        if let Some(task) = self.analysis_task.lock().take() {
            task.abort();
        }
        if let Some(pump) = self.cdc_pump.lock().take() {
            pump.abort();
        }
        self.stop_watcher();
        if let Some(cache) = &self.cache {
            cache.close().await;
        }
    }
}
