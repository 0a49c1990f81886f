use crate::graph::UniversalGraph;
use parking_lot::Mutex;
use seamgraph_core::{ExternalGraphStore, NodeType, RelationshipType};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;
use uuid::Uuid;

const HISTORY_LIMIT: usize = 1000;
const COMPLEXITY_THRESHOLD: f32 = 50.0;

const PATTERN_KEYWORDS: &[&str] = &[
    "regex",
    "wildcard",
    "contains",
    "startswith",
    "endswith",
    "matches",
    "~",
    "*",
];

const ALGORITHM_KEYWORDS: &[&str] = &[
    "pagerank",
    "centrality",
    "community",
    "shortest",
    "all_paths",
    "cycles",
    "articulation",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingTarget {
    Local,
    External,
}

impl std::fmt::Display for RoutingTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutingTarget::Local => write!(f, "local"),
            RoutingTarget::External => write!(f, "external"),
        }
    }
}

/// Outcome of complexity scoring for one query, kept in a bounded
/// history with measured execution time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub query_id: String,
    pub query_type: String,
    pub target: RoutingTarget,
    pub complexity_score: f32,
    pub estimated_hops: u32,
    pub requires_pattern: bool,
    pub requires_algorithm: bool,
    pub reason: String,
    pub execution_time_ms: Option<f64>,
}

fn base_weight(query_type: &str) -> f32 {
    match query_type {
        "find_callers" | "find_callees" | "find_references" => 5.0,
        "impact_analysis" => 50.0,
        "shortest_path" => 40.0,
        "all_paths" => 60.0,
        "community_detection" => 80.0,
        "cycle_detection" => 60.0,
        "god_functions" => 70.0,
        _ => 10.0,
    }
}

/// Complexity-scored dispatch between the in-process engine and an
/// external graph store.
pub struct QueryRouter {
    graph: Arc<UniversalGraph>,
    external: Option<Arc<dyn ExternalGraphStore>>,
    hop_threshold: u32,
    history: Mutex<VecDeque<RoutingDecision>>,
}

impl QueryRouter {
    pub fn new(
        graph: Arc<UniversalGraph>,
        external: Option<Arc<dyn ExternalGraphStore>>,
        hop_threshold: u32,
    ) -> Self {
        Self {
            graph,
            external,
            hop_threshold,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Score a query and decide where it should run.
    pub fn analyze_query(
        &self,
        query_type: &str,
        max_hops: Option<u32>,
        params: &HashMap<String, serde_json::Value>,
    ) -> RoutingDecision {
        let mut score = 0.0f32;
        let mut reasons: Vec<String> = Vec::new();

        let estimated_hops = max_hops.unwrap_or(self.hop_threshold);
        let over_hop_threshold = estimated_hops > self.hop_threshold;
        if over_hop_threshold {
            score += 30.0;
            reasons.push(format!(
                "hop count {} > threshold {}",
                estimated_hops, self.hop_threshold
            ));
        }

        let params_text = serde_json::to_string(params)
            .unwrap_or_default()
            .to_lowercase();

        let mut requires_pattern = false;
        for keyword in PATTERN_KEYWORDS {
            if params_text.contains(keyword) {
                requires_pattern = true;
                score += 20.0;
                reasons.push(format!("pattern matching detected ({})", keyword));
                break;
            }
        }

        let mut requires_algorithm = false;
        for keyword in ALGORITHM_KEYWORDS {
            if params_text.contains(keyword) {
                requires_algorithm = true;
                score += 40.0;
                reasons.push(format!("algorithm required ({})", keyword));
                break;
            }
        }

        score += base_weight(query_type);

        let target = if score >= COMPLEXITY_THRESHOLD || over_hop_threshold || requires_algorithm {
            RoutingTarget::External
        } else {
            RoutingTarget::Local
        };

        RoutingDecision {
            query_id: Uuid::new_v4().to_string()[..8].to_string(),
            query_type: query_type.to_string(),
            target,
            complexity_score: score,
            estimated_hops,
            requires_pattern,
            requires_algorithm,
            reason: if reasons.is_empty() {
                "simple query".to_string()
            } else {
                reasons.join("; ")
            },
            execution_time_ms: None,
        }
    }

    fn record(&self, mut decision: RoutingDecision, started: Instant) -> RoutingDecision {
        decision.execution_time_ms = Some(started.elapsed().as_secs_f64() * 1000.0);
        let mut history = self.history.lock();
        if history.len() >= HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(decision.clone());
        decision
    }

    /// Direct callers of a function. Always served locally.
    pub async fn find_callers(&self, symbol: &str) -> (Vec<String>, RoutingDecision) {
        let decision = self.analyze_query(
            "find_callers",
            None,
            &HashMap::from([("symbol".to_string(), serde_json::json!(symbol))]),
        );
        let started = Instant::now();

        let mut callers = Vec::new();
        for node in self.graph.find_nodes_by_name(symbol, false) {
            if node.node_type != NodeType::Function {
                continue;
            }
            for rel in self.graph.get_relationships_to(&node.id) {
                if rel.relationship_type == RelationshipType::Calls {
                    callers.push(rel.source_id);
                }
            }
        }

        (callers, self.record(decision, started))
    }

    /// Direct callees of a function. Always served locally.
    pub async fn find_callees(&self, symbol: &str) -> (Vec<String>, RoutingDecision) {
        let decision = self.analyze_query(
            "find_callees",
            None,
            &HashMap::from([("symbol".to_string(), serde_json::json!(symbol))]),
        );
        let started = Instant::now();

        let mut callees = Vec::new();
        for node in self.graph.find_nodes_by_name(symbol, false) {
            if node.node_type != NodeType::Function {
                continue;
            }
            for rel in self.graph.get_relationships_from(&node.id) {
                if rel.relationship_type == RelationshipType::Calls {
                    callees.push(rel.target_id);
                }
            }
        }

        (callees, self.record(decision, started))
    }

    /// All call paths between two nodes; routed to the external store for
    /// deep traversals, falling back to the local engine on failure.
    pub async fn find_all_paths(
        &self,
        start: &str,
        end: &str,
        max_hops: u32,
    ) -> (Vec<Vec<String>>, RoutingDecision) {
        let decision = self.analyze_query(
            "all_paths",
            Some(max_hops),
            &HashMap::from([
                ("start".to_string(), serde_json::json!(start)),
                ("end".to_string(), serde_json::json!(end)),
                ("algorithm".to_string(), serde_json::json!("all_paths")),
            ]),
        );
        let started = Instant::now();

        let paths = if decision.target == RoutingTarget::External {
            match &self.external {
                Some(store) => {
                    let cypher = format!(
                        "MATCH path = (a {{id: $start}})-[:CALLS*1..{}]->(b {{id: $end}}) \
                         RETURN [node IN nodes(path) | node.id] AS path",
                        max_hops
                    );
                    let params = HashMap::from([
                        ("start".to_string(), serde_json::json!(start)),
                        ("end".to_string(), serde_json::json!(end)),
                    ]);
                    match store.execute(&cypher, params).await {
                        Ok(rows) => rows
                            .into_iter()
                            .filter_map(|row| {
                                row.get("path").and_then(|p| {
                                    serde_json::from_value::<Vec<String>>(p.clone()).ok()
                                })
                            })
                            .collect(),
                        Err(e) => {
                            warn!("external path query failed: {}, falling back", e);
                            self.graph.find_all_paths(start, end, max_hops as usize)
                        }
                    }
                }
                None => {
                    self.graph.find_all_paths(start, end, max_hops as usize)
                }
            }
        } else {
            self.graph.find_all_paths(start, end, max_hops as usize)
        };

        (paths, self.record(decision, started))
    }

    /// High-complexity, heavily-called functions. Served by the external
    /// store; empty when it is not configured.
    pub async fn god_functions(
        &self,
        min_complexity: u32,
        min_callers: u32,
    ) -> (Vec<HashMap<String, serde_json::Value>>, RoutingDecision) {
        let decision = self.analyze_query(
            "god_functions",
            None,
            &HashMap::from([
                ("min_complexity".to_string(), serde_json::json!(min_complexity)),
                ("min_callers".to_string(), serde_json::json!(min_callers)),
            ]),
        );
        let started = Instant::now();

        let results = match &self.external {
            Some(store) => {
                let cypher = "MATCH (func:Function) WHERE func.complexity > $min_complexity \
                              WITH func, size((func)<-[:CALLS]-()) AS caller_count \
                              WHERE caller_count > $min_callers \
                              RETURN func.id AS id, func.name AS name, \
                                     func.complexity AS complexity, caller_count AS callers \
                              ORDER BY func.complexity DESC";
                let params = HashMap::from([
                    ("min_complexity".to_string(), serde_json::json!(min_complexity)),
                    ("min_callers".to_string(), serde_json::json!(min_callers)),
                ]);
                match store.execute(cypher, params).await {
                    Ok(rows) => rows,
                    Err(e) => {
                        warn!("external god-function query failed: {}", e);
                        Vec::new()
                    }
                }
            }
            None => Vec::new(),
        };

        (results, self.record(decision, started))
    }

    pub fn history(&self) -> Vec<RoutingDecision> {
        self.history.lock().iter().cloned().collect()
    }

    /// Per-target query counts and mean latency.
    pub fn query_performance(&self) -> HashMap<String, serde_json::Value> {
        let history = self.history.lock();
        let mut stats = HashMap::new();
        stats.insert(
            "total_queries".to_string(),
            serde_json::json!(history.len()),
        );

        for target in [RoutingTarget::Local, RoutingTarget::External] {
            let times: Vec<f64> = history
                .iter()
                .filter(|d| d.target == target)
                .filter_map(|d| d.execution_time_ms)
                .collect();
            let avg = if times.is_empty() {
                0.0
            } else {
                times.iter().sum::<f64>() / times.len() as f64
            };
            stats.insert(
                target.to_string(),
                serde_json::json!({
                    "count": history.iter().filter(|d| d.target == target).count(),
                    "avg_time_ms": avg,
                }),
            );
        }
        stats
    }
}
