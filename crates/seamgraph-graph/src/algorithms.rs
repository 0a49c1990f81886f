use crate::graph::{GraphInner, MemoValue, UniversalGraph};
use petgraph::stable_graph::NodeIndex;
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;
use seamgraph_core::{NodeType, Result, SeamGraphError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::warn;

const DEFAULT_PAGERANK_ALPHA: f64 = 0.85;
const DEFAULT_MAX_ITER: usize = 100;
const DEFAULT_TOLERANCE: f64 = 1e-6;

/// Composite connectivity report combining size metrics, reachability and
/// distance statistics from two shortest-path algorithms.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectivityReport {
    pub num_nodes: usize,
    pub num_edges: usize,
    pub density: f64,
    pub reachable_pairs: usize,
    pub total_possible_pairs: usize,
    pub connectivity_ratio: f64,
    pub is_strongly_connected: bool,
    pub average_distance: f64,
    pub maximum_distance: f64,
    pub minimum_distance: f64,
    pub has_negative_cycles: bool,
    pub algorithms_agree: bool,
}

/// Connectivity profile of a single node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConnectivityReport {
    pub node_id: String,
    pub in_degree: usize,
    pub out_degree: usize,
    pub total_degree: usize,
    pub ancestors_count: usize,
    pub descendants_count: usize,
    pub max_distance_to_others: u32,
    pub layer_sizes: HashMap<u32, usize>,
    pub is_articulation_point: bool,
    pub centrality_percentile: f64,
}

fn edge_weight(inner: &GraphInner, edge_id: &str, use_strength: bool) -> f64 {
    if use_strength {
        inner
            .relationships
            .get(edge_id)
            .map(|r| r.relationship.strength as f64)
            .unwrap_or(1.0)
    } else {
        1.0
    }
}

impl UniversalGraph {
    fn node_index(&self, inner: &GraphInner, node_id: &str) -> Option<NodeIndex> {
        inner.nodes.get(node_id).map(|record| record.index)
    }

    // ------------------------------------------------------------------
    // Paths
    // ------------------------------------------------------------------

    /// Unit-weight shortest path, endpoints inclusive. Empty when either
    /// endpoint is missing or no path exists.
    pub fn find_shortest_path(&self, source_id: &str, target_id: &str) -> Vec<String> {
        let key = format!("shortest_path:{}->{}", source_id, target_id);
        if let Some(MemoValue::Path(path)) = self.memo_get(&key) {
            return path;
        }

        let generation = self.generation();
        let inner = self.inner.read();
        let (Some(source), Some(target)) = (
            self.node_index(&inner, source_id),
            self.node_index(&inner, target_id),
        ) else {
            return Vec::new();
        };

        let path = petgraph::algo::astar(
            &inner.arena,
            source,
            |finish| finish == target,
            |_| 1usize,
            |_| 0usize,
        )
        .map(|(_, indices)| {
            indices
                .into_iter()
                .map(|idx| inner.arena[idx].clone())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
        drop(inner);

        self.memo_put(generation, key, MemoValue::Path(path.clone()));
        path
    }

    /// All simple paths between two nodes, bounded by `max_length` hops.
    pub fn find_all_paths(
        &self,
        source_id: &str,
        target_id: &str,
        max_length: usize,
    ) -> Vec<Vec<String>> {
        let inner = self.inner.read();
        let (Some(source), Some(target)) = (
            self.node_index(&inner, source_id),
            self.node_index(&inner, target_id),
        ) else {
            return Vec::new();
        };

        petgraph::algo::all_simple_paths::<Vec<_>, _>(
            &inner.arena,
            source,
            target,
            0,
            Some(max_length.saturating_sub(1)),
        )
        .map(|path: Vec<NodeIndex>| {
            path.into_iter()
                .map(|idx| inner.arena[idx].clone())
                .collect()
        })
        .collect()
    }

    // ------------------------------------------------------------------
    // Cycles and components
    // ------------------------------------------------------------------

    /// Enumerate simple cycles, filtering self-loops on functions whose
    /// name matches the configured recursion patterns. Multi-node cycles
    /// are always reported.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        if let Some(MemoValue::IdGroups(cycles)) = self.memo_get("cycles") {
            return cycles;
        }

        let generation = self.generation();
        let inner = self.inner.read();
        let raw_cycles = enumerate_simple_cycles(&inner);

        let mut cycles = Vec::new();
        for cycle in raw_cycles {
            if cycle.len() == 1 {
                let node_id = &inner.arena[cycle[0]];
                if let Some(record) = inner.nodes.get(node_id) {
                    if record.node.node_type == NodeType::Function
                        && self.matches_recursion_pattern(&record.node.name)
                    {
                        continue;
                    }
                }
            }
            cycles.push(
                cycle
                    .into_iter()
                    .map(|idx| inner.arena[idx].clone())
                    .collect(),
            );
        }
        drop(inner);

        self.memo_put(generation, "cycles".to_string(), MemoValue::IdGroups(cycles.clone()));
        cycles
    }

    fn matches_recursion_pattern(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.recursion_patterns
            .iter()
            .any(|pattern| lower.contains(pattern))
    }

    pub fn strongly_connected_components(&self) -> Vec<Vec<String>> {
        if let Some(MemoValue::IdGroups(components)) = self.memo_get("scc") {
            return components;
        }

        let generation = self.generation();
        let inner = self.inner.read();
        let components: Vec<Vec<String>> = petgraph::algo::tarjan_scc(&inner.arena)
            .into_iter()
            .map(|component| {
                component
                    .into_iter()
                    .map(|idx| inner.arena[idx].clone())
                    .collect()
            })
            .collect();
        drop(inner);

        self.memo_put(generation, "scc".to_string(), MemoValue::IdGroups(components.clone()));
        components
    }

    pub fn is_directed_acyclic(&self) -> bool {
        !petgraph::algo::is_cyclic_directed(&self.inner.read().arena)
    }

    /// Dependency-order node ids; empty when the graph has a cycle.
    pub fn topological_sort(&self) -> Vec<String> {
        let inner = self.inner.read();
        match petgraph::algo::toposort(&inner.arena, None) {
            Ok(order) => order
                .into_iter()
                .map(|idx| inner.arena[idx].clone())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Centrality
    // ------------------------------------------------------------------

    /// Directed betweenness centrality (Brandes, unit weights, normalized).
    pub fn calculate_centrality(&self) -> HashMap<String, f64> {
        if let Some(MemoValue::Scores(scores)) = self.memo_get("betweenness") {
            return scores;
        }

        let generation = self.generation();
        let inner = self.inner.read();
        let indices: Vec<NodeIndex> = inner.arena.node_indices().collect();
        let n = indices.len();
        let mut betweenness: HashMap<NodeIndex, f64> =
            indices.iter().map(|&idx| (idx, 0.0)).collect();

        for &source in &indices {
            // Brandes single-source accumulation over BFS shortest paths.
            let mut stack = Vec::new();
            let mut predecessors: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
            let mut sigma: HashMap<NodeIndex, f64> = HashMap::new();
            let mut distance: HashMap<NodeIndex, i64> = HashMap::new();
            sigma.insert(source, 1.0);
            distance.insert(source, 0);

            let mut queue = VecDeque::new();
            queue.push_back(source);
            while let Some(v) = queue.pop_front() {
                stack.push(v);
                let d_v = distance[&v];
                for w in inner.arena.neighbors_directed(v, Direction::Outgoing) {
                    if !distance.contains_key(&w) {
                        distance.insert(w, d_v + 1);
                        queue.push_back(w);
                    }
                    if distance[&w] == d_v + 1 {
                        *sigma.entry(w).or_insert(0.0) += sigma[&v];
                        predecessors.entry(w).or_default().push(v);
                    }
                }
            }

            let mut delta: HashMap<NodeIndex, f64> = HashMap::new();
            while let Some(w) = stack.pop() {
                let coefficient = (1.0 + delta.get(&w).copied().unwrap_or(0.0)) / sigma[&w];
                if let Some(preds) = predecessors.get(&w) {
                    for &v in preds {
                        *delta.entry(v).or_insert(0.0) += sigma[&v] * coefficient;
                    }
                }
                if w != source {
                    *betweenness.get_mut(&w).unwrap() += delta.get(&w).copied().unwrap_or(0.0);
                }
            }
        }

        let scale = if n > 2 {
            1.0 / ((n - 1) as f64 * (n - 2) as f64)
        } else {
            1.0
        };
        let scores: HashMap<String, f64> = betweenness
            .into_iter()
            .map(|(idx, score)| (inner.arena[idx].clone(), score * scale))
            .collect();
        drop(inner);

        self.memo_put(generation, "betweenness".to_string(), MemoValue::Scores(scores.clone()));
        scores
    }

    pub fn calculate_pagerank(
        &self,
        alpha: Option<f64>,
        max_iter: Option<usize>,
        tol: Option<f64>,
    ) -> HashMap<String, f64> {
        let alpha = alpha.unwrap_or(DEFAULT_PAGERANK_ALPHA);
        let max_iter = max_iter.unwrap_or(DEFAULT_MAX_ITER);
        let tol = tol.unwrap_or(DEFAULT_TOLERANCE);
        let key = format!("pagerank:{}:{}:{}", alpha, max_iter, tol);
        if let Some(MemoValue::Scores(scores)) = self.memo_get(&key) {
            return scores;
        }

        let generation = self.generation();
        let inner = self.inner.read();
        let indices: Vec<NodeIndex> = inner.arena.node_indices().collect();
        let n = indices.len();
        if n == 0 {
            return HashMap::new();
        }

        let position: HashMap<NodeIndex, usize> =
            indices.iter().enumerate().map(|(i, &idx)| (idx, i)).collect();
        let out_degree: Vec<usize> = indices
            .iter()
            .map(|&idx| inner.arena.neighbors_directed(idx, Direction::Outgoing).count())
            .collect();

        let mut rank = vec![1.0 / n as f64; n];
        let mut converged = false;

        for _ in 0..max_iter {
            let dangling_sum: f64 = indices
                .iter()
                .enumerate()
                .filter(|(i, _)| out_degree[*i] == 0)
                .map(|(i, _)| rank[i])
                .sum();

            let base = (1.0 - alpha) / n as f64 + alpha * dangling_sum / n as f64;
            let mut next = vec![base; n];
            for (i, &idx) in indices.iter().enumerate() {
                if out_degree[i] == 0 {
                    continue;
                }
                let share = alpha * rank[i] / out_degree[i] as f64;
                for neighbor in inner.arena.neighbors_directed(idx, Direction::Outgoing) {
                    next[position[&neighbor]] += share;
                }
            }

            let err: f64 = next
                .iter()
                .zip(rank.iter())
                .map(|(a, b)| (a - b).abs())
                .sum();
            rank = next;
            if err < n as f64 * tol {
                converged = true;
                break;
            }
        }

        if !converged {
            warn!("pagerank failed to converge after {} iterations", max_iter);
            return HashMap::new();
        }

        let scores: HashMap<String, f64> = indices
            .iter()
            .enumerate()
            .map(|(i, &idx)| (inner.arena[idx].clone(), rank[i]))
            .collect();
        drop(inner);

        self.memo_put(generation, key, MemoValue::Scores(scores.clone()));
        scores
    }

    /// Closeness centrality over incoming shortest paths with the
    /// Wasserman-Faust reachability correction.
    pub fn calculate_closeness_centrality(&self) -> HashMap<String, f64> {
        if let Some(MemoValue::Scores(scores)) = self.memo_get("closeness") {
            return scores;
        }

        let generation = self.generation();
        let inner = self.inner.read();
        let indices: Vec<NodeIndex> = inner.arena.node_indices().collect();
        let n = indices.len();
        let mut scores = HashMap::new();

        for &target in &indices {
            // BFS over incoming edges: distance from each source to `target`.
            let mut distance: HashMap<NodeIndex, u64> = HashMap::new();
            distance.insert(target, 0);
            let mut queue = VecDeque::new();
            queue.push_back(target);
            while let Some(v) = queue.pop_front() {
                let d_v = distance[&v];
                for u in inner.arena.neighbors_directed(v, Direction::Incoming) {
                    if !distance.contains_key(&u) {
                        distance.insert(u, d_v + 1);
                        queue.push_back(u);
                    }
                }
            }

            let reachable = distance.len();
            let total: u64 = distance.values().sum();
            let score = if reachable > 1 && n > 1 && total > 0 {
                let fraction = (reachable - 1) as f64 / (n - 1) as f64;
                fraction * (reachable - 1) as f64 / total as f64
            } else {
                0.0
            };
            scores.insert(inner.arena[target].clone(), score);
        }
        drop(inner);

        self.memo_put(generation, "closeness".to_string(), MemoValue::Scores(scores.clone()));
        scores
    }

    pub fn calculate_eigenvector_centrality(
        &self,
        max_iter: Option<usize>,
        tol: Option<f64>,
    ) -> HashMap<String, f64> {
        let max_iter = max_iter.unwrap_or(DEFAULT_MAX_ITER);
        let tol = tol.unwrap_or(DEFAULT_TOLERANCE);
        let key = format!("eigenvector:{}:{}", max_iter, tol);
        if let Some(MemoValue::Scores(scores)) = self.memo_get(&key) {
            return scores;
        }

        let generation = self.generation();
        let inner = self.inner.read();
        let indices: Vec<NodeIndex> = inner.arena.node_indices().collect();
        let n = indices.len();
        if n == 0 {
            return HashMap::new();
        }

        let position: HashMap<NodeIndex, usize> =
            indices.iter().enumerate().map(|(i, &idx)| (idx, i)).collect();
        let mut value = vec![1.0 / n as f64; n];
        let mut converged = false;

        for _ in 0..max_iter {
            let mut next = value.clone();
            for (i, &idx) in indices.iter().enumerate() {
                for neighbor in inner.arena.neighbors_directed(idx, Direction::Outgoing) {
                    next[position[&neighbor]] += value[i];
                }
            }
            let norm: f64 = next.iter().map(|v| v * v).sum::<f64>().sqrt();
            let norm = if norm == 0.0 { 1.0 } else { norm };
            for v in next.iter_mut() {
                *v /= norm;
            }

            let err: f64 = next
                .iter()
                .zip(value.iter())
                .map(|(a, b)| (a - b).abs())
                .sum();
            value = next;
            if err < n as f64 * tol {
                converged = true;
                break;
            }
        }

        if !converged {
            warn!(
                "eigenvector centrality failed to converge after {} iterations",
                max_iter
            );
            return HashMap::new();
        }

        let scores: HashMap<String, f64> = indices
            .iter()
            .enumerate()
            .map(|(i, &idx)| (inner.arena[idx].clone(), value[i]))
            .collect();
        drop(inner);

        self.memo_put(generation, key, MemoValue::Scores(scores.clone()));
        scores
    }

    // ------------------------------------------------------------------
    // Structural analysis (undirected projection)
    // ------------------------------------------------------------------

    pub fn find_articulation_points(&self) -> Vec<String> {
        let inner = self.inner.read();
        let (points, _) = articulation_points_and_bridges(&inner);
        points
            .into_iter()
            .map(|idx| inner.arena[idx].clone())
            .collect()
    }

    pub fn find_bridges(&self) -> Vec<(String, String)> {
        let inner = self.inner.read();
        let (_, bridges) = articulation_points_and_bridges(&inner);
        bridges
            .into_iter()
            .map(|(u, v)| (inner.arena[u].clone(), inner.arena[v].clone()))
            .collect()
    }

    // ------------------------------------------------------------------
    // Dense / weighted shortest paths
    // ------------------------------------------------------------------

    /// All-pairs unit-weight distances (Floyd-Warshall); only finite
    /// entries are returned.
    pub fn floyd_warshall_distances(&self) -> HashMap<String, HashMap<String, f64>> {
        if let Some(MemoValue::Matrix(matrix)) = self.memo_get("floyd_warshall") {
            return matrix;
        }

        let generation = self.generation();
        let inner = self.inner.read();
        let indices: Vec<NodeIndex> = inner.arena.node_indices().collect();
        let n = indices.len();
        let position: HashMap<NodeIndex, usize> =
            indices.iter().enumerate().map(|(i, &idx)| (idx, i)).collect();

        let mut dist = vec![vec![f64::INFINITY; n]; n];
        for i in 0..n {
            dist[i][i] = 0.0;
        }
        for edge in inner.arena.edge_references() {
            let i = position[&edge.source()];
            let j = position[&edge.target()];
            if dist[i][j] > 1.0 {
                dist[i][j] = 1.0;
            }
        }

        for k in 0..n {
            for i in 0..n {
                if dist[i][k].is_infinite() {
                    continue;
                }
                for j in 0..n {
                    let through = dist[i][k] + dist[k][j];
                    if through < dist[i][j] {
                        dist[i][j] = through;
                    }
                }
            }
        }

        let mut matrix = HashMap::new();
        for (i, &source) in indices.iter().enumerate() {
            let mut row = HashMap::new();
            for (j, &target) in indices.iter().enumerate() {
                if dist[i][j].is_finite() {
                    row.insert(inner.arena[target].clone(), dist[i][j]);
                }
            }
            matrix.insert(inner.arena[source].clone(), row);
        }
        drop(inner);

        self.memo_put(
            generation,
            "floyd_warshall".to_string(),
            MemoValue::Matrix(matrix.clone()),
        );
        matrix
    }

    /// Single-source Bellman-Ford. `use_strength` weights edges by their
    /// strength (which may be negative); otherwise unit weights are used.
    /// Errors when a reachable negative cycle exists.
    pub fn bellman_ford_from(
        &self,
        source_id: &str,
        use_strength: bool,
    ) -> Result<HashMap<String, f64>> {
        let inner = self.inner.read();
        let Some(source) = self.node_index(&inner, source_id) else {
            return Err(SeamGraphError::NotFound(source_id.to_string()));
        };

        let indices: Vec<NodeIndex> = inner.arena.node_indices().collect();
        let mut distance: HashMap<NodeIndex, f64> = HashMap::new();
        distance.insert(source, 0.0);

        for _ in 0..indices.len().saturating_sub(1) {
            let mut changed = false;
            for edge in inner.arena.edge_references() {
                let Some(&d_u) = distance.get(&edge.source()) else {
                    continue;
                };
                let weight = edge_weight(&inner, edge.weight(), use_strength);
                let candidate = d_u + weight;
                if distance
                    .get(&edge.target())
                    .map_or(true, |&d_v| candidate < d_v)
                {
                    distance.insert(edge.target(), candidate);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        // One more relaxation round detects reachable negative cycles.
        for edge in inner.arena.edge_references() {
            if let Some(&d_u) = distance.get(&edge.source()) {
                let weight = edge_weight(&inner, edge.weight(), use_strength);
                if distance
                    .get(&edge.target())
                    .map_or(false, |&d_v| d_u + weight < d_v)
                {
                    return Err(SeamGraphError::Internal(format!(
                        "negative cycle reachable from {}",
                        source_id
                    )));
                }
            }
        }

        Ok(distance
            .into_iter()
            .map(|(idx, d)| (inner.arena[idx].clone(), d))
            .collect())
    }

    /// All-pairs Bellman-Ford path lengths. Sources with a reachable
    /// negative cycle are skipped with a warning.
    pub fn all_pairs_bellman_ford(&self, use_strength: bool) -> HashMap<String, HashMap<String, f64>> {
        let node_ids: Vec<String> = {
            let inner = self.inner.read();
            inner.nodes.keys().cloned().collect()
        };

        let mut result = HashMap::new();
        for node_id in node_ids {
            match self.bellman_ford_from(&node_id, use_strength) {
                Ok(distances) => {
                    result.insert(node_id, distances);
                }
                Err(e) => warn!("bellman-ford skipped source {}: {}", node_id, e),
            }
        }
        result
    }

    pub fn detect_negative_cycles(&self, use_strength: bool) -> bool {
        let node_ids: Vec<String> = {
            let inner = self.inner.read();
            inner.nodes.keys().cloned().collect()
        };
        node_ids
            .iter()
            .any(|id| self.bellman_ford_from(id, use_strength).is_err())
    }

    // ------------------------------------------------------------------
    // Reachability and degree
    // ------------------------------------------------------------------

    /// All nodes that can reach `node_id`.
    pub fn find_ancestors(&self, node_id: &str) -> HashSet<String> {
        self.reachable_set(node_id, Direction::Incoming)
    }

    /// All nodes reachable from `node_id`.
    pub fn find_descendants(&self, node_id: &str) -> HashSet<String> {
        self.reachable_set(node_id, Direction::Outgoing)
    }

    fn reachable_set(&self, node_id: &str, direction: Direction) -> HashSet<String> {
        let inner = self.inner.read();
        let Some(start) = self.node_index(&inner, node_id) else {
            return HashSet::new();
        };

        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(start);
        while let Some(v) = queue.pop_front() {
            for next in inner.arena.neighbors_directed(v, direction) {
                if next != start && seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen.into_iter().map(|idx| inner.arena[idx].clone()).collect()
    }

    /// `(in_degree, out_degree, total_degree)`; zeros for unknown ids.
    pub fn node_degree(&self, node_id: &str) -> (usize, usize, usize) {
        let inner = self.inner.read();
        let Some(index) = self.node_index(&inner, node_id) else {
            return (0, 0, 0);
        };
        let in_degree = inner
            .arena
            .edges_directed(index, Direction::Incoming)
            .count();
        let out_degree = inner
            .arena
            .edges_directed(index, Direction::Outgoing)
            .count();
        (in_degree, out_degree, in_degree + out_degree)
    }

    /// Minimum-ish set of high-influence nodes: the top decile by total
    /// degree, at least one node.
    pub fn find_dominating_set(&self) -> Vec<String> {
        let inner = self.inner.read();
        let mut degrees: Vec<(String, usize)> = inner
            .nodes
            .values()
            .map(|record| {
                let total = inner
                    .arena
                    .edges_directed(record.index, Direction::Incoming)
                    .count()
                    + inner
                        .arena
                        .edges_directed(record.index, Direction::Outgoing)
                        .count();
                (record.node.id.clone(), total)
            })
            .collect();
        drop(inner);

        if degrees.is_empty() {
            return Vec::new();
        }
        degrees.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let top = (degrees.len() / 10).max(1);
        degrees.into_iter().take(top).map(|(id, _)| id).collect()
    }

    // ------------------------------------------------------------------
    // Composite reports
    // ------------------------------------------------------------------

    pub fn analyze_graph_connectivity(&self, use_strength: bool) -> ConnectivityReport {
        let (num_nodes, num_edges) = {
            let inner = self.inner.read();
            (inner.nodes.len(), inner.relationships.len())
        };

        let floyd = self.floyd_warshall_distances();
        let bellman = self.all_pairs_bellman_ford(use_strength);
        let has_negative_cycles = self.detect_negative_cycles(use_strength);

        let mut finite_distances = Vec::new();
        let mut reachable_pairs = 0usize;
        for (source, targets) in &floyd {
            for (target, distance) in targets {
                if source != target {
                    finite_distances.push(*distance);
                    reachable_pairs += 1;
                }
            }
        }

        let total_possible_pairs = num_nodes.saturating_mul(num_nodes.saturating_sub(1));
        let connectivity_ratio = if total_possible_pairs > 0 {
            reachable_pairs as f64 / total_possible_pairs as f64
        } else {
            0.0
        };

        let average_distance = if finite_distances.is_empty() {
            0.0
        } else {
            finite_distances.iter().sum::<f64>() / finite_distances.len() as f64
        };
        let maximum_distance = finite_distances.iter().cloned().fold(0.0, f64::max);
        let minimum_distance = finite_distances
            .iter()
            .cloned()
            .fold(f64::INFINITY, f64::min);
        let minimum_distance = if minimum_distance.is_finite() {
            minimum_distance
        } else {
            0.0
        };

        ConnectivityReport {
            num_nodes,
            num_edges,
            density: if num_nodes > 1 {
                num_edges as f64 / total_possible_pairs as f64
            } else {
                0.0
            },
            reachable_pairs,
            total_possible_pairs,
            connectivity_ratio,
            is_strongly_connected: total_possible_pairs > 0 && connectivity_ratio == 1.0,
            average_distance,
            maximum_distance,
            minimum_distance,
            has_negative_cycles,
            algorithms_agree: distance_matrices_agree(&floyd, &bellman, DEFAULT_TOLERANCE),
        }
    }

    pub fn node_connectivity_report(&self, node_id: &str) -> NodeConnectivityReport {
        let (in_degree, out_degree, total_degree) = self.node_degree(node_id);
        let ancestors = self.find_ancestors(node_id);
        let descendants = self.find_descendants(node_id);
        let layers = self.find_node_layers(node_id);
        let max_distance = layers.keys().copied().max().unwrap_or(0);
        let layer_sizes = layers
            .iter()
            .map(|(depth, ids)| (*depth, ids.len()))
            .collect();

        let centrality = self.calculate_centrality();
        let centrality_percentile = centrality.get(node_id).map_or(0.0, |score| {
            let mut all: Vec<f64> = centrality.values().copied().collect();
            all.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let rank = all.iter().filter(|s| *s <= score).count();
            rank as f64 / all.len() as f64 * 100.0
        });

        NodeConnectivityReport {
            node_id: node_id.to_string(),
            in_degree,
            out_degree,
            total_degree,
            ancestors_count: ancestors.len(),
            descendants_count: descendants.len(),
            max_distance_to_others: max_distance,
            layer_sizes,
            is_articulation_point: self
                .find_articulation_points()
                .iter()
                .any(|id| id == node_id),
            centrality_percentile,
        }
    }
}

fn distance_matrices_agree(
    a: &HashMap<String, HashMap<String, f64>>,
    b: &HashMap<String, HashMap<String, f64>>,
    tolerance: f64,
) -> bool {
    for (source, targets) in a {
        let Some(other_targets) = b.get(source) else {
            continue;
        };
        for (target, distance) in targets {
            if let Some(other) = other_targets.get(target) {
                if (distance - other).abs() > tolerance {
                    return false;
                }
            }
        }
    }
    true
}

/// Enumerate all simple cycles, each reported once with its smallest
/// index first. Self-loops are single-element cycles.
fn enumerate_simple_cycles(inner: &GraphInner) -> Vec<Vec<NodeIndex>> {
    let mut adjacency: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
    let mut cycles = Vec::new();

    for edge in inner.arena.edge_references() {
        if edge.source() == edge.target() {
            // Report each self-looping node once even with parallel loops.
            if !cycles.iter().any(|c: &Vec<NodeIndex>| c == &vec![edge.source()]) {
                cycles.push(vec![edge.source()]);
            }
            continue;
        }
        let targets = adjacency.entry(edge.source()).or_default();
        if !targets.contains(&edge.target()) {
            targets.push(edge.target());
        }
    }

    let mut indices: Vec<NodeIndex> = inner.arena.node_indices().collect();
    indices.sort();

    for &start in &indices {
        // Backtracking search restricted to indices >= start so each cycle
        // is found exactly once, rooted at its smallest member.
        let mut path = vec![start];
        let mut on_path: HashSet<NodeIndex> = HashSet::from([start]);
        let mut frames: Vec<std::vec::IntoIter<NodeIndex>> = vec![adjacency
            .get(&start)
            .cloned()
            .unwrap_or_default()
            .into_iter()];

        loop {
            let step = match frames.last_mut() {
                Some(frame) => frame.next(),
                None => break,
            };
            match step {
                Some(next) if next < start => {}
                Some(next) if next == start => {
                    if path.len() > 1 {
                        cycles.push(path.clone());
                    }
                }
                Some(next) if !on_path.contains(&next) => {
                    path.push(next);
                    on_path.insert(next);
                    frames.push(
                        adjacency
                            .get(&next)
                            .cloned()
                            .unwrap_or_default()
                            .into_iter(),
                    );
                }
                Some(_) => {}
                None => {
                    frames.pop();
                    if let Some(done) = path.pop() {
                        on_path.remove(&done);
                    }
                }
            }
        }
    }

    cycles
}

/// Articulation points and bridges of the undirected projection, via one
/// iterative low-link DFS. Parallel edges between a pair are never
/// bridges; self-loops are ignored.
fn articulation_points_and_bridges(
    inner: &GraphInner,
) -> (Vec<NodeIndex>, Vec<(NodeIndex, NodeIndex)>) {
    let mut adjacency: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
    let mut edge_count: HashMap<(NodeIndex, NodeIndex), usize> = HashMap::new();

    for edge in inner.arena.edge_references() {
        let (u, v) = (edge.source(), edge.target());
        if u == v {
            continue;
        }
        let key = if u < v { (u, v) } else { (v, u) };
        let count = edge_count.entry(key).or_insert(0);
        *count += 1;
        if *count == 1 {
            adjacency.entry(u).or_default().push(v);
            adjacency.entry(v).or_default().push(u);
        }
    }

    let mut disc: HashMap<NodeIndex, usize> = HashMap::new();
    let mut low: HashMap<NodeIndex, usize> = HashMap::new();
    let mut points = HashSet::new();
    let mut bridges = Vec::new();
    let mut timer = 0usize;

    for root in inner.arena.node_indices() {
        if disc.contains_key(&root) {
            continue;
        }

        let mut root_children = 0usize;
        // Stack frames: (node, parent, iterator position into adjacency).
        let mut stack: Vec<(NodeIndex, Option<NodeIndex>, usize)> = vec![(root, None, 0)];
        disc.insert(root, timer);
        low.insert(root, timer);
        timer += 1;

        loop {
            let Some(&(v, parent, cursor)) = stack.last() else {
                break;
            };
            let neighbors = adjacency.get(&v).cloned().unwrap_or_default();

            if cursor < neighbors.len() {
                stack.last_mut().unwrap().2 += 1;
                let next = neighbors[cursor];

                if Some(next) == parent {
                    continue;
                }
                if let Some(&next_disc) = disc.get(&next) {
                    let low_v = low[&v].min(next_disc);
                    low.insert(v, low_v);
                } else {
                    if v == root {
                        root_children += 1;
                    }
                    disc.insert(next, timer);
                    low.insert(next, timer);
                    timer += 1;
                    stack.push((next, Some(v), 0));
                }
            } else {
                stack.pop();
                if let Some(&(parent_node, _, _)) = stack.last() {
                    let low_v = low[&v];
                    let low_parent = low[&parent_node].min(low_v);
                    low.insert(parent_node, low_parent);

                    let key = if parent_node < v {
                        (parent_node, v)
                    } else {
                        (v, parent_node)
                    };
                    let parallel = edge_count.get(&key).copied().unwrap_or(0) > 1;
                    if low_v > disc[&parent_node] && !parallel {
                        bridges.push((parent_node, v));
                    }
                    if parent_node != root && low_v >= disc[&parent_node] {
                        points.insert(parent_node);
                    }
                }
            }
        }

        if root_children > 1 {
            points.insert(root);
        }
    }

    let mut points: Vec<NodeIndex> = points.into_iter().collect();
    points.sort();
    (points, bridges)
}
