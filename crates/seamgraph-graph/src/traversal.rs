use crate::graph::UniversalGraph;
use petgraph::visit::{Bfs, Dfs, EdgeRef};
use petgraph::Direction;
use seamgraph_core::RelationshipType;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Result of a depth-bounded DFS with seam awareness.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepthTraversal {
    pub nodes_by_depth: HashMap<u32, Vec<String>>,
    pub total_nodes: usize,
    pub seam_edges: Vec<(String, String)>,
    pub max_depth_reached: u32,
}

/// One cross-language hop discovered while tracing execution flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeamBridge {
    pub from_node: String,
    pub from_language: String,
    pub to_node: String,
    pub to_language: String,
    pub relationship_type: String,
}

/// Per-language execution flow from a starting node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossLanguageFlow {
    pub language_flow: HashMap<String, Vec<FlowNode>>,
    pub seam_bridges: Vec<SeamBridge>,
    pub languages_involved: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNode {
    pub node_id: String,
    pub name: String,
    pub depth: u32,
}

impl UniversalGraph {
    /// Depth-first traversal order starting at `source_id`; empty when
    /// the node is unknown.
    pub fn depth_first_search(&self, source_id: &str) -> Vec<String> {
        let inner = self.inner.read();
        let Some(record) = inner.nodes.get(source_id) else {
            return Vec::new();
        };

        let mut dfs = Dfs::new(&inner.arena, record.index);
        let mut order = Vec::new();
        while let Some(idx) = dfs.next(&inner.arena) {
            order.push(inner.arena[idx].clone());
        }
        order
    }

    /// Breadth-first traversal order, level by level.
    pub fn breadth_first_search(&self, source_id: &str) -> Vec<String> {
        let inner = self.inner.read();
        let Some(record) = inner.nodes.get(source_id) else {
            return Vec::new();
        };

        let mut bfs = Bfs::new(&inner.arena, record.index);
        let mut order = Vec::new();
        while let Some(idx) = bfs.next(&inner.arena) {
            order.push(inner.arena[idx].clone());
        }
        order
    }

    /// Nodes grouped by unit-weight distance from the source.
    pub fn find_node_layers(&self, source_id: &str) -> HashMap<u32, Vec<String>> {
        let inner = self.inner.read();
        let Some(record) = inner.nodes.get(source_id) else {
            return HashMap::new();
        };

        let distances =
            petgraph::algo::dijkstra(&inner.arena, record.index, None, |_| 1u32);

        let mut layers: HashMap<u32, Vec<String>> = HashMap::new();
        for (idx, distance) in distances {
            layers
                .entry(distance)
                .or_default()
                .push(inner.arena[idx].clone());
        }
        for ids in layers.values_mut() {
            ids.sort();
        }
        layers
    }

    /// Level-by-level DFS expansion bounded by `max_depth`. When
    /// `include_seams` is true, traversed SEAM edges are recorded; when
    /// false, SEAM edges are not followed at all.
    pub fn dfs_traversal_with_depth(
        &self,
        start_node_id: &str,
        max_depth: u32,
        include_seams: bool,
    ) -> DepthTraversal {
        let inner = self.inner.read();
        if !inner.nodes.contains_key(start_node_id) {
            return DepthTraversal::default();
        }

        let mut depth_map: HashMap<String, u32> = HashMap::new();
        depth_map.insert(start_node_id.to_string(), 0);
        let mut nodes_by_depth: HashMap<u32, Vec<String>> = HashMap::new();
        nodes_by_depth.insert(0, vec![start_node_id.to_string()]);
        let mut current_level: Vec<String> = vec![start_node_id.to_string()];
        let mut seam_edges = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();

        for depth in 1..=max_depth {
            let mut next_level = Vec::new();
            for node_id in &current_level {
                if !visited.insert(node_id.clone()) {
                    continue;
                }
                let Some(record) = inner.nodes.get(node_id) else {
                    continue;
                };
                for edge in inner
                    .arena
                    .edges_directed(record.index, Direction::Outgoing)
                {
                    let Some(edge_record) = inner.relationships.get(edge.weight()) else {
                        continue;
                    };
                    let is_seam =
                        edge_record.relationship.relationship_type == RelationshipType::Seam;
                    if is_seam && !include_seams {
                        continue;
                    }

                    let successor = inner.arena[edge.target()].clone();
                    if visited.contains(&successor) || depth_map.contains_key(&successor) {
                        continue;
                    }
                    depth_map.insert(successor.clone(), depth);
                    if is_seam {
                        seam_edges.push((node_id.clone(), successor.clone()));
                    }
                    next_level.push(successor);
                }
            }

            if next_level.is_empty() {
                break;
            }
            nodes_by_depth.insert(depth, next_level.clone());
            current_level = next_level;
        }

        let total_nodes = depth_map.len();
        let max_depth_reached = depth_map.values().copied().max().unwrap_or(0);
        DepthTraversal {
            nodes_by_depth,
            total_nodes,
            seam_edges,
            max_depth_reached,
        }
    }

    /// BFS call chain. With a target, returns the edge list of the first
    /// path found; without one, the BFS edge list up to `max_depth`.
    /// `follow_seams == false` excludes SEAM edges entirely.
    pub fn find_call_chain(
        &self,
        start_node_id: &str,
        end_node_id: Option<&str>,
        follow_seams: bool,
        max_depth: u32,
    ) -> Vec<(String, String)> {
        let inner = self.inner.read();
        if !inner.nodes.contains_key(start_node_id) {
            return Vec::new();
        }

        let neighbors = |node_id: &str| -> Vec<String> {
            let Some(record) = inner.nodes.get(node_id) else {
                return Vec::new();
            };
            inner
                .arena
                .edges_directed(record.index, Direction::Outgoing)
                .filter_map(|edge| {
                    let edge_record = inner.relationships.get(edge.weight())?;
                    if !follow_seams
                        && edge_record.relationship.relationship_type == RelationshipType::Seam
                    {
                        return None;
                    }
                    Some(inner.arena[edge.target()].clone())
                })
                .collect()
        };

        match end_node_id {
            None => {
                // Plain BFS edge list, one edge per newly discovered node.
                let mut visited = HashSet::from([start_node_id.to_string()]);
                let mut queue = VecDeque::from([start_node_id.to_string()]);
                let mut chain = Vec::new();
                while let Some(node_id) = queue.pop_front() {
                    if chain.len() >= max_depth as usize {
                        break;
                    }
                    for successor in neighbors(&node_id) {
                        if visited.insert(successor.clone()) {
                            chain.push((node_id.clone(), successor.clone()));
                            queue.push_back(successor);
                            if chain.len() >= max_depth as usize {
                                break;
                            }
                        }
                    }
                }
                chain
            }
            Some(target) => {
                let mut visited = HashSet::from([start_node_id.to_string()]);
                let mut parent: HashMap<String, String> = HashMap::new();
                let mut queue = VecDeque::from([start_node_id.to_string()]);
                let mut depth = 0;

                while !queue.is_empty() && depth < max_depth {
                    let mut next_queue = VecDeque::new();
                    while let Some(node_id) = queue.pop_front() {
                        if node_id == target {
                            let mut path = Vec::new();
                            let mut current = target.to_string();
                            while let Some(prev) = parent.get(&current) {
                                path.push((prev.clone(), current.clone()));
                                current = prev.clone();
                            }
                            path.reverse();
                            return path;
                        }
                        for successor in neighbors(&node_id) {
                            if visited.insert(successor.clone()) {
                                parent.insert(successor.clone(), node_id.clone());
                                next_queue.push_back(successor);
                            }
                        }
                    }
                    queue = next_queue;
                    depth += 1;
                }

                // The target may sit in the final frontier.
                if queue.iter().any(|id| id == target) {
                    let mut path = Vec::new();
                    let mut current = target.to_string();
                    while let Some(prev) = parent.get(&current) {
                        path.push((prev.clone(), current.clone()));
                        current = prev.clone();
                    }
                    path.reverse();
                    return path;
                }
                Vec::new()
            }
        }
    }

    /// BFS from `start_node_id` recording which languages are visited and
    /// every edge whose endpoints live in different languages.
    pub fn trace_cross_language_flow(
        &self,
        start_node_id: &str,
        max_depth: u32,
    ) -> CrossLanguageFlow {
        let inner = self.inner.read();
        if !inner.nodes.contains_key(start_node_id) {
            return CrossLanguageFlow::default();
        }

        let mut flow = CrossLanguageFlow::default();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, u32)> = VecDeque::from([(start_node_id.to_string(), 0)]);

        while let Some((node_id, depth)) = queue.pop_front() {
            if depth > max_depth || !visited.insert(node_id.clone()) {
                continue;
            }
            let Some(record) = inner.nodes.get(&node_id) else {
                continue;
            };
            let language = record.node.language.clone();
            flow.language_flow
                .entry(language.clone())
                .or_default()
                .push(FlowNode {
                    node_id: node_id.clone(),
                    name: record.node.name.clone(),
                    depth,
                });

            for edge in inner
                .arena
                .edges_directed(record.index, Direction::Outgoing)
            {
                let successor_id = inner.arena[edge.target()].clone();
                if visited.contains(&successor_id) {
                    continue;
                }
                if let Some(successor) = inner.nodes.get(&successor_id) {
                    if successor.node.language != language {
                        let relationship_type = inner
                            .relationships
                            .get(edge.weight())
                            .map(|r| r.relationship.relationship_type.to_string())
                            .unwrap_or_else(|| "unknown".to_string());
                        flow.seam_bridges.push(SeamBridge {
                            from_node: node_id.clone(),
                            from_language: language.clone(),
                            to_node: successor_id.clone(),
                            to_language: successor.node.language.clone(),
                            relationship_type,
                        });
                    }
                }
                queue.push_back((successor_id, depth + 1));
            }
        }

        flow.languages_involved = flow.language_flow.keys().cloned().collect();
        flow
    }
}
