use crate::{UniversalNode, UniversalRelationship};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Flat node record for query responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResponse {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub language: String,
    pub file_path: Option<String>,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
    #[serde(default)]
    pub complexity: u32,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl From<&UniversalNode> for NodeResponse {
    fn from(node: &UniversalNode) -> Self {
        Self {
            id: node.id.clone(),
            name: node.name.clone(),
            node_type: node.node_type.to_string(),
            language: node.language.clone(),
            file_path: Some(node.location.file_path.clone()),
            start_line: Some(node.location.start_line),
            end_line: Some(node.location.end_line),
            complexity: node.complexity,
            metadata: node.metadata.clone(),
        }
    }
}

/// Flat relationship record for query responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipResponse {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    #[serde(rename = "type")]
    pub relationship_type: String,
    #[serde(default)]
    pub is_seam: bool,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl From<&UniversalRelationship> for RelationshipResponse {
    fn from(rel: &UniversalRelationship) -> Self {
        Self {
            id: rel.id.clone(),
            source_id: rel.source_id.clone(),
            target_id: rel.target_id.clone(),
            relationship_type: rel.relationship_type.to_string(),
            is_seam: rel.relationship_type == crate::RelationshipType::Seam,
            metadata: rel.metadata.clone(),
        }
    }
}

/// Response for graph traversal queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalResponse {
    pub nodes: Vec<NodeResponse>,
    pub edges: Vec<RelationshipResponse>,
    pub stats: HashMap<String, serde_json::Value>,
    pub execution_time_ms: f64,
    #[serde(default)]
    pub query_type: String,
    pub start_node_id: Option<String>,
    pub max_depth: Option<u32>,
}

/// Response for node search queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultResponse {
    pub results: Vec<NodeResponse>,
    pub total_count: usize,
    pub query: String,
    #[serde(default)]
    pub filters: HashMap<String, serde_json::Value>,
}

/// Response for call chain traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallChainResponse {
    pub chain: Vec<NodeResponse>,
    pub edges: Vec<RelationshipResponse>,
    pub has_seams: bool,
    pub seam_count: usize,
    pub total_hops: usize,
    pub execution_time_ms: f64,
}

/// Response for graph statistics queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStatsResponse {
    pub total_nodes: usize,
    pub total_relationships: usize,
    pub node_types: HashMap<String, usize>,
    pub relationship_types: HashMap<String, usize>,
    pub languages: HashMap<String, usize>,
    pub seam_count: usize,
    pub complexity_distribution: HashMap<String, usize>,
    pub execution_time_ms: f64,
}

/// Response describing one cross-language seam edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeamResponse {
    pub id: String,
    pub source_id: String,
    pub source_name: String,
    pub source_language: String,
    pub target_id: String,
    pub target_name: String,
    pub target_language: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Location, NodeType, RelationshipType};

    #[test]
    fn node_response_flattens_location() {
        let node = UniversalNode::new(
            "function:a.py:main:1",
            "main",
            NodeType::Function,
            Location::new("a.py", 1, 4, "Python"),
        )
        .with_complexity(3);
        let resp = NodeResponse::from(&node);
        assert_eq!(resp.node_type, "function");
        assert_eq!(resp.file_path.as_deref(), Some("a.py"));
        assert_eq!(resp.start_line, Some(1));
        assert_eq!(resp.complexity, 3);
    }

    #[test]
    fn seam_edges_are_flagged() {
        let rel = UniversalRelationship::new("s1", "a", "b", RelationshipType::Seam);
        let resp = RelationshipResponse::from(&rel);
        assert!(resp.is_seam);
        assert_eq!(resp.relationship_type, "seam");
    }
}
