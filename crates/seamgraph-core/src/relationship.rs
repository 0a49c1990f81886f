use crate::RelationshipType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_strength() -> f32 {
    1.0
}

/// A typed directed edge between two nodes.
///
/// `Seam` edges mark cross-language boundaries: the endpoints live in
/// different source languages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniversalRelationship {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub relationship_type: RelationshipType,
    #[serde(default = "default_strength")]
    pub strength: f32,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl UniversalRelationship {
    pub fn new(
        id: impl Into<String>,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relationship_type: RelationshipType,
    ) -> Self {
        Self {
            id: id.into(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            relationship_type,
            strength: default_strength(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_strength(mut self, strength: f32) -> Self {
        self.strength = strength;
        self
    }

    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strength_defaults_to_one_on_deserialize() {
        let rel: UniversalRelationship = serde_json::from_str(
            r#"{"id":"e1","source_id":"a","target_id":"b","relationship_type":"calls"}"#,
        )
        .unwrap();
        assert_eq!(rel.strength, 1.0);
        assert_eq!(rel.relationship_type, RelationshipType::Calls);
    }
}
