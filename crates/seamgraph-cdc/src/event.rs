use chrono::{DateTime, Utc};
use seamgraph_core::{Result, SeamGraphError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kinds of graph mutations and analysis lifecycle events carried on
/// the CDC stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CdcEventType {
    NodeAdded,
    NodeDeleted,
    NodeUpdated,
    RelationshipAdded,
    RelationshipDeleted,
    GraphReset,
    AnalysisStarted,
    AnalysisCompleted,
    AnalysisProgress,
}

impl fmt::Display for CdcEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CdcEventType::NodeAdded => "node_added",
            CdcEventType::NodeDeleted => "node_deleted",
            CdcEventType::NodeUpdated => "node_updated",
            CdcEventType::RelationshipAdded => "relationship_added",
            CdcEventType::RelationshipDeleted => "relationship_deleted",
            CdcEventType::GraphReset => "graph_reset",
            CdcEventType::AnalysisStarted => "analysis_started",
            CdcEventType::AnalysisCompleted => "analysis_completed",
            CdcEventType::AnalysisProgress => "analysis_progress",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for CdcEventType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "node_added" => Ok(CdcEventType::NodeAdded),
            "node_deleted" => Ok(CdcEventType::NodeDeleted),
            "node_updated" => Ok(CdcEventType::NodeUpdated),
            "relationship_added" => Ok(CdcEventType::RelationshipAdded),
            "relationship_deleted" => Ok(CdcEventType::RelationshipDeleted),
            "graph_reset" => Ok(CdcEventType::GraphReset),
            "analysis_started" => Ok(CdcEventType::AnalysisStarted),
            "analysis_completed" => Ok(CdcEventType::AnalysisCompleted),
            "analysis_progress" => Ok(CdcEventType::AnalysisProgress),
            other => Err(format!("unknown CDC event type: {}", other)),
        }
    }
}

/// A single graph mutation, durably appended to the stream and
/// optionally broadcast on the fan-out topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdcEvent {
    pub event_id: String,
    pub event_type: CdcEventType,
    pub timestamp: DateTime<Utc>,
    pub entity_id: String,
    /// "node", "relationship" or "metadata".
    pub entity_type: String,
    pub data: serde_json::Value,
}

impl CdcEvent {
    pub fn new(
        event_type: CdcEventType,
        entity_id: impl Into<String>,
        entity_type: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type,
            timestamp: Utc::now(),
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            data,
        }
    }

    /// Stream projection: every field as a string, `data` JSON-encoded.
    /// Enum-typed payload fields are already canonical strings because
    /// the whole tree serializes through serde.
    pub fn to_redis_format(&self) -> HashMap<String, String> {
        HashMap::from([
            ("event_id".to_string(), self.event_id.clone()),
            ("event_type".to_string(), self.event_type.to_string()),
            ("timestamp".to_string(), self.timestamp.to_rfc3339()),
            ("entity_id".to_string(), self.entity_id.clone()),
            ("entity_type".to_string(), self.entity_type.clone()),
            ("data".to_string(), self.data.to_string()),
        ])
    }

    pub fn from_redis_format(fields: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| -> Result<&String> {
            fields
                .get(key)
                .ok_or_else(|| SeamGraphError::ParseFailure(format!("missing CDC field {}", key)))
        };

        Ok(Self {
            event_id: get("event_id")?.clone(),
            event_type: get("event_type")?
                .parse()
                .map_err(SeamGraphError::ParseFailure)?,
            timestamp: DateTime::parse_from_rfc3339(get("timestamp")?)
                .map_err(|e| SeamGraphError::ParseFailure(e.to_string()))?
                .with_timezone(&Utc),
            entity_id: get("entity_id")?.clone(),
            entity_type: get("entity_type")?.clone(),
            data: serde_json::from_str(get("data")?)?,
        })
    }

    /// Compact notification published on the fan-out topic.
    pub fn to_notification(&self) -> String {
        serde_json::json!({
            "event_type": self.event_type.to_string(),
            "entity_id": self.entity_id,
            "entity_type": self.entity_type,
            "timestamp": self.timestamp.to_rfc3339(),
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_format_round_trips_exactly() {
        let event = CdcEvent::new(
            CdcEventType::NodeAdded,
            "function:a.py:f:1",
            "node",
            serde_json::json!({"name": "f", "node_type": "function"}),
        );
        let restored = CdcEvent::from_redis_format(&event.to_redis_format()).unwrap();
        assert_eq!(restored, event);
    }

    #[test]
    fn event_type_strings_are_snake_case() {
        assert_eq!(CdcEventType::RelationshipAdded.to_string(), "relationship_added");
        assert_eq!(
            "analysis_progress".parse::<CdcEventType>().unwrap(),
            CdcEventType::AnalysisProgress
        );
        assert!("bogus".parse::<CdcEventType>().is_err());
    }

    #[test]
    fn missing_fields_fail_parsing() {
        let mut fields = CdcEvent::new(
            CdcEventType::GraphReset,
            "graph",
            "metadata",
            serde_json::json!({}),
        )
        .to_redis_format();
        fields.remove("timestamp");
        assert!(CdcEvent::from_redis_format(&fields).is_err());
    }
}
