use crate::graph::UniversalGraph;
use seamgraph_core::{
    Location, NodeType, RelationshipType, Result, SeamGraphError, UniversalNode,
    UniversalRelationship,
};
use serde_json::json;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

fn node_color(node_type: NodeType) -> &'static str {
    match node_type {
        NodeType::Module => "lightblue",
        NodeType::Class => "lightgreen",
        NodeType::Function => "orange",
        NodeType::Variable => "lightgray",
        NodeType::Import => "purple",
        _ => "white",
    }
}

fn edge_color(relationship_type: RelationshipType) -> &'static str {
    match relationship_type {
        RelationshipType::Calls => "red",
        RelationshipType::Contains => "blue",
        RelationshipType::Imports => "green",
        RelationshipType::References => "orange",
        RelationshipType::Inherits => "purple",
        _ => "black",
    }
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

impl UniversalGraph {
    /// Serialize to node-link JSON. Round-tripping through `from_json`
    /// reconstructs the logical graph; arena handles are rebuilt.
    pub fn to_json(&self) -> Result<String> {
        let mut nodes: Vec<serde_json::Value> = self
            .all_nodes()
            .iter()
            .map(|node| {
                json!({
                    "id": node.id,
                    "name": node.name,
                    "type": node.node_type.to_string(),
                    "language": node.language,
                    "file": node.location.file_path,
                    "line": node.location.start_line,
                    "end_line": node.location.end_line,
                    "complexity": node.complexity,
                })
            })
            .collect();
        nodes.sort_by_key(|n| n["id"].as_str().unwrap_or_default().to_string());

        let mut edges: Vec<serde_json::Value> = self
            .all_relationships()
            .iter()
            .map(|rel| {
                json!({
                    "id": rel.id,
                    "source": rel.source_id,
                    "target": rel.target_id,
                    "type": rel.relationship_type.to_string(),
                    "strength": rel.strength,
                })
            })
            .collect();
        edges.sort_by_key(|e| e["id"].as_str().unwrap_or_default().to_string());

        Ok(serde_json::to_string(&json!({
            "nodes": nodes,
            "edges": edges,
        }))?)
    }

    /// Replace the graph contents with the node-link JSON payload:
    /// clears first, then recreates nodes with fresh handles, then edges.
    pub fn from_json(&self, payload: &str) -> Result<()> {
        let data: serde_json::Value = serde_json::from_str(payload)?;

        self.clear();

        for node_data in data["nodes"].as_array().into_iter().flatten() {
            let Some(id) = node_data["id"].as_str() else {
                warn!("skipping node without id in JSON payload");
                continue;
            };
            let node_type: NodeType = node_data["type"]
                .as_str()
                .unwrap_or("other")
                .parse()
                .unwrap_or(NodeType::Other);
            let language = node_data["language"].as_str().unwrap_or_default();
            let start_line = node_data["line"].as_u64().unwrap_or(1) as u32;
            let end_line = node_data["end_line"].as_u64().unwrap_or(start_line as u64) as u32;

            let node = UniversalNode::new(
                id,
                node_data["name"].as_str().unwrap_or_default(),
                node_type,
                Location::new(
                    node_data["file"].as_str().unwrap_or_default(),
                    start_line,
                    end_line,
                    language,
                ),
            )
            .with_complexity(node_data["complexity"].as_u64().unwrap_or(0) as u32);
            self.add_node(node);
        }

        for edge_data in data["edges"].as_array().into_iter().flatten() {
            let (Some(id), Some(source), Some(target)) = (
                edge_data["id"].as_str(),
                edge_data["source"].as_str(),
                edge_data["target"].as_str(),
            ) else {
                warn!("skipping malformed edge in JSON payload");
                continue;
            };
            let relationship_type: RelationshipType = edge_data["type"]
                .as_str()
                .unwrap_or_default()
                .parse()
                .map_err(SeamGraphError::ParseFailure)?;
            let strength = edge_data["strength"].as_f64().unwrap_or(1.0) as f32;

            self.add_relationship(
                UniversalRelationship::new(id, source, target, relationship_type)
                    .with_strength(strength),
            );
        }

        info!("graph loaded from JSON");
        Ok(())
    }

    /// Export to DOT for Graphviz rendering.
    pub fn to_dot(&self) -> String {
        let mut nodes = self.all_nodes();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut relationships = self.all_relationships();
        relationships.sort_by(|a, b| a.id.cmp(&b.id));

        let mut out = String::from("digraph G {\n  rankdir=TB;\n  concentrate=true;\n");
        for node in &nodes {
            let shape = if node.node_type == NodeType::Function {
                "box"
            } else {
                "ellipse"
            };
            out.push_str(&format!(
                "  \"{}\" [label=\"{}\\n({})\", shape={}, color={}];\n",
                node.id,
                node.name,
                node.node_type,
                shape,
                node_color(node.node_type)
            ));
        }
        for rel in &relationships {
            out.push_str(&format!(
                "  \"{}\" -> \"{}\" [label=\"{}\", color={}];\n",
                rel.source_id,
                rel.target_id,
                rel.relationship_type,
                edge_color(rel.relationship_type)
            ));
        }
        out.push_str("}\n");
        out
    }

    pub fn write_dot(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_dot())?;
        info!("DOT file written to {}", path.display());
        Ok(())
    }

    /// Export to GraphML with canonical node/edge attributes.
    pub fn write_graphml(&self, path: &Path) -> Result<()> {
        let mut nodes = self.all_nodes();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut relationships = self.all_relationships();
        relationships.sort_by(|a, b| a.id.cmp(&b.id));

        let mut file = std::fs::File::create(path)?;
        writeln!(file, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>")?;
        writeln!(
            file,
            "<graphml xmlns=\"http://graphml.graphdrawing.org/xmlns\">"
        )?;
        writeln!(file, "  <graph id=\"G\" edgedefault=\"directed\">")?;

        for node in &nodes {
            writeln!(file, "    <node id=\"{}\">", xml_escape(&node.id))?;
            for (key, value) in [
                ("name", node.name.clone()),
                ("type", node.node_type.to_string()),
                ("language", node.language.clone()),
                ("file", node.location.file_path.clone()),
                ("line", node.location.start_line.to_string()),
                ("complexity", node.complexity.to_string()),
            ] {
                writeln!(
                    file,
                    "      <data key=\"{}\">{}</data>",
                    key,
                    xml_escape(&value)
                )?;
            }
            writeln!(file, "    </node>")?;
        }

        for rel in &relationships {
            writeln!(
                file,
                "    <edge source=\"{}\" target=\"{}\">",
                xml_escape(&rel.source_id),
                xml_escape(&rel.target_id)
            )?;
            for (key, value) in [
                ("id", rel.id.clone()),
                ("type", rel.relationship_type.to_string()),
                ("strength", rel.strength.to_string()),
            ] {
                writeln!(
                    file,
                    "      <data key=\"{}\">{}</data>",
                    key,
                    xml_escape(&value)
                )?;
            }
            writeln!(file, "    </edge>")?;
        }

        writeln!(file, "  </graph>")?;
        writeln!(file, "</graphml>")?;
        info!("GraphML file written to {}", path.display());
        Ok(())
    }
}
