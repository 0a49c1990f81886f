use crate::{Location, NodeType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A language-agnostic code entity: file, function, class, import or module.
///
/// The `id` is globally unique and stable across re-parses of unchanged
/// content. Canonical forms:
/// `file:<path>`, `function:<path>:<name>:<start_line>`,
/// `class:<path>:<name>:<start_line>`, `import:<path>:<target>:<start_line>`,
/// `module:<logical name>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniversalNode {
    pub id: String,
    pub name: String,
    pub node_type: NodeType,
    pub location: Location,
    pub language: String,
    #[serde(default)]
    pub complexity: u32,
    #[serde(default)]
    pub line_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl UniversalNode {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        node_type: NodeType,
        location: Location,
    ) -> Self {
        let language = location.language.clone();
        Self {
            id: id.into(),
            name: name.into(),
            node_type,
            location,
            language,
            complexity: 0,
            line_count: 0,
            content: None,
            docstring: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_complexity(mut self, complexity: u32) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_line_count(mut self, line_count: u32) -> Self {
        self.line_count = line_count;
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_docstring(mut self, docstring: impl Into<String>) -> Self {
        self.docstring = Some(docstring.into());
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
    fn builder_carries_language_from_location() {
        let node = UniversalNode::new(
            "function:a.py:main:1",
            "main",
            NodeType::Function,
            Location::new("a.py", 1, 3, "Python"),
        )
        .with_complexity(2)
        .with_metadata("ast_pattern", "function_definition");

        assert_eq!(node.language, "Python");
        assert_eq!(node.complexity, 2);
        assert_eq!(
            node.metadata.get("ast_pattern").unwrap(),
            &serde_json::json!("function_definition")
        );
    }
}
