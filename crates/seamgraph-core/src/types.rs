use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Module,
    Class,
    Function,
    Method,
    Variable,
    Import,
    Parameter,
    Other,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeType::Module => "module",
            NodeType::Class => "class",
            NodeType::Function => "function",
            NodeType::Method => "method",
            NodeType::Variable => "variable",
            NodeType::Import => "import",
            NodeType::Parameter => "parameter",
            NodeType::Other => "other",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "module" => Ok(NodeType::Module),
            "class" => Ok(NodeType::Class),
            "function" => Ok(NodeType::Function),
            "method" => Ok(NodeType::Method),
            "variable" => Ok(NodeType::Variable),
            "import" => Ok(NodeType::Import),
            "parameter" => Ok(NodeType::Parameter),
            _ => Ok(NodeType::Other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Contains,
    Calls,
    Imports,
    References,
    Inherits,
    Seam,
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelationshipType::Contains => "contains",
            RelationshipType::Calls => "calls",
            RelationshipType::Imports => "imports",
            RelationshipType::References => "references",
            RelationshipType::Inherits => "inherits",
            RelationshipType::Seam => "seam",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for RelationshipType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "contains" => Ok(RelationshipType::Contains),
            "calls" => Ok(RelationshipType::Calls),
            "imports" => Ok(RelationshipType::Imports),
            "references" => Ok(RelationshipType::References),
            "inherits" => Ok(RelationshipType::Inherits),
            "seam" => Ok(RelationshipType::Seam),
            other => Err(format!("unknown relationship type: {}", other)),
        }
    }
}

/// Source span of a graph entity. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub language: String,
}

impl Location {
    pub fn new(
        file_path: impl Into<String>,
        start_line: u32,
        end_line: u32,
        language: impl Into<String>,
    ) -> Self {
        let end_line = end_line.max(start_line);
        Self {
            file_path: file_path.into(),
            start_line,
            end_line,
            language: language.into(),
        }
    }
}

/// File identity snapshot used to validate cached parse results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_path: String,
    pub modification_time: f64,
    pub size: u64,
    pub content_hash: String,
}

impl FileMetadata {
    /// Snapshot the current identity of a file on disk. The content hash
    /// is the first 16 hex characters of the SHA-256 digest.
    pub fn from_path(path: &Path) -> crate::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let mtime = meta
            .modified()?
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| crate::SeamGraphError::Internal(e.to_string()))?
            .as_secs_f64();

        let content = std::fs::read(path)?;
        let digest = Sha256::digest(&content);
        let content_hash = hex_prefix(&digest, 16);

        Ok(Self {
            file_path: path.to_string_lossy().to_string(),
            modification_time: mtime,
            size: meta.len(),
            content_hash,
        })
    }
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    let mut out = String::with_capacity(len);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
        if out.len() >= len {
            break;
        }
    }
    out.truncate(len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn relationship_type_round_trips_through_display() {
        for rel in [
            RelationshipType::Contains,
            RelationshipType::Calls,
            RelationshipType::Imports,
            RelationshipType::References,
            RelationshipType::Inherits,
            RelationshipType::Seam,
        ] {
            let parsed: RelationshipType = rel.to_string().parse().unwrap();
            assert_eq!(parsed, rel);
        }
    }

    #[test]
    fn node_type_serializes_as_snake_case_string() {
        let json = serde_json::to_string(&NodeType::Function).unwrap();
        assert_eq!(json, "\"function\"");
    }

    #[test]
    fn location_clamps_end_line() {
        let loc = Location::new("a.py", 10, 3, "Python");
        assert_eq!(loc.end_line, 10);
    }

    #[test]
    fn file_metadata_changes_with_content() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "hello").unwrap();
        let before = FileMetadata::from_path(tmp.path()).unwrap();
        assert_eq!(before.content_hash.len(), 16);

        writeln!(tmp, "world").unwrap();
        tmp.flush().unwrap();
        let after = FileMetadata::from_path(tmp.path()).unwrap();
        assert_ne!(before.content_hash, after.content_hash);
        assert_ne!(before.size, after.size);
    }
}
