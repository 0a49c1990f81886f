use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Cache tier selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    MemoryOnly,
    RemoteOnly,
    Hybrid,
    /// Try the remote tier; degrade to memory-only when it is unreachable.
    RemoteFallback,
}

impl Default for CacheStrategy {
    fn default() -> Self {
        CacheStrategy::Hybrid
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub strategy: CacheStrategy,
    /// Default entry TTL in seconds (one week).
    pub default_ttl_s: u64,
    /// Entries above this size are gzip-compressed.
    pub compression_threshold_bytes: usize,
    /// Key prefix for every entry written by this project.
    pub prefix: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            strategy: CacheStrategy::default(),
            default_ttl_s: 604_800,
            compression_threshold_bytes: 1024,
            prefix: "code_graph".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserSettings {
    /// Files larger than this are skipped during traversal.
    pub max_file_bytes: u64,
}

impl Default for ParserSettings {
    fn default() -> Self {
        Self {
            max_file_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    /// Name substrings that make a FUNCTION self-loop count as ordinary
    /// recursion instead of a reported cycle.
    pub recursion_name_patterns: Vec<String>,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            recursion_name_patterns: [
                "recursive",
                "recurse",
                "factorial",
                "fibonacci",
                "traverse",
                "walk",
                "visit",
                "search",
                "sort",
                "merge",
                "quick",
                "binary",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    /// Queries declaring more hops than this route to the external store.
    pub hop_threshold: u32,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self { hop_threshold: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CdcSettings {
    pub stream_key: String,
    pub pubsub_key: String,
}

impl Default for CdcSettings {
    fn default() -> Self {
        Self {
            stream_key: "code_graph:cdc".to_string(),
            pubsub_key: "code_graph:events".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Full-project analysis timeout in seconds.
    pub timeout_s: u64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self { timeout_s: 300 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherSettings {
    /// Debounce window for change callbacks, in seconds.
    pub debounce_s: f64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self { debounce_s: 2.0 }
    }
}

/// Top-level configuration threaded through the analysis engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeamGraphConfig {
    pub project_root: PathBuf,
    pub cache: CacheSettings,
    pub parser: ParserSettings,
    pub graph: GraphSettings,
    pub router: RouterSettings,
    pub cdc: CdcSettings,
    pub analysis: AnalysisSettings,
    pub watcher: WatcherSettings,
}

impl SeamGraphConfig {
    pub fn for_project(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SeamGraphConfig::default();
        assert_eq!(config.cache.default_ttl_s, 604_800);
        assert_eq!(config.cache.compression_threshold_bytes, 1024);
        assert_eq!(config.parser.max_file_bytes, 1024 * 1024);
        assert_eq!(config.router.hop_threshold, 3);
        assert_eq!(config.cdc.stream_key, "code_graph:cdc");
        assert_eq!(config.analysis.timeout_s, 300);
        assert_eq!(config.watcher.debounce_s, 2.0);
        assert!(config
            .graph
            .recursion_name_patterns
            .contains(&"factorial".to_string()));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: SeamGraphConfig =
            serde_json::from_str(r#"{"router": {"hop_threshold": 5}}"#).unwrap();
        assert_eq!(config.router.hop_threshold, 5);
        assert_eq!(config.analysis.timeout_s, 300);
    }
}
