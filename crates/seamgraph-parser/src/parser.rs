// ABOUTME: The universal parser: one file in, graph nodes/edges out, cache-aware.
// ABOUTME: Extraction is language-agnostic over matcher results; only pattern ids vary.
use crate::ignore_engine::IgnoreEngine;
use crate::language::{LanguageConfig, LanguageRegistry};
use crate::matcher::{AstMatch, AstMatcher, TreeSitterMatcher};
use once_cell::sync::Lazy;
use regex::Regex;
use seamgraph_cache::HybridCacheManager;
use seamgraph_core::{
    Location, NodeType, ParserSettings, RelationshipType, Result, UniversalNode,
    UniversalRelationship,
};
use seamgraph_graph::UniversalGraph;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

static FUNCTION_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:def|function|func|fn)\s+(\w+)").unwrap());
static CLASS_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:class|struct|interface)\s+(\w+)").unwrap());
static IMPORT_TARGET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:import|from)\s+([.\w]+)").unwrap());
static CALL_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([A-Za-z_]\w*)\s*\(").unwrap());
static DECISION_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:if|for|while|catch|switch|case)\b").unwrap());

/// Parses source files of any supported language into universal nodes
/// and relationships, inserting them into the graph. Per-file results
/// are cached and validated by file identity.
pub struct UniversalParser {
    registry: LanguageRegistry,
    matcher: Arc<dyn AstMatcher>,
    graph: Arc<UniversalGraph>,
    cache: Option<Arc<HybridCacheManager>>,
    ignore: IgnoreEngine,
    max_file_bytes: u64,
}

impl UniversalParser {
    pub fn new(
        graph: Arc<UniversalGraph>,
        cache: Option<Arc<HybridCacheManager>>,
        settings: &ParserSettings,
    ) -> Self {
        Self::with_matcher(graph, cache, settings, Arc::new(TreeSitterMatcher::new()))
    }

    pub fn with_matcher(
        graph: Arc<UniversalGraph>,
        cache: Option<Arc<HybridCacheManager>>,
        settings: &ParserSettings,
        matcher: Arc<dyn AstMatcher>,
    ) -> Self {
        Self {
            registry: LanguageRegistry::new(),
            matcher,
            graph,
            cache,
            ignore: IgnoreEngine::new(),
            max_file_bytes: settings.max_file_bytes,
        }
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn ignore_engine(&self) -> &IgnoreEngine {
        &self.ignore
    }

    pub fn is_supported_file(&self, path: &Path) -> bool {
        self.registry.by_extension(path).is_some()
    }

    /// Parse one file into the graph. Returns `Ok(true)` when the file's
    /// nodes and edges were inserted (fresh or from cache) and the file
    /// was marked processed; `Ok(false)` on unsupported or failed files,
    /// which stay unprocessed.
    pub async fn parse_file(&self, path: &Path) -> Result<bool> {
        let Some(config) = self.registry.by_extension(path) else {
            debug!("unsupported file type: {}", path.display());
            return Ok(false);
        };

        if !self.matcher.is_available(config.language_id) {
            warn!(
                "no matcher backend for {}, skipping {}",
                config.language_id,
                path.display()
            );
            return Ok(false);
        }

        if let Some(cache) = &self.cache {
            if cache.is_file_cached_and_valid(path).await {
                debug!("loading cached data for {}", path.display());
                if self.load_cached(path, cache).await {
                    return Ok(true);
                }
                // Fall through to a fresh parse on any cache decode issue.
            }
        }

        let content = match read_with_encoding_fallback(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("failed to read {}: {}", path.display(), e);
                return Ok(false);
            }
        };

        let (nodes, relationships) = self.extract(path, config, &content);

        if let Some(cache) = &self.cache {
            let path_str = path.to_string_lossy();
            cache.set_file_nodes(&path_str, &nodes).await;
            cache
                .set_file_relationships(&path_str, &relationships)
                .await;
        }

        self.graph.mark_file_processed(&path.to_string_lossy());
        debug!(
            "parsed {} ({}): {} nodes, {} relationships",
            path.display(),
            config.name,
            nodes.len(),
            relationships.len()
        );
        Ok(true)
    }

    async fn load_cached(&self, path: &Path, cache: &HybridCacheManager) -> bool {
        let path_str = path.to_string_lossy();
        let Some(nodes) = cache.get_file_nodes(&path_str).await else {
            return false;
        };
        let relationships = cache
            .get_file_relationships(&path_str)
            .await
            .unwrap_or_default();

        for node in nodes {
            self.graph.add_node(node);
        }
        for relationship in relationships {
            self.graph.add_relationship(relationship);
        }
        self.graph.mark_file_processed(&path_str);
        true
    }

    /// Extract the file node, functions, classes, imports and call edges,
    /// inserting each into the graph as it is built. Nodes go in before
    /// their edges, and CONTAINS edges before CALLS edges, because
    /// call-site resolution needs the containing function in the graph.
    /// Returns everything created for cache write-back.
    fn extract(
        &self,
        path: &Path,
        config: &LanguageConfig,
        content: &str,
    ) -> (Vec<UniversalNode>, Vec<UniversalRelationship>) {
        let path_str = path.to_string_lossy().to_string();
        let file_id = format!("file:{}", path_str);
        let line_count = content.matches('\n').count() as u32 + 1;

        let mut nodes = Vec::new();
        let mut relationships = Vec::new();

        let add_node = |node: UniversalNode, nodes: &mut Vec<UniversalNode>| {
            self.graph.add_node(node.clone());
            nodes.push(node);
        };
        let add_edge =
            |edge: UniversalRelationship, relationships: &mut Vec<UniversalRelationship>| {
                self.graph.add_relationship(edge.clone());
                relationships.push(edge);
            };

        let file_node = UniversalNode::new(
            file_id.clone(),
            path.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path_str.clone()),
            NodeType::Module,
            Location::new(path_str.clone(), 1, line_count, config.name),
        )
        .with_line_count(line_count)
        .with_content(content)
        .with_metadata("file_size", content.len())
        .with_metadata(
            "extension",
            path.extension()
                .map(|e| e.to_string_lossy().to_string())
                .unwrap_or_default(),
        );
        add_node(file_node, &mut nodes);

        // Functions are tracked locally so call sites can resolve their
        // innermost containing function.
        let mut functions: Vec<(String, u32, u32)> = Vec::new();
        for m in self.matcher.match_all(content, config.language_id, "function") {
            let Some(name) = extract_name(&m.text) else {
                continue;
            };
            let id = format!("function:{}:{}:{}", path_str, name, m.start_line);
            functions.push((id.clone(), m.start_line, m.end_line));
            add_node(
                UniversalNode::new(
                    id.clone(),
                    name,
                    NodeType::Function,
                    Location::new(path_str.clone(), m.start_line, m.end_line, config.name),
                )
                .with_complexity(cyclomatic_complexity(&m.text))
                .with_metadata(
                    "ast_pattern",
                    config.patterns.get("function").unwrap_or_default(),
                ),
                &mut nodes,
            );
            add_edge(
                UniversalRelationship::new(
                    format!("contains:{}:{}", path_str, id),
                    file_id.clone(),
                    id,
                    RelationshipType::Contains,
                ),
                &mut relationships,
            );
        }

        for m in self.matcher.match_all(content, config.language_id, "class") {
            let Some(name) = extract_name(&m.text) else {
                continue;
            };
            let id = format!("class:{}:{}:{}", path_str, name, m.start_line);
            add_node(
                UniversalNode::new(
                    id.clone(),
                    name,
                    NodeType::Class,
                    Location::new(path_str.clone(), m.start_line, m.end_line, config.name),
                )
                .with_line_count(m.end_line - m.start_line + 1)
                .with_metadata(
                    "ast_pattern",
                    config.patterns.get("class").unwrap_or_default(),
                ),
                &mut nodes,
            );
            add_edge(
                UniversalRelationship::new(
                    format!("contains:{}:{}", path_str, id),
                    file_id.clone(),
                    id,
                    RelationshipType::Contains,
                ),
                &mut relationships,
            );
        }

        for m in self.matcher.match_all(content, config.language_id, "import") {
            let Some(target) = extract_import_target(&m.text) else {
                continue;
            };
            let id = format!("import:{}:{}:{}", path_str, target, m.start_line);
            add_node(
                UniversalNode::new(
                    id.clone(),
                    target.clone(),
                    NodeType::Import,
                    Location::new(path_str.clone(), m.start_line, m.start_line, config.name),
                )
                .with_metadata(
                    "ast_pattern",
                    config.patterns.get("import").unwrap_or_default(),
                ),
                &mut nodes,
            );
            // The module node may never be modeled; the graph drops the
            // edge in that case.
            add_edge(
                UniversalRelationship::new(
                    format!("imports:{}:{}", path_str, id),
                    file_id.clone(),
                    format!("module:{}", target),
                    RelationshipType::Imports,
                ),
                &mut relationships,
            );
        }

        // Call sites resolve against this file's functions (just added)
        // and anything previously parsed into the graph.
        for m in self.matcher.match_all(content, config.language_id, "call") {
            let Some(call_name) = extract_call_name(&m.text) else {
                continue;
            };
            let call_line = m.start_line;

            let Some(caller_id) = innermost_function(&functions, call_line) else {
                continue;
            };

            for callee in self.graph.find_nodes_by_name(&call_name, false) {
                if callee.node_type != NodeType::Function {
                    continue;
                }
                add_edge(
                    UniversalRelationship::new(
                        format!("calls:{}:{}:{}", caller_id, callee.id, call_line),
                        caller_id.clone(),
                        callee.id,
                        RelationshipType::Calls,
                    )
                    .with_metadata("call_line", call_line),
                    &mut relationships,
                );
            }
        }

        (nodes, relationships)
    }

    /// Parse every supported file under `root`, honoring ignore rules
    /// and the size cap. Returns the number of successfully parsed files.
    pub async fn parse_directory(&self, root: &Path) -> Result<usize> {
        if !root.is_dir() {
            return Err(seamgraph_core::SeamGraphError::InvalidInput(format!(
                "not a directory: {}",
                root.display()
            )));
        }

        info!("parsing directory {}", root.display());
        let files = self.ignore.collect_files(
            root,
            self.registry.supported_extensions(),
            self.max_file_bytes,
        );

        let mut parsed = 0usize;
        for file in &files {
            match self.parse_file(file).await {
                Ok(true) => {
                    parsed += 1;
                    if parsed % 100 == 0 {
                        info!("parsed {} files", parsed);
                    }
                }
                Ok(false) => debug!("skipped {}", file.display()),
                Err(e) => warn!("error parsing {}: {}", file.display(), e),
            }
        }

        info!("parsing complete: {}/{} files", parsed, files.len());
        Ok(parsed)
    }
}

/// Function name first, class-keyword fallback second; `None` skips the
/// match entirely.
fn extract_name(text: &str) -> Option<String> {
    FUNCTION_NAME_RE
        .captures(text)
        .or_else(|| CLASS_NAME_RE.captures(text))
        .map(|captures| captures[1].to_string())
}

fn extract_import_target(text: &str) -> Option<String> {
    IMPORT_TARGET_RE
        .captures(text)
        .map(|captures| captures[1].trim().to_string())
        .filter(|target| !target.is_empty())
}

/// The called identifier: the first name directly followed by an
/// argument list, which also handles `receiver.method(...)` forms.
fn extract_call_name(text: &str) -> Option<String> {
    CALL_NAME_RE
        .captures(text)
        .map(|captures| captures[1].to_string())
}

/// 1 + decision points: word-bounded keywords plus the literal operators.
fn cyclomatic_complexity(text: &str) -> u32 {
    let words = DECISION_WORD_RE.find_iter(text).count();
    let operators = text.matches("&&").count() + text.matches("||").count() + text.matches('?').count();
    (1 + words + operators).max(1) as u32
}

/// Innermost function whose span contains `line`; smallest span wins.
fn innermost_function(functions: &[(String, u32, u32)], line: u32) -> Option<String> {
    functions
        .iter()
        .filter(|(_, start, end)| *start <= line && line <= *end)
        .min_by_key(|(_, start, end)| end - start)
        .map(|(id, _, _)| id.clone())
}

/// Read a file trying utf-8, BOM-prefixed utf-8, cp1252 and latin1 in
/// order, finally falling back to utf-8 with replacement characters.
fn read_with_encoding_fallback(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;

    if let Ok(text) = std::str::from_utf8(&bytes) {
        return Ok(text.to_string());
    }
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        if let Ok(text) = std::str::from_utf8(&bytes[3..]) {
            return Ok(text.to_string());
        }
    }

    let (text, _, had_errors) = encoding_rs::WINDOWS_1252.decode(&bytes);
    if !had_errors {
        return Ok(text.into_owned());
    }

    // Latin-1 maps every byte, so this is the effective last stop before
    // lossy replacement.
    let latin1: String = bytes.iter().map(|&b| b as char).collect();
    if !latin1.is_empty() {
        return Ok(latin1);
    }

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use seamgraph_core::GraphSettings;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn new_graph() -> Arc<UniversalGraph> {
        Arc::new(UniversalGraph::new(&GraphSettings::default()))
    }

    fn parser_for(graph: Arc<UniversalGraph>) -> UniversalParser {
        UniversalParser::new(graph, None, &ParserSettings::default())
    }

    #[test]
    fn name_extraction_covers_function_and_class_keywords() {
        assert_eq!(extract_name("def main():"), Some("main".to_string()));
        assert_eq!(extract_name("fn run() {"), Some("run".to_string()));
        assert_eq!(extract_name("class Widget {"), Some("Widget".to_string()));
        assert_eq!(extract_name("struct Point {"), Some("Point".to_string()));
        assert_eq!(extract_name("x = 1"), None);
    }

    #[test]
    fn import_target_takes_first_dotted_path() {
        assert_eq!(
            extract_import_target("import os.path"),
            Some("os.path".to_string())
        );
        assert_eq!(
            extract_import_target("from collections import deque"),
            Some("collections".to_string())
        );
        assert_eq!(extract_import_target("x = 1"), None);
    }

    #[test]
    fn complexity_counts_decision_tokens_word_bounded() {
        assert_eq!(cyclomatic_complexity("def f(): pass"), 1);
        assert_eq!(
            cyclomatic_complexity("if a and b:\n    for x in y:\n        pass"),
            3
        );
        // "iffy" must not count as "if"; the operators are literal.
        assert_eq!(cyclomatic_complexity("iffy = a && b || c"), 3);
        assert_eq!(cyclomatic_complexity("x = cond ? a : b"), 2);
    }

    #[test]
    fn innermost_function_prefers_smallest_span() {
        let functions = vec![
            ("outer".to_string(), 1, 20),
            ("inner".to_string(), 5, 10),
        ];
        assert_eq!(innermost_function(&functions, 7), Some("inner".to_string()));
        assert_eq!(innermost_function(&functions, 15), Some("outer".to_string()));
        assert_eq!(innermost_function(&functions, 30), None);
    }

    #[tokio::test]
    async fn basic_extraction_builds_the_expected_graph() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("main.py");
        fs::write(&file, "def main(): helper()\ndef helper(): pass\n").unwrap();

        let graph = new_graph();
        let parser = parser_for(graph.clone());
        assert!(parser.parse_file(&file).await.unwrap());

        let path = file.to_string_lossy();
        let main_id = format!("function:{}:main:1", path);
        let helper_id = format!("function:{}:helper:2", path);

        assert!(graph.get_node(&format!("file:{}", path)).is_some());
        let main = graph.get_node(&main_id).unwrap();
        let helper = graph.get_node(&helper_id).unwrap();
        assert_eq!(main.complexity, 1);
        assert_eq!(helper.complexity, 1);

        let contains: Vec<_> = graph
            .get_relationships_from(&format!("file:{}", path))
            .into_iter()
            .filter(|r| r.relationship_type == RelationshipType::Contains)
            .collect();
        assert_eq!(contains.len(), 2);

        let calls = graph.get_relationships_from(&main_id);
        assert!(calls
            .iter()
            .any(|r| r.relationship_type == RelationshipType::Calls && r.target_id == helper_id));

        assert!(graph.is_file_processed(&path));
    }

    #[tokio::test]
    async fn reparsing_unchanged_content_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("lib.py");
        fs::write(&file, "def alpha():\n    pass\n").unwrap();

        let graph = new_graph();
        let parser = parser_for(graph.clone());
        parser.parse_file(&file).await.unwrap();
        let first_nodes: Vec<String> = {
            let mut ids: Vec<String> = graph.all_nodes().iter().map(|n| n.id.clone()).collect();
            ids.sort();
            ids
        };

        parser.parse_file(&file).await.unwrap();
        let mut second_nodes: Vec<String> =
            graph.all_nodes().iter().map(|n| n.id.clone()).collect();
        second_nodes.sort();

        assert_eq!(first_nodes, second_nodes);
    }

    #[tokio::test]
    async fn unsupported_extensions_return_false() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        fs::write(&file, "hello\n").unwrap();

        let graph = new_graph();
        let parser = parser_for(graph.clone());
        assert!(!parser.parse_file(&file).await.unwrap());
        assert_eq!(graph.node_count(), 0);
        assert!(!graph.is_file_processed(&file.to_string_lossy()));
    }

    #[tokio::test]
    async fn non_utf8_content_falls_back_to_latin_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("legacy.py");
        let mut bytes = b"# caf".to_vec();
        bytes.push(0xE9); // é in latin-1 / cp1252
        bytes.extend_from_slice(b"\ndef brew():\n    pass\n");
        fs::write(&file, bytes).unwrap();

        let graph = new_graph();
        let parser = parser_for(graph.clone());
        assert!(parser.parse_file(&file).await.unwrap());
        assert_eq!(
            graph
                .find_nodes_by_name("brew", true)
                .first()
                .map(|n| n.location.start_line),
            Some(2)
        );
    }

    #[tokio::test]
    async fn rust_sources_extract_functions_and_structs() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("engine.rs");
        fs::write(
            &file,
            "struct Engine {\n    rpm: u32,\n}\n\nfn start() {\n    ignite();\n}\n\nfn ignite() {}\n",
        )
        .unwrap();

        let graph = new_graph();
        let parser = parser_for(graph.clone());
        assert!(parser.parse_file(&file).await.unwrap());

        assert_eq!(graph.get_nodes_by_type(NodeType::Function).len(), 2);
        assert_eq!(graph.get_nodes_by_type(NodeType::Class).len(), 1);
        let start = graph.find_nodes_by_name("start", true);
        let calls = graph.get_relationships_from(&start[0].id);
        assert!(calls
            .iter()
            .any(|r| r.relationship_type == RelationshipType::Calls));
    }

    #[tokio::test]
    async fn import_edges_to_unmodeled_modules_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("api.py");
        fs::write(&file, "import os\n\ndef serve():\n    pass\n").unwrap();

        let graph = new_graph();
        let parser = parser_for(graph.clone());
        assert!(parser.parse_file(&file).await.unwrap());

        // The import node exists, the dangling module edge does not.
        assert_eq!(graph.get_nodes_by_type(NodeType::Import).len(), 1);
        assert!(graph
            .get_relationships_by_type(RelationshipType::Imports)
            .is_empty());
    }

    #[tokio::test]
    async fn directory_parse_respects_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join(".gitignore"), "vendor/\n").unwrap();
        fs::create_dir(root.join("vendor")).unwrap();
        fs::write(root.join("vendor/dep.py"), "def hidden(): pass\n").unwrap();
        fs::write(root.join("app.py"), "def visible(): pass\n").unwrap();

        let graph = new_graph();
        let parser = parser_for(graph.clone());
        let parsed = parser.parse_directory(root).await.unwrap();

        assert_eq!(parsed, 1);
        assert!(graph.find_nodes_by_name("hidden", true).is_empty());
        assert_eq!(graph.find_nodes_by_name("visible", true).len(), 1);
    }

    struct CountingMatcher {
        inner: TreeSitterMatcher,
        calls: AtomicUsize,
    }

    impl AstMatcher for CountingMatcher {
        fn is_available(&self, language_id: &str) -> bool {
            self.inner.is_available(language_id)
        }

        fn match_all(&self, source: &str, language_id: &str, pattern_id: &str) -> Vec<AstMatch> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.match_all(source, language_id, pattern_id)
        }
    }

    #[tokio::test]
    async fn valid_cache_skips_the_matcher_entirely() {
        use seamgraph_cache::{HybridCacheManager, MemoryRemoteCache};
        use seamgraph_core::CacheSettings;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("cached.py");
        fs::write(&file, "def stable(): pass\n").unwrap();

        let cache = Arc::new(HybridCacheManager::new(
            &CacheSettings::default(),
            Some(Arc::new(MemoryRemoteCache::new())),
        ));
        cache.initialize().await.unwrap();

        let matcher = Arc::new(CountingMatcher {
            inner: TreeSitterMatcher::new(),
            calls: AtomicUsize::new(0),
        });

        let graph = new_graph();
        let parser = UniversalParser::with_matcher(
            graph.clone(),
            Some(cache.clone()),
            &ParserSettings::default(),
            matcher.clone(),
        );

        assert!(parser.parse_file(&file).await.unwrap());
        let calls_after_first = matcher.calls.load(Ordering::SeqCst);
        assert!(calls_after_first > 0);

        // Unchanged file: the cache serves the second parse.
        graph.remove_file_nodes(&file.to_string_lossy());
        assert!(parser.parse_file(&file).await.unwrap());
        assert_eq!(matcher.calls.load(Ordering::SeqCst), calls_after_first);
        assert_eq!(graph.find_nodes_by_name("stable", true).len(), 1);

        // Content change invalidates the identity triple.
        fs::write(&file, "def stable(): pass\n\ndef extra(): pass\n").unwrap();
        graph.remove_file_nodes(&file.to_string_lossy());
        assert!(parser.parse_file(&file).await.unwrap());
        assert!(matcher.calls.load(Ordering::SeqCst) > calls_after_first);
        assert_eq!(graph.find_nodes_by_name("extra", true).len(), 1);
    }
}
