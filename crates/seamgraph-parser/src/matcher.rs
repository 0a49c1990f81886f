// ABOUTME: Capability trait wrapping a structural pattern engine, plus the tree-sitter backend.
// ABOUTME: Pattern ids are symbolic tags; the backend translates them to grammar node kinds.
use crate::language::LanguageRegistry;
use std::collections::HashMap;
use tracing::{debug, warn};

/// One matched subtree with its byte/line span and source text.
#[derive(Debug, Clone)]
pub struct AstMatch {
    pub text: String,
    /// 1-based line numbers.
    pub start_line: u32,
    pub end_line: u32,
    pub start_col: u32,
    pub end_col: u32,
    pub start_byte: usize,
    pub end_byte: usize,
}

/// A structural pattern engine. "No results" is an empty vector, never
/// an error; backend failures degrade to empty with a logged warning.
pub trait AstMatcher: Send + Sync {
    /// Whether a backend grammar is linked for this language.
    fn is_available(&self, language_id: &str) -> bool;

    /// All subtrees of `source` matching the symbolic `pattern_id`
    /// (`function`, `class`, `import`, `variable`, `call`).
    fn match_all(&self, source: &str, language_id: &str, pattern_id: &str) -> Vec<AstMatch>;
}

/// Tree-sitter backed matcher covering the grammars linked into the
/// binary. Languages without a grammar report unavailable and always
/// match empty.
pub struct TreeSitterMatcher {
    registry: LanguageRegistry,
    grammars: HashMap<&'static str, tree_sitter::Language>,
}

impl Default for TreeSitterMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeSitterMatcher {
    pub fn new() -> Self {
        let mut grammars: HashMap<&'static str, tree_sitter::Language> = HashMap::new();
        grammars.insert("rust", tree_sitter_rust::LANGUAGE.into());
        grammars.insert("python", tree_sitter_python::LANGUAGE.into());
        grammars.insert("javascript", tree_sitter_javascript::LANGUAGE.into());
        grammars.insert(
            "typescript",
            tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        );
        grammars.insert("go", tree_sitter_go::LANGUAGE.into());
        grammars.insert("java", tree_sitter_java::LANGUAGE.into());
        grammars.insert("cpp", tree_sitter_cpp::LANGUAGE.into());
        // C shares the C++ grammar; the kinds used by the registry exist
        // in both.
        grammars.insert("c", tree_sitter_cpp::LANGUAGE.into());
        grammars.insert("csharp", tree_sitter_c_sharp::LANGUAGE.into());
        grammars.insert("ruby", tree_sitter_ruby::LANGUAGE.into());
        grammars.insert("php", tree_sitter_php::LANGUAGE_PHP.into());
        grammars.insert("swift", tree_sitter_swift::LANGUAGE.into());

        Self {
            registry: LanguageRegistry::new(),
            grammars,
        }
    }
}

impl AstMatcher for TreeSitterMatcher {
    fn is_available(&self, language_id: &str) -> bool {
        self.grammars.contains_key(language_id)
    }

    fn match_all(&self, source: &str, language_id: &str, pattern_id: &str) -> Vec<AstMatch> {
        let Some(config) = self.registry.by_id(language_id) else {
            debug!("unknown language id {}", language_id);
            return Vec::new();
        };
        let Some(kind) = config.patterns.get(pattern_id) else {
            return Vec::new();
        };
        let Some(grammar) = self.grammars.get(language_id) else {
            warn!("no grammar linked for {}", language_id);
            return Vec::new();
        };

        let mut parser = tree_sitter::Parser::new();
        if let Err(e) = parser.set_language(grammar) {
            warn!("failed to configure {} parser: {}", language_id, e);
            return Vec::new();
        }
        let Some(tree) = parser.parse(source, None) else {
            warn!("{} parse produced no tree", language_id);
            return Vec::new();
        };

        let mut matches = Vec::new();
        let mut cursor = tree.walk();
        let mut done = false;
        while !done {
            let node = cursor.node();
            if node.kind() == kind {
                let start = node.start_position();
                let end = node.end_position();
                matches.push(AstMatch {
                    text: source[node.byte_range()].to_string(),
                    start_line: start.row as u32 + 1,
                    end_line: end.row as u32 + 1,
                    start_col: start.column as u32,
                    end_col: end.column as u32,
                    start_byte: node.start_byte(),
                    end_byte: node.end_byte(),
                });
            }

            if cursor.goto_first_child() {
                continue;
            }
            loop {
                if cursor.goto_next_sibling() {
                    break;
                }
                if !cursor.goto_parent() {
                    done = true;
                    break;
                }
            }
        }
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_functions_match_with_one_based_lines() {
        let matcher = TreeSitterMatcher::new();
        let source = "def main():\n    pass\n\ndef helper():\n    pass\n";
        let matches = matcher.match_all(source, "python", "function");

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].start_line, 1);
        assert_eq!(matches[1].start_line, 4);
        assert!(matches[0].text.starts_with("def main"));
    }

    #[test]
    fn rust_functions_and_calls_match() {
        let matcher = TreeSitterMatcher::new();
        let source = "fn alpha() {\n    beta();\n}\n\nfn beta() {}\n";
        assert_eq!(matcher.match_all(source, "rust", "function").len(), 2);
        assert_eq!(matcher.match_all(source, "rust", "call").len(), 1);
    }

    #[test]
    fn unlinked_languages_report_unavailable_and_match_empty() {
        let matcher = TreeSitterMatcher::new();
        assert!(!matcher.is_available("haskell"));
        assert!(matcher
            .match_all("module Main where", "haskell", "function")
            .is_empty());
        assert!(matcher.match_all("x", "nonexistent", "function").is_empty());
    }

    #[test]
    fn no_results_is_empty_not_error() {
        let matcher = TreeSitterMatcher::new();
        assert!(matcher.match_all("x = 1\n", "python", "class").is_empty());
    }
}
