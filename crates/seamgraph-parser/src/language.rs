// ABOUTME: Static registry of the ~25 supported languages and their matcher pattern ids.
// ABOUTME: Lookups by extension and by name are pure functions over a fixed table.
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::path::Path;

/// Symbolic pattern ids consumed by the AST matcher. Values are the
/// backend's native node kinds; a missing value means the construct is
/// not extracted for that language.
#[derive(Debug, Clone, Copy)]
pub struct PatternSet {
    pub function: Option<&'static str>,
    pub class: Option<&'static str>,
    pub import: Option<&'static str>,
    pub variable: Option<&'static str>,
    pub call: Option<&'static str>,
}

impl PatternSet {
    pub fn get(&self, pattern_id: &str) -> Option<&'static str> {
        match pattern_id {
            "function" => self.function,
            "class" => self.class,
            "import" => self.import,
            "variable" => self.variable,
            "call" => self.call,
            _ => None,
        }
    }
}

/// Configuration for one supported language.
#[derive(Debug, Clone, Copy)]
pub struct LanguageConfig {
    /// Display name carried on nodes, e.g. "Python".
    pub name: &'static str,
    /// Internal language id, e.g. "python".
    pub language_id: &'static str,
    pub extensions: &'static [&'static str],
    /// Token-level signatures kept as fallback hints only.
    pub comment_patterns: &'static [&'static str],
    pub string_patterns: &'static [&'static str],
    pub patterns: PatternSet,
}

macro_rules! lang {
    ($name:literal, $id:literal, $exts:expr, $comments:expr, $strings:expr,
     fn_: $f:expr, class: $c:expr, import: $i:expr, var: $v:expr, call: $call:expr) => {
        LanguageConfig {
            name: $name,
            language_id: $id,
            extensions: $exts,
            comment_patterns: $comments,
            string_patterns: $strings,
            patterns: PatternSet {
                function: $f,
                class: $c,
                import: $i,
                variable: $v,
                call: $call,
            },
        }
    };
}

static LANGUAGES: Lazy<Vec<LanguageConfig>> = Lazy::new(|| {
    vec![
        lang!("JavaScript", "javascript", &[".js", ".mjs", ".jsx"], &["//", "/*", "*/"], &["\"", "'", "`"],
            fn_: Some("function_declaration"), class: Some("class_declaration"),
            import: Some("import_statement"), var: Some("variable_declarator"), call: Some("call_expression")),
        lang!("TypeScript", "typescript", &[".ts", ".tsx", ".d.ts"], &["//", "/*", "*/"], &["\"", "'", "`"],
            fn_: Some("function_declaration"), class: Some("class_declaration"),
            import: Some("import_statement"), var: Some("variable_declarator"), call: Some("call_expression")),
        lang!("Python", "python", &[".py", ".pyi", ".pyw"], &["#", "\"\"\"", "'''"], &["\"", "'", "\"\"\"", "'''"],
            fn_: Some("function_definition"), class: Some("class_definition"),
            import: Some("import_statement"), var: Some("assignment"), call: Some("call")),
        lang!("Java", "java", &[".java"], &["//", "/*", "*/"], &["\""],
            fn_: Some("method_declaration"), class: Some("class_declaration"),
            import: Some("import_declaration"), var: Some("field_declaration"), call: Some("method_invocation")),
        lang!("Rust", "rust", &[".rs"], &["//", "/*", "*/"], &["\"", "'"],
            fn_: Some("function_item"), class: Some("struct_item"),
            import: Some("use_declaration"), var: Some("let_declaration"), call: Some("call_expression")),
        lang!("Go", "go", &[".go"], &["//", "/*", "*/"], &["\"", "`"],
            fn_: Some("function_declaration"), class: Some("type_spec"),
            import: Some("import_declaration"), var: Some("var_declaration"), call: Some("call_expression")),
        lang!("C++", "cpp", &[".cpp", ".cc", ".cxx", ".hpp"], &["//", "/*", "*/"], &["\"", "'"],
            fn_: Some("function_definition"), class: Some("class_specifier"),
            import: Some("preproc_include"), var: Some("declaration"), call: Some("call_expression")),
        lang!("C", "c", &[".c", ".h"], &["//", "/*", "*/"], &["\"", "'"],
            fn_: Some("function_definition"), class: Some("struct_specifier"),
            import: Some("preproc_include"), var: Some("declaration"), call: Some("call_expression")),
        lang!("C#", "csharp", &[".cs"], &["//", "/*", "*/"], &["\"", "'"],
            fn_: Some("method_declaration"), class: Some("class_declaration"),
            import: Some("using_directive"), var: Some("variable_declarator"), call: Some("invocation_expression")),
        lang!("PHP", "php", &[".php"], &["//", "/*", "*/", "#"], &["\"", "'"],
            fn_: Some("function_definition"), class: Some("class_declaration"),
            import: Some("require_expression"), var: Some("assignment"), call: Some("function_call_expression")),
        lang!("Ruby", "ruby", &[".rb"], &["#"], &["\"", "'"],
            fn_: Some("method"), class: Some("class"),
            import: Some("require"), var: Some("assignment"), call: Some("call")),
        lang!("Swift", "swift", &[".swift"], &["//", "/*", "*/"], &["\""],
            fn_: Some("function_declaration"), class: Some("class_declaration"),
            import: Some("import_declaration"), var: Some("property_declaration"), call: Some("call_expression")),
        lang!("Kotlin", "kotlin", &[".kt", ".kts"], &["//", "/*", "*/"], &["\"", "'"],
            fn_: Some("function_declaration"), class: Some("class_declaration"),
            import: Some("import_header"), var: Some("property_declaration"), call: Some("call_expression")),
        lang!("Scala", "scala", &[".scala"], &["//", "/*", "*/"], &["\"", "'"],
            fn_: Some("function_definition"), class: Some("class_definition"),
            import: Some("import_declaration"), var: Some("val_definition"), call: Some("call_expression")),
        lang!("Dart", "dart", &[".dart"], &["//", "/*", "*/"], &["\"", "'"],
            fn_: Some("function_declaration"), class: Some("class_declaration"),
            import: Some("import_or_export"), var: Some("variable_declaration"), call: Some("method_invocation")),
        lang!("Lua", "lua", &[".lua"], &["--", "--[[", "]]"], &["\"", "'"],
            fn_: Some("function_definition"), class: Some("assignment_statement"),
            import: Some("require"), var: Some("assignment_statement"), call: Some("function_call")),
        lang!("Haskell", "haskell", &[".hs", ".lhs"], &["--", "{-", "-}"], &["\""],
            fn_: Some("function"), class: Some("type_class_declaration"),
            import: Some("import_declaration"), var: Some("let_binding"), call: Some("function_application")),
        lang!("Elixir", "elixir", &[".ex", ".exs"], &["#"], &["\"", "'"],
            fn_: Some("definition"), class: Some("module"),
            import: Some("alias_or_require"), var: Some("match_expression"), call: Some("call")),
        lang!("Erlang", "erlang", &[".erl", ".hrl"], &["%"], &["\""],
            fn_: Some("function_clause"), class: Some("attribute"),
            import: Some("attribute"), var: Some("variable"), call: Some("call_expression")),
        lang!("R", "r", &[".r", ".R"], &["#"], &["\"", "'"],
            fn_: Some("function_definition"), class: Some("class_definition"),
            import: Some("library_call"), var: Some("assignment"), call: Some("call")),
        lang!("MATLAB", "matlab", &[".m"], &["%"], &["\"", "'"],
            fn_: Some("function_definition"), class: Some("classdef_block"),
            import: Some("import_statement"), var: Some("assignment"), call: Some("function_call")),
        lang!("Perl", "perl", &[".pl", ".pm"], &["#"], &["\"", "'"],
            fn_: Some("subroutine_declaration"), class: Some("package_declaration"),
            import: Some("use_statement"), var: Some("assignment"), call: Some("function_call")),
        lang!("SQL", "sql", &[".sql"], &["--", "/*", "*/"], &["\"", "'"],
            fn_: Some("create_function_statement"), class: Some("create_table_statement"),
            import: Some("use_statement"), var: Some("declare_statement"), call: Some("function_call")),
        lang!("HTML", "html", &[".html", ".htm"], &["<!--", "-->"], &["\"", "'"],
            fn_: Some("script_element"), class: Some("attribute_value"),
            import: Some("tag"), var: Some("attribute_value"), call: Some("tag")),
        lang!("CSS", "css", &[".css"], &["/*", "*/"], &["\"", "'"],
            fn_: Some("at_rule"), class: Some("class_selector"),
            import: Some("at_import"), var: Some("custom_property"), call: Some("function_call")),
    ]
});

/// Registry of supported programming languages. All lookups are pure
/// functions over the static table.
#[derive(Debug, Default, Clone, Copy)]
pub struct LanguageRegistry;

impl LanguageRegistry {
    pub fn new() -> Self {
        Self
    }

    pub fn all(&self) -> &'static [LanguageConfig] {
        &LANGUAGES
    }

    pub fn language_count(&self) -> usize {
        LANGUAGES.len()
    }

    /// Lookup by file extension; multi-dot suffixes like `.d.ts` are
    /// matched against the whole file name.
    pub fn by_extension(&self, path: &Path) -> Option<&'static LanguageConfig> {
        let file_name = path.file_name()?.to_str()?.to_lowercase();
        LANGUAGES.iter().find(|config| {
            config
                .extensions
                .iter()
                .any(|ext| file_name.ends_with(&ext.to_lowercase()))
        })
    }

    pub fn by_name(&self, name: &str) -> Option<&'static LanguageConfig> {
        let lower = name.to_lowercase();
        LANGUAGES
            .iter()
            .find(|config| config.language_id == lower || config.name.to_lowercase() == lower)
    }

    pub fn by_id(&self, language_id: &str) -> Option<&'static LanguageConfig> {
        LANGUAGES
            .iter()
            .find(|config| config.language_id == language_id)
    }

    /// Union of all supported extensions. Long-lived and cacheable by
    /// callers; computed once.
    pub fn supported_extensions(&self) -> &'static HashSet<&'static str> {
        static EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
            LANGUAGES
                .iter()
                .flat_map(|config| config.extensions.iter().copied())
                .collect()
        });
        &EXTENSIONS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_twenty_five_languages() {
        let registry = LanguageRegistry::new();
        assert_eq!(registry.language_count(), 25);
        assert!(registry.supported_extensions().len() >= 30);
    }

    #[test]
    fn extension_lookup_handles_multi_dot_suffixes() {
        let registry = LanguageRegistry::new();
        assert_eq!(
            registry.by_extension(Path::new("src/app.d.ts")).unwrap().name,
            "TypeScript"
        );
        assert_eq!(
            registry.by_extension(Path::new("main.PY")).unwrap().name,
            "Python"
        );
        assert!(registry.by_extension(Path::new("README.txt")).is_none());
    }

    #[test]
    fn name_lookup_accepts_id_and_display_name() {
        let registry = LanguageRegistry::new();
        assert_eq!(registry.by_name("rust").unwrap().name, "Rust");
        assert_eq!(registry.by_name("C++").unwrap().language_id, "cpp");
        assert!(registry.by_name("cobol").is_none());
    }

    #[test]
    fn pattern_ids_resolve_by_symbolic_tag() {
        let registry = LanguageRegistry::new();
        let python = registry.by_id("python").unwrap();
        assert_eq!(python.patterns.get("function"), Some("function_definition"));
        assert_eq!(python.patterns.get("call"), Some("call"));
        assert_eq!(python.patterns.get("unknown"), None);
    }
}
