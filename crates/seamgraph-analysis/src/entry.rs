use once_cell::sync::Lazy;
use regex::Regex;
use seamgraph_core::UniversalNode;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One heuristic for spotting a program start in a given language.
struct EntryPointPattern {
    name: &'static str,
    patterns: Vec<Regex>,
    priority: i32,
    score_bonus: f64,
}

/// A scored entry-point candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryPointCandidate {
    pub node_id: String,
    pub file_path: String,
    pub name: String,
    pub language: String,
    pub line_number: u32,
    pub pattern_matched: String,
    pub confidence_score: f64,
    pub complexity: u32,
}

/// Standard-library module names filtered out of candidate lists.
static STDLIB_MODULES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "re", "sys", "os", "io", "time", "datetime", "json", "pickle", "csv", "logging",
        "asyncio", "threading", "subprocess", "socket", "http", "urllib", "requests", "pathlib",
        "collections", "itertools", "functools", "math", "random", "statistics", "decimal",
        "fractions", "cmath", "typing", "abc", "contextlib", "weakref", "types", "copy",
        "pprint", "enum", "graphlib", "dataclasses", "inspect", "traceback", "gc", "builtins",
        "warnings", "atexit", "signal", "mmap", "select", "fcntl", "termios", "tty", "pty",
        "stat", "crypt", "grp", "pwd", "spwd", "getopt", "argparse", "shlex", "cmd", "shutil",
        "tempfile", "glob", "fnmatch", "linecache", "fileinput", "difflib", "textwrap",
        "string", "stringprep", "readline", "rlcompleter", "gzip", "bz2", "lzma", "zlib",
        "tarfile", "zipfile", "configparser", "tomllib", "netrc", "xdrlib", "plistlib", "html",
        "xml", "ftplib", "poplib", "imaplib", "smtplib", "smtpd", "telnetlib", "uuid",
        "socketserver", "email", "mailbox", "mimetypes", "base64", "binhex", "binascii",
        "quopri", "uu", "hashlib", "hmac", "secrets", "ssl", "sqlite3", "dbm", "shelve",
        "marshal", "sqlite", "multiprocessing", "concurrent", "unittest", "doctest", "pdb",
        "cProfile", "profile", "pstats", "trace", "timeit", "distutils", "setuptools", "pip",
        "venv", "zipapp", "__main__",
    ])
});

fn pattern(name: &'static str, regexes: &[&str], priority: i32, score_bonus: f64) -> EntryPointPattern {
    EntryPointPattern {
        name,
        patterns: regexes
            .iter()
            .map(|r| Regex::new(r).expect("entry pattern must compile"))
            .collect(),
        priority,
        score_bonus,
    }
}

static PATTERNS: Lazy<HashMap<&'static str, Vec<EntryPointPattern>>> = Lazy::new(|| {
    HashMap::from([
        (
            "python",
            vec![
                pattern("main_function", &[r"def\s+main\s*\("], 10, 2.0),
                pattern(
                    "if_name_main",
                    &[r#"if\s+__name__\s*==\s*['"]__main__['"]"#],
                    9,
                    1.8,
                ),
                pattern("flask_app_run", &[r"app\s*\.\s*run\s*\("], 8, 1.5),
                pattern("django_manage", &[r"manage\.py"], 7, 1.3),
                pattern("fastapi_app", &[r"app\s*=\s*FastAPI\s*\("], 6, 1.2),
            ],
        ),
        (
            "javascript",
            vec![
                pattern("npm_main", &[r#""main"\s*:\s*".*?""#], 10, 2.0),
                pattern("index_js", &[r"index\.js"], 9, 1.8),
                pattern(
                    "express_server",
                    &[r"express\s*\(\s*\)", r"app\s*\.\s*listen\s*\("],
                    8,
                    1.5,
                ),
                pattern(
                    "node_entry",
                    &[r"process\.argv", r#"require\s*\(\s*['"]http['"]\s*\)"#],
                    7,
                    1.3,
                ),
            ],
        ),
        (
            "typescript",
            vec![
                pattern("npm_main", &[r#""main"\s*:\s*".*?""#], 10, 2.0),
                pattern("index_ts", &[r"index\.ts"], 9, 1.8),
                pattern("nestjs_entry", &[r"@nestjs/core", r"nest start"], 8, 1.5),
                pattern(
                    "express_ts",
                    &[r"express\s*\(\s*\)", r"app\s*\.\s*listen\s*\("],
                    7,
                    1.3,
                ),
            ],
        ),
        (
            "java",
            vec![
                pattern("main_method", &[r"public\s+static\s+void\s+main\s*\("], 10, 2.0),
                pattern(
                    "spring_boot",
                    &[r"@SpringBootApplication", r"SpringApplication\.run"],
                    9,
                    1.8,
                ),
                pattern(
                    "servlet_init",
                    &[r"extends HttpServlet", r"init\s*\(\s*ServletConfig"],
                    8,
                    1.5,
                ),
            ],
        ),
        (
            "csharp",
            vec![
                pattern("main_method", &[r"static\s+void\s+Main\s*\("], 10, 2.0),
                pattern(
                    "aspnet_core",
                    &[r"UseStartup<", r"WebHost\.CreateDefaultBuilder"],
                    9,
                    1.8,
                ),
                pattern("console_app", &[r"Console\.WriteLine"], 8, 1.3),
            ],
        ),
        (
            "go",
            vec![
                pattern("main_function", &[r"func\s+main\s*\("], 10, 2.0),
                pattern("package_main", &[r"package main"], 9, 1.5),
                pattern("http_server", &[r"http\.ListenAndServe"], 8, 1.3),
            ],
        ),
        (
            "rust",
            vec![
                pattern("main_function", &[r"fn\s+main\s*\("], 10, 2.0),
                pattern("cargo_toml", &[r"Cargo\.toml"], 9, 1.8),
                pattern(
                    "rocket_entry",
                    &[r"#\[rocket::launch\]", r"rocket::build"],
                    8,
                    1.5,
                ),
            ],
        ),
        (
            "cpp",
            vec![
                pattern("main_function", &[r"int\s+main\s*\("], 10, 2.0),
                pattern("cpp_cli", &[r"argc", r"argv"], 9, 1.5),
            ],
        ),
        (
            "c",
            vec![
                pattern("main_function", &[r"int\s+main\s*\("], 10, 2.0),
                pattern("c_cli", &[r"argc", r"argv"], 9, 1.5),
            ],
        ),
        (
            "php",
            vec![
                pattern("cli_script", &[r"\$_SERVER\['argv'\]", r"\$argc"], 10, 2.0),
                pattern(
                    "web_entry",
                    &[r"\$_GET", r"\$_POST", r"apache_request_headers"],
                    9,
                    1.8,
                ),
                pattern("php_cli", &[r"php_cli", r"cli\."], 8, 1.3),
            ],
        ),
        (
            "ruby",
            vec![
                pattern("ruby_script", &[r"__FILE__\s*==\s*\$0"], 10, 2.0),
                pattern("rack_app", &[r"run\s+.*App", r"config\.ru"], 9, 1.8),
                pattern("rails_entry", &[r"rails\s+server"], 8, 1.5),
            ],
        ),
        (
            "kotlin",
            vec![
                pattern("main_function", &[r"fun\s+main\s*\("], 10, 2.0),
                pattern("ktor_app", &[r"io\.ktor\.server\.application"], 9, 1.8),
            ],
        ),
        (
            "swift",
            vec![
                pattern("main_function", &[r"func\s+main\s*\("], 10, 2.0),
                pattern("swift_ui", &[r"struct\s+.*App", r"@main"], 9, 1.8),
            ],
        ),
    ])
});

static LANGUAGE_EXTENSIONS: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        (".py", "python"),
        (".js", "javascript"),
        (".ts", "typescript"),
        (".java", "java"),
        (".cs", "csharp"),
        (".go", "go"),
        (".rs", "rust"),
        (".cpp", "cpp"),
        (".cxx", "cpp"),
        (".cc", "cpp"),
        (".c", "c"),
        (".h", "c"),
        (".php", "php"),
        (".rb", "ruby"),
        (".kt", "kotlin"),
        (".swift", "swift"),
    ]
});

/// Scores nodes against language-specific entry-point patterns.
#[derive(Debug, Default, Clone, Copy)]
pub struct EntryDetector;

impl EntryDetector {
    pub fn new() -> Self {
        Self
    }

    fn language_for_path(path: &str) -> Option<&'static str> {
        LANGUAGE_EXTENSIONS
            .iter()
            .find(|(ext, _)| path.ends_with(ext))
            .map(|(_, language)| *language)
    }

    fn is_stdlib_module(name: &str) -> bool {
        let base = name.split('.').next().unwrap_or(name);
        STDLIB_MODULES.contains(base.to_lowercase().as_str())
    }

    fn confidence(pattern: &EntryPointPattern, complexity: u32) -> f64 {
        let complexity_penalty = (complexity as f64 * 0.01).min(0.5);
        1.0 + pattern.score_bonus + pattern.priority as f64 * 0.1 - complexity_penalty
    }

    /// Match file contents against the per-language pattern tables and
    /// associate hits with nodes within ten lines (or nodes with no line
    /// information). Returns candidates sorted by descending confidence.
    pub fn detect_entry_points(
        &self,
        nodes: &[UniversalNode],
        file_contents: &HashMap<String, String>,
    ) -> Vec<EntryPointCandidate> {
        let mut nodes_by_file: HashMap<&str, Vec<&UniversalNode>> = HashMap::new();
        for node in nodes {
            nodes_by_file
                .entry(node.location.file_path.as_str())
                .or_default()
                .push(node);
        }

        let mut candidates = Vec::new();
        for (file_path, file_nodes) in &nodes_by_file {
            let Some(content) = file_contents.get(*file_path) else {
                continue;
            };
            let Some(language) = Self::language_for_path(file_path) else {
                continue;
            };
            let Some(patterns) = PATTERNS.get(language) else {
                continue;
            };

            for entry_pattern in patterns {
                for regex in &entry_pattern.patterns {
                    for found in regex.find_iter(content) {
                        let match_line =
                            content[..found.start()].matches('\n').count() as u32 + 1;
                        for node in file_nodes {
                            let node_line = node.location.start_line;
                            if node_line != 0 && node_line.abs_diff(match_line) > 10 {
                                continue;
                            }
                            candidates.push(EntryPointCandidate {
                                node_id: node.id.clone(),
                                file_path: file_path.to_string(),
                                name: node.name.clone(),
                                language: language.to_string(),
                                line_number: node_line,
                                pattern_matched: entry_pattern.name.to_string(),
                                confidence_score: Self::confidence(
                                    entry_pattern,
                                    node.complexity,
                                ),
                                complexity: node.complexity,
                            });
                        }
                    }
                }
            }
        }

        candidates.retain(|c| !Self::is_stdlib_module(&c.name));
        candidates.sort_by(|a, b| {
            b.confidence_score
                .partial_cmp(&a.confidence_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seamgraph_core::{Location, NodeType};

    fn node(id: &str, name: &str, file: &str, line: u32, complexity: u32) -> UniversalNode {
        UniversalNode::new(
            id,
            name,
            NodeType::Function,
            Location::new(file, line, line + 2, "Python"),
        )
        .with_complexity(complexity)
    }

    #[test]
    fn python_main_is_detected_and_scored() {
        let nodes = vec![node("function:app.py:main:1", "main", "app.py", 1, 2)];
        let contents = HashMap::from([(
            "app.py".to_string(),
            "def main():\n    run()\n".to_string(),
        )]);

        let detector = EntryDetector::new();
        let candidates = detector.detect_entry_points(&nodes, &contents);

        assert_eq!(candidates.len(), 1);
        let candidate = &candidates[0];
        assert_eq!(candidate.pattern_matched, "main_function");
        // 1.0 + 2.0 bonus + 10 * 0.1 priority - 0.02 complexity penalty
        assert!((candidate.confidence_score - 3.98).abs() < 1e-9);
    }

    #[test]
    fn matches_only_associate_with_nearby_nodes() {
        let far_away = node("function:app.py:helper:500", "helper", "app.py", 500, 1);
        let nearby = node("function:app.py:main:3", "main", "app.py", 3, 1);
        let contents = HashMap::from([(
            "app.py".to_string(),
            "import sys\n\ndef main():\n    pass\n".to_string(),
        )]);

        let detector = EntryDetector::new();
        let candidates = detector.detect_entry_points(&[far_away, nearby], &contents);

        assert!(candidates.iter().all(|c| c.name == "main"));
    }

    #[test]
    fn stdlib_module_names_are_filtered() {
        let nodes = vec![node("import:app.py:os:1", "os.path", "app.py", 1, 0)];
        let contents = HashMap::from([(
            "app.py".to_string(),
            "def main():\n    pass\n".to_string(),
        )]);

        let detector = EntryDetector::new();
        assert!(detector.detect_entry_points(&nodes, &contents).is_empty());
    }

    #[test]
    fn candidates_sort_by_descending_confidence() {
        let main = node("function:cli.go:main:1", "main", "cli.go", 1, 1);
        let serve = node("function:cli.go:serve:5", "serve", "cli.go", 5, 30);
        let contents = HashMap::from([(
            "cli.go".to_string(),
            "package main\n\nfunc main() {\n    serve()\n}\n".to_string(),
        )]);

        let detector = EntryDetector::new();
        let candidates = detector.detect_entry_points(&[serve, main], &contents);

        assert!(!candidates.is_empty());
        assert_eq!(candidates[0].name, "main");
        for pair in candidates.windows(2) {
            assert!(pair[0].confidence_score >= pair[1].confidence_score);
        }
    }
}
