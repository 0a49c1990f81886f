// ABOUTME: Compiled graphignore/gitignore matching plus the pruning directory walker.
// ABOUTME: Directories are evaluated before descent so whole subtrees are skipped unvisited.
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Dev-tool directories pruned regardless of ignore files.
const COMMON_SKIP_DIRS: &[&str] = &[
    "__pycache__",
    ".git",
    ".svn",
    ".hg",
    ".bzr",
    ".pytest_cache",
    ".mypy_cache",
    ".tox",
    ".coverage",
    ".sass-cache",
    ".cache",
    ".DS_Store",
    ".idea",
    ".vscode",
    ".vs",
];

enum IgnoreMatcher {
    Compiled(Gitignore),
    Globs(GlobSet),
    None,
}

struct CompiledState {
    root: PathBuf,
    matcher: IgnoreMatcher,
}

/// Loads `.graphignore` (preferred) or `.gitignore` once per project
/// root and answers ignore queries for files and directories.
pub struct IgnoreEngine {
    state: Mutex<Option<CompiledState>>,
}

impl Default for IgnoreEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl IgnoreEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }

    fn ensure_loaded(&self, root: &Path) {
        let mut state = self.state.lock();
        if state.as_ref().map(|s| s.root.as_path()) == Some(root) {
            return;
        }

        let graphignore = root.join(".graphignore");
        let gitignore = root.join(".gitignore");
        let ignore_file = if graphignore.exists() {
            Some(graphignore)
        } else if gitignore.exists() {
            Some(gitignore)
        } else {
            None
        };

        let matcher = match ignore_file {
            None => {
                debug!("no .graphignore or .gitignore at {}", root.display());
                IgnoreMatcher::None
            }
            Some(path) => {
                let mut builder = GitignoreBuilder::new(root);
                match builder.add(&path) {
                    None => match builder.build() {
                        Ok(compiled) => {
                            info!(
                                "loaded {} ignore patterns from {}",
                                compiled.num_ignores(),
                                path.display()
                            );
                            IgnoreMatcher::Compiled(compiled)
                        }
                        Err(e) => {
                            warn!("failed to compile {}: {}", path.display(), e);
                            Self::glob_fallback(&path)
                        }
                    },
                    Some(e) => {
                        warn!("failed to read {}: {}", path.display(), e);
                        Self::glob_fallback(&path)
                    }
                }
            }
        };

        *state = Some(CompiledState {
            root: root.to_path_buf(),
            matcher,
        });
    }

    fn glob_fallback(path: &Path) -> IgnoreMatcher {
        let Ok(content) = std::fs::read_to_string(path) else {
            return IgnoreMatcher::None;
        };
        let mut builder = GlobSetBuilder::new();
        let mut added = false;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let pattern = line.trim_end_matches('/');
            for candidate in [pattern.to_string(), format!("{}/**", pattern)] {
                if let Ok(glob) = Glob::new(&candidate) {
                    builder.add(glob);
                    added = true;
                } else {
                    warn!("invalid glob pattern '{}'", candidate);
                }
            }
        }
        if added {
            builder
                .build()
                .map(IgnoreMatcher::Globs)
                .unwrap_or(IgnoreMatcher::None)
        } else {
            IgnoreMatcher::None
        }
    }

    /// Whether `path` should be skipped under the given project root.
    pub fn should_ignore(&self, path: &Path, root: &Path, is_dir: bool) -> bool {
        if path
            .components()
            .any(|part| COMMON_SKIP_DIRS.contains(&part.as_os_str().to_string_lossy().as_ref()))
        {
            return true;
        }

        self.ensure_loaded(root);
        let state = self.state.lock();
        let Some(state) = state.as_ref() else {
            return false;
        };
        let Ok(relative) = path.strip_prefix(root) else {
            return false;
        };

        match &state.matcher {
            IgnoreMatcher::Compiled(gitignore) => gitignore
                .matched_path_or_any_parents(relative, is_dir)
                .is_ignore(),
            IgnoreMatcher::Globs(globs) => globs.is_match(relative),
            IgnoreMatcher::None => false,
        }
    }

    /// Walk `root` collecting parseable files. Directories are checked
    /// against the ignore rules before descent; oversized files and
    /// unsupported extensions are skipped.
    pub fn collect_files(
        &self,
        root: &Path,
        supported_extensions: &HashSet<&'static str>,
        max_file_bytes: u64,
    ) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut pruned = 0usize;
        let mut stack = vec![root.to_path_buf()];

        while let Some(dir) = stack.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!("cannot access directory {}: {}", dir.display(), e);
                    continue;
                }
            };

            for entry in entries.flatten() {
                let path = entry.path();
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };

                if file_type.is_dir() {
                    if self.should_ignore(&path, root, true) {
                        debug!("pruning ignored directory tree: {}", path.display());
                        pruned += 1;
                        continue;
                    }
                    stack.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }

                if self.should_ignore(&path, root, false) {
                    continue;
                }

                let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let lower = file_name.to_lowercase();
                if !supported_extensions.iter().any(|ext| lower.ends_with(ext)) {
                    continue;
                }

                match entry.metadata() {
                    Ok(meta) if meta.len() > max_file_bytes => {
                        debug!("skipping large file: {}", path.display());
                        continue;
                    }
                    Err(_) => continue,
                    _ => {}
                }

                files.push(path);
            }
        }

        files.sort();
        info!(
            "traversal found {} files, {} directory trees pruned",
            files.len(),
            pruned
        );
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn extensions() -> HashSet<&'static str> {
        HashSet::from([".py", ".js"])
    }

    #[test]
    fn gitignore_patterns_prune_whole_subtrees() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join(".gitignore"), "generated/\n*.min.js\n").unwrap();
        fs::create_dir(root.join("generated")).unwrap();
        fs::write(root.join("generated/out.py"), "x = 1\n").unwrap();
        fs::write(root.join("app.py"), "x = 1\n").unwrap();
        fs::write(root.join("bundle.min.js"), "x\n").unwrap();

        let engine = IgnoreEngine::new();
        let files = engine.collect_files(root, &extensions(), 1024 * 1024);

        assert_eq!(files, vec![root.join("app.py")]);
    }

    #[test]
    fn graphignore_takes_precedence_over_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join(".gitignore"), "kept.py\n").unwrap();
        fs::write(root.join(".graphignore"), "dropped.py\n").unwrap();
        fs::write(root.join("kept.py"), "x = 1\n").unwrap();
        fs::write(root.join("dropped.py"), "x = 1\n").unwrap();

        let engine = IgnoreEngine::new();
        let files = engine.collect_files(root, &extensions(), 1024 * 1024);

        assert_eq!(files, vec![root.join("kept.py")]);
    }

    #[test]
    fn dev_tool_directories_are_always_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir(root.join("__pycache__")).unwrap();
        fs::write(root.join("__pycache__/cached.py"), "x = 1\n").unwrap();
        fs::create_dir(root.join(".vscode")).unwrap();
        fs::write(root.join(".vscode/conf.js"), "x\n").unwrap();
        fs::write(root.join("main.py"), "x = 1\n").unwrap();

        let engine = IgnoreEngine::new();
        let files = engine.collect_files(root, &extensions(), 1024 * 1024);

        assert_eq!(files, vec![root.join("main.py")]);
    }

    #[test]
    fn negation_patterns_rescue_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join(".gitignore"), "*.py\n!main.py\n").unwrap();
        fs::write(root.join("main.py"), "x = 1\n").unwrap();
        fs::write(root.join("other.py"), "x = 1\n").unwrap();

        let engine = IgnoreEngine::new();
        let files = engine.collect_files(root, &extensions(), 1024 * 1024);

        assert_eq!(files, vec![root.join("main.py")]);
    }

    #[test]
    fn oversized_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("big.py"), "x".repeat(2048)).unwrap();
        fs::write(root.join("small.py"), "x = 1\n").unwrap();

        let engine = IgnoreEngine::new();
        let files = engine.collect_files(root, &extensions(), 1024);

        assert_eq!(files, vec![root.join("small.py")]);
    }
}
