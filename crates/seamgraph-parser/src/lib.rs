// ABOUTME: Turns source files from ~25 languages into universal graph nodes and edges.
// ABOUTME: Registry maps languages to matcher pattern ids; the ignore engine prunes traversal.
pub mod ignore_engine;
pub mod language;
pub mod matcher;
pub mod parser;

pub use ignore_engine::IgnoreEngine;
pub use language::{LanguageConfig, LanguageRegistry};
pub use matcher::{AstMatch, AstMatcher, TreeSitterMatcher};
pub use parser::UniversalParser;
