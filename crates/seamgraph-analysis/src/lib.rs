pub mod engine;
pub mod entry;

pub use engine::{AnalysisEngine, FileWatcherStats};
pub use entry::{EntryDetector, EntryPointCandidate};

#[cfg(test)]
mod tests;
