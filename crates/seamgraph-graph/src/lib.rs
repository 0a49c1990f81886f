pub mod algorithms;
pub mod graph;
pub mod router;
pub mod serialization;
pub mod traversal;

pub use graph::{GraphMutation, GraphStatistics, UniversalGraph};
pub use router::{QueryRouter, RoutingDecision, RoutingTarget};
pub use traversal::{CrossLanguageFlow, DepthTraversal, SeamBridge};
