//! carassist-hybrid
//!
//! Fusion of lexical and dense retrieval, and the knowledge search service
//! exposed to the assistant as a tool.
pub mod fusion;
pub mod knowledge;

pub use fusion::{fuse, normalize, FusedHit, FusionParams, FusionRetriever, FusionWeights};
pub use knowledge::{format_passages, KnowledgeBase, Passage, NOT_INITIALIZED_MESSAGE, NO_INFORMATION_MESSAGE};
