//! Test helpers shared across agentic-rs crates.

pub mod embedder;
pub mod index;

pub use embedder::{FailingEmbedder, FixedEmbedder, KeywordEmbedder};
pub use index::FaultyIndex;
