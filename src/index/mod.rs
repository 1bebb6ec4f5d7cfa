//! Local vector index holding the embedded chunks of the current policy document.

mod similarity;
pub mod store;
pub mod types;

pub use store::{IndexSource, IndexStore, PolicyIndex};
pub use types::{IndexError, IndexManifest, IndexedChunk, RetrievedChunk};
