//! Shared types for the persisted policy index.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned while building, persisting, or querying the index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Filesystem operation on the index directory failed.
    #[error("Index I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// Index files could not be encoded or decoded.
    #[error("Index serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Configured index path cannot hold a directory swap.
    #[error("Invalid index path: {0}")]
    InvalidPath(String),
    /// Vector length disagrees with the dimension recorded in the index.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension recorded when the index was built.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },
    /// Chunk and embedding collections do not line up.
    #[error("Inconsistent index contents: {0}")]
    Inconsistent(String),
}

/// Descriptive metadata stored next to the vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    /// Identifier of this index version; changes on every upload.
    pub index_id: String,
    /// Embedding model that produced the vectors.
    pub embedding_model: String,
    /// Length of every stored vector.
    pub dimension: usize,
    /// Number of chunks stored.
    pub chunk_count: usize,
    /// Original file name of the indexed document.
    pub source_name: String,
    /// SHA-256 of the uploaded bytes, hex encoded.
    pub source_sha256: String,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

/// One chunk of document text together with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    /// Position of the chunk in the split sequence.
    pub position: usize,
    /// Chunk text.
    pub text: String,
    /// Embedding vector for `text`.
    pub embedding: Vec<f32>,
}

/// A chunk returned by similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    /// Position of the chunk in the split sequence.
    pub position: usize,
    /// Cosine similarity to the query.
    pub score: f32,
    /// Chunk text.
    pub text: String,
}
