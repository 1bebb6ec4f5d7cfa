//! Core data types and error definitions for the upload and ask pipelines.

use crate::{
    chat::ChatClientError,
    embedding::EmbeddingClientError,
    index::{IndexError, IndexManifest},
    ingestion::ExtractionError,
};
use anyhow::Error as TokenizerError;
use thiserror::Error;

/// Errors produced while turning raw text into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Ingestion configured an impossible budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Tokenizer resources were unavailable for the configured model.
    #[error("failed to initialize tokenizer for model '{model}': {source}")]
    Tokenizer {
        /// Embedding model we attempted to load.
        model: String,
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: TokenizerError,
    },
}

/// Errors raised while constructing the service's provider clients.
#[derive(Debug, Error)]
pub enum InitError {
    /// Embedding client could not be created.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Chat client could not be created.
    #[error(transparent)]
    Chat(#[from] ChatClientError),
}

/// Errors emitted by the upload pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    /// File extension is not one of the supported formats.
    #[error("Unsupported file type")]
    UnsupportedFileType(String),
    /// Upload could not be written to the staging directory.
    #[error("Failed to stage upload: {0}")]
    Staging(#[source] std::io::Error),
    /// Loader failed to extract text.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    /// Extraction task panicked or was cancelled.
    #[error("Document processing aborted: {0}")]
    Aborted(String),
    /// Document produced no text to index.
    #[error("No text could be extracted from the document")]
    EmptyDocument,
    /// Chunking step failed to segment the document.
    #[error("Failed to chunk document: {0}")]
    Chunking(#[from] ChunkingError),
    /// Embedding provider failed to produce vectors.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Index could not be built or persisted.
    #[error(transparent)]
    Index(#[from] IndexError),
}

impl IngestError {
    /// Whether the failure is attributable to the request rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::UnsupportedFileType(_))
    }
}

/// Errors emitted while answering a question.
#[derive(Debug, Error)]
pub enum AskError {
    /// Question text was blank.
    #[error("Question must not be empty")]
    EmptyQuestion,
    /// No index exists yet.
    #[error("No policy documents have been uploaded yet")]
    MissingIndex,
    /// Embedding provider failed to embed the question.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Embedding provider returned no vector for the question.
    #[error("Embedding provider returned no vector for the question")]
    EmptyEmbedding,
    /// Index could not be loaded or searched.
    #[error(transparent)]
    Index(#[from] IndexError),
    /// Chat provider failed to produce an answer.
    #[error(transparent)]
    Generation(#[from] ChatClientError),
}

impl AskError {
    /// Whether the failure is attributable to the request rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::EmptyQuestion | Self::MissingIndex)
    }
}

/// A file received by the upload endpoint.
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    /// Client-supplied file name; its extension selects the loader.
    pub filename: String,
    /// Raw file contents.
    pub bytes: Vec<u8>,
}

/// Summary of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Identifier of the index version that now serves questions.
    pub index_id: String,
    /// Number of chunks embedded and stored.
    pub chunk_count: usize,
}

/// Generated answer plus previews of the chunks it was grounded on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    /// Model output.
    pub answer: String,
    /// Truncated retrieved chunks, best match first.
    pub sources: Vec<String>,
}

/// Current state of the on-disk index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexStatus {
    /// Manifest of the current index, `None` before the first upload.
    pub manifest: Option<IndexManifest>,
}
