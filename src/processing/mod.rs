//! Upload and question pipelines: chunking, embedding, index swaps, and answer generation.

pub mod chunking;
pub mod prompt;
mod service;
pub mod types;

pub use service::{PipelineSettings, PolicyApi, PolicyService};
pub use types::{
    Answer, AskError, ChunkingError, IndexStatus, IngestError, IngestOutcome, InitError,
    UploadedDocument,
};
