#![deny(missing_docs)]

//! Core library for the policy question-answering service.

/// HTTP routing and REST handlers.
pub mod api;
/// Chat-completion client used to generate answers.
pub mod chat;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Local vector index persistence and search.
pub mod index;
/// Upload format detection and text extraction.
pub mod ingestion;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion and answer counters.
pub mod metrics;
/// Document processing and question answering pipelines.
pub mod processing;
