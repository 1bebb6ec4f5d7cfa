//! Policy service coordinating extraction, chunking, embedding, indexing, and answering.

use crate::{
    chat::{ChatClient, ChatRequest, get_chat_client},
    config::{ChunkUnit, Config},
    embedding::{EmbeddingClient, get_embedding_client},
    index::{IndexError, IndexSource, IndexStore, PolicyIndex},
    ingestion::{DocumentFormat, StagedUpload},
    metrics::{MetricsSnapshot, PolicyMetrics},
    processing::{
        chunking::chunk_text,
        prompt::{build_prompt, source_preview},
        types::{
            Answer, AskError, IndexStatus, IngestError, IngestOutcome, InitError, UploadedDocument,
        },
    },
};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Pipeline knobs derived from [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Directory holding the persisted index.
    pub index_path: PathBuf,
    /// Directory where uploads are staged.
    pub upload_dir: PathBuf,
    /// Embedding model recorded in the index manifest and used for token counting.
    pub embedding_model: String,
    /// Maximum chunk length.
    pub chunk_size: usize,
    /// Overlap between neighbouring chunks.
    pub chunk_overlap: usize,
    /// Unit for `chunk_size` and `chunk_overlap`.
    pub chunk_unit: ChunkUnit,
    /// Chunks retrieved per question.
    pub top_k: usize,
    /// Sampling temperature for answers.
    pub temperature: f32,
    /// Output cap for answers.
    pub max_tokens: u32,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            index_path: config.index_path.clone(),
            upload_dir: config.upload_dir.clone(),
            embedding_model: config.embedding_model.clone(),
            chunk_size: config.text_splitter_chunk_size,
            chunk_overlap: config.text_splitter_chunk_overlap,
            chunk_unit: config.text_splitter_unit,
            top_k: config.retrieval_top_k,
            temperature: config.chat_temperature,
            max_tokens: config.chat_max_tokens,
        }
    }
}

/// Abstraction over the pipeline used by the HTTP surface.
#[async_trait]
pub trait PolicyApi: Send + Sync {
    /// Extract, chunk, embed, and index an uploaded document, replacing any previous index.
    async fn ingest_document(
        &self,
        upload: UploadedDocument,
    ) -> Result<IngestOutcome, IngestError>;

    /// Answer a question from the current index.
    async fn answer_question(&self, question: &str) -> Result<Answer, AskError>;

    /// Describe the current index.
    async fn index_status(&self) -> Result<IndexStatus, IndexError>;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Owns the provider clients and the index handle.
///
/// Index reads and swaps go through `index_lock`, so an ask never observes a half-replaced
/// index and concurrent uploads are applied one after another.
pub struct PolicyService {
    embedding_client: Box<dyn EmbeddingClient + Send + Sync>,
    chat_client: Box<dyn ChatClient + Send + Sync>,
    store: IndexStore,
    settings: PipelineSettings,
    index_lock: RwLock<()>,
    metrics: Arc<PolicyMetrics>,
}

impl PolicyService {
    /// Build the service with provider clients derived from configuration.
    pub fn new(config: &Config) -> Result<Self, InitError> {
        tracing::info!("Initializing provider clients");
        let embedding_client = get_embedding_client(config)?;
        let chat_client = get_chat_client(config)?;
        Ok(Self::from_parts(
            embedding_client,
            chat_client,
            PipelineSettings::from(config),
        ))
    }

    /// Assemble the service from explicit parts.
    pub fn from_parts(
        embedding_client: Box<dyn EmbeddingClient + Send + Sync>,
        chat_client: Box<dyn ChatClient + Send + Sync>,
        settings: PipelineSettings,
    ) -> Self {
        tracing::debug!(
            index_path = %settings.index_path.display(),
            upload_dir = %settings.upload_dir.display(),
            chunk_size = settings.chunk_size,
            chunk_overlap = settings.chunk_overlap,
            chunk_unit = ?settings.chunk_unit,
            top_k = settings.top_k,
            "Policy service ready"
        );
        Self {
            embedding_client,
            chat_client,
            store: IndexStore::new(settings.index_path.clone()),
            settings,
            index_lock: RwLock::new(()),
            metrics: Arc::new(PolicyMetrics::new()),
        }
    }

    /// Extract, chunk, embed, and index a document.
    pub async fn ingest_document(
        &self,
        upload: UploadedDocument,
    ) -> Result<IngestOutcome, IngestError> {
        let UploadedDocument { filename, bytes } = upload;
        let format = DocumentFormat::from_filename(&filename)
            .ok_or_else(|| IngestError::UnsupportedFileType(filename.clone()))?;
        tracing::info!(
            file = %filename,
            format = format.extension(),
            bytes = bytes.len(),
            "Processing document"
        );

        let staged = StagedUpload::write(&self.settings.upload_dir, &filename, &bytes)
            .await
            .map_err(IngestError::Staging)?;
        let texts = self.extract_chunks(format, &staged).await?;
        drop(staged);

        if texts.is_empty() {
            return Err(IngestError::EmptyDocument);
        }
        let chunk_count = texts.len();

        let embeddings = self
            .embedding_client
            .generate_embeddings(texts.clone())
            .await?;
        let index = PolicyIndex::build(
            IndexSource {
                name: &filename,
                bytes: &bytes,
                embedding_model: &self.settings.embedding_model,
            },
            texts,
            embeddings,
        )?;

        {
            let _guard = self.index_lock.write().await;
            self.store.replace(&index).await?;
        }

        self.metrics.record_document(chunk_count as u64);
        tracing::info!(
            file = %filename,
            index_id = %index.manifest.index_id,
            chunks = chunk_count,
            "Document indexed"
        );

        Ok(IngestOutcome {
            index_id: index.manifest.index_id,
            chunk_count,
        })
    }

    /// Run the loader and splitter on the blocking pool.
    async fn extract_chunks(
        &self,
        format: DocumentFormat,
        staged: &StagedUpload,
    ) -> Result<Vec<String>, IngestError> {
        let path = staged.path().to_path_buf();
        let settings = self.settings.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<String>, IngestError> {
            let text = format.extract_text(&path)?;
            let chunks = chunk_text(
                &text,
                settings.chunk_size,
                settings.chunk_overlap,
                settings.chunk_unit,
                &settings.embedding_model,
            )?;
            tracing::debug!(
                chunks = chunks.len(),
                chunk_size = settings.chunk_size,
                overlap = settings.chunk_overlap,
                "Split document"
            );
            Ok(chunks)
        })
        .await
        .map_err(|error| IngestError::Aborted(error.to_string()))?
    }

    /// Retrieve the closest chunks for `question` and generate an answer from them.
    pub async fn answer_question(&self, question: &str) -> Result<Answer, AskError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AskError::EmptyQuestion);
        }

        let index = {
            let _guard = self.index_lock.read().await;
            self.store.load().await?
        }
        .ok_or(AskError::MissingIndex)?;

        let query = self
            .embedding_client
            .generate_embeddings(vec![question.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(AskError::EmptyEmbedding)?;
        let retrieved = index.search(&query, self.settings.top_k)?;
        tracing::debug!(
            index_id = %index.manifest.index_id,
            retrieved = retrieved.len(),
            top_score = retrieved.first().map(|chunk| chunk.score),
            "Retrieved chunks"
        );

        let answer = self
            .chat_client
            .complete(ChatRequest {
                prompt: build_prompt(question, &retrieved),
                temperature: self.settings.temperature,
                max_tokens: self.settings.max_tokens,
            })
            .await?;

        self.metrics.record_answer();
        tracing::info!(
            index_id = %index.manifest.index_id,
            sources = retrieved.len(),
            "Question answered"
        );

        Ok(Answer {
            answer,
            sources: retrieved
                .iter()
                .map(|chunk| source_preview(&chunk.text))
                .collect(),
        })
    }

    /// Describe the current index without loading its vectors.
    pub async fn index_status(&self) -> Result<IndexStatus, IndexError> {
        let _guard = self.index_lock.read().await;
        Ok(IndexStatus {
            manifest: self.store.manifest().await?,
        })
    }

    /// Snapshot ingestion and answer counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[async_trait]
impl PolicyApi for PolicyService {
    async fn ingest_document(
        &self,
        upload: UploadedDocument,
    ) -> Result<IngestOutcome, IngestError> {
        PolicyService::ingest_document(self, upload).await
    }

    async fn answer_question(&self, question: &str) -> Result<Answer, AskError> {
        PolicyService::answer_question(self, question).await
    }

    async fn index_status(&self) -> Result<IndexStatus, IndexError> {
        PolicyService::index_status(self).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        PolicyService::metrics_snapshot(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatClientError;
    use crate::embedding::EmbeddingClientError;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const DIMENSION: usize = 32;

    /// Bag-of-words hashing so texts sharing words land close together.
    struct KeywordEmbedder;

    #[async_trait]
    impl EmbeddingClient for KeywordEmbedder {
        async fn generate_embeddings(
            &self,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            Ok(texts
                .iter()
                .map(|text| {
                    let mut vector = vec![0.0_f32; DIMENSION];
                    for word in text.split(|c: char| !c.is_alphanumeric()) {
                        if word.is_empty() {
                            continue;
                        }
                        let bucket = word
                            .to_lowercase()
                            .bytes()
                            .fold(7usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
                        vector[bucket % DIMENSION] += 1.0;
                    }
                    vector
                })
                .collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingClient for FailingEmbedder {
        async fn generate_embeddings(
            &self,
            _texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            Err(EmbeddingClientError::GenerationFailed("quota exceeded".into()))
        }
    }

    #[derive(Default)]
    struct RecordingChat {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatClient for Arc<RecordingChat> {
        async fn complete(&self, request: ChatRequest) -> Result<String, ChatClientError> {
            self.prompts.lock().expect("lock").push(request.prompt);
            Ok("Generated answer".into())
        }
    }

    fn settings(dir: &TempDir) -> PipelineSettings {
        PipelineSettings {
            index_path: dir.path().join("policy_index"),
            upload_dir: dir.path().join("temp"),
            embedding_model: "test-model".into(),
            chunk_size: 500,
            chunk_overlap: 50,
            chunk_unit: ChunkUnit::Chars,
            top_k: 4,
            temperature: 0.2,
            max_tokens: 300,
        }
    }

    fn service(dir: &TempDir) -> (PolicyService, Arc<RecordingChat>) {
        let chat = Arc::new(RecordingChat::default());
        let service = PolicyService::from_parts(
            Box::new(KeywordEmbedder),
            Box::new(chat.clone()),
            settings(dir),
        );
        (service, chat)
    }

    fn txt(name: &str, body: &str) -> UploadedDocument {
        UploadedDocument {
            filename: name.into(),
            bytes: body.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn unsupported_extension_leaves_index_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (service, _) = service(&dir);

        let error = service
            .ingest_document(txt("records.csv", "a,b,c"))
            .await
            .expect_err("unsupported");

        assert!(error.is_client_error());
        assert!(matches!(error, IngestError::UnsupportedFileType(_)));
        assert!(service.index_status().await.expect("status").manifest.is_none());
        assert!(!dir.path().join("temp").exists());
    }

    #[tokio::test]
    async fn ask_before_upload_reports_missing_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (service, _) = service(&dir);

        let error = service
            .answer_question("What is the retention policy?")
            .await
            .expect_err("missing index");

        assert!(matches!(error, AskError::MissingIndex));
        assert!(error.is_client_error());
    }

    #[tokio::test]
    async fn blank_question_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (service, _) = service(&dir);
        let error = service.answer_question("   ").await.expect_err("blank");
        assert!(matches!(error, AskError::EmptyQuestion));
    }

    #[tokio::test]
    async fn upload_then_ask_returns_answer_and_previews() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (service, chat) = service(&dir);
        let body = format!(
            "Vacation requests must be approved by a manager.\n\n{}",
            "Security training is mandatory for every employee each year. ".repeat(30)
        );

        let outcome = service
            .ingest_document(txt("handbook.txt", &body))
            .await
            .expect("ingest");
        assert!(outcome.chunk_count > 1);

        let answer = service
            .answer_question("Who approves vacation requests?")
            .await
            .expect("answer");

        assert_eq!(answer.answer, "Generated answer");
        assert!(!answer.sources.is_empty() && answer.sources.len() <= 4);
        assert!(
            answer
                .sources
                .iter()
                .any(|source| source.starts_with("Vacation requests"))
        );
        for source in &answer.sources {
            assert!(source.chars().count() <= 203);
            assert!(source.ends_with("..."));
        }

        let prompts = chat.prompts.lock().expect("lock");
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Question: Who approves vacation requests?"));

        let snapshot = service.metrics_snapshot();
        assert_eq!(snapshot.documents_indexed, 1);
        assert_eq!(snapshot.questions_answered, 1);
        assert_eq!(snapshot.chunks_indexed, outcome.chunk_count as u64);
    }

    #[tokio::test]
    async fn staged_upload_is_removed_after_processing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (service, _) = service(&dir);

        service
            .ingest_document(txt("policy.txt", "Passwords rotate every ninety days."))
            .await
            .expect("ingest");

        let staged: Vec<_> = std::fs::read_dir(dir.path().join("temp"))
            .expect("temp dir")
            .collect();
        assert!(staged.is_empty());
    }

    #[tokio::test]
    async fn reupload_replaces_previous_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (service, _) = service(&dir);

        let first = service
            .ingest_document(txt("first.txt", "Vacation accrues at two days per month."))
            .await
            .expect("first");
        let second = service
            .ingest_document(txt("second.txt", "Expense reports are due within thirty days."))
            .await
            .expect("second");
        assert_ne!(first.index_id, second.index_id);

        let answer = service
            .answer_question("How does vacation accrue?")
            .await
            .expect("answer");
        assert!(answer.sources.iter().all(|source| !source.contains("Vacation")));

        let status = service.index_status().await.expect("status");
        let manifest = status.manifest.expect("manifest");
        assert_eq!(manifest.index_id, second.index_id);
        assert_eq!(manifest.source_name, "second.txt");
    }

    #[tokio::test]
    async fn empty_document_is_a_server_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (service, _) = service(&dir);

        let error = service
            .ingest_document(txt("blank.txt", "  \n\n "))
            .await
            .expect_err("empty");
        assert!(matches!(error, IngestError::EmptyDocument));
        assert!(!error.is_client_error());
    }

    #[tokio::test]
    async fn embedding_failure_keeps_previous_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (service, _) = service(&dir);
        let first = service
            .ingest_document(txt("first.txt", "Laptops must use disk encryption."))
            .await
            .expect("first");

        let failing = PolicyService::from_parts(
            Box::new(FailingEmbedder),
            Box::new(Arc::new(RecordingChat::default())),
            settings(&dir),
        );
        let error = failing
            .ingest_document(txt("second.txt", "Anything"))
            .await
            .expect_err("embedding failure");
        assert!(matches!(error, IngestError::Embedding(_)));
        assert!(error.to_string().contains("quota exceeded"));

        let manifest = service
            .index_status()
            .await
            .expect("status")
            .manifest
            .expect("manifest");
        assert_eq!(manifest.index_id, first.index_id);
    }
}
