//! Single-directory index persistence.
//!
//! The index directory holds `manifest.json` and `chunks.json`. A new version is written to a
//! sibling staging directory and swapped in by rename, so the configured path either holds a
//! complete previous version or a complete new one.

use crate::index::similarity::{cosine_similarity, l2_norm, top_k};
use crate::index::types::{IndexError, IndexManifest, IndexedChunk, RetrievedChunk};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

const MANIFEST_FILE: &str = "manifest.json";
const CHUNKS_FILE: &str = "chunks.json";

/// In-memory form of one index version.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyIndex {
    /// Version metadata.
    pub manifest: IndexManifest,
    /// Chunks in split order.
    pub chunks: Vec<IndexedChunk>,
}

/// Describes the document an index is built from.
#[derive(Debug, Clone)]
pub struct IndexSource<'a> {
    /// Original file name.
    pub name: &'a str,
    /// Raw uploaded bytes, hashed into the manifest.
    pub bytes: &'a [u8],
    /// Embedding model used for the vectors.
    pub embedding_model: &'a str,
}

impl PolicyIndex {
    /// Pair chunk texts with their embeddings and stamp a fresh manifest.
    pub fn build(
        source: IndexSource<'_>,
        texts: Vec<String>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<Self, IndexError> {
        if texts.len() != embeddings.len() {
            return Err(IndexError::Inconsistent(format!(
                "{} chunks but {} embeddings",
                texts.len(),
                embeddings.len()
            )));
        }
        let dimension = embeddings.first().map(Vec::len).unwrap_or(0);
        if dimension == 0 {
            return Err(IndexError::Inconsistent(
                "index requires at least one non-empty embedding".into(),
            ));
        }

        let chunks = texts
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(position, (text, embedding))| {
                if embedding.len() != dimension {
                    return Err(IndexError::DimensionMismatch {
                        expected: dimension,
                        actual: embedding.len(),
                    });
                }
                Ok(IndexedChunk {
                    position,
                    text,
                    embedding,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let manifest = IndexManifest {
            index_id: Uuid::new_v4().to_string(),
            embedding_model: source.embedding_model.to_string(),
            dimension,
            chunk_count: chunks.len(),
            source_name: source.name.to_string(),
            source_sha256: hex::encode(Sha256::digest(source.bytes)),
            created_at: current_timestamp_rfc3339(),
        };

        Ok(Self { manifest, chunks })
    }

    /// Return up to `k` chunks most similar to `query`, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, IndexError> {
        if query.len() != self.manifest.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.manifest.dimension,
                actual: query.len(),
            });
        }
        let query_norm = l2_norm(query);
        let scores = self.chunks.iter().map(|chunk| {
            cosine_similarity(query, &chunk.embedding, query_norm, l2_norm(&chunk.embedding))
        });

        Ok(top_k(scores, k)
            .into_iter()
            .map(|(idx, score)| {
                let chunk = &self.chunks[idx];
                RetrievedChunk {
                    position: chunk.position,
                    score,
                    text: chunk.text.clone(),
                }
            })
            .collect())
    }
}

/// Handle to the on-disk index location.
#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    /// Create a handle for `root`; nothing is touched on disk.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Read only the manifest of the current index, if any.
    pub async fn manifest(&self) -> Result<Option<IndexManifest>, IndexError> {
        match tokio::fs::read(self.root.join(MANIFEST_FILE)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    /// Load the current index, returning `None` when nothing has been uploaded yet.
    pub async fn load(&self) -> Result<Option<PolicyIndex>, IndexError> {
        let Some(manifest) = self.manifest().await? else {
            return Ok(None);
        };
        let bytes = tokio::fs::read(self.root.join(CHUNKS_FILE)).await?;
        let chunks: Vec<IndexedChunk> = serde_json::from_slice(&bytes)?;
        if chunks.len() != manifest.chunk_count {
            return Err(IndexError::Inconsistent(format!(
                "manifest lists {} chunks, found {}",
                manifest.chunk_count,
                chunks.len()
            )));
        }
        tracing::debug!(
            index_id = %manifest.index_id,
            chunks = chunks.len(),
            "Loaded policy index"
        );
        Ok(Some(PolicyIndex { manifest, chunks }))
    }

    /// Replace whatever index exists with `index`.
    pub async fn replace(&self, index: &PolicyIndex) -> Result<(), IndexError> {
        let name = self
            .root
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IndexError::InvalidPath(self.root.display().to_string()))?;
        let parent = self.root.parent().unwrap_or_else(|| Path::new(""));
        let suffix = &index.manifest.index_id;
        let staging = parent.join(format!(".{name}.staging-{suffix}"));
        let retired = parent.join(format!(".{name}.retired-{suffix}"));

        if let Err(error) = write_version(&staging, index).await {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(error);
        }

        let had_previous = tokio::fs::try_exists(&self.root).await.unwrap_or(false);
        if had_previous {
            if let Err(error) = tokio::fs::rename(&self.root, &retired).await {
                let _ = tokio::fs::remove_dir_all(&staging).await;
                return Err(error.into());
            }
        }
        if let Err(error) = tokio::fs::rename(&staging, &self.root).await {
            if had_previous {
                let _ = tokio::fs::rename(&retired, &self.root).await;
            }
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(error.into());
        }
        if had_previous {
            if let Err(error) = tokio::fs::remove_dir_all(&retired).await {
                tracing::warn!(
                    path = %retired.display(),
                    error = %error,
                    "Failed to remove retired index"
                );
            }
        }

        tracing::info!(
            index_id = %index.manifest.index_id,
            chunks = index.manifest.chunk_count,
            path = %self.root.display(),
            replaced = had_previous,
            "Policy index written"
        );
        Ok(())
    }
}

async fn write_version(dir: &Path, index: &PolicyIndex) -> Result<(), IndexError> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(dir.join(CHUNKS_FILE), serde_json::to_vec(&index.chunks)?).await?;
    // Manifest last: its presence marks the version complete.
    tokio::fs::write(
        dir.join(MANIFEST_FILE),
        serde_json::to_vec_pretty(&index.manifest)?,
    )
    .await?;
    Ok(())
}

fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(name: &'static str) -> IndexSource<'static> {
        IndexSource {
            name,
            bytes: b"document bytes",
            embedding_model: "test-model",
        }
    }

    fn sample_index(name: &'static str, texts: &[&str]) -> PolicyIndex {
        let embeddings = texts
            .iter()
            .enumerate()
            .map(|(idx, _)| {
                let mut v = vec![0.0; 4];
                v[idx % 4] = 1.0;
                v
            })
            .collect();
        PolicyIndex::build(
            source(name),
            texts.iter().map(|t| t.to_string()).collect(),
            embeddings,
        )
        .expect("index")
    }

    #[test]
    fn build_records_manifest() {
        let index = sample_index("policy.txt", &["alpha", "beta"]);
        assert_eq!(index.manifest.chunk_count, 2);
        assert_eq!(index.manifest.dimension, 4);
        assert_eq!(index.manifest.source_name, "policy.txt");
        assert_eq!(index.manifest.source_sha256.len(), 64);
        assert!(index.manifest.created_at.contains('T'));
        assert_eq!(index.chunks[1].position, 1);
    }

    #[test]
    fn build_rejects_mismatched_lengths() {
        let error = PolicyIndex::build(source("a.txt"), vec!["one".into()], Vec::new())
            .expect_err("mismatch");
        assert!(matches!(error, IndexError::Inconsistent(_)));

        let error = PolicyIndex::build(
            source("a.txt"),
            vec!["one".into(), "two".into()],
            vec![vec![1.0, 0.0], vec![1.0]],
        )
        .expect_err("ragged");
        assert!(matches!(
            error,
            IndexError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn search_ranks_by_cosine_similarity() {
        let index = sample_index("a.txt", &["zero", "one", "two"]);
        let hits = index.search(&[0.1, 0.9, 0.0, 0.0], 2).expect("search");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "one");
        assert_eq!(hits[1].text, "zero");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn search_rejects_wrong_dimension() {
        let index = sample_index("a.txt", &["zero"]);
        let error = index.search(&[1.0, 0.0], 4).expect_err("dimension");
        assert!(matches!(error, IndexError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn load_returns_none_before_first_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = IndexStore::new(dir.path().join("policy_index"));
        assert!(store.manifest().await.expect("manifest").is_none());
        assert!(store.load().await.expect("load").is_none());
    }

    #[tokio::test]
    async fn replace_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = IndexStore::new(dir.path().join("policy_index"));
        let index = sample_index("policy.txt", &["alpha", "beta"]);

        store.replace(&index).await.expect("replace");

        assert!(store.manifest().await.expect("manifest").is_some());
        let loaded = store.load().await.expect("load").expect("present");
        assert_eq!(loaded, index);
    }

    #[tokio::test]
    async fn replace_discards_previous_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = IndexStore::new(dir.path().join("policy_index"));
        let first = sample_index("first.txt", &["vacation policy"]);
        let second = sample_index("second.txt", &["expense policy", "travel policy"]);

        store.replace(&first).await.expect("first");
        store.replace(&second).await.expect("second");

        let loaded = store.load().await.expect("load").expect("present");
        assert_eq!(loaded.manifest.index_id, second.manifest.index_id);
        assert!(loaded.chunks.iter().all(|c| !c.text.contains("vacation")));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read_dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("policy_index")]);
    }
}
