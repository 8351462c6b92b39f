//! End-to-end indexing: chunks from the relational store, through the batch
//! embedder, into the vector index.

use std::sync::Arc;

use crate::error::PipelineError;
use crate::services::batch::{BatchEmbedder, EmbeddingRunReport};
use crate::services::storage::{ChunkStore, StorageStats};
use crate::services::vector_store::{CollectionStats, VectorIndex};

/// Aggregate statistics for one indexing run.
#[derive(Debug)]
pub struct IndexReport {
    pub embedding: EmbeddingRunReport,
    /// Vectors uploaded this run; zero when everything was already indexed.
    pub uploaded: usize,
    pub collection: Option<CollectionStats>,
    pub storage: StorageStats,
}

/// Composes the embedding orchestrator with the relational and vector store
/// collaborators.
pub struct IndexingPipeline {
    store: Arc<dyn ChunkStore>,
    embedder: BatchEmbedder,
    vectors: Arc<dyn VectorIndex>,
}

impl IndexingPipeline {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: BatchEmbedder,
        vectors: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            store,
            embedder,
            vectors,
        }
    }

    /// Embed all pending chunks and upload the new vectors.
    ///
    /// With nothing pending the upload is skipped, but collection and
    /// storage statistics are still fetched and returned.
    pub async fn run(&self, resume: bool) -> Result<IndexReport, PipelineError> {
        let all_chunks = self.store.all_chunks()?;

        let embedding = self.embedder.run(&all_chunks, resume).await?;

        let uploaded = if embedding.embeddings.is_empty() {
            0
        } else {
            self.vectors.upsert_records(&embedding.embeddings).await?
        };

        let collection = self.vectors.collection_info().await?;
        let storage = self.store.statistics()?;

        Ok(IndexReport {
            embedding,
            uploaded,
            collection,
            storage,
        })
    }

    /// Database and collection statistics without running any embedding.
    pub async fn statistics(
        &self,
    ) -> Result<(StorageStats, Option<CollectionStats>), PipelineError> {
        let storage = self.store.statistics()?;
        let collection = self.vectors.collection_info().await?;
        Ok((storage, collection))
    }
}
