//! Query-time retrieval: embed the query, search the vector index, hydrate
//! full chunk rows from the relational store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::SearchError;
use crate::models::Chunk;
use crate::services::embedding::EmbeddingProvider;
use crate::services::storage::ChunkStore;
use crate::services::vector_store::{SearchFilter, VectorIndex};

/// A retrieved chunk with its similarity score.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Results of one retrieval, with timing.
#[derive(Debug, Clone)]
pub struct RetrievalResults {
    pub query: String,
    pub results: Vec<RetrievedChunk>,
    pub elapsed: Duration,
}

pub struct Retriever {
    provider: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorIndex>,
    store: Arc<dyn ChunkStore>,
}

impl Retriever {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorIndex>,
        store: Arc<dyn ChunkStore>,
    ) -> Self {
        Self {
            provider,
            vectors,
            store,
        }
    }

    /// Search for chunks relevant to a free-text query.
    ///
    /// Hits whose chunk row is missing from the relational store are soft
    /// misses and are skipped, not errors.
    pub async fn search(
        &self,
        query: &str,
        limit: u64,
        score_threshold: Option<f32>,
        filter: Option<SearchFilter>,
    ) -> Result<RetrievalResults, SearchError> {
        let start = Instant::now();

        let (query_vector, _usage) = self.provider.embed_one(query).await?;

        let hits = self
            .vectors
            .search(query_vector, limit, score_threshold, filter)
            .await?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            if let Some(chunk) = self.store.chunk_by_id(&hit.chunk_id)? {
                results.push(RetrievedChunk {
                    chunk,
                    score: hit.score,
                });
            }
        }

        Ok(RetrievalResults {
            query: query.to_string(),
            results,
            elapsed: start.elapsed(),
        })
    }

    /// Find chunks similar to an already-indexed chunk.
    ///
    /// An absent chunk id yields empty results rather than an error.
    pub async fn similar_to_chunk(
        &self,
        chunk_id: &str,
        limit: u64,
    ) -> Result<RetrievalResults, SearchError> {
        let Some(chunk) = self.store.chunk_by_id(chunk_id)? else {
            return Ok(RetrievalResults {
                query: chunk_id.to_string(),
                results: Vec::new(),
                elapsed: Duration::ZERO,
            });
        };

        self.search(&chunk.text, limit, None, None).await
    }
}
