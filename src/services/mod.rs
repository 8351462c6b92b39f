mod batch;
mod checkpoint;
mod chunker;
mod embedding;
mod pipeline;
mod retriever;
mod storage;
mod tokenizer;
mod vector_store;

pub use batch::{BatchEmbedder, EmbeddingRunReport};
pub use checkpoint::{CheckpointState, CheckpointStore};
pub use chunker::{SentenceChunker, split_sentences};
pub use embedding::{EmbedBatch, EmbeddingProvider, OpenAiEmbeddingClient, ProviderUsage};
pub use pipeline::{IndexReport, IndexingPipeline};
pub use retriever::{RetrievalResults, RetrievedChunk, Retriever};
pub use storage::{ChunkStore, SqliteChunkStore, StorageStats};
pub use tokenizer::TokenCounter;
pub use vector_store::{
    CollectionStats, QdrantStore, SearchFilter, SearchHit, VectorIndex, point_id_for_chunk,
};
