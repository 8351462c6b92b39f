mod config;
mod document;

pub use config::{
    CheckpointConfig, ChunkingConfig, Config, DEFAULT_COLLECTION, DEFAULT_EMBEDDING_DIMENSION,
    DEFAULT_EMBEDDING_MODEL, DEFAULT_OPENAI_URL, DEFAULT_QDRANT_URL, EmbeddingConfig, SearchConfig,
    StorageConfig, VectorStoreConfig,
};
pub use document::{Chunk, EmbeddingRecord, SourceUnit};
