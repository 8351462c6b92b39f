//! Qdrant vector store operations.

use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, Distance, Filter, PointStruct, Range,
    SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use uuid::Uuid;

use crate::error::VectorStoreError;
use crate::models::{EmbeddingRecord, VectorStoreConfig};

/// Vectors uploaded to Qdrant per upsert request.
const UPLOAD_BATCH_SIZE: usize = 100;

/// Derive the vector point id deterministically from the chunk id.
///
/// A resumed or repeated run therefore upserts onto the same points instead
/// of colliding with (or duplicating) entries uploaded by a prior run.
pub fn point_id_for_chunk(chunk_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string()
}

/// Collection statistics as reported by Qdrant.
#[derive(Debug, Clone)]
pub struct CollectionStats {
    pub name: String,
    pub points_count: u64,
    pub status: String,
}

/// Metadata filter for vector search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Restrict to a single source unit.
    pub source_unit: Option<u32>,
    /// Restrict to an inclusive range of source units.
    pub unit_range: Option<(u32, u32)>,
}

impl SearchFilter {
    fn into_conditions(self) -> Vec<Condition> {
        let mut conditions = Vec::new();
        if let Some(unit) = self.source_unit {
            conditions.push(Condition::matches("source_unit", unit as i64));
        }
        if let Some((min, max)) = self.unit_range {
            conditions.push(Condition::range(
                "source_unit",
                Range {
                    gte: Some(min as f64),
                    lte: Some(max as f64),
                    ..Default::default()
                },
            ));
        }
        conditions
    }
}

/// One ranked search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: String,
    pub score: f32,
    pub source_unit: Option<u32>,
    pub token_count: Option<usize>,
}

/// The vector store collaborator consumed by the pipeline and retriever.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Upload embedding records; returns the number of vectors uploaded.
    async fn upsert_records(&self, records: &[EmbeddingRecord])
    -> Result<usize, VectorStoreError>;

    /// Similarity search with optional score threshold and metadata filter.
    async fn search(
        &self,
        query_vector: Vec<f32>,
        limit: u64,
        score_threshold: Option<f32>,
        filter: Option<SearchFilter>,
    ) -> Result<Vec<SearchHit>, VectorStoreError>;

    /// Collection statistics, or `None` when the collection does not exist.
    async fn collection_info(&self) -> Result<Option<CollectionStats>, VectorStoreError>;
}

/// Client for the Qdrant collection holding chunk embeddings.
pub struct QdrantStore {
    client: Qdrant,
    collection: String,
    vector_size: u64,
}

impl QdrantStore {
    pub fn new(config: &VectorStoreConfig, vector_size: u64) -> Result<Self, VectorStoreError> {
        let mut builder = Qdrant::from_url(&config.url);

        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }

        let client = builder
            .build()
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            collection: config.collection.clone(),
            vector_size,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn health_check(&self) -> Result<bool, VectorStoreError> {
        self.client
            .health_check()
            .await
            .map(|_| true)
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))
    }

    /// Collection statistics, or `None` when the collection does not exist.
    pub async fn collection_info(&self) -> Result<Option<CollectionStats>, VectorStoreError> {
        match self.client.collection_info(&self.collection).await {
            Ok(info) => {
                let result = info.result;
                let points_count = result
                    .as_ref()
                    .and_then(|r| r.points_count)
                    .unwrap_or(0);
                let status = result
                    .as_ref()
                    .map(|r| {
                        qdrant_client::qdrant::CollectionStatus::try_from(r.status)
                            .map(|s| format!("{:?}", s).to_lowercase())
                            .unwrap_or_else(|_| "unknown".to_string())
                    })
                    .unwrap_or_else(|| "unknown".to_string());
                Ok(Some(CollectionStats {
                    name: self.collection.clone(),
                    points_count,
                    status,
                }))
            }
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("not found") || msg.contains("doesn't exist") {
                    Ok(None)
                } else {
                    Err(VectorStoreError::CollectionError(msg))
                }
            }
        }
    }

    /// Create the collection if needed; with `recreate` the existing one is
    /// dropped first.
    pub async fn create_collection(&self, recreate: bool) -> Result<(), VectorStoreError> {
        if self.collection_info().await?.is_some() {
            if !recreate {
                return Ok(());
            }
            self.client
                .delete_collection(&self.collection)
                .await
                .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;
        }

        let create_collection = CreateCollectionBuilder::new(&self.collection).vectors_config(
            VectorParamsBuilder::new(self.vector_size, Distance::Cosine),
        );

        self.client
            .create_collection(create_collection)
            .await
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;

        Ok(())
    }

    /// Upload embedding records; returns the number of vectors uploaded.
    pub async fn upsert_records(
        &self,
        records: &[EmbeddingRecord],
    ) -> Result<usize, VectorStoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut uploaded = 0usize;

        for batch in records.chunks(UPLOAD_BATCH_SIZE) {
            let points: Vec<PointStruct> = batch
                .iter()
                .map(|record| {
                    let mut payload: HashMap<String, Value> = HashMap::new();
                    payload.insert("chunk_id".to_string(), record.chunk_id.clone().into());
                    payload.insert("source_unit".to_string(), (record.source_unit as i64).into());
                    payload.insert("token_count".to_string(), (record.token_count as i64).into());

                    PointStruct::new(
                        point_id_for_chunk(&record.chunk_id),
                        record.vector.clone(),
                        payload,
                    )
                })
                .collect();

            let upsert = UpsertPointsBuilder::new(&self.collection, points);

            self.client
                .upsert_points(upsert)
                .await
                .map_err(|e| VectorStoreError::UpsertError(e.to_string()))?;

            uploaded += batch.len();
        }

        Ok(uploaded)
    }

    /// Similarity search with optional score threshold and metadata filter.
    pub async fn search(
        &self,
        query_vector: Vec<f32>,
        limit: u64,
        score_threshold: Option<f32>,
        filter: Option<SearchFilter>,
    ) -> Result<Vec<SearchHit>, VectorStoreError> {
        let conditions = filter.map(SearchFilter::into_conditions).unwrap_or_default();

        let mut search_builder =
            SearchPointsBuilder::new(&self.collection, query_vector, limit).with_payload(true);

        if !conditions.is_empty() {
            search_builder = search_builder.filter(Filter::must(conditions));
        }

        if let Some(score) = score_threshold {
            search_builder = search_builder.score_threshold(score);
        }

        let results = self
            .client
            .search_points(search_builder)
            .await
            .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;

        let hits = results
            .result
            .into_iter()
            .map(|point| {
                let payload = point.payload;
                SearchHit {
                    chunk_id: payload_str(&payload, "chunk_id").unwrap_or_default(),
                    score: point.score,
                    source_unit: payload_i64(&payload, "source_unit").map(|v| v as u32),
                    token_count: payload_i64(&payload, "token_count").map(|v| v as usize),
                }
            })
            .collect();

        Ok(hits)
    }

    pub async fn delete_collection(&self) -> Result<(), VectorStoreError> {
        self.client
            .delete_collection(&self.collection)
            .await
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn upsert_records(
        &self,
        records: &[EmbeddingRecord],
    ) -> Result<usize, VectorStoreError> {
        QdrantStore::upsert_records(self, records).await
    }

    async fn search(
        &self,
        query_vector: Vec<f32>,
        limit: u64,
        score_threshold: Option<f32>,
        filter: Option<SearchFilter>,
    ) -> Result<Vec<SearchHit>, VectorStoreError> {
        QdrantStore::search(self, query_vector, limit, score_threshold, filter).await
    }

    async fn collection_info(&self) -> Result<Option<CollectionStats>, VectorStoreError> {
        QdrantStore::collection_info(self).await
    }
}

fn payload_str(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| match &v.kind {
        Some(qdrant_client::qdrant::value::Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    })
}

fn payload_i64(payload: &HashMap<String, Value>, key: &str) -> Option<i64> {
    payload.get(key).and_then(|v| match &v.kind {
        Some(qdrant_client::qdrant::value::Kind::IntegerValue(n)) => Some(*n),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_id_is_deterministic() {
        let a = point_id_for_chunk("12_3");
        let b = point_id_for_chunk("12_3");
        assert_eq!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn test_point_ids_distinct_per_chunk() {
        assert_ne!(point_id_for_chunk("1_0"), point_id_for_chunk("1_1"));
        // "12_3" and "1_23" must not collide
        assert_ne!(point_id_for_chunk("12_3"), point_id_for_chunk("1_23"));
    }

    #[test]
    fn test_payload_helpers() {
        let mut payload: HashMap<String, Value> = HashMap::new();
        payload.insert("chunk_id".to_string(), "4_2".to_string().into());
        payload.insert("source_unit".to_string(), 4i64.into());

        assert_eq!(payload_str(&payload, "chunk_id"), Some("4_2".to_string()));
        assert_eq!(payload_i64(&payload, "source_unit"), Some(4));
        assert_eq!(payload_str(&payload, "missing"), None);
        assert_eq!(payload_i64(&payload, "chunk_id"), None);
    }

    #[test]
    fn test_filter_conditions() {
        let filter = SearchFilter {
            source_unit: Some(7),
            unit_range: Some((1, 10)),
        };
        assert_eq!(filter.into_conditions().len(), 2);

        let empty = SearchFilter::default();
        assert!(empty.into_conditions().is_empty());
    }
}
