use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One page or paragraph extracted upstream, immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceUnit {
    /// 1-based position within the source document.
    pub unit_number: u32,
    pub text: String,
    pub char_count: usize,
    pub word_count: usize,
}

impl SourceUnit {
    pub fn new(unit_number: u32, text: impl Into<String>) -> Self {
        let text = text.into();
        let char_count = text.chars().count();
        let word_count = text.split_whitespace().count();
        Self {
            unit_number,
            text,
            char_count,
            word_count,
        }
    }
}

/// The atomic unit produced by chunking and consumed by embedding.
///
/// Identity is deterministic: the same source unit chunked twice with the
/// same parameters yields the same ids in the same order, which is what makes
/// checkpoint-based resumption valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// `"{unit_number}_{sequence_within_unit}"`, unique within a document.
    pub chunk_id: String,
    pub text: String,
    pub token_count: usize,
    pub char_count: usize,
    pub word_count: usize,
    pub source_unit: u32,
    /// Opaque metadata carried from the source unit.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Chunk {
    /// Compose the deterministic chunk identifier.
    pub fn compose_id(unit_number: u32, sequence: usize) -> String {
        format!("{}_{}", unit_number, sequence)
    }
}

/// A chunk's embedding vector plus the metadata carried along for indexing.
/// Produced once per chunk; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub source_unit: u32,
    pub token_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_unit_counts() {
        let unit = SourceUnit::new(3, "two words");
        assert_eq!(unit.unit_number, 3);
        assert_eq!(unit.char_count, 9);
        assert_eq!(unit.word_count, 2);
    }

    #[test]
    fn test_compose_id() {
        assert_eq!(Chunk::compose_id(1, 0), "1_0");
        assert_eq!(Chunk::compose_id(42, 17), "42_17");
    }

    #[test]
    fn test_chunk_metadata_roundtrip() {
        let mut metadata = Map::new();
        metadata.insert("unit_number".to_string(), Value::from(7));
        let chunk = Chunk {
            chunk_id: Chunk::compose_id(7, 0),
            text: "Hello.".to_string(),
            token_count: 2,
            char_count: 6,
            word_count: 1,
            source_unit: 7,
            metadata,
        };
        let json = serde_json::to_string(&chunk).unwrap();
        let back: Chunk = serde_json::from_str(&json).unwrap();
        assert_eq!(back.chunk_id, "7_0");
        assert_eq!(back.metadata.get("unit_number"), Some(&Value::from(7)));
    }
}
