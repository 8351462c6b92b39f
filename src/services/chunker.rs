//! Sentence-aware chunking with token budgets and overlap.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::ConfigError;
use crate::models::{Chunk, ChunkingConfig, SourceUnit};
use crate::services::tokenizer::TokenCounter;

/// Split text into ordered, trimmed, non-empty sentence strings.
///
/// Boundaries are `.`, `!` or `?` followed by whitespace. This is a
/// heuristic, not a sentence grammar: abbreviations produce false splits and
/// that trade-off is accepted.
pub fn split_sentences(text: &str) -> Vec<String> {
    static BOUNDARY: OnceLock<Regex> = OnceLock::new();
    let boundary = BOUNDARY.get_or_init(|| Regex::new(r"[.!?]\s+").expect("valid regex"));

    let mut sentences = Vec::new();
    let mut last = 0;
    for m in boundary.find_iter(text) {
        // The punctuation mark stays with its sentence; it is a single
        // ASCII byte so the +1 split is char-boundary safe.
        let split_at = m.start() + 1;
        let sentence = text[last..split_at].trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
        last = m.end();
    }
    let tail = text[last..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

/// Packs sentences into chunks bounded by a token budget, carrying a trailing
/// overlap of context into each following chunk.
///
/// Chunk ids are `"{unit_number}_{sequence}"` and are stable across runs for
/// identical input and parameters.
#[derive(Debug, Clone)]
pub struct SentenceChunker {
    counter: TokenCounter,
    chunk_size: usize,
    overlap: usize,
}

impl SentenceChunker {
    /// Create a chunker from configuration, resolving the tokenizer
    /// vocabulary for the configured encoding model.
    pub fn new(config: &ChunkingConfig) -> Result<Self, ConfigError> {
        let counter = TokenCounter::for_model(&config.encoding_model)?;
        Ok(Self::with_counter(
            counter,
            config.chunk_size,
            config.overlap,
        ))
    }

    /// Create a chunker over an existing token counter.
    pub fn with_counter(counter: TokenCounter, chunk_size: usize, overlap: usize) -> Self {
        Self {
            counter,
            chunk_size,
            overlap,
        }
    }

    pub fn token_counter(&self) -> &TokenCounter {
        &self.counter
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Chunk a single source unit. An empty unit yields no chunks.
    pub fn chunk_unit(&self, unit: &SourceUnit) -> Vec<Chunk> {
        let mut metadata = Map::new();
        metadata.insert("unit_number".to_string(), Value::from(unit.unit_number));
        metadata.insert(
            "original_char_count".to_string(),
            Value::from(unit.char_count as u64),
        );
        metadata.insert(
            "original_word_count".to_string(),
            Value::from(unit.word_count as u64),
        );
        self.chunk_text(&unit.text, unit.unit_number, &metadata)
    }

    /// Chunk a batch of source units in order.
    pub fn chunk_units(&self, units: &[SourceUnit]) -> Vec<Chunk> {
        units.iter().flat_map(|u| self.chunk_unit(u)).collect()
    }

    fn chunk_text(&self, text: &str, unit_number: u32, metadata: &Map<String, Value>) -> Vec<Chunk> {
        let sentences = split_sentences(text);

        let mut chunks = Vec::new();
        let mut buffer: Vec<String> = Vec::new();
        let mut buffer_tokens = 0usize;
        let mut seq = 0usize;

        for sentence in sentences {
            let sentence_tokens = self.counter.count(&sentence);

            // A sentence that alone exceeds the budget is split by words and
            // emitted as its own non-overlapping sub-sequence.
            if sentence_tokens > self.chunk_size {
                if !buffer.is_empty() {
                    chunks.push(self.make_chunk(&buffer, unit_number, seq, metadata, buffer_tokens));
                    seq += 1;
                    buffer.clear();
                    buffer_tokens = 0;
                }
                let sub_chunks = self.split_long_sentence(&sentence, unit_number, seq, metadata);
                seq += sub_chunks.len();
                chunks.extend(sub_chunks);
                continue;
            }

            if buffer_tokens + sentence_tokens > self.chunk_size {
                chunks.push(self.make_chunk(&buffer, unit_number, seq, metadata, buffer_tokens));
                seq += 1;

                // Seed the next buffer with the trailing overlap, then the
                // sentence that did not fit.
                let mut next = self.overlap_tail(&buffer);
                next.push(sentence);
                buffer_tokens = self.counter.count(&next.join(" "));
                buffer = next;
            } else {
                buffer.push(sentence);
                buffer_tokens += sentence_tokens;
            }
        }

        if !buffer.is_empty() {
            chunks.push(self.make_chunk(&buffer, unit_number, seq, metadata, buffer_tokens));
        }

        chunks
    }

    /// Greedily pack the words of an oversized sentence into sub-chunks.
    ///
    /// A single word whose token count alone exceeds the budget is emitted
    /// verbatim; there is no splitting below word granularity.
    fn split_long_sentence(
        &self,
        sentence: &str,
        unit_number: u32,
        start_seq: usize,
        metadata: &Map<String, Value>,
    ) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut piece: Vec<&str> = Vec::new();
        let mut piece_tokens = 0usize;
        let mut seq = start_seq;

        for word in sentence.split_whitespace() {
            let word_tokens = self.counter.count(&format!("{} ", word));

            if piece_tokens + word_tokens > self.chunk_size {
                if !piece.is_empty() {
                    let text = piece.join(" ");
                    chunks.push(self.make_chunk(
                        std::slice::from_ref(&text),
                        unit_number,
                        seq,
                        metadata,
                        piece_tokens,
                    ));
                    seq += 1;
                }
                piece = vec![word];
                piece_tokens = word_tokens;
            } else {
                piece.push(word);
                piece_tokens += word_tokens;
            }
        }

        if !piece.is_empty() {
            let text = piece.join(" ");
            chunks.push(self.make_chunk(
                std::slice::from_ref(&text),
                unit_number,
                seq,
                metadata,
                piece_tokens,
            ));
        }

        chunks
    }

    /// Maximal suffix of the flushed buffer, in original order, whose token
    /// total fits the overlap budget.
    fn overlap_tail(&self, sentences: &[String]) -> Vec<String> {
        let mut tail: Vec<String> = Vec::new();
        let mut tail_tokens = 0usize;

        for sentence in sentences.iter().rev() {
            let sentence_tokens = self.counter.count(sentence);
            if tail_tokens + sentence_tokens <= self.overlap {
                tail.insert(0, sentence.clone());
                tail_tokens += sentence_tokens;
            } else {
                break;
            }
        }

        tail
    }

    fn make_chunk(
        &self,
        sentences: &[String],
        unit_number: u32,
        seq: usize,
        metadata: &Map<String, Value>,
        token_count: usize,
    ) -> Chunk {
        let text = sentences.join(" ");
        let char_count = text.chars().count();
        let word_count = text.split_whitespace().count();
        Chunk {
            chunk_id: Chunk::compose_id(unit_number, seq),
            text,
            token_count,
            char_count,
            word_count,
            source_unit: unit_number,
            metadata: metadata.clone(),
        }
    }
}
