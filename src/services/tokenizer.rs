//! Token counting over fixed BPE vocabularies.

use std::sync::Arc;

use tiktoken_rs::{CoreBPE, cl100k_base, get_bpe_from_model};

use crate::error::ConfigError;

/// Counts tokens with a vocabulary that is fixed for the lifetime of a
/// chunking configuration.
///
/// Counts for identical text are deterministic and reproducible, which keeps
/// chunk boundaries (and therefore chunk ids) stable across runs.
#[derive(Clone)]
pub struct TokenCounter {
    bpe: Arc<CoreBPE>,
    encoding_name: String,
}

impl TokenCounter {
    /// Resolve the vocabulary for a model name, falling back to `cl100k_base`
    /// when the model has no known encoding.
    pub fn for_model(model: &str) -> Result<Self, ConfigError> {
        match get_bpe_from_model(model) {
            Ok(bpe) => Ok(Self {
                bpe: Arc::new(bpe),
                encoding_name: model.to_string(),
            }),
            Err(_) => Self::cl100k(),
        }
    }

    /// The default `cl100k_base` vocabulary.
    pub fn cl100k() -> Result<Self, ConfigError> {
        let bpe = cl100k_base().map_err(|e| ConfigError::TokenizerError(e.to_string()))?;
        Ok(Self {
            bpe: Arc::new(bpe),
            encoding_name: "cl100k_base".to_string(),
        })
    }

    /// Number of tokens in `text`.
    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    /// Name of the model or encoding backing this counter.
    pub fn encoding_name(&self) -> &str {
        &self.encoding_name
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("encoding_name", &self.encoding_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_is_deterministic() {
        let counter = TokenCounter::cl100k().unwrap();
        let text = "Machine learning is a subset of artificial intelligence.";
        assert_eq!(counter.count(text), counter.count(text));
        assert!(counter.count(text) > 0);
    }

    #[test]
    fn test_empty_text_counts_zero() {
        let counter = TokenCounter::cl100k().unwrap();
        assert_eq!(counter.count(""), 0);
    }

    #[test]
    fn test_unknown_model_falls_back() {
        let counter = TokenCounter::for_model("no-such-model-xyz").unwrap();
        assert_eq!(counter.encoding_name(), "cl100k_base");
        assert!(counter.count("hello world") > 0);
    }
}
