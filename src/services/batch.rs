//! Resumable batch embedding orchestration.

use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

use crate::error::{EmbeddingError, PipelineError};
use crate::models::{Chunk, EmbeddingRecord};
use crate::services::checkpoint::{CheckpointState, CheckpointStore};
use crate::services::embedding::{EmbeddingProvider, ProviderUsage};

/// Outcome of one embedding run.
#[derive(Debug, Clone)]
pub struct EmbeddingRunReport {
    /// New records, preserving the relative order of the input chunks
    /// restricted to the pending subset.
    pub embeddings: Vec<EmbeddingRecord>,
    pub total_chunks: usize,
    pub embedded: usize,
    /// Chunks skipped because the checkpoint already covered them.
    pub skipped: usize,
    pub usage: ProviderUsage,
    pub elapsed: Duration,
}

/// Drives chunks through the embedding provider in fixed-size groups,
/// checkpointing completed groups so an interrupted run resumes without
/// re-embedding or losing work.
///
/// The unit of atomicity is one group: a failure mid-group loses only that
/// group's progress, and the checkpoint is persisted before any error is
/// propagated.
pub struct BatchEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    checkpoint: CheckpointStore,
    group_size: usize,
    checkpoint_interval: usize,
    show_progress: bool,
}

impl BatchEmbedder {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        checkpoint: CheckpointStore,
        group_size: usize,
        checkpoint_interval: usize,
    ) -> Self {
        Self {
            provider,
            checkpoint,
            group_size: group_size.max(1),
            checkpoint_interval: checkpoint_interval.max(1),
            show_progress: false,
        }
    }

    /// Show an interactive progress bar over embedding groups.
    #[must_use]
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn checkpoint_store(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    /// Embed every chunk not yet covered by the checkpoint.
    ///
    /// With `resume` false the run starts from an empty processed set. An
    /// empty pending subset is a success path: no provider calls are made.
    pub async fn run(
        &self,
        all_chunks: &[Chunk],
        resume: bool,
    ) -> Result<EmbeddingRunReport, PipelineError> {
        let start = Instant::now();

        let mut state = if resume {
            self.checkpoint.load()?
        } else {
            CheckpointState::default()
        };

        let pending: Vec<&Chunk> = all_chunks
            .iter()
            .filter(|c| !state.is_processed(&c.chunk_id))
            .collect();
        let skipped = all_chunks.len() - pending.len();

        if pending.is_empty() {
            return Ok(EmbeddingRunReport {
                embeddings: Vec::new(),
                total_chunks: all_chunks.len(),
                embedded: 0,
                skipped,
                usage: ProviderUsage::default(),
                elapsed: start.elapsed(),
            });
        }

        let group_count = pending.len().div_ceil(self.group_size);
        let pb = self.progress_bar(group_count as u64);

        let mut embeddings: Vec<EmbeddingRecord> = Vec::with_capacity(pending.len());
        let mut usage = ProviderUsage::default();

        for (group_idx, group) in pending.chunks(self.group_size).enumerate() {
            let texts: Vec<String> = group.iter().map(|c| c.text.clone()).collect();

            let batch = match self.provider.embed_many(&texts).await {
                Ok(batch) => batch,
                Err(err) => {
                    // Persist everything completed before this group, then
                    // propagate. No partial group result is kept.
                    state.last_batch = group_idx as u64;
                    state.touch();
                    self.checkpoint.save(&state)?;
                    pb.abandon();
                    return Err(err.into());
                }
            };

            if batch.vectors.len() != group.len() {
                state.last_batch = group_idx as u64;
                state.touch();
                self.checkpoint.save(&state)?;
                pb.abandon();
                return Err(EmbeddingError::InvalidResponse(format!(
                    "expected {} vectors for group {}, got {}",
                    group.len(),
                    group_idx,
                    batch.vectors.len()
                ))
                .into());
            }

            usage += batch.usage;

            for (chunk, vector) in group.iter().zip(batch.vectors) {
                embeddings.push(EmbeddingRecord {
                    chunk_id: chunk.chunk_id.clone(),
                    vector,
                    source_unit: chunk.source_unit,
                    token_count: chunk.token_count,
                });
            }

            state.mark_processed(group.iter().map(|c| c.chunk_id.clone()));
            state.last_batch = (group_idx + 1) as u64;

            if (group_idx + 1) % self.checkpoint_interval == 0 {
                state.touch();
                self.checkpoint.save(&state)?;
            }

            pb.inc(1);
        }

        state.touch();
        self.checkpoint.save(&state)?;
        pb.finish_and_clear();

        Ok(EmbeddingRunReport {
            embedded: embeddings.len(),
            embeddings,
            total_chunks: all_chunks.len(),
            skipped,
            usage,
            elapsed: start.elapsed(),
        })
    }

    fn progress_bar(&self, groups: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(groups);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} groups ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::embedding::EmbedBatch;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    struct CountingProvider {
        calls: AtomicU32,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed_many(&self, texts: &[String]) -> Result<EmbedBatch, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(EmbedBatch {
                vectors: texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect(),
                usage: ProviderUsage {
                    total_tokens: texts.len() as u64 * 5,
                    total_cost_usd: 0.0,
                },
            })
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn chunks(n: usize) -> Vec<Chunk> {
        (0..n)
            .map(|i| Chunk {
                chunk_id: Chunk::compose_id(1, i),
                text: format!("chunk text {}", i),
                token_count: 5,
                char_count: 12,
                word_count: 3,
                source_unit: 1,
                metadata: serde_json::Map::new(),
            })
            .collect()
    }

    fn embedder(dir: &std::path::Path, group_size: usize) -> BatchEmbedder {
        BatchEmbedder::new(
            Arc::new(CountingProvider {
                calls: AtomicU32::new(0),
            }),
            CheckpointStore::new(dir.join("progress.json")),
            group_size,
            10,
        )
    }

    #[tokio::test]
    async fn test_preserves_chunk_order() {
        let dir = tempdir().unwrap();
        let embedder = embedder(dir.path(), 4);
        let all = chunks(10);

        let report = embedder.run(&all, false).await.unwrap();

        assert_eq!(report.embedded, 10);
        let ids: Vec<&str> = report
            .embeddings
            .iter()
            .map(|r| r.chunk_id.as_str())
            .collect();
        let expected: Vec<String> = all.iter().map(|c| c.chunk_id.clone()).collect();
        assert_eq!(ids, expected.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_groups_sent_in_fixed_sizes() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
        });
        let embedder = BatchEmbedder::new(
            provider.clone(),
            CheckpointStore::new(dir.path().join("progress.json")),
            4,
            10,
        );

        embedder.run(&chunks(10), false).await.unwrap();

        // 10 chunks in groups of 4 -> 3 provider calls
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_usage_accumulated_across_groups() {
        let dir = tempdir().unwrap();
        let embedder = embedder(dir.path(), 4);

        let report = embedder.run(&chunks(10), false).await.unwrap();

        assert_eq!(report.usage.total_tokens, 50);
        assert_eq!(report.total_chunks, 10);
        assert_eq!(report.skipped, 0);
    }
}
