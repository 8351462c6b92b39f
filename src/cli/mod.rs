//! Command-line surface. Thin glue over the library: argument parsing,
//! component wiring, and result formatting live here, not pipeline logic.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;

use crate::models::{Config, SourceUnit};
use crate::services::{
    BatchEmbedder, CheckpointStore, ChunkStore, IndexingPipeline, OpenAiEmbeddingClient,
    QdrantStore, Retriever, SearchFilter, SentenceChunker, SqliteChunkStore,
};

/// Resumable document chunking and embedding indexer.
#[derive(Debug, Parser)]
#[command(name = "docdex")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(long, short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Chunk a plain-text file into the chunk store
    Ingest {
        /// UTF-8 text file; blank lines separate source units
        #[arg(required = true)]
        path: PathBuf,
    },

    /// Embed pending chunks and upload them to the vector index
    Index {
        /// Start from scratch instead of resuming from the checkpoint
        #[arg(long)]
        no_resume: bool,

        /// Drop and recreate the vector collection first
        #[arg(long)]
        recreate: bool,
    },

    /// Search indexed chunks
    Search {
        #[arg(required = true)]
        query: String,

        #[arg(long, short = 'l')]
        limit: Option<u64>,

        #[arg(long)]
        min_score: Option<f32>,

        /// Restrict results to one source unit
        #[arg(long)]
        unit: Option<u32>,
    },

    /// Show database and collection statistics
    Status,

    /// Discard the embedding checkpoint
    Reset,

    /// Inspect or initialize the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the resolved configuration
    Show,

    /// Write the default configuration file
    Init,
}

pub async fn run_command(command: Commands, verbose: bool) -> Result<()> {
    let config = Config::load()?;
    match command {
        Commands::Ingest { path } => handle_ingest(&config, path, verbose).await,
        Commands::Index { no_resume, recreate } => {
            handle_index(&config, !no_resume, recreate, verbose).await
        }
        Commands::Search {
            query,
            limit,
            min_score,
            unit,
        } => handle_search(&config, query, limit, min_score, unit).await,
        Commands::Status => handle_status(&config).await,
        Commands::Reset => handle_reset(&config),
        Commands::Config { action } => handle_config(&config, action),
    }
}

fn open_store(config: &Config) -> Result<Arc<SqliteChunkStore>> {
    let store = SqliteChunkStore::open(&config.storage.database_path)
        .context("failed to open chunk database")?;
    Ok(Arc::new(store))
}

async fn handle_ingest(config: &Config, path: PathBuf, verbose: bool) -> Result<()> {
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let units: Vec<SourceUnit> = text
        .split("\n\n")
        .filter(|p| !p.trim().is_empty())
        .enumerate()
        .map(|(i, paragraph)| SourceUnit::new(i as u32 + 1, paragraph.trim()))
        .collect();

    if units.is_empty() {
        println!("Nothing to ingest: {} is empty", path.display());
        return Ok(());
    }

    let chunker = SentenceChunker::new(&config.chunking)?;
    let chunks = chunker.chunk_units(&units);

    let store = open_store(config)?;
    let stored = store.store_chunks(&chunks)?;

    println!(
        "{} {} units -> {} chunks stored",
        style("Ingested").green().bold(),
        units.len(),
        stored
    );
    if verbose {
        let total_tokens: usize = chunks.iter().map(|c| c.token_count).sum();
        println!("  total tokens: {}", total_tokens);
    }
    Ok(())
}

async fn handle_index(config: &Config, resume: bool, recreate: bool, verbose: bool) -> Result<()> {
    let store = open_store(config)?;

    let provider = Arc::new(OpenAiEmbeddingClient::new(&config.embedding)?);

    let vectors = QdrantStore::new(&config.vector_store, u64::from(config.embedding.dimension))?;
    vectors.create_collection(recreate).await?;
    let vectors = Arc::new(vectors);

    let embedder = BatchEmbedder::new(
        provider,
        CheckpointStore::new(config.checkpoint.progress_path()),
        config.embedding.batch_size as usize,
        config.checkpoint.interval,
    )
    .with_progress(true);

    let pipeline = IndexingPipeline::new(store, embedder, vectors);
    let report = pipeline.run(resume).await?;

    println!(
        "{} {} new embeddings, {} skipped, {} uploaded",
        style("Indexed").green().bold(),
        report.embedding.embedded,
        report.embedding.skipped,
        report.uploaded
    );
    println!(
        "  tokens: {}  est. cost: ${:.4}  elapsed: {:.2}s",
        report.embedding.usage.total_tokens,
        report.embedding.usage.total_cost_usd,
        report.embedding.elapsed.as_secs_f64()
    );
    if let Some(collection) = report.collection {
        println!(
            "  collection `{}`: {} vectors ({})",
            collection.name, collection.points_count, collection.status
        );
    }
    if verbose {
        println!(
            "  database: {} chunks over {} units",
            report.storage.total_chunks, report.storage.total_units
        );
    }
    Ok(())
}

async fn handle_search(
    config: &Config,
    query: String,
    limit: Option<u64>,
    min_score: Option<f32>,
    unit: Option<u32>,
) -> Result<()> {
    let store = open_store(config)?;
    let provider = Arc::new(OpenAiEmbeddingClient::new(&config.embedding)?);
    let vectors = Arc::new(QdrantStore::new(
        &config.vector_store,
        u64::from(config.embedding.dimension),
    )?);

    let retriever = Retriever::new(provider, vectors, store);

    let filter = unit.map(|u| SearchFilter {
        source_unit: Some(u),
        ..Default::default()
    });

    let results = retriever
        .search(
            &query,
            limit.unwrap_or(config.search.default_limit),
            min_score.or(config.search.min_score),
            filter,
        )
        .await?;

    if results.results.is_empty() {
        println!("No results for: {}", results.query);
        return Ok(());
    }

    println!(
        "Found {} results in {}ms\n",
        results.results.len(),
        results.elapsed.as_millis()
    );
    for (i, retrieved) in results.results.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} (unit {})",
            i + 1,
            retrieved.score,
            style(&retrieved.chunk.chunk_id).cyan(),
            retrieved.chunk.source_unit
        );
        let preview: String = retrieved.chunk.text.chars().take(200).collect();
        println!("   {}\n", preview);
    }
    Ok(())
}

async fn handle_status(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let stats = store.statistics()?;

    println!("{}", style("Database").bold());
    println!("  chunks: {}", stats.total_chunks);
    println!("  units: {}", stats.total_units);
    println!("  tokens: {}", stats.total_tokens);
    println!("  avg tokens/chunk: {:.1}", stats.avg_tokens_per_chunk);

    let vectors = QdrantStore::new(&config.vector_store, u64::from(config.embedding.dimension))?;
    println!("{}", style("Vector store").bold());
    match vectors.collection_info().await {
        Ok(Some(collection)) => {
            println!(
                "  `{}`: {} vectors ({})",
                collection.name, collection.points_count, collection.status
            );
        }
        Ok(None) => println!("  collection not created yet"),
        Err(e) => println!("  unreachable: {}", e),
    }

    let checkpoint = CheckpointStore::new(config.checkpoint.progress_path());
    let state = checkpoint.load()?;
    println!("{}", style("Checkpoint").bold());
    println!("  processed chunks: {}", state.processed_count());
    println!("  last batch: {}", state.last_batch);
    Ok(())
}

fn handle_reset(config: &Config) -> Result<()> {
    let checkpoint = CheckpointStore::new(config.checkpoint.progress_path());
    checkpoint.reset()?;
    println!(
        "{} checkpoint at {}",
        style("Discarded").yellow().bold(),
        checkpoint.path().display()
    );
    Ok(())
}

fn handle_config(config: &Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let rendered = toml::to_string_pretty(config).context("failed to render config")?;
            if let Some(path) = Config::config_path() {
                println!("# {}", path.display());
            }
            print!("{}", rendered);
        }
        ConfigAction::Init => {
            config.save().context("failed to write config file")?;
            if let Some(path) = Config::config_path() {
                println!(
                    "{} configuration at {}",
                    style("Wrote").green().bold(),
                    path.display()
                );
            }
        }
    }
    Ok(())
}
