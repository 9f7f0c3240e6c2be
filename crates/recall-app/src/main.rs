//! Recall application binary - composition root.
//!
//! Ties the Recall crates into a single executable:
//! 1. Load configuration from TOML
//! 2. Open the document store from its snapshot (or start empty)
//! 3. Run one command: `ingest`, `search`, or `stats`
//!
//! Results go to stdout as JSON; logs go to stderr.

mod cli;

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use serde_json::json;

use recall_core::config::RecallConfig;
use recall_core::error::RecallError;
use recall_core::types::RetrievalRequest;
use recall_vector::embedding::HashEmbedding;
use recall_vector::pipeline::{Chunk, IngestPipeline};
use recall_vector::retriever::Retriever;
use recall_vector::store::DocumentStore;

use cli::{CliArgs, Command};

/// Open the store from `path`, or create an empty one shaped by the config.
fn open_store(config: &RecallConfig, path: &Path) -> Result<DocumentStore, RecallError> {
    if path.exists() {
        let store = DocumentStore::snapshot_load(path)?;
        if store.metric() != config.store.metric {
            tracing::warn!(
                snapshot = %store.metric(),
                configured = %config.store.metric,
                "Snapshot metric differs from configuration, using snapshot metric"
            );
        }
        tracing::info!(path = %path.display(), documents = store.size(), "Store loaded");
        return Ok(store);
    }

    tracing::info!(path = %path.display(), "No snapshot found, starting with an empty store");
    Ok(match config.store.dimension {
        Some(dim) => DocumentStore::with_dimension(config.store.metric, dim),
        None => DocumentStore::new(config.store.metric),
    })
}

/// Read one chunk per non-blank line of a JSONL file.
fn read_chunks(path: &Path) -> Result<Vec<Chunk>, RecallError> {
    let file = std::fs::File::open(path)?;
    let mut chunks = Vec::new();
    for (lineno, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let chunk: Chunk = serde_json::from_str(&line).map_err(|e| {
            RecallError::Serialization(format!("{}:{}: {}", path.display(), lineno + 1, e))
        })?;
        chunks.push(chunk);
    }
    Ok(chunks)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config. Read before tracing so the configured level applies.
    let config_file = args.resolve_config_path();
    let loaded = if config_file.exists() {
        Some(RecallConfig::load(&config_file))
    } else {
        None
    };
    let config_level = match &loaded {
        Some(Ok(config)) => config.general.log_level.clone(),
        _ => "info".to_string(),
    };

    // Tracing. RUST_LOG wins over --log-level, which wins over the config file.
    let level = args.resolve_log_level(&config_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match loaded {
        Some(Ok(config)) => {
            tracing::info!(path = %config_file.display(), "Configuration loaded");
            config
        }
        Some(Err(e)) => return Err(e.into()),
        None => {
            tracing::debug!(path = %config_file.display(), "No config file, using defaults");
            RecallConfig::default()
        }
    };

    let snapshot = config.snapshot_path();
    let store = Arc::new(open_store(&config, &snapshot)?);

    match args.command {
        Command::Ingest { file } => {
            let chunks = read_chunks(&file)?;
            tracing::info!(file = %file.display(), chunks = chunks.len(), "Ingesting");

            let pipeline = IngestPipeline::new(
                Arc::clone(&store),
                HashEmbedding::new(config.ingest.embedding_dim),
                config.ingest.batch_size,
            );
            let report = pipeline.ingest(chunks).await?;
            store.snapshot_save(&snapshot)?;

            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "stored": report.stored,
                    "skipped": report.skipped,
                    "documents": store.size(),
                    "snapshot": snapshot.display().to_string(),
                }))?
            );
        }
        Command::Search {
            query,
            top_k,
            threshold,
            weight,
            no_hybrid,
            filter,
            no_metadata,
        } => {
            // The CLI has no reranker collaborator; disable the stage up front
            // instead of warning on every call.
            let retriever = Retriever::new(
                Arc::clone(&store),
                HashEmbedding::new(config.ingest.embedding_dim),
                config.retrieval.clone(),
            );

            let mut request = RetrievalRequest::new(query)
                .reranking(false)
                .include_metadata(!no_metadata);
            if let Some(k) = top_k {
                request = request.top_k(k);
            }
            if let Some(t) = threshold {
                request = request.similarity_threshold(t);
            }
            if let Some(w) = weight {
                request = request.hybrid_weight(w);
            }
            if no_hybrid {
                request = request.hybrid(false);
            }
            if let Some(f) = cli::build_filter(&filter) {
                request = request.filter(f);
            }

            let response = retriever.retrieve(&request).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Stats => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "documents": store.size(),
                    "dimension": store.dimension(),
                    "metric": store.metric(),
                    "snapshot": snapshot.display().to_string(),
                }))?
            );
        }
    }

    Ok(())
}
