//! Recall ingestion pipeline.
//!
//! Turns upstream `(text, metadata)` chunks into embedded documents and
//! appends them to the store in one all-or-nothing batch.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use recall_core::error::RecallError;
use recall_core::types::{EmbeddedDocument, Metadata};

use crate::embedding::EmbeddingService;
use crate::store::DocumentStore;

/// A chunk of text handed over by an upstream loader or chunker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Chunk {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Outcome of one [`IngestPipeline::ingest`] call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Documents appended to the store.
    pub stored: usize,
    /// Chunks dropped because their text was blank.
    pub skipped: usize,
}

/// Embeds chunks in batches and appends them to a shared store.
///
/// Embedder failures abort the whole call before anything is appended.
pub struct IngestPipeline<E: EmbeddingService> {
    store: Arc<DocumentStore>,
    embedder: E,
    batch_size: usize,
}

impl<E: EmbeddingService> IngestPipeline<E> {
    /// A `batch_size` of 0 is treated as 1.
    pub fn new(store: Arc<DocumentStore>, embedder: E, batch_size: usize) -> Self {
        Self {
            store,
            embedder,
            batch_size: batch_size.max(1),
        }
    }

    /// Create a new pipeline with the default batch size of 32.
    pub fn with_defaults(store: Arc<DocumentStore>, embedder: E) -> Self {
        Self::new(store, embedder, 32)
    }

    pub async fn ingest(&self, chunks: Vec<Chunk>) -> Result<IngestReport, RecallError> {
        let total = chunks.len();
        let chunks: Vec<Chunk> = chunks
            .into_iter()
            .filter(|c| !c.text.trim().is_empty())
            .collect();
        let skipped = total - chunks.len();
        if skipped > 0 {
            debug!(skipped, "Skipping chunks with empty text");
        }
        if chunks.is_empty() {
            return Ok(IngestReport { stored: 0, skipped });
        }

        let mut documents = Vec::with_capacity(chunks.len());
        for (batch_no, batch) in chunks.chunks(self.batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(RecallError::Embedding(format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }
            debug!(batch = batch_no, size = batch.len(), "Embedded batch");
            documents.extend(batch.iter().zip(vectors).map(|(chunk, embedding)| {
                EmbeddedDocument {
                    text: chunk.text.clone(),
                    embedding,
                    metadata: chunk.metadata.clone(),
                }
            }));
        }

        let stored = documents.len();
        self.store.append(documents)?;
        info!(stored, skipped, "Ingestion complete");
        Ok(IngestReport { stored, skipped })
    }

    /// Get a reference to the underlying store.
    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}
