//! Embedding service trait and the built-in hashing embedder.
//!
//! - `EmbeddingService` is the collaborator seam: any model that turns text
//!   into fixed-length vectors plugs in here.
//! - `HashEmbedding` is a deterministic bag-of-words embedder with no model
//!   files, used by the CLI and tests.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use recall_core::error::RecallError;

/// Service for generating text embeddings.
///
/// Implementations convert text into fixed-dimensional vectors. Used for both
/// ingestion and query embedding. A failure is always returned to the caller;
/// there is no placeholder vector.
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, RecallError>> + Send;

    /// Embed several texts, one vector per text in input order.
    ///
    /// The default embeds sequentially; model-backed services should override
    /// it with a real batched call.
    fn embed_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, RecallError>> + Send {
        async move {
            let mut vectors = Vec::with_capacity(texts.len());
            for text in texts {
                vectors.push(self.embed(text).await?);
            }
            Ok(vectors)
        }
    }

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

type BoxedFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RecallError>> + Send + 'a>>;

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// Because `EmbeddingService::embed` returns `impl Future` it is not
/// object-safe. This trait uses boxed futures instead, allowing
/// `Arc<dyn DynEmbeddingService>` to be stored in structs without generics.
pub trait DynEmbeddingService: Send + Sync {
    fn embed_boxed<'a>(&'a self, text: &'a str) -> BoxedFuture<'a, Vec<f32>>;

    fn embed_batch_boxed<'a>(&'a self, texts: &'a [String]) -> BoxedFuture<'a, Vec<Vec<f32>>>;

    fn dimensions(&self) -> usize;
}

/// Blanket impl: any `EmbeddingService` automatically implements `DynEmbeddingService`.
impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(&'a self, text: &'a str) -> BoxedFuture<'a, Vec<f32>> {
        Box::pin(self.embed(text))
    }

    fn embed_batch_boxed<'a>(&'a self, texts: &'a [String]) -> BoxedFuture<'a, Vec<Vec<f32>>> {
        Box::pin(self.embed_batch(texts))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }
}

// ---------------------------------------------------------------------------
// HashEmbedding - deterministic bag-of-words vectors
// ---------------------------------------------------------------------------

/// Hashes each lowercase alphanumeric word into a few vector slots weighted by
/// its term frequency, then L2-normalizes.
///
/// Texts sharing vocabulary land close together under cosine similarity,
/// which is enough for local use and for tests.
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimension: usize,
}

impl HashEmbedding {
    pub const DEFAULT_DIMENSION: usize = 384;

    /// A zero dimension is bumped to 1.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        if words.is_empty() {
            return vector;
        }

        let mut freq: HashMap<&str, f32> = HashMap::new();
        for word in &words {
            *freq.entry(*word).or_insert(0.0) += 1.0;
        }

        let total = words.len() as f32;
        for (word, count) in &freq {
            let tf = count / total;
            for (salt, weight) in [(0u8, 1.0f32), (1, 0.7), (2, 0.5)] {
                let slot = fnv1a(word.as_bytes(), salt) as usize % self.dimension;
                vector[slot] += tf * weight;
            }
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut vector {
                *val /= norm;
            }
        }
        vector
    }
}

impl Default for HashEmbedding {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSION)
    }
}

impl EmbeddingService for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RecallError> {
        if text.trim().is_empty() {
            return Err(RecallError::Embedding("Cannot embed empty text".to_string()));
        }
        Ok(self.hash_to_vector(text))
    }

    fn dimensions(&self) -> usize {
        self.dimension
    }
}

/// FNV-1a over `data` followed by one salt byte.
fn fnv1a(data: &[u8], salt: u8) -> u32 {
    let mut hash: u32 = 2_166_136_261;
    for &byte in data.iter().chain(std::iter::once(&salt)) {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}
