//! Retrieval orchestration.
//!
//! One call runs: parameter resolution, pool sizing, query embedding,
//! semantic search, optional lexical fusion, threshold filter, optional
//! reranking, result emission. The store read lock is held only for the
//! synchronous stages and released before the reranker is awaited.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use recall_core::config::RetrievalConfig;
use recall_core::error::RecallError;
use recall_core::types::{
    IdentityKey, Metadata, RetrievalRequest, RetrievalResponse, RetrievedDocument, ScoredCandidate,
};

use crate::embedding::{DynEmbeddingService, EmbeddingService};
use crate::fusion::FusionPolicy;
use crate::index::search_contents;
use crate::lexical::LexicalScorer;
use crate::rerank::{DynRerankService, RerankService, RerankerAdapter};
use crate::store::{DocumentStore, StoreContents, StoreError};

/// Pool multiplier applied to `top_k` when reranking will run.
const RERANK_POOL_FACTOR: usize = 3;

/// Optional collaborators available to this retriever, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub hybrid: bool,
    pub reranking: bool,
}

/// Request parameters merged with configured defaults and capabilities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedParams {
    pub top_k: usize,
    pub similarity_threshold: f64,
    /// Hybrid requested and a lexical scorer is available.
    pub hybrid: bool,
    pub hybrid_weight: f64,
    /// Reranking requested and a reranker is available.
    pub reranking: bool,
    /// Number of candidates requested from the first-pass stages.
    pub pool_size: usize,
}

/// Hybrid retriever over a shared [`DocumentStore`].
///
/// Uses dynamic dispatch for the embedder and reranker so callers can plug in
/// any model while tests use `HashEmbedding` and scripted rerankers.
pub struct Retriever {
    store: Arc<DocumentStore>,
    embedder: Box<dyn DynEmbeddingService>,
    lexical: Option<LexicalScorer>,
    reranker: Option<RerankerAdapter>,
    defaults: RetrievalConfig,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("capabilities", &self.capabilities())
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl Retriever {
    /// Create a retriever with the built-in English lexical scorer and no
    /// reranker.
    pub fn new(
        store: Arc<DocumentStore>,
        embedder: impl EmbeddingService + 'static,
        defaults: RetrievalConfig,
    ) -> Self {
        Self::new_dyn(store, Box::new(embedder), defaults)
    }

    /// Create a retriever from a pre-boxed dynamic embedding service.
    pub fn new_dyn(
        store: Arc<DocumentStore>,
        embedder: Box<dyn DynEmbeddingService>,
        defaults: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            lexical: Some(LexicalScorer::english()),
            reranker: None,
            defaults,
        }
    }

    /// Replace the lexical scorer. `None` disables hybrid fusion.
    pub fn with_lexical(mut self, lexical: Option<LexicalScorer>) -> Self {
        self.lexical = lexical;
        self
    }

    /// Attach a reranker, bounded by `defaults.rerank_timeout_ms`.
    pub fn with_reranker(self, reranker: impl RerankService + 'static) -> Self {
        self.with_dyn_reranker(Arc::new(reranker))
    }

    pub fn with_dyn_reranker(mut self, reranker: Arc<dyn DynRerankService>) -> Self {
        let timeout = Duration::from_millis(self.defaults.rerank_timeout_ms);
        self.reranker = Some(RerankerAdapter::new(reranker, timeout));
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            hybrid: self.lexical.is_some(),
            reranking: self.reranker.is_some(),
        }
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    pub fn defaults(&self) -> &RetrievalConfig {
        &self.defaults
    }

    /// Merge request overrides with defaults and validate the result.
    ///
    /// Asking for hybrid or reranking without the matching collaborator is
    /// not an error; that stage is skipped with a warning.
    pub fn resolve(&self, request: &RetrievalRequest) -> Result<ResolvedParams, RecallError> {
        let top_k = request.top_k.unwrap_or(self.defaults.top_k);
        let similarity_threshold = request
            .similarity_threshold
            .unwrap_or(self.defaults.similarity_threshold);
        let hybrid_weight = request.hybrid_weight.unwrap_or(self.defaults.hybrid_weight);
        let hybrid_requested = request.hybrid_enabled.unwrap_or(self.defaults.hybrid_enabled);
        let rerank_requested = request
            .reranking_enabled
            .unwrap_or(self.defaults.reranking_enabled);

        if top_k == 0 {
            return Err(RecallError::Config("top_k must be at least 1".into()));
        }
        if !similarity_threshold.is_finite() {
            return Err(RecallError::Config(format!(
                "similarity_threshold must be finite, got {}",
                similarity_threshold
            )));
        }
        if !(0.0..=1.0).contains(&hybrid_weight) {
            return Err(RecallError::Config(format!(
                "hybrid_weight must be within [0, 1], got {}",
                hybrid_weight
            )));
        }

        let caps = self.capabilities();
        if hybrid_requested && !caps.hybrid {
            warn!("Hybrid search requested but no lexical scorer is available; using semantic only");
        }
        if rerank_requested && !caps.reranking {
            warn!("Reranking requested but no reranker is available; skipping rerank stage");
        }
        let hybrid = hybrid_requested && caps.hybrid;
        let reranking = rerank_requested && caps.reranking;
        let pool_size = if reranking {
            top_k.saturating_mul(RERANK_POOL_FACTOR)
        } else {
            top_k
        };

        Ok(ResolvedParams {
            top_k,
            similarity_threshold,
            hybrid,
            hybrid_weight,
            reranking,
            pool_size,
        })
    }

    /// Run one retrieval call.
    ///
    /// Returns a (possibly empty) ranked list, or an error naming the stage
    /// that failed. Reranker problems never fail the call; they appear in
    /// `RetrievalResponse::warnings` instead.
    pub async fn retrieve(&self, request: &RetrievalRequest) -> Result<RetrievalResponse, RecallError> {
        let started = Instant::now();
        let params = self.resolve(request)?;
        debug!(?params, "Resolved retrieval parameters");

        let query_vec = self
            .embedder
            .embed_boxed(&request.query)
            .await
            .map_err(|e| match e {
                RecallError::Embedding(_) => e,
                other => RecallError::Embedding(other.to_string()),
            })?;

        let FirstPass { candidates, docs } = {
            let contents = self.store.read()?;
            self.first_pass(&contents, request, &query_vec, &params)?
        };

        let mut warnings = Vec::new();
        let candidates = match (&self.reranker, params.reranking) {
            (Some(adapter), true) if !candidates.is_empty() => {
                let texts: Vec<String> = candidates
                    .iter()
                    .map(|c| docs.get(&c.index).map(|(t, _)| t.clone()).unwrap_or_default())
                    .collect();
                let reranked = adapter
                    .rerank(&request.query, candidates, &texts, params.top_k)
                    .await;
                warnings.extend(reranked.warning);
                reranked.candidates
            }
            _ => {
                let mut candidates = candidates;
                candidates.truncate(params.top_k);
                candidates
            }
        };

        let mut docs = docs;
        let results: Vec<RetrievedDocument> = candidates
            .into_iter()
            .enumerate()
            .map(|(position, candidate)| {
                let (text, metadata) = docs.remove(&candidate.index).unwrap_or_default();
                RetrievedDocument {
                    rank: position + 1,
                    text,
                    metadata: request.include_metadata.then_some(metadata),
                    scores: candidate.scores(),
                }
            })
            .collect();

        info!(
            results = results.len(),
            hybrid = params.hybrid,
            reranking = params.reranking,
            warnings = warnings.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Retrieval complete"
        );
        Ok(RetrievalResponse { results, warnings })
    }

    /// Synchronous stages under the store read lock: semantic search,
    /// lexical fusion, threshold. Copies out the text and metadata of the
    /// survivors so the lock can be released.
    fn first_pass(
        &self,
        contents: &StoreContents,
        request: &RetrievalRequest,
        query_vec: &[f32],
        params: &ResolvedParams,
    ) -> Result<FirstPass, RecallError> {
        let filter = request.filter.as_ref();
        let semantic = search_contents(
            contents,
            query_vec,
            params.pool_size,
            self.store.metric(),
            filter,
        )
        .map_err(|e| match e {
            StoreError::LockPoisoned(_) => RecallError::from(e),
            other => RecallError::Search(other.to_string()),
        })?;
        debug!(semantic = semantic.len(), "Semantic stage complete");

        let mut candidates = match (&self.lexical, params.hybrid) {
            (Some(lexical), true) => {
                match lexical.rank_candidates(&request.query, contents, &semantic) {
                    Ok(hits) => {
                        let policy = FusionPolicy::new(params.hybrid_weight);
                        policy.fuse(|i| identity_key(contents, i), &semantic, &hits)
                    }
                    Err(e) => {
                        warn!("Lexical scoring failed, falling back to semantic only: {}", e);
                        semantic
                    }
                }
            }
            _ => semantic,
        };

        if params.similarity_threshold > 0.0 {
            let before = candidates.len();
            candidates.retain(|c| c.first_pass_score() >= params.similarity_threshold);
            debug!(
                before,
                after = candidates.len(),
                threshold = params.similarity_threshold,
                "Applied similarity threshold"
            );
        }

        let docs = candidates
            .iter()
            .filter_map(|c| {
                contents
                    .document(c.index)
                    .map(|d| (c.index, (d.text.clone(), d.metadata.clone())))
            })
            .collect();
        Ok(FirstPass { candidates, docs })
    }
}

/// First-pass survivors plus the text and metadata they need downstream.
struct FirstPass {
    candidates: Vec<ScoredCandidate>,
    docs: HashMap<usize, (String, Metadata)>,
}

fn identity_key(contents: &StoreContents, index: usize) -> IdentityKey {
    contents
        .document(index)
        .map(|d| d.identity_key(index))
        .unwrap_or_else(|| IdentityKey(format!("#{}", index)))
}
