//! Second-pass reranking through an external relevance model.
//!
//! The adapter makes exactly one batched call per retrieval. Any failure of
//! that call (error, timeout, wrong number of scores) degrades to the
//! pre-rerank order and is reported as a [`RetrievalWarning`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use recall_core::error::RecallError;
use recall_core::types::{RetrievalWarning, ScoredCandidate};

/// Relevance model scoring candidate texts against a query.
pub trait RerankService: Send + Sync {
    /// Return one score per text, aligned positionally with `texts`.
    fn score_batch(
        &self,
        query: &str,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<f64>, RecallError>> + Send;
}

/// Object-safe version of [`RerankService`] for dynamic dispatch.
///
/// A blanket implementation is provided so that every `RerankService`
/// automatically implements `DynRerankService`.
pub trait DynRerankService: Send + Sync {
    fn score_batch_boxed<'a>(
        &'a self,
        query: &'a str,
        texts: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f64>, RecallError>> + Send + 'a>>;
}

impl<T: RerankService> DynRerankService for T {
    fn score_batch_boxed<'a>(
        &'a self,
        query: &'a str,
        texts: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f64>, RecallError>> + Send + 'a>> {
        Box::pin(self.score_batch(query, texts))
    }
}

/// Output of [`RerankerAdapter::rerank`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reranked {
    pub candidates: Vec<ScoredCandidate>,
    /// Set when the reranker could not be used and the input order was kept.
    pub warning: Option<RetrievalWarning>,
}

/// Wraps a [`DynRerankService`] with a timeout and degrade-on-failure policy.
#[derive(Clone)]
pub struct RerankerAdapter {
    service: Arc<dyn DynRerankService>,
    timeout: Duration,
}

impl std::fmt::Debug for RerankerAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RerankerAdapter")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RerankerAdapter {
    pub fn new(service: Arc<dyn DynRerankService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Reorder `candidates` by descending rerank score and keep the first `k`.
    ///
    /// `texts[i]` is the document text of `candidates[i]`. Equal rerank
    /// scores keep their pre-rerank relative order. Never fails: on any
    /// reranker problem the input is returned truncated to `k` with a warning.
    pub async fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<ScoredCandidate>,
        texts: &[String],
        k: usize,
    ) -> Reranked {
        if candidates.is_empty() {
            return Reranked {
                candidates,
                warning: None,
            };
        }

        let call = self.service.score_batch_boxed(query, texts);
        let outcome = match tokio::time::timeout(self.timeout, call).await {
            Err(_) => Err(RetrievalWarning::RerankTimedOut {
                timeout_ms: self.timeout.as_millis() as u64,
            }),
            Ok(Err(e)) => Err(RetrievalWarning::RerankFailed {
                reason: e.to_string(),
            }),
            Ok(Ok(scores)) if scores.len() != candidates.len() => {
                Err(RetrievalWarning::RerankFailed {
                    reason: format!(
                        "reranker returned {} scores for {} candidates",
                        scores.len(),
                        candidates.len()
                    ),
                })
            }
            Ok(Ok(scores)) => Ok(scores),
        };

        match outcome {
            Ok(scores) => {
                for (candidate, score) in candidates.iter_mut().zip(scores) {
                    candidate.rerank_score = Some(score);
                }
                // Stable: equal rerank scores keep pre-rerank order.
                candidates.sort_by(|a, b| {
                    let a = a.rerank_score.unwrap_or(f64::NEG_INFINITY);
                    let b = b.rerank_score.unwrap_or(f64::NEG_INFINITY);
                    b.total_cmp(&a)
                });
                candidates.truncate(k);
                debug!(returned = candidates.len(), "Reranked candidates");
                Reranked {
                    candidates,
                    warning: None,
                }
            }
            Err(warning) => {
                warn!("Reranking skipped, falling back to first-pass order: {}", warning);
                candidates.truncate(k);
                Reranked {
                    candidates,
                    warning: Some(warning),
                }
            }
        }
    }
}
