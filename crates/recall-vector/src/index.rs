//! Brute-force similarity search over the store's embedding matrix.
//!
//! Every filter-matching row is scored, then the top `k` are selected with
//! a partial selection step before sorting only that subset.

use std::cmp::Ordering;
use std::sync::Arc;

use ndarray::ArrayView1;
use tracing::debug;

use recall_core::types::{DistanceMetric, MetadataFilter, ScoredCandidate};

use crate::store::{DocumentStore, StoreContents, StoreError};

/// Denominator floor for cosine normalization.
const NORM_EPSILON: f64 = 1e-10;

/// Similarity search over a shared [`DocumentStore`].
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    store: Arc<DocumentStore>,
}

impl SimilarityIndex {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Score every stored document against `query` and return the `k` best,
    /// ordered by descending `semantic_score` with ties broken by ascending
    /// insertion index.
    ///
    /// `filter` narrows the candidate set before selection, so `k` refers to
    /// post-filter cardinality. An empty store yields an empty result.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        metric: DistanceMetric,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredCandidate>, StoreError> {
        let contents = self.store.read()?;
        search_contents(&contents, query, k, metric, filter)
    }
}

/// Search against an already-locked store.
pub(crate) fn search_contents(
    contents: &StoreContents,
    query: &[f32],
    k: usize,
    metric: DistanceMetric,
    filter: Option<&MetadataFilter>,
) -> Result<Vec<ScoredCandidate>, StoreError> {
    if contents.is_empty() {
        debug!("Search against empty store");
        return Ok(Vec::new());
    }
    if let Some(dim) = contents.dimension() {
        if query.len() != dim {
            return Err(StoreError::DimensionMismatch {
                expected: dim,
                actual: query.len(),
            });
        }
    }

    let query_norm = l2_norm(query.iter().copied());
    let filter = filter.filter(|f| !f.is_empty());

    let mut scored: Vec<(usize, f64)> = contents
        .matrix()
        .rows()
        .into_iter()
        .enumerate()
        .filter(|(i, _)| match filter {
            Some(f) => contents
                .document(*i)
                .map(|d| f.matches(&d.metadata))
                .unwrap_or(false),
            None => true,
        })
        .map(|(i, row)| {
            let score = score_row(metric, query, query_norm, row, contents.row_norm(i));
            (i, score)
        })
        .collect();

    let candidates = scored.len();
    select_top_k(&mut scored, k);
    debug!(
        candidates,
        returned = scored.len(),
        metric = %metric,
        "Similarity search complete"
    );

    Ok(scored
        .into_iter()
        .map(|(i, score)| ScoredCandidate::semantic(i, score))
        .collect())
}

/// Descending by score, then ascending by index. A total order, so
/// selection and sorting are deterministic.
pub(crate) fn rank_order(a: &(usize, f64), b: &(usize, f64)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}

/// Keep the `k` best entries of `scored`, sorted by [`rank_order`].
pub(crate) fn select_top_k(scored: &mut Vec<(usize, f64)>, k: usize) {
    if k == 0 {
        scored.clear();
        return;
    }
    if scored.len() > k {
        scored.select_nth_unstable_by(k - 1, rank_order);
        scored.truncate(k);
    }
    scored.sort_by(rank_order);
}

fn score_row(
    metric: DistanceMetric,
    query: &[f32],
    query_norm: f64,
    row: ArrayView1<'_, f32>,
    row_norm: f64,
) -> f64 {
    match metric {
        DistanceMetric::Cosine => {
            let q = if query_norm > 0.0 { query_norm } else { 1.0 };
            let r = row_norm.max(NORM_EPSILON);
            (dot(query, row) / (q * r)).clamp(-1.0, 1.0)
        }
        DistanceMetric::Euclidean => {
            let sum: f64 = query
                .iter()
                .zip(row.iter())
                .map(|(a, b)| (*a as f64 - *b as f64).powi(2))
                .sum();
            -sum.sqrt()
        }
        DistanceMetric::DotProduct => dot(query, row),
    }
}

fn dot(query: &[f32], row: ArrayView1<'_, f32>) -> f64 {
    query
        .iter()
        .zip(row.iter())
        .map(|(a, b)| (*a as f64) * (*b as f64))
        .sum()
}

fn l2_norm(values: impl Iterator<Item = f32>) -> f64 {
    values.map(|x| (x as f64).powi(2)).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_core::types::EmbeddedDocument;

    fn index_with(metric: DistanceMetric, vectors: &[Vec<f32>]) -> SimilarityIndex {
        let store = Arc::new(DocumentStore::new(metric));
        let docs = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| EmbeddedDocument::new(format!("doc {}", i), v.clone()))
            .collect::<Vec<_>>();
        if !docs.is_empty() {
            store.append(docs).unwrap();
        }
        SimilarityIndex::new(store)
    }

    #[test]
    fn test_search_empty_store() {
        let index = index_with(DistanceMetric::Cosine, &[]);
        let hits = index
            .search(&[1.0, 0.0], 5, DistanceMetric::Cosine, None)
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_cosine_example_scenario() {
        let index = index_with(
            DistanceMetric::Cosine,
            &[vec![1.0, 0.0], vec![0.0, 1.0], vec![0.7, 0.7]],
        );
        let hits = index
            .search(&[1.0, 0.0], 2, DistanceMetric::Cosine, None)
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].index, 0);
        assert!((hits[0].semantic_score - 1.0).abs() < 1e-9);
        assert_eq!(hits[1].index, 2);
        assert!((hits[1].semantic_score - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_ignores_magnitude() {
        let index = index_with(DistanceMetric::Cosine, &[vec![10.0, 0.0], vec![0.5, 0.5]]);
        let hits = index
            .search(&[0.1, 0.0], 2, DistanceMetric::Cosine, None)
            .unwrap();
        assert_eq!(hits[0].index, 0);
        assert!((hits[0].semantic_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_zero_vectors_score_zero() {
        let index = index_with(DistanceMetric::Cosine, &[vec![0.0, 0.0], vec![1.0, 0.0]]);
        let hits = index
            .search(&[0.0, 0.0], 2, DistanceMetric::Cosine, None)
            .unwrap();
        assert!(hits.iter().all(|h| h.semantic_score == 0.0));

        let hits = index
            .search(&[1.0, 0.0], 2, DistanceMetric::Cosine, None)
            .unwrap();
        assert_eq!(hits[0].index, 1);
        assert_eq!(hits[1].semantic_score, 0.0);
    }

    #[test]
    fn test_euclidean_negative_distance() {
        let index = index_with(
            DistanceMetric::Euclidean,
            &[vec![3.0, 4.0], vec![1.0, 0.0], vec![0.0, 0.0]],
        );
        let hits = index
            .search(&[0.0, 0.0], 3, DistanceMetric::Euclidean, None)
            .unwrap();
        let order: Vec<usize> = hits.iter().map(|h| h.index).collect();
        assert_eq!(order, vec![2, 1, 0]);
        assert_eq!(hits[0].semantic_score, 0.0);
        assert!((hits[2].semantic_score + 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_dot_product_raw() {
        let index = index_with(DistanceMetric::DotProduct, &[vec![1.0, 1.0], vec![3.0, 0.0]]);
        let hits = index
            .search(&[2.0, 1.0], 2, DistanceMetric::DotProduct, None)
            .unwrap();
        assert_eq!(hits[0].index, 1);
        assert!((hits[0].semantic_score - 6.0).abs() < 1e-9);
        assert!((hits[1].semantic_score - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let index = index_with(DistanceMetric::Cosine, &[vec![1.0, 0.0, 0.0]]);
        let err = index
            .search(&[1.0, 0.0], 1, DistanceMetric::Cosine, None)
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_ties_break_by_insertion_index() {
        let vectors: Vec<Vec<f32>> = (0..20).map(|_| vec![1.0, 1.0]).collect();
        let index = index_with(DistanceMetric::Cosine, &vectors);
        let hits = index
            .search(&[1.0, 1.0], 5, DistanceMetric::Cosine, None)
            .unwrap();
        let order: Vec<usize> = hits.iter().map(|h| h.index).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_filter_applies_before_top_k() {
        let store = Arc::new(DocumentStore::new(DistanceMetric::Cosine));
        store
            .append(vec![
                EmbeddedDocument::new("a", vec![1.0, 0.0]).with_metadata("lang", "en"),
                EmbeddedDocument::new("b", vec![0.9, 0.1]).with_metadata("lang", "en"),
                EmbeddedDocument::new("c", vec![0.1, 0.9]).with_metadata("lang", "de"),
                EmbeddedDocument::new("d", vec![0.0, 1.0]).with_metadata("lang", "de"),
            ])
            .unwrap();
        let index = SimilarityIndex::new(store);
        let filter = MetadataFilter::new().require("lang", "de");
        let hits = index
            .search(&[1.0, 0.0], 2, DistanceMetric::Cosine, Some(&filter))
            .unwrap();
        let order: Vec<usize> = hits.iter().map(|h| h.index).collect();
        assert_eq!(order, vec![2, 3]);
    }

    #[test]
    fn test_filter_matching_nothing() {
        let index = index_with(DistanceMetric::Cosine, &[vec![1.0]]);
        let filter = MetadataFilter::new().require("source", "missing.pdf");
        let hits = index
            .search(&[1.0], 3, DistanceMetric::Cosine, Some(&filter))
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_k_zero_returns_nothing() {
        let index = index_with(DistanceMetric::Cosine, &[vec![1.0]]);
        assert!(index
            .search(&[1.0], 0, DistanceMetric::Cosine, None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_select_top_k_matches_full_sort() {
        let mut scored: Vec<(usize, f64)> = (0..200)
            .map(|i| (i, ((i * 7919) % 13) as f64 / 13.0))
            .collect();
        let mut expected = scored.clone();
        expected.sort_by(rank_order);
        expected.truncate(17);

        select_top_k(&mut scored, 17);
        assert_eq!(scored, expected);
    }

    #[test]
    fn test_repeated_queries_identical() {
        let vectors: Vec<Vec<f32>> = (0..50)
            .map(|i| vec![(i % 5) as f32, 1.0, (i % 3) as f32])
            .collect();
        let index = index_with(DistanceMetric::Cosine, &vectors);
        let first = index
            .search(&[1.0, 1.0, 1.0], 10, DistanceMetric::Cosine, None)
            .unwrap();
        for _ in 0..5 {
            let again = index
                .search(&[1.0, 1.0, 1.0], 10, DistanceMetric::Cosine, None)
                .unwrap();
            assert_eq!(again, first);
        }
    }
}
