//! Weighted linear fusion of semantic and lexical scores.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use recall_core::types::{IdentityKey, ScoredCandidate};

use crate::index::rank_order;
use crate::lexical::LexicalHit;

/// Combines the two first-pass signals into one ranking score.
///
/// `fused = weight * semantic + (1 - weight) * lexical`, where a document
/// missing from one list contributes 0 for that signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionPolicy {
    weight: f64,
}

impl Default for FusionPolicy {
    fn default() -> Self {
        Self { weight: 0.7 }
    }
}

impl FusionPolicy {
    /// Weight is clamped to [0, 1]. A NaN weight falls back to pure semantic.
    pub fn new(weight: f64) -> Self {
        let weight = if weight.is_nan() {
            1.0
        } else {
            weight.clamp(0.0, 1.0)
        };
        Self { weight }
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn combine(&self, semantic: f64, lexical: f64) -> f64 {
        self.weight * semantic + (1.0 - self.weight) * lexical
    }

    /// Fuse the two candidate lists over the union of their identity keys.
    ///
    /// `identity_key` maps a store index to the key that correlates the same
    /// logical chunk across lists. A key's document is the first one seen,
    /// semantic list first. Output is ordered by descending `fused_score`,
    /// ties broken by ascending store index.
    pub fn fuse<F>(
        &self,
        identity_key: F,
        semantic: &[ScoredCandidate],
        lexical: &[LexicalHit],
    ) -> Vec<ScoredCandidate>
    where
        F: Fn(usize) -> IdentityKey,
    {
        let mut slots: HashMap<IdentityKey, usize> = HashMap::new();
        let mut merged: Vec<ScoredCandidate> = Vec::with_capacity(semantic.len() + lexical.len());

        for candidate in semantic {
            let key = identity_key(candidate.index);
            if slots.contains_key(&key) {
                continue;
            }
            slots.insert(key, merged.len());
            merged.push(ScoredCandidate {
                lexical_score: Some(0.0),
                ..candidate.clone()
            });
        }

        let mut lexical_seen: HashSet<IdentityKey> = HashSet::new();
        let mut lexical_only = 0usize;
        for hit in lexical {
            let key = identity_key(hit.index);
            // First hit for a key wins, as on the semantic side.
            if !lexical_seen.insert(key.clone()) {
                continue;
            }
            match slots.get(&key) {
                Some(&slot) => merged[slot].lexical_score = Some(hit.score),
                None => {
                    slots.insert(key, merged.len());
                    merged.push(ScoredCandidate {
                        index: hit.index,
                        semantic_score: 0.0,
                        lexical_score: Some(hit.score),
                        fused_score: None,
                        rerank_score: None,
                    });
                    lexical_only += 1;
                }
            }
        }

        for candidate in merged.iter_mut() {
            let lexical = candidate.lexical_score.unwrap_or(0.0);
            candidate.fused_score = Some(self.combine(candidate.semantic_score, lexical));
        }
        merged.sort_by(|a, b| {
            rank_order(
                &(a.index, a.first_pass_score()),
                &(b.index, b.first_pass_score()),
            )
        });

        debug!(
            semantic = semantic.len(),
            lexical = lexical.len(),
            lexical_only,
            fused = merged.len(),
            weight = self.weight,
            "Fused candidate lists"
        );
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: usize) -> IdentityKey {
        IdentityKey(format!("#{}", i))
    }

    fn sem(pairs: &[(usize, f64)]) -> Vec<ScoredCandidate> {
        pairs
            .iter()
            .map(|(i, s)| ScoredCandidate::semantic(*i, *s))
            .collect()
    }

    fn lex(pairs: &[(usize, f64)]) -> Vec<LexicalHit> {
        pairs
            .iter()
            .map(|(i, s)| LexicalHit {
                index: *i,
                score: *s,
            })
            .collect()
    }

    fn order(fused: &[ScoredCandidate]) -> Vec<usize> {
        fused.iter().map(|c| c.index).collect()
    }

    #[test]
    fn test_weight_clamped() {
        assert_eq!(FusionPolicy::new(1.7).weight(), 1.0);
        assert_eq!(FusionPolicy::new(-0.2).weight(), 0.0);
        assert_eq!(FusionPolicy::new(f64::NAN).weight(), 1.0);
        assert_eq!(FusionPolicy::default().weight(), 0.7);
    }

    #[test]
    fn test_union_with_missing_scores_as_zero() {
        let policy = FusionPolicy::new(0.5);
        let fused = policy.fuse(
            key,
            &sem(&[(0, 0.9), (1, 0.4)]),
            &lex(&[(2, 0.6), (1, 0.2)]),
        );
        assert_eq!(fused.len(), 3);
        let by_index: HashMap<usize, &ScoredCandidate> =
            fused.iter().map(|c| (c.index, c)).collect();
        assert_eq!(by_index[&0].fused_score, Some(0.45));
        assert_eq!(by_index[&0].lexical_score, Some(0.0));
        assert!((by_index[&1].fused_score.unwrap() - 0.3).abs() < 1e-12);
        assert_eq!(by_index[&2].semantic_score, 0.0);
        assert_eq!(by_index[&2].fused_score, Some(0.3));
        assert_eq!(order(&fused)[0], 0);
    }

    #[test]
    fn test_weight_one_is_pure_semantic() {
        let semantic = sem(&[(3, 0.9), (1, 0.5), (0, 0.2)]);
        let fused = FusionPolicy::new(1.0).fuse(key, &semantic, &lex(&[(0, 1.0), (1, 0.8)]));
        for c in &fused {
            assert_eq!(c.fused_score, Some(c.semantic_score));
        }
        assert_eq!(order(&fused), vec![3, 1, 0]);
    }

    #[test]
    fn test_weight_zero_is_pure_lexical() {
        let lexical = lex(&[(2, 0.7), (0, 0.3), (1, 0.1)]);
        let fused = FusionPolicy::new(0.0).fuse(key, &sem(&[(0, 0.99), (1, 0.9)]), &lexical);
        for c in &fused {
            assert_eq!(c.fused_score, c.lexical_score);
        }
        assert_eq!(order(&fused), vec![2, 0, 1]);
    }

    #[test]
    fn test_equal_fused_scores_tie_break_by_index() {
        // semantic 0.8 / lexical 0.2 vs semantic 0.2 / lexical 0.8 at weight 0.5.
        let fused = FusionPolicy::new(0.5).fuse(
            key,
            &sem(&[(0, 0.8), (1, 0.2)]),
            &lex(&[(1, 0.8), (0, 0.2)]),
        );
        assert!((fused[0].fused_score.unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(fused[0].fused_score, fused[1].fused_score);
        assert_eq!(order(&fused), vec![0, 1]);

        let swapped = FusionPolicy::new(0.5).fuse(
            key,
            &sem(&[(1, 0.2), (0, 0.8)]),
            &lex(&[(0, 0.2), (1, 0.8)]),
        );
        assert_eq!(order(&swapped), vec![0, 1]);
    }

    #[test]
    fn test_shared_identity_key_merges_documents() {
        // Store indices 0 and 5 are the same logical chunk.
        let shared = |i: usize| {
            if i == 5 {
                IdentityKey("#0".into())
            } else {
                key(i)
            }
        };
        let fused = FusionPolicy::new(0.5).fuse(shared, &sem(&[(0, 0.6)]), &lex(&[(5, 0.4)]));
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].index, 0);
        assert_eq!(fused[0].lexical_score, Some(0.4));
        assert!((fused[0].fused_score.unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(FusionPolicy::default().fuse(key, &[], &[]).is_empty());
    }
}
