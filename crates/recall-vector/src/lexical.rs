//! Term-frequency keyword scoring.
//!
//! The score of a document for a query is the sum, over every query token
//! present in the document, of that token's share of the document's tokens,
//! divided by the number of query tokens. Documents with no tokens left after
//! stopword removal score 0.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use recall_core::error::RecallError;
use recall_core::types::ScoredCandidate;

use crate::index::rank_order;
use crate::store::StoreContents;

/// Standard English stopword list (NLTK corpus).
const ENGLISH_STOPWORDS: &[&str] = &[
    "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "you're", "you've",
    "you'll", "you'd", "your", "yours", "yourself", "yourselves", "he", "him", "his", "himself",
    "she", "she's", "her", "hers", "herself", "it", "it's", "its", "itself", "they", "them",
    "their", "theirs", "themselves", "what", "which", "who", "whom", "this", "that", "that'll",
    "these", "those", "am", "is", "are", "was", "were", "be", "been", "being", "have", "has",
    "had", "having", "do", "does", "did", "doing", "a", "an", "the", "and", "but", "if", "or",
    "because", "as", "until", "while", "of", "at", "by", "for", "with", "about", "against",
    "between", "into", "through", "during", "before", "after", "above", "below", "to", "from",
    "up", "down", "in", "out", "on", "off", "over", "under", "again", "further", "then", "once",
    "here", "there", "when", "where", "why", "how", "all", "any", "both", "each", "few", "more",
    "most", "other", "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than",
    "too", "very", "s", "t", "can", "will", "just", "don", "don't", "should", "should've", "now",
    "d", "ll", "m", "o", "re", "ve", "y", "ain", "aren", "aren't", "couldn", "couldn't", "didn",
    "didn't", "doesn", "doesn't", "hadn", "hadn't", "hasn", "hasn't", "haven", "haven't", "isn",
    "isn't", "ma", "mightn", "mightn't", "mustn", "mustn't", "needn", "needn't", "shan",
    "shan't", "shouldn", "shouldn't", "wasn", "wasn't", "weren", "weren't", "won", "won't",
    "wouldn", "wouldn't",
];

/// Turns text into the token multiset used for keyword scoring.
///
/// Implementations return case-folded alphanumeric tokens with stopwords
/// already removed. Errors are treated by the retriever as the lexical stage
/// being unavailable for that call.
pub trait TextAnalyzer: Send + Sync {
    fn tokenize(&self, text: &str) -> Result<Vec<String>, RecallError>;
}

/// Splits on non-alphanumeric characters, lowercases, and drops stopwords.
#[derive(Debug, Clone)]
pub struct StopwordAnalyzer {
    stopwords: HashSet<String>,
}

impl StopwordAnalyzer {
    /// Analyzer with the standard English stopword list.
    pub fn english() -> Self {
        Self::with_stopwords(ENGLISH_STOPWORDS.iter().copied())
    }

    pub fn with_stopwords<'a>(words: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            stopwords: words.into_iter().map(str::to_lowercase).collect(),
        }
    }

    pub fn is_stopword(&self, token: &str) -> bool {
        self.stopwords.contains(token)
    }
}

impl Default for StopwordAnalyzer {
    fn default() -> Self {
        Self::english()
    }
}

impl TextAnalyzer for StopwordAnalyzer {
    fn tokenize(&self, text: &str) -> Result<Vec<String>, RecallError> {
        Ok(text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .filter(|t| !self.stopwords.contains(t))
            .collect())
    }
}

/// Keyword score of one stored document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LexicalHit {
    pub index: usize,
    pub score: f64,
}

/// Score already-tokenized text. Query tokens are counted with multiplicity.
pub fn score_tokens(query_tokens: &[String], document_tokens: &[String]) -> f64 {
    if query_tokens.is_empty() || document_tokens.is_empty() {
        return 0.0;
    }
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for token in document_tokens {
        *counts.entry(token.as_str()).or_insert(0) += 1;
    }
    let total = document_tokens.len() as f64;
    let sum: f64 = query_tokens
        .iter()
        .filter_map(|t| counts.get(t.as_str()))
        .map(|count| *count as f64 / total)
        .sum();
    sum / query_tokens.len() as f64
}

/// Keyword relevance scorer backed by a [`TextAnalyzer`].
pub struct LexicalScorer {
    analyzer: Box<dyn TextAnalyzer>,
}

impl std::fmt::Debug for LexicalScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LexicalScorer").finish_non_exhaustive()
    }
}

impl LexicalScorer {
    pub fn new(analyzer: impl TextAnalyzer + 'static) -> Self {
        Self {
            analyzer: Box::new(analyzer),
        }
    }

    /// Scorer using [`StopwordAnalyzer::english`].
    pub fn english() -> Self {
        Self::new(StopwordAnalyzer::english())
    }

    pub fn score(&self, query: &str, document_text: &str) -> Result<f64, RecallError> {
        let query_tokens = self.analyzer.tokenize(query)?;
        let document_tokens = self.analyzer.tokenize(document_text)?;
        Ok(score_tokens(&query_tokens, &document_tokens))
    }

    /// Score the documents behind a first-pass candidate pool, ordered like
    /// the semantic stage (score desc, index asc).
    ///
    /// Only pool members are scored, so fusing the hits with the pool never
    /// introduces documents the semantic stage did not select. Zero-score
    /// documents are kept.
    pub fn rank_candidates(
        &self,
        query: &str,
        contents: &StoreContents,
        candidates: &[ScoredCandidate],
    ) -> Result<Vec<LexicalHit>, RecallError> {
        let query_tokens = self.analyzer.tokenize(query)?;
        let mut scored: Vec<(usize, f64)> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let Some(doc) = contents.document(candidate.index) else {
                continue;
            };
            let tokens = self.analyzer.tokenize(&doc.text)?;
            scored.push((candidate.index, score_tokens(&query_tokens, &tokens)));
        }
        scored.sort_by(rank_order);
        debug!(
            query_tokens = query_tokens.len(),
            scored = scored.len(),
            "Lexical ranking complete"
        );
        Ok(scored
            .into_iter()
            .map(|(index, score)| LexicalHit { index, score })
            .collect())
    }
}
