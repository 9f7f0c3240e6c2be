use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RecallError;

// =============================================================================
// Metric
// =============================================================================

/// Distance metric used to score stored embeddings against a query.
///
/// Every metric is oriented so that a higher score means a closer match.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Dot product of L2-normalized vectors, in [-1, 1].
    #[default]
    #[serde(rename = "cosine")]
    Cosine,
    /// Negative L2 distance.
    #[serde(rename = "euclidean")]
    Euclidean,
    /// Raw dot product, no normalization.
    #[serde(rename = "dot")]
    DotProduct,
}

impl DistanceMetric {
    /// Identifier used in config files and snapshots.
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::DotProduct => "dot",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = RecallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "euclidean" => Ok(DistanceMetric::Euclidean),
            "dot" | "dot_product" => Ok(DistanceMetric::DotProduct),
            other => Err(RecallError::Config(format!(
                "Unsupported distance metric: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// Documents and metadata
// =============================================================================

/// A scalar metadata value attached to a document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Integer(i) => write!(f, "{}", i),
            MetadataValue::Float(x) => write!(f, "{}", x),
            MetadataValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Integer(value)
    }
}

impl From<i32> for MetadataValue {
    fn from(value: i32) -> Self {
        MetadataValue::Integer(value as i64)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

/// Ordered string-keyed metadata map.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Metadata key naming the source document of a chunk.
pub const SOURCE_KEY: &str = "source";
/// Metadata key naming a chunk's position within its source.
pub const CHUNK_ID_KEY: &str = "chunk_id";

/// A chunk of text with its embedding and metadata, as stored in the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedDocument {
    /// The raw chunk text.
    pub text: String,
    /// Embedding vector. Length must match the store dimension.
    pub embedding: Vec<f32>,
    /// Scalar metadata used for filtering and identity.
    #[serde(default)]
    pub metadata: Metadata,
}

impl EmbeddedDocument {
    pub fn new(text: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            text: text.into(),
            embedding,
            metadata: Metadata::new(),
        }
    }

    /// Attach a metadata entry. Chainable builder method.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Identity key used to correlate this document across candidate lists.
    ///
    /// Composite of `source` and `chunk_id`. When neither key is present the
    /// store position is used instead, so anonymous documents never merge.
    pub fn identity_key(&self, position: usize) -> IdentityKey {
        let source = self.metadata.get(SOURCE_KEY);
        let chunk = self.metadata.get(CHUNK_ID_KEY);
        match (source, chunk) {
            (None, None) => IdentityKey(format!("#{}", position)),
            _ => IdentityKey(format!(
                "{}::{}",
                source.map(ToString::to_string).unwrap_or_default(),
                chunk.map(ToString::to_string).unwrap_or_default()
            )),
        }
    }
}

/// Key correlating the same logical chunk across semantic and lexical results.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey(pub String);

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conjunction of metadata equality predicates.
///
/// A document matches when every key is present in its metadata with an
/// equal value. An empty filter matches everything.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataFilter {
    predicates: BTreeMap<String, MetadataValue>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key == value`. Chainable builder method.
    pub fn require(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.predicates.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.predicates
            .iter()
            .all(|(key, value)| metadata.get(key) == Some(value))
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }
}

// =============================================================================
// Scoring
// =============================================================================

/// A store document plus every score computed for it so far.
///
/// Earlier stage scores are retained when later stages run.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredCandidate {
    /// Position of the document in the store.
    pub index: usize,
    pub semantic_score: f64,
    pub lexical_score: Option<f64>,
    pub fused_score: Option<f64>,
    pub rerank_score: Option<f64>,
}

impl ScoredCandidate {
    /// Candidate straight out of the semantic stage.
    pub fn semantic(index: usize, score: f64) -> Self {
        Self {
            index,
            semantic_score: score,
            lexical_score: None,
            fused_score: None,
            rerank_score: None,
        }
    }

    /// Score used for thresholding: fused when present, otherwise semantic.
    pub fn first_pass_score(&self) -> f64 {
        self.fused_score.unwrap_or(self.semantic_score)
    }

    pub fn scores(&self) -> Scores {
        Scores {
            semantic: self.semantic_score,
            lexical: self.lexical_score,
            fused: self.fused_score,
            rerank: self.rerank_score,
        }
    }
}

/// All scores attached to a retrieved document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub semantic: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexical: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fused: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank: Option<f64>,
}

impl Scores {
    /// The score that ordered the final result.
    pub fn active(&self) -> f64 {
        self.rerank.or(self.fused).unwrap_or(self.semantic)
    }
}

// =============================================================================
// Retrieval request / response
// =============================================================================

/// A retrieval call. Unset fields fall back to the configured defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalRequest {
    pub query: String,
    pub top_k: Option<usize>,
    pub similarity_threshold: Option<f64>,
    pub hybrid_enabled: Option<bool>,
    pub hybrid_weight: Option<f64>,
    pub reranking_enabled: Option<bool>,
    pub filter: Option<MetadataFilter>,
    /// Whether results carry document metadata.
    pub include_metadata: bool,
}

impl Default for RetrievalRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            top_k: None,
            similarity_threshold: None,
            hybrid_enabled: None,
            hybrid_weight: None,
            reranking_enabled: None,
            filter: None,
            include_metadata: true,
        }
    }
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = Some(threshold);
        self
    }

    pub fn hybrid(mut self, enabled: bool) -> Self {
        self.hybrid_enabled = Some(enabled);
        self
    }

    pub fn hybrid_weight(mut self, weight: f64) -> Self {
        self.hybrid_weight = Some(weight);
        self
    }

    pub fn reranking(mut self, enabled: bool) -> Self {
        self.reranking_enabled = Some(enabled);
        self
    }

    pub fn filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn include_metadata(mut self, include: bool) -> Self {
        self.include_metadata = include;
        self
    }
}

/// One ranked entry of a retrieval response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    /// 1-based position in the response.
    pub rank: usize,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    pub scores: Scores,
}

impl RetrievedDocument {
    pub fn score(&self) -> f64 {
        self.scores.active()
    }
}

/// A recoverable problem encountered while serving a retrieval call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RetrievalWarning {
    /// The reranker returned an error or malformed scores; pre-rerank order kept.
    RerankFailed { reason: String },
    /// The reranker did not answer within the timeout; pre-rerank order kept.
    RerankTimedOut { timeout_ms: u64 },
}

impl fmt::Display for RetrievalWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalWarning::RerankFailed { reason } => {
                write!(f, "reranking failed, kept pre-rerank order: {}", reason)
            }
            RetrievalWarning::RerankTimedOut { timeout_ms } => write!(
                f,
                "reranking timed out after {}ms, kept pre-rerank order",
                timeout_ms
            ),
        }
    }
}

/// Ordered results of a retrieval call plus any degradation warnings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResponse {
    pub results: Vec<RetrievedDocument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<RetrievalWarning>,
}

impl RetrievalResponse {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
