//! Recall Vector crate - document store, similarity search, hybrid fusion,
//! reranking, retrieval orchestration, and the ingestion pipeline.
//!
//! Provides an in-memory embedding store with atomic snapshots, brute-force
//! similarity search under cosine, euclidean, or dot-product metrics, a
//! term-frequency lexical scorer fused with semantic scores, and a retriever
//! that degrades gracefully when optional collaborators fail.

pub mod embedding;
pub mod fusion;
pub mod index;
pub mod lexical;
pub mod pipeline;
pub mod rerank;
pub mod retriever;
pub mod store;

pub use embedding::{DynEmbeddingService, EmbeddingService, HashEmbedding};
pub use fusion::FusionPolicy;
pub use index::SimilarityIndex;
pub use lexical::{LexicalHit, LexicalScorer, StopwordAnalyzer, TextAnalyzer};
pub use pipeline::{Chunk, IngestPipeline, IngestReport};
pub use rerank::{DynRerankService, RerankService, Reranked, RerankerAdapter};
pub use retriever::{Capabilities, ResolvedParams, Retriever};
pub use store::{DocumentStore, StoreContents, StoreError};
