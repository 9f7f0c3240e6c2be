//! Benchmarks for semantic search and full hybrid retrieval.
//!
//! Uses 5,000 chunks by default. Set `BENCH_FULL_SCALE=1` to run against
//! 100,000 chunks:
//!
//! ```bash
//! BENCH_FULL_SCALE=1 cargo bench -p recall-vector
//! ```

use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use recall_core::config::RetrievalConfig;
use recall_core::types::{DistanceMetric, MetadataFilter, RetrievalRequest};
use recall_vector::embedding::{EmbeddingService, HashEmbedding};
use recall_vector::index::SimilarityIndex;
use recall_vector::pipeline::{Chunk, IngestPipeline};
use recall_vector::retriever::Retriever;
use recall_vector::store::DocumentStore;

const CI_CHUNK_COUNT: usize = 5_000;
const FULL_SCALE_CHUNK_COUNT: usize = 100_000;
const EMBEDDING_DIM: usize = 384;

const TOPICS: &[&str] = &[
    "authentication module review",
    "deployment pipeline staging production",
    "database migration downtime",
    "monitoring dashboards memory usage",
    "customer satisfaction metrics",
];

fn generate_chunk_text(index: usize) -> String {
    format!(
        "The engineering team discussed {} during the weekly sync. \
         Follow-up items were assigned and tracked in the planning board. \
         Chunk identifier: {}",
        TOPICS[index % TOPICS.len()],
        index
    )
}

fn chunk_count() -> usize {
    if std::env::var("BENCH_FULL_SCALE").is_ok() {
        FULL_SCALE_CHUNK_COUNT
    } else {
        CI_CHUNK_COUNT
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime")
}

/// Build a store populated with `count` chunks through the ingest pipeline.
fn build_populated_store(rt: &tokio::runtime::Runtime, count: usize) -> Arc<DocumentStore> {
    let store = Arc::new(DocumentStore::new(DistanceMetric::Cosine));
    let pipeline = IngestPipeline::new(Arc::clone(&store), HashEmbedding::new(EMBEDDING_DIM), 256);

    let chunks: Vec<Chunk> = (0..count)
        .map(|i| {
            let mut chunk = Chunk::new(generate_chunk_text(i));
            chunk
                .metadata
                .insert("source".into(), format!("doc-{}.pdf", i % 50).into());
            chunk.metadata.insert("chunk_id".into(), (i as i64).into());
            chunk
        })
        .collect();
    rt.block_on(pipeline.ingest(chunks)).expect("ingest failed");

    assert_eq!(store.size(), count, "Store should contain all chunks");
    store
}

fn bench_semantic_search(c: &mut Criterion) {
    let rt = runtime();
    let count = chunk_count();
    let store = build_populated_store(&rt, count);
    let index = SimilarityIndex::new(Arc::clone(&store));

    let query_vec = rt
        .block_on(HashEmbedding::new(EMBEDDING_DIM).embed("database migration"))
        .expect("query embed failed");

    let mut group = c.benchmark_group("semantic_search");
    group.sample_size(50);
    group.measurement_time(Duration::from_secs(10));

    for metric in [
        DistanceMetric::Cosine,
        DistanceMetric::Euclidean,
        DistanceMetric::DotProduct,
    ] {
        group.bench_with_input(
            BenchmarkId::new(format!("top10_{}chunks", count), metric),
            &metric,
            |b, metric| {
                b.iter(|| {
                    let hits = index
                        .search(&query_vec, 10, *metric, None)
                        .expect("search failed");
                    assert_eq!(hits.len(), 10);
                    hits
                });
            },
        );
    }

    let filter = MetadataFilter::new().require("source", "doc-7.pdf");
    group.bench_function(format!("filtered_top10_{}chunks", count), |b| {
        b.iter(|| {
            index
                .search(&query_vec, 10, DistanceMetric::Cosine, Some(&filter))
                .expect("search failed")
        });
    });

    group.finish();
}

fn bench_hybrid_retrieval(c: &mut Criterion) {
    let rt = runtime();
    let count = chunk_count();
    let store = build_populated_store(&rt, count);

    let defaults = RetrievalConfig {
        reranking_enabled: false,
        ..Default::default()
    };
    let retriever = Retriever::new(store, HashEmbedding::new(EMBEDDING_DIM), defaults);

    let mut group = c.benchmark_group("retrieval");
    group.sample_size(30);
    group.measurement_time(Duration::from_secs(10));

    group.bench_function(format!("semantic_top10_{}chunks", count), |b| {
        let request = RetrievalRequest::new("deployment pipeline monitoring")
            .top_k(10)
            .hybrid(false);
        b.iter(|| rt.block_on(retriever.retrieve(&request)).expect("retrieve failed"));
    });

    group.bench_function(format!("hybrid_top10_{}chunks", count), |b| {
        let request = RetrievalRequest::new("deployment pipeline monitoring")
            .top_k(10)
            .hybrid(true);
        b.iter(|| {
            let response = rt.block_on(retriever.retrieve(&request)).expect("retrieve failed");
            assert!(!response.is_empty(), "Hybrid retrieval should return results");
            response
        });
    });

    group.finish();
}

criterion_group!(benches, bench_semantic_search, bench_hybrid_retrieval);
criterion_main!(benches);
