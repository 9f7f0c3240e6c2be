//! Append-only document store with a dense embedding matrix.
//!
//! Documents and matrix rows are kept as two parallel arrays rebuilt
//! together under one write lock: row `i` of the matrix is always the
//! embedding of document `i`. Callers never see the matrix mutably.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard};

use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use recall_core::error::RecallError;
use recall_core::types::{DistanceMetric, EmbeddedDocument};

/// Snapshot layout version written by [`DocumentStore::snapshot_save`].
const SNAPSHOT_VERSION: u32 = 1;

/// Errors raised by the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("embedding dimension {actual} does not match store dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("document at batch position {position} has no embedding")]
    MissingEmbedding { position: usize },

    #[error("document at batch position {position} has a non-finite embedding component at {component}")]
    NonFiniteEmbedding { position: usize, component: usize },

    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

impl From<StoreError> for RecallError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io(e) => RecallError::Io(e),
            StoreError::CorruptSnapshot(msg) => RecallError::Snapshot(msg),
            other => RecallError::Store(other.to_string()),
        }
    }
}

/// Documents plus their derived matrix. Only mutated through [`DocumentStore`].
#[derive(Debug)]
pub struct StoreContents {
    documents: Vec<EmbeddedDocument>,
    matrix: Array2<f32>,
    /// L2 norm of each matrix row, computed at rebuild time.
    row_norms: Vec<f64>,
    dimension: Option<usize>,
}

impl StoreContents {
    fn empty(dimension: Option<usize>) -> Self {
        Self {
            documents: Vec::new(),
            matrix: Array2::zeros((0, dimension.unwrap_or(0))),
            row_norms: Vec::new(),
            dimension,
        }
    }

    /// Rebuild from a full document sequence, validating every embedding.
    fn from_documents(
        documents: Vec<EmbeddedDocument>,
        dimension: Option<usize>,
    ) -> Result<Self, StoreError> {
        let mut contents = Self::empty(dimension);
        contents.dimension = validate_batch(&documents, dimension)?;
        contents.documents = documents;
        contents.rebuild_matrix()?;
        Ok(contents)
    }

    fn rebuild_matrix(&mut self) -> Result<(), StoreError> {
        let dim = self.dimension.unwrap_or(0);
        let mut flat = Vec::with_capacity(self.documents.len() * dim);
        for doc in &self.documents {
            flat.extend_from_slice(&doc.embedding);
        }
        self.matrix = Array2::from_shape_vec((self.documents.len(), dim), flat)
            .map_err(|e| StoreError::CorruptSnapshot(format!("matrix shape: {}", e)))?;
        self.row_norms = self
            .matrix
            .rows()
            .into_iter()
            .map(|row| row.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt())
            .collect();
        debug!(shape = ?self.matrix.shape(), "Rebuilt embedding matrix");
        Ok(())
    }

    pub fn documents(&self) -> &[EmbeddedDocument] {
        &self.documents
    }

    pub fn document(&self, index: usize) -> Option<&EmbeddedDocument> {
        self.documents.get(index)
    }

    /// Dense matrix view: rows are documents, columns are embedding dimensions.
    pub fn matrix(&self) -> &Array2<f32> {
        &self.matrix
    }

    pub fn row_norm(&self, index: usize) -> f64 {
        self.row_norms.get(index).copied().unwrap_or(0.0)
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Check every embedding in `batch` against `dimension` (or the batch's first
/// embedding when none is established). Returns the resulting dimension.
fn validate_batch(
    batch: &[EmbeddedDocument],
    dimension: Option<usize>,
) -> Result<Option<usize>, StoreError> {
    let mut expected = dimension;
    for (position, doc) in batch.iter().enumerate() {
        if doc.embedding.is_empty() {
            return Err(StoreError::MissingEmbedding { position });
        }
        if let Some(component) = doc.embedding.iter().position(|x| !x.is_finite()) {
            return Err(StoreError::NonFiniteEmbedding {
                position,
                component,
            });
        }
        match expected {
            Some(dim) if dim != doc.embedding.len() => {
                return Err(StoreError::DimensionMismatch {
                    expected: dim,
                    actual: doc.embedding.len(),
                });
            }
            Some(_) => {}
            None => expected = Some(doc.embedding.len()),
        }
    }
    Ok(expected)
}

/// On-disk snapshot layout.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    metric: DistanceMetric,
    dimension: Option<usize>,
    saved_at: DateTime<Utc>,
    documents: Vec<EmbeddedDocument>,
}

/// Append-only collection of embedded documents.
///
/// Thread-safe via interior RwLock: appends and reloads take the write lock,
/// searches share the read lock.
#[derive(Debug)]
pub struct DocumentStore {
    metric: DistanceMetric,
    contents: RwLock<StoreContents>,
}

impl DocumentStore {
    /// Create an empty store. The first successful append fixes the dimension.
    pub fn new(metric: DistanceMetric) -> Self {
        Self {
            metric,
            contents: RwLock::new(StoreContents::empty(None)),
        }
    }

    /// Create an empty store with a fixed embedding dimension.
    pub fn with_dimension(metric: DistanceMetric, dimension: usize) -> Self {
        Self {
            metric,
            contents: RwLock::new(StoreContents::empty(Some(dimension))),
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Append a batch of documents, all or nothing, and rebuild the matrix.
    pub fn append(&self, batch: Vec<EmbeddedDocument>) -> Result<(), StoreError> {
        let mut contents = self
            .contents
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;

        if batch.is_empty() {
            warn!("No documents provided to append");
            return Ok(());
        }

        let dimension = validate_batch(&batch, contents.dimension)?;
        let added = batch.len();
        contents.dimension = dimension;
        contents.documents.extend(batch);
        contents.rebuild_matrix()?;

        info!(
            added,
            total = contents.documents.len(),
            "Appended documents to store"
        );
        Ok(())
    }

    /// Number of stored documents.
    pub fn size(&self) -> usize {
        self.contents.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Established embedding dimension, if any.
    pub fn dimension(&self) -> Option<usize> {
        self.contents.read().ok().and_then(|c| c.dimension)
    }

    /// Shared read access for search. Holds the read lock until dropped.
    pub fn read(&self) -> Result<RwLockReadGuard<'_, StoreContents>, StoreError> {
        self.contents
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    /// Write the full document sequence and metric to `path`.
    ///
    /// The snapshot is written to a temporary file in the same directory and
    /// renamed into place, so readers never observe a partial file.
    pub fn snapshot_save(&self, path: &Path) -> Result<(), StoreError> {
        let contents = self.read()?;
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            metric: self.metric,
            dimension: contents.dimension,
            saved_at: Utc::now(),
            documents: contents.documents.clone(),
        };
        drop(contents);

        let bytes = serde_json::to_vec(&snapshot)
            .map_err(|e| StoreError::CorruptSnapshot(format!("serialize: {}", e)))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "store".to_string());
        let tmp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        let write_result = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp_path, path)
        })();
        if let Err(e) = write_result {
            let _ = fs::remove_file(&tmp_path);
            return Err(StoreError::Io(e));
        }

        info!(
            path = %path.display(),
            documents = snapshot.documents.len(),
            metric = %snapshot.metric,
            bytes = bytes.len(),
            "Saved store snapshot"
        );
        Ok(())
    }

    /// Load a store from a snapshot written by [`DocumentStore::snapshot_save`].
    pub fn snapshot_load(path: &Path) -> Result<DocumentStore, StoreError> {
        let (metric, contents) = read_snapshot(path)?;
        Ok(DocumentStore {
            metric,
            contents: RwLock::new(contents),
        })
    }

    /// Replace this store's contents wholesale with a snapshot's.
    ///
    /// The snapshot's metric must match this store's metric.
    pub fn reload(&self, path: &Path) -> Result<(), StoreError> {
        let (metric, loaded) = read_snapshot(path)?;
        if metric != self.metric {
            return Err(StoreError::CorruptSnapshot(format!(
                "snapshot metric {} does not match store metric {}",
                metric, self.metric
            )));
        }
        let mut contents = self
            .contents
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        *contents = loaded;
        info!(documents = contents.len(), "Store contents replaced from snapshot");
        Ok(())
    }
}

fn read_snapshot(path: &Path) -> Result<(DistanceMetric, StoreContents), StoreError> {
    let raw = fs::read(path)?;
    let snapshot: Snapshot = serde_json::from_slice(&raw)
        .map_err(|e| StoreError::CorruptSnapshot(format!("{}: {}", path.display(), e)))?;

    if snapshot.version != SNAPSHOT_VERSION {
        return Err(StoreError::CorruptSnapshot(format!(
            "unsupported snapshot version {}",
            snapshot.version
        )));
    }

    let contents = StoreContents::from_documents(snapshot.documents, snapshot.dimension)
        .map_err(|e| match e {
            StoreError::CorruptSnapshot(msg) => StoreError::CorruptSnapshot(msg),
            other => StoreError::CorruptSnapshot(format!("snapshot validation failed: {}", other)),
        })?;

    info!(
        path = %path.display(),
        documents = contents.len(),
        metric = %snapshot.metric,
        "Loaded store snapshot"
    );
    Ok((snapshot.metric, contents))
}
