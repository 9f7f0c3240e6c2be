use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{RecallError, Result};
use crate::types::DistanceMetric;

/// Top-level configuration for the Recall engine.
///
/// Loaded from `~/.recall/config.toml` by default. Each section corresponds
/// to one stage of the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecallConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

impl RecallConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RecallConfig = toml::from_str(&content)?;
        config.retrieval.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Full path of the store snapshot, with a leading `~/` expanded.
    pub fn snapshot_path(&self) -> PathBuf {
        expand_home(&self.general.data_dir).join(&self.store.snapshot_file)
    }
}

/// Expand a leading `~/` against the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE");
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME");
        if let Ok(home) = home {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the store snapshot.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.recall/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Document store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Distance metric for similarity search.
    pub metric: DistanceMetric,
    /// Fixed embedding dimension. When unset, the first append establishes it.
    pub dimension: Option<usize>,
    /// Snapshot file name, relative to `general.data_dir`.
    pub snapshot_file: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::Cosine,
            dimension: None,
            snapshot_file: "store.json".to_string(),
        }
    }
}

/// Default parameters for retrieval calls. Requests may override each one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of results to return.
    pub top_k: usize,
    /// Minimum active score. 0 disables thresholding.
    pub similarity_threshold: f64,
    /// Rerank a 3x candidate pool with the reranker collaborator.
    pub reranking_enabled: bool,
    /// Fuse semantic and lexical scores.
    pub hybrid_enabled: bool,
    /// Semantic share of the fused score (0.0 to 1.0).
    pub hybrid_weight: f64,
    /// Upper bound on a single batched reranker call.
    pub rerank_timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            similarity_threshold: 0.0,
            reranking_enabled: true,
            hybrid_enabled: true,
            hybrid_weight: 0.7,
            rerank_timeout_ms: 5_000,
        }
    }
}

impl RetrievalConfig {
    /// Reject values the retriever cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(RecallError::Config("retrieval.top_k must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.hybrid_weight) {
            return Err(RecallError::Config(format!(
                "retrieval.hybrid_weight must be within [0, 1], got {}",
                self.hybrid_weight
            )));
        }
        if !self.similarity_threshold.is_finite() {
            return Err(RecallError::Config(
                "retrieval.similarity_threshold must be finite".into(),
            ));
        }
        Ok(())
    }
}

/// Ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Number of texts per embedder call.
    pub batch_size: usize,
    /// Dimension of the built-in hashing embedder.
    pub embedding_dim: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            embedding_dim: 384,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = RecallConfig::default();
        assert_eq!(config.general.data_dir, "~/.recall/data");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.store.metric, DistanceMetric::Cosine);
        assert!(config.store.dimension.is_none());
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.similarity_threshold, 0.0);
        assert!(config.retrieval.reranking_enabled);
        assert!(config.retrieval.hybrid_enabled);
        assert!((config.retrieval.hybrid_weight - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.retrieval.rerank_timeout_ms, 5_000);
        assert_eq!(config.ingest.batch_size, 32);
        assert_eq!(config.ingest.embedding_dim, 384);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
data_dir = "/custom/data"
log_level = "debug"

[store]
metric = "euclidean"
dimension = 768
snapshot_file = "docs.json"

[retrieval]
top_k = 10
similarity_threshold = 0.25
reranking_enabled = false
hybrid_enabled = true
hybrid_weight = 0.5
rerank_timeout_ms = 250

[ingest]
batch_size = 8
embedding_dim = 128
"#;
        let file = create_temp_config(content);
        let config = RecallConfig::load(file.path()).unwrap();
        assert_eq!(config.general.data_dir, "/custom/data");
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.store.metric, DistanceMetric::Euclidean);
        assert_eq!(config.store.dimension, Some(768));
        assert_eq!(config.store.snapshot_file, "docs.json");
        assert_eq!(config.retrieval.top_k, 10);
        assert!((config.retrieval.similarity_threshold - 0.25).abs() < f64::EPSILON);
        assert!(!config.retrieval.reranking_enabled);
        assert!((config.retrieval.hybrid_weight - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.retrieval.rerank_timeout_ms, 250);
        assert_eq!(config.ingest.batch_size, 8);
        assert_eq!(config.snapshot_path(), PathBuf::from("/custom/data/docs.json"));
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[retrieval]
top_k = 3
"#;
        let file = create_temp_config(content);
        let config = RecallConfig::load(file.path()).unwrap();
        assert_eq!(config.retrieval.top_k, 3);
        // Remaining fields use defaults
        assert!((config.retrieval.hybrid_weight - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.store.metric, DistanceMetric::Cosine);
        assert_eq!(config.store.snapshot_file, "store.json");
    }

    #[test]
    fn test_load_rejects_invalid_weight() {
        let content = r#"
[retrieval]
hybrid_weight = 1.5
"#;
        let file = create_temp_config(content);
        let result = RecallConfig::load(file.path());
        assert!(matches!(result, Err(RecallError::Config(_))));
    }

    #[test]
    fn test_load_rejects_unknown_metric() {
        let content = r#"
[store]
metric = "manhattan"
"#;
        let file = create_temp_config(content);
        assert!(RecallConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_top_k() {
        let retrieval = RetrievalConfig {
            top_k: 0,
            ..Default::default()
        };
        assert!(retrieval.validate().is_err());
        assert!(RetrievalConfig::default().validate().is_ok());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = RecallConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.general.data_dir, "~/.recall/data");
        assert_eq!(config.retrieval.top_k, 5);
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("this is {{ not valid TOML");
        assert!(RecallConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");

        let mut config = RecallConfig::default();
        config.store.metric = DistanceMetric::DotProduct;
        config.store.dimension = Some(4);
        config.save(&path).unwrap();

        let reloaded = RecallConfig::load(&path).unwrap();
        assert_eq!(reloaded.store.metric, DistanceMetric::DotProduct);
        assert_eq!(reloaded.store.dimension, Some(4));
        assert_eq!(reloaded.retrieval.top_k, config.retrieval.top_k);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let file = create_temp_config("");
        let config = RecallConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.ingest.batch_size, 32);
    }

    #[test]
    fn test_expand_home_passthrough() {
        assert_eq!(expand_home("/var/lib/recall"), PathBuf::from("/var/lib/recall"));
    }
}
