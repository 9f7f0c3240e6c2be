//! CLI argument definitions for the Recall application.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use recall_core::types::{MetadataFilter, MetadataValue};

/// Recall: hybrid semantic and keyword retrieval over embedded documents.
#[derive(Parser, Debug)]
#[command(name = "recall", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Embed chunks from a JSONL file and append them to the store.
    Ingest {
        /// One `{"text": ..., "metadata": {...}}` object per line.
        file: PathBuf,
    },
    /// Retrieve the best matching chunks for a query.
    Search {
        query: String,

        /// Number of results to return.
        #[arg(short = 'k', long = "top-k")]
        top_k: Option<usize>,

        /// Minimum first-pass score.
        #[arg(short = 't', long = "threshold")]
        threshold: Option<f64>,

        /// Semantic share of the fused score (0.0 to 1.0).
        #[arg(short = 'w', long = "weight")]
        weight: Option<f64>,

        /// Rank by embedding similarity only.
        #[arg(long = "no-hybrid")]
        no_hybrid: bool,

        /// Metadata equality filter, repeatable.
        #[arg(short = 'f', long = "filter", value_name = "KEY=VALUE", value_parser = parse_filter_pair)]
        filter: Vec<(String, MetadataValue)>,

        /// Omit document metadata from the output.
        #[arg(long = "no-metadata")]
        no_metadata: bool,
    },
    /// Print document count, dimension and metric of the store.
    Stats,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > RECALL_CONFIG env var > platform default (~/.recall/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("RECALL_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

/// Build a filter from parsed `--filter` pairs.
pub fn build_filter(pairs: &[(String, MetadataValue)]) -> Option<MetadataFilter> {
    if pairs.is_empty() {
        return None;
    }
    Some(
        pairs
            .iter()
            .fold(MetadataFilter::new(), |f, (k, v)| f.require(k.clone(), v.clone())),
    )
}

/// Parse `key=value`. Values that look like integers, floats or booleans are
/// typed accordingly; everything else is text.
fn parse_filter_pair(raw: &str) -> Result<(String, MetadataValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in filter '{}'", raw));
    }
    Ok((key.to_string(), parse_value(value.trim())))
}

fn parse_value(value: &str) -> MetadataValue {
    if let Ok(i) = value.parse::<i64>() {
        return MetadataValue::Integer(i);
    }
    if let Ok(x) = value.parse::<f64>() {
        if x.is_finite() {
            return MetadataValue::Float(x);
        }
    }
    match value {
        "true" => MetadataValue::Bool(true),
        "false" => MetadataValue::Bool(false),
        other => MetadataValue::Text(other.to_string()),
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".recall").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".recall").join("config.toml");
    }
    PathBuf::from("config.toml")
}
