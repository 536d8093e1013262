use serde::Deserialize;
use std::{fs, path::Path};
use tracing::info;

use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub parser: ParserSection,
    #[serde(default)]
    pub normalizer: NormalizerSection,
    #[serde(default)]
    pub embedding: EmbeddingSection,
    #[serde(default)]
    pub optimizer: OptimizerSection,
}

fn default_db_path() -> String {
    "data/receipts.db".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            parser: ParserSection::default(),
            normalizer: NormalizerSection::default(),
            embedding: EmbeddingSection::default(),
            optimizer: OptimizerSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParserSection {
    /// Lower-case store names looked for near the top of a receipt.
    #[serde(default = "default_known_stores")]
    pub known_stores: Vec<String>,
    #[serde(default = "default_scan_lines")]
    pub header_scan_lines: usize,
    #[serde(default = "default_scan_lines")]
    pub footer_scan_lines: usize,
}

fn default_known_stores() -> Vec<String> {
    [
        "walmart",
        "target",
        "costco",
        "kroger",
        "safeway",
        "whole foods",
        "trader joe",
        "aldi",
        "lidl",
        "tesco",
        "sainsbury",
        "asda",
        "morrisons",
        "carrefour",
        "auchan",
        "rewe",
        "edeka",
        "kaufland",
        "penny",
        "netto",
        "spar",
        "mercadona",
        "albert heijn",
        "jumbo",
        "billa",
        "migros",
        "coop",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_scan_lines() -> usize {
    10
}

impl Default for ParserSection {
    fn default() -> Self {
        Self {
            known_stores: default_known_stores(),
            header_scan_lines: default_scan_lines(),
            footer_scan_lines: default_scan_lines(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NormalizerSection {
    #[serde(default = "default_semantic_threshold")]
    pub semantic_threshold: f64,
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,
    #[serde(default = "default_keyword_threshold")]
    pub keyword_threshold: f64,
    /// Below this nothing is accepted and a new catalog entry is created.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_cache_ttl_hours")]
    pub cache_ttl_hours: i64,
    /// Budget for the embedding call plus similarity search.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_semantic_threshold() -> f64 {
    0.7
}

fn default_fuzzy_threshold() -> f64 {
    0.7
}

fn default_keyword_threshold() -> f64 {
    0.5
}

fn default_min_confidence() -> f64 {
    0.3
}

fn default_cache_ttl_hours() -> i64 {
    24
}

fn default_timeout_ms() -> u64 {
    3000
}

impl Default for NormalizerSection {
    fn default() -> Self {
        Self {
            semantic_threshold: default_semantic_threshold(),
            fuzzy_threshold: default_fuzzy_threshold(),
            keyword_threshold: default_keyword_threshold(),
            min_confidence: default_min_confidence(),
            cache_ttl_hours: default_cache_ttl_hours(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Offline feature-hashing embedder.
    #[default]
    Lexical,
    Ollama,
    Remote,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingSection {
    #[serde(default)]
    pub backend: EmbeddingBackend,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_ollama")]
    pub ollama: EndpointConfig,
    #[serde(default = "default_remote")]
    pub remote: EndpointConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub base_url: String,
    pub model: String,
}

fn default_dimension() -> usize {
    256
}

fn default_ollama() -> EndpointConfig {
    EndpointConfig {
        base_url: "http://localhost:11434/v1".to_string(),
        model: "nomic-embed-text".to_string(),
    }
}

fn default_remote() -> EndpointConfig {
    EndpointConfig {
        base_url: "https://api.openai.com/v1".to_string(),
        model: "text-embedding-3-small".to_string(),
    }
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::default(),
            dimension: default_dimension(),
            ollama: default_ollama(),
            remote: default_remote(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptimizerSection {
    /// Observations older than this many days are not "recent".
    #[serde(default = "default_window_days")]
    pub window_days: i64,
}

fn default_window_days() -> i64 {
    30
}

impl Default for OptimizerSection {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Like `load`, but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            db_path = "/tmp/r.db"

            [normalizer]
            fuzzy_threshold = 0.8

            [embedding]
            backend = "ollama"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.db_path, "/tmp/r.db");
        assert_eq!(cfg.normalizer.fuzzy_threshold, 0.8);
        assert_eq!(cfg.normalizer.semantic_threshold, 0.7);
        assert_eq!(cfg.normalizer.cache_ttl_hours, 24);
        assert_eq!(cfg.embedding.backend, EmbeddingBackend::Ollama);
        assert_eq!(cfg.embedding.ollama.model, "nomic-embed-text");
        assert_eq!(cfg.parser.header_scan_lines, 10);
        assert!(cfg.parser.known_stores.iter().any(|s| s == "walmart"));
        assert_eq!(cfg.optimizer.window_days, 30);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let cfg = Config::load_or_default("/definitely/not/here.toml").unwrap();
        assert_eq!(cfg.db_path, "data/receipts.db");
        assert_eq!(cfg.embedding.backend, EmbeddingBackend::Lexical);
    }
}
