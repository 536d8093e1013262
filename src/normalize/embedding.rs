// src/normalize/embedding.rs

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{EmbeddingBackend, EmbeddingSection};
use crate::error::{ReceiptError, Result};

/// Turns a product description into a fixed-size vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

// ---------------------------------------------------------------------------
// Lexical (offline) backend
// ---------------------------------------------------------------------------

/// Feature-hashing embedder over words and character trigrams.
///
/// Deterministic across runs and machines, so stored vectors stay comparable.
/// Similar spellings land close together; synonyms do not.
#[derive(Debug, Clone)]
pub struct LexicalEmbedder {
    dimension: usize,
}

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

impl LexicalEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for word in text.to_lowercase().split_whitespace() {
            self.add_feature(&mut vector, &format!("w:{word}"), WORD_WEIGHT);

            let padded: Vec<char> = format!(" {word} ").chars().collect();
            for tri in padded.windows(3) {
                let tri: String = tri.iter().collect();
                self.add_feature(&mut vector, &format!("t:{tri}"), TRIGRAM_WEIGHT);
            }
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        let index = (u64::from_le_bytes(head) % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign * weight;
    }
}

#[async_trait]
impl Embedder for LexicalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }
}

// ---------------------------------------------------------------------------
// HTTP (OpenAI-compatible) backend
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Resolved endpoint configuration ready to make API calls.
#[derive(Debug, Clone)]
struct ResolvedEndpoint {
    base_url: String,
    model: String,
    api_key: String,
}

fn resolve_endpoint(cfg: &EmbeddingSection) -> Result<ResolvedEndpoint> {
    match cfg.backend {
        EmbeddingBackend::Ollama => {
            info!(
                url = %cfg.ollama.base_url,
                model = %cfg.ollama.model,
                "Using Ollama embedding backend"
            );
            Ok(ResolvedEndpoint {
                base_url: cfg.ollama.base_url.clone(),
                model: cfg.ollama.model.clone(),
                api_key: "ollama".to_string(), // required by API but ignored
            })
        }
        EmbeddingBackend::Remote => {
            let api_key = std::env::var("EMBEDDING_API_KEY").map_err(|_| {
                ReceiptError::Embedding(
                    "EMBEDDING_API_KEY env var required for remote backend".to_string(),
                )
            })?;
            info!(
                url = %cfg.remote.base_url,
                model = %cfg.remote.model,
                "Using remote embedding backend"
            );
            Ok(ResolvedEndpoint {
                base_url: cfg.remote.base_url.clone(),
                model: cfg.remote.model.clone(),
                api_key,
            })
        }
        EmbeddingBackend::Lexical => Err(ReceiptError::Embedding(
            "Lexical backend selected, no HTTP endpoint needed".to_string(),
        )),
    }
}

pub struct HttpEmbedder {
    client: Client,
    endpoint: ResolvedEndpoint,
}

impl HttpEmbedder {
    fn new(endpoint: ResolvedEndpoint) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { client, endpoint })
    }

    /// Ollama's health endpoint sits at the root, not under /v1.
    pub async fn check_health(&self) -> bool {
        let health_url = self
            .endpoint
            .base_url
            .trim_end_matches('/')
            .trim_end_matches("/v1");

        match self
            .client
            .get(health_url)
            .timeout(Duration::from_secs(3))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                info!("Embedding server is reachable");
                true
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "Embedding server returned non-OK status");
                false
            }
            Err(e) => {
                warn!(error = %e, "Embedding server not reachable");
                false
            }
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.endpoint.base_url.trim_end_matches('/'));
        let request = EmbeddingRequest {
            model: &self.endpoint.model,
            input: text,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.endpoint.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ReceiptError::Embedding(format!(
                "embedding API error {status}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = response.json().await?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ReceiptError::Embedding("empty embedding response".to_string()))
    }
}

/// Build the configured backend. An unreachable Ollama server is only logged:
/// semantic matching then falls through to the string-based stages.
pub async fn build_embedder(cfg: &EmbeddingSection) -> Result<Arc<dyn Embedder>> {
    if cfg.backend == EmbeddingBackend::Lexical {
        info!(dimension = cfg.dimension, "Using lexical embedding backend");
        return Ok(Arc::new(LexicalEmbedder::new(cfg.dimension)));
    }

    let embedder = HttpEmbedder::new(resolve_endpoint(cfg)?)?;
    if cfg.backend == EmbeddingBackend::Ollama && !embedder.check_health().await {
        warn!(
            url = %embedder.endpoint.base_url,
            "Ollama is not running. Start it with: ollama serve"
        );
    }
    Ok(Arc::new(embedder))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::cosine_similarity;

    #[test]
    fn test_lexical_is_deterministic_and_normalized() {
        let embedder = LexicalEmbedder::new(128);
        let a = embedder.embed_sync("whole milk");
        let b = embedder.embed_sync("Whole  Milk");
        assert_eq!(a, b);
        assert_eq!(a.len(), 128);

        let norm = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_lexical_similarity_orders_sensibly() {
        let embedder = LexicalEmbedder::new(256);
        let apple = embedder.embed_sync("apple");
        let apples = embedder.embed_sync("apples");
        let detergent = embedder.embed_sync("laundry detergent");

        assert!(cosine_similarity(&apple, &apples) > cosine_similarity(&apple, &detergent));
    }

    #[test]
    fn test_lexical_empty_text_is_zero_vector() {
        let v = LexicalEmbedder::new(16).embed_sync("   ");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_lexical_backend_has_no_endpoint() {
        let cfg = EmbeddingSection::default();
        assert!(matches!(resolve_endpoint(&cfg), Err(ReceiptError::Embedding(_))));
    }

    #[tokio::test]
    async fn test_build_lexical_embedder() {
        let embedder = build_embedder(&EmbeddingSection::default()).await.unwrap();
        let v = embedder.embed("bread").await.unwrap();
        assert_eq!(v.len(), 256);
    }
}
