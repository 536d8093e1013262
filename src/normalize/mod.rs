// src/normalize/mod.rs

pub mod brands;
pub mod cache;
pub mod embedding;
pub mod fuzzy;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::catalog::{Product, ProductCatalog, normalize_name};
use crate::config::NormalizerSection;
use crate::error::{ReceiptError, Result};
use cache::{NormalizationCache, cache_key};
use embedding::Embedder;

/// Confidence of a keyword hit, regardless of how many words matched.
const KEYWORD_CONFIDENCE: f64 = 0.5;
/// Confidence of a freshly created catalog entry: it is definitionally itself.
const NEW_PRODUCT_CONFIDENCE: f64 = 1.0;
/// Keyword stage ignores words shorter than this (sizes, codes).
const MIN_KEYWORD_LETTERS: usize = 3;
const UNKNOWN_PRODUCT: &str = "unknown item";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    Semantic,
    Fuzzy,
    Keyword,
    NewProduct,
}

/// One step of the cascade: a strategy and the score it must reach.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeStage {
    pub strategy: MatchStrategy,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationResult {
    pub generic_product_id: i64,
    pub generic_product_name: String,
    pub category: String,
    pub brand: Option<String>,
    pub confidence: f64,
    pub strategy: MatchStrategy,
}

impl NormalizationResult {
    fn from_product(
        product: Product,
        confidence: f64,
        strategy: MatchStrategy,
        brand: Option<String>,
    ) -> Self {
        Self {
            generic_product_id: product.id,
            generic_product_name: product.name,
            category: product.category,
            brand: brand.or(product.brand),
            confidence,
            strategy,
        }
    }
}

/// Resolves free-text item descriptions to catalog products.
pub struct ProductNormalizer {
    catalog: Arc<dyn ProductCatalog>,
    embedder: Arc<dyn Embedder>,
    cache: Arc<dyn NormalizationCache>,
    cascade: Vec<CascadeStage>,
    min_confidence: f64,
    timeout: Duration,
}

impl ProductNormalizer {
    pub fn new(
        catalog: Arc<dyn ProductCatalog>,
        embedder: Arc<dyn Embedder>,
        cache: Arc<dyn NormalizationCache>,
        cfg: &NormalizerSection,
    ) -> Self {
        Self {
            catalog,
            embedder,
            cache,
            cascade: Self::default_cascade(cfg),
            min_confidence: cfg.min_confidence,
            timeout: Duration::from_millis(cfg.timeout_ms),
        }
    }

    /// Semantic, then fuzzy, then keyword.
    pub fn default_cascade(cfg: &NormalizerSection) -> Vec<CascadeStage> {
        vec![
            CascadeStage {
                strategy: MatchStrategy::Semantic,
                threshold: cfg.semantic_threshold,
            },
            CascadeStage {
                strategy: MatchStrategy::Fuzzy,
                threshold: cfg.fuzzy_threshold,
            },
            CascadeStage {
                strategy: MatchStrategy::Keyword,
                threshold: cfg.keyword_threshold,
            },
        ]
    }

    pub fn with_cascade(mut self, cascade: Vec<CascadeStage>) -> Self {
        self.cascade = cascade;
        self
    }

    pub fn cascade(&self) -> &[CascadeStage] {
        &self.cascade
    }

    /// Map a description to a catalog product, creating one when nothing clears
    /// the confidence floor. Only fails if that creation cannot be written.
    pub async fn normalize(&self, description: &str) -> Result<NormalizationResult> {
        let key = cache_key(description);
        if let Some(hit) = self.cache.get(&key) {
            debug!(description = %description, product_id = hit.generic_product_id, "Cache hit");
            return Ok(hit);
        }

        let cleaned = normalize_name(description);
        let (brand, stripped) = brands::extract_brand(&cleaned);
        let query = match (stripped.is_empty(), cleaned.is_empty()) {
            (false, _) => stripped,
            (true, false) => cleaned,
            (true, true) => UNKNOWN_PRODUCT.to_string(),
        };

        let mut embedding: Option<Vec<f32>> = None;

        for stage in &self.cascade {
            let candidate = match stage.strategy {
                MatchStrategy::Semantic => self.semantic_match(&query, &mut embedding).await,
                MatchStrategy::Fuzzy => self.fuzzy_match(&query),
                MatchStrategy::Keyword => self.keyword_match(&query),
                MatchStrategy::NewProduct => None,
            };

            let Some((product, score)) = candidate else {
                debug!(strategy = ?stage.strategy, query = %query, "No candidate");
                continue;
            };
            debug!(
                strategy = ?stage.strategy,
                query = %query,
                candidate = %product.name,
                score,
                threshold = stage.threshold,
                "Cascade candidate"
            );

            if score >= stage.threshold && score >= self.min_confidence {
                let result =
                    NormalizationResult::from_product(product, score, stage.strategy, brand);
                self.cache.put(&key, result.clone());
                return Ok(result);
            }
        }

        let result = self.create_product(&query, brand, embedding).await?;
        self.cache.put(&key, result.clone());
        Ok(result)
    }

    /// Embedding plus nearest-neighbour search under one timeout. Any failure
    /// is "no match".
    async fn semantic_match(
        &self,
        query: &str,
        embedding: &mut Option<Vec<f32>>,
    ) -> Option<(Product, f64)> {
        let search = async {
            let vector = self.embedder.embed(query).await?;
            let catalog = Arc::clone(&self.catalog);
            let query_vec = vector.clone();
            let hits = tokio::task::spawn_blocking(move || catalog.nearest(&query_vec, 1))
                .await
                .map_err(|e| ReceiptError::Embedding(format!("similarity search failed: {e}")))??;
            Ok::<_, ReceiptError>((vector, hits))
        };

        match tokio::time::timeout(self.timeout, search).await {
            Ok(Ok((vector, hits))) => {
                *embedding = Some(vector);
                hits.into_iter()
                    .next()
                    .map(|(product, score)| (product, f64::from(score).clamp(0.0, 1.0)))
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Semantic match failed, falling through");
                None
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Semantic match timed out, falling through"
                );
                None
            }
        }
    }

    /// Best token-set score. Equal scores (a subset scores 100 against every
    /// superset) are decided by plain edit distance, and an exact name wins.
    fn fuzzy_match(&self, query: &str) -> Option<(Product, f64)> {
        let products = self.products()?;

        let mut best: Option<(Product, f64, f64)> = None;
        for product in products {
            if product.normalized_name == query {
                return Some((product, 1.0));
            }
            let score = fuzzy::token_set_ratio(query, &product.normalized_name) / 100.0;
            let tie_break = fuzzy::ratio(query, &product.normalized_name);
            let better = best
                .as_ref()
                .is_none_or(|(_, s, t)| score > *s || (score == *s && tie_break > *t));
            if better {
                best = Some((product, score, tie_break));
            }
        }
        best.map(|(product, score, _)| (product, score))
    }

    fn keyword_match(&self, query: &str) -> Option<(Product, f64)> {
        let words: Vec<&str> = query
            .split_whitespace()
            .filter(|w| w.chars().filter(|c| c.is_alphabetic()).count() >= MIN_KEYWORD_LETTERS)
            .collect();
        if words.is_empty() {
            return None;
        }

        let mut best: Option<(Product, usize)> = None;
        for product in self.products()? {
            let hits = words
                .iter()
                .filter(|w| product.normalized_name.split_whitespace().any(|t| t == **w))
                .count();
            if hits > 0 && best.as_ref().is_none_or(|(_, h)| hits > *h) {
                best = Some((product, hits));
            }
        }
        best.map(|(product, _)| (product, KEYWORD_CONFIDENCE))
    }

    fn products(&self) -> Option<Vec<Product>> {
        match self.catalog.all_products() {
            Ok(products) => Some(products),
            Err(e) => {
                warn!(error = %e, "Catalog unavailable, falling through");
                None
            }
        }
    }

    async fn create_product(
        &self,
        name: &str,
        brand: Option<String>,
        embedding: Option<Vec<f32>>,
    ) -> Result<NormalizationResult> {
        let category = brands::categorize(name);
        let product = self.catalog.upsert_product(name, category, brand.as_deref())?;

        if product.embedding.is_none() {
            let vector = match embedding {
                Some(v) => Some(v),
                None => self.embed_with_timeout(name).await,
            };
            if let Some(vector) = vector {
                if let Err(e) = self.catalog.set_embedding(product.id, &vector) {
                    warn!(error = %e, product_id = product.id, "Failed to store embedding");
                }
            }
        }

        info!(
            product_id = product.id,
            name = %product.name,
            category = %product.category,
            brand = ?brand,
            "New catalog product"
        );
        Ok(NormalizationResult::from_product(
            product,
            NEW_PRODUCT_CONFIDENCE,
            MatchStrategy::NewProduct,
            brand,
        ))
    }

    async fn embed_with_timeout(&self, text: &str) -> Option<Vec<f32>> {
        match tokio::time::timeout(self.timeout, self.embedder.embed(text)).await {
            Ok(Ok(v)) => Some(v),
            Ok(Err(e)) => {
                warn!(error = %e, "Embedding failed");
                None
            }
            Err(_) => {
                warn!("Embedding timed out");
                None
            }
        }
    }
}
