//! Product catalog seam.
//!
//! The catalog is shared by every normalization call, so writes go through
//! `upsert_product`, which is insert-if-absent on the normalized name.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Canonical product entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub normalized_name: String,
    pub category: String,
    pub brand: Option<String>,
    /// Not serialized (too large, can be recomputed).
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

pub trait ProductCatalog: Send + Sync {
    /// Every product, ordered by id.
    fn all_products(&self) -> Result<Vec<Product>>;

    /// Top `k` products by cosine similarity, best first. Products without an
    /// embedding are not searchable.
    fn nearest(&self, embedding: &[f32], k: usize) -> Result<Vec<(Product, f32)>>;

    /// Insert unless a product with the same normalized name exists; either way
    /// return the stored product.
    fn upsert_product(&self, name: &str, category: &str, brand: Option<&str>) -> Result<Product>;

    fn set_embedding(&self, product_id: i64, embedding: &[f32]) -> Result<()>;
}

/// Lower-case, apostrophes dropped, other punctuation to spaces, whitespace collapsed.
pub fn normalize_name(s: &str) -> String {
    let mapped: String = s
        .to_lowercase()
        .chars()
        .filter(|c| *c != '\'' && *c != '’')
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cosine similarity; 0.0 for mismatched dimensions or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
