use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{Instrument, info, info_span, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::normalize::cache::TtlCache;
use crate::normalize::embedding::build_embedder;
use crate::normalize::{NormalizationResult, ProductNormalizer};
use crate::prices::{PriceObservation, PriceTracker};
use crate::receipt::{ParsedItem, ParsedReceipt, ReceiptParser};
use crate::receipt_db::{ReceiptStore, StoredReceipt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Processed,
    NeedsReview,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptStatus::Processed => "processed",
            ReceiptStatus::NeedsReview => "needs_review",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedItem {
    pub item: ParsedItem,
    pub normalization: NormalizationResult,
    /// Whether a price observation was written for this line.
    pub recorded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedReceipt {
    pub uid: String,
    pub parsed: ParsedReceipt,
    pub items: Vec<ProcessedItem>,
    pub store_id: Option<i64>,
    pub status: ReceiptStatus,
}

/// Parse, normalize, record. One call per receipt.
pub struct ReceiptPipeline {
    parser: ReceiptParser,
    normalizer: ProductNormalizer,
    tracker: PriceTracker,
    store: Arc<ReceiptStore>,
    clock: Arc<dyn Clock>,
}

impl ReceiptPipeline {
    pub fn new(
        parser: ReceiptParser,
        normalizer: ProductNormalizer,
        tracker: PriceTracker,
        store: Arc<ReceiptStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            parser,
            normalizer,
            tracker,
            store,
            clock,
        }
    }

    /// Wire every stage from configuration against a shared store.
    pub async fn from_config(cfg: &Config, store: Arc<ReceiptStore>) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let embedder = build_embedder(&cfg.embedding).await?;
        let cache = Arc::new(TtlCache::new(
            time::Duration::hours(cfg.normalizer.cache_ttl_hours),
            clock.clone(),
        ));
        let normalizer =
            ProductNormalizer::new(store.clone(), embedder, cache, &cfg.normalizer);
        let tracker = PriceTracker::new(store.clone(), clock.clone());

        Ok(Self::new(
            ReceiptParser::new(&cfg.parser),
            normalizer,
            tracker,
            store,
            clock,
        ))
    }

    pub fn store(&self) -> &Arc<ReceiptStore> {
        &self.store
    }

    pub fn tracker(&self) -> &PriceTracker {
        &self.tracker
    }

    /// Run one receipt's text through every stage and persist the outcome.
    ///
    /// Items are handled in receipt order. Prices are only recorded when the
    /// store is known, the price is positive and the receipt has not been
    /// ingested before.
    pub async fn process_text(&self, text: &str) -> Result<ProcessedReceipt> {
        let uid = ReceiptStore::generate_uid(text);
        let span = info_span!("receipt", uid = %&uid[..12]);
        self.process_with_uid(uid, text).instrument(span).await
    }

    async fn process_with_uid(&self, uid: String, text: &str) -> Result<ProcessedReceipt> {
        let parsed = self.parser.parse(text);
        let already_ingested = self.store.get_receipt(&uid)?.is_some();
        if already_ingested {
            info!("Receipt already ingested, prices will not be recorded again");
        }

        let store_id = match &parsed.store {
            Some(guess) => Some(self.store.upsert_store(&guess.name)?),
            None => None,
        };
        let date = parsed.date.unwrap_or_else(|| self.clock.today());

        let mut items = Vec::with_capacity(parsed.items.len());
        let mut observations = Vec::new();
        for item in &parsed.items {
            let item_span = info_span!("item", line = item.line_number);
            let normalization = match self
                .normalizer
                .normalize(&item.description)
                .instrument(item_span)
                .await
            {
                Ok(n) => n,
                Err(e) => {
                    warn!(
                        error = %e,
                        description = %item.description,
                        "Normalization failed, item skipped"
                    );
                    continue;
                }
            };

            let observation = match store_id {
                Some(store_id) if !already_ingested && item.price > 0.0 => {
                    Some(PriceObservation::new(
                        normalization.generic_product_id,
                        store_id,
                        item.price,
                        item.quantity,
                        &item.unit,
                        date,
                    ))
                }
                _ => None,
            };

            items.push(ProcessedItem {
                item: item.clone(),
                normalization,
                recorded: observation.is_some(),
            });
            observations.extend(observation);
        }

        let status = if parsed.needs_review() {
            ReceiptStatus::NeedsReview
        } else {
            ReceiptStatus::Processed
        };

        // observations and the receipt row commit together
        let receipt = StoredReceipt {
            uid: uid.clone(),
            store_id,
            receipt_date: parsed.date,
            total: parsed.total,
            item_count: items.len(),
            status: status.as_str().to_string(),
            parsed_json: serde_json::to_string(&parsed)?,
        };
        self.store.record_receipt(&observations, &receipt)?;

        info!(
            store = ?parsed.store.as_ref().map(|s| s.name.as_str()),
            items = items.len(),
            recorded = items.iter().filter(|i| i.recorded).count(),
            status = status.as_str(),
            "Receipt processed"
        );

        Ok(ProcessedReceipt {
            uid,
            parsed,
            items,
            store_id,
            status,
        })
    }
}
