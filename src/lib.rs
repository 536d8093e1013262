pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod normalize;
pub mod optimizer;
pub mod pipeline;
pub mod prices;
pub mod receipt;
pub mod receipt_db;

pub use error::{ReceiptError, Result};
pub use normalize::{MatchStrategy, NormalizationResult, ProductNormalizer};
pub use optimizer::{
    MultiStoreRecommendation, ShoppingListItem, ShoppingOptimizer, StoreRecommendation,
};
pub use pipeline::{ProcessedReceipt, ReceiptPipeline, ReceiptStatus};
pub use prices::{PriceTracker, PriceTrend, TrendDirection};
pub use receipt::{ParsedItem, ParsedReceipt, ReceiptParser};
pub use receipt_db::ReceiptStore;
