use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::{Date, Duration};
use tracing::debug;

use crate::clock::Clock;
use crate::error::Result;

/// One price seen on one receipt. `unit_price` is per `unit`, which is always a base unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub product_id: i64,
    pub store_id: i64,
    pub price: f64,
    pub unit_price: f64,
    pub unit: String,
    pub date: Date,
}

impl PriceObservation {
    /// Build an observation, converting the line price to a base-unit price.
    pub fn new(
        product_id: i64,
        store_id: i64,
        price: f64,
        quantity: f64,
        unit: &str,
        date: Date,
    ) -> Self {
        let (per_unit, base_unit) = unit_price(price, quantity, unit);
        Self {
            product_id,
            store_id,
            price,
            unit_price: per_unit,
            unit: base_unit,
            date,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LastPrice {
    pub price: f64,
    pub date: Date,
}

/// Append-only price store plus the per-product last-price cache.
pub trait PriceHistory: Send + Sync {
    fn insert_observation(&self, obs: &PriceObservation) -> Result<i64>;

    /// Observations on or after `since`, oldest first.
    fn observations(
        &self,
        product_id: i64,
        store_id: Option<i64>,
        since: Date,
    ) -> Result<Vec<PriceObservation>>;

    fn update_last_price(&self, product_id: i64, price: f64, date: Date) -> Result<()>;

    fn last_price(&self, product_id: i64) -> Result<Option<LastPrice>>;

    fn store_name(&self, store_id: i64) -> Result<Option<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTrend {
    pub direction: TrendDirection,
    /// First to last observation, in percent.
    pub change_percent: f64,
    pub predicted_price: Option<f64>,
    pub confidence: f64,
    pub observations: usize,
}

/// Moves beyond ±5 % count as a trend.
const TREND_THRESHOLD_PERCENT: f64 = 5.0;

pub struct PriceTracker {
    history: Arc<dyn PriceHistory>,
    clock: Arc<dyn Clock>,
}

impl PriceTracker {
    pub fn new(history: Arc<dyn PriceHistory>, clock: Arc<dyn Clock>) -> Self {
        Self { history, clock }
    }

    /// Append an observation and refresh the product's last known price.
    /// Callers are expected to supply dates in receipt order.
    pub fn record(
        &self,
        product_id: i64,
        store_id: i64,
        price: f64,
        quantity: f64,
        unit: &str,
        date: Date,
    ) -> Result<PriceObservation> {
        let obs = PriceObservation::new(product_id, store_id, price, quantity, unit, date);
        let id = self.history.insert_observation(&obs)?;
        self.history.update_last_price(product_id, price, date)?;
        debug!(
            observation_id = id,
            product_id,
            store_id,
            price,
            unit_price = obs.unit_price,
            date = %date,
            "Price recorded"
        );
        Ok(obs)
    }

    pub fn last_price(&self, product_id: i64) -> Result<Option<LastPrice>> {
        self.history.last_price(product_id)
    }

    /// Trend over all stores' observations in the last `window_days`.
    pub fn trend(&self, product_id: i64, window_days: i64) -> Result<PriceTrend> {
        let since = window_start(self.clock.today(), window_days);
        let prices: Vec<f64> = self
            .history
            .observations(product_id, None, since)?
            .iter()
            .map(|o| o.unit_price)
            .collect();
        Ok(compute_trend(&prices))
    }
}

/// Longest window honoured; anything larger already reaches `Date::MIN`.
const MAX_WINDOW_DAYS: i64 = 3_660_000;

/// First day of a look-back window ending `today`. Negative windows are
/// empty and oversized ones start at the earliest representable date.
pub fn window_start(today: Date, window_days: i64) -> Date {
    let days = window_days.clamp(0, MAX_WINDOW_DAYS);
    today.checked_sub(Duration::days(days)).unwrap_or(Date::MIN)
}

/// Price per base unit (kg, l, or the item's own unit for counted goods).
pub fn unit_price(price: f64, quantity: f64, unit: &str) -> (f64, String) {
    let (factor, base) = match unit.trim().to_lowercase().as_str() {
        "kg" => (1.0, "kg"),
        "g" => (0.001, "kg"),
        "lb" => (0.453_592, "kg"),
        "oz" => (0.028_349_5, "kg"),
        "l" => (1.0, "l"),
        "cl" => (0.01, "l"),
        "ml" => (0.001, "l"),
        "" => (1.0, "pcs"),
        other => return (per_quantity(price, quantity), other.to_string()),
    };
    (per_quantity(price, quantity * factor), base.to_string())
}

fn per_quantity(price: f64, quantity: f64) -> f64 {
    let raw = if quantity > 0.0 { price / quantity } else { price };
    (raw * 10_000.0).round() / 10_000.0
}

/// Direction, regression forecast and consistency of a price series.
pub fn compute_trend(prices: &[f64]) -> PriceTrend {
    let n = prices.len();
    let (Some(&first), Some(&last)) = (prices.first(), prices.last()) else {
        return PriceTrend {
            direction: TrendDirection::Stable,
            change_percent: 0.0,
            predicted_price: None,
            confidence: 0.0,
            observations: 0,
        };
    };

    if n == 1 {
        return PriceTrend {
            direction: TrendDirection::Stable,
            change_percent: 0.0,
            predicted_price: Some(first),
            confidence: 0.0,
            observations: 1,
        };
    }

    let change_percent = if first != 0.0 {
        (last - first) / first * 100.0
    } else {
        0.0
    };
    let direction = if change_percent > TREND_THRESHOLD_PERCENT {
        TrendDirection::Up
    } else if change_percent < -TREND_THRESHOLD_PERCENT {
        TrendDirection::Down
    } else {
        TrendDirection::Stable
    };

    // least squares over (index, price)
    let nf = n as f64;
    let mean_x = (nf - 1.0) / 2.0;
    let mean_y = prices.iter().sum::<f64>() / nf;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, y) in prices.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxy += dx * (y - mean_y);
        sxx += dx * dx;
    }
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    let intercept = mean_y - slope * mean_x;
    let predicted = (intercept + slope * nf).max(0.0);

    let variance = prices.iter().map(|p| (p - mean_y).powi(2)).sum::<f64>() / nf;
    let std_dev = variance.sqrt();
    let confidence = if mean_y > 0.0 {
        (1.0 - std_dev / mean_y).clamp(0.0, 1.0)
    } else if std_dev == 0.0 {
        1.0
    } else {
        0.0
    };

    PriceTrend {
        direction,
        change_percent: (change_percent * 100.0).round() / 100.0,
        predicted_price: Some((predicted * 100.0).round() / 100.0),
        confidence,
        observations: n,
    }
}
