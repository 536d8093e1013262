use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::prices::{PriceHistory, window_start};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShoppingListItem {
    pub product_id: i64,
    pub quantity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemPrice {
    pub product_id: i64,
    pub quantity: f64,
    pub unit_price: f64,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRecommendation {
    pub store_id: i64,
    pub store_name: String,
    /// Cost of the items this store can supply.
    pub total_cost: f64,
    pub items: Vec<ItemPrice>,
    pub missing_items: Vec<i64>,
    /// Sells every item on the list. Ranking is by cost alone, so the first
    /// recommendation may be incomplete; `multi_store` compares against the
    /// cheapest complete store when there is one.
    pub complete: bool,
    /// Same items at the market average price.
    pub market_average_cost: f64,
    pub savings_vs_average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreAllocation {
    pub store_id: i64,
    pub store_name: String,
    pub items: Vec<ItemPrice>,
    pub subtotal: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiStoreRecommendation {
    pub allocations: Vec<StoreAllocation>,
    pub total_cost: f64,
    pub unavailable_items: Vec<i64>,
    pub best_single_store_id: Option<i64>,
    pub best_single_store_total: Option<f64>,
    pub savings: f64,
    pub store_count: usize,
}

/// Recent prices for one product: latest unit price per store, and the
/// mean of each store's window average.
struct ProductPrices {
    latest: BTreeMap<i64, f64>,
    market_average: f64,
}

pub struct ShoppingOptimizer {
    history: Arc<dyn PriceHistory>,
    clock: Arc<dyn Clock>,
    window_days: i64,
}

impl ShoppingOptimizer {
    pub fn new(history: Arc<dyn PriceHistory>, clock: Arc<dyn Clock>, window_days: i64) -> Self {
        Self {
            history,
            clock,
            window_days,
        }
    }

    /// Every store with recent prices for at least one item, cheapest first.
    pub fn single_store(&self, items: &[ShoppingListItem]) -> Vec<StoreRecommendation> {
        match self.try_single_store(items) {
            Ok(ranked) => ranked,
            Err(e) => {
                warn!(error = %e, "Single-store optimisation failed");
                Vec::new()
            }
        }
    }

    /// Greedy per-item allocation to the cheapest recent store.
    pub fn multi_store(&self, items: &[ShoppingListItem]) -> MultiStoreRecommendation {
        match self.try_multi_store(items) {
            Ok(rec) => rec,
            Err(e) => {
                warn!(error = %e, "Multi-store optimisation failed");
                MultiStoreRecommendation::default()
            }
        }
    }

    fn try_single_store(&self, items: &[ShoppingListItem]) -> Result<Vec<StoreRecommendation>> {
        let prices = self.collect_prices(items)?;
        let stores: BTreeSet<i64> = prices
            .values()
            .flat_map(|p| p.latest.keys().copied())
            .collect();

        let mut ranked = Vec::with_capacity(stores.len());
        for store_id in stores {
            let mut lines = Vec::new();
            let mut missing = Vec::new();
            let mut market = 0.0;

            for item in items {
                let found = prices
                    .get(&item.product_id)
                    .and_then(|p| p.latest.get(&store_id).map(|u| (*u, p.market_average)));
                match found {
                    Some((unit_price, average)) => {
                        lines.push(item_price(item, unit_price));
                        market += average * item.quantity;
                    }
                    None => missing.push(item.product_id),
                }
            }

            let total: f64 = lines.iter().map(|l| l.cost).sum();
            ranked.push(StoreRecommendation {
                store_id,
                store_name: self.store_name(store_id)?,
                total_cost: cents(total),
                items: lines,
                complete: missing.is_empty(),
                missing_items: missing,
                market_average_cost: cents(market),
                savings_vs_average: cents(market - total),
            });
        }

        ranked.sort_by(|a, b| {
            a.total_cost
                .total_cmp(&b.total_cost)
                .then(a.missing_items.len().cmp(&b.missing_items.len()))
                .then(a.store_id.cmp(&b.store_id))
        });
        debug!(stores = ranked.len(), items = items.len(), "Single-store ranking");
        Ok(ranked)
    }

    fn try_multi_store(&self, items: &[ShoppingListItem]) -> Result<MultiStoreRecommendation> {
        let prices = self.collect_prices(items)?;

        let mut by_store: BTreeMap<i64, Vec<ItemPrice>> = BTreeMap::new();
        let mut unavailable = Vec::new();
        for item in items {
            // BTreeMap order makes ties go to the lowest store id
            let cheapest = prices.get(&item.product_id).and_then(|p| {
                p.latest
                    .iter()
                    .min_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(s, u)| (*s, *u))
            });
            match cheapest {
                Some((store_id, unit_price)) => by_store
                    .entry(store_id)
                    .or_default()
                    .push(item_price(item, unit_price)),
                None => unavailable.push(item.product_id),
            }
        }

        let mut allocations = Vec::with_capacity(by_store.len());
        for (store_id, lines) in by_store {
            let subtotal: f64 = lines.iter().map(|l| l.cost).sum();
            allocations.push(StoreAllocation {
                store_id,
                store_name: self.store_name(store_id)?,
                items: lines,
                subtotal: cents(subtotal),
            });
        }
        let total: f64 = allocations
            .iter()
            .flat_map(|a| a.items.iter())
            .map(|l| l.cost)
            .sum();

        // Compare like with like: the first complete store in the ranking, or
        // failing that the cheapest of the most complete ones, priced against
        // multi-store cost of the same items.
        let single = self.try_single_store(items)?;
        let best = single.iter().find(|r| r.complete).or_else(|| {
            single.iter().min_by(|a, b| {
                a.missing_items
                    .len()
                    .cmp(&b.missing_items.len())
                    .then(a.total_cost.total_cmp(&b.total_cost))
            })
        });
        let savings = best.map_or(0.0, |best| {
            let covered: BTreeSet<i64> = best.items.iter().map(|l| l.product_id).collect();
            let multi_covered: f64 = allocations
                .iter()
                .flat_map(|a| a.items.iter())
                .filter(|l| covered.contains(&l.product_id))
                .map(|l| l.cost)
                .sum();
            (best.total_cost - multi_covered).max(0.0)
        });

        let rec = MultiStoreRecommendation {
            store_count: allocations.len(),
            allocations,
            total_cost: cents(total),
            unavailable_items: unavailable,
            best_single_store_id: best.map(|b| b.store_id),
            best_single_store_total: best.map(|b| b.total_cost),
            savings: cents(savings),
        };
        debug!(
            stores = rec.store_count,
            total = rec.total_cost,
            savings = rec.savings,
            "Multi-store allocation"
        );
        Ok(rec)
    }

    fn collect_prices(&self, items: &[ShoppingListItem]) -> Result<BTreeMap<i64, ProductPrices>> {
        let since = window_start(self.clock.today(), self.window_days);
        let mut prices = BTreeMap::new();

        for item in items {
            if prices.contains_key(&item.product_id) {
                continue;
            }
            let observations = self.history.observations(item.product_id, None, since)?;
            if observations.is_empty() {
                continue;
            }

            let mut latest = BTreeMap::new();
            let mut sums: BTreeMap<i64, (f64, usize)> = BTreeMap::new();
            // oldest first, so the last write per store is the newest
            for obs in &observations {
                latest.insert(obs.store_id, obs.unit_price);
                let entry = sums.entry(obs.store_id).or_insert((0.0, 0));
                entry.0 += obs.unit_price;
                entry.1 += 1;
            }
            let market_average = sums.values().map(|(s, n)| s / *n as f64).sum::<f64>()
                / sums.len() as f64;

            prices.insert(
                item.product_id,
                ProductPrices {
                    latest,
                    market_average,
                },
            );
        }
        Ok(prices)
    }

    fn store_name(&self, store_id: i64) -> Result<String> {
        Ok(self
            .history
            .store_name(store_id)?
            .unwrap_or_else(|| format!("store {store_id}")))
    }
}

fn item_price(item: &ShoppingListItem, unit_price: f64) -> ItemPrice {
    ItemPrice {
        product_id: item.product_id,
        quantity: item.quantity,
        unit_price,
        cost: item.quantity * unit_price,
    }
}

fn cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ProductCatalog;
    use crate::clock::ManualClock;
    use crate::error::ReceiptError;
    use crate::prices::{LastPrice, PriceObservation, PriceTracker};
    use crate::receipt_db::ReceiptStore;
    use time::Date;
    use time::macros::date;

    const TODAY: Date = date!(2024 - 03 - 01);

    struct Market {
        store: Arc<ReceiptStore>,
        tracker: PriceTracker,
        optimizer: ShoppingOptimizer,
    }

    impl Market {
        fn new() -> Self {
            let store = Arc::new(ReceiptStore::open_in_memory().unwrap());
            let clock = Arc::new(ManualClock::at_date(TODAY));
            Self {
                tracker: PriceTracker::new(store.clone(), clock.clone()),
                optimizer: ShoppingOptimizer::new(store.clone(), clock, 30),
                store,
            }
        }

        fn product(&self, name: &str) -> i64 {
            self.store.upsert_product(name, "other", None).unwrap().id
        }

        fn shop(&self, name: &str) -> i64 {
            self.store.upsert_store(name).unwrap()
        }

        fn price(&self, product: i64, store: i64, price: f64, date: Date) {
            self.tracker
                .record(product, store, price, 1.0, "pcs", date)
                .unwrap();
        }
    }

    fn list(items: &[(i64, f64)]) -> Vec<ShoppingListItem> {
        items
            .iter()
            .map(|&(product_id, quantity)| ShoppingListItem {
                product_id,
                quantity,
            })
            .collect()
    }

    #[test]
    fn test_single_item_two_stores() {
        let m = Market::new();
        let a = m.product("Apple");
        let x = m.shop("store x");
        let y = m.shop("store y");
        m.price(a, x, 1.00, date!(2024 - 02 - 20));
        m.price(a, y, 1.50, date!(2024 - 02 - 21));

        let items = list(&[(a, 1.0)]);
        let single = m.optimizer.single_store(&items);
        assert_eq!(single.len(), 2);
        assert_eq!(single[0].store_id, x);
        assert_eq!(single[0].store_name, "store x");
        assert_eq!(single[0].total_cost, 1.0);
        assert_eq!(single[0].market_average_cost, 1.25);
        assert_eq!(single[0].savings_vs_average, 0.25);
        assert_eq!(single[1].savings_vs_average, -0.25);

        let multi = m.optimizer.multi_store(&items);
        assert_eq!(multi.allocations.len(), 1);
        assert_eq!(multi.allocations[0].store_id, x);
        assert_eq!(multi.total_cost, 1.0);
        assert_eq!(multi.savings, 0.0);
        assert_eq!(multi.best_single_store_id, Some(x));
    }

    #[test]
    fn test_split_basket_saves() {
        let m = Market::new();
        let (milk, bread) = (m.product("Milk"), m.product("Bread"));
        let (x, y) = (m.shop("x"), m.shop("y"));
        m.price(milk, x, 1.00, date!(2024 - 02 - 20));
        m.price(bread, x, 3.00, date!(2024 - 02 - 20));
        m.price(milk, y, 1.40, date!(2024 - 02 - 20));
        m.price(bread, y, 2.00, date!(2024 - 02 - 20));

        let items = list(&[(milk, 2.0), (bread, 1.0)]);
        let single = m.optimizer.single_store(&items);
        assert_eq!(single[0].store_id, y);
        assert_eq!(single[0].total_cost, 4.8);

        let multi = m.optimizer.multi_store(&items);
        assert_eq!(multi.store_count, 2);
        assert_eq!(multi.total_cost, 4.0);
        assert_eq!(multi.savings, 0.8);
        assert!(multi.total_cost <= single[0].total_cost);

        let at_x = multi.allocations.iter().find(|a| a.store_id == x).unwrap();
        assert_eq!(at_x.items.len(), 1);
        assert_eq!(at_x.items[0].product_id, milk);
        assert_eq!(at_x.subtotal, 2.0);
    }

    #[test]
    fn test_missing_items_reported() {
        let m = Market::new();
        let (milk, bread, eggs) = (m.product("Milk"), m.product("Bread"), m.product("Eggs"));
        let (x, y) = (m.shop("x"), m.shop("y"));
        m.price(milk, x, 1.00, date!(2024 - 02 - 20));
        m.price(milk, y, 1.20, date!(2024 - 02 - 20));
        m.price(bread, y, 2.00, date!(2024 - 02 - 20));

        let items = list(&[(milk, 1.0), (bread, 1.0), (eggs, 1.0)]);
        let single = m.optimizer.single_store(&items);
        assert_eq!(single[0].store_id, x);
        assert_eq!(single[0].missing_items, vec![bread, eggs]);
        assert_eq!(single[1].missing_items, vec![eggs]);
        assert!(single.iter().all(|r| !r.complete));

        let multi = m.optimizer.multi_store(&items);
        assert_eq!(multi.unavailable_items, vec![eggs]);
        assert_eq!(multi.total_cost, 3.0);
        // y carries the most items; multi pays 3.00 for what y sells at 3.20
        assert_eq!(multi.best_single_store_id, Some(y));
        assert_eq!(multi.savings, 0.2);
    }

    #[test]
    fn test_best_single_store_is_first_complete() {
        let m = Market::new();
        let (milk, bread) = (m.product("Milk"), m.product("Bread"));
        let (x, y) = (m.shop("x"), m.shop("y"));
        m.price(milk, x, 0.80, date!(2024 - 02 - 20));
        m.price(milk, y, 1.00, date!(2024 - 02 - 20));
        m.price(bread, y, 2.00, date!(2024 - 02 - 20));

        let items = list(&[(milk, 1.0), (bread, 1.0)]);
        let single = m.optimizer.single_store(&items);
        assert_eq!(single[0].store_id, x);
        assert!(!single[0].complete);

        let first_complete = single.iter().find(|r| r.complete).unwrap();
        assert_eq!(first_complete.store_id, y);

        let multi = m.optimizer.multi_store(&items);
        assert_eq!(multi.best_single_store_id, Some(y));
        assert_eq!(multi.best_single_store_total, Some(3.0));
        assert!(multi.total_cost <= first_complete.total_cost);
        assert_eq!(multi.savings, 0.2);
    }

    #[test]
    fn test_oversized_window_does_not_panic() {
        let store = Arc::new(ReceiptStore::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::at_date(TODAY));
        let tracker = PriceTracker::new(store.clone(), clock.clone());
        let optimizer = ShoppingOptimizer::new(store.clone(), clock, i64::MAX);

        let a = store.upsert_product("Apple", "fruit", None).unwrap().id;
        let x = store.upsert_store("x").unwrap();
        tracker.record(a, x, 1.0, 1.0, "pcs", date!(2005 - 01 - 01)).unwrap();

        let single = optimizer.single_store(&list(&[(a, 1.0)]));
        assert_eq!(single.len(), 1);
        assert!(single[0].complete);
    }

    #[test]
    fn test_stale_prices_ignored() {
        let m = Market::new();
        let a = m.product("Apple");
        let (x, y) = (m.shop("x"), m.shop("y"));
        m.price(a, x, 0.50, date!(2023 - 12 - 01));
        m.price(a, y, 1.50, date!(2024 - 02 - 25));

        let single = m.optimizer.single_store(&list(&[(a, 1.0)]));
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].store_id, y);
    }

    #[test]
    fn test_latest_price_per_store_wins() {
        let m = Market::new();
        let a = m.product("Apple");
        let x = m.shop("x");
        m.price(a, x, 2.00, date!(2024 - 02 - 10));
        m.price(a, x, 1.00, date!(2024 - 02 - 25));

        let single = m.optimizer.single_store(&list(&[(a, 1.0)]));
        assert_eq!(single[0].total_cost, 1.0);
        assert_eq!(single[0].market_average_cost, 1.5);
    }

    #[test]
    fn test_multi_never_beats_full_coverage_single() {
        let m = Market::new();
        let products: Vec<i64> = (0..4).map(|i| m.product(&format!("item {i}"))).collect();
        let stores: Vec<i64> = (0..3).map(|i| m.shop(&format!("shop {i}"))).collect();
        for (pi, &p) in products.iter().enumerate() {
            for (si, &s) in stores.iter().enumerate() {
                let price = 1.0 + ((pi * 7 + si * 3) % 5) as f64 * 0.25;
                m.price(p, s, price, date!(2024 - 02 - 20));
            }
        }

        let items: Vec<ShoppingListItem> = products
            .iter()
            .enumerate()
            .map(|(i, &p)| ShoppingListItem {
                product_id: p,
                quantity: (i + 1) as f64,
            })
            .collect();
        let single = m.optimizer.single_store(&items);
        let multi = m.optimizer.multi_store(&items);
        assert!(single[0].missing_items.is_empty());
        assert!(multi.total_cost <= single[0].total_cost);
        assert!(multi.savings >= 0.0);
    }

    #[test]
    fn test_empty_inputs() {
        let m = Market::new();
        assert!(m.optimizer.single_store(&[]).is_empty());
        assert_eq!(m.optimizer.multi_store(&[]), MultiStoreRecommendation::default());

        let unknown = list(&[(999, 1.0)]);
        assert!(m.optimizer.single_store(&unknown).is_empty());
        assert_eq!(m.optimizer.multi_store(&unknown).unavailable_items, vec![999]);
    }

    struct BrokenHistory;

    impl PriceHistory for BrokenHistory {
        fn insert_observation(&self, _obs: &PriceObservation) -> Result<i64> {
            Err(ReceiptError::Lock("unavailable".into()))
        }
        fn observations(
            &self,
            _p: i64,
            _s: Option<i64>,
            _since: Date,
        ) -> Result<Vec<PriceObservation>> {
            Err(ReceiptError::Lock("unavailable".into()))
        }
        fn update_last_price(&self, _p: i64, _price: f64, _date: Date) -> Result<()> {
            Err(ReceiptError::Lock("unavailable".into()))
        }
        fn last_price(&self, _p: i64) -> Result<Option<LastPrice>> {
            Err(ReceiptError::Lock("unavailable".into()))
        }
        fn store_name(&self, _s: i64) -> Result<Option<String>> {
            Err(ReceiptError::Lock("unavailable".into()))
        }
    }

    #[test]
    fn test_collaborator_failure_yields_empty() {
        let optimizer = ShoppingOptimizer::new(
            Arc::new(BrokenHistory),
            Arc::new(ManualClock::at_date(TODAY)),
            30,
        );
        let items = list(&[(1, 1.0)]);
        assert!(optimizer.single_store(&items).is_empty());
        assert_eq!(optimizer.multi_store(&items), MultiStoreRecommendation::default());
    }
}
