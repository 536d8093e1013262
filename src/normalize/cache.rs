use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use time::{Duration, OffsetDateTime};

use super::NormalizationResult;
use crate::clock::Clock;

/// Description → result cache. Injected so tests can control expiry.
pub trait NormalizationCache: Send + Sync {
    fn get(&self, key: &str) -> Option<NormalizationResult>;
    fn put(&self, key: &str, result: NormalizationResult);
    fn invalidate(&self, key: &str);
}

/// Cache keys are the trimmed, lower-cased description.
pub fn cache_key(description: &str) -> String {
    description.trim().to_lowercase()
}

/// Expired entries are swept on every this many inserts.
const PURGE_EVERY: usize = 64;

/// In-memory cache with a fixed time-to-live per entry. Expired entries are
/// dropped when read and swept periodically on insert.
pub struct TtlCache {
    entries: RwLock<HashMap<String, (OffsetDateTime, NormalizationResult)>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    inserts: AtomicUsize,
}

impl TtlCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            clock,
            inserts: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let now = self.clock.now();
        if let Ok(mut guard) = self.entries.write() {
            guard.retain(|_, (stored_at, _)| now - *stored_at < self.ttl);
        }
    }
}

impl NormalizationCache for TtlCache {
    fn get(&self, key: &str) -> Option<NormalizationResult> {
        let now = self.clock.now();
        {
            let guard = self.entries.read().ok()?;
            let (stored_at, result) = guard.get(key)?;
            if now - *stored_at < self.ttl {
                return Some(result.clone());
            }
        }

        if let Ok(mut guard) = self.entries.write() {
            if guard
                .get(key)
                .is_some_and(|(stored_at, _)| now - *stored_at >= self.ttl)
            {
                guard.remove(key);
            }
        }
        None
    }

    fn put(&self, key: &str, result: NormalizationResult) {
        if self.inserts.fetch_add(1, Ordering::Relaxed) % PURGE_EVERY == PURGE_EVERY - 1 {
            self.purge_expired();
        }

        let now = self.clock.now();
        if let Ok(mut guard) = self.entries.write() {
            guard.insert(key.to_string(), (now, result));
        }
    }

    fn invalidate(&self, key: &str) {
        if let Ok(mut guard) = self.entries.write() {
            guard.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::normalize::MatchStrategy;
    use time::macros::date;

    fn result(id: i64) -> NormalizationResult {
        NormalizationResult {
            generic_product_id: id,
            generic_product_name: "apple".into(),
            category: "fruit".into(),
            brand: None,
            confidence: 0.9,
            strategy: MatchStrategy::Fuzzy,
        }
    }

    #[test]
    fn test_entries_expire() {
        let clock = Arc::new(ManualClock::at_date(date!(2024 - 01 - 15)));
        let cache = TtlCache::new(Duration::hours(24), clock.clone());

        cache.put("apple", result(1));
        clock.advance(Duration::hours(23));
        assert_eq!(cache.get("apple").map(|r| r.generic_product_id), Some(1));

        clock.advance(Duration::hours(1));
        assert!(cache.get("apple").is_none());

        cache.purge_expired();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expired_read_evicts() {
        let clock = Arc::new(ManualClock::at_date(date!(2024 - 01 - 15)));
        let cache = TtlCache::new(Duration::hours(24), clock.clone());

        cache.put("apple", result(1));
        cache.put("milk", result(2));
        assert_eq!(cache.len(), 2);

        clock.advance(Duration::hours(25));
        assert!(cache.get("apple").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_inserts_sweep_expired_entries() {
        let clock = Arc::new(ManualClock::at_date(date!(2024 - 01 - 15)));
        let cache = TtlCache::new(Duration::hours(24), clock.clone());

        cache.put("apple", result(1));
        cache.put("milk", result(2));
        clock.advance(Duration::hours(25));

        for i in 0..PURGE_EVERY {
            cache.put(&format!("item {i}"), result(i as i64 + 10));
        }
        assert_eq!(cache.len(), PURGE_EVERY);
        assert!(cache.get("item 0").is_some());
    }

    #[test]
    fn test_invalidate() {
        let cache = TtlCache::new(
            Duration::hours(1),
            Arc::new(ManualClock::at_date(date!(2024 - 01 - 15))),
        );
        cache.put("apple", result(1));
        cache.invalidate("apple");
        assert!(cache.get("apple").is_none());
    }

    #[test]
    fn test_cache_key() {
        assert_eq!(cache_key("  Apple RED "), "apple red");
    }
}
