//! Instrument token cache
//!
//! Scrip -> broker instrument token mappings, cached for the configured TTL
//! and bounded by an LRU. The clock is injected so freshness is testable
//! without sleeping; an explicit `invalidate` supports force-refresh.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// Resolved broker instrument identity for a scrip
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentToken {
    pub symbol_token: String,
    pub trading_symbol: String,
    pub scrip_full_name: String,
}

/// Clock seam for freshness checks
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Wall clock
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

struct CachedToken {
    token: InstrumentToken,
    cached_at: SystemTime,
}

/// TTL + LRU bounded token cache
pub struct InstrumentCache {
    entries: Mutex<LruCache<String, CachedToken>>,
    ttl: Duration,
    clock: Box<dyn Clock>,
}

impl InstrumentCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self::with_clock(capacity, ttl, Box::new(SystemClock))
    }

    pub fn with_clock(capacity: usize, ttl: Duration, clock: Box<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("non-zero capacity");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            clock,
        }
    }

    /// Fresh cached token for a key, if present
    pub fn get(&self, key: &str) -> Option<InstrumentToken> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().expect("cache lock");

        match entries.get(key) {
            Some(cached) => {
                let fresh = now
                    .duration_since(cached.cached_at)
                    .map(|age| age <= self.ttl)
                    .unwrap_or(false);
                if fresh {
                    Some(cached.token.clone())
                } else {
                    entries.pop(key);
                    None
                }
            }
            None => None,
        }
    }

    pub fn insert(&self, key: impl Into<String>, token: InstrumentToken) {
        let cached = CachedToken {
            token,
            cached_at: self.clock.now(),
        };
        self.entries.lock().expect("cache lock").put(key.into(), cached);
    }

    /// Drop one mapping (force-refresh path)
    pub fn invalidate(&self, key: &str) {
        self.entries.lock().expect("cache lock").pop(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::UNIX_EPOCH;

    struct ManualClock {
        seconds: AtomicU64,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                seconds: AtomicU64::new(1_000_000),
            }
        }

        fn advance(&self, secs: u64) {
            self.seconds.fetch_add(secs, Ordering::SeqCst);
        }
    }

    impl Clock for &'static ManualClock {
        fn now(&self) -> SystemTime {
            UNIX_EPOCH + Duration::from_secs(self.seconds.load(Ordering::SeqCst))
        }
    }

    fn token(symbol: &str) -> InstrumentToken {
        InstrumentToken {
            symbol_token: "2885".to_string(),
            trading_symbol: format!("{}-EQ", symbol),
            scrip_full_name: symbol.to_string(),
        }
    }

    #[test]
    fn test_hit_within_ttl() {
        let cache = InstrumentCache::new(16, Duration::from_secs(60));
        cache.insert("RELIANCE", token("RELIANCE"));

        assert_eq!(cache.get("RELIANCE"), Some(token("RELIANCE")));
        assert_eq!(cache.get("TCS"), None);
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let clock: &'static ManualClock = Box::leak(Box::new(ManualClock::new()));
        let cache = InstrumentCache::with_clock(16, Duration::from_secs(60), Box::new(clock));

        cache.insert("RELIANCE", token("RELIANCE"));
        clock.advance(30);
        assert!(cache.get("RELIANCE").is_some());

        clock.advance(31);
        assert!(cache.get("RELIANCE").is_none());
    }

    #[test]
    fn test_invalidate_forces_miss() {
        let cache = InstrumentCache::new(16, Duration::from_secs(60));
        cache.insert("RELIANCE", token("RELIANCE"));
        cache.invalidate("RELIANCE");

        assert!(cache.get("RELIANCE").is_none());
    }

    #[test]
    fn test_lru_bound_evicts_oldest() {
        let cache = InstrumentCache::new(2, Duration::from_secs(60));
        cache.insert("A", token("A"));
        cache.insert("B", token("B"));
        cache.insert("C", token("C"));

        assert!(cache.get("A").is_none());
        assert!(cache.get("B").is_some());
        assert!(cache.get("C").is_some());
    }
}
