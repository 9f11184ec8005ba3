//! Single-value cache with a time-to-live.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Holds one computed value and the instant it was stored. Readers share
/// the value through an `Arc`; a store swaps the whole slot at once.
pub struct TtlCache<T> {
    ttl: Duration,
    slot: RwLock<Option<(Instant, Arc<T>)>>,
}

impl<T> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    /// The cached value, if it was stored less than `ttl` before `now`.
    pub fn get_at(&self, now: Instant) -> Option<Arc<T>> {
        let slot = self.slot.read().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some((stored_at, value)) if now.saturating_duration_since(*stored_at) < self.ttl => {
                Some(value.clone())
            }
            _ => None,
        }
    }

    pub fn put_at(&self, now: Instant, value: T) -> Arc<T> {
        let value = Arc::new(value);
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some((now, value.clone()));
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_then_expire() {
        let cache = TtlCache::new(Duration::from_secs(30));
        let t0 = Instant::now();
        assert!(cache.get_at(t0).is_none());

        cache.put_at(t0, 1u32);
        assert_eq!(cache.get_at(t0 + Duration::from_secs(29)).as_deref(), Some(&1));
        assert!(cache.get_at(t0 + Duration::from_secs(30)).is_none());

        cache.put_at(t0 + Duration::from_secs(31), 2u32);
        assert_eq!(cache.get_at(t0 + Duration::from_secs(32)).as_deref(), Some(&2));
    }

    #[test]
    fn test_zero_ttl_never_hits() {
        let cache = TtlCache::new(Duration::ZERO);
        let now = Instant::now();
        cache.put_at(now, "x");
        assert!(cache.get_at(now).is_none());
    }
}
