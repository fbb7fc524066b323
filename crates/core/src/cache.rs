use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Populate-on-miss cache whose entries expire `ttl` after insertion. There is no explicit
/// invalidation; expired entries are dropped on the next insert.
pub struct TtlCache<K, V> {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    entries: tokio::sync::Mutex<HashMap<K, Entry<V>>>,
}

struct Entry<V> {
    inserted_at: DateTime<Utc>,
    value: V,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            clock,
            ttl,
            entries: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|e| now - e.inserted_at < self.ttl)
            .map(|e| e.value.clone())
    }

    pub async fn insert(&self, key: K, value: V) {
        let now = self.clock.now();
        let ttl = self.ttl;
        let mut entries = self.entries.lock().await;
        entries.retain(|_, e| now - e.inserted_at < ttl);
        entries.insert(
            key,
            Entry {
                inserted_at: now,
                value,
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn serves_until_ttl_then_expires() {
        let clock = clock();
        let cache: TtlCache<&str, i32> = TtlCache::new(clock.clone(), Duration::hours(1));

        assert_eq!(cache.get(&"k").await, None);
        cache.insert("k", 7).await;

        clock.advance(Duration::minutes(59));
        assert_eq!(cache.get(&"k").await, Some(7));

        clock.advance(Duration::minutes(1));
        assert_eq!(cache.get(&"k").await, None);
    }

    #[tokio::test]
    async fn insert_drops_expired_entries() {
        let clock = clock();
        let cache: TtlCache<&str, i32> = TtlCache::new(clock.clone(), Duration::hours(1));
        cache.insert("old", 1).await;
        clock.advance(Duration::hours(2));
        cache.insert("new", 2).await;

        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get(&"new").await, Some(2));
    }
}
