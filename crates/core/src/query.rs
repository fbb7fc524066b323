use crate::cache::{Clock, TtlCache};
use crate::error::OracleError;
use crate::eval::{self, ComparisonRow, PerformanceSnapshot};
use crate::projector::{self, SeriesPoint};
use crate::storage::MetricStore;
use chrono::{DateTime, Days, Duration, NaiveDate};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Chart { days: u32 },
    Comparison { limit: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub symbol: String,
    pub model_version: String,
    pub kind: QueryKind,
}

/// Read side consumed by the dashboard.
///
/// Results are cached per (symbol, model_version, query); store failures are logged and turned
/// into empty results, which are not cached.
pub struct ReadService {
    store: Arc<dyn MetricStore>,
    clock: Arc<dyn Clock>,
    charts: TtlCache<QueryKey, Vec<SeriesPoint>>,
    comparisons: TtlCache<QueryKey, Vec<ComparisonRow>>,
}

impl ReadService {
    pub fn new(store: Arc<dyn MetricStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            store,
            charts: TtlCache::new(clock.clone(), ttl),
            comparisons: TtlCache::new(clock.clone(), ttl),
            clock,
        }
    }

    /// Rows dated within the last `days` days (plus any forecast row ahead of today), oldest first.
    pub async fn chart_series(&self, symbol: &str, model_version: &str, days: u32) -> Vec<SeriesPoint> {
        let key = QueryKey {
            symbol: symbol.to_string(),
            model_version: model_version.to_string(),
            kind: QueryKind::Chart { days },
        };
        if let Some(hit) = self.charts.get(&key).await {
            return hit;
        }

        // Windows reaching past the epoch read the whole table; earlier dates are outside what
        // Postgres accepts.
        let since = self
            .clock
            .now()
            .date_naive()
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN)
            .max(DateTime::UNIX_EPOCH.date_naive());
        match self.store.rows_since(symbol, model_version, since).await {
            Ok(records) => {
                let out = projector::chart_series(&records);
                self.charts.insert(key, out.clone()).await;
                out
            }
            Err(e) => {
                let err = OracleError::query("chart_series", &e);
                tracing::error!(%symbol, %model_version, days, error = %err, "chart query failed; returning empty series");
                Vec::new()
            }
        }
    }

    /// Settled rows, newest first, at most `limit`.
    pub async fn comparison_history(
        &self,
        symbol: &str,
        model_version: &str,
        limit: u32,
    ) -> Vec<ComparisonRow> {
        let key = QueryKey {
            symbol: symbol.to_string(),
            model_version: model_version.to_string(),
            kind: QueryKind::Comparison { limit },
        };
        if let Some(hit) = self.comparisons.get(&key).await {
            return hit;
        }

        match self
            .store
            .settled_rows(symbol, model_version, limit as usize)
            .await
        {
            Ok(records) => {
                let out = eval::comparison_rows(&records);
                self.comparisons.insert(key, out.clone()).await;
                out
            }
            Err(e) => {
                let err = OracleError::query("comparison_history", &e);
                tracing::error!(%symbol, %model_version, limit, error = %err, "comparison query failed; returning empty history");
                Vec::new()
            }
        }
    }

    pub fn performance_snapshot(history: &[ComparisonRow]) -> PerformanceSnapshot {
        eval::performance_snapshot(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::domain::metric::{MetricRecord, Prediction, PredictionInterval, PricePoint};
    use crate::storage::{MemoryMetricStore, UpsertBatch, UpsertOutcome};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, day).unwrap()
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 8, 20, 9, 0, 0).unwrap(),
        ))
    }

    fn prediction(price: f64) -> Prediction {
        Prediction {
            price,
            confidence_score: Some(0.6),
            interval: Some(PredictionInterval {
                lower: price - 50.0,
                upper: price + 50.0,
            }),
        }
    }

    async fn seeded() -> Arc<MemoryMetricStore> {
        let store = Arc::new(MemoryMetricStore::new());
        for day in 1..=20 {
            store
                .upsert(&UpsertBatch {
                    symbol: "BTC-USD".to_string(),
                    model_version: "linear_v1".to_string(),
                    actuals: vec![PricePoint {
                        date: d(day),
                        close: 1000.0 + day as f64,
                    }],
                    forecast: Some((d(day), prediction(1000.0))),
                })
                .await
                .unwrap();
        }
        store
            .insert(MetricRecord::forecast(d(21), "BTC-USD", "linear_v1", prediction(1021.0)))
            .await;
        store
    }

    struct CountingStore {
        inner: Arc<MemoryMetricStore>,
        reads: AtomicUsize,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl MetricStore for CountingStore {
        async fn upsert(&self, batch: &UpsertBatch) -> anyhow::Result<UpsertOutcome> {
            self.inner.upsert(batch).await
        }

        async fn rows_since(
            &self,
            symbol: &str,
            model_version: &str,
            since: NaiveDate,
        ) -> anyhow::Result<Vec<MetricRecord>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            anyhow::ensure!(!self.fail, "connection refused");
            self.inner.rows_since(symbol, model_version, since).await
        }

        async fn settled_rows(
            &self,
            symbol: &str,
            model_version: &str,
            limit: usize,
        ) -> anyhow::Result<Vec<MetricRecord>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            anyhow::ensure!(!self.fail, "connection refused");
            self.inner.settled_rows(symbol, model_version, limit).await
        }
    }

    #[tokio::test]
    async fn chart_covers_window_and_upcoming_forecast() {
        let svc = ReadService::new(seeded().await, clock(), Duration::hours(1));
        let chart = svc.chart_series("BTC-USD", "linear_v1", 7).await;

        assert_eq!(chart.first().map(|p| p.date), Some(d(13)));
        assert_eq!(chart.last().map(|p| p.date), Some(d(21)));
        assert_eq!(chart.last().and_then(|p| p.actual), None);
    }

    #[tokio::test]
    async fn chart_window_wider_than_calendar_returns_everything() {
        let svc = ReadService::new(seeded().await, clock(), Duration::hours(1));
        let chart = svc.chart_series("BTC-USD", "linear_v1", u32::MAX).await;

        assert_eq!(chart.len(), 21);
        assert_eq!(chart.first().map(|p| p.date), Some(d(1)));

        let empty = ReadService::new(Arc::new(MemoryMetricStore::new()), clock(), Duration::hours(1));
        assert!(empty.chart_series("BTC-USD", "linear_v1", u32::MAX).await.is_empty());
    }

    #[tokio::test]
    async fn comparison_feeds_performance_snapshot() {
        let svc = ReadService::new(seeded().await, clock(), Duration::hours(1));
        let history = svc.comparison_history("BTC-USD", "linear_v1", 5).await;

        assert_eq!(history.len(), 5);
        assert_eq!(history[0].point.date, d(20));
        let snap = ReadService::performance_snapshot(&history);
        assert_eq!(snap.total_predictions, 5);
        // errors are 16..=20
        assert_eq!(snap.mae, 18.0);
        assert_eq!(snap.accuracy, 100.0);
    }

    #[tokio::test]
    async fn repeated_reads_hit_cache_until_ttl() {
        let clock = clock();
        let store = Arc::new(CountingStore {
            inner: seeded().await,
            reads: AtomicUsize::new(0),
            fail: false,
        });
        let svc = ReadService::new(store.clone(), clock.clone(), Duration::hours(1));

        svc.comparison_history("BTC-USD", "linear_v1", 5).await;
        svc.comparison_history("BTC-USD", "linear_v1", 5).await;
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);

        svc.comparison_history("BTC-USD", "linear_v1", 6).await;
        assert_eq!(store.reads.load(Ordering::SeqCst), 2);

        clock.advance(Duration::hours(1));
        svc.comparison_history("BTC-USD", "linear_v1", 5).await;
        assert_eq!(store.reads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn store_failure_degrades_to_empty_and_is_not_cached() {
        let store = Arc::new(CountingStore {
            inner: seeded().await,
            reads: AtomicUsize::new(0),
            fail: true,
        });
        let svc = ReadService::new(store.clone(), clock(), Duration::hours(1));

        assert!(svc.chart_series("BTC-USD", "linear_v1", 30).await.is_empty());
        let history = svc.comparison_history("BTC-USD", "linear_v1", 30).await;
        assert!(history.is_empty());
        assert_eq!(
            ReadService::performance_snapshot(&history),
            PerformanceSnapshot::EMPTY
        );

        svc.chart_series("BTC-USD", "linear_v1", 30).await;
        assert_eq!(store.reads.load(Ordering::SeqCst), 3);
    }
}
