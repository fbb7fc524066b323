use crate::domain::metric::MetricRecord;
use crate::storage::{MetricStore, UpsertBatch, UpsertOutcome};
use chrono::{NaiveDate, Utc};
use std::collections::BTreeMap;

type Key = (String, String, NaiveDate);

/// Process-local store with the same merge rules as the Postgres table. Used by `--dry-run` and
/// tests.
#[derive(Debug, Default)]
pub struct MemoryMetricStore {
    rows: tokio::sync::Mutex<BTreeMap<Key, MetricRecord>>,
}

impl MemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }

    pub async fn get(
        &self,
        symbol: &str,
        model_version: &str,
        date: NaiveDate,
    ) -> Option<MetricRecord> {
        let key = (symbol.to_string(), model_version.to_string(), date);
        self.rows.lock().await.get(&key).cloned()
    }

    /// Inserts a row as-is, replacing any row with the same key.
    pub async fn insert(&self, record: MetricRecord) {
        let key = (
            record.symbol.clone(),
            record.model_version.clone(),
            record.date,
        );
        self.rows.lock().await.insert(key, record);
    }
}

#[async_trait::async_trait]
impl MetricStore for MemoryMetricStore {
    async fn upsert(&self, batch: &UpsertBatch) -> anyhow::Result<UpsertOutcome> {
        for p in &batch.actuals {
            anyhow::ensure!(
                p.close.is_finite(),
                "actual_price for {} must be finite",
                p.date
            );
        }
        if let Some((date, prediction)) = &batch.forecast {
            if let Some(c) = prediction.confidence_score {
                anyhow::ensure!(
                    (0.0..=1.0).contains(&c),
                    "confidence_score for {date} out of range: {c}"
                );
            }
        }

        let mut rows = self.rows.lock().await;
        let mut outcome = UpsertOutcome::default();
        let now = Utc::now();

        for p in &batch.actuals {
            let key = (batch.symbol.clone(), batch.model_version.clone(), p.date);
            rows.entry(key)
                .and_modify(|r| r.actual_price = Some(p.close))
                .or_insert_with(|| MetricRecord {
                    created_at: Some(now),
                    ..MetricRecord::actual(p.date, &batch.symbol, &batch.model_version, p.close)
                });
            outcome.actual_rows += 1;
        }

        if let Some((date, prediction)) = &batch.forecast {
            let key = (batch.symbol.clone(), batch.model_version.clone(), *date);
            rows.entry(key)
                .and_modify(|r| r.prediction = Some(*prediction))
                .or_insert_with(|| MetricRecord {
                    created_at: Some(now),
                    ..MetricRecord::forecast(*date, &batch.symbol, &batch.model_version, *prediction)
                });
            outcome.forecast_rows += 1;
        }

        Ok(outcome)
    }

    async fn rows_since(
        &self,
        symbol: &str,
        model_version: &str,
        since: NaiveDate,
    ) -> anyhow::Result<Vec<MetricRecord>> {
        let rows = self.rows.lock().await;
        Ok(rows
            .values()
            .filter(|r| r.symbol == symbol && r.model_version == model_version && r.date >= since)
            .cloned()
            .collect())
    }

    async fn settled_rows(
        &self,
        symbol: &str,
        model_version: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<MetricRecord>> {
        let rows = self.rows.lock().await;
        Ok(rows
            .values()
            .rev()
            .filter(|r| r.symbol == symbol && r.model_version == model_version && r.is_settled())
            .take(limit)
            .cloned()
            .collect())
    }
}
