use crate::domain::metric::{MetricRecord, MetricRow};
use crate::storage::{MetricStore, UpsertBatch, UpsertOutcome};
use anyhow::Context;
use chrono::NaiveDate;

const DEFAULT_UPSERT_BATCH: usize = 100;

const ROW_COLUMNS: &str = "date, symbol, model_version, actual_price, predicted_price, \
     confidence_score, prediction_lower_bound, prediction_upper_bound, created_at";

/// `crypto_metrics` in Postgres.
#[derive(Debug, Clone)]
pub struct PgMetricStore {
    pool: sqlx::PgPool,
    batch_size: usize,
}

impl PgMetricStore {
    pub fn new(pool: sqlx::PgPool) -> anyhow::Result<Self> {
        let batch_size: usize = std::env::var("METRICS_UPSERT_BATCH")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(DEFAULT_UPSERT_BATCH);

        anyhow::ensure!(batch_size >= 1, "METRICS_UPSERT_BATCH must be >= 1");

        Ok(Self { pool, batch_size })
    }
}

#[async_trait::async_trait]
impl MetricStore for PgMetricStore {
    async fn upsert(&self, batch: &UpsertBatch) -> anyhow::Result<UpsertOutcome> {
        let mut tx = self.pool.begin().await.context("begin transaction failed")?;
        let mut outcome = UpsertOutcome::default();

        let mut batch_idx: usize = 0;
        for chunk in batch.actuals.chunks(self.batch_size) {
            batch_idx += 1;
            let t0 = std::time::Instant::now();
            let mut qb = sqlx::QueryBuilder::new(
                "INSERT INTO crypto_metrics (date, symbol, model_version, actual_price) ",
            );
            qb.push_values(chunk, |mut b, p| {
                b.push_bind(p.date)
                    .push_bind(&batch.symbol)
                    .push_bind(&batch.model_version)
                    .push_bind(p.close);
            });
            // Prediction columns are left as they are.
            qb.push(
                " ON CONFLICT (date, symbol, model_version) DO UPDATE \
                   SET actual_price = EXCLUDED.actual_price",
            );

            let res = qb
                .build()
                .persistent(false)
                .execute(&mut *tx)
                .await
                .context("batch upsert crypto_metrics actuals failed")?;
            outcome.actual_rows += res.rows_affected();

            tracing::debug!(
                symbol = %batch.symbol,
                batch_idx,
                batch_size = chunk.len(),
                elapsed_ms = t0.elapsed().as_millis(),
                "crypto_metrics actuals batch upsert"
            );
        }

        if let Some((date, prediction)) = &batch.forecast {
            let interval = prediction.interval;
            let res = sqlx::query(
                "INSERT INTO crypto_metrics (date, symbol, model_version, predicted_price, confidence_score, \
                 prediction_lower_bound, prediction_upper_bound) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 ON CONFLICT (date, symbol, model_version) DO UPDATE \
                 SET predicted_price = EXCLUDED.predicted_price, \
                     confidence_score = EXCLUDED.confidence_score, \
                     prediction_lower_bound = EXCLUDED.prediction_lower_bound, \
                     prediction_upper_bound = EXCLUDED.prediction_upper_bound",
            )
            .persistent(false)
            .bind(date)
            .bind(&batch.symbol)
            .bind(&batch.model_version)
            .bind(prediction.price)
            .bind(prediction.confidence_score)
            .bind(interval.map(|i| i.lower))
            .bind(interval.map(|i| i.upper))
            .execute(&mut *tx)
            .await
            .context("upsert crypto_metrics forecast failed")?;
            outcome.forecast_rows += res.rows_affected();
        }

        tx.commit().await.context("commit transaction failed")?;
        Ok(outcome)
    }

    async fn rows_since(
        &self,
        symbol: &str,
        model_version: &str,
        since: NaiveDate,
    ) -> anyhow::Result<Vec<MetricRecord>> {
        let rows = sqlx::query_as::<_, MetricRow>(&format!(
            "SELECT {ROW_COLUMNS} FROM crypto_metrics \
             WHERE symbol = $1 AND model_version = $2 AND date >= $3 \
             ORDER BY date ASC"
        ))
        .persistent(false)
        .bind(symbol)
        .bind(model_version)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .context("select crypto_metrics chart rows failed")?;

        Ok(into_records(rows))
    }

    async fn settled_rows(
        &self,
        symbol: &str,
        model_version: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<MetricRecord>> {
        let rows = sqlx::query_as::<_, MetricRow>(&format!(
            "SELECT {ROW_COLUMNS} FROM crypto_metrics \
             WHERE symbol = $1 AND model_version = $2 \
               AND actual_price IS NOT NULL AND predicted_price IS NOT NULL \
             ORDER BY date DESC \
             LIMIT $3"
        ))
        .persistent(false)
        .bind(symbol)
        .bind(model_version)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("select crypto_metrics settled rows failed")?;

        Ok(into_records(rows))
    }
}

// Rows that break the record invariants are skipped, not fatal to the whole read.
fn into_records(rows: Vec<MetricRow>) -> Vec<MetricRecord> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        match row.validate_and_into_record() {
            Ok(rec) => out.push(rec),
            Err(err) => tracing::warn!(error = %err, "skipping invalid crypto_metrics row"),
        }
    }
    out
}
