use crate::domain::metric::{MetricRecord, Prediction, PricePoint};
use anyhow::Context;
use chrono::NaiveDate;

pub mod lock;
pub mod memory;
pub mod metrics;
pub mod runs;
pub mod writer;

pub use memory::MemoryMetricStore;
pub use metrics::PgMetricStore;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

/// Rows to merge into the store for one (symbol, model_version).
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertBatch {
    pub symbol: String,
    pub model_version: String,
    /// Realized closes. Merged into `actual_price` only.
    pub actuals: Vec<PricePoint>,
    /// Forecast row. Merged into the prediction columns only.
    pub forecast: Option<(NaiveDate, Prediction)>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub actual_rows: u64,
    pub forecast_rows: u64,
}

/// Durable table of dated price/prediction rows, unique on (date, symbol, model_version).
///
/// `upsert` is all-or-nothing and idempotent: replaying a batch changes no row count and no values.
#[async_trait::async_trait]
pub trait MetricStore: Send + Sync {
    async fn upsert(&self, batch: &UpsertBatch) -> anyhow::Result<UpsertOutcome>;

    /// Rows dated on or after `since`, oldest first.
    async fn rows_since(
        &self,
        symbol: &str,
        model_version: &str,
        since: NaiveDate,
    ) -> anyhow::Result<Vec<MetricRecord>>;

    /// Rows with both prices present, newest first, at most `limit`.
    async fn settled_rows(
        &self,
        symbol: &str,
        model_version: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<MetricRecord>>;
}
