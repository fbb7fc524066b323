use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Audit row for one worker run.
#[derive(Debug, Clone)]
pub struct ForecastRun<'a> {
    pub symbol: &'a str,
    pub model_version: &'a str,
    pub forecast_date: Option<NaiveDate>,
    pub provider: &'a str,
    pub status: RunStatus,
    pub error: Option<&'a str>,
    pub details: Option<Value>,
}

pub async fn record_forecast_run(pool: &sqlx::PgPool, run: ForecastRun<'_>) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    let generated_at: DateTime<Utc> = Utc::now();

    sqlx::query(
        "INSERT INTO forecast_runs (id, symbol, model_version, forecast_date, generated_at, provider, status, error, details) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .persistent(false)
    .bind(id)
    .bind(run.symbol)
    .bind(run.model_version)
    .bind(run.forecast_date)
    .bind(generated_at)
    .bind(run.provider)
    .bind(run.status.as_str())
    .bind(run.error)
    .bind(run.details)
    .execute(pool)
    .await
    .context("insert forecast_runs failed")?;

    Ok(id)
}
