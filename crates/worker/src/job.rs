use oracle_core::domain::metric::PricePoint;
use oracle_core::forecast::{Forecast, Forecaster};
use oracle_core::ingest::history::load_history;
use oracle_core::ingest::provider::MarketDataSource;
use oracle_core::storage::writer::write_prediction;
use oracle_core::storage::{MetricStore, UpsertOutcome};

#[derive(Debug, Clone)]
pub struct JobOptions {
    pub symbol: String,
    pub lookback_days: usize,
}

/// Loaded history and the forecast made from it, not yet written.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub history: Vec<PricePoint>,
    pub forecast: Forecast,
}

#[derive(Debug, Clone)]
pub struct JobReport {
    pub prepared: Prepared,
    pub outcome: UpsertOutcome,
}

pub async fn prepare(
    source: &dyn MarketDataSource,
    forecaster: &dyn Forecaster,
    opts: &JobOptions,
) -> anyhow::Result<Prepared> {
    let history = load_history(source, &opts.symbol, opts.lookback_days).await?;
    let forecast = forecaster.forecast(&opts.symbol, &history)?;

    let s = &forecast.summary;
    tracing::info!(
        symbol = %opts.symbol,
        model_version = forecaster.model_version(),
        forecast_date = %forecast.date,
        points = s.points,
        slope = s.slope,
        intercept = s.intercept,
        r2 = s.r2,
        fit_mae = s.mae,
        fit_rmse = s.rmse,
        std_error = s.std_error,
        predicted_price = forecast.predicted_price,
        lower = forecast.interval.lower,
        upper = forecast.interval.upper,
        confidence = forecast.confidence_score,
        "fitted linear trend"
    );

    Ok(Prepared { history, forecast })
}

pub async fn persist(
    store: &dyn MetricStore,
    forecaster: &dyn Forecaster,
    opts: &JobOptions,
    prepared: Prepared,
) -> anyhow::Result<JobReport> {
    let outcome = write_prediction(
        store,
        &opts.symbol,
        forecaster.model_version(),
        &prepared.history,
        &prepared.forecast,
    )
    .await?;

    Ok(JobReport { prepared, outcome })
}

/// Load, forecast and write in sequence. Any step's error ends the run.
pub async fn run(
    source: &dyn MarketDataSource,
    forecaster: &dyn Forecaster,
    store: &dyn MetricStore,
    opts: &JobOptions,
) -> anyhow::Result<JobReport> {
    let prepared = prepare(source, forecaster, opts).await?;
    persist(store, forecaster, opts, prepared).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use oracle_core::error::OracleError;
    use oracle_core::forecast::LinearTrendForecaster;
    use oracle_core::ingest::types::DailyClose;
    use oracle_core::storage::MemoryMetricStore;

    struct Scripted(Vec<DailyClose>);

    #[async_trait::async_trait]
    impl MarketDataSource for Scripted {
        fn provider_name(&self) -> &'static str {
            "scripted"
        }

        async fn fetch_daily_closes(
            &self,
            _symbol: &str,
            _window_days: usize,
        ) -> anyhow::Result<Vec<DailyClose>> {
            Ok(self.0.clone())
        }
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 9, day).unwrap()
    }

    fn closes(days: std::ops::RangeInclusive<u32>) -> Vec<DailyClose> {
        days.map(|day| DailyClose {
            date: d(day),
            close: Some(60000.0 + 100.0 * day as f64),
        })
        .collect()
    }

    fn opts() -> JobOptions {
        JobOptions {
            symbol: "BTC-USD".to_string(),
            lookback_days: 60,
        }
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let store = MemoryMetricStore::new();
        let source = Scripted(closes(1..=10));
        let forecaster = LinearTrendForecaster::default();

        let first = run(&source, &forecaster, &store, &opts()).await.unwrap();
        let rows_after_first = store.rows_since("BTC-USD", "linear_v1", d(1)).await.unwrap();
        run(&source, &forecaster, &store, &opts()).await.unwrap();
        let rows_after_second = store.rows_since("BTC-USD", "linear_v1", d(1)).await.unwrap();

        assert_eq!(first.prepared.forecast.date, d(11));
        assert_eq!(store.len().await, 11);
        assert_eq!(rows_after_first, rows_after_second);
    }

    #[tokio::test]
    async fn next_run_settles_previous_forecast() {
        let store = MemoryMetricStore::new();
        let forecaster = LinearTrendForecaster::default();

        run(&Scripted(closes(1..=10)), &forecaster, &store, &opts())
            .await
            .unwrap();
        run(&Scripted(closes(1..=11)), &forecaster, &store, &opts())
            .await
            .unwrap();

        let settled = store.settled_rows("BTC-USD", "linear_v1", 10).await.unwrap();
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].date, d(11));
        assert_eq!(settled[0].actual_price, Some(61100.0));
        assert_eq!(settled[0].predicted_price(), Some(61100.0));
        assert_eq!(store.len().await, 12);
    }

    #[tokio::test]
    async fn insufficient_history_writes_nothing() {
        let store = MemoryMetricStore::new();
        let err = run(
            &Scripted(closes(1..=1)),
            &LinearTrendForecaster::default(),
            &store,
            &opts(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<OracleError>(),
            Some(OracleError::DataUnavailable { .. })
        ));
        assert!(store.is_empty().await);
    }
}
