use crate::domain::metric::{Prediction, PredictionInterval, PricePoint};
use crate::error::OracleError;
use crate::eval::round_to;
use crate::forecast::Forecast;
use crate::storage::{MetricStore, UpsertBatch, UpsertOutcome};

/// Merges a run's realized closes and its forecast into the store in one upsert.
///
/// Actual rows only touch `actual_price`; the forecast row only touches the prediction columns.
/// Store failures come back as [`OracleError::Persistence`] and are not retried.
pub async fn write_prediction(
    store: &dyn MetricStore,
    symbol: &str,
    model_version: &str,
    actuals: &[PricePoint],
    forecast: &Forecast,
) -> anyhow::Result<UpsertOutcome> {
    let batch = build_batch(symbol, model_version, actuals, forecast)
        .map_err(|e| OracleError::persistence("validate", &e))?;

    let t0 = std::time::Instant::now();
    let outcome = store
        .upsert(&batch)
        .await
        .map_err(|e| OracleError::persistence("upsert", &e))?;

    tracing::info!(
        %symbol,
        %model_version,
        forecast_date = %forecast.date,
        actual_rows = outcome.actual_rows,
        forecast_rows = outcome.forecast_rows,
        elapsed_ms = t0.elapsed().as_millis(),
        "upserted metric rows"
    );

    Ok(outcome)
}

pub fn build_batch(
    symbol: &str,
    model_version: &str,
    actuals: &[PricePoint],
    forecast: &Forecast,
) -> anyhow::Result<UpsertBatch> {
    let symbol = symbol.trim();
    anyhow::ensure!(!symbol.is_empty(), "symbol must be non-empty");
    let model_version = model_version.trim();
    anyhow::ensure!(!model_version.is_empty(), "model_version must be non-empty");

    for p in actuals {
        anyhow::ensure!(
            p.date < forecast.date,
            "actual for {} is not before forecast date {}",
            p.date,
            forecast.date
        );
        anyhow::ensure!(
            p.close.is_finite() && p.close > 0.0,
            "actual for {} must be a positive price (got {})",
            p.date,
            p.close
        );
    }

    anyhow::ensure!(
        forecast.predicted_price.is_finite()
            && forecast.interval.lower.is_finite()
            && forecast.interval.upper.is_finite(),
        "forecast for {} is not finite",
        forecast.date
    );

    Ok(UpsertBatch {
        symbol: symbol.to_string(),
        model_version: model_version.to_string(),
        actuals: actuals.to_vec(),
        forecast: Some((forecast.date, stored_prediction(&forecast.to_prediction()))),
    })
}

// Prices are stored in cents, confidence to four places.
fn stored_prediction(p: &Prediction) -> Prediction {
    Prediction {
        price: round_to(p.price, 2),
        confidence_score: p.confidence_score.map(|c| round_to(c, 4).clamp(0.0, 1.0)),
        interval: p.interval.map(|i| PredictionInterval {
            lower: round_to(i.lower, 2),
            upper: round_to(i.upper, 2),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::{Forecaster, LinearTrendForecaster};
    use crate::storage::MemoryMetricStore;
    use chrono::NaiveDate;

    fn history() -> Vec<PricePoint> {
        let start = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        [64010.123, 64500.5, 63980.0, 65120.75]
            .iter()
            .enumerate()
            .map(|(i, c)| PricePoint {
                date: start + chrono::Duration::days(i as i64),
                close: *c,
            })
            .collect()
    }

    #[tokio::test]
    async fn same_day_rerun_changes_nothing() {
        let store = MemoryMetricStore::new();
        let hist = history();
        let forecast = LinearTrendForecaster::default()
            .forecast("BTC-USD", &hist)
            .unwrap();

        write_prediction(&store, "BTC-USD", "linear_v1", &hist, &forecast)
            .await
            .unwrap();
        let since = hist[0].date;
        let before = store.rows_since("BTC-USD", "linear_v1", since).await.unwrap();

        write_prediction(&store, "BTC-USD", "linear_v1", &hist, &forecast)
            .await
            .unwrap();
        let after = store.rows_since("BTC-USD", "linear_v1", since).await.unwrap();

        assert_eq!(before.len(), hist.len() + 1);
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn stores_rounded_forecast() {
        let store = MemoryMetricStore::new();
        let hist = history();
        let forecast = LinearTrendForecaster::default()
            .forecast("BTC-USD", &hist)
            .unwrap();

        write_prediction(&store, "BTC-USD", "linear_v1", &hist, &forecast)
            .await
            .unwrap();

        let row = store
            .get("BTC-USD", "linear_v1", forecast.date)
            .await
            .unwrap();
        let p = row.prediction.unwrap();
        assert_eq!(p.price, round_to(forecast.predicted_price, 2));
        assert_eq!(p.confidence_score, Some(round_to(forecast.confidence_score, 4)));
        assert!(p.interval.is_some());
        assert_eq!(row.actual_price, None);
    }

    #[tokio::test]
    async fn rejects_actual_on_or_after_forecast_date() {
        let store = MemoryMetricStore::new();
        let hist = history();
        let forecast = LinearTrendForecaster::default()
            .forecast("BTC-USD", &hist)
            .unwrap();
        let mut bad = hist.clone();
        bad.push(PricePoint {
            date: forecast.date,
            close: 1.0,
        });

        let err = write_prediction(&store, "BTC-USD", "linear_v1", &bad, &forecast)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OracleError>(),
            Some(OracleError::Persistence { stage: "validate", .. })
        ));
        assert!(store.is_empty().await);
    }
}
