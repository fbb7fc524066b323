use anyhow::Context;
use clap::Parser;
use oracle_core::error::OracleError;
use oracle_core::forecast::{Forecaster, LinearTrendForecaster};
use oracle_core::storage::lock::ForecastLock;
use oracle_core::storage::runs::{ForecastRun, RunStatus};
use oracle_core::storage::{MemoryMetricStore, PgMetricStore};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod job;

#[derive(Debug, Parser)]
#[command(name = "oracle_worker")]
struct Args {
    /// Asset symbol, e.g. BTC-USD. Defaults to ORACLE_SYMBOL.
    #[arg(long)]
    symbol: Option<String>,

    /// Days of history to request from the market data source.
    #[arg(long)]
    lookback_days: Option<usize>,

    /// Most recent points the trend is fit on.
    #[arg(long)]
    training_window: Option<usize>,

    /// Stored with every prediction row.
    #[arg(long)]
    model_version: Option<String>,

    /// Market data provider: yahoo | http_json.
    #[arg(long)]
    provider: Option<String>,

    /// Do everything against an in-memory store instead of the database.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let mut settings = oracle_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    apply_overrides(&mut settings, &args);

    let source = oracle_core::ingest::provider::source_from_settings(&settings)?;
    let forecaster =
        LinearTrendForecaster::new(&settings.model_version, settings.training_window)?;
    let opts = job::JobOptions {
        symbol: settings.symbol.trim().to_string(),
        lookback_days: settings.lookback_days,
    };

    if args.dry_run {
        let store = MemoryMetricStore::new();
        let report = job::run(source.as_ref(), &forecaster, &store, &opts).await?;
        tracing::info!(
            symbol = %opts.symbol,
            dry_run = true,
            forecast_date = %report.prepared.forecast.date,
            predicted_price = report.prepared.forecast.predicted_price,
            rows = store.len().await,
            "forecast run complete (dry-run)"
        );
        return Ok(());
    }

    let db_url = settings.require_database_url()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    oracle_core::storage::migrate(&pool).await?;
    let store = PgMetricStore::new(pool.clone())?;

    let provider = source.provider_name();
    let mut forecast_date = None;

    let result: anyhow::Result<Option<(job::JobReport, _)>> = async {
        let prepared = job::prepare(source.as_ref(), &forecaster, &opts).await?;
        let date = prepared.forecast.date;
        forecast_date = Some(date);

        let lock = ForecastLock::try_acquire(&pool, &opts.symbol, date)
            .await
            .map_err(|e| OracleError::persistence("lock", &e))?;
        let Some(lock) = lock else {
            tracing::warn!(symbol = %opts.symbol, %date, "forecast lock not acquired; another run in progress");
            return Ok(None);
        };

        let report = job::persist(&store, &forecaster, &opts, prepared).await;
        if let Err(e) = lock.release().await {
            tracing::warn!(symbol = %opts.symbol, %date, error = %e, "failed to release forecast lock");
        }
        let report = report?;

        let forecast = &report.prepared.forecast;
        let details = serde_json::json!({
            "history_len": report.prepared.history.len(),
            "actual_rows": report.outcome.actual_rows,
            "forecast_rows": report.outcome.forecast_rows,
            "predicted_price": forecast.predicted_price,
            "confidence_score": forecast.confidence_score,
            "degenerate": forecast.degenerate,
            "fit": serde_json::to_value(forecast.summary).ok(),
        });
        let run_id = oracle_core::storage::runs::record_forecast_run(
            &pool,
            ForecastRun {
                symbol: &opts.symbol,
                model_version: forecaster.model_version(),
                forecast_date,
                provider,
                status: RunStatus::Success,
                error: None,
                details: Some(details),
            },
        )
        .await
        .map_err(|e| OracleError::persistence("run_audit", &e))?;

        Ok(Some((report, run_id)))
    }
    .await;

    match result {
        Ok(Some((report, run_id))) => {
            let forecast = &report.prepared.forecast;
            tracing::info!(
                symbol = %opts.symbol,
                forecast_date = %forecast.date,
                predicted_price = forecast.predicted_price,
                %run_id,
                "forecast run complete"
            );
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            let kind = capture_failure(&err);
            let message = format!("{:#}", err);

            let recorded = oracle_core::storage::runs::record_forecast_run(
                &pool,
                ForecastRun {
                    symbol: &opts.symbol,
                    model_version: forecaster.model_version(),
                    forecast_date,
                    provider,
                    status: RunStatus::Error,
                    error: Some(message.as_str()),
                    details: Some(serde_json::json!({ "kind": kind })),
                },
            )
            .await;
            if let Err(e) = recorded {
                tracing::warn!(error = %e, "failed to record failed forecast run");
            }

            tracing::error!(symbol = %opts.symbol, kind, error = %err, "forecast run failed");
            Err(err)
        }
    }
}

/// Reports a failed run to Sentry and returns its error kind for the run audit.
fn capture_failure(err: &anyhow::Error) -> &'static str {
    sentry_anyhow::capture_anyhow(err);
    err.downcast_ref::<OracleError>()
        .map(|e| e.kind())
        .unwrap_or("unexpected")
}

fn apply_overrides(settings: &mut oracle_core::config::Settings, args: &Args) {
    if let Some(s) = &args.symbol {
        settings.symbol = s.clone();
    }
    if let Some(n) = args.lookback_days {
        settings.lookback_days = n;
    }
    if let Some(n) = args.training_window {
        settings.training_window = n;
    }
    if let Some(v) = &args.model_version {
        settings.model_version = v.clone();
    }
    if let Some(p) = &args.provider {
        settings.market_data_provider = p.clone();
    }
}

fn init_sentry(settings: &oracle_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_run_audit_is_reported_as_persistence_failure() {
        let audit = anyhow::anyhow!("connection reset").context("insert forecast_runs failed");
        let err = anyhow::Error::from(OracleError::persistence("run_audit", &audit));

        let mut kind = "";
        let events = sentry::test::with_captured_events(|| {
            kind = capture_failure(&err);
        });

        assert_eq!(kind, "persistence_error");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn foreign_errors_are_unexpected() {
        let err = anyhow::anyhow!("boom");
        let events = sentry::test::with_captured_events(|| {
            assert_eq!(capture_failure(&err), "unexpected");
        });
        assert_eq!(events.len(), 1);
    }
}
