use crate::domain::metric::PricePoint;
use crate::error::OracleError;
use crate::ingest::provider::MarketDataSource;
use crate::ingest::types::DailyClose;
use std::collections::BTreeMap;

/// Fewest points a trend can be fit through.
pub const MIN_HISTORY_POINTS: usize = 2;

/// Loads the most recent `window_days` usable closes for `symbol`, oldest first.
///
/// Any upstream failure, and any response with fewer than two usable points after cleaning,
/// becomes [`OracleError::DataUnavailable`]. No retries.
pub async fn load_history(
    source: &dyn MarketDataSource,
    symbol: &str,
    window_days: usize,
) -> anyhow::Result<Vec<PricePoint>> {
    if window_days < MIN_HISTORY_POINTS {
        return Err(OracleError::data_unavailable(
            symbol,
            format!("window_days must be >= {MIN_HISTORY_POINTS} (got {window_days})"),
        )
        .into());
    }

    let raw = source
        .fetch_daily_closes(symbol, window_days)
        .await
        .map_err(|e| {
            OracleError::data_unavailable(
                symbol,
                format!("{} fetch failed: {e:#}", source.provider_name()),
            )
        })?;

    let raw_len = raw.len();
    let points = sanitize(raw, window_days);

    if points.len() < MIN_HISTORY_POINTS {
        return Err(OracleError::data_unavailable(
            symbol,
            format!(
                "need at least {MIN_HISTORY_POINTS} usable closes, got {} of {raw_len}",
                points.len()
            ),
        )
        .into());
    }

    tracing::info!(
        %symbol,
        provider = source.provider_name(),
        raw_len,
        kept = points.len(),
        first = %points[0].date,
        last = %points[points.len() - 1].date,
        "loaded price history"
    );

    Ok(points)
}

/// Drops unusable closes, collapses duplicate dates (last wins), sorts oldest first and keeps the
/// trailing `window_days` points.
pub fn sanitize(raw: Vec<DailyClose>, window_days: usize) -> Vec<PricePoint> {
    let mut by_date = BTreeMap::new();
    for item in raw {
        let Some(close) = item.close else {
            continue;
        };
        if !close.is_finite() || close <= 0.0 {
            continue;
        }
        by_date.insert(item.date, close);
    }

    let skip = by_date.len().saturating_sub(window_days);
    by_date
        .into_iter()
        .skip(skip)
        .map(|(date, close)| PricePoint { date, close })
        .collect()
}
