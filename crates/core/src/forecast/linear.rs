use crate::config::{DEFAULT_MODEL_VERSION, DEFAULT_TRAINING_WINDOW};
use crate::domain::metric::{PredictionInterval, PricePoint};
use crate::error::OracleError;
use crate::forecast::{FitSummary, Forecast, Forecaster};
use crate::ingest::history::MIN_HISTORY_POINTS;
use anyhow::Context;

/// Two-sided ~95% normal quantile.
pub const Z_95: f64 = 1.96;

/// Ordinary least squares of close on day index, extrapolated one step.
#[derive(Debug, Clone)]
pub struct LinearTrendForecaster {
    model_version: String,
    training_window: usize,
    z: f64,
}

impl Default for LinearTrendForecaster {
    fn default() -> Self {
        Self {
            model_version: DEFAULT_MODEL_VERSION.to_string(),
            training_window: DEFAULT_TRAINING_WINDOW,
            z: Z_95,
        }
    }
}

impl LinearTrendForecaster {
    pub fn new(model_version: &str, training_window: usize) -> anyhow::Result<Self> {
        anyhow::ensure!(
            training_window >= MIN_HISTORY_POINTS,
            "training window must be >= {MIN_HISTORY_POINTS} (got {training_window})"
        );
        anyhow::ensure!(
            !model_version.trim().is_empty(),
            "model_version must be non-empty"
        );
        Ok(Self {
            model_version: model_version.trim().to_string(),
            training_window,
            z: Z_95,
        })
    }
}

impl Forecaster for LinearTrendForecaster {
    fn model_version(&self) -> &str {
        &self.model_version
    }

    fn forecast(&self, symbol: &str, history: &[PricePoint]) -> anyhow::Result<Forecast> {
        if history.len() < MIN_HISTORY_POINTS {
            return Err(OracleError::data_unavailable(
                symbol,
                format!(
                    "cannot fit a trend through {} point(s)",
                    history.len()
                ),
            )
            .into());
        }

        let window = &history[history.len().saturating_sub(self.training_window)..];
        let last = window[window.len() - 1];
        let date = last
            .date
            .succ_opt()
            .with_context(|| format!("no calendar day after {}", last.date))?;

        let closes: Vec<f64> = window.iter().map(|p| p.close).collect();
        let fit = fit_ols(&closes);

        let predicted_price = fit.intercept + fit.slope * closes.len() as f64;
        let half_width = self.z * fit.summary.std_error;

        if fit.degenerate {
            tracing::warn!(%symbol, points = closes.len(), "zero-variance history; confidence set to 0");
        }

        Ok(Forecast {
            date,
            predicted_price,
            interval: PredictionInterval {
                lower: predicted_price - half_width,
                upper: predicted_price + half_width,
            },
            confidence_score: if fit.degenerate {
                0.0
            } else {
                fit.summary.r2.clamp(0.0, 1.0)
            },
            degenerate: fit.degenerate,
            summary: fit.summary,
        })
    }
}

struct OlsFit {
    slope: f64,
    intercept: f64,
    degenerate: bool,
    summary: FitSummary,
}

// Caller guarantees ys.len() >= 2, so the x variance is never zero.
fn fit_ols(ys: &[f64]) -> OlsFit {
    let n = ys.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = ys.iter().sum::<f64>() / n;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut sst = 0.0;
    for (i, y) in ys.iter().enumerate() {
        let dx = i as f64 - x_mean;
        let dy = y - y_mean;
        sxx += dx * dx;
        sxy += dx * dy;
        sst += dy * dy;
    }

    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;

    let mut ssr = 0.0;
    let mut abs_sum = 0.0;
    for (i, y) in ys.iter().enumerate() {
        let r = y - (intercept + slope * i as f64);
        ssr += r * r;
        abs_sum += r.abs();
    }

    // Relative tolerance: float noise on a flat series must not read as variance.
    let degenerate = sst <= 1e-12 * n * y_mean.abs().max(1.0).powi(2);
    let r2 = if degenerate { 0.0 } else { 1.0 - ssr / sst };

    // Population standard deviation of residuals. Two points fit exactly, so the width is 0.
    let std_error = if ys.len() == MIN_HISTORY_POINTS {
        0.0
    } else {
        (ssr / n).sqrt()
    };

    OlsFit {
        slope,
        intercept,
        degenerate,
        summary: FitSummary {
            points: ys.len(),
            slope,
            intercept,
            r2,
            mae: abs_sum / n,
            rmse: (ssr / n).sqrt(),
            std_error,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn series(closes: &[f64]) -> Vec<PricePoint> {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| PricePoint {
                date: start + chrono::Duration::days(i as i64),
                close: *c,
            })
            .collect()
    }

    #[test]
    fn perfect_line_extrapolates_exactly() {
        let f = LinearTrendForecaster::default()
            .forecast("BTC-USD", &series(&[100.0, 110.0, 120.0]))
            .unwrap();
        assert!((f.predicted_price - 130.0).abs() < 1e-9);
        assert!(f.interval.width().abs() < 1e-9);
        assert!((f.confidence_score - 1.0).abs() < 1e-12);
        assert!(!f.degenerate);
        assert_eq!(f.date, NaiveDate::from_ymd_opt(2026, 1, 4).unwrap());
    }

    #[test]
    fn two_points_have_zero_width() {
        let f = LinearTrendForecaster::default()
            .forecast("BTC-USD", &series(&[100.0, 90.0]))
            .unwrap();
        assert!((f.predicted_price - 80.0).abs() < 1e-9);
        assert_eq!(f.interval.width(), 0.0);
        assert_eq!(f.interval.lower, f.predicted_price);
    }

    #[test]
    fn flat_series_is_degenerate_with_zero_confidence() {
        let f = LinearTrendForecaster::default()
            .forecast("BTC-USD", &series(&[40500.0; 10]))
            .unwrap();
        assert!(f.degenerate);
        assert_eq!(f.confidence_score, 0.0);
        assert!((f.predicted_price - 40500.0).abs() < 1e-6);
        assert!(f.confidence_score.is_finite());
    }

    #[test]
    fn noisy_series_brackets_prediction() {
        let f = LinearTrendForecaster::default()
            .forecast("BTC-USD", &series(&[100.0, 104.0, 101.0, 108.0, 106.0, 112.0]))
            .unwrap();
        assert!(f.interval.lower < f.predicted_price);
        assert!(f.predicted_price < f.interval.upper);
        assert!((0.0..=1.0).contains(&f.confidence_score));
        let half = (f.interval.upper - f.interval.lower) / 2.0;
        assert!((half - Z_95 * f.summary.std_error).abs() < 1e-9);
    }

    #[test]
    fn uses_only_training_window() {
        // Old points trend down; the last three trend up by 10.
        let f = LinearTrendForecaster::new("linear_v1", 3)
            .unwrap()
            .forecast("BTC-USD", &series(&[500.0, 400.0, 300.0, 100.0, 110.0, 120.0]))
            .unwrap();
        assert!((f.predicted_price - 130.0).abs() < 1e-9);
        assert_eq!(f.summary.points, 3);
    }

    #[test]
    fn rejects_single_point() {
        let err = LinearTrendForecaster::default()
            .forecast("BTC-USD", &series(&[100.0]))
            .unwrap_err();
        assert!(err.downcast_ref::<OracleError>().is_some());
    }

    #[test]
    fn rejects_tiny_training_window() {
        assert!(LinearTrendForecaster::new("linear_v1", 1).is_err());
    }
}
