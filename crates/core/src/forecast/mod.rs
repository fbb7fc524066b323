use crate::domain::metric::{PredictionInterval, PricePoint, Prediction};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub mod linear;

pub use linear::LinearTrendForecaster;

/// One-step-ahead forecast for the day after the last historical date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub date: NaiveDate,
    pub predicted_price: f64,
    pub interval: PredictionInterval,
    pub confidence_score: f64,
    /// Zero-variance input; confidence is pinned to 0.
    pub degenerate: bool,
    pub summary: FitSummary,
}

impl Forecast {
    pub fn to_prediction(&self) -> Prediction {
        Prediction {
            price: self.predicted_price,
            confidence_score: Some(self.confidence_score),
            interval: Some(self.interval),
        }
    }
}

/// In-sample diagnostics of a fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    pub points: usize,
    pub slope: f64,
    pub intercept: f64,
    pub r2: f64,
    pub mae: f64,
    pub rmse: f64,
    pub std_error: f64,
}

pub trait Forecaster: Send + Sync {
    /// Stored with every prediction this forecaster produces.
    fn model_version(&self) -> &str;

    fn forecast(&self, symbol: &str, history: &[PricePoint]) -> anyhow::Result<Forecast>;
}
