//! Forecast accuracy over settled rows.
//!
//! `errorPercent` is taken relative to the actual price, not the prediction.

use crate::domain::metric::MetricRecord;
use crate::projector::SeriesPoint;
use serde::{Deserialize, Serialize};

/// A prediction within this many percent of the actual counts as accurate.
pub const ACCURACY_TOLERANCE_PERCENT: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonRow {
    #[serde(flatten)]
    pub point: SeriesPoint,
    /// `actual - predicted`.
    pub error: f64,
    pub error_percent: f64,
}

impl ComparisonRow {
    /// `None` unless the row is settled with a positive actual price.
    pub fn from_record(r: &MetricRecord) -> Option<Self> {
        let actual = r.actual_price?;
        let predicted = r.predicted_price()?;
        if !(actual > 0.0) {
            tracing::warn!(date = %r.date, symbol = %r.symbol, actual, "skipping row with non-positive actual price");
            return None;
        }
        let error = actual - predicted;
        Some(Self {
            point: SeriesPoint::from(r),
            error,
            error_percent: error / actual * 100.0,
        })
    }

    pub fn is_accurate(&self) -> bool {
        self.error_percent.abs() < ACCURACY_TOLERANCE_PERCENT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSnapshot {
    pub mae: f64,
    pub rmse: f64,
    /// Percent of rows inside the tolerance band.
    pub accuracy: f64,
    pub total_predictions: usize,
}

impl PerformanceSnapshot {
    pub const EMPTY: Self = Self {
        mae: 0.0,
        rmse: 0.0,
        accuracy: 0.0,
        total_predictions: 0,
    };
}

/// Settled rows of `records`, newest first.
pub fn comparison_rows(records: &[MetricRecord]) -> Vec<ComparisonRow> {
    let mut out: Vec<ComparisonRow> = records.iter().filter_map(ComparisonRow::from_record).collect();
    out.sort_by(|a, b| b.point.date.cmp(&a.point.date));
    out
}

pub fn performance_snapshot(history: &[ComparisonRow]) -> PerformanceSnapshot {
    if history.is_empty() {
        return PerformanceSnapshot::EMPTY;
    }

    let n = history.len() as f64;
    let mae = history.iter().map(|r| r.error.abs()).sum::<f64>() / n;
    let mse = history.iter().map(|r| r.error * r.error).sum::<f64>() / n;
    let accurate = history.iter().filter(|r| r.is_accurate()).count();

    PerformanceSnapshot {
        mae: round_to(mae, 2),
        rmse: round_to(mse.sqrt(), 2),
        accuracy: round_to(accurate as f64 / n * 100.0, 1),
        total_predictions: history.len(),
    }
}

pub fn round_to(x: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (x * scale).round() / scale
}
