//! Presentation shapes of stored rows. Field renaming and ordering only.

use crate::domain::metric::MetricRecord;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One row as the dashboard sees it. The bounds are both set or both null.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub actual: Option<f64>,
    pub predicted: Option<f64>,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
}

impl From<&MetricRecord> for SeriesPoint {
    fn from(r: &MetricRecord) -> Self {
        let interval = r.interval();
        Self {
            date: r.date,
            actual: r.actual_price,
            predicted: r.predicted_price(),
            lower_bound: interval.map(|i| i.lower),
            upper_bound: interval.map(|i| i.upper),
        }
    }
}

/// Oldest first, for charting.
pub fn chart_series(records: &[MetricRecord]) -> Vec<SeriesPoint> {
    let mut out: Vec<SeriesPoint> = records.iter().map(SeriesPoint::from).collect();
    out.sort_by_key(|p| p.date);
    out
}

/// Newest first, for the comparison table.
pub fn comparison_table(records: &[MetricRecord]) -> Vec<SeriesPoint> {
    let mut out: Vec<SeriesPoint> = records.iter().map(SeriesPoint::from).collect();
    out.sort_by(|a, b| b.date.cmp(&a.date));
    out
}
