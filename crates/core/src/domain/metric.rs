use anyhow::{bail, ensure};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One observed daily close.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionInterval {
    pub lower: f64,
    pub upper: f64,
}

impl PredictionInterval {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Forecast fields of a metric row. Confidence and bounds only exist alongside a predicted price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub price: f64,
    pub confidence_score: Option<f64>,
    pub interval: Option<PredictionInterval>,
}

/// A dated row of the metric store, keyed by (date, symbol, model_version).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub date: NaiveDate,
    pub symbol: String,
    pub model_version: String,
    pub actual_price: Option<f64>,
    pub prediction: Option<Prediction>,
    pub created_at: Option<DateTime<Utc>>,
}

impl MetricRecord {
    pub fn actual(date: NaiveDate, symbol: &str, model_version: &str, price: f64) -> Self {
        Self {
            date,
            symbol: symbol.to_string(),
            model_version: model_version.to_string(),
            actual_price: Some(price),
            prediction: None,
            created_at: None,
        }
    }

    pub fn forecast(
        date: NaiveDate,
        symbol: &str,
        model_version: &str,
        prediction: Prediction,
    ) -> Self {
        Self {
            date,
            symbol: symbol.to_string(),
            model_version: model_version.to_string(),
            actual_price: None,
            prediction: Some(prediction),
            created_at: None,
        }
    }

    pub fn predicted_price(&self) -> Option<f64> {
        self.prediction.map(|p| p.price)
    }

    pub fn interval(&self) -> Option<PredictionInterval> {
        self.prediction.and_then(|p| p.interval)
    }

    /// Both prices present; eligible for evaluation.
    pub fn is_settled(&self) -> bool {
        self.actual_price.is_some() && self.prediction.is_some()
    }
}

/// Flat column layout of `crypto_metrics`, as read from the database.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct MetricRow {
    pub date: NaiveDate,
    pub symbol: String,
    pub model_version: String,
    pub actual_price: Option<f64>,
    pub predicted_price: Option<f64>,
    pub confidence_score: Option<f64>,
    pub prediction_lower_bound: Option<f64>,
    pub prediction_upper_bound: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
}

impl MetricRow {
    pub fn validate_and_into_record(self) -> anyhow::Result<MetricRecord> {
        let interval = match (self.prediction_lower_bound, self.prediction_upper_bound) {
            (Some(lower), Some(upper)) => Some(PredictionInterval { lower, upper }),
            (None, None) => None,
            _ => bail!(
                "row {} {} {} has only one prediction bound",
                self.date,
                self.symbol,
                self.model_version
            ),
        };

        if let Some(confidence) = self.confidence_score {
            ensure!(
                (0.0..=1.0).contains(&confidence),
                "confidence must be between 0 and 1 (got {confidence})"
            );
        }

        let prediction = match self.predicted_price {
            Some(price) => Some(Prediction {
                price,
                confidence_score: self.confidence_score,
                interval,
            }),
            None => {
                ensure!(
                    self.confidence_score.is_none() && interval.is_none(),
                    "row {} {} has forecast fields without a predicted price",
                    self.date,
                    self.symbol
                );
                None
            }
        };

        ensure!(
            self.actual_price.is_some() || prediction.is_some(),
            "row {} {} carries neither an actual nor a predicted price",
            self.date,
            self.symbol
        );

        Ok(MetricRecord {
            date: self.date,
            symbol: self.symbol,
            model_version: self.model_version,
            actual_price: self.actual_price,
            prediction,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> MetricRow {
        MetricRow {
            date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            symbol: "BTC-USD".to_string(),
            model_version: "linear_v1".to_string(),
            actual_price: None,
            predicted_price: Some(65000.0),
            confidence_score: Some(0.8),
            prediction_lower_bound: Some(64000.0),
            prediction_upper_bound: Some(66000.0),
            created_at: None,
        }
    }

    #[test]
    fn accepts_forecast_row() {
        let rec = row().validate_and_into_record().unwrap();
        assert_eq!(rec.predicted_price(), Some(65000.0));
        assert_eq!(rec.interval().unwrap().width(), 2000.0);
        assert!(!rec.is_settled());
    }

    #[test]
    fn rejects_single_bound() {
        let mut r = row();
        r.prediction_upper_bound = None;
        assert!(r.validate_and_into_record().is_err());
    }

    #[test]
    fn rejects_row_without_prices() {
        let mut r = row();
        r.predicted_price = None;
        r.confidence_score = None;
        r.prediction_lower_bound = None;
        r.prediction_upper_bound = None;
        assert!(r.validate_and_into_record().is_err());
    }

    #[test]
    fn keeps_prediction_without_bounds() {
        let mut r = row();
        r.actual_price = Some(64500.0);
        r.prediction_lower_bound = None;
        r.prediction_upper_bound = None;
        let rec = r.validate_and_into_record().unwrap();
        assert!(rec.is_settled());
        assert_eq!(rec.interval(), None);
    }
}
