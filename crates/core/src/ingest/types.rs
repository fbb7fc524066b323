use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyClosesResponse {
    pub symbol: String,
    pub prices: Vec<DailyClose>,
}

/// Raw upstream close. `close` is nullable because providers emit gaps as null.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyClose {
    pub date: NaiveDate,
    pub close: Option<f64>,
}
