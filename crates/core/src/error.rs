use std::fmt;

/// Failure classes of the forecasting pipeline.
///
/// These are wrapped into `anyhow::Error` where they occur; callers that need the class back use
/// `err.downcast_ref::<OracleError>()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// Upstream history fetch failed or returned too few usable points.
    DataUnavailable { symbol: String, detail: String },
    /// Store write rejected or unreachable.
    Persistence { stage: &'static str, detail: String },
    /// Store read failed. Read paths absorb this into empty results.
    Query { stage: &'static str, detail: String },
}

impl OracleError {
    pub fn data_unavailable(symbol: &str, detail: impl Into<String>) -> Self {
        Self::DataUnavailable {
            symbol: symbol.to_string(),
            detail: detail.into(),
        }
    }

    pub fn persistence(stage: &'static str, err: &anyhow::Error) -> Self {
        Self::Persistence {
            stage,
            detail: format!("{err:#}"),
        }
    }

    pub fn query(stage: &'static str, err: &anyhow::Error) -> Self {
        Self::Query {
            stage,
            detail: format!("{err:#}"),
        }
    }

    /// Short stable label, stored with failed runs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DataUnavailable { .. } => "data_unavailable",
            Self::Persistence { .. } => "persistence_error",
            Self::Query { .. } => "query_error",
        }
    }
}

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataUnavailable { symbol, detail } => {
                write!(f, "market data unavailable (symbol={symbol}): {detail}")
            }
            Self::Persistence { stage, detail } => {
                write!(f, "metric store write failed (stage={stage}): {detail}")
            }
            Self::Query { stage, detail } => {
                write!(f, "metric store read failed (stage={stage}): {detail}")
            }
        }
    }
}

impl std::error::Error for OracleError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn survives_anyhow_round_trip() {
        let err = anyhow::Error::new(OracleError::data_unavailable("BTC-USD", "empty response"));
        let back = err.downcast_ref::<OracleError>().unwrap();
        assert_eq!(back.kind(), "data_unavailable");
        assert!(err.to_string().contains("BTC-USD"));
    }
}
