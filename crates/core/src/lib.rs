pub mod cache;
pub mod domain;
pub mod error;
pub mod eval;
pub mod forecast;
pub mod ingest;
pub mod projector;
pub mod query;
pub mod storage;

pub mod config {
    use anyhow::Context;

    pub const DEFAULT_SYMBOL: &str = "BTC-USD";
    pub const DEFAULT_MODEL_VERSION: &str = "linear_v1";
    pub const DEFAULT_LOOKBACK_DAYS: usize = 60;
    pub const DEFAULT_TRAINING_WINDOW: usize = 30;
    pub const DEFAULT_READ_CACHE_TTL_SECS: u64 = 3600;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub market_data_provider: String,
        pub market_data_base_url: Option<String>,
        pub market_data_api_key: Option<String>,
        pub symbol: String,
        pub model_version: String,
        pub lookback_days: usize,
        pub training_window: usize,
        pub read_cache_ttl_secs: u64,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                market_data_provider: std::env::var("MARKET_DATA_PROVIDER")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| "yahoo".to_string()),
                market_data_base_url: std::env::var("MARKET_DATA_BASE_URL").ok(),
                market_data_api_key: std::env::var("MARKET_DATA_API_KEY").ok(),
                symbol: std::env::var("ORACLE_SYMBOL")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_SYMBOL.to_string()),
                model_version: std::env::var("ORACLE_MODEL_VERSION")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_MODEL_VERSION.to_string()),
                lookback_days: parse_env("ORACLE_LOOKBACK_DAYS")?
                    .unwrap_or(DEFAULT_LOOKBACK_DAYS),
                training_window: parse_env("ORACLE_TRAINING_WINDOW")?
                    .unwrap_or(DEFAULT_TRAINING_WINDOW),
                read_cache_ttl_secs: parse_env("READ_CACHE_TTL_SECS")?
                    .unwrap_or(DEFAULT_READ_CACHE_TTL_SECS),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_market_data_base_url(&self) -> anyhow::Result<&str> {
            self.market_data_base_url
                .as_deref()
                .context("MARKET_DATA_BASE_URL is required")
        }
    }

    fn parse_env<T>(key: &str) -> anyhow::Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match std::env::var(key) {
            Ok(s) if !s.trim().is_empty() => {
                let v = s
                    .trim()
                    .parse::<T>()
                    .with_context(|| format!("{key} is not valid: {s}"))?;
                Ok(Some(v))
            }
            _ => Ok(None),
        }
    }
}
