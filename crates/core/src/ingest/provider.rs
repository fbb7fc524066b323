use crate::config::Settings;
use crate::ingest::types::{DailyClose, DailyClosesResponse};
use crate::ingest::yahoo::YahooChartSource;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use std::sync::Arc;
use std::time::Duration;

pub(crate) const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PATH: &str = "/v1/daily_closes";

/// Upstream source of daily closing prices.
///
/// Implementations make a single attempt per call. Retrying a failed run is left to the scheduler.
#[async_trait::async_trait]
pub trait MarketDataSource: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn fetch_daily_closes(&self, symbol: &str, window_days: usize)
        -> Result<Vec<DailyClose>>;
}

pub fn source_from_settings(settings: &Settings) -> Result<Arc<dyn MarketDataSource>> {
    match settings.market_data_provider.trim().to_ascii_lowercase().as_str() {
        "yahoo" => Ok(Arc::new(YahooChartSource::from_settings(settings)?)),
        "http_json" => Ok(Arc::new(HttpJsonSource::from_settings(settings)?)),
        other => anyhow::bail!("unknown MARKET_DATA_PROVIDER: {other}"),
    }
}

pub(crate) fn timeout_from_env() -> Duration {
    let secs = std::env::var("MARKET_DATA_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// Self-hosted JSON feed: `GET {base}{path}?symbol=..&window_days=..`.
#[derive(Debug, Clone)]
pub struct HttpJsonSource {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    path: String,
}

impl HttpJsonSource {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_market_data_base_url()?.to_string();
        let api_key = settings.market_data_api_key.clone();

        let path = std::env::var("MARKET_DATA_CLOSES_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PATH.to_string());

        let http = reqwest::Client::builder()
            .timeout(timeout_from_env())
            .build()
            .context("failed to build market data http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            path,
        })
    }

    fn url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };

        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }
}

#[async_trait::async_trait]
impl MarketDataSource for HttpJsonSource {
    fn provider_name(&self) -> &'static str {
        "external_http_json"
    }

    async fn fetch_daily_closes(
        &self,
        symbol: &str,
        window_days: usize,
    ) -> Result<Vec<DailyClose>> {
        let res = self
            .http
            .get(self.url())
            .headers(self.headers()?)
            .query(&[
                ("symbol", symbol.to_string()),
                ("window_days", window_days.to_string()),
            ])
            .send()
            .await
            .context("market data request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read market data response")?;

        if !status.is_success() {
            anyhow::bail!("market data HTTP {status}: {text}");
        }

        parse_closes_response(&text, symbol)
    }
}

fn parse_closes_response(text: &str, expected_symbol: &str) -> Result<Vec<DailyClose>> {
    let parsed = serde_json::from_str::<DailyClosesResponse>(text)
        .with_context(|| format!("market data response is not a valid closes payload: {text}"))?;

    anyhow::ensure!(
        parsed.symbol.eq_ignore_ascii_case(expected_symbol),
        "market data symbol mismatch: expected {expected_symbol}, got {}",
        parsed.symbol
    );

    Ok(parsed.prices)
}
