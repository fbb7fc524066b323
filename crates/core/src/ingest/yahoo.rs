use crate::config::Settings;
use crate::ingest::provider::{timeout_from_env, MarketDataSource};
use crate::ingest::types::DailyClose;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;

const PROD_BASE_URL: &str = "https://query1.finance.yahoo.com";

// The chart endpoint rejects requests without a browser-like agent.
const USER_AGENT: &str = "Mozilla/5.0 (compatible; oracle-worker/0.1)";

/// Yahoo Finance v8 chart endpoint, daily interval.
#[derive(Debug, Clone)]
pub struct YahooChartSource {
    http: reqwest::Client,
    base_url: String,
}

impl YahooChartSource {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings
            .market_data_base_url
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| PROD_BASE_URL.to_string());

        let http = reqwest::Client::builder()
            .timeout(timeout_from_env())
            .build()
            .context("failed to build Yahoo http client")?;

        Ok(Self { http, base_url })
    }

    fn headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static(USER_AGENT));
        headers.insert("accept", HeaderValue::from_static("application/json"));
        headers
    }
}

#[async_trait::async_trait]
impl MarketDataSource for YahooChartSource {
    fn provider_name(&self) -> &'static str {
        "yahoo_chart"
    }

    async fn fetch_daily_closes(
        &self,
        symbol: &str,
        window_days: usize,
    ) -> Result<Vec<DailyClose>> {
        let url = format!(
            "{}/v8/finance/chart/{}",
            self.base_url.trim_end_matches('/'),
            symbol
        );

        let end = Utc::now();
        let start = end - Duration::days(window_days as i64);

        let res = self
            .http
            .get(url)
            .headers(Self::headers())
            .query(&[
                ("period1", start.timestamp().to_string()),
                ("period2", end.timestamp().to_string()),
                ("interval", "1d".to_string()),
                ("events", "history".to_string()),
            ])
            .send()
            .await
            .context("Yahoo chart request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Yahoo chart response")?;

        if !status.is_success() {
            anyhow::bail!("Yahoo chart HTTP {status}: {text}");
        }

        parse_chart(&text, end)
    }
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

/// Daily closes from a chart response. The bar for the exchange-local day containing `now` is
/// still trading and is left out.
fn parse_chart(text: &str, now: DateTime<Utc>) -> Result<Vec<DailyClose>> {
    let env = serde_json::from_str::<ChartEnvelope>(text)
        .context("Yahoo chart response is not valid JSON for the chart schema")?;

    if let Some(err) = env.chart.error {
        anyhow::bail!("Yahoo chart error {}: {}", err.code, err.description);
    }

    let result = env
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .context("Yahoo chart response has no result")?;

    let closes = result
        .indicators
        .quote
        .into_iter()
        .next()
        .map(|q| q.close)
        .unwrap_or_default();

    anyhow::ensure!(
        closes.len() == result.timestamp.len(),
        "Yahoo chart timestamp/close length mismatch ({} vs {})",
        result.timestamp.len(),
        closes.len()
    );

    let offset = Duration::seconds(result.meta.gmtoffset);
    let today = (now + offset).date_naive();

    let mut out = Vec::with_capacity(closes.len());
    for (ts, close) in result.timestamp.into_iter().zip(closes) {
        // Bars are stamped at exchange-local midnight; shift before taking the calendar day.
        let local = DateTime::<Utc>::from_timestamp(ts + result.meta.gmtoffset, 0)
            .with_context(|| format!("invalid Yahoo timestamp {ts}"))?;
        let date = local.date_naive();
        if date >= today {
            tracing::debug!(%date, "skipping Yahoo bar for an unfinished session");
            continue;
        }
        out.push(DailyClose { date, close });
    }

    Ok(out)
}
