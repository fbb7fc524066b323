use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use oracle_core::cache::SystemClock;
use oracle_core::eval::{ComparisonRow, PerformanceSnapshot};
use oracle_core::projector::SeriesPoint;
use oracle_core::query::ReadService;
use oracle_core::storage::PgMetricStore;

const DEFAULT_WINDOW: u32 = 30;
const MAX_WINDOW: u32 = 365;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = oracle_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let ttl = chrono::Duration::seconds(settings.read_cache_ttl_secs as i64);
    let reads: Option<Arc<ReadService>> = match connect_store(&settings).await {
        Ok(store) => Some(Arc::new(ReadService::new(
            Arc::new(store),
            Arc::new(SystemClock),
            ttl,
        ))),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "metric store unavailable; starting API in degraded mode");
            None
        }
    };

    let state = AppState {
        reads,
        default_model_version: settings.model_version.clone(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET]);

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/symbols/:symbol/chart", get(get_chart_series))
        .route("/symbols/:symbol/comparison", get(get_comparison_history))
        .route("/symbols/:symbol/performance", get(get_performance))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn connect_store(settings: &oracle_core::config::Settings) -> anyhow::Result<PgMetricStore> {
    let db_url = settings.require_database_url()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(std::time::Duration::from_secs(10))
        .connect(db_url)
        .await?;
    oracle_core::storage::migrate(&pool).await?;
    PgMetricStore::new(pool)
}

async fn healthz(State(state): State<AppState>) -> &'static str {
    if state.reads.is_some() {
        "ok"
    } else {
        "degraded"
    }
}

#[derive(Clone)]
struct AppState {
    reads: Option<Arc<ReadService>>,
    default_model_version: String,
}

#[derive(Debug, Default, Deserialize)]
struct ReadParams {
    days: Option<u32>,
    limit: Option<u32>,
    model_version: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiChart {
    symbol: String,
    model_version: String,
    points: Vec<SeriesPoint>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiComparison {
    symbol: String,
    model_version: String,
    rows: Vec<ComparisonRow>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiPerformance {
    symbol: String,
    model_version: String,
    snapshot: PerformanceSnapshot,
}

async fn get_chart_series(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(params): Query<ReadParams>,
) -> Result<Json<ApiChart>, StatusCode> {
    let symbol = normalize_symbol(&symbol)?;
    let days = window(params.days)?;
    let model_version = state.model_version(&params);

    let points = match &state.reads {
        Some(reads) => reads.chart_series(&symbol, &model_version, days).await,
        None => Vec::new(),
    };

    Ok(Json(ApiChart {
        symbol,
        model_version,
        points,
    }))
}

async fn get_comparison_history(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(params): Query<ReadParams>,
) -> Result<Json<ApiComparison>, StatusCode> {
    let symbol = normalize_symbol(&symbol)?;
    let limit = window(params.limit)?;
    let model_version = state.model_version(&params);

    let rows = state
        .comparison_history(&symbol, &model_version, limit)
        .await;

    Ok(Json(ApiComparison {
        symbol,
        model_version,
        rows,
    }))
}

async fn get_performance(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(params): Query<ReadParams>,
) -> Result<Json<ApiPerformance>, StatusCode> {
    let symbol = normalize_symbol(&symbol)?;
    let limit = window(params.limit)?;
    let model_version = state.model_version(&params);

    let history = state
        .comparison_history(&symbol, &model_version, limit)
        .await;

    Ok(Json(ApiPerformance {
        symbol,
        model_version,
        snapshot: ReadService::performance_snapshot(&history),
    }))
}

impl AppState {
    fn model_version(&self, params: &ReadParams) -> String {
        params
            .model_version
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.default_model_version.as_str())
            .to_string()
    }

    async fn comparison_history(
        &self,
        symbol: &str,
        model_version: &str,
        limit: u32,
    ) -> Vec<ComparisonRow> {
        match &self.reads {
            Some(reads) => reads.comparison_history(symbol, model_version, limit).await,
            None => Vec::new(),
        }
    }
}

fn normalize_symbol(raw: &str) -> Result<String, StatusCode> {
    let s = raw.trim().to_ascii_uppercase();
    let valid = !s.is_empty()
        && s.len() <= 20
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '=' | '^'));
    if valid {
        Ok(s)
    } else {
        Err(StatusCode::BAD_REQUEST)
    }
}

fn window(v: Option<u32>) -> Result<u32, StatusCode> {
    match v {
        None => Ok(DEFAULT_WINDOW),
        Some(n) if (1..=MAX_WINDOW).contains(&n) => Ok(n),
        Some(_) => Err(StatusCode::BAD_REQUEST),
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &oracle_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
