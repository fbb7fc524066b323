use anyhow::Context;
use chrono::{Datelike, NaiveDate};
use sqlx::pool::PoolConnection;
use sqlx::Postgres;

// Advisory locks are scoped to the Postgres session. This is a best-effort guard against two
// workers forecasting the same (symbol, date) at once; the upsert keeps overlapping runs correct
// even without it.
const LOCK_NAMESPACE: i64 = 0x4F52_4143_4C45; // "ORACLE"

fn lock_key(symbol: &str, forecast_date: NaiveDate) -> i64 {
    // FNV-1a, stable across processes (std's hasher is randomly seeded).
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in symbol.trim().to_ascii_uppercase().bytes() {
        h ^= u64::from(b);
        h = h.wrapping_mul(0x0100_0000_01b3);
    }
    LOCK_NAMESPACE ^ (h as i64) ^ i64::from(forecast_date.num_days_from_ce())
}

/// Session-level advisory lock held on one pooled connection.
///
/// Postgres only lets the session that took an advisory lock release it, so the connection stays
/// checked out until [`ForecastLock::release`]. Dropping the guard without releasing closes the
/// connection, which also frees the lock.
pub struct ForecastLock {
    conn: Option<PoolConnection<Postgres>>,
    key: i64,
}

impl ForecastLock {
    /// `Ok(None)` when another session already holds the lock.
    pub async fn try_acquire(
        pool: &sqlx::PgPool,
        symbol: &str,
        forecast_date: NaiveDate,
    ) -> anyhow::Result<Option<Self>> {
        let key = lock_key(symbol, forecast_date);
        let mut conn = pool
            .acquire()
            .await
            .context("failed to check out a connection for the forecast lock")?;

        let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .persistent(false)
            .bind(key)
            .fetch_one(&mut *conn)
            .await
            .with_context(|| format!("failed to acquire advisory lock (key={key})"))?;

        if !acquired.0 {
            return Ok(None);
        }
        Ok(Some(Self {
            conn: Some(conn),
            key,
        }))
    }

    pub async fn release(mut self) -> anyhow::Result<()> {
        let key = self.key;
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        let released: anyhow::Result<(bool,)> = sqlx::query_as("SELECT pg_advisory_unlock($1)")
            .persistent(false)
            .bind(key)
            .fetch_one(&mut *conn)
            .await
            .with_context(|| format!("failed to release advisory lock (key={key})"));

        let outcome = released.and_then(|(released,)| ensure_released(key, released));
        if outcome.is_err() {
            drop(conn.detach());
        }
        outcome
    }
}

impl Drop for ForecastLock {
    fn drop(&mut self) {
        // Not released: the connection must not go back to the pool still holding the lock.
        if let Some(conn) = self.conn.take() {
            drop(conn.detach());
        }
    }
}

fn ensure_released(key: i64, released: bool) -> anyhow::Result<()> {
    anyhow::ensure!(
        released,
        "advisory lock was not held by this session (key={key})"
    );
    Ok(())
}
