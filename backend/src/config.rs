use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use records::pg::PgStoreConfig;

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string.
    pub database_url: String,

    /// Upper bound on pooled connections. Each in-flight dispatch holds one
    /// for the whole transaction, so this also caps concurrent dispatches.
    pub db_max_connections: u32,

    // =========================
    // Dispatch transaction
    // =========================
    /// How long a dispatch waits for a contended row lock before aborting.
    pub lock_timeout_ms: u64,

    /// Hard ceiling on any single statement inside a dispatch.
    pub statement_timeout_ms: u64,

    // =========================
    // Listing cache
    // =========================
    pub listing_cache_ttl: Duration,

    /// JSON logs instead of pretty output.
    pub json_logs: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL must be set")?;

        let db_max_connections: u32 = parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?;
        anyhow::ensure!(db_max_connections > 0, "DB_MAX_CONNECTIONS must be > 0");

        Ok(Self {
            database_url,
            db_max_connections,
            lock_timeout_ms: parse_or(&lookup, "DISPATCH_LOCK_TIMEOUT_MS", 5_000)?,
            statement_timeout_ms: parse_or(&lookup, "DISPATCH_STATEMENT_TIMEOUT_MS", 10_000)?,
            listing_cache_ttl: Duration::from_secs(parse_or(
                &lookup,
                "LISTING_CACHE_TTL_SECS",
                3_600,
            )?),
            json_logs: lookup("APP_ENV").as_deref() == Some("production"),
        })
    }

    pub fn store_config(&self) -> PgStoreConfig {
        PgStoreConfig {
            lock_timeout_ms: self.lock_timeout_ms,
            statement_timeout_ms: self.statement_timeout_ms,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}
