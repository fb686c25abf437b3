use std::env;

use anyhow::Context;
use chrono::NaiveTime;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub db_max_connections: u32,
    pub run_migrations: bool,
    /// Seeds the quota log on start-up when it has no records yet.
    pub initial_daily_quota: Option<i32>,
    pub booking_max_attempts: u32,
    pub booking_retry_backoff_ms: u64,
    pub opd_start_time: NaiveTime,
    pub opd_slot_minutes: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL must be set")?;
        let bind_addr = lookup("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8080".to_string());
        let db_max_connections = lookup("DB_MAX_CONNECTIONS")
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(10);
        let run_migrations = lookup("RUN_MIGRATIONS")
            .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(true);

        let initial_daily_quota = match lookup("INITIAL_DAILY_QUOTA") {
            Some(s) => {
                let quota = s
                    .trim()
                    .parse::<i32>()
                    .with_context(|| format!("INITIAL_DAILY_QUOTA is not a number: {s}"))?;
                anyhow::ensure!(quota >= 0, "INITIAL_DAILY_QUOTA must be >= 0");
                Some(quota)
            }
            None => None,
        };

        let booking_max_attempts = lookup("BOOKING_MAX_ATTEMPTS")
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(3);
        let booking_retry_backoff_ms = lookup("BOOKING_RETRY_BACKOFF_MS")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(50);

        let opd_start_time = match lookup("OPD_START_TIME") {
            Some(s) => NaiveTime::parse_from_str(s.trim(), "%H:%M")
                .with_context(|| format!("OPD_START_TIME must be HH:MM, got {s}"))?,
            None => NaiveTime::from_hms_opt(8, 0, 0).context("invalid default start time")?,
        };
        let opd_slot_minutes = lookup("OPD_SLOT_MINUTES")
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(10);

        Ok(Self {
            database_url,
            bind_addr,
            db_max_connections,
            run_migrations,
            initial_daily_quota,
            booking_max_attempts,
            booking_retry_backoff_ms,
            opd_start_time,
            opd_slot_minutes,
        })
    }
}
