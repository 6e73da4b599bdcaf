use std::{env, fmt::Display, str::FromStr, time::Duration};

use imei_common::parse_list;
use imei_engine::{
    pricing::GuestPricing,
    risk::RiskConfig,
    throttle::ThrottleConfig,
    BackoffPolicy,
    JobQueueConfig,
};
use log::*;
use lookup_tools::LookupConfig;

use crate::errors::WorkerError;

const DEFAULT_DATABASE_URL: &str = "sqlite://data/imei_store.db";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_POOL_SIZE: usize = 4;
const DEFAULT_MAX_ATTEMPTS: i64 = 3;
const DEFAULT_BACKOFF_MS: u64 = 2_000;
const DEFAULT_MAX_BACKOFF_MS: u64 = 60_000;
const DEFAULT_POLL_MS: u64 = 500;
const DEFAULT_STALE_JOB_TIMEOUT_SECS: u64 = 600;
const DEFAULT_GUEST_RATE: i64 = 500;
const DEFAULT_GUEST_CURRENCY: &str = "RON";
const DEFAULT_PRICE_CACHE_TTL_SECS: u64 = 300;
/// How often the sweeper looks for abandoned jobs
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub queue: JobQueueConfig,
    pub sweep_interval: Duration,
    /// Provider endpoint and credentials
    pub lookup: LookupConfig,
    pub throttle: ThrottleConfig,
    pub guest_pricing: GuestPricing,
    pub price_cache_ttl: Duration,
    pub risk: RiskConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            queue: JobQueueConfig::default(),
            sweep_interval: SWEEP_INTERVAL,
            lookup: LookupConfig::default(),
            throttle: ThrottleConfig::default(),
            guest_pricing: GuestPricing::default(),
            price_cache_ttl: Duration::from_secs(DEFAULT_PRICE_CACHE_TTL_SECS),
            risk: RiskConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn from_env_or_default() -> Self {
        let database_url = env::var("IMEI_DATABASE_URL").ok().unwrap_or_else(|| {
            warn!("🪛️ IMEI_DATABASE_URL is not set. Using the default, {DEFAULT_DATABASE_URL}.");
            DEFAULT_DATABASE_URL.to_string()
        });
        let db_max_connections = env_or_default("IMEI_DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS);
        let queue = configure_job_queue();
        let lookup = LookupConfig::new_from_env_or_default();
        let throttle = configure_throttle(env::var("IMEI_THROTTLE").ok());
        let guest_pricing = GuestPricing::new(
            env_or_default("IMEI_GUEST_RATE", DEFAULT_GUEST_RATE),
            env::var("IMEI_GUEST_CURRENCY").unwrap_or_else(|_| DEFAULT_GUEST_CURRENCY.to_string()),
        );
        let price_cache_ttl =
            Duration::from_secs(env_or_default("IMEI_PRICE_CACHE_TTL_SECS", DEFAULT_PRICE_CACHE_TTL_SECS));
        let low_risk_carriers = env::var("IMEI_LOW_RISK_CARRIERS").map(|s| parse_list(&s)).unwrap_or_default();
        if !low_risk_carriers.is_empty() {
            info!("🪛️ Low risk carriers: {}", low_risk_carriers.join(", "));
        }
        let risk = RiskConfig::default().with_low_risk_carriers(low_risk_carriers);
        Self {
            database_url,
            db_max_connections,
            queue,
            sweep_interval: SWEEP_INTERVAL,
            lookup,
            throttle,
            guest_pricing,
            price_cache_ttl,
            risk,
        }
    }

    /// Checks the settings that the worker cannot run without.
    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.lookup.api_key.reveal().trim().is_empty() {
            return Err(WorkerError::ConfigurationError("IMEI_LOOKUP_API_KEY must be set".to_string()));
        }
        if self.lookup.base_url.trim().is_empty() {
            return Err(WorkerError::ConfigurationError("IMEI_LOOKUP_URL cannot be empty".to_string()));
        }
        if self.database_url.trim().is_empty() {
            return Err(WorkerError::ConfigurationError("IMEI_DATABASE_URL cannot be empty".to_string()));
        }
        Ok(())
    }
}

fn configure_job_queue() -> JobQueueConfig {
    let max_attempts = env_or_default("IMEI_JOB_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS).max(1);
    let initial = Duration::from_millis(env_or_default("IMEI_JOB_BACKOFF_MS", DEFAULT_BACKOFF_MS));
    let max = Duration::from_millis(env_or_default("IMEI_JOB_MAX_BACKOFF_MS", DEFAULT_MAX_BACKOFF_MS));
    if max < initial {
        warn!(
            "🪛️ IMEI_JOB_MAX_BACKOFF_MS is smaller than IMEI_JOB_BACKOFF_MS. Retries will wait {}ms.",
            max.as_millis()
        );
    }
    JobQueueConfig {
        max_attempts,
        backoff: BackoffPolicy::new(initial, max),
        poll_interval: Duration::from_millis(env_or_default("IMEI_JOB_POLL_MS", DEFAULT_POLL_MS)),
        pool_size: env_or_default("IMEI_WORKER_POOL_SIZE", DEFAULT_POOL_SIZE).max(1),
        stale_after: Duration::from_secs(env_or_default("IMEI_STALE_JOB_TIMEOUT_SECS", DEFAULT_STALE_JOB_TIMEOUT_SECS)),
    }
}

fn configure_throttle(value: Option<String>) -> ThrottleConfig {
    match value {
        None => {
            info!("🪛️ IMEI_THROTTLE is not set. Every service uses the default limits.");
            ThrottleConfig::default()
        },
        Some(s) => ThrottleConfig::parse(&s).unwrap_or_else(|e| {
            error!("🪛️ {e}. Every service will use the default limits.");
            ThrottleConfig::default()
        }),
    }
}

fn env_or_default<T>(name: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    parse_or_default(name, env::var(name).ok(), default)
}

fn parse_or_default<T>(name: &str, value: Option<String>, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match value {
        None => {
            debug!("🪛️ {name} is not set. Using the default value of {default}.");
            default
        },
        Some(s) => s.trim().parse::<T>().unwrap_or_else(|e| {
            warn!("🪛️ Invalid configuration value for {name} ({s}). {e}. Using the default value of {default}.");
            default
        }),
    }
}
