use std::time::Duration;

use imei_common::Secret;
use log::*;

const DEFAULT_LOOKUP_URL: &str = "https://api.imeicheck.example/api/";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct LookupConfig {
    /// The full URL of the provider's lookup endpoint
    pub base_url: String,
    pub api_key: Secret<String>,
    /// Hard limit on a single provider call, independent of any queueing done by the caller.
    pub timeout: Duration,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self { base_url: DEFAULT_LOOKUP_URL.to_string(), api_key: Secret::default(), timeout: DEFAULT_TIMEOUT }
    }
}

impl LookupConfig {
    pub fn new_from_env_or_default() -> Self {
        let base_url = std::env::var("IMEI_LOOKUP_URL").unwrap_or_else(|_| {
            warn!("🪛️ IMEI_LOOKUP_URL not set, using {DEFAULT_LOOKUP_URL} as default");
            DEFAULT_LOOKUP_URL.to_string()
        });
        let api_key = Secret::new(std::env::var("IMEI_LOOKUP_API_KEY").unwrap_or_else(|_| {
            warn!("🪛️ IMEI_LOOKUP_API_KEY not set. Every lookup will be rejected by the provider.");
            String::default()
        }));
        let timeout = std::env::var("IMEI_LOOKUP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| {
                s.parse::<u64>()
                    .map_err(|e| warn!("🪛️ Invalid value for IMEI_LOOKUP_TIMEOUT_SECS ({s}). {e}"))
                    .ok()
            })
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);
        Self { base_url, api_key, timeout }
    }
}
