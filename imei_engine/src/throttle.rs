//! Per-service call throttling.
//!
//! The provider enforces a quota per service id, so every service gets its own independent limiter: a semaphore that
//! bounds the number of calls in flight, plus an optional minimum spacing between call start times. Saturating one
//! service never delays calls to another. Work is never dropped; callers wait for a slot.
use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use dashmap::DashMap;
use log::*;
use lookup_tools::ServiceId;
use thiserror::Error;
use tokio::{
    sync::{Mutex, Semaphore},
    time::Instant,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceLimits {
    pub max_concurrent: usize,
    pub min_spacing: Duration,
}

impl Default for ServiceLimits {
    fn default() -> Self {
        Self { max_concurrent: 5, min_spacing: Duration::ZERO }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid throttle setting '{0}'. Expected service:max_concurrent:min_spacing_ms")]
pub struct ThrottleConfigError(String);

#[derive(Debug, Clone, Default)]
pub struct ThrottleConfig {
    /// Limits for services that are not configured explicitly
    pub default_limits: ServiceLimits,
    pub services: HashMap<ServiceId, ServiceLimits>,
}

impl ThrottleConfig {
    pub fn with_service(mut self, service: ServiceId, max_concurrent: usize, min_spacing: Duration) -> Self {
        self.services.insert(service, ServiceLimits { max_concurrent, min_spacing });
        self
    }

    /// Parses a comma-separated list of `service:max_concurrent:min_spacing_ms` triples, e.g. `"4:2:500,8:3:0"`.
    pub fn parse(value: &str) -> Result<Self, ThrottleConfigError> {
        let mut config = Self::default();
        for entry in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let err = || ThrottleConfigError(entry.to_string());
            let parts = entry.split(':').map(str::trim).collect::<Vec<_>>();
            let [service, max_concurrent, spacing] = parts.as_slice() else {
                return Err(err());
            };
            let service = service.parse::<u16>().map_err(|_| err())?;
            let max_concurrent = max_concurrent.parse::<usize>().map_err(|_| err())?;
            let spacing = spacing.parse::<u64>().map_err(|_| err())?;
            if max_concurrent == 0 {
                return Err(err());
            }
            config = config.with_service(ServiceId(service), max_concurrent, Duration::from_millis(spacing));
        }
        Ok(config)
    }

    pub fn limits_for(&self, service: ServiceId) -> ServiceLimits {
        self.services.get(&service).copied().unwrap_or(self.default_limits)
    }
}

struct ServiceLimiter {
    permits: Semaphore,
    min_spacing: Duration,
    next_start: Mutex<Instant>,
}

impl ServiceLimiter {
    fn new(limits: ServiceLimits) -> Self {
        Self {
            permits: Semaphore::new(limits.max_concurrent.max(1)),
            min_spacing: limits.min_spacing,
            next_start: Mutex::new(Instant::now()),
        }
    }

    /// Reserves the next start time for this service and waits until it arrives.
    async fn wait_for_spacing(&self) {
        if self.min_spacing.is_zero() {
            return;
        }
        let start = {
            let mut next = self.next_start.lock().await;
            let start = (*next).max(Instant::now());
            *next = start + self.min_spacing;
            start
        };
        tokio::time::sleep_until(start).await;
    }
}

#[derive(Clone)]
pub struct ThrottleManager {
    config: Arc<ThrottleConfig>,
    limiters: Arc<DashMap<ServiceId, Arc<ServiceLimiter>>>,
}

impl Default for ThrottleManager {
    fn default() -> Self {
        Self::new(ThrottleConfig::default())
    }
}

impl ThrottleManager {
    pub fn new(config: ThrottleConfig) -> Self {
        Self { config: Arc::new(config), limiters: Arc::new(DashMap::new()) }
    }

    fn limiter(&self, service: ServiceId) -> Arc<ServiceLimiter> {
        let entry = self.limiters.entry(service).or_insert_with(|| {
            let limits = self.config.limits_for(service);
            debug!(
                "🚦️ Creating limiter for {service}: {} concurrent, {}ms spacing",
                limits.max_concurrent,
                limits.min_spacing.as_millis()
            );
            Arc::new(ServiceLimiter::new(limits))
        });
        Arc::clone(entry.value())
    }

    /// Runs `task` once a slot for `service` is free and returns its result.
    pub async fn schedule<F, Fut, T>(&self, service: ServiceId, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let limiter = self.limiter(service);
        let permit = match limiter.permits.acquire().await {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("🚦️ Limiter for {service} is closed ({e}). Running the call unthrottled.");
                None
            },
        };
        limiter.wait_for_spacing().await;
        trace!("🚦️ Slot acquired for {service}");
        let result = task().await;
        drop(permit);
        result
    }

    /// The number of calls currently running against `service`.
    pub fn in_flight(&self, service: ServiceId) -> usize {
        let limits = self.config.limits_for(service);
        self.limiters
            .get(&service)
            .map(|l| limits.max_concurrent.max(1).saturating_sub(l.permits.available_permits()))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::future::join_all;

    use super::*;

    #[test]
    fn parse_config() {
        let config = ThrottleConfig::parse("4:2:500, 8:3:0").unwrap();
        assert_eq!(config.limits_for(ServiceId(4)).max_concurrent, 2);
        assert_eq!(config.limits_for(ServiceId(4)).min_spacing, Duration::from_millis(500));
        assert_eq!(config.limits_for(ServiceId(8)).max_concurrent, 3);
        assert_eq!(config.limits_for(ServiceId(99)), ServiceLimits::default());
        assert!(ThrottleConfig::parse("4:2").is_err());
        assert!(ThrottleConfig::parse("4:0:10").is_err());
        assert!(ThrottleConfig::parse("").unwrap().services.is_empty());
    }

    #[tokio::test]
    async fn concurrency_is_bounded_per_service() {
        let throttle = ThrottleManager::new(ThrottleConfig::default().with_service(ServiceId(1), 2, Duration::ZERO));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tasks = (0..8).map(|i| {
            let throttle = throttle.clone();
            let running = running.clone();
            let peak = peak.clone();
            async move {
                throttle
                    .schedule(ServiceId(1), || async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        i
                    })
                    .await
            }
        });
        let results = join_all(tasks).await;
        assert_eq!(results, (0..8).collect::<Vec<_>>());
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(throttle.in_flight(ServiceId(1)), 0);
    }

    #[tokio::test]
    async fn saturated_service_does_not_block_others() {
        let throttle = ThrottleManager::new(ThrottleConfig::default().with_service(ServiceId(1), 1, Duration::ZERO));
        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let blocker = {
            let throttle = throttle.clone();
            tokio::spawn(async move {
                throttle
                    .schedule(ServiceId(1), || async move {
                        let _ = wait.await;
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(throttle.in_flight(ServiceId(1)), 1);
        let other = tokio::time::timeout(Duration::from_secs(1), throttle.schedule(ServiceId(2), || async { 42 })).await;
        assert_eq!(other.unwrap(), 42);
        let _ = release.send(());
        blocker.await.unwrap();
    }

    #[tokio::test]
    async fn calls_are_spaced() {
        let throttle =
            ThrottleManager::new(ThrottleConfig::default().with_service(ServiceId(3), 5, Duration::from_millis(50)));
        let started = Instant::now();
        let tasks = (0..3).map(|_| throttle.schedule(ServiceId(3), || async { Instant::now() }));
        let mut starts = join_all(tasks).await;
        starts.sort();
        assert!(starts[2] - started >= Duration::from_millis(100));
    }
}
