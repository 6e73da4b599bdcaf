//! # Pricing
//!
//! Brand and add-on prices default to the values in the brand registry and can be overridden by an administrator.
//! Overrides live in a [`PriceOverrideStore`]. [`CachedPricing`] is a cache-aside reader over that store: it loads all
//! overrides at once, serves them until the TTL expires, and is invalidated explicitly whenever an override changes.
use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use imei_common::Credits;
use log::*;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::{
    brands::{profile_for, AddonService, Brand},
    db_types::PriceOverride,
    PriceOverrideStore,
};

#[derive(Debug, Clone, Error)]
pub enum PricingError {
    #[error("Add-on service {id} is not available for {brand}")]
    UnknownAddon { brand: String, id: u16 },
    #[error("Could not load price overrides: {0}")]
    StoreError(String),
}

/// The pricing contract used by submission and by the order processor.
pub trait PricingSource: Send + Sync {
    fn base_price(&self, brand: Option<Brand>) -> impl Future<Output = Result<Credits, PricingError>> + Send;

    fn additional_services(
        &self,
        brand: Option<Brand>,
    ) -> impl Future<Output = Result<Vec<AddonService>, PricingError>> + Send;

    /// The base price plus the price of every requested add-on. Duplicate add-on ids are only charged once. An add-on
    /// that is not offered for the brand is an error.
    fn total_price(
        &self,
        brand: Option<Brand>,
        addon_ids: &[u16],
    ) -> impl Future<Output = Result<Credits, PricingError>> + Send {
        async move {
            let base = self.base_price(brand).await?;
            let available = self.additional_services(brand).await?;
            let mut ids = addon_ids.to_vec();
            ids.sort_unstable();
            ids.dedup();
            let mut total = base;
            for id in ids {
                let addon = available.iter().find(|a| a.id.0 == id).ok_or_else(|| PricingError::UnknownAddon {
                    brand: brand_label(brand).to_string(),
                    id,
                })?;
                total += addon.price;
            }
            Ok(total)
        }
    }
}

fn brand_label(brand: Option<Brand>) -> &'static str {
    brand.map(|b| b.as_str()).unwrap_or("generic")
}

pub fn base_price_key(brand: Option<Brand>) -> String {
    format!("base:{}", brand_label(brand))
}

pub fn addon_price_key(brand: Option<Brand>, id: u16) -> String {
    format!("addon:{}:{id}", brand_label(brand))
}

/// Registry prices with no overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPricing;

impl PricingSource for DefaultPricing {
    async fn base_price(&self, brand: Option<Brand>) -> Result<Credits, PricingError> {
        Ok(profile_for(brand).base_price)
    }

    async fn additional_services(&self, brand: Option<Brand>) -> Result<Vec<AddonService>, PricingError> {
        Ok(profile_for(brand).addons.to_vec())
    }
}

//--------------------------------------        Clock          ---------------------------------------------------------
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

//--------------------------------------     CachedPricing     ---------------------------------------------------------
struct CacheEntry {
    loaded_at: DateTime<Utc>,
    overrides: HashMap<String, Credits>,
}

pub struct CachedPricing<B, C = SystemClock> {
    store: B,
    clock: C,
    ttl: Duration,
    cache: Arc<RwLock<Option<CacheEntry>>>,
}

impl<B: Clone, C: Clone> Clone for CachedPricing<B, C> {
    fn clone(&self) -> Self {
        Self { store: self.store.clone(), clock: self.clock.clone(), ttl: self.ttl, cache: Arc::clone(&self.cache) }
    }
}

impl<B: PriceOverrideStore> CachedPricing<B, SystemClock> {
    pub fn new(store: B, ttl: Duration) -> Self {
        Self::with_clock(store, ttl, SystemClock)
    }
}

impl<B: PriceOverrideStore, C: Clock> CachedPricing<B, C> {
    pub fn with_clock(store: B, ttl: Duration, clock: C) -> Self {
        Self { store, clock, ttl, cache: Arc::new(RwLock::new(None)) }
    }

    /// Drops the cached overrides. The next price lookup reloads them from the store.
    pub async fn invalidate(&self) {
        let mut cache = self.cache.write().await;
        *cache = None;
        debug!("💲️ Price cache invalidated");
    }

    pub async fn set_override(&self, key: &str, price: Credits) -> Result<PriceOverride, PricingError> {
        let result = self
            .store
            .set_price_override(key, price)
            .await
            .map_err(|e| PricingError::StoreError(e.to_string()))?;
        info!("💲️ Price for {key} overridden to {price}");
        self.invalidate().await;
        Ok(result)
    }

    pub async fn clear_override(&self, key: &str) -> Result<bool, PricingError> {
        let removed =
            self.store.clear_price_override(key).await.map_err(|e| PricingError::StoreError(e.to_string()))?;
        if removed {
            info!("💲️ Price override for {key} removed");
        }
        self.invalidate().await;
        Ok(removed)
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        let age = self.clock.now() - entry.loaded_at;
        age.to_std().map(|age| age < self.ttl).unwrap_or(true)
    }

    async fn lookup(&self, key: &str) -> Result<Option<Credits>, PricingError> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.as_ref().filter(|e| self.is_fresh(e)) {
                return Ok(entry.overrides.get(key).copied());
            }
        }
        let mut cache = self.cache.write().await;
        // Another task may have reloaded while we waited for the write lock
        if let Some(entry) = cache.as_ref().filter(|e| self.is_fresh(e)) {
            return Ok(entry.overrides.get(key).copied());
        }
        let overrides = self
            .store
            .fetch_price_overrides()
            .await
            .map_err(|e| PricingError::StoreError(e.to_string()))?
            .into_iter()
            .map(|o| (o.price_key, o.price))
            .collect::<HashMap<_, _>>();
        trace!("💲️ Loaded {} price overrides", overrides.len());
        let price = overrides.get(key).copied();
        *cache = Some(CacheEntry { loaded_at: self.clock.now(), overrides });
        Ok(price)
    }
}

impl<B: PriceOverrideStore, C: Clock> PricingSource for CachedPricing<B, C> {
    async fn base_price(&self, brand: Option<Brand>) -> Result<Credits, PricingError> {
        let price = self.lookup(&base_price_key(brand)).await?;
        Ok(price.unwrap_or(profile_for(brand).base_price))
    }

    async fn additional_services(&self, brand: Option<Brand>) -> Result<Vec<AddonService>, PricingError> {
        let mut result = Vec::with_capacity(profile_for(brand).addons.len());
        for addon in profile_for(brand).addons {
            let price = self.lookup(&addon_price_key(brand, addon.id.0)).await?;
            result.push(AddonService { price: price.unwrap_or(addon.price), ..*addon });
        }
        Ok(result)
    }
}

//--------------------------------------     GuestPricing      ---------------------------------------------------------
/// Converts credit prices into the fixed-fee currency guests pay in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestPricing {
    /// Minor units of `currency` per whole credit
    pub minor_per_credit: i64,
    pub currency: String,
}

impl Default for GuestPricing {
    fn default() -> Self {
        Self { minor_per_credit: 500, currency: "RON".to_string() }
    }
}

impl GuestPricing {
    pub fn new(minor_per_credit: i64, currency: impl Into<String>) -> Self {
        Self { minor_per_credit, currency: currency.into() }
    }

    pub fn amount_for(&self, price: Credits) -> i64 {
        price.to_minor_units(self.minor_per_credit)
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicI64, AtomicUsize, Ordering},
        Mutex,
    };

    use super::*;

    #[derive(Clone, Default)]
    struct MemoryStore {
        prices: Arc<Mutex<HashMap<String, Credits>>>,
        loads: Arc<AtomicUsize>,
    }

    impl PriceOverrideStore for MemoryStore {
        type Error = std::io::Error;

        async fn fetch_price_overrides(&self) -> Result<Vec<PriceOverride>, Self::Error> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let prices = self.prices.lock().unwrap();
            Ok(prices
                .iter()
                .map(|(k, v)| PriceOverride { price_key: k.clone(), price: *v, updated_at: Utc::now() })
                .collect())
        }

        async fn set_price_override(&self, key: &str, price: Credits) -> Result<PriceOverride, Self::Error> {
            self.prices.lock().unwrap().insert(key.to_string(), price);
            Ok(PriceOverride { price_key: key.to_string(), price, updated_at: Utc::now() })
        }

        async fn clear_price_override(&self, key: &str) -> Result<bool, Self::Error> {
            Ok(self.prices.lock().unwrap().remove(key).is_some())
        }
    }

    #[derive(Clone, Default)]
    struct ManualClock(Arc<AtomicI64>);

    impl ManualClock {
        fn advance(&self, secs: i64) {
            self.0.fetch_add(secs, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp(1_700_000_000 + self.0.load(Ordering::SeqCst), 0).unwrap()
        }
    }

    #[tokio::test]
    async fn defaults_and_totals() {
        let pricing = DefaultPricing;
        assert_eq!(pricing.base_price(Some(Brand::Apple)).await.unwrap(), Credits::from_whole(3));
        assert_eq!(pricing.base_price(None).await.unwrap(), Credits::from_whole(1));
        let total = pricing.total_price(Some(Brand::Apple), &[13, 14, 13]).await.unwrap();
        assert_eq!(total, Credits::new(450));
        let err = pricing.total_price(Some(Brand::Apple), &[36]).await.unwrap_err();
        assert!(matches!(err, PricingError::UnknownAddon { id: 36, .. }));
    }

    #[tokio::test]
    async fn cache_respects_ttl_and_invalidation() {
        let store = MemoryStore::default();
        let clock = ManualClock::default();
        let pricing = CachedPricing::with_clock(store.clone(), Duration::from_secs(300), clock.clone());
        assert_eq!(pricing.base_price(Some(Brand::Samsung)).await.unwrap(), Credits::from_whole(2));
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);

        // A change made behind the cache's back is not seen until the TTL expires
        store.prices.lock().unwrap().insert(base_price_key(Some(Brand::Samsung)), Credits::new(250));
        assert_eq!(pricing.base_price(Some(Brand::Samsung)).await.unwrap(), Credits::from_whole(2));
        clock.advance(301);
        assert_eq!(pricing.base_price(Some(Brand::Samsung)).await.unwrap(), Credits::new(250));
        assert_eq!(store.loads.load(Ordering::SeqCst), 2);

        // Changes made through the cache are visible immediately
        pricing.set_override(&addon_price_key(Some(Brand::Samsung), 36), Credits::new(120)).await.unwrap();
        let addons = pricing.additional_services(Some(Brand::Samsung)).await.unwrap();
        assert_eq!(addons.iter().find(|a| a.id.0 == 36).unwrap().price, Credits::new(120));
        assert!(pricing.clear_override(&base_price_key(Some(Brand::Samsung))).await.unwrap());
        assert_eq!(pricing.base_price(Some(Brand::Samsung)).await.unwrap(), Credits::from_whole(2));
    }

    #[test]
    fn guest_amounts() {
        let guest = GuestPricing::default();
        assert_eq!(guest.amount_for(Credits::from_whole(3)), 1500);
        assert_eq!(guest.currency, "RON");
    }
}
