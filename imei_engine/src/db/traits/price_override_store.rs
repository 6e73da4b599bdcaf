use std::future::Future;

use imei_common::Credits;

use crate::db_types::PriceOverride;

/// Storage for administrator price overrides, keyed by price key (see [`crate::pricing::base_price_key`]).
pub trait PriceOverrideStore: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn fetch_price_overrides(&self) -> impl Future<Output = Result<Vec<PriceOverride>, Self::Error>> + Send;

    /// Creates or replaces the override for `key`.
    fn set_price_override(
        &self,
        key: &str,
        price: Credits,
    ) -> impl Future<Output = Result<PriceOverride, Self::Error>> + Send;

    /// Removes the override for `key`. Returns false if there was none.
    fn clear_price_override(&self, key: &str) -> impl Future<Output = Result<bool, Self::Error>> + Send;
}
