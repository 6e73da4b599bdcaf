//! # Lookup tools
//!
//! A thin client for the paid, third-party IMEI lookup provider. The provider exposes a single REST endpoint that
//! takes an API key, the identifier to check, and a numeric *service id* selecting which database is queried. Every
//! service answers with the same JSON envelope, modelled here by [`ProviderResponse`].
//!
//! Rate limiting, fallback chains and interpretation of the results are the engine's concern; this crate only speaks
//! the wire protocol.
mod api;
mod config;
mod data_objects;
mod error;
mod helpers;

pub use api::LookupApi;
pub use config::LookupConfig;
pub use data_objects::{ProviderResponse, ProviderStatus, ServiceId};
pub use error::LookupApiError;
pub use helpers::{parse_provider_body, strip_markup, text_fields};
