//! # External lookup gateway
//!
//! Resolves the brand of a device and fetches its detailed data from the provider. Every outbound call goes through
//! the [`ThrottleManager`].
//!
//! The detailed lookup walks the brand's service chain in order and keeps the first successful answer. When every
//! service in the chain fails, the classifier's own answer is used instead, so a result is available whenever the
//! classifier worked. Only when that also fails does the lookup end in [`GatewayError::Exhausted`], which lists every
//! service that was tried.
use std::{future::Future, sync::Arc};

use futures_util::future::join_all;
use log::*;
use lookup_tools::{strip_markup, LookupApi, LookupApiError, ProviderResponse, ServiceId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    brands::{profile_for, Brand, BLACKLIST_SERVICE, CLASSIFIER_SERVICE},
    db_types::Imei,
    throttle::ThrottleManager,
};

/// Anything that can answer a single provider lookup. [`LookupApi`] is the production implementation.
pub trait LookupProvider: Send + Sync + 'static {
    fn lookup(
        &self,
        service: ServiceId,
        imei: &Imei,
    ) -> impl Future<Output = Result<ProviderResponse, LookupApiError>> + Send;
}

impl LookupProvider for LookupApi {
    async fn lookup(&self, service: ServiceId, imei: &Imei) -> Result<ProviderResponse, LookupApiError> {
        LookupApi::lookup(self, service, imei.as_str()).await
    }
}

fn service_list(services: &[ServiceId]) -> String {
    services.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(", ")
}

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Every lookup path failed. Tried [{}]. Last error: {}", service_list(.tried), .last_error.as_deref().unwrap_or("none"))]
    Exhausted { tried: Vec<ServiceId>, last_error: Option<String> },
}

/// Where the detailed result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "from", content = "service", rename_all = "snake_case")]
pub enum ResultSource {
    Service(ServiceId),
    /// Every service in the chain failed and the classifier's answer was used
    Classifier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedInfo {
    pub response: ProviderResponse,
    pub source: ResultSource,
    /// Every service called for this result, in call order, including the supplemental service
    pub tried: Vec<ServiceId>,
}

/// The combined result of a full verification lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupOutcome {
    pub brand: Option<Brand>,
    /// The detailed result, with the blacklist check merged in
    pub detailed: DetailedInfo,
    pub blacklist: Option<ProviderResponse>,
    /// Successful add-on lookups. Failed add-ons are omitted.
    pub addons: Vec<ProviderResponse>,
}

impl LookupOutcome {
    /// Plain-text rendition of every payload, in the order they were obtained.
    pub fn raw_text(&self) -> String {
        std::iter::once(&self.detailed.response)
            .chain(self.blacklist.iter())
            .chain(self.addons.iter())
            .map(|r| strip_markup(&r.result))
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

pub struct Gateway<P> {
    provider: Arc<P>,
    throttle: ThrottleManager,
}

impl<P> Clone for Gateway<P> {
    fn clone(&self) -> Self {
        Self { provider: Arc::clone(&self.provider), throttle: self.throttle.clone() }
    }
}

impl<P: LookupProvider> Gateway<P> {
    pub fn new(provider: P, throttle: ThrottleManager) -> Self {
        Self { provider: Arc::new(provider), throttle }
    }

    pub fn throttle(&self) -> &ThrottleManager {
        &self.throttle
    }

    /// One throttled call. A reply with a non-success provider status is turned into an error.
    async fn call(&self, service: ServiceId, imei: &Imei) -> Result<ProviderResponse, LookupApiError> {
        let provider = Arc::clone(&self.provider);
        let response = self.throttle.schedule(service, || async move { provider.lookup(service, imei).await }).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(LookupApiError::Rejected { service: service.0, message: strip_markup(&response.result) })
        }
    }

    async fn classify(&self, imei: &Imei) -> Option<ProviderResponse> {
        match self.call(CLASSIFIER_SERVICE, imei).await {
            Ok(response) => Some(response),
            Err(e) => {
                warn!("🔎️ Brand classifier failed for {imei}: {e}");
                None
            },
        }
    }

    /// Asks the classifier service for the manufacturer. Any failure, or a manufacturer outside the known brands,
    /// gives `None`.
    pub async fn detect_brand(&self, imei: &Imei) -> Option<Brand> {
        self.classify(imei).await.as_ref().and_then(brand_from_classifier)
    }

    /// Fetches the detailed data for the device along the brand's service chain.
    pub async fn get_detailed_info(&self, imei: &Imei, brand: Option<Brand>) -> Result<DetailedInfo, GatewayError> {
        self.detailed_with_fallback(imei, brand, None).await
    }

    async fn detailed_with_fallback(
        &self,
        imei: &Imei,
        brand: Option<Brand>,
        classifier: Option<ProviderResponse>,
    ) -> Result<DetailedInfo, GatewayError> {
        let profile = profile_for(brand);
        let mut tried = Vec::new();
        let mut last_error = None;
        for service in profile.service_chain() {
            tried.push(service);
            match self.call(service, imei).await {
                Ok(mut response) => {
                    debug!("🔎️ {service} answered for {imei}");
                    if let Some(supplemental) = profile.supplemental {
                        let missing = supplemental.critical_fields.iter().any(|f| response.field(f).is_none());
                        if missing {
                            tried.push(supplemental.service);
                            match self.call(supplemental.service, imei).await {
                                Ok(extra) => {
                                    let filled = response.merge_missing(&extra);
                                    debug!("🔎️ {} filled in {filled:?} for {imei}", supplemental.service);
                                },
                                Err(e) => warn!("🔎️ Supplemental lookup on {} failed for {imei}: {e}", supplemental.service),
                            }
                        }
                    }
                    return Ok(DetailedInfo { response, source: ResultSource::Service(service), tried });
                },
                Err(e) => {
                    warn!("🔎️ Lookup on {service} failed for {imei}: {e}");
                    last_error = Some(e.to_string());
                },
            }
        }
        let classifier = match classifier {
            Some(c) => Some(c),
            None => {
                tried.push(CLASSIFIER_SERVICE);
                self.classify(imei).await
            },
        };
        match classifier {
            Some(response) => {
                warn!("🔎️ Every service for {} failed for {imei}. Using the classifier result.", brand_name(brand));
                Ok(DetailedInfo { response, source: ResultSource::Classifier, tried })
            },
            None => {
                error!("🔎️ Every lookup path failed for {imei}. Tried [{}]", service_list(&tried));
                Err(GatewayError::Exhausted { tried, last_error })
            },
        }
    }

    /// Runs the blacklist registry check. Failures are logged and give `None`.
    pub async fn check_blacklist(&self, imei: &Imei) -> Option<ProviderResponse> {
        match self.call(BLACKLIST_SERVICE, imei).await {
            Ok(r) => Some(r),
            Err(e) => {
                warn!("🔎️ Blacklist check failed for {imei}: {e}");
                None
            },
        }
    }

    /// Runs the requested add-on services concurrently. Each add-on is called once, and only if the brand offers it.
    /// Failed add-ons are dropped from the result.
    pub async fn run_addons(&self, imei: &Imei, brand: Option<Brand>, addon_ids: &[u16]) -> Vec<ProviderResponse> {
        let profile = profile_for(brand);
        let mut services = Vec::with_capacity(addon_ids.len());
        for id in addon_ids {
            if profile.addon(*id).is_none() {
                info!("🔎️ Add-on {} is not offered for {}. Skipping it for {imei}.", ServiceId(*id), brand_name(brand));
            } else if !services.contains(&ServiceId(*id)) {
                services.push(ServiceId(*id));
            }
        }
        let calls = services.into_iter().map(|service| {
            async move {
                match self.call(service, imei).await {
                    Ok(r) => Some(r),
                    Err(e) => {
                        warn!("🔎️ Add-on {service} failed for {imei}: {e}");
                        None
                    },
                }
            }
        });
        join_all(calls).await.into_iter().flatten().collect()
    }

    /// The full verification lookup: classify, fetch the detailed data for the resolved brand, then run the blacklist
    /// check and the add-ons. When the classifier does not recognise the brand, `declared` is used instead.
    pub async fn lookup(
        &self,
        imei: &Imei,
        declared: Option<Brand>,
        addon_ids: &[u16],
    ) -> Result<LookupOutcome, GatewayError> {
        let classifier = self.classify(imei).await;
        let detected = classifier.as_ref().and_then(brand_from_classifier);
        let brand = detected.or(declared);
        if detected.is_some() && declared.is_some() && detected != declared {
            info!("🔎️ {imei} was declared as {} but the classifier says {}", brand_name(declared), brand_name(detected));
        }
        let mut detailed = self.detailed_with_fallback(imei, brand, classifier).await?;
        let blacklist = self.check_blacklist(imei).await;
        if let Some(blacklist) = &blacklist {
            detailed.response.merge_missing(blacklist);
        }
        let addons = self.run_addons(imei, brand, addon_ids).await;
        Ok(LookupOutcome { brand, detailed, blacklist, addons })
    }
}

fn brand_name(brand: Option<Brand>) -> &'static str {
    brand.map(|b| b.as_str()).unwrap_or("an unknown brand")
}

fn brand_from_classifier(response: &ProviderResponse) -> Option<Brand> {
    ["brand", "manufacturer", "brandName", "make"]
        .iter()
        .find_map(|key| response.str_field(key))
        .and_then(Brand::normalize)
        .or_else(|| {
            strip_markup(&response.result)
                .lines()
                .filter_map(|l| l.split_once(':'))
                .filter(|(k, _)| {
                    let k = k.trim().to_ascii_lowercase();
                    k == "brand" || k == "manufacturer"
                })
                .find_map(|(_, v)| Brand::normalize(v))
        })
}
