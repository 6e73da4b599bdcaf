use std::sync::Arc;

use log::*;
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client,
};

use crate::{config::LookupConfig, helpers::parse_provider_body, LookupApiError, ProviderResponse, ServiceId};

#[derive(Clone)]
pub struct LookupApi {
    config: LookupConfig,
    client: Arc<Client>,
}

impl LookupApi {
    pub fn new(config: LookupConfig) -> Result<Self, LookupApiError> {
        let mut headers = HeaderMap::with_capacity(1);
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| LookupApiError::Initialization(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client) })
    }

    /// Runs one lookup of `imei` against the given provider service.
    ///
    /// A reply with a non-success provider status is *not* an error at this level; it is returned as a
    /// [`ProviderResponse`] so that the caller can decide whether to fall back to another service.
    pub async fn lookup(&self, service: ServiceId, imei: &str) -> Result<ProviderResponse, LookupApiError> {
        let service_str = service.0.to_string();
        let params = [
            ("format", "json"),
            ("key", self.config.api_key.reveal().as_str()),
            ("imei", imei),
            ("service", service_str.as_str()),
        ];
        trace!("Sending lookup to {service}");
        let body = self.get(&params).await?;
        let response = parse_provider_body(service, &body)?;
        debug!("Lookup on {service} completed with status {:?}", response.status);
        Ok(response)
    }

    async fn get(&self, params: &[(&str, &str)]) -> Result<String, LookupApiError> {
        let response = self.client.get(self.config.base_url.as_str()).query(params).send().await.map_err(|e| {
            if e.is_timeout() {
                LookupApiError::Timeout
            } else {
                LookupApiError::RequestFailed(e.to_string())
            }
        })?;
        let status = response.status();
        let text = response.text().await.map_err(|e| LookupApiError::ResponseError(e.to_string()))?;
        if status.is_success() {
            Ok(text)
        } else {
            Err(LookupApiError::QueryError { status: status.as_u16(), message: text })
        }
    }

    pub fn config(&self) -> &LookupConfig {
        &self.config
    }
}
