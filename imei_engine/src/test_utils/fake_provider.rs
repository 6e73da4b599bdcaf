use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use lookup_tools::{LookupApiError, ProviderResponse, ProviderStatus, ServiceId};
use serde_json::Value;

use crate::{db_types::Imei, gateway::LookupProvider};

/// A scripted, in-process stand-in for the remote provider. Every service answers with whatever was scripted for it;
/// unscripted services fail. Every call is recorded.
#[derive(Debug, Clone, Default)]
pub struct FakeProvider {
    replies: Arc<Mutex<HashMap<u16, Result<ProviderResponse, LookupApiError>>>>,
    calls: Arc<Mutex<Vec<ServiceId>>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeed(&self, service: u16, object: Value) -> &Self {
        let reply = ProviderResponse::success(ServiceId(service), object);
        self.set(service, Ok(reply))
    }

    pub fn succeed_with_text(&self, service: u16, text: &str) -> &Self {
        let reply = ProviderResponse::new(ServiceId(service), ProviderStatus::Success, text);
        self.set(service, Ok(reply))
    }

    pub fn reject(&self, service: u16, message: &str) -> &Self {
        let reply = ProviderResponse::new(ServiceId(service), ProviderStatus::Rejected, message);
        self.set(service, Ok(reply))
    }

    pub fn fail(&self, service: u16) -> &Self {
        self.set(service, Err(LookupApiError::Timeout))
    }

    /// A classifier reply identifying the given manufacturer
    pub fn classify_as(&self, manufacturer: &str) -> &Self {
        self.succeed(crate::brands::CLASSIFIER_SERVICE.0, serde_json::json!({ "brand": manufacturer }))
    }

    fn set(&self, service: u16, reply: Result<ProviderResponse, LookupApiError>) -> &Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies.insert(service, reply);
        }
        self
    }

    pub fn calls(&self) -> Vec<ServiceId> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, service: u16) -> usize {
        self.calls().iter().filter(|s| s.0 == service).count()
    }
}

impl LookupProvider for FakeProvider {
    async fn lookup(&self, service: ServiceId, _imei: &Imei) -> Result<ProviderResponse, LookupApiError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(service);
        }
        let reply = self.replies.lock().ok().and_then(|r| r.get(&service.0).cloned());
        reply.unwrap_or_else(|| {
            Err(LookupApiError::QueryError { status: 404, message: format!("{service} is not scripted") })
        })
    }
}
