use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::helpers::text_fields;

/// The numeric identifier of a provider service. Each service is a distinct database on the provider side, with its
/// own price and its own quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(pub u16);

impl Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "svc#{}", self.0)
    }
}

impl From<u16> for ServiceId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    Success,
    Failed,
    Rejected,
    Unknown,
}

impl From<&str> for ProviderStatus {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "success" | "ok" | "done" => Self::Success,
            "failed" | "error" | "fail" => Self::Failed,
            "rejected" | "denied" => Self::Rejected,
            _ => Self::Unknown,
        }
    }
}

/// A single answer from the provider for one service.
///
/// `result` is the human-readable payload (often HTML fragments), `object` is the structured payload when the service
/// offers one. Either may be missing or partially populated; consumers must treat every field as optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub service: ServiceId,
    pub status: ProviderStatus,
    pub result: String,
    pub object: Option<Value>,
}

impl ProviderResponse {
    pub fn new(service: ServiceId, status: ProviderStatus, result: impl Into<String>) -> Self {
        Self { service, status, result: result.into(), object: None }
    }

    pub fn success(service: ServiceId, object: Value) -> Self {
        Self { service, status: ProviderStatus::Success, result: String::new(), object: Some(object) }
    }

    pub fn is_success(&self) -> bool {
        self.status == ProviderStatus::Success
    }

    /// Looks up a top-level field of the structured payload. Null values count as absent.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.object.as_ref().and_then(|o| o.get(key)).filter(|v| !v.is_null())
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
    }

    /// Copies every field from `other` that is absent here. The fields of a text-only answer are read from its
    /// `Key: Value` lines. Fields that are already populated are never overwritten, and keys are compared ignoring
    /// case and punctuation. Returns the names of the fields that were filled in.
    pub fn merge_missing(&mut self, other: &ProviderResponse) -> Vec<String> {
        let mut theirs = match &other.object {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        for (key, value) in text_fields(&other.result) {
            if !theirs.keys().any(|k| same_key(k, &key)) {
                theirs.insert(key, value);
            }
        }
        if theirs.is_empty() {
            return Vec::new();
        }
        if !matches!(self.object, Some(Value::Object(_))) {
            self.object = Some(Value::Object(Map::new()));
        }
        let Some(Value::Object(ours)) = &mut self.object else {
            return Vec::new();
        };
        let mut filled = Vec::new();
        for (key, value) in theirs {
            if value.is_null() {
                continue;
            }
            let present = ours.iter().any(|(k, v)| same_key(k, &key) && !v.is_null());
            if !present {
                filled.push(key.clone());
                ours.insert(key, value);
            }
        }
        filled
    }
}

fn same_key(a: &str, b: &str) -> bool {
    fn normalized(s: &str) -> impl Iterator<Item = char> + '_ {
        s.chars().filter(char::is_ascii_alphanumeric).map(|c| c.to_ascii_lowercase())
    }
    normalized(a).eq(normalized(b))
}
