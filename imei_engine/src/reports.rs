//! Structured extraction of provider payloads.
//!
//! Provider answers arrive either as a JSON object or as loosely formatted `Key: Value` text. Both are mapped onto the
//! same set of optional [`DeviceFacts`]. Missing or unrecognised fields are left as `None`. Extraction never fails: a
//! payload that yields nothing is kept as [`DeviceReport::Raw`].
use lookup_tools::{strip_markup, text_fields, ProviderResponse};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::brands::{profile_for, Brand};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFacts {
    pub model: Option<String>,
    pub serial: Option<String>,
    pub carrier: Option<String>,
    pub sim_locked: Option<bool>,
    pub blacklisted: Option<bool>,
    /// Cloud activation lock (Find My on Apple devices)
    pub find_my: Option<bool>,
    pub lost_mode: Option<bool>,
    pub mdm_locked: Option<bool>,
    /// Vendor-specific account lock, e.g. Knox registration or a Mi Account lock
    pub registration_guard: Option<bool>,
    pub warranty: Option<String>,
}

const MODEL_KEYS: &[&str] = &["model", "modelname", "modeldescription", "devicename", "marketingname"];
const SERIAL_KEYS: &[&str] = &["serial", "serialnumber", "sn"];
const CARRIER_KEYS: &[&str] = &["carrier", "lockedcarrier", "network", "simlockcarrier"];
const SIM_LOCK_KEYS: &[&str] = &["simlock", "simlockstatus", "networklock", "locked"];
const BLACKLIST_KEYS: &[&str] = &["blacklisted", "blackliststatus", "blacklist", "gsmablacklisted"];
const FIND_MY_KEYS: &[&str] = &["fmion", "findmyiphone", "fmi", "icloudlock", "activationlock"];
const LOST_MODE_KEYS: &[&str] = &["lostmode", "lostmodestatus"];
const MDM_KEYS: &[&str] = &["mdmlock", "mdm", "mdmstatus"];
const WARRANTY_KEYS: &[&str] = &["warrantystatus", "warranty"];

impl DeviceFacts {
    /// Extracts every fact that can be recognised in the response, preferring the structured payload over the text.
    pub fn extract(response: &ProviderResponse, brand: Option<Brand>) -> Self {
        let guard_keys = profile_for(brand).registration_guard_keys;
        let from_object = match &response.object {
            Some(Value::Object(map)) => Self::from_map(map, guard_keys),
            _ => Self::default(),
        };
        let from_text = Self::from_map(&text_fields(&response.result), guard_keys);
        from_object.or(from_text)
    }

    fn from_map(map: &Map<String, Value>, guard_keys: &[&str]) -> Self {
        let normalized = map.iter().map(|(k, v)| (normalize_key(k), v)).collect::<Vec<_>>();
        let find = |keys: &[&str]| {
            keys.iter().find_map(|key| normalized.iter().find(|(k, v)| k == key && !v.is_null()).map(|(_, v)| *v))
        };
        let text = |keys: &[&str]| find(keys).and_then(value_to_string);
        let flag = |keys: &[&str]| find(keys).and_then(value_to_flag);
        Self {
            model: text(MODEL_KEYS),
            serial: text(SERIAL_KEYS),
            carrier: text(CARRIER_KEYS),
            sim_locked: flag(SIM_LOCK_KEYS),
            blacklisted: flag(BLACKLIST_KEYS),
            find_my: flag(FIND_MY_KEYS),
            lost_mode: flag(LOST_MODE_KEYS),
            mdm_locked: flag(MDM_KEYS),
            registration_guard: if guard_keys.is_empty() { None } else { flag(guard_keys) },
            warranty: text(WARRANTY_KEYS),
        }
    }

    /// Fills every missing fact from `other`. Facts already known are kept.
    pub fn or(self, other: DeviceFacts) -> Self {
        Self {
            model: self.model.or(other.model),
            serial: self.serial.or(other.serial),
            carrier: self.carrier.or(other.carrier),
            sim_locked: self.sim_locked.or(other.sim_locked),
            blacklisted: self.blacklisted.or(other.blacklisted),
            find_my: self.find_my.or(other.find_my),
            lost_mode: self.lost_mode.or(other.lost_mode),
            mdm_locked: self.mdm_locked.or(other.mdm_locked),
            registration_guard: self.registration_guard.or(other.registration_guard),
            warranty: self.warranty.or(other.warranty),
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// The structured result of a verification, tagged by the brand that was resolved for the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceReport {
    Apple(DeviceFacts),
    Samsung(DeviceFacts),
    Android { brand: Brand, facts: DeviceFacts },
    /// The brand could not be resolved, but some facts were recognised.
    Unknown(DeviceFacts),
    /// Nothing could be recognised in the payload. The text is kept as-is.
    Raw { text: String },
}

impl DeviceReport {
    pub fn extract(brand: Option<Brand>, response: &ProviderResponse) -> Self {
        let facts = DeviceFacts::extract(response, brand);
        if facts.is_empty() {
            return DeviceReport::Raw { text: strip_markup(&response.result) };
        }
        match brand {
            Some(Brand::Apple) => DeviceReport::Apple(facts),
            Some(Brand::Samsung) => DeviceReport::Samsung(facts),
            Some(brand) => DeviceReport::Android { brand, facts },
            None => DeviceReport::Unknown(facts),
        }
    }

    pub fn facts(&self) -> Option<&DeviceFacts> {
        match self {
            DeviceReport::Apple(f) | DeviceReport::Samsung(f) | DeviceReport::Unknown(f) => Some(f),
            DeviceReport::Android { facts, .. } => Some(facts),
            DeviceReport::Raw { .. } => None,
        }
    }

    pub fn model_name(&self) -> Option<&str> {
        self.facts().and_then(|f| f.model.as_deref())
    }
}

fn normalize_key(key: &str) -> String {
    key.chars().filter(|c| c.is_ascii_alphanumeric()).collect::<String>().to_ascii_lowercase()
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Interprets the many spellings providers use for on/off flags. Anything ambiguous is `None`.
fn value_to_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => {
            let s = s.trim().to_ascii_lowercase();
            const NEGATIVE: &[&str] = &["off", "no", "false", "unlocked", "clean", "not ", "disabled", "inactive"];
            const POSITIVE: &[&str] = &["on", "yes", "true", "locked", "blacklisted", "lost", "enabled", "active"];
            if NEGATIVE.iter().any(|p| s.starts_with(p)) || s == "not" {
                Some(false)
            } else if POSITIVE.iter().any(|p| s.starts_with(p)) {
                Some(true)
            } else {
                None
            }
        },
        _ => None,
    }
}
