//! Deterministic risk scoring.
//!
//! The score starts at a configurable base value and every *active* negative signal subtracts its penalty. Signals
//! that are absent or unknown never subtract anything. The result is clamped to `[0, base_score]` and classified into
//! one of four tiers by the percentage of the base score that remains.
use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::reports::DeviceFacts;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "carrier", rename_all = "lowercase")]
pub enum NetworkLock {
    Unlocked,
    /// Locked to a carrier, which may be unknown.
    Locked(Option<String>),
    Unknown,
}

/// The named inputs to the scorer. `None` means "not reported" and never counts against the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RiskSignals {
    pub blacklisted: Option<bool>,
    pub lost_mode: Option<bool>,
    pub cloud_locked: Option<bool>,
    pub mdm_locked: Option<bool>,
    pub registration_guard: Option<bool>,
    pub network_lock: NetworkLock,
}

impl Default for RiskSignals {
    fn default() -> Self {
        Self {
            blacklisted: None,
            lost_mode: None,
            cloud_locked: None,
            mdm_locked: None,
            registration_guard: None,
            network_lock: NetworkLock::Unknown,
        }
    }
}

impl From<&DeviceFacts> for RiskSignals {
    fn from(facts: &DeviceFacts) -> Self {
        let network_lock = match facts.sim_locked {
            Some(true) => NetworkLock::Locked(facts.carrier.clone()),
            Some(false) => NetworkLock::Unlocked,
            None => NetworkLock::Unknown,
        };
        Self {
            blacklisted: facts.blacklisted,
            lost_mode: facts.lost_mode,
            cloud_locked: facts.find_my,
            mdm_locked: facts.mdm_locked,
            registration_guard: facts.registration_guard,
            network_lock,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskConfig {
    pub base_score: u32,
    pub blacklist_penalty: u32,
    pub lost_mode_penalty: u32,
    pub cloud_lock_penalty: u32,
    pub mdm_penalty: u32,
    pub registration_guard_penalty: u32,
    pub network_lock_penalty: u32,
    /// Applied instead of `network_lock_penalty` when the device is locked to one of `low_risk_carriers`.
    pub low_risk_carrier_penalty: u32,
    pub low_risk_carriers: Vec<String>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            base_score: 100,
            blacklist_penalty: 60,
            lost_mode_penalty: 50,
            cloud_lock_penalty: 40,
            mdm_penalty: 30,
            registration_guard_penalty: 30,
            network_lock_penalty: 15,
            low_risk_carrier_penalty: 5,
            low_risk_carriers: Vec::new(),
        }
    }
}

impl RiskConfig {
    pub fn with_low_risk_carriers(mut self, carriers: Vec<String>) -> Self {
        self.low_risk_carriers = carriers;
        self
    }

    fn is_low_risk_carrier(&self, carrier: &str) -> bool {
        let carrier = carrier.trim().to_lowercase();
        self.low_risk_carriers.iter().any(|c| {
            let c = c.trim().to_lowercase();
            !c.is_empty() && carrier.contains(&c)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Danger,
    High,
    Moderate,
    Safe,
}

impl RiskTier {
    /// Classifies a score by the share of the base score it represents: up to 20% is danger, up to 40% high and up
    /// to 60% moderate. The comparison is exact, so fractional percentages never round into a worse tier.
    pub fn classify(score: u32, base_score: u32) -> Self {
        let scaled = u64::from(score) * 100;
        let base = u64::from(base_score);
        if scaled <= base * 20 {
            RiskTier::Danger
        } else if scaled <= base * 40 {
            RiskTier::High
        } else if scaled <= base * 60 {
            RiskTier::Moderate
        } else {
            RiskTier::Safe
        }
    }

    pub fn summary(&self) -> &'static str {
        match self {
            RiskTier::Danger => "Do not buy: the device is reported stolen, lost or locked to another owner.",
            RiskTier::High => "High risk: serious locks are active. Ask the seller to remove them before buying.",
            RiskTier::Moderate => "Moderate risk: some restrictions apply. Check them with the seller.",
            RiskTier::Safe => "No significant risk signals were found.",
        }
    }
}

impl Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskTier::Danger => write!(f, "danger"),
            RiskTier::High => write!(f, "high"),
            RiskTier::Moderate => write!(f, "moderate"),
            RiskTier::Safe => write!(f, "safe"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: u32,
    pub base_score: u32,
    pub tier: RiskTier,
    pub summary: String,
    /// Names of the signals that reduced the score
    pub active_signals: Vec<String>,
}

pub fn assess(signals: &RiskSignals, config: &RiskConfig) -> RiskAssessment {
    let mut penalty = 0u64;
    let mut active_signals = Vec::new();
    let mut apply = |active: Option<bool>, amount: u32, name: &str| {
        if active == Some(true) {
            penalty += u64::from(amount);
            active_signals.push(name.to_string());
        }
    };
    apply(signals.blacklisted, config.blacklist_penalty, "blacklisted");
    apply(signals.lost_mode, config.lost_mode_penalty, "lost_mode");
    apply(signals.cloud_locked, config.cloud_lock_penalty, "cloud_lock");
    apply(signals.mdm_locked, config.mdm_penalty, "mdm_lock");
    apply(signals.registration_guard, config.registration_guard_penalty, "registration_guard");
    if let NetworkLock::Locked(carrier) = &signals.network_lock {
        let low_risk = carrier.as_deref().map(|c| config.is_low_risk_carrier(c)).unwrap_or(false);
        if low_risk {
            apply(Some(true), config.low_risk_carrier_penalty, "network_lock_low_risk");
        } else {
            apply(Some(true), config.network_lock_penalty, "network_lock");
        }
    }
    let base = u64::from(config.base_score);
    let score = base.saturating_sub(penalty) as u32;
    let tier = RiskTier::classify(score, config.base_score);
    RiskAssessment { score, base_score: config.base_score, tier, summary: tier.summary().to_string(), active_signals }
}
