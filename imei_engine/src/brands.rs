//! # Brand registry
//!
//! Every brand the engine understands is described by exactly one [`BrandProfile`]. The profile is the single dispatch
//! table for brand-dependent behaviour:
//! * the aliases the classifier service may use for the brand,
//! * the ordered chain of provider services used for the detailed lookup, with an optional supplemental service that
//!   fills in missing critical fields,
//! * the default base price and the add-on services that can be ordered with it,
//! * the vendor-specific field names that carry the registration-guard flag in provider payloads.
//!
//! Adding a brand means adding a variant to [`Brand`] and one entry to the registry below.
use std::{fmt::Display, str::FromStr};

use imei_common::Credits;
use lookup_tools::ServiceId;
use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

/// The service that infers the manufacturer from the identifier (a TAC lookup).
pub const CLASSIFIER_SERVICE: ServiceId = ServiceId(11);
/// The brand-independent stolen / blacklisted device registry check.
pub const BLACKLIST_SERVICE: ServiceId = ServiceId(6);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Brand {
    Apple,
    Samsung,
    Xiaomi,
    Huawei,
    Google,
    Motorola,
    OnePlus,
    Honor,
}

impl Brand {
    pub const ALL: [Brand; 8] = [
        Brand::Apple,
        Brand::Samsung,
        Brand::Xiaomi,
        Brand::Huawei,
        Brand::Google,
        Brand::Motorola,
        Brand::OnePlus,
        Brand::Honor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Brand::Apple => "apple",
            Brand::Samsung => "samsung",
            Brand::Xiaomi => "xiaomi",
            Brand::Huawei => "huawei",
            Brand::Google => "google",
            Brand::Motorola => "motorola",
            Brand::OnePlus => "oneplus",
            Brand::Honor => "honor",
        }
    }

    pub fn profile(&self) -> &'static BrandProfile {
        BRAND_PROFILES.iter().find(|p| p.brand == Some(*self)).unwrap_or(&GENERIC_PROFILE)
    }

    /// Maps a free-form manufacturer string (as returned by the classifier, e.g. `"Apple Inc."` or
    /// `"SAMSUNG Korea"`) onto the closed brand vocabulary. Returns `None` for anything unrecognised.
    pub fn normalize(raw: &str) -> Option<Brand> {
        let lower = raw.trim().to_ascii_lowercase();
        if lower.is_empty() {
            return None;
        }
        BRAND_PROFILES
            .iter()
            .find(|p| p.aliases.iter().any(|alias| lower.contains(alias)))
            .and_then(|p| p.brand)
    }
}

/// Returns the profile for the given brand, or the generic profile when the brand is unknown.
pub fn profile_for(brand: Option<Brand>) -> &'static BrandProfile {
    brand.map(|b| b.profile()).unwrap_or(&GENERIC_PROFILE)
}

impl Display for Brand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("Unknown brand: {0}")]
pub struct UnknownBrand(pub String);

impl FromStr for Brand {
    type Err = UnknownBrand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Brand::normalize(s).ok_or_else(|| UnknownBrand(s.to_string()))
    }
}

/// An optional paid lookup that can be ordered alongside the base verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddonService {
    pub id: ServiceId,
    pub name: &'static str,
    pub price: Credits,
}

/// A second service that is only called when the primary answer lacks any of the critical fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Supplemental {
    pub service: ServiceId,
    pub critical_fields: &'static [&'static str],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrandProfile {
    /// `None` for the generic profile used when the brand is unknown.
    pub brand: Option<Brand>,
    pub aliases: &'static [&'static str],
    pub primary: ServiceId,
    pub fallbacks: &'static [ServiceId],
    pub supplemental: Option<Supplemental>,
    pub base_price: Credits,
    pub addons: &'static [AddonService],
    /// Normalised (lower case, alphanumeric only) payload keys that carry this vendor's registration-guard flag.
    pub registration_guard_keys: &'static [&'static str],
}

impl BrandProfile {
    /// The ordered list of services to try for the detailed lookup, primary first, without duplicates.
    pub fn service_chain(&self) -> Vec<ServiceId> {
        let mut chain = Vec::with_capacity(1 + self.fallbacks.len());
        chain.push(self.primary);
        for svc in self.fallbacks {
            if !chain.contains(svc) {
                chain.push(*svc);
            }
        }
        chain
    }

    pub fn addon(&self, id: u16) -> Option<&AddonService> {
        self.addons.iter().find(|a| a.id.0 == id)
    }
}

const CARRIER_CHECK: AddonService =
    AddonService { id: ServiceId(14), name: "Carrier & SIM-lock status", price: Credits::new(50) };
const FRP_KEYS: &[&str] = &["frplock", "frp", "googleaccountlock", "factoryresetprotection"];

pub static GENERIC_PROFILE: BrandProfile = BrandProfile {
    brand: None,
    aliases: &[],
    primary: ServiceId(9),
    fallbacks: &[],
    supplemental: None,
    base_price: Credits::from_whole(1),
    addons: &[CARRIER_CHECK],
    registration_guard_keys: FRP_KEYS,
};

static BRAND_PROFILES: [BrandProfile; 8] = [
    BrandProfile {
        brand: Some(Brand::Apple),
        aliases: &["apple", "iphone", "ipad"],
        primary: ServiceId(4),
        fallbacks: &[ServiceId(3)],
        supplemental: Some(Supplemental { service: ServiceId(19), critical_fields: &["fmiOn", "lostMode", "simLock"] }),
        base_price: Credits::from_whole(3),
        addons: &[
            AddonService { id: ServiceId(13), name: "MDM lock status", price: Credits::from_whole(1) },
            CARRIER_CHECK,
        ],
        registration_guard_keys: &[],
    },
    BrandProfile {
        brand: Some(Brand::Samsung),
        aliases: &["samsung", "galaxy"],
        primary: ServiceId(8),
        fallbacks: &[ServiceId(37), ServiceId(9)],
        supplemental: None,
        base_price: Credits::from_whole(2),
        addons: &[
            AddonService { id: ServiceId(36), name: "Knox registration status", price: Credits::from_whole(1) },
            CARRIER_CHECK,
        ],
        registration_guard_keys: &["knoxregistration", "knoxguard", "reactivationlock", "frplock"],
    },
    BrandProfile {
        brand: Some(Brand::Xiaomi),
        aliases: &["xiaomi", "redmi", "poco"],
        primary: ServiceId(21),
        fallbacks: &[ServiceId(9)],
        supplemental: None,
        base_price: Credits::new(150),
        addons: &[
            AddonService { id: ServiceId(27), name: "Mi Account lock status", price: Credits::from_whole(1) },
            CARRIER_CHECK,
        ],
        registration_guard_keys: &["miaccountlock", "miaccount", "milock", "frplock"],
    },
    BrandProfile {
        brand: Some(Brand::Huawei),
        aliases: &["huawei"],
        primary: ServiceId(22),
        fallbacks: &[ServiceId(9)],
        supplemental: None,
        base_price: Credits::new(150),
        addons: &[CARRIER_CHECK],
        registration_guard_keys: &["huaweiidlock", "activationlock", "frplock"],
    },
    BrandProfile {
        brand: Some(Brand::Google),
        aliases: &["google", "pixel"],
        primary: ServiceId(23),
        fallbacks: &[ServiceId(9)],
        supplemental: None,
        base_price: Credits::from_whole(2),
        addons: &[CARRIER_CHECK],
        registration_guard_keys: FRP_KEYS,
    },
    BrandProfile {
        brand: Some(Brand::Motorola),
        aliases: &["motorola", "moto "],
        primary: ServiceId(24),
        fallbacks: &[ServiceId(9)],
        supplemental: None,
        base_price: Credits::new(150),
        addons: &[CARRIER_CHECK],
        registration_guard_keys: FRP_KEYS,
    },
    BrandProfile {
        brand: Some(Brand::OnePlus),
        aliases: &["oneplus", "one plus"],
        primary: ServiceId(25),
        fallbacks: &[ServiceId(9)],
        supplemental: None,
        base_price: Credits::new(150),
        addons: &[CARRIER_CHECK],
        registration_guard_keys: FRP_KEYS,
    },
    BrandProfile {
        brand: Some(Brand::Honor),
        aliases: &["honor"],
        primary: ServiceId(26),
        fallbacks: &[ServiceId(9)],
        supplemental: None,
        base_price: Credits::new(150),
        addons: &[CARRIER_CHECK],
        registration_guard_keys: FRP_KEYS,
    },
];

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn normalize_classifier_strings() {
        assert_eq!(Brand::normalize("Apple Inc."), Some(Brand::Apple));
        assert_eq!(Brand::normalize("SAMSUNG Korea"), Some(Brand::Samsung));
        assert_eq!(Brand::normalize("Redmi Note 12"), Some(Brand::Xiaomi));
        assert_eq!(Brand::normalize("Google Pixel 7"), Some(Brand::Google));
        assert_eq!(Brand::normalize("OnePlus Technology"), Some(Brand::OnePlus));
        assert_eq!(Brand::normalize("Nokia"), None);
        assert_eq!(Brand::normalize("   "), None);
        assert!("blackberry".parse::<Brand>().is_err());
        assert_eq!("apple".parse::<Brand>().unwrap(), Brand::Apple);
    }

    #[test]
    fn every_brand_has_its_own_profile() {
        for brand in Brand::ALL {
            assert_eq!(brand.profile().brand, Some(brand));
            assert_eq!(brand.as_str().parse::<Brand>().unwrap(), brand);
        }
        assert_eq!(profile_for(None).brand, None);
    }

    #[test]
    fn service_chains() {
        assert_eq!(Brand::Apple.profile().service_chain(), vec![ServiceId(4), ServiceId(3)]);
        assert_eq!(Brand::Samsung.profile().service_chain(), vec![ServiceId(8), ServiceId(37), ServiceId(9)]);
        assert_eq!(GENERIC_PROFILE.service_chain(), vec![ServiceId(9)]);
        assert!(Brand::Apple.profile().supplemental.is_some());
        assert!(Brand::Samsung.profile().supplemental.is_none());
    }

    #[test]
    fn prices() {
        assert_eq!(Brand::Apple.profile().base_price, Credits::from_whole(3));
        assert_eq!(Brand::Samsung.profile().base_price, Credits::from_whole(2));
        assert_eq!(Brand::Honor.profile().base_price, Credits::new(150));
        assert_eq!(Brand::Apple.profile().addon(13).map(|a| a.price), Some(Credits::from_whole(1)));
        assert!(Brand::Apple.profile().addon(36).is_none());
    }
}
