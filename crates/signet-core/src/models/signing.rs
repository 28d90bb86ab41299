//! Code signing models: certificates and provisioning profiles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Signing Certificate
// ============================================================================

/// Signing certificate type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateType {
    Development,
    Distribution,
}

impl CertificateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateType::Development => "development",
            CertificateType::Distribution => "distribution",
        }
    }
}

impl std::str::FromStr for CertificateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" => Ok(CertificateType::Development),
            "distribution" => Ok(CertificateType::Distribution),
            _ => Err(format!("Unknown certificate type: {}", s)),
        }
    }
}

impl std::fmt::Display for CertificateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Provisioning Profile
// ============================================================================

/// Provisioning profile type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileType {
    Appstore,
    Adhoc,
    Development,
}

impl ProfileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileType::Appstore => "appstore",
            ProfileType::Adhoc => "adhoc",
            ProfileType::Development => "development",
        }
    }

    /// File name prefix used for stored profiles (`AdHoc_com.acme.app`).
    pub fn name_prefix(&self) -> &'static str {
        match self {
            ProfileType::Appstore => "AppStore",
            ProfileType::Adhoc => "AdHoc",
            ProfileType::Development => "Development",
        }
    }

    /// The certificate type a profile of this type is signed with.
    pub fn certificate_type(&self) -> CertificateType {
        match self {
            ProfileType::Appstore | ProfileType::Adhoc => CertificateType::Distribution,
            ProfileType::Development => CertificateType::Development,
        }
    }

    /// Whether the profile embeds an explicit device list.
    pub fn requires_devices(&self) -> bool {
        !matches!(self, ProfileType::Appstore)
    }
}

impl std::str::FromStr for ProfileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "appstore" | "app-store" => Ok(ProfileType::Appstore),
            "adhoc" | "ad-hoc" => Ok(ProfileType::Adhoc),
            "development" => Ok(ProfileType::Development),
            _ => Err(format!("Unknown profile type: {}", s)),
        }
    }
}

impl std::fmt::Display for ProfileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Profile state as reported by the portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileState {
    Active,
    Invalid,
}

impl ProfileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileState::Active => "active",
            ProfileState::Invalid => "invalid",
        }
    }
}

/// A provisioning profile as the secret store and the portal know it.
///
/// Stored under `(profile_type, bundle_id)`; matched on the portal by `uuid`.
#[derive(Debug, Clone)]
pub struct ProvisioningProfile {
    pub profile_type: ProfileType,
    pub bundle_id: String,
    pub uuid: String,
    pub name: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub state: ProfileState,
    /// Number of devices embedded in the profile document.
    pub device_count: usize,
}

impl ProvisioningProfile {
    /// True when the profile has an expiration date strictly after `now`.
    pub fn is_unexpired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp > now).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_type_certificate_mapping() {
        assert_eq!(
            ProfileType::Appstore.certificate_type(),
            CertificateType::Distribution
        );
        assert_eq!(
            ProfileType::Adhoc.certificate_type(),
            CertificateType::Distribution
        );
        assert_eq!(
            ProfileType::Development.certificate_type(),
            CertificateType::Development
        );
    }

    #[test]
    fn test_profile_type_parsing() {
        assert_eq!("adhoc".parse::<ProfileType>().unwrap(), ProfileType::Adhoc);
        assert_eq!("AppStore".parse::<ProfileType>().unwrap(), ProfileType::Appstore);
        assert_eq!(
            "ad-hoc".parse::<ProfileType>().unwrap(),
            ProfileType::Adhoc
        );
        assert!("enterprise".parse::<ProfileType>().is_err());
    }

    #[test]
    fn test_appstore_skips_devices() {
        assert!(!ProfileType::Appstore.requires_devices());
        assert!(ProfileType::Adhoc.requires_devices());
        assert!(ProfileType::Development.requires_devices());
    }

    #[test]
    fn test_profile_expiry_is_strict() {
        let now = Utc::now();
        let mut profile = ProvisioningProfile {
            profile_type: ProfileType::Adhoc,
            bundle_id: "com.acme.app".to_string(),
            uuid: "UUID-1".to_string(),
            name: "signet AdHoc com.acme.app".to_string(),
            expires_at: Some(now),
            state: ProfileState::Active,
            device_count: 0,
        };
        assert!(!profile.is_unexpired_at(now));
        assert!(profile.is_unexpired_at(now - chrono::Duration::seconds(1)));

        profile.expires_at = None;
        assert!(!profile.is_unexpired_at(now));
    }
}
