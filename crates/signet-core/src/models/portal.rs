//! Portal-side resources: bundle identifiers and registered devices.

use serde::{Deserialize, Serialize};

/// A bundle identifier registered on the portal.
///
/// Resolved once at the start of a run and never refreshed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleId {
    pub identifier: String,
    pub remote_id: String,
    pub display_name: String,
}

/// Device platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Macos,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Macos => "macos",
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ios" => Ok(Platform::Ios),
            "macos" | "mac_os" | "osx" => Ok(Platform::Macos),
            _ => Err(format!("Unknown platform: {}", s)),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Registration status of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Enabled,
    Disabled,
}

/// A device registered on the portal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Portal resource ID.
    pub remote_id: String,
    pub udid: String,
    pub name: String,
    pub status: DeviceStatus,
    pub platform: Platform,
}

impl Device {
    /// Whether this device belongs to the current device set for `platform`.
    pub fn counts_for(&self, platform: Platform) -> bool {
        self.status == DeviceStatus::Enabled && self.platform == platform
    }
}

/// Filters `devices` down to the enabled ones on `platform`.
pub fn current_device_set(devices: &[Device], platform: Platform) -> Vec<Device> {
    devices
        .iter()
        .filter(|d| d.counts_for(platform))
        .cloned()
        .collect()
}
