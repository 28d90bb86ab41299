//! Provisioning profile document parsing.
//!
//! Profile documents are CMS-signed property lists. The signed content is
//! stored unencrypted inside the envelope, so the XML plist can be located
//! directly in the bytes without invoking `security cms`.

use std::time::SystemTime;

use chrono::{DateTime, Utc};

use crate::error::{Result, SignetError};

/// Metadata extracted from a provisioning profile document.
#[derive(Debug, Clone)]
pub struct ProfileDocument {
    /// Profile name as registered on the portal.
    pub name: String,
    /// Profile UUID (remote identity).
    pub uuid: String,
    /// Bundle identifier, without the team prefix.
    pub bundle_identifier: Option<String>,
    /// Profile expiration date.
    pub expires_at: Option<DateTime<Utc>>,
    /// UDIDs of provisioned devices.
    pub devices: Vec<String>,
}

impl ProfileDocument {
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}

/// Parses a provisioning profile document (signed or bare plist).
pub fn parse_profile_document(data: &[u8]) -> Result<ProfileDocument> {
    let plist_bytes = extract_plist(data)?;
    parse_profile_plist(plist_bytes)
}

/// Locates the XML property list embedded in a profile document.
fn extract_plist(data: &[u8]) -> Result<&[u8]> {
    const START: &[u8] = b"<?xml";
    const END: &[u8] = b"</plist>";

    let start = find(data, START)
        .ok_or_else(|| SignetError::ProfileParse("No property list found in profile".to_string()))?;
    let end = find(&data[start..], END)
        .map(|pos| start + pos + END.len())
        .ok_or_else(|| SignetError::ProfileParse("Unterminated property list in profile".to_string()))?;

    Ok(&data[start..end])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Parses profile plist content to extract metadata.
fn parse_profile_plist(plist_content: &[u8]) -> Result<ProfileDocument> {
    let plist: plist::Value = plist::from_bytes(plist_content)
        .map_err(|e| SignetError::ProfileParse(format!("Failed to parse profile plist: {}", e)))?;

    let dict = plist
        .as_dictionary()
        .ok_or_else(|| SignetError::ProfileParse("Profile plist is not a dictionary".to_string()))?;

    let uuid = dict
        .get("UUID")
        .and_then(|v| v.as_string())
        .ok_or_else(|| SignetError::ProfileParse("Profile missing UUID".to_string()))?
        .to_string();

    let name = dict
        .get("Name")
        .and_then(|v| v.as_string())
        .unwrap_or("Unnamed Profile")
        .to_string();

    // application-identifier is "<TEAMID>.<bundle id>"
    let bundle_identifier = dict
        .get("Entitlements")
        .and_then(|v| v.as_dictionary())
        .and_then(|ents| ents.get("application-identifier"))
        .and_then(|v| v.as_string())
        .map(|s| match s.find('.') {
            Some(dot_pos) => s[dot_pos + 1..].to_string(),
            None => s.to_string(),
        });

    let expires_at = dict
        .get("ExpirationDate")
        .and_then(|v| v.as_date())
        .and_then(|d| {
            let system_time: SystemTime = d.into();
            system_time
                .duration_since(SystemTime::UNIX_EPOCH)
                .ok()
                .and_then(|dur| DateTime::from_timestamp(dur.as_secs() as i64, 0))
        });

    let devices = dict
        .get("ProvisionedDevices")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_string())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();

    Ok(ProfileDocument {
        name,
        uuid,
        bundle_identifier,
        expires_at,
        devices,
    })
}
