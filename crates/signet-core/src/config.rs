//! Configuration for the secret store, the portal, and the local trust store.
//!
//! The CLI fills these from its flags, `SIGNET_*` environment variables and
//! config-file profiles.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::error::{Result, SignetError};
use crate::models::Platform;
use crate::store::layout::ExtensionTable;

pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_COMMIT_PREFIX: &str = "[signet]";
pub const DEFAULT_KEYCHAIN: &str = "login.keychain";
pub const DEFAULT_API_BASE_URL: &str = "https://api.appstoreconnect.apple.com";
pub const DEFAULT_CERTIFICATE_COMMON_NAME: &str = "Signet Signing Key";

/// Where and how credentials are persisted.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Git URL of the secret store repository.
    pub git_url: String,
    /// Branch holding this team's credentials.
    pub branch: String,
    /// Passphrase for file encryption.
    pub passphrase: SecretString,
    /// Optional token injected into HTTPS clone URLs.
    pub access_token: Option<SecretString>,
    /// Recognized file extensions.
    pub extensions: ExtensionTable,
    /// Prefix of every commit message written by the store.
    pub commit_message_prefix: String,
    /// Directory under which ephemeral checkouts are created (system temp if unset).
    pub checkout_root: Option<PathBuf>,
}

impl StoreConfig {
    pub fn new(git_url: impl Into<String>, passphrase: SecretString) -> Self {
        Self {
            git_url: git_url.into(),
            branch: DEFAULT_BRANCH.to_string(),
            passphrase,
            access_token: None,
            extensions: ExtensionTable::default(),
            commit_message_prefix: DEFAULT_COMMIT_PREFIX.to_string(),
            checkout_root: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.git_url.trim().is_empty() {
            return Err(SignetError::Configuration("Git URL is empty".to_string()));
        }
        if self.branch.trim().is_empty() {
            return Err(SignetError::Configuration("Branch name is empty".to_string()));
        }
        self.extensions
            .validate()
            .map_err(SignetError::Configuration)
    }
}

/// App Store Connect API credentials and portal scope.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    /// API key ID (10 alphanumeric characters).
    pub key_id: String,
    /// Issuer ID (UUID).
    pub issuer_id: String,
    /// Path to the `.p8` private key.
    pub private_key_path: PathBuf,
    /// Platform whose devices count toward profiles.
    pub platform: Platform,
    pub base_url: String,
    /// Common name placed in generated CSRs.
    pub certificate_common_name: String,
}

/// Local trust store (keychain) settings for installation.
#[derive(Debug, Clone)]
pub struct TrustStoreConfig {
    /// Keychain name or path.
    pub keychain_name: String,
    /// Keychain password (may be empty for an unlocked login keychain).
    pub keychain_password: SecretString,
    /// Remove certificates already present before importing.
    pub reinstall: bool,
    /// Directory the build toolchain reads provisioning profiles from.
    pub profiles_dir: PathBuf,
    /// Extra certificates (e.g. intermediate CAs) fetched by URL and imported.
    pub additional_cert_urls: Vec<String>,
}

impl Default for TrustStoreConfig {
    fn default() -> Self {
        Self {
            keychain_name: DEFAULT_KEYCHAIN.to_string(),
            keychain_password: SecretString::from(String::new()),
            reinstall: false,
            profiles_dir: default_profiles_dir(),
            additional_cert_urls: Vec::new(),
        }
    }
}

/// Standard provisioning-profile directory of the current user.
pub fn default_profiles_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("~"))
        .join("Library/MobileDevice/Provisioning Profiles")
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_store_config_defaults() {
        let config = StoreConfig::new(
            "https://git.example.com/certs.git",
            SecretString::from("hunter2".to_string()),
        );
        assert_eq!(config.branch, DEFAULT_BRANCH);
        assert_eq!(config.passphrase.expose_secret(), "hunter2");
        assert!(config.access_token.is_none());
        assert_eq!(config.commit_message_prefix, DEFAULT_COMMIT_PREFIX);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_branch() {
        let config = StoreConfig::new("https://x", SecretString::from("p".to_string()))
            .with_branch("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_shared_extension() {
        let mut config = StoreConfig::new("https://x", SecretString::from("p".to_string()));
        config.extensions.private_key.push("cer".to_string());
        let err = config.validate().unwrap_err();
        assert!(matches!(err, SignetError::Configuration(_)));
    }

    #[test]
    fn test_trust_store_defaults() {
        let config = TrustStoreConfig::default();
        assert_eq!(config.keychain_name, DEFAULT_KEYCHAIN);
        assert!(!config.reinstall);
        assert!(config.profiles_dir.ends_with("Library/MobileDevice/Provisioning Profiles"));
    }
}
