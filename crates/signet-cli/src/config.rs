//! CLI configuration loading and resolution.
//!
//! Profiles live in `~/.signet/config.huml`. Values are resolved with
//! priority: CLI flags (and their `SIGNET_*` environment fallbacks) > config
//! file profile > defaults.

use anyhow::{Context, Result, bail};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use signet_core::config::{
    DEFAULT_API_BASE_URL, DEFAULT_BRANCH, DEFAULT_CERTIFICATE_COMMON_NAME, DEFAULT_KEYCHAIN,
    PortalConfig, StoreConfig, TrustStoreConfig, default_profiles_dir,
};
use signet_core::models::Platform;

/// CLI configuration loaded from config.huml file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CliConfig {
    /// Name of the default profile to use.
    pub default_profile: String,
    /// Map of profile name to profile configuration.
    pub profiles: HashMap<String, Profile>,
}

/// One team's store, portal and keychain settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    pub git_url: Option<String>,
    pub branch: Option<String>,
    /// Store passphrase. Prefer `SIGNET_PASSWORD` over keeping it here.
    pub password: Option<String>,
    pub git_token: Option<String>,
    pub api_key_id: Option<String>,
    pub api_issuer_id: Option<String>,
    pub api_key_path: Option<PathBuf>,
    pub platform: Option<String>,
    pub keychain: Option<String>,
    pub profiles_dir: Option<PathBuf>,
}

/// Values supplied on the command line or through `SIGNET_*` variables.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub git_url: Option<String>,
    pub branch: Option<String>,
    pub password: Option<String>,
    pub git_token: Option<String>,
    pub api_key_id: Option<String>,
    pub api_issuer_id: Option<String>,
    pub api_key_path: Option<PathBuf>,
    pub platform: Option<String>,
    pub keychain: Option<String>,
    pub keychain_password: Option<String>,
    pub profiles_dir: Option<PathBuf>,
    pub checkout_root: Option<PathBuf>,
}

/// Resolved configuration after applying priority rules.
#[derive(Debug, Clone, Default)]
pub struct ResolvedConfig {
    /// Name of the profile the values came from, if any.
    pub profile: Option<String>,
    pub settings: Profile,
    pub keychain_password: Option<String>,
    pub checkout_root: Option<PathBuf>,
}

/// Returns the config directory path (~/.signet).
pub fn config_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|h| h.join(".signet"))
        .context("Could not determine home directory")
}

/// Returns the config file path, honoring `SIGNET_CONFIG`.
pub fn config_path() -> Result<PathBuf> {
    match std::env::var("SIGNET_CONFIG") {
        Ok(p) => Ok(PathBuf::from(p)),
        Err(_) => Ok(config_dir()?.join("config.huml")),
    }
}

/// Load configuration from the config file.
///
/// Returns `Ok(None)` if the config file doesn't exist.
/// Returns an error if the file exists but is invalid.
pub fn load_config() -> Result<Option<CliConfig>> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let config: CliConfig = huml_rs::serde::from_str(&content)
        .with_context(|| format!("Invalid HUML in {}", path.display()))?;

    validate_config(&config)?;
    check_file_permissions(&path);

    Ok(Some(config))
}

fn validate_config(config: &CliConfig) -> Result<()> {
    if config.profiles.is_empty() {
        bail!("Config file must contain at least one profile");
    }

    if !config.profiles.contains_key(&config.default_profile) {
        bail!(
            "Default profile '{}' not found in profiles",
            config.default_profile
        );
    }

    for (name, profile) in &config.profiles {
        if let Some(platform) = &profile.platform {
            if let Err(e) = platform.parse::<Platform>() {
                bail!("Profile '{}': {}", name, e);
            }
        }
    }

    Ok(())
}

/// Warn if the config file is readable by group or others, since it may
/// hold the store passphrase.
#[cfg(unix)]
fn check_file_permissions(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(metadata) = std::fs::metadata(path) {
        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            tracing::warn!(
                "{} has overly permissive permissions ({:o}). Consider running: chmod 600 {}",
                path.display(),
                mode & 0o777,
                path.display()
            );
        }
    }
}

#[cfg(not(unix))]
fn check_file_permissions(_path: &std::path::Path) {}

/// Resolve configuration by applying priority rules.
pub fn resolve_config(
    profile_flag: Option<&str>,
    overrides: Overrides,
    file_config: Option<CliConfig>,
) -> Result<ResolvedConfig> {
    let mut resolved = ResolvedConfig::default();

    if let Some(config) = file_config {
        let name = profile_flag.unwrap_or(&config.default_profile).to_string();
        match config.profiles.get(&name) {
            Some(profile) => {
                resolved.settings = profile.clone();
                resolved.profile = Some(name);
            }
            None if profile_flag.is_some() => bail!(
                "Profile '{}' not found. Run 'signet config show' to see available profiles.",
                name
            ),
            None => {}
        }
    } else if let Some(requested) = profile_flag {
        bail!(
            "Profile '{}' not found. No config file exists at {}.",
            requested,
            config_path()?.display()
        );
    }

    let settings = &mut resolved.settings;
    overlay(&mut settings.git_url, overrides.git_url);
    overlay(&mut settings.branch, overrides.branch);
    overlay(&mut settings.password, overrides.password);
    overlay(&mut settings.git_token, overrides.git_token);
    overlay(&mut settings.api_key_id, overrides.api_key_id);
    overlay(&mut settings.api_issuer_id, overrides.api_issuer_id);
    overlay(&mut settings.api_key_path, overrides.api_key_path);
    overlay(&mut settings.platform, overrides.platform);
    overlay(&mut settings.keychain, overrides.keychain);
    overlay(&mut settings.profiles_dir, overrides.profiles_dir);
    resolved.keychain_password = overrides.keychain_password;
    resolved.checkout_root = overrides.checkout_root;

    Ok(resolved)
}

fn overlay<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

impl ResolvedConfig {
    pub fn platform(&self) -> Result<Platform> {
        match &self.settings.platform {
            Some(p) => p.parse::<Platform>().map_err(anyhow::Error::msg),
            None => Ok(Platform::Ios),
        }
    }

    pub fn store_config(&self) -> Result<StoreConfig> {
        let settings = &self.settings;
        let Some(git_url) = settings.git_url.clone() else {
            bail!("No secret store configured. Set --git-url or SIGNET_GIT_URL");
        };
        let Some(password) = settings.password.clone() else {
            bail!("No store passphrase configured. Set SIGNET_PASSWORD");
        };

        let mut config = StoreConfig::new(git_url, SecretString::from(password))
            .with_branch(settings.branch.as_deref().unwrap_or(DEFAULT_BRANCH));
        config.access_token = settings.git_token.clone().map(SecretString::from);
        config.checkout_root = self.checkout_root.clone();
        config.validate()?;
        Ok(config)
    }

    pub fn portal_config(&self) -> Result<PortalConfig> {
        let settings = &self.settings;
        let (Some(key_id), Some(issuer_id), Some(key_path)) = (
            settings.api_key_id.clone(),
            settings.api_issuer_id.clone(),
            settings.api_key_path.clone(),
        ) else {
            bail!(
                "Incomplete App Store Connect configuration. Set all of: --api-key-id, --api-issuer-id, --api-key-path"
            );
        };

        Ok(PortalConfig {
            key_id,
            issuer_id,
            private_key_path: key_path,
            platform: self.platform()?,
            base_url: DEFAULT_API_BASE_URL.to_string(),
            certificate_common_name: DEFAULT_CERTIFICATE_COMMON_NAME.to_string(),
        })
    }

    pub fn trust_store_config(
        &self,
        reinstall: bool,
        additional_cert_urls: Vec<String>,
    ) -> TrustStoreConfig {
        TrustStoreConfig {
            keychain_name: self
                .settings
                .keychain
                .clone()
                .unwrap_or_else(|| DEFAULT_KEYCHAIN.to_string()),
            keychain_password: SecretString::from(self.keychain_password.clone().unwrap_or_default()),
            reinstall,
            profiles_dir: self
                .settings
                .profiles_dir
                .clone()
                .unwrap_or_else(default_profiles_dir),
            additional_cert_urls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn team_config() -> CliConfig {
        let mut profiles = HashMap::new();
        profiles.insert(
            "default".to_string(),
            Profile {
                git_url: Some("git@git.example.com:ios/certs.git".to_string()),
                branch: Some("team-a".to_string()),
                keychain: Some("build.keychain".to_string()),
                ..Profile::default()
            },
        );
        profiles.insert(
            "mac".to_string(),
            Profile {
                git_url: Some("git@git.example.com:mac/certs.git".to_string()),
                platform: Some("macos".to_string()),
                ..Profile::default()
            },
        );
        CliConfig {
            default_profile: "default".to_string(),
            profiles,
        }
    }

    #[test]
    fn test_resolve_with_no_config() {
        let resolved = resolve_config(None, Overrides::default(), None).unwrap();
        assert!(resolved.profile.is_none());
        assert_eq!(resolved.platform().unwrap(), Platform::Ios);
        assert!(resolved.store_config().is_err());

        let trust = resolved.trust_store_config(false, Vec::new());
        assert_eq!(trust.keychain_name, DEFAULT_KEYCHAIN);
        assert_eq!(trust.profiles_dir, default_profiles_dir());
    }

    #[test]
    fn test_resolve_default_profile() {
        let overrides = Overrides {
            password: Some("hunter2".to_string()),
            ..Overrides::default()
        };
        let resolved = resolve_config(None, overrides, Some(team_config())).unwrap();
        assert_eq!(resolved.profile.as_deref(), Some("default"));

        let store = resolved.store_config().unwrap();
        assert_eq!(store.git_url, "git@git.example.com:ios/certs.git");
        assert_eq!(store.branch, "team-a");
        assert_eq!(store.passphrase.expose_secret(), "hunter2");
        assert_eq!(
            resolved.trust_store_config(true, Vec::new()).keychain_name,
            "build.keychain"
        );
    }

    #[test]
    fn test_flags_override_profile() {
        let overrides = Overrides {
            git_url: Some("https://git.example.com/override.git".to_string()),
            password: Some("p".to_string()),
            ..Overrides::default()
        };
        let resolved = resolve_config(Some("mac"), overrides, Some(team_config())).unwrap();
        assert_eq!(resolved.platform().unwrap(), Platform::Macos);

        let store = resolved.store_config().unwrap();
        assert_eq!(store.git_url, "https://git.example.com/override.git");
        assert_eq!(store.branch, DEFAULT_BRANCH);
    }

    #[test]
    fn test_resolve_nonexistent_profile_error() {
        let result = resolve_config(Some("nonexistent"), Overrides::default(), Some(team_config()));
        assert!(result.unwrap_err().to_string().contains("not found"));

        temp_env::with_var("SIGNET_CONFIG", Some("/nonexistent/config.huml"), || {
            let result = resolve_config(Some("work"), Overrides::default(), None);
            assert!(result.unwrap_err().to_string().contains("No config file"));
        });
    }

    #[test]
    fn test_portal_config_requires_all_credentials() {
        let overrides = Overrides {
            api_key_id: Some("ABC123XYZ0".to_string()),
            api_issuer_id: Some("12345678-1234-1234-1234-123456789012".to_string()),
            ..Overrides::default()
        };
        let resolved = resolve_config(None, overrides.clone(), None).unwrap();
        assert!(resolved.portal_config().is_err());

        let overrides = Overrides {
            api_key_path: Some(PathBuf::from("/tmp/AuthKey.p8")),
            ..overrides
        };
        let portal = resolve_config(None, overrides, None)
            .unwrap()
            .portal_config()
            .unwrap();
        assert_eq!(portal.key_id, "ABC123XYZ0");
        assert_eq!(portal.base_url, DEFAULT_API_BASE_URL);
    }

    #[test]
    fn test_validate_config() {
        assert!(validate_config(&CliConfig::default()).is_err());

        let mut config = team_config();
        config.default_profile = "missing".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = team_config();
        if let Some(profile) = config.profiles.get_mut("mac") {
            profile.platform = Some("windows".to_string());
        }
        assert!(validate_config(&config).is_err());

        assert!(validate_config(&team_config()).is_ok());
    }

    #[test]
    fn test_load_config_from_signet_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.huml");
        std::fs::write(
            &path,
            "%HUML v0.2.0\ndefault_profile: \"default\"\n\nprofiles::\n  default::\n    git_url: \"https://git.example.com/certs.git\"\n    branch: \"team-b\"\n",
        )
        .unwrap();

        temp_env::with_var("SIGNET_CONFIG", Some(path.as_os_str()), || {
            let config = load_config().unwrap().unwrap();
            let profile = &config.profiles["default"];
            assert_eq!(profile.branch.as_deref(), Some("team-b"));
            assert!(profile.password.is_none());
        });

        temp_env::with_var("SIGNET_CONFIG", Some(dir.path().join("absent.huml")), || {
            assert!(load_config().unwrap().is_none());
        });
    }
}
