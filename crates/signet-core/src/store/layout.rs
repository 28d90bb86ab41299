//! On-disk layout of the secret store.
//!
//! ```text
//! certs/<certificate type>/<remote id>.<cert ext>
//! certs/<certificate type>/<remote id>.<key ext>
//! profiles/<profile type>/<NamePrefix>_<bundle id>.<profile ext>
//! ```
//!
//! Paths returned here are relative to the checkout root.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::models::{CertificateType, ProfileType};

pub const CERTS_DIR: &str = "certs";
pub const PROFILES_DIR: &str = "profiles";

/// Sentinel that keeps otherwise-empty directories tracked. Never encrypted.
pub const PLACEHOLDER: &str = "placeholder";

pub const GITIGNORE: &str = ".gitignore";
pub const GITIGNORE_CONTENTS: &str = ".DS_Store\n";

/// Kinds of credential file the store and the installer recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Certificate,
    PrivateKey,
    ProvisioningProfile,
}

/// Recognized file extensions per kind, in order of preference.
///
/// The first entry of each list is used for writes; every entry is accepted
/// on reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionTable {
    pub certificate: Vec<String>,
    pub private_key: Vec<String>,
    pub provisioning_profile: Vec<String>,
}

impl Default for ExtensionTable {
    fn default() -> Self {
        Self {
            certificate: vec!["cer".to_string(), "der".to_string()],
            private_key: vec!["p12".to_string(), "pem".to_string()],
            provisioning_profile: vec![
                "mobileprovision".to_string(),
                "provisionprofile".to_string(),
            ],
        }
    }
}

impl ExtensionTable {
    pub fn extensions(&self, kind: FileKind) -> &[String] {
        match kind {
            FileKind::Certificate => &self.certificate,
            FileKind::PrivateKey => &self.private_key,
            FileKind::ProvisioningProfile => &self.provisioning_profile,
        }
    }

    /// Extension used when writing a file of `kind`.
    pub fn preferred(&self, kind: FileKind) -> &str {
        self.extensions(kind)
            .first()
            .map(String::as_str)
            .unwrap_or(match kind {
                FileKind::Certificate => "cer",
                FileKind::PrivateKey => "p12",
                FileKind::ProvisioningProfile => "mobileprovision",
            })
    }

    /// Classifies a path by its extension (case-insensitive).
    pub fn classify(&self, path: &Path) -> Option<FileKind> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        [
            FileKind::Certificate,
            FileKind::PrivateKey,
            FileKind::ProvisioningProfile,
        ]
        .into_iter()
        .find(|kind| self.extensions(*kind).iter().any(|e| e.eq_ignore_ascii_case(&ext)))
    }

    /// Checks that no extension is claimed by two kinds.
    pub fn validate(&self) -> Result<(), String> {
        let kinds = [
            FileKind::Certificate,
            FileKind::PrivateKey,
            FileKind::ProvisioningProfile,
        ];
        for kind in kinds {
            if self.extensions(kind).is_empty() {
                return Err(format!("No extensions configured for {:?}", kind));
            }
        }
        for (i, a) in kinds.iter().enumerate() {
            for b in &kinds[i + 1..] {
                for ext in self.extensions(*a) {
                    if self.extensions(*b).iter().any(|e| e.eq_ignore_ascii_case(ext)) {
                        return Err(format!(
                            "Extension '{}' is configured for both {:?} and {:?}",
                            ext, a, b
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Directory holding certificates and keys of one type.
pub fn certificate_dir(certificate_type: CertificateType) -> PathBuf {
    Path::new(CERTS_DIR).join(certificate_type.as_str())
}

/// Directory holding profiles of one type.
pub fn profile_dir(profile_type: ProfileType) -> PathBuf {
    Path::new(PROFILES_DIR).join(profile_type.as_str())
}

/// Stored file name (without extension) of a profile.
pub fn profile_stem(profile_type: ProfileType, bundle_id: &str) -> String {
    format!("{}_{}", profile_type.name_prefix(), bundle_id)
}

/// Path of the certificate file for `remote_id`, using the preferred extension.
pub fn certificate_path(
    extensions: &ExtensionTable,
    certificate_type: CertificateType,
    remote_id: &str,
) -> PathBuf {
    certificate_dir(certificate_type).join(format!(
        "{}.{}",
        remote_id,
        extensions.preferred(FileKind::Certificate)
    ))
}

/// Path of the private key file for `remote_id`, using the preferred extension.
pub fn private_key_path(
    extensions: &ExtensionTable,
    certificate_type: CertificateType,
    remote_id: &str,
) -> PathBuf {
    certificate_dir(certificate_type).join(format!(
        "{}.{}",
        remote_id,
        extensions.preferred(FileKind::PrivateKey)
    ))
}

/// Path of the profile for `(profile_type, bundle_id)`, using the preferred extension.
pub fn profile_path(
    extensions: &ExtensionTable,
    profile_type: ProfileType,
    bundle_id: &str,
) -> PathBuf {
    profile_dir(profile_type).join(format!(
        "{}.{}",
        profile_stem(profile_type, bundle_id),
        extensions.preferred(FileKind::ProvisioningProfile)
    ))
}

/// True for files inside the credential subtrees that carry ciphertext.
pub fn is_encrypted_entry(relative: &Path) -> bool {
    let in_subtree = relative
        .components()
        .next()
        .and_then(|c| c.as_os_str().to_str())
        .map(|first| first == CERTS_DIR || first == PROFILES_DIR)
        .unwrap_or(false);
    let is_placeholder = relative
        .file_name()
        .map(|name| name == PLACEHOLDER)
        .unwrap_or(false);
    in_subtree && !is_placeholder
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming_scheme() {
        let ext = ExtensionTable::default();
        assert_eq!(
            profile_path(&ext, ProfileType::Adhoc, "com.acme.app"),
            PathBuf::from("profiles/adhoc/AdHoc_com.acme.app.mobileprovision")
        );
        assert_eq!(
            profile_path(&ext, ProfileType::Appstore, "com.acme.app"),
            PathBuf::from("profiles/appstore/AppStore_com.acme.app.mobileprovision")
        );
        assert_eq!(
            profile_path(&ext, ProfileType::Development, "com.acme.app"),
            PathBuf::from("profiles/development/Development_com.acme.app.mobileprovision")
        );
        assert_eq!(
            certificate_path(&ext, CertificateType::Distribution, "ABCD1234"),
            PathBuf::from("certs/distribution/ABCD1234.cer")
        );
        assert_eq!(
            private_key_path(&ext, CertificateType::Development, "ABCD1234"),
            PathBuf::from("certs/development/ABCD1234.p12")
        );
    }

    #[test]
    fn test_classify() {
        let ext = ExtensionTable::default();
        assert_eq!(ext.classify(Path::new("a/B.cer")), Some(FileKind::Certificate));
        assert_eq!(ext.classify(Path::new("a/B.P12")), Some(FileKind::PrivateKey));
        assert_eq!(
            ext.classify(Path::new("x.mobileprovision")),
            Some(FileKind::ProvisioningProfile)
        );
        assert_eq!(ext.classify(Path::new("placeholder")), None);
        assert_eq!(ext.classify(Path::new("notes.txt")), None);
    }

    #[test]
    fn test_validate_rejects_overlap() {
        let mut ext = ExtensionTable::default();
        assert!(ext.validate().is_ok());
        ext.private_key.push("cer".to_string());
        assert!(ext.validate().is_err());
    }

    #[test]
    fn test_encrypted_entries() {
        assert!(is_encrypted_entry(Path::new("certs/distribution/A.cer")));
        assert!(is_encrypted_entry(Path::new("profiles/adhoc/AdHoc_x.mobileprovision")));
        assert!(!is_encrypted_entry(Path::new("certs/distribution/placeholder")));
        assert!(!is_encrypted_entry(Path::new(".gitignore")));
        assert!(!is_encrypted_entry(Path::new("README.md")));
    }
}
