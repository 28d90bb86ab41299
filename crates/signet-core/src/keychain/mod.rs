//! Local trust store (keychain) integration.

pub mod installer;
pub mod security;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;

pub use installer::{
    CertificateInstallReport, ProfileInstallReport, install_certificates, install_profiles,
};
pub use security::SecurityCli;

/// Result of importing one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Added,
    AlreadyPresent,
}

/// Operations the installer needs from the OS trust store.
///
/// Fingerprints are uppercase hex SHA-1 of the DER certificate.
#[async_trait]
pub trait TrustStore: Send + Sync {
    /// Resolves a keychain name (or path) to an existing keychain file.
    async fn resolve_keychain_path(&self, name: &str) -> Result<PathBuf>;

    async fn unlock(&self, keychain: &Path, password: &str) -> Result<()>;

    /// Imports a certificate or private key. Duplicates are not an error.
    async fn import(&self, item: &Path, keychain: &Path) -> Result<ImportOutcome>;

    /// Fingerprints of every certificate in the keychain.
    async fn certificate_fingerprints(&self, keychain: &Path) -> Result<Vec<String>>;

    async fn delete_certificate(&self, keychain: &Path, fingerprint: &str) -> Result<()>;

    /// Fingerprints of the valid code-signing identities in the keychain.
    async fn valid_identities(&self, keychain: &Path) -> Result<Vec<String>>;

    /// Checks the certificate chain of a certificate file.
    async fn verify_certificate(&self, certificate: &Path) -> Result<()>;

    /// Allows signing tools to use the keychain's keys without prompting.
    async fn grant_tool_access(&self, keychain: &Path, password: &str) -> Result<()>;
}
