//! Installs credentials from a decrypted checkout into the local trust store
//! and the provisioning-profile directory.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::crypto;
use crate::error::Result;
use crate::fsutil;
use crate::keychain::{ImportOutcome, TrustStore};
use crate::signing::{ProfileDocument, parse_profile_document};
use crate::store::layout::{ExtensionTable, FileKind};

/// Outcome of copying profiles into the profile directory.
#[derive(Debug, Default)]
pub struct ProfileInstallReport {
    pub installed: Vec<(ProfileDocument, PathBuf)>,
    /// Files that could not be installed, with the reason.
    pub failures: Vec<(PathBuf, String)>,
}

/// Outcome of importing certificates and keys into a keychain.
#[derive(Debug, Default)]
pub struct CertificateInstallReport {
    pub keychain: PathBuf,
    pub added: usize,
    pub already_present: usize,
    /// Certificates removed before import because `reinstall` was requested.
    pub removed: usize,
    pub failures: Vec<(PathBuf, String)>,
    /// Fingerprints with no matching valid signing identity after import.
    pub missing_identities: Vec<String>,
    pub granted_tool_access: bool,
}

/// Copies every recognized profile under `source_dir` into `profiles_dir`
/// as `<uuid>.<ext>`.
///
/// Each file is handled independently; failures are collected in the report.
pub async fn install_profiles(
    source_dir: &Path,
    profiles_dir: &Path,
    extensions: &ExtensionTable,
) -> Result<ProfileInstallReport> {
    tokio::fs::create_dir_all(profiles_dir).await?;

    let mut report = ProfileInstallReport::default();
    for path in fsutil::list_files_recursive(source_dir)? {
        if extensions.classify(&path) != Some(FileKind::ProvisioningProfile) {
            continue;
        }
        match install_profile(&path, profiles_dir).await {
            Ok((document, installed)) => {
                tracing::info!(
                    "Installed profile '{}' ({}) to {}",
                    document.name,
                    document.uuid,
                    installed.display()
                );
                report.installed.push((document, installed));
            }
            Err(e) => {
                tracing::warn!("Failed to install profile {}: {}", path.display(), e);
                report.failures.push((path, e.to_string()));
            }
        }
    }

    if !report.failures.is_empty() {
        tracing::warn!(
            "{} of {} profile(s) could not be installed",
            report.failures.len(),
            report.failures.len() + report.installed.len()
        );
    }
    Ok(report)
}

async fn install_profile(path: &Path, profiles_dir: &Path) -> Result<(ProfileDocument, PathBuf)> {
    let data = tokio::fs::read(path).await?;
    let document = parse_profile_document(&data)?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mobileprovision");
    let destination = profiles_dir.join(format!("{}.{}", document.uuid, ext));
    tokio::fs::write(&destination, &data).await?;
    Ok((document, destination))
}

/// Imports every certificate and private key under `source_dir` into the
/// keychain named `keychain_name`.
///
/// With `reinstall`, certificates already in the keychain are deleted first
/// so their trust settings are refreshed. Per-file failures are collected in
/// the report; only keychain resolution and unlocking are fatal.
pub async fn install_certificates(
    trust: &dyn TrustStore,
    source_dir: &Path,
    extensions: &ExtensionTable,
    keychain_name: &str,
    keychain_password: &str,
    reinstall: bool,
) -> Result<CertificateInstallReport> {
    let files = fsutil::list_files_recursive(source_dir)?;
    let certificates: Vec<PathBuf> = files
        .iter()
        .filter(|p| extensions.classify(p) == Some(FileKind::Certificate))
        .cloned()
        .collect();
    let keys: Vec<PathBuf> = files
        .iter()
        .filter(|p| extensions.classify(p) == Some(FileKind::PrivateKey))
        .cloned()
        .collect();
    if certificates.len() != keys.len() {
        tracing::warn!(
            "Found {} certificate(s) but {} private key(s) in {}",
            certificates.len(),
            keys.len(),
            source_dir.display()
        );
    }

    let keychain = trust.resolve_keychain_path(keychain_name).await?;
    if !keychain_password.is_empty() {
        trust.unlock(&keychain, keychain_password).await?;
    }

    let mut report = CertificateInstallReport {
        keychain: keychain.clone(),
        ..Default::default()
    };

    let mut expected: Vec<(PathBuf, String)> = Vec::new();
    for path in &certificates {
        match read_fingerprint(path).await {
            Ok(fingerprint) => expected.push((path.clone(), fingerprint)),
            Err(e) => {
                tracing::warn!("Cannot read certificate {}: {}", path.display(), e);
                report.failures.push((path.clone(), e.to_string()));
            }
        }
    }

    if reinstall {
        let present: BTreeSet<String> = trust
            .certificate_fingerprints(&keychain)
            .await?
            .into_iter()
            .collect();
        for (path, fingerprint) in &expected {
            if !present.contains(fingerprint) {
                continue;
            }
            tracing::info!(
                "Removing certificate {} ({}) from {} before reinstalling",
                fingerprint,
                path.display(),
                keychain.display()
            );
            match trust.delete_certificate(&keychain, fingerprint).await {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    tracing::warn!("Failed to remove certificate {}: {}", fingerprint, e);
                    report.failures.push((path.clone(), e.to_string()));
                }
            }
        }
    }

    let importable: Vec<&PathBuf> = expected
        .iter()
        .map(|(path, _)| path)
        .chain(keys.iter())
        .collect();
    for path in importable {
        match trust.import(path, &keychain).await {
            Ok(ImportOutcome::Added) => {
                tracing::info!("Imported {} into {}", path.display(), keychain.display());
                report.added += 1;
            }
            Ok(ImportOutcome::AlreadyPresent) => {
                tracing::debug!("{} is already in {}", path.display(), keychain.display());
                report.already_present += 1;
            }
            Err(e) => {
                tracing::warn!("Failed to import {}: {}", path.display(), e);
                report.failures.push((path.clone(), e.to_string()));
            }
        }
    }

    for (path, _) in &expected {
        if let Err(e) = trust.verify_certificate(path).await {
            tracing::warn!("Certificate {} did not verify: {}", path.display(), e);
        }
    }

    let identities: BTreeSet<String> = match trust.valid_identities(&keychain).await {
        Ok(identities) => identities.into_iter().collect(),
        Err(e) => {
            tracing::warn!("Could not list signing identities: {}", e);
            BTreeSet::new()
        }
    };
    for (path, fingerprint) in &expected {
        if !identities.contains(fingerprint) {
            tracing::warn!(
                "No valid signing identity for certificate {} ({})",
                fingerprint,
                path.display()
            );
            report.missing_identities.push(fingerprint.clone());
        }
    }

    if report.added > 0 || !report.missing_identities.is_empty() {
        tracing::info!("Granting signing tools access to keys in {}", keychain.display());
        match trust.grant_tool_access(&keychain, keychain_password).await {
            Ok(()) => report.granted_tool_access = true,
            Err(e) => tracing::warn!("Failed to grant tool access (signing may prompt): {}", e),
        }
    } else {
        tracing::debug!("Nothing new in {}, skipping tool access update", keychain.display());
    }

    if !report.failures.is_empty() {
        tracing::warn!(
            "{} certificate or key file(s) could not be installed",
            report.failures.len()
        );
    }
    Ok(report)
}

async fn read_fingerprint(path: &Path) -> Result<String> {
    let data = tokio::fs::read(path).await?;
    crypto::certificate_fingerprint(&data)
}
