//! Pull-and-install pipeline for machines that consume the secret store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::ExposeSecret;
use tempfile::NamedTempFile;

use crate::config::TrustStoreConfig;
use crate::error::{Result, SignetError};
use crate::keychain::{
    CertificateInstallReport, ImportOutcome, TrustStore, install_certificates, install_profiles,
};
use crate::signing::ProfileDocument;
use crate::store::{Checkout, SecretStore};

const DOWNLOAD_TIMEOUT_SECS: u64 = 60;

/// Summary of an install run.
#[derive(Debug, Default)]
pub struct InstallReport {
    pub profiles: Vec<(ProfileDocument, PathBuf)>,
    pub profile_failures: Vec<(PathBuf, String)>,
    pub certificates: CertificateInstallReport,
    /// Additional certificate URLs that could not be installed, with the reason.
    pub additional_failures: Vec<(String, String)>,
}

impl InstallReport {
    pub fn failure_count(&self) -> usize {
        self.profile_failures.len()
            + self.certificates.failures.len()
            + self.additional_failures.len()
    }
}

/// Opens the store, installs every profile and certificate it holds, then
/// deletes the checkout whatever the outcome.
pub async fn install(
    store: &SecretStore,
    trust: &dyn TrustStore,
    config: &TrustStoreConfig,
) -> Result<InstallReport> {
    let checkout = store.open().await?;
    let result = install_from_checkout(&checkout, trust, config).await;

    match (result, checkout.discard()) {
        (Ok(report), Ok(())) => Ok(report),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), cleanup) => {
            if let Err(cleanup_error) = cleanup {
                tracing::error!("Failed to delete checkout: {}", cleanup_error);
            }
            Err(e)
        }
    }
}

async fn install_from_checkout(
    checkout: &Checkout,
    trust: &dyn TrustStore,
    config: &TrustStoreConfig,
) -> Result<InstallReport> {
    let profiles = install_profiles(checkout.path(), &config.profiles_dir, checkout.extensions())
        .await?;
    let certificates = install_certificates(
        trust,
        checkout.path(),
        checkout.extensions(),
        &config.keychain_name,
        config.keychain_password.expose_secret(),
        config.reinstall,
    )
    .await?;

    let mut report = InstallReport {
        profiles: profiles.installed,
        profile_failures: profiles.failures,
        certificates,
        additional_failures: Vec::new(),
    };

    if !config.additional_cert_urls.is_empty() {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()?;
        for url in &config.additional_cert_urls {
            if let Err(e) =
                install_additional_certificate(&client, trust, url, &report.certificates.keychain)
                    .await
            {
                tracing::warn!("Failed to install certificate from {}: {}", url, e);
                report.additional_failures.push((url.clone(), e.to_string()));
            }
        }
    }

    tracing::info!(
        "Installed {} profile(s); {} key/certificate file(s) added, {} already present",
        report.profiles.len(),
        report.certificates.added,
        report.certificates.already_present
    );
    if report.failure_count() > 0 {
        tracing::warn!("{} item(s) failed to install", report.failure_count());
    }
    Ok(report)
}

/// Downloads a certificate to a temporary file and imports it.
///
/// The temporary file is removed when this returns.
pub async fn install_additional_certificate(
    client: &reqwest::Client,
    trust: &dyn TrustStore,
    url: &str,
    keychain: &Path,
) -> Result<ImportOutcome> {
    tracing::info!("Downloading certificate {}", url);
    let temp = download_to_temp(client, url).await?;

    let outcome = trust.import(temp.path(), keychain).await?;
    match outcome {
        ImportOutcome::Added => tracing::info!("Imported certificate from {}", url),
        ImportOutcome::AlreadyPresent => {
            tracing::debug!("Certificate from {} is already installed", url)
        }
    }
    Ok(outcome)
}

async fn download_to_temp(client: &reqwest::Client, url: &str) -> Result<NamedTempFile> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| SignetError::Download(format!("{}: {}", url, e)))?;
    let status = response.status();
    if !status.is_success() {
        return Err(SignetError::Download(format!("{}: HTTP {}", url, status)));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| SignetError::Download(format!("{}: {}", url, e)))?;

    let temp = tempfile::Builder::new()
        .prefix("signet-cert-")
        .suffix(".cer")
        .tempfile()?;
    tokio::fs::write(temp.path(), &bytes).await?;
    Ok(temp)
}
