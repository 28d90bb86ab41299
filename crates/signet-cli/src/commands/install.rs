//! `signet install`: pull credentials into the local keychain.

use anyhow::{Result, bail};
use clap::Args;

use signet_core::install::{InstallReport, install};
use signet_core::keychain::SecurityCli;

use super::{open_store, run_until_signal};
use crate::config::ResolvedConfig;

#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Remove certificates already in the keychain before importing
    #[arg(long, env = "SIGNET_REINSTALL")]
    pub reinstall: bool,

    /// Extra certificate (e.g. an intermediate CA) to download and import (repeatable)
    #[arg(
        long = "additional-cert-url",
        env = "SIGNET_ADDITIONAL_CERT_URLS",
        value_delimiter = ','
    )]
    pub additional_cert_urls: Vec<String>,
}

pub async fn handle_install_command(config: &ResolvedConfig, args: InstallArgs) -> Result<()> {
    let store = open_store(config.store_config()?);
    let trust_config = config.trust_store_config(args.reinstall, args.additional_cert_urls);
    let trust = SecurityCli::new();

    let report = run_until_signal(async {
        install(&store, &trust, &trust_config)
            .await
            .map_err(anyhow::Error::from)
    })
    .await?;

    print_report(&report);

    if report.failure_count() > 0 {
        bail!("{} item(s) failed to install", report.failure_count());
    }
    Ok(())
}

fn print_report(report: &InstallReport) {
    println!("Provisioning profiles:");
    for (document, path) in &report.profiles {
        println!("  {} ({})", document.name, path.display());
    }
    for (path, reason) in &report.profile_failures {
        println!("  FAILED {}: {}", path.display(), reason);
    }
    println!();

    let certificates = &report.certificates;
    println!("Keychain {}:", certificates.keychain.display());
    println!("  Added:           {}", certificates.added);
    println!("  Already present: {}", certificates.already_present);
    if certificates.removed > 0 {
        println!("  Removed:         {}", certificates.removed);
    }
    if certificates.granted_tool_access {
        println!("  Granted codesign access to keys");
    }
    for fingerprint in &certificates.missing_identities {
        println!("  No valid signing identity for {}", fingerprint);
    }
    for (path, reason) in &certificates.failures {
        println!("  FAILED {}: {}", path.display(), reason);
    }
    for (url, reason) in &report.additional_failures {
        println!("  FAILED {}: {}", url, reason);
    }
}
