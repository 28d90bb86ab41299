//! `signet reconcile`: bring the store and the portal in line.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;

use signet_core::models::ProfileType;
use signet_core::portal::AppStoreConnect;
use signet_core::reconcile::{
    DEFAULT_PROFILE_NAME_PREFIX, ReconcileOptions, ReconcileReport, Reconciler,
};

use super::{open_store, run_until_signal};
use crate::config::ResolvedConfig;

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Bundle identifier to reconcile (repeatable)
    #[arg(long = "bundle-id", required = true, value_delimiter = ',')]
    pub bundle_ids: Vec<String>,

    /// Profile type to reconcile: appstore, adhoc or development (repeatable)
    #[arg(long = "type", required = true, value_delimiter = ',', value_parser = parse_profile_type)]
    pub profile_types: Vec<ProfileType>,

    /// Regenerate every requested profile even when it is still valid
    #[arg(long)]
    pub force: bool,

    /// Verify only; report anything that would need a change as a failure
    #[arg(long)]
    pub readonly: bool,

    /// First word of the names given to new portal profiles
    #[arg(long, env = "SIGNET_PROFILE_NAME_PREFIX", default_value = DEFAULT_PROFILE_NAME_PREFIX)]
    pub name_prefix: String,
}

fn parse_profile_type(value: &str) -> std::result::Result<ProfileType, String> {
    value.parse()
}

pub async fn handle_reconcile_command(config: &ResolvedConfig, args: ReconcileArgs) -> Result<()> {
    let store = open_store(config.store_config()?);
    let portal_config = config.portal_config()?;
    let portal = AppStoreConnect::from_config(&portal_config)
        .await
        .context("Failed to set up App Store Connect client")?;

    let reconciler = Reconciler::new(Arc::new(portal), store, portal_config.platform)
        .with_common_name(portal_config.certificate_common_name.clone())
        .with_options(ReconcileOptions {
            force: args.force,
            readonly: args.readonly,
            profile_name_prefix: args.name_prefix,
        });

    let report = run_until_signal(async {
        reconciler
            .reconcile(&args.bundle_ids, &args.profile_types)
            .await
            .map_err(anyhow::Error::from)
    })
    .await?;

    print_report(&report);

    let failed = report.failures().count();
    if failed > 0 {
        bail!("{} of {} profile(s) failed to reconcile", failed, report.pairs.len());
    }
    Ok(())
}

fn print_report(report: &ReconcileReport) {
    println!("Certificates:");
    if report.certificates.is_empty() {
        println!("  (none)");
    }
    for (certificate_type, id) in &report.certificates {
        println!("  {:<14} {}", certificate_type.to_string(), id);
    }
    println!();

    println!("Profiles:");
    for pair in &report.pairs {
        println!(
            "  {:<12} {:<40} {}",
            pair.profile_type.to_string(),
            pair.bundle_id,
            pair.outcome
        );
    }
    println!();

    if report.published {
        println!(
            "Published {} changed file(s) to the secret store.",
            report.committed_paths.len()
        );
    } else {
        println!("Secret store unchanged.");
    }
}
