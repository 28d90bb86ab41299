//! CLI command implementations.

pub mod config;
pub mod install;
pub mod reconcile;

use std::future::Future;
use std::sync::Arc;

use anyhow::{Result, bail};
use secrecy::ExposeSecret;
use signet_core::config::StoreConfig;
use signet_core::crypto::AesGcmCipher;
use signet_core::store::{GitCli, SecretStore};
use tokio::signal::unix::{SignalKind, signal};

/// Builds a secret store backed by the `git` CLI and AES-GCM file encryption.
pub fn open_store(config: StoreConfig) -> SecretStore {
    let git = match &config.access_token {
        Some(token) => GitCli::with_access_token(token.expose_secret()),
        None => GitCli::new(),
    };
    SecretStore::new(config, Arc::new(git), Arc::new(AesGcmCipher))
}

/// Runs `work` to completion unless SIGINT or SIGTERM arrives first.
///
/// On a signal the workflow future is dropped, which releases any open
/// checkout and deletes its decrypted working tree before the process exits.
pub async fn run_until_signal<T>(work: impl Future<Output = Result<T>>) -> Result<T> {
    let mut sigterm = signal(SignalKind::terminate()).inspect_err(|error| {
        tracing::error!(?error, "Failed to register a SIGTERM signal handler");
    })?;
    let mut sigint = signal(SignalKind::interrupt()).inspect_err(|error| {
        tracing::error!(?error, "Failed to register a SIGINT signal handler");
    })?;

    tokio::select! {
        result = work => result,
        _ = sigterm.recv() => {
            tracing::warn!("SIGTERM received, abandoning run");
            bail!("Interrupted by SIGTERM")
        }
        _ = sigint.recv() => {
            tracing::warn!("SIGINT received, abandoning run");
            bail!("Interrupted by SIGINT")
        }
    }
}
