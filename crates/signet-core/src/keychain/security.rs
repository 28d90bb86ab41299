//! macOS `security` command-line backend.

use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;

use super::{ImportOutcome, TrustStore};
use crate::error::{Result, SignetError};
use crate::process;

/// Tools granted access to imported keys.
const TRUSTED_TOOLS: [&str; 2] = ["/usr/bin/codesign", "/usr/bin/security"];
const PARTITION_LIST: &str = "apple-tool:,apple:,codesign:";

/// Trust store backed by `/usr/bin/security`.
#[derive(Debug, Clone, Default)]
pub struct SecurityCli {
    keychains_dir: Option<PathBuf>,
}

impl SecurityCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up keychain names in `dir` instead of `~/Library/Keychains`.
    pub fn with_keychains_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            keychains_dir: Some(dir.into()),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        process::command("security")
            .args(args)
            .output()
            .await
            .map_err(|e| SignetError::Keychain(format!("Failed to run security: {}", e)))
    }

    async fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SignetError::Keychain(format!(
                "security {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }
        Ok(output)
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| SignetError::Keychain(format!("Non UTF-8 path: {}", path.display())))
}

#[async_trait]
impl TrustStore for SecurityCli {
    async fn resolve_keychain_path(&self, name: &str) -> Result<PathBuf> {
        let keychains_dir = match &self.keychains_dir {
            Some(dir) => dir.clone(),
            None => dirs::home_dir()
                .ok_or_else(|| SignetError::Keychain("No home directory found".to_string()))?
                .join("Library/Keychains"),
        };
        keychain_candidates(name, &keychains_dir)
            .into_iter()
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| SignetError::Keychain(format!("Could not locate keychain '{}'", name)))
    }

    async fn unlock(&self, keychain: &Path, password: &str) -> Result<()> {
        self.run_checked(&["unlock-keychain", "-p", password, path_str(keychain)?])
            .await?;
        tracing::debug!("Unlocked keychain {}", keychain.display());
        Ok(())
    }

    async fn import(&self, item: &Path, keychain: &Path) -> Result<ImportOutcome> {
        let mut args = vec!["import", path_str(item)?, "-k", path_str(keychain)?, "-P", ""];
        for tool in TRUSTED_TOOLS {
            args.extend(["-T", tool]);
        }

        let output = self.run(&args).await?;
        if output.status.success() {
            return Ok(ImportOutcome::Added);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_duplicate_item(&stderr) {
            return Ok(ImportOutcome::AlreadyPresent);
        }
        Err(SignetError::Keychain(format!(
            "Failed to import {}: {}",
            item.display(),
            stderr.trim()
        )))
    }

    async fn certificate_fingerprints(&self, keychain: &Path) -> Result<Vec<String>> {
        let output = self
            .run_checked(&["find-certificate", "-a", "-Z", path_str(keychain)?])
            .await?;
        Ok(parse_certificate_hashes(&String::from_utf8_lossy(
            &output.stdout,
        )))
    }

    async fn delete_certificate(&self, keychain: &Path, fingerprint: &str) -> Result<()> {
        self.run_checked(&["delete-certificate", "-Z", fingerprint, path_str(keychain)?])
            .await?;
        Ok(())
    }

    async fn valid_identities(&self, keychain: &Path) -> Result<Vec<String>> {
        let output = self
            .run_checked(&["find-identity", "-v", "-p", "codesigning", path_str(keychain)?])
            .await?;
        Ok(parse_identity_hashes(&String::from_utf8_lossy(
            &output.stdout,
        )))
    }

    async fn verify_certificate(&self, certificate: &Path) -> Result<()> {
        self.run_checked(&["verify-cert", "-c", path_str(certificate)?])
            .await?;
        Ok(())
    }

    async fn grant_tool_access(&self, keychain: &Path, password: &str) -> Result<()> {
        self.run_checked(&[
            "set-key-partition-list",
            "-S",
            PARTITION_LIST,
            "-s",
            "-k",
            password,
            path_str(keychain)?,
        ])
        .await?;
        Ok(())
    }
}

/// Paths tried, in order, when resolving a keychain name.
fn keychain_candidates(name: &str, keychains_dir: &Path) -> Vec<PathBuf> {
    let given = PathBuf::from(name);
    let bases = if given.is_absolute() {
        vec![given]
    } else {
        vec![keychains_dir.join(name)]
    };

    let mut candidates = Vec::new();
    for base in bases {
        let with_suffix = if name.ends_with(".keychain") || name.ends_with(".keychain-db") {
            None
        } else {
            Some(PathBuf::from(format!("{}.keychain", base.display())))
        };
        candidates.push(PathBuf::from(format!("{}-db", base.display())));
        candidates.push(base);
        if let Some(with_suffix) = with_suffix {
            candidates.push(PathBuf::from(format!("{}-db", with_suffix.display())));
            candidates.push(with_suffix);
        }
    }
    candidates
}

fn is_duplicate_item(stderr: &str) -> bool {
    stderr.contains("already exists in the keychain")
}

/// Extracts `SHA-1 hash:` lines from `find-certificate -Z` output.
fn parse_certificate_hashes(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("SHA-1 hash:"))
        .map(|hash| hash.trim().to_uppercase())
        .filter(|hash| !hash.is_empty())
        .collect()
}

/// Extracts hashes from `find-identity -v` lines like
/// `  1) 0123ABCD... "Apple Distribution: Acme (TEAM)"`.
fn parse_identity_hashes(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let (index, rest) = line.trim().split_once(") ")?;
            index.parse::<u32>().ok()?;
            let hash = rest.split_whitespace().next()?;
            if hash.len() == 40 && hash.chars().all(|c| c.is_ascii_hexdigit()) {
                Some(hash.to_uppercase())
            } else {
                None
            }
        })
        .collect()
}
