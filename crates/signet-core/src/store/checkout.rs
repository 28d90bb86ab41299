//! Checkout sessions: the ephemeral working tree and its pending changes.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::Result;
use crate::store::layout::ExtensionTable;

/// Ephemeral directory holding a decrypted checkout.
///
/// The directory is removed when the guard is dropped, so decrypted key
/// material cannot outlive the session on any exit path: normal return,
/// error propagation, panic unwinding, or a cancelled future.
#[derive(Debug)]
pub struct EphemeralCheckout {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl EphemeralCheckout {
    /// Creates a fresh, empty checkout directory under `root` (or the system
    /// temp directory).
    pub fn create(root: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("signet-checkout-");
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        let path = dir.path().to_path_buf();
        tracing::debug!("Created ephemeral checkout: {}", path.display());
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the directory now, reporting any failure.
    pub fn cleanup(mut self) -> Result<()> {
        if let Some(dir) = self.dir.take() {
            dir.close()?;
            tracing::debug!("Deleted ephemeral checkout: {}", self.path.display());
        }
        Ok(())
    }
}

impl Drop for EphemeralCheckout {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = dir.close() {
                tracing::error!(
                    "Failed to delete ephemeral checkout {}: {}",
                    self.path.display(),
                    e
                );
            } else {
                tracing::debug!("Deleted ephemeral checkout: {}", self.path.display());
            }
        }
    }
}

/// Paths touched during one session, relative to the checkout root.
///
/// Append-only until drained by the single commit at the end of the session.
#[derive(Debug, Default, Clone)]
pub struct ChangeSet {
    paths: BTreeSet<PathBuf>,
}

impl ChangeSet {
    pub fn record(&mut self, path: impl Into<PathBuf>) {
        self.paths.insert(path.into());
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.paths.iter()
    }

    /// Takes every recorded path, leaving the set empty.
    pub fn drain(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.paths).into_iter().collect()
    }

    /// Human-readable summary used in commit messages, e.g. `distribution, adhoc`.
    pub fn describe(&self) -> String {
        let mut groups: Vec<&str> = Vec::new();
        for path in &self.paths {
            let Some(group) = path.components().nth(1).and_then(|c| c.as_os_str().to_str())
            else {
                continue;
            };
            if !groups.contains(&group) {
                groups.push(group);
            }
        }
        if groups.is_empty() {
            "store".to_string()
        } else {
            groups.join(", ")
        }
    }
}

/// An open secret store session.
///
/// Returned by [`SecretStore::open`](crate::store::SecretStore::open) and
/// threaded through every mutating store call. Dropping it without calling
/// `close` discards all changes and deletes the working tree.
#[derive(Debug)]
pub struct Checkout {
    pub(crate) dir: EphemeralCheckout,
    pub(crate) branch: String,
    pub(crate) extensions: ExtensionTable,
    pub(crate) changes: ChangeSet,
}

impl Checkout {
    /// Root of the decrypted working tree.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn extensions(&self) -> &ExtensionTable {
        &self.extensions
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    /// Absolute path of a store-relative path.
    pub fn absolute(&self, relative: &Path) -> PathBuf {
        self.path().join(relative)
    }

    /// Discards the session and deletes the working tree.
    pub fn discard(self) -> Result<()> {
        if !self.changes.is_empty() {
            tracing::warn!(
                "Discarding {} unpublished change(s) on branch {}",
                self.changes.len(),
                self.branch
            );
        }
        self.dir.cleanup()
    }
}
