//! Encrypted, git-backed secret store.
//!
//! One file per credential, encrypted at rest, decrypted in an ephemeral
//! checkout for the duration of a session. Mutations only touch the
//! checkout and are recorded in the session's [`ChangeSet`]; `close`
//! re-encrypts and publishes them with a single commit and push.

pub mod checkout;
pub mod git;
pub mod layout;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use secrecy::ExposeSecret;

use crate::config::StoreConfig;
use crate::crypto::{self, FileCipher};
use crate::error::{Result, SignetError};
use crate::fsutil;
use crate::models::{CertificateType, ProfileState, ProfileType, ProvisioningProfile};
use crate::signing::{ProfileDocument, parse_profile_document};

pub use checkout::{ChangeSet, Checkout, EphemeralCheckout};
pub use git::{GitBackend, GitCli};
pub use layout::{ExtensionTable, FileKind};

/// A provisioning profile read from the store.
#[derive(Debug, Clone)]
pub struct StoredProfile {
    /// Absolute path inside the checkout.
    pub path: PathBuf,
    pub document: ProfileDocument,
    pub profile: ProvisioningProfile,
}

/// Result of closing a session.
#[derive(Debug, Clone, Default)]
pub struct CloseOutcome {
    /// Whether a commit was pushed.
    pub published: bool,
    /// Store-relative paths included in the commit.
    pub committed_paths: Vec<PathBuf>,
}

/// Handle on the secret store repository.
pub struct SecretStore {
    config: StoreConfig,
    git: Arc<dyn GitBackend>,
    cipher: Arc<dyn FileCipher>,
}

impl SecretStore {
    pub fn new(config: StoreConfig, git: Arc<dyn GitBackend>, cipher: Arc<dyn FileCipher>) -> Self {
        Self {
            config,
            git,
            cipher,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Clones the store into a fresh ephemeral checkout and decrypts it.
    ///
    /// Checks out the configured branch if the remote has it, otherwise
    /// starts an empty orphan branch. Any failure removes the checkout before
    /// returning a retrieval error.
    pub async fn open(&self) -> Result<Checkout> {
        let dir = EphemeralCheckout::create(self.config.checkout_root.as_deref())?;
        let root = dir.path().to_path_buf();
        let branch = self.config.branch.clone();

        tracing::info!(
            "Cloning secret store {} (branch {})",
            git::sanitize_git_error(&self.config.git_url),
            branch
        );
        self.git
            .clone_repo(&self.config.git_url, &root)
            .await
            .map_err(|e| SignetError::Retrieval(e.to_string()))?;

        let exists = self
            .git
            .branch_exists(&root, &branch)
            .await
            .map_err(|e| SignetError::Retrieval(e.to_string()))?;
        if exists {
            self.git
                .checkout_branch(&root, &branch)
                .await
                .map_err(|e| SignetError::Retrieval(e.to_string()))?;
        } else {
            tracing::info!("Branch {} does not exist yet, starting an empty one", branch);
            self.git
                .create_orphan_branch(&root, &branch)
                .await
                .map_err(|e| SignetError::Retrieval(e.to_string()))?;
        }

        let mut decrypted = 0usize;
        for path in self.encrypted_entries(&root)? {
            crypto::decrypt_file(
                self.cipher.as_ref(),
                &path,
                self.config.passphrase.expose_secret(),
            )
            .await
            .map_err(|e| SignetError::Retrieval(e.to_string()))?;
            decrypted += 1;
        }
        tracing::debug!("Decrypted {} file(s) in {}", decrypted, root.display());

        Ok(Checkout {
            dir,
            branch,
            extensions: self.config.extensions.clone(),
            changes: ChangeSet::default(),
        })
    }

    /// IDs of certificates of `certificate_type` that have both a certificate
    /// file and a private key file, sorted ascending.
    ///
    /// Unpaired files are reported and left in place.
    pub async fn certificate_ids(
        &self,
        checkout: &Checkout,
        certificate_type: CertificateType,
    ) -> Result<Vec<String>> {
        use std::collections::BTreeMap;

        let dir = checkout.absolute(&layout::certificate_dir(certificate_type));
        let mut found: BTreeMap<String, (bool, bool)> = BTreeMap::new();

        for path in fsutil::list_files(&dir).await? {
            let Some(kind) = checkout.extensions.classify(&path) else {
                continue;
            };
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let entry = found.entry(stem.to_string()).or_default();
            match kind {
                FileKind::Certificate => entry.0 = true,
                FileKind::PrivateKey => entry.1 = true,
                FileKind::ProvisioningProfile => {}
            }
        }

        let mut ids = Vec::new();
        for (id, (has_cert, has_key)) in found {
            match (has_cert, has_key) {
                (true, true) => ids.push(id),
                (true, false) => tracing::warn!(
                    "Certificate {} ({}) has no private key in the store; ignoring it",
                    id,
                    certificate_type
                ),
                (false, true) => tracing::warn!(
                    "Private key {} ({}) has no certificate in the store; ignoring it",
                    id,
                    certificate_type
                ),
                (false, false) => {}
            }
        }
        Ok(ids)
    }

    /// Reads the stored profile for `(profile_type, bundle_id)`, if any.
    ///
    /// A file that cannot be parsed yields a `ProfileParse` error.
    pub async fn profile(
        &self,
        checkout: &Checkout,
        profile_type: ProfileType,
        bundle_id: &str,
    ) -> Result<Option<StoredProfile>> {
        let stem = layout::profile_stem(profile_type, bundle_id);
        let variants = stored_variants(
            checkout,
            &layout::profile_dir(profile_type),
            &stem,
            &[FileKind::ProvisioningProfile],
        )
        .await?;
        let Some(rel) = variants
            .into_iter()
            .min_by_key(|rel| extension_rank(&checkout.extensions, rel))
        else {
            return Ok(None);
        };
        let path = checkout.absolute(&rel);

        let data = tokio::fs::read(&path).await?;
        let document = parse_profile_document(&data)
            .map_err(|e| SignetError::ProfileParse(format!("{}: {}", path.display(), e)))?;

        let now = chrono::Utc::now();
        let state = match document.expires_at {
            Some(exp) if exp > now => ProfileState::Active,
            _ => ProfileState::Invalid,
        };
        let profile = ProvisioningProfile {
            profile_type,
            bundle_id: bundle_id.to_string(),
            uuid: document.uuid.clone(),
            name: document.name.clone(),
            expires_at: document.expires_at,
            state,
            device_count: document.device_count(),
        };

        Ok(Some(StoredProfile {
            path,
            document,
            profile,
        }))
    }

    /// Writes a certificate and its private key into the checkout.
    pub async fn save_certificate(
        &self,
        checkout: &mut Checkout,
        certificate_type: CertificateType,
        remote_id: &str,
        certificate_der: &[u8],
        private_key_pem: &[u8],
    ) -> Result<(PathBuf, PathBuf)> {
        self.ensure_gitignore(checkout).await?;

        let cert_rel = layout::certificate_path(&checkout.extensions, certificate_type, remote_id);
        let key_rel = layout::private_key_path(&checkout.extensions, certificate_type, remote_id);
        write_file(&checkout.absolute(&cert_rel), certificate_der).await?;
        write_file(&checkout.absolute(&key_rel), private_key_pem).await?;
        checkout.changes.record(cert_rel.clone());
        checkout.changes.record(key_rel.clone());

        tracing::debug!("Stored certificate {} ({})", remote_id, certificate_type);
        Ok((checkout.absolute(&cert_rel), checkout.absolute(&key_rel)))
    }

    /// Writes a profile document into the checkout, replacing any variant
    /// stored under another recognized extension.
    pub async fn save_profile(
        &self,
        checkout: &mut Checkout,
        profile_type: ProfileType,
        bundle_id: &str,
        content: &[u8],
    ) -> Result<PathBuf> {
        self.ensure_gitignore(checkout).await?;

        let rel = layout::profile_path(&checkout.extensions, profile_type, bundle_id);
        let stem = layout::profile_stem(profile_type, bundle_id);
        let stale = stored_variants(
            checkout,
            &layout::profile_dir(profile_type),
            &stem,
            &[FileKind::ProvisioningProfile],
        )
        .await?;
        for candidate in stale.into_iter().filter(|candidate| *candidate != rel) {
            tracing::info!(
                "Deleting {} from the store, superseded by {}",
                candidate.display(),
                rel.display()
            );
            if remove_if_exists(&checkout.absolute(&candidate)).await? {
                checkout.changes.record(candidate);
            }
        }

        write_file(&checkout.absolute(&rel), content).await?;
        checkout.changes.record(rel.clone());

        tracing::debug!("Stored {} profile for {}", profile_type, bundle_id);
        Ok(checkout.absolute(&rel))
    }

    /// Removes a certificate and its key from the checkout.
    pub async fn delete_certificate_files(
        &self,
        checkout: &mut Checkout,
        certificate_type: CertificateType,
        remote_id: &str,
    ) -> Result<()> {
        let candidates = stored_variants(
            checkout,
            &layout::certificate_dir(certificate_type),
            remote_id,
            &[FileKind::Certificate, FileKind::PrivateKey],
        )
        .await?;

        for rel in candidates {
            if remove_if_exists(&checkout.absolute(&rel)).await? {
                checkout.changes.record(rel);
            }
        }
        Ok(())
    }

    /// Removes the stored profile for `(profile_type, bundle_id)`.
    pub async fn delete_profile_file(
        &self,
        checkout: &mut Checkout,
        profile_type: ProfileType,
        bundle_id: &str,
    ) -> Result<()> {
        let stem = layout::profile_stem(profile_type, bundle_id);
        let candidates = stored_variants(
            checkout,
            &layout::profile_dir(profile_type),
            &stem,
            &[FileKind::ProvisioningProfile],
        )
        .await?;

        for rel in candidates {
            if remove_if_exists(&checkout.absolute(&rel)).await? {
                checkout.changes.record(rel);
            }
        }
        Ok(())
    }

    /// Re-encrypts the checkout and publishes pending changes.
    ///
    /// With an empty change set nothing is committed or pushed. The working
    /// tree is deleted in every case.
    pub async fn close(&self, mut checkout: Checkout) -> Result<CloseOutcome> {
        self.fill_emptied_dirs(&mut checkout).await?;

        let root = checkout.path().to_path_buf();
        for path in self.encrypted_entries(&root)? {
            crypto::encrypt_file(
                self.cipher.as_ref(),
                &path,
                self.config.passphrase.expose_secret(),
            )
            .await?;
        }

        if checkout.changes.is_empty() {
            tracing::info!("Secret store is up to date, nothing to publish");
            checkout.dir.cleanup()?;
            return Ok(CloseOutcome::default());
        }

        let message = format!(
            "{} Updated {}",
            self.config.commit_message_prefix,
            checkout.changes.describe()
        );
        let paths = checkout.changes.drain();

        tracing::info!(
            "Committing {} changed file(s) to branch {}: {}",
            paths.len(),
            checkout.branch,
            message
        );
        self.git.commit(&root, &paths, &message).await?;

        tracing::info!("Pushing secret store branch {}", checkout.branch);
        self.git
            .push(&root, &checkout.branch)
            .await
            .map_err(|e| match e {
                SignetError::Publish(msg) => SignetError::Publish(msg),
                other => SignetError::Publish(other.to_string()),
            })?;

        checkout.dir.cleanup()?;
        Ok(CloseOutcome {
            published: true,
            committed_paths: paths,
        })
    }

    /// Files under the credential subtrees that are stored encrypted.
    fn encrypted_entries(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for subtree in [layout::CERTS_DIR, layout::PROFILES_DIR] {
            for path in fsutil::list_files_recursive(&root.join(subtree))? {
                let relative = path.strip_prefix(root).unwrap_or(&path);
                if layout::is_encrypted_entry(relative) {
                    entries.push(path);
                }
            }
        }
        Ok(entries)
    }

    /// Writes a `placeholder` into every credential directory the session
    /// left without files, so the directory stays tracked.
    async fn fill_emptied_dirs(&self, checkout: &mut Checkout) -> Result<()> {
        let dirs: BTreeSet<PathBuf> = checkout
            .changes
            .paths()
            .filter_map(|path| path.parent())
            .filter(|dir| dir.components().count() == 2)
            .map(Path::to_path_buf)
            .collect();

        for dir in dirs {
            if fsutil::list_files(&checkout.absolute(&dir)).await?.is_empty() {
                let rel = dir.join(layout::PLACEHOLDER);
                tracing::debug!("Keeping emptied directory {} with a placeholder", dir.display());
                write_file(&checkout.absolute(&rel), b"").await?;
                checkout.changes.record(rel);
            }
        }
        Ok(())
    }

    async fn ensure_gitignore(&self, checkout: &mut Checkout) -> Result<()> {
        let path = checkout.absolute(Path::new(layout::GITIGNORE));
        if !path.exists() {
            tokio::fs::write(&path, layout::GITIGNORE_CONTENTS).await?;
            checkout.changes.record(layout::GITIGNORE);
        }
        Ok(())
    }
}

/// Store-relative paths of the files in `dir` named `<stem>.<ext>` whose
/// extension classifies as one of `kinds`.
///
/// Matches extensions the same way listing does, so `X.CER` is found for `X`.
async fn stored_variants(
    checkout: &Checkout,
    dir: &Path,
    stem: &str,
    kinds: &[FileKind],
) -> Result<Vec<PathBuf>> {
    let mut variants = Vec::new();
    for path in fsutil::list_files(&checkout.absolute(dir)).await? {
        let kind = checkout.extensions.classify(&path);
        if !kind.map(|k| kinds.contains(&k)).unwrap_or(false) {
            continue;
        }
        if path.file_stem().and_then(|s| s.to_str()) != Some(stem) {
            continue;
        }
        if let Some(name) = path.file_name() {
            variants.push(dir.join(name));
        }
    }
    Ok(variants)
}

/// Position of the path's extension in the preference order of its kind.
fn extension_rank(extensions: &ExtensionTable, path: &Path) -> usize {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    extensions
        .classify(path)
        .and_then(|kind| {
            extensions
                .extensions(kind)
                .iter()
                .position(|e| e.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(usize::MAX)
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
