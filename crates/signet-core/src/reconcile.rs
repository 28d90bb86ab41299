//! Reconciliation of the secret store against the portal.
//!
//! A run resolves the requested bundle identifiers, makes sure exactly one
//! valid certificate exists per certificate type, then verifies (and if
//! needed regenerates) one profile per `(profile type, bundle id)` pair.
//! Every change lands in a single commit when the checkout is closed.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;

use crate::config::DEFAULT_CERTIFICATE_COMMON_NAME;
use crate::error::{Result, SignetError};
use crate::models::{
    BundleId, CertificateType, Device, Platform, ProfileState, ProfileType, current_device_set,
};
use crate::portal::{Portal, ProfileRequest, RemoteProfile};
use crate::signing::generate_signing_request;
use crate::store::{Checkout, SecretStore, StoredProfile};

pub const DEFAULT_PROFILE_NAME_PREFIX: &str = "signet";

/// Knobs for a reconciliation run.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Regenerate every requested profile even when it verifies.
    pub force: bool,
    /// Verify only. Pairs that would need a change are reported as failed.
    pub readonly: bool,
    /// First word of every profile name created on the portal.
    pub profile_name_prefix: String,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            force: false,
            readonly: false,
            profile_name_prefix: DEFAULT_PROFILE_NAME_PREFIX.to_string(),
        }
    }
}

/// What happened to one `(profile type, bundle id)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairOutcome {
    /// The stored profile verified and was left alone.
    Kept,
    /// No profile was stored; a new one was created.
    Created,
    /// The stored profile failed verification and was regenerated.
    Replaced { reason: String },
    Failed { reason: String },
}

impl fmt::Display for PairOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairOutcome::Kept => write!(f, "kept"),
            PairOutcome::Created => write!(f, "created"),
            PairOutcome::Replaced { reason } => write!(f, "replaced ({})", reason),
            PairOutcome::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PairReport {
    pub bundle_id: String,
    pub profile_type: ProfileType,
    pub outcome: PairOutcome,
}

/// Summary of a reconciliation run.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// Canonical certificate ID per certificate type.
    pub certificates: BTreeMap<CertificateType, String>,
    pub pairs: Vec<PairReport>,
    /// Whether a commit was pushed to the store.
    pub published: bool,
    pub committed_paths: Vec<PathBuf>,
}

impl ReconcileReport {
    pub fn failures(&self) -> impl Iterator<Item = &PairReport> {
        self.pairs
            .iter()
            .filter(|p| matches!(p.outcome, PairOutcome::Failed { .. }))
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}

/// Drives the portal and the secret store toward a desired state.
pub struct Reconciler {
    portal: Arc<dyn Portal>,
    store: SecretStore,
    platform: Platform,
    common_name: String,
    options: ReconcileOptions,
}

/// Per-run state threaded through the pair loop.
struct Run {
    checkout: Checkout,
    devices: Option<Vec<Device>>,
}

impl Reconciler {
    pub fn new(portal: Arc<dyn Portal>, store: SecretStore, platform: Platform) -> Self {
        Self {
            portal,
            store,
            platform,
            common_name: DEFAULT_CERTIFICATE_COMMON_NAME.to_string(),
            options: ReconcileOptions::default(),
        }
    }

    /// Common name placed in CSRs for new certificates.
    pub fn with_common_name(mut self, common_name: impl Into<String>) -> Self {
        self.common_name = common_name.into();
        self
    }

    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    /// Reconciles `profile_types` for every bundle identifier in `bundle_ids`.
    ///
    /// Unknown bundle identifiers abort the run before the store is opened.
    /// A failure confined to one pair is recorded in the report and does not
    /// stop the others; store, crypto and publish errors abort the run. The
    /// checkout is deleted on every path.
    pub async fn reconcile(
        &self,
        bundle_ids: &[String],
        profile_types: &[ProfileType],
    ) -> Result<ReconcileReport> {
        let bundles = self.resolve_bundle_ids(bundle_ids).await?;

        let mut run = Run {
            checkout: self.store.open().await?,
            devices: None,
        };
        let mut report = ReconcileReport::default();

        let mut available: BTreeMap<CertificateType, Option<String>> = BTreeMap::new();
        for profile_type in profile_types {
            let certificate_type = profile_type.certificate_type();
            if available.contains_key(&certificate_type) {
                continue;
            }
            let id = self
                .ensure_certificate(&mut run.checkout, certificate_type)
                .await?;
            if let Some(id) = &id {
                report.certificates.insert(certificate_type, id.clone());
            }
            available.insert(certificate_type, id);
        }

        for profile_type in profile_types {
            let certificate_id = available
                .get(&profile_type.certificate_type())
                .cloned()
                .flatten();
            for bundle in &bundles {
                let outcome = match &certificate_id {
                    Some(certificate_id) => {
                        match self
                            .ensure_profile(&mut run, bundle, *profile_type, certificate_id)
                            .await
                        {
                            Ok(outcome) => outcome,
                            Err(e) if aborts_run(&e) => return Err(e),
                            Err(e) => {
                                tracing::error!(
                                    "Failed to reconcile {} profile for {}: {}",
                                    profile_type,
                                    bundle.identifier,
                                    e
                                );
                                PairOutcome::Failed {
                                    reason: e.to_string(),
                                }
                            }
                        }
                    }
                    None => PairOutcome::Failed {
                        reason: format!(
                            "no valid {} certificate available",
                            profile_type.certificate_type()
                        ),
                    },
                };
                tracing::info!(
                    "{} profile for {}: {}",
                    profile_type,
                    bundle.identifier,
                    outcome
                );
                report.pairs.push(PairReport {
                    bundle_id: bundle.identifier.clone(),
                    profile_type: *profile_type,
                    outcome,
                });
            }
        }

        let closed = self.store.close(run.checkout).await?;
        report.published = closed.published;
        report.committed_paths = closed.committed_paths;
        Ok(report)
    }

    async fn resolve_bundle_ids(&self, identifiers: &[String]) -> Result<Vec<BundleId>> {
        let mut bundles = Vec::with_capacity(identifiers.len());
        for identifier in identifiers {
            match self.portal.find_bundle_id(identifier).await? {
                Some(bundle) => {
                    tracing::debug!("Resolved {} to {}", identifier, bundle.remote_id);
                    bundles.push(bundle);
                }
                None => return Err(SignetError::BundleIdNotFound(identifier.clone())),
            }
        }
        Ok(bundles)
    }

    /// Leaves exactly one valid certificate of `certificate_type` in the
    /// store, creating one if none is valid, and returns its ID.
    ///
    /// Returns `None` in read-only mode when a new certificate would be needed.
    async fn ensure_certificate(
        &self,
        checkout: &mut Checkout,
        certificate_type: CertificateType,
    ) -> Result<Option<String>> {
        let now = Utc::now();
        let mut canonical: Option<String> = None;

        // IDs come back sorted, which makes the survivor deterministic.
        for id in self.store.certificate_ids(checkout, certificate_type).await? {
            let remote = self.portal.certificate(&id).await?;
            let valid = remote
                .as_ref()
                .map(|c| c.is_valid_at(now) && c.certificate_type == certificate_type)
                .unwrap_or(false);

            if !valid {
                let reason = if remote.is_some() {
                    "expired"
                } else {
                    "not found on the portal"
                };
                tracing::warn!("Certificate {} ({}) is {}", id, certificate_type, reason);
                self.remove_certificate(checkout, certificate_type, &id).await?;
            } else if let Some(kept) = &canonical {
                tracing::warn!(
                    "Found another valid {} certificate {}; keeping {}",
                    certificate_type,
                    id,
                    kept
                );
                self.remove_certificate(checkout, certificate_type, &id).await?;
            } else {
                tracing::debug!("Certificate {} ({}) is valid", id, certificate_type);
                canonical = Some(id);
            }
        }

        if canonical.is_some() {
            return Ok(canonical);
        }
        if self.options.readonly {
            tracing::warn!(
                "No valid {} certificate and read-only mode is on",
                certificate_type
            );
            return Ok(None);
        }

        tracing::info!(
            "Creating new {} certificate (CN={})",
            certificate_type,
            self.common_name
        );
        let request = generate_signing_request(&self.common_name)?;
        let certificate = self
            .portal
            .create_certificate(certificate_type, &request.csr_pem)
            .await?;

        tracing::info!(
            "Storing {} certificate {} and its private key",
            certificate_type,
            certificate.id
        );
        self.store
            .save_certificate(
                checkout,
                certificate_type,
                &certificate.id,
                &certificate.content,
                request.private_key_pem.as_bytes(),
            )
            .await?;
        Ok(Some(certificate.id))
    }

    async fn remove_certificate(
        &self,
        checkout: &mut Checkout,
        certificate_type: CertificateType,
        id: &str,
    ) -> Result<()> {
        if self.options.readonly {
            tracing::warn!("Read-only mode: leaving certificate {} in the store", id);
            return Ok(());
        }
        tracing::info!(
            "Deleting {} certificate {} and its private key from the store",
            certificate_type,
            id
        );
        self.store
            .delete_certificate_files(checkout, certificate_type, id)
            .await
    }

    async fn ensure_profile(
        &self,
        run: &mut Run,
        bundle: &BundleId,
        profile_type: ProfileType,
        certificate_id: &str,
    ) -> Result<PairOutcome> {
        let (stored, stored_problem) = match self
            .store
            .profile(&run.checkout, profile_type, &bundle.identifier)
            .await
        {
            Ok(stored) => (stored, None),
            Err(SignetError::ProfileParse(msg)) => {
                tracing::warn!(
                    "Stored {} profile for {} is unreadable: {}",
                    profile_type,
                    bundle.identifier,
                    msg
                );
                (None, Some("stored profile is unreadable".to_string()))
            }
            Err(e) => return Err(e),
        };

        let mut remote = None;
        let problem = match &stored {
            Some(stored) => {
                let (found, problem) = self
                    .verify_profile(run, stored, bundle, profile_type, certificate_id)
                    .await?;
                remote = found;
                problem
            }
            None => stored_problem.clone(),
        };

        let had_stored = stored.is_some() || stored_problem.is_some();
        let reason = match problem {
            None if self.options.force && had_stored => "regeneration forced".to_string(),
            None if had_stored => return Ok(PairOutcome::Kept),
            None => String::new(),
            Some(problem) => problem,
        };

        if self.options.readonly {
            let reason = if had_stored {
                format!("needs regeneration: {}", reason)
            } else {
                "no stored profile".to_string()
            };
            return Ok(PairOutcome::Failed { reason });
        }

        if had_stored {
            tracing::warn!(
                "{} profile for {} needs regeneration: {}",
                profile_type,
                bundle.identifier,
                reason
            );
        }

        let name = self.profile_name(profile_type, bundle);
        self.remove_remote_profiles(remote.as_ref(), &name).await?;
        if had_stored {
            tracing::info!(
                "Deleting stored {} profile for {}",
                profile_type,
                bundle.identifier
            );
            self.store
                .delete_profile_file(&mut run.checkout, profile_type, &bundle.identifier)
                .await?;
        }

        self.create_profile(run, bundle, profile_type, certificate_id, &name)
            .await?;

        Ok(if had_stored {
            PairOutcome::Replaced { reason }
        } else {
            PairOutcome::Created
        })
    }

    /// Returns the portal's view of the stored profile and, if it should be
    /// regenerated, why.
    async fn verify_profile(
        &self,
        run: &mut Run,
        stored: &StoredProfile,
        bundle: &BundleId,
        profile_type: ProfileType,
        certificate_id: &str,
    ) -> Result<(Option<RemoteProfile>, Option<String>)> {
        let uuid = &stored.profile.uuid;
        if let Some(embedded) = &stored.document.bundle_identifier {
            if *embedded != bundle.identifier {
                let problem = format!("profile {} is for bundle {}", uuid, embedded);
                return Ok((None, Some(problem)));
            }
        }

        let Some(remote) = self.portal.profile_by_uuid(bundle, uuid).await? else {
            return Ok((None, Some(format!("profile {} not found on the portal", uuid))));
        };

        if remote.state != ProfileState::Active {
            let problem = format!("profile {} is {}", uuid, remote.state.as_str());
            return Ok((Some(remote), Some(problem)));
        }

        let now = Utc::now();
        let unexpired = match remote.expires_at {
            Some(exp) => exp > now,
            None => stored.profile.is_unexpired_at(now),
        };
        if !unexpired {
            return Ok((Some(remote), Some(format!("profile {} has expired", uuid))));
        }

        if profile_type.requires_devices() {
            let current = self.current_devices(run).await?.len();
            if stored.profile.device_count != current {
                let problem = format!(
                    "profile has {} device(s), portal has {} enabled",
                    stored.profile.device_count, current
                );
                return Ok((Some(remote), Some(problem)));
            }
        }

        if let Some(ids) = &remote.certificate_ids {
            if !ids.iter().any(|id| id == certificate_id) {
                let problem = format!("profile does not include certificate {}", certificate_id);
                return Ok((Some(remote), Some(problem)));
            }
        }

        Ok((Some(remote), None))
    }

    /// Deletes the stale remote profile and anything else holding its name.
    async fn remove_remote_profiles(&self, stale: Option<&RemoteProfile>, name: &str) -> Result<()> {
        let mut deleted = Vec::new();
        if let Some(stale) = stale {
            tracing::info!(
                "Deleting profile '{}' ({}) from the portal",
                stale.name,
                stale.uuid
            );
            self.portal.delete_profile(&stale.id).await?;
            deleted.push(stale.id.clone());
        }

        for existing in self.portal.profiles_by_name(name).await? {
            if deleted.contains(&existing.id) {
                continue;
            }
            tracing::info!(
                "Deleting profile '{}' ({}) from the portal to free its name",
                existing.name,
                existing.uuid
            );
            self.portal.delete_profile(&existing.id).await?;
            deleted.push(existing.id);
        }
        Ok(())
    }

    async fn create_profile(
        &self,
        run: &mut Run,
        bundle: &BundleId,
        profile_type: ProfileType,
        certificate_id: &str,
        name: &str,
    ) -> Result<()> {
        let device_ids: Vec<String> = if profile_type.requires_devices() {
            self.current_devices(run)
                .await?
                .iter()
                .map(|d| d.remote_id.clone())
                .collect()
        } else {
            Vec::new()
        };

        tracing::info!(
            "Creating {} profile '{}' for {} with {} device(s)",
            profile_type,
            name,
            bundle.identifier,
            device_ids.len()
        );
        let created = self
            .portal
            .create_profile(&ProfileRequest {
                name: name.to_string(),
                profile_type,
                bundle_id: bundle.clone(),
                certificate_ids: vec![certificate_id.to_string()],
                device_ids,
            })
            .await?;
        if created.content.is_empty() {
            return Err(SignetError::Portal(format!(
                "Portal returned no document for profile {}",
                created.id
            )));
        }

        tracing::info!(
            "Storing {} profile {} for {}",
            profile_type,
            created.uuid,
            bundle.identifier
        );
        self.store
            .save_profile(
                &mut run.checkout,
                profile_type,
                &bundle.identifier,
                &created.content,
            )
            .await?;
        Ok(())
    }

    /// Enabled devices on the configured platform, fetched once per run.
    async fn current_devices<'r>(&self, run: &'r mut Run) -> Result<&'r [Device]> {
        if run.devices.is_none() {
            let devices = self.portal.list_devices(self.platform).await?;
            let current = current_device_set(&devices, self.platform);
            tracing::debug!(
                "{} of {} registered device(s) are enabled on {}",
                current.len(),
                devices.len(),
                self.platform
            );
            run.devices = Some(current);
        }
        Ok(run.devices.as_deref().unwrap_or_default())
    }

    fn profile_name(&self, profile_type: ProfileType, bundle: &BundleId) -> String {
        format!(
            "{} {} {}",
            self.options.profile_name_prefix,
            profile_type.name_prefix(),
            bundle.identifier
        )
    }
}

/// Errors that end the whole run rather than a single pair.
fn aborts_run(error: &SignetError) -> bool {
    matches!(
        error,
        SignetError::Io(_)
            | SignetError::Store(_)
            | SignetError::Encryption(_)
            | SignetError::Retrieval(_)
            | SignetError::Git(_)
            | SignetError::Publish(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aborts_run_classification() {
        assert!(aborts_run(&SignetError::Store("disk full".into())));
        assert!(aborts_run(&SignetError::Io(std::io::Error::other("x"))));
        assert!(!aborts_run(&SignetError::Portal("409".into())));
        assert!(!aborts_run(&SignetError::ProfileParse("bad".into())));
    }

    #[test]
    fn test_report_failures() {
        let mut report = ReconcileReport::default();
        report.pairs.push(PairReport {
            bundle_id: "com.acme.app".into(),
            profile_type: ProfileType::Adhoc,
            outcome: PairOutcome::Kept,
        });
        assert!(!report.has_failures());
        report.pairs.push(PairReport {
            bundle_id: "com.acme.other".into(),
            profile_type: ProfileType::Adhoc,
            outcome: PairOutcome::Failed {
                reason: "boom".into(),
            },
        });
        assert!(report.has_failures());
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(PairOutcome::Kept.to_string(), "kept");
        assert_eq!(
            PairOutcome::Replaced {
                reason: "expired".into()
            }
            .to_string(),
            "replaced (expired)"
        );
    }
}
