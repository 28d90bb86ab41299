//! Remote authority (developer portal) integration.
//!
//! The reconciler only talks to the [`Portal`] trait; [`AppStoreConnect`]
//! is the production implementation.

pub mod app_store_connect;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{BundleId, CertificateType, Device, Platform, ProfileState, ProfileType};

pub use app_store_connect::AppStoreConnect;

/// A certificate as the portal reports it.
#[derive(Debug, Clone)]
pub struct RemoteCertificate {
    pub id: String,
    pub certificate_type: CertificateType,
    pub expires_at: DateTime<Utc>,
    /// DER-encoded certificate.
    pub content: Vec<u8>,
}

impl RemoteCertificate {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// A provisioning profile as the portal reports it.
#[derive(Debug, Clone)]
pub struct RemoteProfile {
    pub id: String,
    pub uuid: String,
    pub name: String,
    pub profile_type: ProfileType,
    pub state: ProfileState,
    pub expires_at: Option<DateTime<Utc>>,
    /// Signed profile document.
    pub content: Vec<u8>,
    /// Certificates the profile is signed for, when the portal reports them.
    pub certificate_ids: Option<Vec<String>>,
}

/// Parameters of a profile creation request.
#[derive(Debug, Clone)]
pub struct ProfileRequest {
    pub name: String,
    pub profile_type: ProfileType,
    pub bundle_id: BundleId,
    pub certificate_ids: Vec<String>,
    /// Portal device IDs; empty for store profiles.
    pub device_ids: Vec<String>,
}

/// Operations the reconciler needs from the remote authority.
///
/// Lookups return `Ok(None)` for objects that do not exist; errors are
/// reserved for failed requests.
#[async_trait]
pub trait Portal: Send + Sync {
    /// Looks up a registered bundle identifier by its exact identifier.
    async fn find_bundle_id(&self, identifier: &str) -> Result<Option<BundleId>>;

    /// Fetches a certificate by portal ID.
    async fn certificate(&self, id: &str) -> Result<Option<RemoteCertificate>>;

    /// Submits a CSR and returns the issued certificate.
    async fn create_certificate(
        &self,
        certificate_type: CertificateType,
        csr_pem: &str,
    ) -> Result<RemoteCertificate>;

    /// Lists registered devices on `platform` (all statuses).
    async fn list_devices(&self, platform: Platform) -> Result<Vec<Device>>;

    /// Finds the profile with `uuid` among the profiles of `bundle_id`.
    async fn profile_by_uuid(&self, bundle_id: &BundleId, uuid: &str)
    -> Result<Option<RemoteProfile>>;

    /// Lists profiles whose name is exactly `name`.
    async fn profiles_by_name(&self, name: &str) -> Result<Vec<RemoteProfile>>;

    async fn create_profile(&self, request: &ProfileRequest) -> Result<RemoteProfile>;

    async fn delete_profile(&self, id: &str) -> Result<()>;
}
