//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use tempfile::TempDir;

use signet_core::config::StoreConfig;
use signet_core::crypto::{self, AesGcmCipher, FileCipher};
use signet_core::keychain::{ImportOutcome, TrustStore};
use signet_core::models::{
    BundleId, CertificateType, Device, DeviceStatus, Platform, ProfileState, ProfileType,
};
use signet_core::portal::{Portal, ProfileRequest, RemoteCertificate, RemoteProfile};
use signet_core::store::{GitBackend, SecretStore};
use signet_core::{Result, SignetError};

pub const PASSPHRASE: &str = "correct horse battery staple";
pub const BRANCH: &str = "main";
pub const GIT_URL: &str = "https://git.example.com/acme/certificates.git";

// ============================================================================
// Git
// ============================================================================

type Tree = BTreeMap<PathBuf, Vec<u8>>;

#[derive(Default)]
pub struct GitState {
    pub branches: BTreeMap<String, Tree>,
    pub pushes: usize,
    pub messages: Vec<String>,
    pub reject_push: bool,
    pub unreachable: bool,
    pending: Option<(String, Vec<(PathBuf, Option<Vec<u8>>)>)>,
}

/// Remote repository held in memory. Branches map relative paths to bytes.
#[derive(Default)]
pub struct FakeGit {
    state: Mutex<GitState>,
}

impl FakeGit {
    pub fn state(&self) -> MutexGuard<'_, GitState> {
        self.state.lock().unwrap()
    }

    pub fn seed(&self, branch: &str, path: &str, contents: Vec<u8>) {
        self.state()
            .branches
            .entry(branch.to_string())
            .or_default()
            .insert(PathBuf::from(path), contents);
    }

    pub fn files(&self, branch: &str) -> Tree {
        self.state().branches.get(branch).cloned().unwrap_or_default()
    }

    pub fn pushes(&self) -> usize {
        self.state().pushes
    }
}

#[async_trait]
impl GitBackend for FakeGit {
    async fn clone_repo(&self, _url: &str, _dest: &Path) -> Result<()> {
        if self.state().unreachable {
            return Err(SignetError::Git("could not resolve host".to_string()));
        }
        Ok(())
    }

    async fn branch_exists(&self, _repo: &Path, branch: &str) -> Result<bool> {
        Ok(self.state().branches.contains_key(branch))
    }

    async fn checkout_branch(&self, repo: &Path, branch: &str) -> Result<()> {
        let tree = self.files(branch);
        for (path, contents) in tree {
            let absolute = repo.join(path);
            std::fs::create_dir_all(absolute.parent().unwrap())?;
            std::fs::write(absolute, contents)?;
        }
        Ok(())
    }

    async fn create_orphan_branch(&self, _repo: &Path, _branch: &str) -> Result<()> {
        Ok(())
    }

    async fn commit(&self, repo: &Path, paths: &[PathBuf], message: &str) -> Result<()> {
        let changes = paths
            .iter()
            .map(|p| (p.clone(), std::fs::read(repo.join(p)).ok()))
            .collect();
        self.state().pending = Some((message.to_string(), changes));
        Ok(())
    }

    async fn push(&self, _repo: &Path, branch: &str) -> Result<()> {
        let mut state = self.state();
        if state.reject_push {
            return Err(SignetError::Publish("rejected: non-fast-forward".to_string()));
        }
        let (message, changes) = state
            .pending
            .take()
            .ok_or_else(|| SignetError::Git("nothing committed".to_string()))?;
        let tree = state.branches.entry(branch.to_string()).or_default();
        for (path, contents) in changes {
            match contents {
                Some(contents) => {
                    tree.insert(path, contents);
                }
                None => {
                    tree.remove(&path);
                }
            }
        }
        state.pushes += 1;
        state.messages.push(message);
        Ok(())
    }
}

pub fn encrypt(plaintext: &[u8]) -> Vec<u8> {
    AesGcmCipher.encrypt(plaintext, PASSPHRASE).unwrap()
}

pub fn decrypt(ciphertext: &[u8]) -> Vec<u8> {
    AesGcmCipher.decrypt(ciphertext, PASSPHRASE).unwrap()
}

/// Store wired to a fake remote, with checkouts created under `root`.
pub fn store(git: &Arc<FakeGit>, root: &TempDir, passphrase: &str) -> SecretStore {
    let mut config = StoreConfig::new(GIT_URL, SecretString::from(passphrase.to_string()));
    config.checkout_root = Some(root.path().to_path_buf());
    SecretStore::new(config, git.clone(), Arc::new(AesGcmCipher))
}

pub fn is_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

pub fn assert_all_encrypted(tree: &Tree) {
    for (path, contents) in tree {
        let first = path.components().next().unwrap().as_os_str();
        if (first == "certs" || first == "profiles") && !path.ends_with("placeholder") {
            assert!(crypto::is_encrypted(contents), "{} is not encrypted", path.display());
        }
    }
}

// ============================================================================
// Portal
// ============================================================================

pub struct PortalState {
    pub bundles: Vec<BundleId>,
    pub certificates: BTreeMap<String, RemoteCertificate>,
    pub devices: Vec<Device>,
    /// `(bundle remote id, profile)`
    pub profiles: Vec<(String, RemoteProfile)>,
    pub created_certificates: Vec<String>,
    pub created_profiles: Vec<ProfileRequest>,
    pub deleted_profiles: Vec<String>,
    pub fail_certificate_lookup: bool,
    pub fail_profile_for: Option<String>,
    next_id: u32,
}

pub struct FakePortal {
    state: Mutex<PortalState>,
}

impl FakePortal {
    pub fn new(bundle_ids: &[&str]) -> Self {
        let bundles = bundle_ids.iter().map(|id| bundle(id)).collect();
        Self {
            state: Mutex::new(PortalState {
                bundles,
                certificates: BTreeMap::new(),
                devices: Vec::new(),
                profiles: Vec::new(),
                created_certificates: Vec::new(),
                created_profiles: Vec::new(),
                deleted_profiles: Vec::new(),
                fail_certificate_lookup: false,
                fail_profile_for: None,
                next_id: 0,
            }),
        }
    }

    pub fn with_enabled_devices(self, count: usize) -> Self {
        for n in 0..count {
            self.add_device(n, DeviceStatus::Enabled, Platform::Ios);
        }
        self
    }

    pub fn add_device(&self, n: usize, status: DeviceStatus, platform: Platform) {
        self.state().devices.push(Device {
            remote_id: format!("DEV{}-{}", n, platform),
            udid: format!("00008101-{:012}-{}", n, platform),
            name: format!("Device {}", n),
            status,
            platform,
        });
    }

    pub fn add_certificate(&self, id: &str, certificate_type: CertificateType, expires_at: DateTime<Utc>) {
        self.state().certificates.insert(
            id.to_string(),
            RemoteCertificate {
                id: id.to_string(),
                certificate_type,
                expires_at,
                content: certificate_bytes(id),
            },
        );
    }

    pub fn state(&self) -> MutexGuard<'_, PortalState> {
        self.state.lock().unwrap()
    }

    pub fn profile(&self, uuid: &str) -> Option<RemoteProfile> {
        self.state()
            .profiles
            .iter()
            .find(|(_, p)| p.uuid == uuid)
            .map(|(_, p)| p.clone())
    }

    pub fn insert_profile(&self, bundle_remote_id: &str, profile: RemoteProfile) {
        self.state()
            .profiles
            .push((bundle_remote_id.to_string(), profile));
    }
}

#[async_trait]
impl Portal for FakePortal {
    async fn find_bundle_id(&self, identifier: &str) -> Result<Option<BundleId>> {
        Ok(self
            .state()
            .bundles
            .iter()
            .find(|b| b.identifier == identifier)
            .cloned())
    }

    async fn certificate(&self, id: &str) -> Result<Option<RemoteCertificate>> {
        let state = self.state();
        if state.fail_certificate_lookup {
            return Err(SignetError::Portal("503 Service Unavailable".to_string()));
        }
        Ok(state.certificates.get(id).cloned())
    }

    async fn create_certificate(
        &self,
        certificate_type: CertificateType,
        csr_pem: &str,
    ) -> Result<RemoteCertificate> {
        assert!(csr_pem.contains("BEGIN CERTIFICATE REQUEST"));
        let mut state = self.state();
        state.next_id += 1;
        let id = format!("CERT{}", state.next_id);
        let certificate = RemoteCertificate {
            id: id.clone(),
            certificate_type,
            expires_at: Utc::now() + Duration::days(365),
            content: certificate_bytes(&id),
        };
        state.certificates.insert(id.clone(), certificate.clone());
        state.created_certificates.push(id);
        Ok(certificate)
    }

    async fn list_devices(&self, platform: Platform) -> Result<Vec<Device>> {
        Ok(self
            .state()
            .devices
            .iter()
            .filter(|d| d.platform == platform)
            .cloned()
            .collect())
    }

    async fn profile_by_uuid(
        &self,
        bundle_id: &BundleId,
        uuid: &str,
    ) -> Result<Option<RemoteProfile>> {
        Ok(self
            .state()
            .profiles
            .iter()
            .find(|(bundle, p)| *bundle == bundle_id.remote_id && p.uuid == uuid)
            .map(|(_, p)| p.clone()))
    }

    async fn profiles_by_name(&self, name: &str) -> Result<Vec<RemoteProfile>> {
        Ok(self
            .state()
            .profiles
            .iter()
            .filter(|(_, p)| p.name == name)
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn create_profile(&self, request: &ProfileRequest) -> Result<RemoteProfile> {
        let mut state = self.state();
        if state.fail_profile_for.as_deref() == Some(request.bundle_id.identifier.as_str()) {
            return Err(SignetError::Portal("409 Conflict: simulated failure".to_string()));
        }
        if state.profiles.iter().any(|(_, p)| p.name == request.name) {
            return Err(SignetError::Portal(format!(
                "409 Conflict: duplicate profile name {}",
                request.name
            )));
        }

        state.next_id += 1;
        let id = format!("PROF{}", state.next_id);
        let uuid = format!("UUID-{:04}", state.next_id);
        let udids: Vec<String> = request
            .device_ids
            .iter()
            .filter_map(|id| state.devices.iter().find(|d| &d.remote_id == id))
            .map(|d| d.udid.clone())
            .collect();
        let expires_at = Utc::now() + Duration::days(365);
        let content = profile_document(
            &uuid,
            &request.name,
            &request.bundle_id.identifier,
            &udids,
            request.profile_type == ProfileType::Development,
            expires_at,
        );

        let profile = RemoteProfile {
            id,
            uuid,
            name: request.name.clone(),
            profile_type: request.profile_type,
            state: ProfileState::Active,
            expires_at: Some(expires_at),
            content,
            certificate_ids: Some(request.certificate_ids.clone()),
        };
        state
            .profiles
            .push((request.bundle_id.remote_id.clone(), profile.clone()));
        state.created_profiles.push(request.clone());
        Ok(profile)
    }

    async fn delete_profile(&self, id: &str) -> Result<()> {
        let mut state = self.state();
        state.profiles.retain(|(_, p)| p.id != id);
        state.deleted_profiles.push(id.to_string());
        Ok(())
    }
}

pub fn bundle(identifier: &str) -> BundleId {
    BundleId {
        identifier: identifier.to_string(),
        remote_id: format!("B-{}", identifier),
        display_name: identifier.to_string(),
    }
}

/// Stand-in certificate body; only its bytes matter to the store.
pub fn certificate_bytes(id: &str) -> Vec<u8> {
    let mut der = vec![0x30, 0x82, 0x01, 0x00];
    der.extend(format!("certificate {}", id).into_bytes());
    der
}

/// Builds a profile document: a plist inside a stand-in CMS envelope.
pub fn profile_document(
    uuid: &str,
    name: &str,
    bundle_identifier: &str,
    devices: &[String],
    development: bool,
    expires_at: DateTime<Utc>,
) -> Vec<u8> {
    let mut dict = plist::Dictionary::new();
    dict.insert("UUID".to_string(), uuid.into());
    dict.insert("Name".to_string(), name.into());
    dict.insert(
        "TeamIdentifier".to_string(),
        plist::Value::Array(vec!["TEAM123456".into()]),
    );
    let mut entitlements = plist::Dictionary::new();
    entitlements.insert(
        "application-identifier".to_string(),
        format!("TEAM123456.{}", bundle_identifier).into(),
    );
    entitlements.insert("get-task-allow".to_string(), plist::Value::Boolean(development));
    dict.insert(
        "Entitlements".to_string(),
        plist::Value::Dictionary(entitlements),
    );
    let expiry = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(expires_at.timestamp() as u64);
    dict.insert(
        "ExpirationDate".to_string(),
        plist::Value::Date(plist::Date::from(expiry)),
    );
    if !devices.is_empty() {
        dict.insert(
            "ProvisionedDevices".to_string(),
            plist::Value::Array(devices.iter().map(|d| d.clone().into()).collect()),
        );
    }

    let mut out = vec![0x30, 0x80, 0x06, 0x09, 0x2a, 0x86];
    plist::Value::Dictionary(dict).to_writer_xml(&mut out).unwrap();
    out.extend([0xa0, 0x82, 0x00, 0x00]);
    out
}

// ============================================================================
// Trust store
// ============================================================================

#[derive(Default)]
pub struct TrustState {
    /// Contents of every imported item.
    pub contents: BTreeSet<Vec<u8>>,
    /// Certificate fingerprint -> contents.
    pub certificates: BTreeMap<String, Vec<u8>>,
    pub imports: Vec<PathBuf>,
    pub deleted: Vec<String>,
    pub unlocked: Vec<PathBuf>,
    pub grants: usize,
    /// Overrides the identity list, which otherwise mirrors `certificates`.
    pub identities: Option<Vec<String>>,
}

#[derive(Default)]
pub struct FakeTrustStore {
    state: Mutex<TrustState>,
}

impl FakeTrustStore {
    pub fn state(&self) -> MutexGuard<'_, TrustState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl TrustStore for FakeTrustStore {
    async fn resolve_keychain_path(&self, name: &str) -> Result<PathBuf> {
        Ok(PathBuf::from("/fake/keychains").join(name))
    }

    async fn unlock(&self, keychain: &Path, _password: &str) -> Result<()> {
        self.state().unlocked.push(keychain.to_path_buf());
        Ok(())
    }

    async fn import(&self, item: &Path, _keychain: &Path) -> Result<ImportOutcome> {
        let data = std::fs::read(item)?;
        let mut state = self.state();
        state.imports.push(item.to_path_buf());
        if !state.contents.insert(data.clone()) {
            return Ok(ImportOutcome::AlreadyPresent);
        }
        let is_certificate = item
            .extension()
            .map(|ext| ext == "cer" || ext == "der")
            .unwrap_or(false);
        if is_certificate {
            let fingerprint = crypto::certificate_fingerprint(&data)?;
            state.certificates.insert(fingerprint, data);
        }
        Ok(ImportOutcome::Added)
    }

    async fn certificate_fingerprints(&self, _keychain: &Path) -> Result<Vec<String>> {
        Ok(self.state().certificates.keys().cloned().collect())
    }

    async fn delete_certificate(&self, _keychain: &Path, fingerprint: &str) -> Result<()> {
        let mut state = self.state();
        if let Some(contents) = state.certificates.remove(fingerprint) {
            state.contents.remove(&contents);
        }
        state.deleted.push(fingerprint.to_string());
        Ok(())
    }

    async fn valid_identities(&self, _keychain: &Path) -> Result<Vec<String>> {
        let state = self.state();
        Ok(match &state.identities {
            Some(identities) => identities.clone(),
            None => state.certificates.keys().cloned().collect(),
        })
    }

    async fn verify_certificate(&self, _certificate: &Path) -> Result<()> {
        Ok(())
    }

    async fn grant_tool_access(&self, _keychain: &Path, _password: &str) -> Result<()> {
        self.state().grants += 1;
        Ok(())
    }
}
