//! Error types for the Signet core library.

use thiserror::Error;

/// Core error type for credential reconciliation.
#[derive(Error, Debug)]
pub enum SignetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Bundle identifier not found on the portal: {0}")]
    BundleIdNotFound(String),

    #[error("Failed to retrieve secret store: {0}")]
    Retrieval(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Secret store error: {0}")]
    Store(String),

    #[error("Git error: {0}")]
    Git(String),

    #[error("Failed to publish secret store changes: {0}")]
    Publish(String),

    #[error("Portal error: {0}")]
    Portal(String),

    #[error("Keychain error: {0}")]
    Keychain(String),

    #[error("Invalid provisioning profile: {0}")]
    ProfileParse(String),

    #[error("Certificate generation failed: {0}")]
    CertificateGeneration(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type alias for Signet operations.
pub type Result<T> = std::result::Result<T, SignetError>;
