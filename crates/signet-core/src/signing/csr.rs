//! Key pair and certificate signing request generation.

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use zeroize::Zeroizing;

use crate::error::{Result, SignetError};

/// A freshly generated private key together with its CSR.
pub struct SigningRequest {
    /// PEM-encoded PKCS#10 request submitted to the portal.
    pub csr_pem: String,
    /// PEM-encoded PKCS#8 private key, persisted next to the issued certificate.
    pub private_key_pem: Zeroizing<String>,
}

impl std::fmt::Debug for SigningRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningRequest")
            .field("csr_pem", &self.csr_pem)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

/// Generates a key pair and a CSR carrying `common_name`.
pub fn generate_signing_request(common_name: &str) -> Result<SigningRequest> {
    let key_pair = KeyPair::generate()
        .map_err(|e| SignetError::CertificateGeneration(format!("Key generation failed: {}", e)))?;
    let private_key_pem = Zeroizing::new(key_pair.serialize_pem());

    let mut params = CertificateParams::new(Vec::<String>::new())
        .map_err(|e| SignetError::CertificateGeneration(format!("Invalid CSR parameters: {}", e)))?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;

    let csr_pem = params
        .serialize_request(&key_pair)
        .and_then(|csr| csr.pem())
        .map_err(|e| SignetError::CertificateGeneration(format!("CSR serialization failed: {}", e)))?;

    Ok(SigningRequest {
        csr_pem,
        private_key_pem,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_signing_request() {
        let request = generate_signing_request("Signet Distribution").unwrap();
        assert!(request.csr_pem.contains("BEGIN CERTIFICATE REQUEST"));
        assert!(request.private_key_pem.contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn test_debug_redacts_key() {
        let request = generate_signing_request("Signet").unwrap();
        let rendered = format!("{:?}", request);
        assert!(!rendered.contains("BEGIN PRIVATE KEY"));
        assert!(rendered.contains("<redacted>"));
    }
}
