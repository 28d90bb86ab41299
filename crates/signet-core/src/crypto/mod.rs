//! Cryptographic utilities for the secret store and certificate fingerprints.
//!
//! Secret store files are encrypted one at a time, in place. The container is
//! `MAGIC | salt | nonce | ciphertext+tag` with an AES-256-GCM key derived
//! from the passphrase through HKDF-SHA256. Salt and nonce are HMACs of the
//! plaintext, so encrypting an unchanged file reproduces its previous
//! ciphertext byte for byte and git never sees a spurious diff.

use std::path::Path;

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Result, SignetError};

type HmacSha256 = Hmac<Sha256>;

/// Header written at the start of every encrypted store file.
pub const MAGIC: &[u8; 8] = b"SIGNET1\0";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_INFO: &[u8] = b"signet secret store file key";

/// Per-file symmetric cipher used by the secret store.
pub trait FileCipher: Send + Sync {
    /// Encrypts a whole file's contents.
    fn encrypt(&self, plaintext: &[u8], passphrase: &str) -> Result<Vec<u8>>;

    /// Decrypts a whole file's contents. Fails on a wrong passphrase.
    fn decrypt(&self, ciphertext: &[u8], passphrase: &str) -> Result<Vec<u8>>;
}

/// AES-256-GCM file cipher with deterministic salt and nonce.
#[derive(Debug, Default, Clone, Copy)]
pub struct AesGcmCipher;

impl FileCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &[u8], passphrase: &str) -> Result<Vec<u8>> {
        let salt_mac = hmac_sha256(passphrase.as_bytes(), &[b"salt", plaintext])?;
        let nonce_mac = hmac_sha256(passphrase.as_bytes(), &[b"nonce", plaintext])?;
        let salt = &salt_mac[..SALT_LEN];
        let nonce_bytes = &nonce_mac[..NONCE_LEN];

        let key = derive_file_key(passphrase, salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(nonce_bytes), plaintext)
            .map_err(|e| SignetError::Encryption(format!("Encryption failed: {}", e)))?;

        let mut out = Vec::with_capacity(MAGIC.len() + SALT_LEN + NONCE_LEN + ciphertext.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(salt);
        out.extend_from_slice(nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8], passphrase: &str) -> Result<Vec<u8>> {
        if !is_encrypted(data) {
            return Err(SignetError::Encryption(
                "File is not an encrypted secret store file".to_string(),
            ));
        }
        if data.len() < MAGIC.len() + SALT_LEN + NONCE_LEN + TAG_LEN {
            return Err(SignetError::Encryption("Encrypted file is truncated".to_string()));
        }

        let body = &data[MAGIC.len()..];
        let (salt, rest) = body.split_at(SALT_LEN);
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

        let key = derive_file_key(passphrase, salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| {
                SignetError::Encryption(
                    "Decryption failed (wrong passphrase or corrupted file)".to_string(),
                )
            })
    }
}

/// Returns true if `data` starts with the store's encryption header.
pub fn is_encrypted(data: &[u8]) -> bool {
    data.starts_with(MAGIC)
}

/// Encrypts a file in place.
pub async fn encrypt_file(cipher: &dyn FileCipher, path: &Path, passphrase: &str) -> Result<()> {
    let plaintext = tokio::fs::read(path).await?;
    let ciphertext = cipher.encrypt(&plaintext, passphrase)?;
    tokio::fs::write(path, ciphertext).await?;
    Ok(())
}

/// Decrypts a file in place.
pub async fn decrypt_file(cipher: &dyn FileCipher, path: &Path, passphrase: &str) -> Result<()> {
    let ciphertext = tokio::fs::read(path).await?;
    let plaintext = cipher.decrypt(&ciphertext, passphrase).map_err(|e| {
        SignetError::Encryption(format!("{}: {}", path.display(), e))
    })?;
    tokio::fs::write(path, plaintext).await?;
    Ok(())
}

/// Computes HMAC-SHA256 over the concatenation of `parts`.
fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| SignetError::Encryption(format!("Invalid HMAC key: {}", e)))?;
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Derives the 32-byte AES key for one file.
fn derive_file_key(passphrase: &str, salt: &[u8]) -> Result<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(Some(salt), passphrase.as_bytes());
    let mut key = [0u8; 32];
    hk.expand(KEY_INFO, &mut key)
        .map_err(|e| SignetError::Encryption(format!("Key derivation failed: {}", e)))?;
    Ok(key)
}

/// Computes the keychain-style fingerprint (uppercase hex SHA-1) of a certificate.
///
/// Accepts either DER bytes or a PEM `CERTIFICATE` block.
pub fn certificate_fingerprint(data: &[u8]) -> Result<String> {
    use sha1::{Digest, Sha1};
    let der = certificate_der(data)?;
    Ok(hex::encode_upper(Sha1::digest(&der)))
}

/// Returns the DER encoding of a certificate given as DER or PEM.
pub fn certificate_der(data: &[u8]) -> Result<Vec<u8>> {
    const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
    const END: &str = "-----END CERTIFICATE-----";

    let Ok(text) = std::str::from_utf8(data) else {
        return Ok(data.to_vec());
    };
    let Some(start) = text.find(BEGIN) else {
        return Ok(data.to_vec());
    };
    let body = &text[start + BEGIN.len()..];
    let end = body
        .find(END)
        .ok_or_else(|| SignetError::Keychain("PEM certificate missing end marker".to_string()))?;
    let b64: String = body[..end].chars().filter(|c| !c.is_whitespace()).collect();
    BASE64
        .decode(b64)
        .map_err(|e| SignetError::Keychain(format!("Invalid PEM certificate: {}", e)))
}
