//! Ed25519 key handling for the presence authority.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use presence_core::digest::{parse_prefixed_hex, to_prefixed_hex};
use presence_core::PresenceError;
use rand::rngs::OsRng;
use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to read key file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write key file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("key is not valid hex: {0}")]
    Hex(String),
    #[error("key must be {expected} bytes, got {got}")]
    Length { expected: usize, got: usize },
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("configured authority public key does not match the signing key")]
    AuthorityMismatch,
}

fn decode_32(s: &str) -> Result<[u8; 32], KeyError> {
    let bytes = parse_prefixed_hex(s.trim()).map_err(|e| KeyError::Hex(e.to_string()))?;
    bytes.as_slice().try_into().map_err(|_| KeyError::Length {
        expected: 32,
        got: bytes.len(),
    })
}

pub fn generate_signing_key() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

pub fn signing_key_from_hex(s: &str) -> Result<SigningKey, KeyError> {
    Ok(SigningKey::from_bytes(&decode_32(s)?))
}

pub fn verifying_key_from_hex(s: &str) -> Result<VerifyingKey, KeyError> {
    VerifyingKey::from_bytes(&decode_32(s)?).map_err(|e| KeyError::InvalidPublicKey(e.to_string()))
}

pub fn verifying_key_hex(key: &VerifyingKey) -> String {
    to_prefixed_hex(key.as_bytes())
}

pub fn load_signing_key(path: &Path) -> Result<SigningKey, KeyError> {
    let raw = fs::read_to_string(path).map_err(|source| KeyError::Read {
        path: path.display().to_string(),
        source,
    })?;
    signing_key_from_hex(&raw)
}

/// Writes the secret key as `0x`-hex, owner-readable only on unix.
pub fn write_signing_key(path: &Path, key: &SigningKey) -> Result<(), KeyError> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let to_err = |source| KeyError::Write {
        path: path.display().to_string(),
        source,
    };
    let mut file = options.open(path).map_err(to_err)?;
    writeln!(file, "{}", to_prefixed_hex(&key.to_bytes())).map_err(to_err)
}

/// Checks an optional configured public key against the signing key.
pub fn ensure_authority(signing: &SigningKey, configured: Option<&str>) -> Result<VerifyingKey, KeyError> {
    let derived = signing.verifying_key();
    if let Some(expected) = configured {
        if verifying_key_from_hex(expected)? != derived {
            return Err(KeyError::AuthorityMismatch);
        }
    }
    Ok(derived)
}

pub fn sign_digest(key: &SigningKey, digest: &blake3::Hash) -> String {
    to_prefixed_hex(&key.sign(digest.as_bytes()).to_bytes())
}

/// Verifies that `signature_hex` is `key`'s signature over `digest`.
///
/// A signature that cannot be decoded is malformed; one that decodes but was
/// produced by any other key is untrusted.
pub fn verify_digest(
    key: &VerifyingKey,
    digest: &blake3::Hash,
    signature_hex: &str,
) -> Result<(), PresenceError> {
    let bytes = parse_prefixed_hex(signature_hex)
        .map_err(|e| PresenceError::MalformedSignature(e.to_string()))?;
    let arr: [u8; 64] = bytes.as_slice().try_into().map_err(|_| {
        PresenceError::MalformedSignature(format!("signature must be 64 bytes, got {}", bytes.len()))
    })?;
    let signature = Signature::from_bytes(&arr);
    key.verify_strict(digest.as_bytes(), &signature)
        .map_err(|_| PresenceError::UntrustedSigner)
}
