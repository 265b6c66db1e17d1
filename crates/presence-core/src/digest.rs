//! BLAKE3 digests shared by binding, issuance and verification.
//!
//! Every variable-length field is length-prefixed so that two different
//! field splits can never produce the same input stream.

use crate::error::DigestError;
use crate::types::{AuthorizationToken, BiometricLayer, FourLayerSignature};
use blake3::{Hash, Hasher};
use serde::Serialize;

const BINDING_DOMAIN: &[u8] = b"presence/device-binding/v1";
const CONTENT_DOMAIN: &[u8] = b"presence/four-layer-content/v1";
const LAYER_DOMAIN: &[u8] = b"presence/layer/v1";
const TOKEN_DOMAIN: &[u8] = b"presence/authorization-token/v1";

fn update_field(hasher: &mut Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

pub fn to_prefixed_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn parse_prefixed_hex(s: &str) -> Result<Vec<u8>, DigestError> {
    let body = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(body).map_err(|e| DigestError::Hex(e.to_string()))
}

/// Parses a `0x`-prefixed 32-byte digest. The returned `Hash` compares in
/// constant time.
pub fn parse_digest(s: &str) -> Result<Hash, DigestError> {
    let bytes = parse_prefixed_hex(s)?;
    let arr: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| DigestError::Hex(format!("expected 32 bytes, got {}", bytes.len())))?;
    Ok(Hash::from(arr))
}

pub fn digest_hex(hash: &Hash) -> String {
    to_prefixed_hex(hash.as_bytes())
}

pub fn layer_hash<L: BiometricLayer + Serialize>(layer: &L) -> Result<Hash, DigestError> {
    let encoded = serde_json::to_vec(layer)?;
    let mut hasher = Hasher::new();
    update_field(&mut hasher, LAYER_DOMAIN);
    update_field(&mut hasher, layer.modality().as_str().as_bytes());
    update_field(&mut hasher, &encoded);
    Ok(hasher.finalize())
}

/// Content hash over the four per-layer hashes and the aggregate timestamp.
pub fn content_hash(signature: &FourLayerSignature) -> Result<Hash, DigestError> {
    let layers = [
        layer_hash(&signature.face)?,
        layer_hash(&signature.finger)?,
        layer_hash(&signature.heart)?,
        layer_hash(&signature.voice)?,
    ];
    let mut hasher = Hasher::new();
    update_field(&mut hasher, CONTENT_DOMAIN);
    for h in &layers {
        hasher.update(h.as_bytes());
    }
    hasher.update(&signature.captured_at_ms.to_le_bytes());
    Ok(hasher.finalize())
}

/// Deterministic binding hash of (identity A, identity B, binding timestamp).
pub fn binding_hash(identity_a: &str, identity_b: &str, bound_at_ms: i64) -> Hash {
    let mut hasher = Hasher::new();
    update_field(&mut hasher, BINDING_DOMAIN);
    update_field(&mut hasher, identity_a.as_bytes());
    update_field(&mut hasher, identity_b.as_bytes());
    hasher.update(&bound_at_ms.to_le_bytes());
    hasher.finalize()
}

/// Digest the issuer signs: every token field except the signature itself.
pub fn token_digest(token: &AuthorizationToken) -> Hash {
    let mut hasher = Hasher::new();
    update_field(&mut hasher, TOKEN_DOMAIN);
    update_field(&mut hasher, token.subject.as_bytes());
    update_field(&mut hasher, token.content_hash.as_bytes());
    update_field(&mut hasher, token.device_binding_hash.as_bytes());
    hasher.update(&token.issued_at.to_le_bytes());
    update_field(&mut hasher, token.nonce.as_bytes());
    hasher.update(&token.confidence.to_bits().to_le_bytes());
    hasher.finalize()
}
