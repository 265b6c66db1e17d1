use crate::keys::{sign_digest, verify_digest};
use ed25519_dalek::{SigningKey, VerifyingKey};
use log::info;
use presence_core::digest::{content_hash, digest_hex, parse_digest, to_prefixed_hex, token_digest};
use presence_core::{AuthorizationToken, DeviceBindingRecord, FourLayerSignature, PresenceError};
use rand::rngs::OsRng;
use rand::RngCore;

/// Turns an already validated signature and binding into a signed token.
///
/// The issuer trusts its callers: it only refuses structurally incomplete
/// input and never re-runs biometric or binding checks.
pub struct AuthorizationIssuer {
    signing_key: SigningKey,
}

impl AuthorizationIssuer {
    pub fn new(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    fn fresh_nonce() -> String {
        let mut nonce = [0u8; 32];
        OsRng.fill_bytes(&mut nonce);
        to_prefixed_hex(&nonce)
    }

    pub fn issue(
        &self,
        subject: &str,
        signature: &FourLayerSignature,
        binding: &DeviceBindingRecord,
        issued_at: i64,
    ) -> Result<AuthorizationToken, PresenceError> {
        if subject.trim().is_empty() {
            return Err(PresenceError::MalformedSignature("subject is empty".into()));
        }
        if signature.layers().iter().any(|l| !l.confidence().is_finite()) {
            return Err(PresenceError::MalformedSignature("non-finite layer confidence".into()));
        }
        parse_digest(&binding.binding_hash)?;

        let mut token = AuthorizationToken {
            subject: subject.to_string(),
            content_hash: digest_hex(&content_hash(signature)?),
            device_binding_hash: binding.binding_hash.clone(),
            issued_at,
            nonce: Self::fresh_nonce(),
            confidence: signature.mean_confidence(),
            signature: String::new(),
        };
        token.signature = sign_digest(&self.signing_key, &token_digest(&token));

        info!(
            "[ISSUER] token issued for {} (nonce {}, confidence {:.3})",
            token.subject, token.nonce, token.confidence
        );
        Ok(token)
    }
}

/// Verifies the token signature against the trusted authority key.
pub fn verify_token(token: &AuthorizationToken, authority: &VerifyingKey) -> Result<(), PresenceError> {
    verify_digest(authority, &token_digest(token), &token.signature)
}
