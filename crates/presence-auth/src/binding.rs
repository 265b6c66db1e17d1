use crate::keys::{sign_digest, verify_digest};
use ed25519_dalek::{SigningKey, VerifyingKey};
use log::warn;
use presence_core::digest::{binding_hash, digest_hex, parse_digest};
use presence_core::{DeviceBindingRecord, PresenceError};

/// Creates a new binding record for a device pair. Rebinding always goes
/// through here again; existing records are never edited.
pub fn establish_binding(
    identity_a: &str,
    identity_b: &str,
    bound_at_ms: i64,
    authority: &SigningKey,
) -> DeviceBindingRecord {
    let hash = binding_hash(identity_a, identity_b, bound_at_ms);
    DeviceBindingRecord {
        identity_a: identity_a.to_string(),
        identity_b: identity_b.to_string(),
        binding_hash: digest_hex(&hash),
        bound_at_ms,
        signature: sign_digest(authority, &hash),
    }
}

/// Fail-closed check of a device binding record.
#[derive(Debug, Clone, Default)]
pub struct DeviceBindingValidator {
    authority: Option<VerifyingKey>,
}

impl DeviceBindingValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Additionally require every record to be signed by `authority`.
    pub fn with_authority(authority: VerifyingKey) -> Self {
        Self {
            authority: Some(authority),
        }
    }

    pub fn validate(
        &self,
        record: &DeviceBindingRecord,
        expected_a: &str,
        expected_b: &str,
    ) -> Result<(), PresenceError> {
        let mismatch = |detail: &str| {
            warn!("[BINDING] {} ({} / {})", detail, record.identity_a, record.identity_b);
            PresenceError::DeviceBindingMismatch(detail.to_string())
        };

        if record.identity_a != expected_a || record.identity_b != expected_b {
            return Err(mismatch("device identities do not match the expected pair"));
        }

        let stored = parse_digest(&record.binding_hash)
            .map_err(|_| mismatch("stored binding hash is not a 32-byte digest"))?;
        let recomputed = binding_hash(&record.identity_a, &record.identity_b, record.bound_at_ms);
        if stored != recomputed {
            return Err(mismatch("binding hash does not match recomputed value"));
        }

        if let Some(authority) = &self.authority {
            verify_digest(authority, &recomputed, &record.signature)
                .map_err(|_| mismatch("binding signature not from the binding authority"))?;
        }
        Ok(())
    }
}
