use crate::types::Modality;
use thiserror::Error;

/// Structured rejection for every step of the presence authorization path.
///
/// No variant is ever downgraded into a weaker pass: callers either get a
/// token / acceptance or one of these.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PresenceError {
    #[error("desynchronized capture: spread {spread_ms} ms exceeds cohesion window {window_ms} ms")]
    DesynchronizedCapture { spread_ms: i64, window_ms: i64 },
    #[error("{modality} layer failed: {reason}")]
    LayerValidationFailed { modality: Modality, reason: String },
    #[error("device binding mismatch: {0}")]
    DeviceBindingMismatch(String),
    #[error("token expired (age {age_ms} ms, max {max_age_ms} ms)")]
    TokenExpired { age_ms: i64, max_age_ms: i64 },
    #[error("token nonce already consumed")]
    TokenReplayed,
    #[error("malformed signature: {0}")]
    MalformedSignature(String),
    #[error("unauthorized termination: {0}")]
    UnauthorizedTermination(String),
    #[error("capture is stale (age {age_ms} ms, max {max_age_ms} ms)")]
    StaleCapture { age_ms: i64, max_age_ms: i64 },
    #[error("token issued {ahead_ms} ms in the future")]
    TokenFromFuture { ahead_ms: i64 },
    #[error("token not signed by the trusted authority")]
    UntrustedSigner,
    #[error("stasis active: sensitive operations are locked")]
    StasisActive,
    #[error("replay store unavailable: {0}")]
    ReplayStoreUnavailable(String),
}

impl PresenceError {
    /// Stable label for logs and metric dimensions.
    pub fn kind(&self) -> &'static str {
        match self {
            PresenceError::DesynchronizedCapture { .. } => "desynchronized_capture",
            PresenceError::LayerValidationFailed { .. } => "layer_validation_failed",
            PresenceError::DeviceBindingMismatch(_) => "device_binding_mismatch",
            PresenceError::TokenExpired { .. } => "token_expired",
            PresenceError::TokenReplayed => "token_replayed",
            PresenceError::MalformedSignature(_) => "malformed_signature",
            PresenceError::UnauthorizedTermination(_) => "unauthorized_termination",
            PresenceError::StaleCapture { .. } => "stale_capture",
            PresenceError::TokenFromFuture { .. } => "token_from_future",
            PresenceError::UntrustedSigner => "untrusted_signer",
            PresenceError::StasisActive => "stasis_active",
            PresenceError::ReplayStoreUnavailable(_) => "replay_store_unavailable",
        }
    }

    pub fn layer(modality: Modality, reason: impl Into<String>) -> Self {
        PresenceError::LayerValidationFailed {
            modality,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("failed to encode layer for hashing: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid hex digest: {0}")]
    Hex(String),
}

impl From<DigestError> for PresenceError {
    fn from(e: DigestError) -> Self {
        PresenceError::MalformedSignature(e.to_string())
    }
}
