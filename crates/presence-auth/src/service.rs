use crate::binding::DeviceBindingValidator;
use crate::guard::ReplayGuard;
use crate::issuer::AuthorizationIssuer;
use crate::keys::{verifying_key_from_hex, KeyError};
use crate::replay::ReplayStore;
use biometric_guards::{SignatureValidator, ValidatedSignature};
use ed25519_dalek::{SigningKey, VerifyingKey};
use log::warn;
use presence_core::{
    AuthorizationToken, Clock, DeviceBindingRecord, FourLayerSignature, LockState, PresenceConfig,
    PresenceError,
};
use presence_metrics::PresenceMetrics;
use std::sync::Arc;

/// Entry point for downstream actions (mint, trade, verify).
pub struct PresenceService {
    signatures: SignatureValidator,
    bindings: DeviceBindingValidator,
    issuer: AuthorizationIssuer,
    replay: Arc<ReplayGuard>,
    clock: Arc<dyn Clock>,
    lock_state: Option<Arc<dyn LockState>>,
    metrics: Option<Arc<PresenceMetrics>>,
}

impl PresenceService {
    pub fn new(
        config: &PresenceConfig,
        signing_key: SigningKey,
        store: Arc<dyn ReplayStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, KeyError> {
        let bindings = match config.devices.binding_authority_key.as_deref() {
            Some(hex) => DeviceBindingValidator::with_authority(verifying_key_from_hex(hex)?),
            None => DeviceBindingValidator::new(),
        };
        let issuer = AuthorizationIssuer::new(signing_key);
        let replay = Arc::new(ReplayGuard::new(
            store,
            issuer.verifying_key(),
            config.tokens.clone(),
            clock.clone(),
        ));
        Ok(Self {
            signatures: SignatureValidator::new(config.thresholds.clone(), &config.tokens),
            bindings,
            issuer,
            replay,
            clock,
            lock_state: None,
            metrics: None,
        })
    }

    pub fn with_lock_state(mut self, lock_state: Arc<dyn LockState>) -> Self {
        self.lock_state = Some(lock_state);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PresenceMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn authority(&self) -> VerifyingKey {
        self.issuer.verifying_key()
    }

    pub fn replay_guard(&self) -> &Arc<ReplayGuard> {
        &self.replay
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn is_locked(&self) -> bool {
        self.lock_state.as_ref().is_some_and(|l| l.is_locked())
    }

    fn observe<T>(&self, result: Result<T, PresenceError>) -> Result<T, PresenceError> {
        if let (Err(e), Some(m)) = (&result, &self.metrics) {
            m.observe_rejection(e);
        }
        result
    }

    /// Full biometric and device-binding validation without issuing a token.
    pub fn verify_presence(
        &self,
        signature: &FourLayerSignature,
        binding: &DeviceBindingRecord,
        expected_a: &str,
        expected_b: &str,
    ) -> Result<ValidatedSignature, PresenceError> {
        let now_ms = self.clock.now_ms();
        let result = self
            .signatures
            .validate(signature, now_ms)
            .and_then(|validated| {
                self.bindings
                    .validate(binding, expected_a, expected_b)
                    .map(|_| validated)
            });
        self.observe(result)
    }

    pub fn validate_presence(
        &self,
        subject: &str,
        signature: &FourLayerSignature,
        binding: &DeviceBindingRecord,
        expected_a: &str,
        expected_b: &str,
    ) -> Result<AuthorizationToken, PresenceError> {
        self.verify_presence(signature, binding, expected_a, expected_b)?;
        let token = self.observe(self.issuer.issue(subject, signature, binding, self.clock.now_ms()))?;
        if let Some(m) = &self.metrics {
            m.tokens_issued.inc();
        }
        Ok(token)
    }

    /// Consumes `token` for a sensitive action. Refused outright while the
    /// host is in stasis.
    pub fn consume_token(&self, token: &AuthorizationToken) -> Result<(), PresenceError> {
        if self.is_locked() {
            warn!("[PRESENCE] refusing token {}: stasis active", token.nonce);
            return self.observe(Err(PresenceError::StasisActive));
        }
        self.observe(self.replay.try_consume(token))?;
        if let Some(m) = &self.metrics {
            m.tokens_consumed.inc();
        }
        Ok(())
    }
}
