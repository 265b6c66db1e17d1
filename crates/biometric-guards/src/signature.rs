use crate::layer::LayerValidator;
use crate::temporal::TemporalSynchronizer;
use log::{debug, warn};
use presence_core::{FourLayerSignature, PresenceError, ThresholdConfig, TokenConfig};

/// Outcome of a fully validated four-layer signature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidatedSignature {
    pub spread_ms: i64,
    pub mean_confidence: f64,
}

/// Full biometric pipeline: cohesion first, then capture freshness, then
/// each modality in turn. The first failure short-circuits.
#[derive(Debug, Clone)]
pub struct SignatureValidator {
    layers: LayerValidator,
    synchronizer: TemporalSynchronizer,
    max_capture_age_ms: i64,
    max_clock_skew_ms: i64,
}

impl SignatureValidator {
    pub fn new(thresholds: ThresholdConfig, tokens: &TokenConfig) -> Self {
        let synchronizer = TemporalSynchronizer::new(thresholds.cohesion_window_ms);
        Self {
            layers: LayerValidator::new(thresholds),
            synchronizer,
            max_capture_age_ms: tokens.max_age_ms,
            max_clock_skew_ms: tokens.max_clock_skew_ms,
        }
    }

    pub fn layer_validator(&self) -> &LayerValidator {
        &self.layers
    }

    fn check_freshness(&self, signature: &FourLayerSignature, now_ms: i64) -> Result<(), PresenceError> {
        let ts = signature.capture_timestamps().map(|(_, t)| t);
        let newest = ts.iter().copied().max().unwrap_or_default();
        let oldest = ts.iter().copied().min().unwrap_or_default();

        let ahead_ms = newest.saturating_sub(now_ms);
        if ahead_ms > self.max_clock_skew_ms {
            return Err(PresenceError::MalformedSignature(format!(
                "capture timestamp {ahead_ms} ms in the future"
            )));
        }
        let age_ms = now_ms.saturating_sub(oldest);
        if age_ms > self.max_capture_age_ms {
            return Err(PresenceError::StaleCapture {
                age_ms,
                max_age_ms: self.max_capture_age_ms,
            });
        }
        Ok(())
    }

    pub fn validate(
        &self,
        signature: &FourLayerSignature,
        now_ms: i64,
    ) -> Result<ValidatedSignature, PresenceError> {
        let spread_ms = self.synchronizer.check(signature).map_err(|e| {
            warn!("[BIOMETRIC] rejected desynchronized capture: {}", e);
            e
        })?;
        self.check_freshness(signature, now_ms)?;

        let result = self
            .layers
            .validate_face(&signature.face)
            .and_then(|_| self.layers.validate_finger(&signature.finger))
            .and_then(|_| self.layers.validate_heart(&signature.heart))
            .and_then(|_| self.layers.validate_voice(&signature.voice));
        if let Err(e) = result {
            warn!("[BIOMETRIC] {}", e);
            return Err(e);
        }

        let mean_confidence = signature.mean_confidence();
        debug!(
            "[BIOMETRIC] four-layer signature accepted (spread {} ms, confidence {:.3})",
            spread_ms, mean_confidence
        );
        Ok(ValidatedSignature {
            spread_ms,
            mean_confidence,
        })
    }
}
