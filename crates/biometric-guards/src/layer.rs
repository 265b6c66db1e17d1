use presence_core::{
    BiometricLayer, FaceSample, FingerSample, HeartSample, Modality, PresenceError, ThresholdConfig,
    VoiceSample,
};

fn within(value: f64, min: f64, max: f64) -> bool {
    value.is_finite() && value >= min && value <= max
}

fn meets(value: f64, min: f64) -> bool {
    value.is_finite() && value >= min
}

/// Hard-threshold validation of a single modality sample.
///
/// Every check is pass/fail; there is no weighting between fields and no
/// fallback to a lower confidence tier.
#[derive(Debug, Clone, Default)]
pub struct LayerValidator {
    thresholds: ThresholdConfig,
}

impl LayerValidator {
    pub fn new(thresholds: ThresholdConfig) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    fn common(layer: &dyn BiometricLayer) -> Result<(), PresenceError> {
        let modality = layer.modality();
        if layer.captured_at_ms() <= 0 {
            return Err(PresenceError::layer(modality, "capture timestamp missing"));
        }
        if !within(layer.confidence(), 0.0, 1.0) {
            return Err(PresenceError::layer(modality, "confidence out of range"));
        }
        Ok(())
    }

    pub fn validate_face(&self, face: &FaceSample) -> Result<(), PresenceError> {
        Self::common(face)?;
        let t = &self.thresholds.face;
        let fail = |reason: String| Err(PresenceError::layer(Modality::Face, reason));

        if face.geometry.len() != t.geometry_points {
            return fail(format!(
                "geometry map has {} points, expected {}",
                face.geometry.len(),
                t.geometry_points
            ));
        }
        if face
            .geometry
            .iter()
            .any(|p| !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()))
        {
            return fail("geometry point not finite".into());
        }
        if !face.blood_flow.detected {
            return fail("blood flow not detected".into());
        }
        if !within(face.blood_flow.confidence, 0.0, 1.0)
            || !meets(face.blood_flow.confidence, t.blood_flow_min_confidence)
        {
            return fail("blood flow confidence below threshold".into());
        }
        if !face.is_live_human {
            return fail("not a live human".into());
        }
        if !meets(face.confidence, t.liveness_min_confidence) {
            return fail("liveness confidence below threshold".into());
        }
        Ok(())
    }

    pub fn validate_finger(&self, finger: &FingerSample) -> Result<(), PresenceError> {
        Self::common(finger)?;
        let t = &self.thresholds.finger;

        if finger.template_digest.trim().is_empty() {
            return Err(PresenceError::layer(Modality::Finger, "template digest missing"));
        }
        if !finger.liveness_detected {
            return Err(PresenceError::layer(Modality::Finger, "liveness not detected"));
        }
        if !meets(finger.confidence, t.min_confidence) {
            return Err(PresenceError::layer(Modality::Finger, "confidence below threshold"));
        }
        Ok(())
    }

    pub fn validate_heart(&self, heart: &HeartSample) -> Result<(), PresenceError> {
        Self::common(heart)?;
        let t = &self.thresholds.heart;

        if !within(heart.bpm, t.bpm_min, t.bpm_max) {
            return Err(PresenceError::layer(Modality::Heart, "bpm out of range"));
        }
        // A flat or negative HRV trace is what a looped recording produces.
        if !meets(heart.hrv_ms, f64::MIN_POSITIVE) {
            return Err(PresenceError::layer(
                Modality::Heart,
                "non-positive heart rate variability",
            ));
        }
        if !meets(heart.confidence, t.min_confidence) {
            return Err(PresenceError::layer(Modality::Heart, "confidence below threshold"));
        }
        Ok(())
    }

    pub fn validate_voice(&self, voice: &VoiceSample) -> Result<(), PresenceError> {
        Self::common(voice)?;
        let t = &self.thresholds.voice;

        if !voice.live_conduction {
            return Err(PresenceError::layer(Modality::Voice, "no live conduction"));
        }
        if !within(voice.fundamental_hz, t.frequency_min_hz, t.frequency_max_hz) {
            return Err(PresenceError::layer(Modality::Voice, "frequency out of range"));
        }
        if !voice.is_live_voice {
            return Err(PresenceError::layer(Modality::Voice, "not a live voice"));
        }
        if !meets(voice.confidence, t.min_confidence) {
            return Err(PresenceError::layer(Modality::Voice, "confidence below threshold"));
        }
        Ok(())
    }
}
