use serde::{Deserialize, Serialize};
use std::fmt;

/// The four biometric modalities that make up one presence event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Face,
    Finger,
    Heart,
    Voice,
}

impl Modality {
    pub const ALL: [Modality; 4] = [
        Modality::Face,
        Modality::Finger,
        Modality::Heart,
        Modality::Voice,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Face => "face",
            Modality::Finger => "finger",
            Modality::Heart => "heart",
            Modality::Voice => "voice",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common view over a single captured modality sample.
pub trait BiometricLayer {
    fn modality(&self) -> Modality;
    /// Overall confidence reported by the capture device, expected in [0, 1].
    fn confidence(&self) -> f64;
    fn captured_at_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FacePoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BloodFlowSignal {
    pub detected: bool,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FaceSample {
    pub geometry: Vec<FacePoint>,
    pub blood_flow: BloodFlowSignal,
    /// Liveness confidence of the whole face capture.
    pub confidence: f64,
    pub is_live_human: bool,
    pub captured_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FingerSample {
    /// Opaque digest of the minutiae template, produced by the capture device.
    pub template_digest: String,
    pub liveness_detected: bool,
    pub confidence: f64,
    pub captured_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartSample {
    pub bpm: f64,
    /// Heart-rate variability in milliseconds. Zero or negative means a flat,
    /// replayed trace.
    pub hrv_ms: f64,
    pub confidence: f64,
    pub captured_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoiceSample {
    pub live_conduction: bool,
    pub fundamental_hz: f64,
    pub is_live_voice: bool,
    pub confidence: f64,
    pub captured_at_ms: i64,
}

macro_rules! impl_layer {
    ($ty:ty, $modality:expr) => {
        impl BiometricLayer for $ty {
            fn modality(&self) -> Modality {
                $modality
            }

            fn confidence(&self) -> f64 {
                self.confidence
            }

            fn captured_at_ms(&self) -> i64 {
                self.captured_at_ms
            }
        }
    };
}

impl_layer!(FaceSample, Modality::Face);
impl_layer!(FingerSample, Modality::Finger);
impl_layer!(HeartSample, Modality::Heart);
impl_layer!(VoiceSample, Modality::Voice);

/// Exactly one sample per modality, captured as one presence event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FourLayerSignature {
    pub face: FaceSample,
    pub finger: FingerSample,
    pub heart: HeartSample,
    pub voice: VoiceSample,
    /// Aggregate capture timestamp assigned by the capture collaborator.
    pub captured_at_ms: i64,
}

impl FourLayerSignature {
    pub fn layers(&self) -> [&dyn BiometricLayer; 4] {
        [&self.face, &self.finger, &self.heart, &self.voice]
    }

    pub fn capture_timestamps(&self) -> [(Modality, i64); 4] {
        self.layers().map(|l| (l.modality(), l.captured_at_ms()))
    }

    /// Arithmetic mean of the four layer confidences.
    pub fn mean_confidence(&self) -> f64 {
        let sum: f64 = self.layers().iter().map(|l| l.confidence()).sum();
        sum / 4.0
    }

    pub fn from_json(raw: &str) -> Result<Self, crate::PresenceError> {
        serde_json::from_str(raw).map_err(|e| crate::PresenceError::MalformedSignature(e.to_string()))
    }
}

/// Cryptographic pairing of two hardware identities. Never mutated after it
/// is established; rebinding produces a new record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceBindingRecord {
    pub identity_a: String,
    pub identity_b: String,
    pub binding_hash: String,
    pub bound_at_ms: i64,
    pub signature: String,
}

/// Single-use, time-bounded proof that a live human authorized an action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationToken {
    pub subject: String,
    pub content_hash: String,
    pub device_binding_hash: String,
    pub issued_at: i64,
    pub nonce: String,
    pub confidence: f64,
    pub signature: String,
}

impl AuthorizationToken {
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.issued_at)
    }
}
