use crate::{LayerValidator, SignatureValidator, TemporalSynchronizer};
use presence_core::*;
use rand::Rng;

const NOW: i64 = 1_700_000_001_000;

fn valid_signature() -> FourLayerSignature {
    let base = NOW - 800;
    FourLayerSignature {
        face: FaceSample {
            geometry: (0..127)
                .map(|i| FacePoint {
                    x: (i % 16) as f64,
                    y: (i / 16) as f64,
                    z: 0.2,
                })
                .collect(),
            blood_flow: BloodFlowSignal {
                detected: true,
                confidence: 0.94,
            },
            confidence: 0.95,
            is_live_human: true,
            captured_at_ms: base,
        },
        finger: FingerSample {
            template_digest: "0x9a1c".into(),
            liveness_detected: true,
            confidence: 0.92,
            captured_at_ms: base + 150,
        },
        heart: HeartSample {
            bpm: 72.0,
            hrv_ms: 38.5,
            confidence: 0.93,
            captured_at_ms: base + 400,
        },
        voice: VoiceSample {
            live_conduction: true,
            fundamental_hz: 240.0,
            is_live_voice: true,
            confidence: 0.97,
            captured_at_ms: base + 600,
        },
        captured_at_ms: base + 600,
    }
}

fn validator() -> SignatureValidator {
    SignatureValidator::new(ThresholdConfig::default(), &TokenConfig::default())
}

fn layer_reason(err: PresenceError) -> (Modality, String) {
    match err {
        PresenceError::LayerValidationFailed { modality, reason } => (modality, reason),
        other => panic!("expected layer failure, got {other:?}"),
    }
}

#[test]
fn valid_signature_passes_with_mean_confidence() {
    let out = validator().validate(&valid_signature(), NOW).unwrap();
    assert_eq!(out.spread_ms, 600);
    assert!((out.mean_confidence - (0.95 + 0.92 + 0.93 + 0.97) / 4.0).abs() < 1e-12);
}

#[test]
fn desync_wins_over_every_layer_failure() {
    let mut sig = valid_signature();
    sig.voice.captured_at_ms = sig.face.captured_at_ms + 1501;
    sig.heart.bpm = 10.0;
    sig.voice.fundamental_hz = 9000.0;
    sig.face.is_live_human = false;
    let err = validator().validate(&sig, NOW + 1000).unwrap_err();
    assert!(matches!(
        err,
        PresenceError::DesynchronizedCapture {
            spread_ms: 1501,
            window_ms: 1500
        }
    ));
}

#[test]
fn spread_exactly_at_window_is_cohesive() {
    let mut sig = valid_signature();
    sig.voice.captured_at_ms = sig.face.captured_at_ms + 1500;
    assert_eq!(TemporalSynchronizer::new(1500).check(&sig).unwrap(), 1500);
}

#[test]
fn random_desynchronized_captures_always_rejected() {
    let mut rng = rand::thread_rng();
    let sync = TemporalSynchronizer::new(1500);
    for _ in 0..200 {
        let mut sig = valid_signature();
        let base = sig.face.captured_at_ms;
        sig.finger.captured_at_ms = base + rng.gen_range(0..1500);
        sig.heart.captured_at_ms = base + rng.gen_range(1501..10_000);
        assert!(matches!(
            sync.check(&sig),
            Err(PresenceError::DesynchronizedCapture { .. })
        ));
    }
}

#[test]
fn heart_rate_outside_band_fails_even_at_full_confidence() {
    let layers = LayerValidator::default();
    let mut rng = rand::thread_rng();
    for _ in 0..200 {
        let mut heart = valid_signature().heart;
        heart.confidence = 1.0;
        heart.bpm = if rng.gen_bool(0.5) {
            rng.gen_range(0.0..39.99)
        } else {
            rng.gen_range(140.01..400.0)
        };
        let (modality, reason) = layer_reason(layers.validate_heart(&heart).unwrap_err());
        assert_eq!(modality, Modality::Heart);
        assert_eq!(reason, "bpm out of range");
    }
}

#[test]
fn heart_band_edges_are_inclusive() {
    let layers = LayerValidator::default();
    let mut heart = valid_signature().heart;
    heart.bpm = 40.0;
    assert!(layers.validate_heart(&heart).is_ok());
    heart.bpm = 140.0;
    assert!(layers.validate_heart(&heart).is_ok());
}

#[test]
fn flat_hrv_reads_as_replay() {
    let layers = LayerValidator::default();
    for hrv in [0.0, -3.0, f64::NAN] {
        let mut heart = valid_signature().heart;
        heart.hrv_ms = hrv;
        let (_, reason) = layer_reason(layers.validate_heart(&heart).unwrap_err());
        assert_eq!(reason, "non-positive heart rate variability");
    }
}

#[test]
fn voice_frequency_out_of_range() {
    let mut sig = valid_signature();
    sig.voice.fundamental_hz = 5000.0;
    let (modality, reason) = layer_reason(validator().validate(&sig, NOW).unwrap_err());
    assert_eq!(modality, Modality::Voice);
    assert_eq!(reason, "frequency out of range");
}

#[test]
fn voice_requires_higher_confidence_than_other_layers() {
    let layers = LayerValidator::default();
    let mut voice = valid_signature().voice;
    voice.confidence = 0.94;
    let (_, reason) = layer_reason(layers.validate_voice(&voice).unwrap_err());
    assert_eq!(reason, "confidence below threshold");
}

#[test]
fn face_geometry_must_have_exact_point_count() {
    let layers = LayerValidator::default();
    let mut face = valid_signature().face;
    face.geometry.pop();
    let (_, reason) = layer_reason(layers.validate_face(&face).unwrap_err());
    assert_eq!(reason, "geometry map has 126 points, expected 127");
}

#[test]
fn face_without_blood_flow_fails() {
    let layers = LayerValidator::default();
    let mut face = valid_signature().face;
    face.blood_flow.detected = false;
    assert!(layers.validate_face(&face).is_err());

    let mut face = valid_signature().face;
    face.blood_flow.confidence = 0.89;
    let (_, reason) = layer_reason(layers.validate_face(&face).unwrap_err());
    assert_eq!(reason, "blood flow confidence below threshold");
}

#[test]
fn finger_without_liveness_fails() {
    let layers = LayerValidator::default();
    let mut finger = valid_signature().finger;
    finger.liveness_detected = false;
    let (modality, reason) = layer_reason(layers.validate_finger(&finger).unwrap_err());
    assert_eq!(modality, Modality::Finger);
    assert_eq!(reason, "liveness not detected");
}

#[test]
fn confidence_outside_unit_interval_is_rejected() {
    let layers = LayerValidator::default();
    let mut finger = valid_signature().finger;
    finger.confidence = 1.5;
    let (_, reason) = layer_reason(layers.validate_finger(&finger).unwrap_err());
    assert_eq!(reason, "confidence out of range");
}

#[test]
fn stale_capture_is_rejected() {
    let sig = valid_signature();
    let err = validator().validate(&sig, NOW + 60_000).unwrap_err();
    assert!(matches!(err, PresenceError::StaleCapture { .. }));
}

#[test]
fn capture_from_the_future_is_malformed() {
    let sig = valid_signature();
    let err = validator().validate(&sig, NOW - 10_000).unwrap_err();
    assert_eq!(err.kind(), "malformed_signature");
}

fn captured_at(sig: &mut FourLayerSignature, ts: [i64; 4]) {
    sig.face.captured_at_ms = ts[0];
    sig.finger.captured_at_ms = ts[1];
    sig.heart.captured_at_ms = ts[2];
    sig.voice.captured_at_ms = ts[3];
    sig.captured_at_ms = ts[3];
}

#[test]
fn extreme_capture_timestamps_are_rejected_without_overflow() {
    let mut ancient = valid_signature();
    captured_at(&mut ancient, [i64::MIN + 10, i64::MIN + 11, i64::MIN + 12, i64::MIN + 13]);
    assert!(matches!(
        validator().validate(&ancient, NOW),
        Err(PresenceError::StaleCapture { age_ms: i64::MAX, .. })
    ));

    let mut distant = valid_signature();
    captured_at(&mut distant, [i64::MAX - 13, i64::MAX - 12, i64::MAX - 11, i64::MAX - 10]);
    assert_eq!(
        validator().validate(&distant, -NOW).unwrap_err().kind(),
        "malformed_signature"
    );
}
