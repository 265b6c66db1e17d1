use presence_auth::keys::generate_signing_key;
use presence_auth::{establish_binding, InMemoryReplayStore, PresenceService};
use presence_core::*;
use presence_metrics::PresenceMetrics;
use process_guardian::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const NOW: i64 = 1_700_000_000_000;
const PRIMARY: &str = "hw:phone:7f3a";
const SECONDARY: &str = "hw:watch:c210";

#[derive(Default)]
struct RecordingLocker(AtomicUsize);

impl DeviceLocker for RecordingLocker {
    fn lock_session(&self) -> Result<(), LockError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Host {
    guardian: Arc<ProcessGuardian>,
    service: Arc<PresenceService>,
    stasis: Arc<StasisCell>,
    locker: Arc<RecordingLocker>,
    audit: Arc<MemoryAuditLog>,
    metrics: Arc<PresenceMetrics>,
    clock: Arc<ManualClock>,
    binding: DeviceBindingRecord,
}

fn host() -> Host {
    let mut config = PresenceConfig::default();
    config.devices.expected_primary = PRIMARY.into();
    config.devices.expected_secondary = SECONDARY.into();

    let clock = Arc::new(ManualClock::new(NOW));
    let metrics = Arc::new(PresenceMetrics::new().unwrap());
    let stasis = Arc::new(StasisCell::default());
    let service = Arc::new(
        PresenceService::new(
            &config,
            generate_signing_key(),
            Arc::new(InMemoryReplayStore::new()),
            clock.clone(),
        )
        .unwrap()
        .with_lock_state(stasis.clone())
        .with_metrics(metrics.clone()),
    );
    let locker = Arc::new(RecordingLocker::default());
    let audit = Arc::new(MemoryAuditLog::new());
    let guardian = Arc::new(
        ProcessGuardian::new(
            config.guardian.clone(),
            config.devices.clone(),
            service.clone(),
            stasis.clone(),
            locker.clone(),
            audit.clone(),
        )
        .with_metrics(metrics.clone()),
    );
    let binding = establish_binding(PRIMARY, SECONDARY, NOW - 86_400_000, &generate_signing_key());
    Host {
        guardian,
        service,
        stasis,
        locker,
        audit,
        metrics,
        clock,
        binding,
    }
}

fn live_signature(now: i64) -> FourLayerSignature {
    let base = now - 700;
    FourLayerSignature {
        face: FaceSample {
            geometry: vec![
                FacePoint {
                    x: 0.12,
                    y: 0.48,
                    z: 0.02
                };
                127
            ],
            blood_flow: BloodFlowSignal {
                detected: true,
                confidence: 0.96,
            },
            confidence: 0.95,
            is_live_human: true,
            captured_at_ms: base,
        },
        finger: FingerSample {
            template_digest: "0x9e11".into(),
            liveness_detected: true,
            confidence: 0.93,
            captured_at_ms: base + 150,
        },
        heart: HeartSample {
            bpm: 72.0,
            hrv_ms: 52.0,
            confidence: 0.92,
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

impl Host {
    fn token(&self) -> AuthorizationToken {
        self.service
            .validate_presence(
                "0xOPERATOR",
                &live_signature(self.clock.now_ms()),
                &self.binding,
                PRIMARY,
                SECONDARY,
            )
            .unwrap()
    }
}

#[test]
fn authorized_signal_grants_shutdown() {
    let h = host();
    let token = h.token();
    assert_eq!(
        h.guardian.authorize_shutdown(SignalKind::Terminate, Some(&token)),
        ShutdownDecision::Granted
    );
    assert_eq!(h.guardian.phase(), GuardianPhase::ShuttingDown);
    assert_eq!(h.locker.0.load(Ordering::SeqCst), 0);
    assert!(h.audit.records().is_empty());
    assert!(h.guardian.events()[0].authorized);
}

#[test]
fn replayed_shutdown_token_is_unauthorized() {
    let h = host();
    let token = h.token();
    h.service.consume_token(&token).unwrap();
    let decision = h.guardian.authorize_shutdown(SignalKind::Terminate, Some(&token));
    assert!(matches!(
        decision,
        ShutdownDecision::Denied(PresenceError::UnauthorizedTermination(ref reason)) if reason.contains("already")
    ));
    assert_eq!(h.stasis.snapshot().unauthorized_attempts, 1);
}

#[test]
fn expired_shutdown_token_is_unauthorized() {
    let h = host();
    let token = h.token();
    h.clock.advance(60_001);
    assert!(!h
        .guardian
        .authorize_shutdown(SignalKind::Interrupt, Some(&token))
        .is_granted());
    assert_eq!(h.guardian.phase(), GuardianPhase::Normal);
}

#[test]
fn three_unauthorized_attempts_enter_stasis_and_fourth_has_no_effect() {
    let h = host();
    for signal in [SignalKind::Terminate, SignalKind::Interrupt, SignalKind::Hangup] {
        assert!(!h.guardian.authorize_shutdown(signal, None).is_granted());
    }
    assert_eq!(h.guardian.phase(), GuardianPhase::Stasis);
    assert!(h.service.is_locked());
    assert_eq!(h.locker.0.load(Ordering::SeqCst), 3);
    assert_eq!(h.metrics.unauthorized_terminations.get(), 3);
    assert_eq!(h.metrics.stasis_active.get(), 1);

    let token = h.token();
    assert_eq!(
        h.guardian.authorize_shutdown(SignalKind::Terminate, Some(&token)),
        ShutdownDecision::Denied(PresenceError::StasisActive)
    );
    assert_eq!(h.guardian.phase(), GuardianPhase::Stasis);
    assert_eq!(h.stasis.snapshot().unauthorized_attempts, 3);
    assert!(!h
        .service
        .replay_guard()
        .store()
        .contains(&token.nonce)
        .unwrap());
    assert_eq!(h.service.consume_token(&token), Err(PresenceError::StasisActive));

    let kinds: Vec<_> = h.audit.records().iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TriggerKind::UnauthorizedTermination,
            TriggerKind::UnauthorizedTermination,
            TriggerKind::UnauthorizedTermination,
            TriggerKind::RefusedDuringStasis,
        ]
    );
}

#[test]
fn full_revalidation_restores_normal_operation() {
    let h = host();
    for _ in 0..3 {
        h.guardian.authorize_shutdown(SignalKind::Terminate, None);
    }
    assert_eq!(h.guardian.phase(), GuardianPhase::Stasis);

    let mut desynced = live_signature(NOW);
    desynced.voice.captured_at_ms += 2_000;
    assert!(matches!(
        h.guardian.restore(&desynced, &h.binding),
        Err(PresenceError::DesynchronizedCapture { .. })
    ));
    assert_eq!(h.guardian.phase(), GuardianPhase::Stasis);

    h.guardian.restore(&live_signature(NOW), &h.binding).unwrap();
    assert_eq!(h.guardian.phase(), GuardianPhase::Normal);
    assert_eq!(h.stasis.snapshot(), StasisState::default());
    assert_eq!(h.metrics.stasis_active.get(), 0);
    assert_eq!(h.audit.records().last().unwrap().kind, TriggerKind::Restored);

    let token = h.token();
    assert!(h
        .guardian
        .authorize_shutdown(SignalKind::Terminate, Some(&token))
        .is_granted());
}

#[test]
fn restore_with_foreign_device_pair_stays_locked() {
    let h = host();
    for _ in 0..3 {
        h.guardian.authorize_shutdown(SignalKind::Terminate, None);
    }
    let foreign = establish_binding(PRIMARY, "hw:watch:ffff", NOW, &generate_signing_key());
    assert!(matches!(
        h.guardian.restore(&live_signature(NOW), &foreign),
        Err(PresenceError::DeviceBindingMismatch(_))
    ));
    assert!(h.stasis.snapshot().locked);
}

#[test]
fn unclean_prior_run_forces_initial_stasis() {
    let dir = tempfile::tempdir().unwrap();
    let file = HeartbeatFile::new(dir.path().join("heartbeat.json"));
    file.write(&HeartbeatRecord {
        pid: 991,
        sequence: 14,
        beat_at_ms: NOW - 5_000,
        clean_shutdown: false,
    })
    .unwrap();

    let h = host();
    h.guardian.apply_prior_run(&file.assess());
    assert_eq!(h.guardian.phase(), GuardianPhase::Stasis);
    assert!(h.service.is_locked());
    assert_eq!(h.locker.0.load(Ordering::SeqCst), 1);
    let audit = h.audit.records();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].kind, TriggerKind::UncleanRestart);
    assert!(audit[0].reason.contains("pid 991"));
}

#[test]
fn clean_prior_run_leaves_guardian_normal() {
    let h = host();
    h.guardian.apply_prior_run(&PriorRun::FirstStart);
    h.guardian.apply_prior_run(&PriorRun::CleanShutdown(HeartbeatRecord {
        pid: 7,
        sequence: 3,
        beat_at_ms: NOW,
        clean_shutdown: true,
    }));
    assert_eq!(h.guardian.phase(), GuardianPhase::Normal);
    assert!(h.audit.records().is_empty());
}

#[tokio::test]
async fn supervisor_returns_only_on_granted_signal() {
    let h = host();
    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("shutdown.json");
    let source = Arc::new(FileTokenSource::new(&token_path));
    let sources = SignalSources::new(source.clone(), Duration::from_secs(2));

    let (tx, rx) = mpsc::channel(4);
    tx.send(SignalKind::Interrupt).await.unwrap();
    source.deposit(&h.token()).unwrap();

    let granted = supervise_channel(h.guardian.clone(), sources, rx).await;
    assert_eq!(granted, Some(SignalKind::Interrupt));
    assert!(!token_path.exists());
    assert_eq!(h.guardian.phase(), GuardianPhase::ShuttingDown);
}

#[tokio::test]
async fn supervisor_counts_tokenless_signals() {
    let h = host();
    let dir = tempfile::tempdir().unwrap();
    let sources = SignalSources::new(
        Arc::new(FileTokenSource::new(dir.path().join("absent.json"))),
        Duration::from_secs(2),
    );

    let (tx, rx) = mpsc::channel(4);
    for _ in 0..3 {
        tx.send(SignalKind::Terminate).await.unwrap();
    }
    drop(tx);

    let granted = supervise_channel(h.guardian.clone(), sources, rx).await;
    assert_eq!(granted, None);
    assert_eq!(h.guardian.phase(), GuardianPhase::Stasis);
    assert_eq!(h.guardian.events().len(), 3);
}

#[tokio::test]
async fn restore_request_clears_stasis_from_unclean_prior_run() {
    let dir = tempfile::tempdir().unwrap();
    let heartbeat = HeartbeatFile::new(dir.path().join("heartbeat.json"));
    heartbeat
        .write(&HeartbeatRecord {
            pid: 512,
            sequence: 40,
            beat_at_ms: NOW - 9_000,
            clean_shutdown: false,
        })
        .unwrap();

    let h = host();
    h.guardian.apply_prior_run(&heartbeat.assess());
    assert_eq!(h.guardian.phase(), GuardianPhase::Stasis);

    let tokens = Arc::new(FileTokenSource::new(dir.path().join("shutdown.json")));
    let restore = Arc::new(FileRestoreSource::new(dir.path().join("restore.json")));
    let sources =
        SignalSources::new(tokens.clone(), Duration::from_secs(2)).with_restore(restore.clone());

    // Issuance stays open during stasis.
    tokens.deposit(&h.token()).unwrap();
    restore
        .deposit(&RestoreRequest {
            signature: live_signature(NOW),
            binding: h.binding.clone(),
        })
        .unwrap();

    let (tx, rx) = mpsc::channel(4);
    tx.send(SignalKind::Terminate).await.unwrap();
    drop(tx);

    let granted = supervise_channel(h.guardian.clone(), sources, rx).await;
    assert_eq!(granted, Some(SignalKind::Terminate));
    assert_eq!(h.guardian.phase(), GuardianPhase::ShuttingDown);
    assert!(!restore.path().exists());
    assert!(!tokens.path().exists());
    assert!(!h.service.is_locked());

    let kinds: Vec<_> = h.audit.records().iter().map(|r| r.kind).collect();
    assert_eq!(kinds, vec![TriggerKind::UncleanRestart, TriggerKind::Restored]);
}

#[tokio::test]
async fn rejected_restore_request_keeps_stasis() {
    let dir = tempfile::tempdir().unwrap();
    let h = host();
    h.guardian.apply_prior_run(&PriorRun::Unreadable("truncated".into()));

    let tokens = Arc::new(FileTokenSource::new(dir.path().join("shutdown.json")));
    let restore = Arc::new(FileRestoreSource::new(dir.path().join("restore.json")));
    let sources =
        SignalSources::new(tokens.clone(), Duration::from_secs(2)).with_restore(restore.clone());

    let foreign = establish_binding(PRIMARY, "hw:watch:ffff", NOW, &generate_signing_key());
    restore
        .deposit(&RestoreRequest {
            signature: live_signature(NOW),
            binding: foreign,
        })
        .unwrap();
    let token = h.token();
    tokens.deposit(&token).unwrap();

    let decision = handle_incoming(&h.guardian, &sources, SignalKind::Hangup).await;
    assert_eq!(decision, ShutdownDecision::Denied(PresenceError::StasisActive));
    assert_eq!(h.guardian.phase(), GuardianPhase::Stasis);
    assert!(!restore.path().exists());
    assert!(!h
        .service
        .replay_guard()
        .store()
        .contains(&token.nonce)
        .unwrap());
}
