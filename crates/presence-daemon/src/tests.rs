use crate::{cli, commands};
use presence_auth::establish_binding;
use presence_auth::keys::{generate_signing_key, load_signing_key, verifying_key_hex};
use presence_core::*;
use process_guardian::{FileRestoreSource, RestoreSource};
use std::fs;
use std::path::Path;

#[test]
fn cli_definition_is_consistent() {
    cli::build().debug_assert();
}

#[test]
fn authorize_arguments_parse() {
    let m = cli::build()
        .try_get_matches_from([
            "presenced",
            "authorize",
            "--config",
            "p.json",
            "--subject",
            "0xCITIZEN",
            "--signature",
            "sig.json",
            "--binding",
            "bind.json",
        ])
        .unwrap();
    let (name, sub) = m.subcommand().unwrap();
    assert_eq!(name, "authorize");
    assert_eq!(sub.get_one::<String>("subject").unwrap(), "0xCITIZEN");
    assert!(sub.get_one::<String>("out").is_none());
}

#[test]
fn run_requires_config() {
    assert!(cli::build().try_get_matches_from(["presenced", "run"]).is_err());
}

#[test]
fn keygen_refuses_to_overwrite_without_force() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("authority.key");
    let public = commands::keygen(&out, false).unwrap();
    let key = load_signing_key(&out).unwrap();
    assert_eq!(public, verifying_key_hex(&key.verifying_key()));

    assert!(commands::keygen(&out, false).is_err());
    assert_ne!(commands::keygen(&out, true).unwrap(), public);
}

fn write_config(dir: &Path, key_path: &Path) -> std::path::PathBuf {
    let mut config = PresenceConfig::default();
    config.devices.expected_primary = "phone-01".into();
    config.devices.expected_secondary = "watch-02".into();
    config.keys.signing_key_path = key_path.to_path_buf();
    config.guardian.shutdown_token_path = dir.join("shutdown.json");
    config.guardian.restore_request_path = dir.join("restore.json");
    let path = dir.join("presence.json");
    fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    path
}

#[test]
fn check_config_rejects_missing_devices() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("presence.json");
    fs::write(&path, "{}").unwrap();
    assert!(commands::check_config(&path).is_err());

    let good = write_config(dir.path(), &dir.path().join("k"));
    assert_eq!(
        commands::check_config(&good).unwrap().guardian.unauthorized_threshold,
        3
    );
}

fn live_signature(now: i64) -> FourLayerSignature {
    let base = now - 700;
    FourLayerSignature {
        face: FaceSample {
            geometry: vec![FacePoint { x: 0.3, y: 0.3, z: 0.1 }; 127],
            blood_flow: BloodFlowSignal {
                detected: true,
                confidence: 0.95,
            },
            confidence: 0.95,
            is_live_human: true,
            captured_at_ms: base,
        },
        finger: FingerSample {
            template_digest: "0xfeed".into(),
            liveness_detected: true,
            confidence: 0.95,
            captured_at_ms: base + 100,
        },
        heart: HeartSample {
            bpm: 72.0,
            hrv_ms: 40.0,
            confidence: 0.95,
            captured_at_ms: base + 300,
        },
        voice: VoiceSample {
            live_conduction: true,
            fundamental_hz: 220.0,
            is_live_voice: true,
            confidence: 0.97,
            captured_at_ms: base + 600,
        },
        captured_at_ms: base + 600,
    }
}

#[test]
fn authorize_writes_token_to_shutdown_path() {
    let dir = tempfile::tempdir().unwrap();
    let key_path = dir.path().join("authority.key");
    commands::keygen(&key_path, false).unwrap();
    let config_path = write_config(dir.path(), &key_path);

    let now = SystemClock.now_ms();
    let signature = live_signature(now);
    let binding = establish_binding("phone-01", "watch-02", now - 60_000, &generate_signing_key());
    let sig_path = dir.path().join("sig.json");
    let binding_path = dir.path().join("binding.json");
    fs::write(&sig_path, serde_json::to_string(&signature).unwrap()).unwrap();
    fs::write(&binding_path, serde_json::to_string(&binding).unwrap()).unwrap();

    let (dest, token) =
        commands::authorize(&config_path, "0xCITIZEN", &sig_path, &binding_path, None).unwrap();
    assert_eq!(dest, dir.path().join("shutdown.json"));
    assert!(!dir.path().join("shutdown.json.tmp").exists());
    let on_disk: AuthorizationToken =
        serde_json::from_str(&fs::read_to_string(&dest).unwrap()).unwrap();
    assert_eq!(on_disk, token);
    assert_eq!(on_disk.device_binding_hash, binding.binding_hash);

    let mut forged = signature;
    forged.voice.fundamental_hz = 5_000.0;
    fs::write(&sig_path, serde_json::to_string(&forged).unwrap()).unwrap();
    assert!(commands::authorize(&config_path, "0xCITIZEN", &sig_path, &binding_path, None).is_err());
}

#[test]
fn restore_arguments_parse() {
    let m = cli::build()
        .try_get_matches_from([
            "presenced",
            "restore",
            "--config",
            "p.json",
            "--signature",
            "sig.json",
            "--binding",
            "bind.json",
        ])
        .unwrap();
    let (name, sub) = m.subcommand().unwrap();
    assert_eq!(name, "restore");
    assert_eq!(sub.get_one::<String>("binding").unwrap(), "bind.json");
    assert!(cli::build()
        .try_get_matches_from(["presenced", "restore", "--config", "p.json"])
        .is_err());
}

#[test]
fn restore_queues_request_for_the_guardian() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(dir.path(), &dir.path().join("authority.key"));

    let now = SystemClock.now_ms();
    let signature = live_signature(now);
    let binding = establish_binding("phone-01", "watch-02", now - 60_000, &generate_signing_key());
    let sig_path = dir.path().join("sig.json");
    let binding_path = dir.path().join("binding.json");
    fs::write(&sig_path, serde_json::to_string(&signature).unwrap()).unwrap();
    fs::write(&binding_path, serde_json::to_string(&binding).unwrap()).unwrap();

    let dest = commands::restore(&config_path, &sig_path, &binding_path).unwrap();
    assert_eq!(dest, dir.path().join("restore.json"));
    assert!(!dir.path().join("restore.json.tmp").exists());

    let request = FileRestoreSource::new(&dest).fetch().unwrap().unwrap();
    assert_eq!(request.signature, signature);
    assert_eq!(request.binding, binding);
    assert!(!dest.exists());

    fs::write(&binding_path, "{").unwrap();
    assert!(commands::restore(&config_path, &sig_path, &binding_path).is_err());
}
