use anyhow::{bail, Context, Result};
use log::{info, warn};
use presence_auth::keys::{
    ensure_authority, generate_signing_key, load_signing_key, verifying_key_hex, write_signing_key,
};
use presence_auth::{FileReplayStore, InMemoryReplayStore, PresenceService, ReplayStore};
use presence_core::{
    AuthorizationToken, Clock, DeviceBindingRecord, FourLayerSignature, PresenceConfig, SystemClock,
};
use presence_metrics::PresenceMetrics;
use process_guardian::{
    supervise, DeviceLocker, FileRestoreSource, FileTokenSource, HeartbeatFile, JsonlAuditLog,
    LogOnlyLocker, PlatformLocker, ProcessGuardian, RestoreRequest, SignalSources, StasisCell,
    Watchdog,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Writes a fresh signing key and returns its public half as hex.
pub fn keygen(out: &Path, force: bool) -> Result<String> {
    if out.exists() && !force {
        bail!("{} already exists; pass --force to overwrite", out.display());
    }
    let key = generate_signing_key();
    write_signing_key(out, &key)?;
    Ok(verifying_key_hex(&key.verifying_key()))
}

pub fn check_config(path: &Path) -> Result<PresenceConfig> {
    PresenceConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

fn build_service(
    config: &PresenceConfig,
    store: Arc<dyn ReplayStore>,
    clock: Arc<dyn Clock>,
) -> Result<PresenceService> {
    let key_path = &config.keys.signing_key_path;
    let signing_key = load_signing_key(key_path)
        .with_context(|| format!("loading signing key {}", key_path.display()))?;
    let authority = ensure_authority(&signing_key, config.keys.authority_public_key.as_deref())?;
    info!("[DAEMON] authority key {}", verifying_key_hex(&authority));
    Ok(PresenceService::new(config, signing_key, store, clock)?)
}

fn read_presence(
    signature_path: &Path,
    binding_path: &Path,
) -> Result<(FourLayerSignature, DeviceBindingRecord)> {
    let signature = FourLayerSignature::from_json(
        &fs::read_to_string(signature_path)
            .with_context(|| format!("reading {}", signature_path.display()))?,
    )?;
    let binding: DeviceBindingRecord = serde_json::from_str(
        &fs::read_to_string(binding_path)
            .with_context(|| format!("reading {}", binding_path.display()))?,
    )
    .context("parsing device binding record")?;
    Ok((signature, binding))
}

/// Runs full presence validation and writes the issued token. Returns where
/// it was written.
pub fn authorize(
    config_path: &Path,
    subject: &str,
    signature_path: &Path,
    binding_path: &Path,
    out: Option<&Path>,
) -> Result<(PathBuf, AuthorizationToken)> {
    let config = check_config(config_path)?;
    let (signature, binding) = read_presence(signature_path, binding_path)?;

    // Issuing never touches the replay set.
    let service = build_service(&config, Arc::new(InMemoryReplayStore::new()), Arc::new(SystemClock))?;
    let token = service.validate_presence(
        subject,
        &signature,
        &binding,
        &config.devices.expected_primary,
        &config.devices.expected_secondary,
    )?;

    let dest = out
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.guardian.shutdown_token_path.clone());
    FileTokenSource::new(&dest)
        .deposit(&token)
        .with_context(|| format!("writing token to {}", dest.display()))?;
    Ok((dest, token))
}

/// Queues a restore request for the running guardian. It is validated
/// against the guardian's own clock and device pair when the next signal
/// arrives, so only parsing happens here.
pub fn restore(config_path: &Path, signature_path: &Path, binding_path: &Path) -> Result<PathBuf> {
    let config = check_config(config_path)?;
    let (signature, binding) = read_presence(signature_path, binding_path)?;
    let dest = config.guardian.restore_request_path.clone();
    FileRestoreSource::new(&dest)
        .deposit(&RestoreRequest { signature, binding })
        .with_context(|| format!("writing restore request to {}", dest.display()))?;
    Ok(dest)
}

pub async fn run(config_path: &Path, session_lock: bool) -> Result<()> {
    let config = check_config(config_path)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let metrics = Arc::new(PresenceMetrics::new()?);

    let store: Arc<dyn ReplayStore> = match &config.replay.persist_path {
        Some(path) => Arc::new(
            FileReplayStore::open(path)
                .with_context(|| format!("opening replay log {}", path.display()))?,
        ),
        None => {
            warn!("[DAEMON] replay set is in-memory; consumed nonces are forgotten on restart");
            Arc::new(InMemoryReplayStore::new())
        }
    };

    let stasis = Arc::new(StasisCell::default());
    let service = Arc::new(
        build_service(&config, store, clock.clone())?
            .with_lock_state(stasis.clone())
            .with_metrics(metrics.clone()),
    );
    let locker: Arc<dyn DeviceLocker> = if session_lock {
        Arc::new(PlatformLocker)
    } else {
        Arc::new(LogOnlyLocker)
    };
    let guardian = Arc::new(
        ProcessGuardian::new(
            config.guardian.clone(),
            config.devices.clone(),
            service,
            stasis,
            locker,
            Arc::new(JsonlAuditLog::new(config.guardian.audit_log_path.clone())),
        )
        .with_metrics(metrics.clone()),
    );

    let heartbeat = HeartbeatFile::new(config.guardian.heartbeat_path.clone());
    guardian.apply_prior_run(&heartbeat.assess());

    let watchdog = Arc::new(
        Watchdog::new(heartbeat, clock).with_metrics(metrics, config.metrics_path.clone()),
    );
    let (stop_tx, stop_rx) = watch::channel(false);
    let watchdog_task = watchdog.clone().spawn(
        Duration::from_millis(config.guardian.watchdog_interval_ms),
        stop_rx,
    );

    info!("[DAEMON] guarding pid {} ({:?})", std::process::id(), guardian.phase());
    let sources = SignalSources::new(
        Arc::new(FileTokenSource::new(config.guardian.shutdown_token_path.clone())),
        Duration::from_millis(config.guardian.token_lookup_timeout_ms),
    )
    .with_restore(Arc::new(FileRestoreSource::new(
        config.guardian.restore_request_path.clone(),
    )));
    let granted = supervise(guardian, sources).await?;

    info!("[DAEMON] {} authorized; stopping", granted);
    // A closed channel also stops the watchdog.
    let _ = stop_tx.send(true);
    watchdog_task.await.context("watchdog task")?;
    watchdog.beat(true).context("writing clean-shutdown heartbeat")?;
    Ok(())
}
