use crate::drop_file::write_atomic;
use log::{debug, error, warn};
use presence_core::Clock;
use presence_metrics::PresenceMetrics;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error("heartbeat file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("heartbeat file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode heartbeat: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub pid: u32,
    pub sequence: u64,
    pub beat_at_ms: i64,
    pub clean_shutdown: bool,
}

/// What the heartbeat left by the previous process says about how it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriorRun {
    FirstStart,
    CleanShutdown(HeartbeatRecord),
    UncleanTermination(HeartbeatRecord),
    Unreadable(String),
}

impl PriorRun {
    /// Unreadable counts as unclean: a tampered heartbeat must not unlock.
    pub fn is_unclean(&self) -> bool {
        matches!(self, PriorRun::UncleanTermination(_) | PriorRun::Unreadable(_))
    }

    pub fn describe(&self) -> String {
        match self {
            PriorRun::FirstStart => "no previous heartbeat".to_string(),
            PriorRun::CleanShutdown(r) => format!("pid {} shut down cleanly", r.pid),
            PriorRun::UncleanTermination(r) => format!(
                "pid {} stopped without clean shutdown (last beat {} at {})",
                r.pid, r.sequence, r.beat_at_ms
            ),
            PriorRun::Unreadable(e) => format!("previous heartbeat unreadable: {e}"),
        }
    }
}

pub struct HeartbeatFile {
    path: PathBuf,
}

impl HeartbeatFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> HeartbeatError {
        HeartbeatError::Io {
            path: self.path.clone(),
            source,
        }
    }

    pub fn read(&self) -> Result<Option<HeartbeatRecord>, HeartbeatError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| HeartbeatError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    /// A reader never sees a partial record.
    pub fn write(&self, record: &HeartbeatRecord) -> Result<(), HeartbeatError> {
        let body = serde_json::to_vec(record)?;
        write_atomic(&self.path, &body).map_err(|e| self.io_err(e))
    }

    pub fn assess(&self) -> PriorRun {
        match self.read() {
            Ok(None) => PriorRun::FirstStart,
            Ok(Some(r)) if r.clean_shutdown => PriorRun::CleanShutdown(r),
            Ok(Some(r)) => PriorRun::UncleanTermination(r),
            Err(e) => PriorRun::Unreadable(e.to_string()),
        }
    }
}

/// Periodic liveness record. A heartbeat without `clean_shutdown` found at
/// the next start means the process was killed without authorization.
pub struct Watchdog {
    file: HeartbeatFile,
    clock: Arc<dyn Clock>,
    pid: u32,
    sequence: AtomicU64,
    metrics: Option<Arc<PresenceMetrics>>,
    metrics_export: Option<PathBuf>,
}

impl Watchdog {
    pub fn new(file: HeartbeatFile, clock: Arc<dyn Clock>) -> Self {
        Self {
            file,
            clock,
            pid: std::process::id(),
            sequence: AtomicU64::new(0),
            metrics: None,
            metrics_export: None,
        }
    }

    /// Updates the heartbeat gauge on every beat and, when `export` is set,
    /// writes the Prometheus text exposition there on every tick.
    pub fn with_metrics(mut self, metrics: Arc<PresenceMetrics>, export: Option<PathBuf>) -> Self {
        self.metrics = Some(metrics);
        self.metrics_export = export;
        self
    }

    pub fn file(&self) -> &HeartbeatFile {
        &self.file
    }

    pub fn beat(&self, clean_shutdown: bool) -> Result<HeartbeatRecord, HeartbeatError> {
        let record = HeartbeatRecord {
            pid: self.pid,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            beat_at_ms: self.clock.now_ms(),
            clean_shutdown,
        };
        self.file.write(&record)?;
        if let Some(m) = &self.metrics {
            m.observe_heartbeat(record.beat_at_ms);
        }
        debug!("[WATCHDOG] beat {} at {}", record.sequence, record.beat_at_ms);
        Ok(record)
    }

    fn export_metrics(&self) {
        let (Some(metrics), Some(path)) = (&self.metrics, &self.metrics_export) else {
            return;
        };
        match metrics.render() {
            Ok(text) => {
                if let Err(e) = fs::write(path, text) {
                    warn!("[WATCHDOG] metrics export to {} failed: {}", path.display(), e);
                }
            }
            Err(e) => warn!("[WATCHDOG] metrics render failed: {}", e),
        }
    }

    /// Beats every `interval` until `shutdown` flips to true or its sender
    /// is dropped. The final clean beat is the caller's job.
    pub fn spawn(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let watchdog = self.clone();
                        let outcome = tokio::task::spawn_blocking(move || {
                            let beat = watchdog.beat(false);
                            watchdog.export_metrics();
                            beat
                        })
                        .await;
                        match outcome {
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => error!("[WATCHDOG] heartbeat write failed: {}", e),
                            Err(e) => error!("[WATCHDOG] heartbeat task failed: {}", e),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("[WATCHDOG] stopped");
        })
    }
}
