use crate::signals::SignalKind;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode audit record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("audit log {path} line {line}: {reason}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    UnauthorizedTermination,
    UncleanRestart,
    RefusedDuringStasis,
    Restored,
}

/// One audit entry per lockdown, refusal or restoration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StasisTrigger {
    pub id: Uuid,
    pub at_ms: i64,
    pub kind: TriggerKind,
    pub signal: Option<SignalKind>,
    pub reason: String,
    pub unauthorized_attempts: u32,
    pub locked: bool,
}

impl StasisTrigger {
    pub fn new(
        at_ms: i64,
        kind: TriggerKind,
        signal: Option<SignalKind>,
        reason: impl Into<String>,
        unauthorized_attempts: u32,
        locked: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            at_ms,
            kind,
            signal,
            reason: reason.into(),
            unauthorized_attempts,
            locked,
        }
    }
}

pub trait AuditLog: Send + Sync {
    fn record(&self, trigger: &StasisTrigger) -> Result<(), AuditError>;
}

/// Append-only JSON-lines audit trail.
pub struct JsonlAuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every record back; a missing file is an empty trail.
    pub fn read_all(path: &Path) -> Result<Vec<StasisTrigger>, AuditError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(AuditError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        raw.lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .map(|(i, l)| {
                serde_json::from_str(l).map_err(|e| AuditError::Corrupt {
                    path: path.to_path_buf(),
                    line: i + 1,
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

impl AuditLog for JsonlAuditLog {
    fn record(&self, trigger: &StasisTrigger) -> Result<(), AuditError> {
        let mut line = serde_json::to_string(trigger)?;
        line.push('\n');

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let io_err = |source: std::io::Error| AuditError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        file.write_all(line.as_bytes()).map_err(io_err)?;
        file.sync_data().map_err(io_err)
    }
}

/// In-process audit trail, for tests and embedders that forward records elsewhere.
#[derive(Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<StasisTrigger>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<StasisTrigger> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditLog for MemoryAuditLog {
    fn record(&self, trigger: &StasisTrigger) -> Result<(), AuditError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(trigger.clone());
        Ok(())
    }
}
