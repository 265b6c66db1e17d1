//! Consumed-nonce storage. The set only grows for the lifetime of a store.

use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("replay store lock poisoned")]
    Poisoned,
    #[error("replay log io: {0}")]
    Io(#[from] std::io::Error),
    #[error("replay log {path} line {line} is corrupt: {reason}")]
    Corrupt {
        path: String,
        line: usize,
        reason: String,
    },
}

pub trait ReplayStore: Send + Sync {
    /// Records `nonce` if it has not been seen. Returns `true` only for the
    /// first caller; the check and the insert happen under one lock.
    fn insert_if_absent(&self, nonce: &str) -> Result<bool, StoreError>;

    fn contains(&self, nonce: &str) -> Result<bool, StoreError>;

    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryReplayStore {
    inner: Mutex<HashSet<String>>,
}

impl InMemoryReplayStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReplayStore for InMemoryReplayStore {
    fn insert_if_absent(&self, nonce: &str) -> Result<bool, StoreError> {
        let mut set = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(set.insert(nonce.to_string()))
    }

    fn contains(&self, nonce: &str) -> Result<bool, StoreError> {
        let set = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(set.contains(nonce))
    }

    fn len(&self) -> Result<usize, StoreError> {
        let set = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(set.len())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ReplayEntry {
    nonce: String,
}

struct FileState {
    seen: HashSet<String>,
    log: File,
}

/// Replay set persisted as a JSON-lines log so consumed nonces survive a
/// restart. A nonce is only marked seen after its log line is written.
pub struct FileReplayStore {
    path: PathBuf,
    state: Mutex<FileState>,
}

impl FileReplayStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut seen = HashSet::new();
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            for (idx, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let entry: ReplayEntry =
                    serde_json::from_str(&line).map_err(|e| StoreError::Corrupt {
                        path: path.display().to_string(),
                        line: idx + 1,
                        reason: e.to_string(),
                    })?;
                seen.insert(entry.nonce);
            }
        }
        let log = OpenOptions::new().create(true).append(true).open(path)?;
        info!(
            "[REPLAY] loaded {} consumed nonces from {}",
            seen.len(),
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(FileState { seen, log }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReplayStore for FileReplayStore {
    fn insert_if_absent(&self, nonce: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        if state.seen.contains(nonce) {
            return Ok(false);
        }
        let line = serde_json::to_string(&ReplayEntry {
            nonce: nonce.to_string(),
        })
        .map_err(|e| StoreError::Io(e.into()))?;
        writeln!(state.log, "{line}")?;
        state.log.sync_data()?;
        state.seen.insert(nonce.to_string());
        Ok(true)
    }

    fn contains(&self, nonce: &str) -> Result<bool, StoreError> {
        let state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(state.seen.contains(nonce))
    }

    fn len(&self) -> Result<usize, StoreError> {
        let state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(state.seen.len())
    }
}
