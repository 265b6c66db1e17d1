use crate::drop_file;
use crate::guardian::{GuardianPhase, ProcessGuardian, ShutdownDecision};
use log::{error, info, warn};
use presence_core::{AuthorizationToken, DeviceBindingRecord, FourLayerSignature, PresenceError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Terminate,
    Interrupt,
    Hangup,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignalKind::Terminate => "SIGTERM",
            SignalKind::Interrupt => "SIGINT",
            SignalKind::Hangup => "SIGHUP",
        })
    }
}

#[derive(Debug, Error)]
pub enum TokenSourceError {
    #[error("drop file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("drop file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("lookup timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    #[error("lookup aborted: {0}")]
    Aborted(String),
}

/// Where the guardian looks for the token that authorizes a shutdown.
pub trait ShutdownTokenSource: Send + Sync {
    fn fetch(&self) -> Result<Option<AuthorizationToken>, TokenSourceError>;
}

/// Token dropped on disk by `presenced authorize`. The file is removed once
/// read, so it is presented at most once.
pub struct FileTokenSource {
    path: PathBuf,
}

impl FileTokenSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Places `token` for the next lookup. The file appears complete or not
    /// at all.
    pub fn deposit(&self, token: &AuthorizationToken) -> Result<(), TokenSourceError> {
        drop_file::deposit(&self.path, token)
    }
}

impl ShutdownTokenSource for FileTokenSource {
    fn fetch(&self) -> Result<Option<AuthorizationToken>, TokenSourceError> {
        drop_file::take(&self.path)
    }
}

/// Fresh four-layer capture and binding offered to clear stasis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub signature: FourLayerSignature,
    pub binding: DeviceBindingRecord,
}

pub trait RestoreSource: Send + Sync {
    fn fetch(&self) -> Result<Option<RestoreRequest>, TokenSourceError>;
}

/// Restore request dropped on disk by `presenced restore`; read once.
pub struct FileRestoreSource {
    path: PathBuf,
}

impl FileRestoreSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn deposit(&self, request: &RestoreRequest) -> Result<(), TokenSourceError> {
        drop_file::deposit(&self.path, request)
    }
}

impl RestoreSource for FileRestoreSource {
    fn fetch(&self) -> Result<Option<RestoreRequest>, TokenSourceError> {
        drop_file::take(&self.path)
    }
}

/// Everything the supervisor consults when a signal arrives.
#[derive(Clone)]
pub struct SignalSources {
    pub tokens: Arc<dyn ShutdownTokenSource>,
    pub restore: Option<Arc<dyn RestoreSource>>,
    pub timeout: Duration,
}

impl SignalSources {
    pub fn new(tokens: Arc<dyn ShutdownTokenSource>, timeout: Duration) -> Self {
        Self {
            tokens,
            restore: None,
            timeout,
        }
    }

    pub fn with_restore(mut self, restore: Arc<dyn RestoreSource>) -> Self {
        self.restore = Some(restore);
        self
    }
}

async fn fetch_bounded<T, F>(fetch: F, timeout: Duration) -> Result<Option<T>, TokenSourceError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<Option<T>, TokenSourceError> + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(fetch)).await {
        Err(_) => Err(TokenSourceError::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
        Ok(Err(join)) => Err(TokenSourceError::Aborted(join.to_string())),
        Ok(Ok(result)) => result,
    }
}

/// Fetches the shutdown token off the runtime threads, bounded by `timeout`.
pub async fn lookup_token(
    source: Arc<dyn ShutdownTokenSource>,
    timeout: Duration,
) -> Result<Option<AuthorizationToken>, TokenSourceError> {
    fetch_bounded(move || source.fetch(), timeout).await
}

/// Applies a pending restore request, if any. Returns whether stasis was
/// cleared.
pub async fn apply_restore_request(
    guardian: &Arc<ProcessGuardian>,
    source: Arc<dyn RestoreSource>,
    timeout: Duration,
) -> bool {
    let request = match fetch_bounded(move || source.fetch(), timeout).await {
        Ok(Some(request)) => request,
        Ok(None) => return false,
        Err(e) => {
            warn!("[SIGNALS] restore request unreadable: {}", e);
            return false;
        }
    };
    let g = guardian.clone();
    match tokio::task::spawn_blocking(move || g.restore(&request.signature, &request.binding)).await {
        Ok(Ok(())) => {
            info!("[SIGNALS] restore request accepted");
            true
        }
        Ok(Err(e)) => {
            warn!("[SIGNALS] restore request rejected ({}): {}", e.kind(), e);
            false
        }
        Err(e) => {
            error!("[SIGNALS] restore task failed: {}", e);
            false
        }
    }
}

/// Decides one signal. Store writes, audit records and session locking run
/// on the blocking pool.
pub async fn handle_incoming(
    guardian: &Arc<ProcessGuardian>,
    sources: &SignalSources,
    kind: SignalKind,
) -> ShutdownDecision {
    info!("[SIGNALS] {} received; looking up shutdown token", kind);
    if guardian.phase() == GuardianPhase::Stasis {
        if let Some(restore) = &sources.restore {
            apply_restore_request(guardian, restore.clone(), sources.timeout).await;
        }
    }

    let lookup = lookup_token(sources.tokens.clone(), sources.timeout).await;
    let g = guardian.clone();
    match tokio::task::spawn_blocking(move || g.handle_signal(kind, lookup)).await {
        Ok(decision) => decision,
        Err(e) => {
            error!("[SIGNALS] decision task for {} failed: {}", kind, e);
            ShutdownDecision::Denied(PresenceError::UnauthorizedTermination(format!(
                "decision task failed: {e}"
            )))
        }
    }
}

/// Routes every signal from `signals` through the guardian and returns the
/// one that was granted. Returns `None` if the channel closes first.
pub async fn supervise_channel(
    guardian: Arc<ProcessGuardian>,
    sources: SignalSources,
    mut signals: mpsc::Receiver<SignalKind>,
) -> Option<SignalKind> {
    while let Some(kind) = signals.recv().await {
        match handle_incoming(&guardian, &sources, kind).await {
            ShutdownDecision::Granted => return Some(kind),
            ShutdownDecision::Denied(reason) => {
                warn!("[SIGNALS] {} denied ({}): {}", kind, reason.kind(), reason);
            }
        }
    }
    None
}

/// Installs the process signal handlers and supervises until a shutdown is
/// granted.
pub async fn supervise(
    guardian: Arc<ProcessGuardian>,
    sources: SignalSources,
) -> std::io::Result<SignalKind> {
    let (tx, rx) = mpsc::channel(16);
    let mut streams = SignalStreams::install()?;
    let forwarder = tokio::spawn(async move {
        loop {
            let kind = match streams.next().await {
                Ok(kind) => kind,
                Err(e) => {
                    warn!("[SIGNALS] signal stream failed: {}", e);
                    break;
                }
            };
            if tx.send(kind).await.is_err() {
                break;
            }
        }
    });

    let granted = supervise_channel(guardian, sources, rx).await;
    forwarder.abort();
    granted.ok_or_else(|| std::io::Error::other("signal handlers closed before shutdown was granted"))
}

#[cfg(unix)]
struct SignalStreams {
    terminate: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalStreams {
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind as Unix};
        Ok(Self {
            terminate: signal(Unix::terminate())?,
            interrupt: signal(Unix::interrupt())?,
            hangup: signal(Unix::hangup())?,
        })
    }

    async fn next(&mut self) -> std::io::Result<SignalKind> {
        let kind = tokio::select! {
            _ = self.terminate.recv() => SignalKind::Terminate,
            _ = self.interrupt.recv() => SignalKind::Interrupt,
            _ = self.hangup.recv() => SignalKind::Hangup,
        };
        Ok(kind)
    }
}

#[cfg(not(unix))]
struct SignalStreams;

#[cfg(not(unix))]
impl SignalStreams {
    fn install() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> std::io::Result<SignalKind> {
        tokio::signal::ctrl_c().await?;
        Ok(SignalKind::Interrupt)
    }
}
