use log::{info, warn};
use std::process::{Command, Stdio};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("no lock-screen command for this platform")]
    Unsupported,
    #[error("failed to spawn lock command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Capability to lock the interactive session of the host device.
pub trait DeviceLocker: Send + Sync {
    fn lock_session(&self) -> Result<(), LockError>;
}

/// Locks the current session with the platform's own tooling. The command is
/// spawned and not waited on.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformLocker;

impl PlatformLocker {
    fn command() -> Option<(&'static str, &'static [&'static str])> {
        if cfg!(target_os = "linux") {
            Some(("loginctl", &["lock-session"][..]))
        } else if cfg!(target_os = "macos") {
            Some(("pmset", &["displaysleepnow"][..]))
        } else if cfg!(target_os = "windows") {
            Some(("rundll32.exe", &["user32.dll,LockWorkStation"][..]))
        } else {
            None
        }
    }
}

impl DeviceLocker for PlatformLocker {
    fn lock_session(&self) -> Result<(), LockError> {
        let (program, args) = Self::command().ok_or(LockError::Unsupported)?;
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| LockError::Spawn {
                command: format!("{} {}", program, args.join(" ")),
                source,
            })?;
        info!("[LOCKER] session lock requested via {}", program);
        Ok(())
    }
}

/// Logs instead of locking; for hosts without an interactive session.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnlyLocker;

impl DeviceLocker for LogOnlyLocker {
    fn lock_session(&self) -> Result<(), LockError> {
        warn!("[LOCKER] lockdown requested; session locking disabled on this host");
        Ok(())
    }
}
