use serde::{Deserialize, Serialize};

/// Lock state of the host after security violations.
///
/// Only the process guardian mutates it, and only a full four-layer plus
/// device-binding re-validation clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StasisState {
    pub locked: bool,
    pub unauthorized_attempts: u32,
    pub last_trigger: Option<String>,
}

/// Read-only view of stasis consulted by every consuming action.
pub trait LockState: Send + Sync {
    fn is_locked(&self) -> bool;
}
