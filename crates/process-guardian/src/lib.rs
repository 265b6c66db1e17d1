pub mod audit;
mod drop_file;
pub mod guardian;
pub mod heartbeat;
pub mod locker;
pub mod signals;
pub mod stasis;


pub use audit::{AuditError, AuditLog, JsonlAuditLog, MemoryAuditLog, StasisTrigger, TriggerKind};
pub use guardian::{GuardianPhase, ProcessGuardian, ProcessSignalEvent, ShutdownDecision};
pub use heartbeat::{HeartbeatError, HeartbeatFile, HeartbeatRecord, PriorRun, Watchdog};
pub use locker::{DeviceLocker, LockError, LogOnlyLocker, PlatformLocker};
pub use signals::{
    apply_restore_request, handle_incoming, lookup_token, supervise, supervise_channel,
    FileRestoreSource, FileTokenSource, RestoreRequest, RestoreSource, ShutdownTokenSource,
    SignalKind, SignalSources, TokenSourceError,
};
pub use stasis::StasisCell;
