//! Termination-signal state machine.
//!
//! `Normal` grants shutdown only against an unconsumed authorization token.
//! Unauthorized attempts lock the session and, once the configured threshold
//! is reached, move the host into `Stasis`. Stasis is cleared only by a full
//! four-layer and device-binding re-validation.

use crate::audit::{AuditLog, StasisTrigger, TriggerKind};
use crate::heartbeat::PriorRun;
use crate::locker::DeviceLocker;
use crate::signals::{SignalKind, TokenSourceError};
use crate::stasis::StasisCell;
use log::{error, info, warn};
use presence_auth::PresenceService;
use presence_core::{
    AuthorizationToken, DeviceBindingRecord, DeviceConfig, FourLayerSignature, GuardianConfig,
    PresenceError, StasisState,
};
use presence_metrics::PresenceMetrics;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const EVENT_HISTORY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardianPhase {
    Normal,
    Stasis,
    ShuttingDown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownDecision {
    Granted,
    Denied(PresenceError),
}

impl ShutdownDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, ShutdownDecision::Granted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSignalEvent {
    pub kind: SignalKind,
    pub at_ms: i64,
    pub authorized: bool,
}

/// Work a decision leaves for after the inner lock is released.
#[derive(Default)]
struct SideEffects {
    lock_session: bool,
    audit: Vec<StasisTrigger>,
}

struct GuardianInner {
    phase: GuardianPhase,
    events: VecDeque<ProcessSignalEvent>,
}

pub struct ProcessGuardian {
    config: GuardianConfig,
    devices: DeviceConfig,
    service: Arc<PresenceService>,
    stasis: Arc<StasisCell>,
    locker: Arc<dyn DeviceLocker>,
    audit: Arc<dyn AuditLog>,
    metrics: Option<Arc<PresenceMetrics>>,
    inner: Mutex<GuardianInner>,
}

impl ProcessGuardian {
    pub fn new(
        config: GuardianConfig,
        devices: DeviceConfig,
        service: Arc<PresenceService>,
        stasis: Arc<StasisCell>,
        locker: Arc<dyn DeviceLocker>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        let phase = if stasis.snapshot().locked {
            GuardianPhase::Stasis
        } else {
            GuardianPhase::Normal
        };
        Self {
            config,
            devices,
            service,
            stasis,
            locker,
            audit,
            metrics: None,
            inner: Mutex::new(GuardianInner {
                phase,
                events: VecDeque::with_capacity(EVENT_HISTORY),
            }),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PresenceMetrics>) -> Self {
        metrics.observe_stasis(self.stasis.snapshot().locked);
        self.metrics = Some(metrics);
        self
    }

    pub fn phase(&self) -> GuardianPhase {
        self.inner().phase
    }

    pub fn stasis(&self) -> StasisState {
        self.stasis.snapshot()
    }

    /// Most recent signals, oldest first.
    pub fn events(&self) -> Vec<ProcessSignalEvent> {
        self.inner().events.iter().cloned().collect()
    }

    fn inner(&self) -> MutexGuard<'_, GuardianInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now_ms(&self) -> i64 {
        self.service.clock().now_ms()
    }

    /// Decides whether a termination signal may end the process.
    pub fn authorize_shutdown(
        &self,
        signal: SignalKind,
        token: Option<&AuthorizationToken>,
    ) -> ShutdownDecision {
        self.decide(signal, token, "no shutdown token presented".to_string())
    }

    /// Like `authorize_shutdown`, for the outcome of an asynchronous token
    /// lookup. A failed or timed-out lookup counts as unauthorized.
    pub fn handle_signal(
        &self,
        signal: SignalKind,
        lookup: Result<Option<AuthorizationToken>, TokenSourceError>,
    ) -> ShutdownDecision {
        match lookup {
            Ok(token) => self.authorize_shutdown(signal, token.as_ref()),
            Err(e) => {
                warn!("[GUARDIAN] shutdown token lookup failed: {}", e);
                self.decide(signal, None, format!("token lookup failed: {e}"))
            }
        }
    }

    fn decide(
        &self,
        signal: SignalKind,
        token: Option<&AuthorizationToken>,
        missing_reason: String,
    ) -> ShutdownDecision {
        let now_ms = self.now_ms();
        let mut effects = SideEffects::default();
        let mut inner = self.inner();

        let decision = match inner.phase {
            GuardianPhase::ShuttingDown => {
                info!("[GUARDIAN] {} received while already shutting down", signal);
                ShutdownDecision::Granted
            }
            GuardianPhase::Stasis => {
                match token {
                    // The token is left unconsumed.
                    Some(t) => {
                        warn!("[GUARDIAN] {} with token {} refused: stasis active", signal, t.nonce);
                        let attempts = self.stasis.snapshot().unauthorized_attempts;
                        effects.audit.push(StasisTrigger::new(
                            now_ms,
                            TriggerKind::RefusedDuringStasis,
                            Some(signal),
                            "shutdown refused during stasis",
                            attempts,
                            true,
                        ));
                    }
                    None => {
                        self.register_unauthorized(&mut inner, &mut effects, signal, missing_reason, now_ms);
                    }
                }
                if let Some(m) = &self.metrics {
                    m.observe_rejection(&PresenceError::StasisActive);
                }
                ShutdownDecision::Denied(PresenceError::StasisActive)
            }
            GuardianPhase::Normal => match token {
                Some(t) => match self.service.consume_token(t) {
                    Ok(()) => {
                        info!("[GUARDIAN] {} authorized by {}; shutting down", signal, t.subject);
                        inner.phase = GuardianPhase::ShuttingDown;
                        ShutdownDecision::Granted
                    }
                    Err(e) => ShutdownDecision::Denied(self.register_unauthorized(
                        &mut inner,
                        &mut effects,
                        signal,
                        e.to_string(),
                        now_ms,
                    )),
                },
                None => ShutdownDecision::Denied(self.register_unauthorized(
                    &mut inner,
                    &mut effects,
                    signal,
                    missing_reason,
                    now_ms,
                )),
            },
        };

        if inner.events.len() == EVENT_HISTORY {
            inner.events.pop_front();
        }
        inner.events.push_back(ProcessSignalEvent {
            kind: signal,
            at_ms: now_ms,
            authorized: decision.is_granted(),
        });
        drop(inner);

        self.apply(effects);
        decision
    }

    /// Records the attempt and the phase change. Locking and audit writes
    /// are queued in `effects` and run once the inner lock is released.
    fn register_unauthorized(
        &self,
        inner: &mut GuardianInner,
        effects: &mut SideEffects,
        signal: SignalKind,
        reason: String,
        now_ms: i64,
    ) -> PresenceError {
        let threshold = self.config.unauthorized_threshold;
        let state = self.stasis.update(|s| {
            s.unauthorized_attempts = s.unauthorized_attempts.saturating_add(1);
            s.last_trigger = Some(reason.clone());
            if s.unauthorized_attempts >= threshold {
                s.locked = true;
            }
            s.clone()
        });
        warn!(
            "[GUARDIAN] unauthorized {} ({}/{}): {}",
            signal, state.unauthorized_attempts, threshold, reason
        );

        if let Some(m) = &self.metrics {
            m.unauthorized_terminations.inc();
            m.observe_stasis(state.locked);
        }
        if state.locked && inner.phase == GuardianPhase::Normal {
            error!("[GUARDIAN] stasis entered after {} unauthorized attempts", state.unauthorized_attempts);
            inner.phase = GuardianPhase::Stasis;
        }
        effects.lock_session |= self.config.lock_on_unauthorized;
        effects.audit.push(StasisTrigger::new(
            now_ms,
            TriggerKind::UnauthorizedTermination,
            Some(signal),
            reason.clone(),
            state.unauthorized_attempts,
            state.locked,
        ));
        PresenceError::UnauthorizedTermination(reason)
    }

    fn apply(&self, effects: SideEffects) {
        if effects.lock_session {
            self.lockdown();
        }
        for trigger in effects.audit {
            self.write_audit(trigger);
        }
    }

    /// Applies the watchdog's verdict on the previous run. An unclean or
    /// unreadable heartbeat starts the host in stasis.
    pub fn apply_prior_run(&self, prior: &PriorRun) {
        if prior.is_unclean() {
            self.enter_stasis(&prior.describe());
        } else {
            info!("[GUARDIAN] previous run: {}", prior.describe());
        }
    }

    fn enter_stasis(&self, reason: &str) {
        let now_ms = self.now_ms();
        let state = self.stasis.update(|s| {
            s.locked = true;
            s.last_trigger = Some(reason.to_string());
            s.clone()
        });
        {
            let mut inner = self.inner();
            if inner.phase == GuardianPhase::Normal {
                inner.phase = GuardianPhase::Stasis;
            }
        }
        error!("[GUARDIAN] stasis entered: {}", reason);
        if let Some(m) = &self.metrics {
            m.observe_stasis(true);
        }
        self.lockdown();
        self.write_audit(StasisTrigger::new(
            now_ms,
            TriggerKind::UncleanRestart,
            None,
            reason,
            state.unauthorized_attempts,
            true,
        ));
    }

    /// Clears stasis after a full presence re-validation against the
    /// configured device pair. Outside stasis this is a no-op.
    pub fn restore(
        &self,
        signature: &FourLayerSignature,
        binding: &DeviceBindingRecord,
    ) -> Result<(), PresenceError> {
        if self.phase() != GuardianPhase::Stasis {
            return Ok(());
        }
        if let Err(e) = self.service.verify_presence(
            signature,
            binding,
            &self.devices.expected_primary,
            &self.devices.expected_secondary,
        ) {
            warn!("[GUARDIAN] restoration refused: {}", e);
            return Err(e);
        }

        let now_ms = self.now_ms();
        self.stasis.update(|s| *s = StasisState::default());
        {
            let mut inner = self.inner();
            if inner.phase == GuardianPhase::Stasis {
                inner.phase = GuardianPhase::Normal;
            }
        }
        if let Some(m) = &self.metrics {
            m.observe_stasis(false);
        }
        info!("[GUARDIAN] stasis cleared by full presence re-validation");
        self.write_audit(StasisTrigger::new(
            now_ms,
            TriggerKind::Restored,
            None,
            "full presence re-validation",
            0,
            false,
        ));
        Ok(())
    }

    fn lockdown(&self) {
        if let Err(e) = self.locker.lock_session() {
            error!("[GUARDIAN] session lock failed: {}", e);
        }
    }

    fn write_audit(&self, trigger: StasisTrigger) {
        if let Err(e) = self.audit.record(&trigger) {
            error!("[GUARDIAN] audit record {} not written: {}", trigger.id, e);
        }
    }
}
