use presence_core::PresenceError;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct PresenceMetrics {
    registry: Registry,
    pub tokens_issued: IntCounter,
    pub tokens_consumed: IntCounter,
    pub rejections: IntCounterVec,
    pub unauthorized_terminations: IntCounter,
    pub stasis_active: IntGauge,
    pub heartbeat_timestamp_ms: IntGauge,
}

impl PresenceMetrics {
    /// Builds the collectors on a private registry so several guardians can
    /// live in one process without name collisions.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let tokens_issued = IntCounter::new(
            "presence_tokens_issued_total",
            "Authorization tokens issued after full presence validation",
        )?;
        let tokens_consumed = IntCounter::new(
            "presence_tokens_consumed_total",
            "Authorization tokens accepted by the replay guard",
        )?;
        let rejections = IntCounterVec::new(
            Opts::new(
                "presence_rejections_total",
                "Rejected presence validations and token uses by reason",
            ),
            &["reason"],
        )?;
        let unauthorized_terminations = IntCounter::new(
            "guardian_unauthorized_terminations_total",
            "Termination signals received without a valid authorization token",
        )?;
        let stasis_active = IntGauge::new(
            "guardian_stasis_active",
            "1 while the host is locked in stasis",
        )?;
        let heartbeat_timestamp_ms = IntGauge::new(
            "guardian_heartbeat_timestamp_ms",
            "Wall-clock time of the last watchdog heartbeat",
        )?;

        registry.register(Box::new(tokens_issued.clone()))?;
        registry.register(Box::new(tokens_consumed.clone()))?;
        registry.register(Box::new(rejections.clone()))?;
        registry.register(Box::new(unauthorized_terminations.clone()))?;
        registry.register(Box::new(stasis_active.clone()))?;
        registry.register(Box::new(heartbeat_timestamp_ms.clone()))?;

        Ok(Self {
            registry,
            tokens_issued,
            tokens_consumed,
            rejections,
            unauthorized_terminations,
            stasis_active,
            heartbeat_timestamp_ms,
        })
    }

    pub fn observe_rejection(&self, err: &PresenceError) {
        self.rejections.with_label_values(&[err.kind()]).inc();
    }

    pub fn observe_stasis(&self, locked: bool) {
        self.stasis_active.set(i64::from(locked));
    }

    pub fn observe_heartbeat(&self, beat_at_ms: i64) {
        self.heartbeat_timestamp_ms.set(beat_at_ms);
    }

    pub fn rejection_count(&self, kind: &str) -> u64 {
        self.rejections.with_label_values(&[kind]).get()
    }

    /// Prometheus text exposition of every collector.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
