use presence_core::{FourLayerSignature, PresenceError};

/// Enforces that all four captures belong to one presence event.
#[derive(Debug, Clone, Copy)]
pub struct TemporalSynchronizer {
    cohesion_window_ms: i64,
}

impl TemporalSynchronizer {
    pub fn new(cohesion_window_ms: i64) -> Self {
        Self { cohesion_window_ms }
    }

    pub fn cohesion_window_ms(&self) -> i64 {
        self.cohesion_window_ms
    }

    /// `max(ts) - min(ts)` across the four layer timestamps.
    pub fn spread_ms(signature: &FourLayerSignature) -> i64 {
        let ts = signature.capture_timestamps().map(|(_, t)| t);
        let max = ts.iter().copied().max().unwrap_or_default();
        let min = ts.iter().copied().min().unwrap_or_default();
        max.saturating_sub(min)
    }

    pub fn check(&self, signature: &FourLayerSignature) -> Result<i64, PresenceError> {
        let spread_ms = Self::spread_ms(signature);
        if spread_ms > self.cohesion_window_ms {
            return Err(PresenceError::DesynchronizedCapture {
                spread_ms,
                window_ms: self.cohesion_window_ms,
            });
        }
        Ok(spread_ms)
    }
}
