mod metrics;

pub use metrics::PresenceMetrics;
