pub mod clock;
pub mod config;
pub mod digest;
pub mod error;
pub mod stasis;
pub mod types;


pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    DeviceConfig, FaceThresholds, FingerThresholds, GuardianConfig, HeartThresholds, KeyConfig,
    PresenceConfig, ReplayConfig, ThresholdConfig, TokenConfig, VoiceThresholds,
};
pub use error::{ConfigError, DigestError, PresenceError};
pub use stasis::{LockState, StasisState};
pub use types::*;
