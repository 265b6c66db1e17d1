use crate::error::ConfigError;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FaceThresholds {
    pub geometry_points: usize,
    pub blood_flow_min_confidence: f64,
    pub liveness_min_confidence: f64,
}

impl Default for FaceThresholds {
    fn default() -> Self {
        Self {
            geometry_points: 127,
            blood_flow_min_confidence: 0.90,
            liveness_min_confidence: 0.90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FingerThresholds {
    pub min_confidence: f64,
}

impl Default for FingerThresholds {
    fn default() -> Self {
        Self {
            min_confidence: 0.90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HeartThresholds {
    pub bpm_min: f64,
    pub bpm_max: f64,
    pub min_confidence: f64,
}

impl Default for HeartThresholds {
    fn default() -> Self {
        Self {
            bpm_min: 40.0,
            bpm_max: 140.0,
            min_confidence: 0.90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VoiceThresholds {
    pub frequency_min_hz: f64,
    pub frequency_max_hz: f64,
    pub min_confidence: f64,
}

impl Default for VoiceThresholds {
    fn default() -> Self {
        Self {
            frequency_min_hz: 200.0,
            frequency_max_hz: 4000.0,
            min_confidence: 0.95,
        }
    }
}

/// Per-modality acceptance thresholds and the cohesion window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThresholdConfig {
    pub face: FaceThresholds,
    pub finger: FingerThresholds,
    pub heart: HeartThresholds,
    pub voice: VoiceThresholds,
    pub cohesion_window_ms: i64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            face: FaceThresholds::default(),
            finger: FingerThresholds::default(),
            heart: HeartThresholds::default(),
            voice: VoiceThresholds::default(),
            cohesion_window_ms: 1500,
        }
    }
}

fn check_confidence(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::invalid(field, format!("{value} is outside [0, 1]")));
    }
    Ok(())
}

fn check_range(field: &'static str, min: f64, max: f64) -> Result<(), ConfigError> {
    if !min.is_finite() || !max.is_finite() || min > max {
        return Err(ConfigError::invalid(field, format!("range [{min}, {max}] is empty")));
    }
    Ok(())
}

impl ThresholdConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.face.geometry_points == 0 {
            return Err(ConfigError::invalid("thresholds.face.geometry_points", "must be non-zero"));
        }
        check_confidence("thresholds.face.blood_flow_min_confidence", self.face.blood_flow_min_confidence)?;
        check_confidence("thresholds.face.liveness_min_confidence", self.face.liveness_min_confidence)?;
        check_confidence("thresholds.finger.min_confidence", self.finger.min_confidence)?;
        check_confidence("thresholds.heart.min_confidence", self.heart.min_confidence)?;
        check_confidence("thresholds.voice.min_confidence", self.voice.min_confidence)?;
        check_range("thresholds.heart.bpm", self.heart.bpm_min, self.heart.bpm_max)?;
        check_range(
            "thresholds.voice.frequency_hz",
            self.voice.frequency_min_hz,
            self.voice.frequency_max_hz,
        )?;
        if self.cohesion_window_ms <= 0 {
            return Err(ConfigError::invalid("thresholds.cohesion_window_ms", "must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TokenConfig {
    /// Hard token lifetime. Also bounds how old a capture may be at issuance.
    pub max_age_ms: i64,
    pub max_clock_skew_ms: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            max_age_ms: 60_000,
            max_clock_skew_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GuardianConfig {
    pub unauthorized_threshold: u32,
    pub watchdog_interval_ms: u64,
    pub token_lookup_timeout_ms: u64,
    pub heartbeat_path: PathBuf,
    pub audit_log_path: PathBuf,
    pub shutdown_token_path: PathBuf,
    /// Where `presenced restore` leaves a re-validation request for the
    /// running guardian.
    pub restore_request_path: PathBuf,
    pub lock_on_unauthorized: bool,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            unauthorized_threshold: 3,
            watchdog_interval_ms: 5_000,
            token_lookup_timeout_ms: 2_000,
            heartbeat_path: PathBuf::from("presence-guardian.heartbeat"),
            audit_log_path: PathBuf::from("presence-guardian.audit.jsonl"),
            shutdown_token_path: PathBuf::from("presence-guardian.shutdown-token.json"),
            restore_request_path: PathBuf::from("presence-guardian.restore.json"),
            lock_on_unauthorized: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    pub expected_primary: String,
    pub expected_secondary: String,
    /// Hex Ed25519 public key that must have signed every binding record.
    pub binding_authority_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeyConfig {
    pub signing_key_path: PathBuf,
    /// When set, must match the public half of the signing key.
    pub authority_public_key: Option<String>,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            signing_key_path: PathBuf::from("presence-authority.key"),
            authority_public_key: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReplayConfig {
    pub persist_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PresenceConfig {
    pub thresholds: ThresholdConfig,
    pub tokens: TokenConfig,
    pub guardian: GuardianConfig,
    pub devices: DeviceConfig,
    pub keys: KeyConfig,
    pub replay: ReplayConfig,
    pub metrics_path: Option<PathBuf>,
}

impl PresenceConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: PresenceConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;

        if self.tokens.max_age_ms <= 0 {
            return Err(ConfigError::invalid("tokens.max_age_ms", "must be positive"));
        }
        if self.tokens.max_clock_skew_ms < 0 {
            return Err(ConfigError::invalid("tokens.max_clock_skew_ms", "must not be negative"));
        }

        let g = &self.guardian;
        if g.unauthorized_threshold == 0 {
            return Err(ConfigError::invalid("guardian.unauthorized_threshold", "must be at least 1"));
        }
        if g.watchdog_interval_ms == 0 {
            return Err(ConfigError::invalid("guardian.watchdog_interval_ms", "must be positive"));
        }
        if g.token_lookup_timeout_ms == 0 {
            return Err(ConfigError::invalid("guardian.token_lookup_timeout_ms", "must be positive"));
        }
        if g.token_lookup_timeout_ms >= g.watchdog_interval_ms {
            warn!(
                "[CONFIG] token lookup timeout {} ms is not shorter than watchdog interval {} ms",
                g.token_lookup_timeout_ms, g.watchdog_interval_ms
            );
        }

        if self.devices.expected_primary.is_empty() || self.devices.expected_secondary.is_empty() {
            return Err(ConfigError::invalid("devices", "both expected device identities are required"));
        }
        if self.devices.expected_primary == self.devices.expected_secondary {
            return Err(ConfigError::invalid("devices", "primary and secondary identities must differ"));
        }
        Ok(())
    }
}
