// config.rs: Tunables for the compass, the Kalman strategy and the locators.
//
// Every struct has a `Default` carrying the calibrated constants, and
// `#[serde(default)]` so a JSON file only needs the fields it overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

// ─── Compass ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompassConfig {
    /// Fusion tick period in milliseconds.
    pub rate_ms: u64,
    /// Weight of the gyro-integrated orientation in each tick (0.0–1.0).
    pub fusion_coefficient: f64,
}

impl Default for CompassConfig {
    fn default() -> Self {
        Self {
            rate_ms: 30,
            fusion_coefficient: 0.98,
        }
    }
}

/// Shortest fusion tick period accepted anywhere.
pub const MIN_COMPASS_RATE: Duration = Duration::from_millis(1);

impl CompassConfig {
    pub fn rate(&self) -> Duration {
        Duration::from_millis(self.rate_ms).max(MIN_COMPASS_RATE)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.fusion_coefficient) {
            return Err(ConfigError::OutOfUnitRange {
                name: "fusion_coefficient",
                value: self.fusion_coefficient,
            });
        }
        Ok(())
    }
}

// ─── Kalman strategy ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Fixed step length (m) used by the dead-reckoning predictor.
    pub step_length: f64,

    // ── Initial covariance ──
    pub initial_position_std: f64,
    pub initial_heading_std_deg: f64,

    // ── Process noise ──
    pub position_process_std: f64,
    pub heading_process_std_deg: f64,

    /// Uncorrected steps tolerated before buffered fixes are discarded.
    pub step_limit: u32,

    /// R diagonal for state channels a fingerprint fix does not observe.
    pub unobserved_noise: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            step_length: 0.5,
            initial_position_std: 5.0,
            initial_heading_std_deg: 10.0,
            position_process_std: 1.0,
            heading_process_std_deg: 3.0,
            step_limit: 3,
            unobserved_noise: 1.0,
        }
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("step_length", self.step_length),
            ("initial_position_std", self.initial_position_std),
            ("initial_heading_std_deg", self.initial_heading_std_deg),
            ("position_process_std", self.position_process_std),
            ("heading_process_std_deg", self.heading_process_std_deg),
            ("unobserved_noise", self.unobserved_noise),
        ];
        for (name, value) in checks {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NonPositive { name, value });
            }
        }
        Ok(())
    }
}

// ─── Fingerprint locators ────────────────────────────────────────────────────

/// Selection policy of a fingerprint matcher. Both knobs are independent:
/// none, threshold only, K-NN only, or both.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Keep only the `k` nearest surviving rows.
    pub k: Option<usize>,
    /// Reject rows whose squared feature distance exceeds this value.
    pub threshold: Option<f64>,
}

impl MatcherConfig {
    pub fn knn(k: usize) -> Self {
        Self {
            k: Some(k),
            threshold: None,
        }
    }

    pub fn threshold(threshold: f64) -> Self {
        Self {
            k: None,
            threshold: Some(threshold),
        }
    }

    pub fn with_knn(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.k == Some(0) {
            return Err(ConfigError::ZeroNeighbours);
        }
        if let Some(t) = self.threshold {
            if !t.is_finite() || t < 0.0 {
                return Err(ConfigError::InvalidThreshold(t));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    pub matcher: MatcherConfig,
    /// Expected 1-σ position error (m) of this locator's fixes.
    pub position_std: f64,
}

impl LocatorConfig {
    fn with_std(position_std: f64) -> Self {
        Self {
            matcher: MatcherConfig::default(),
            position_std,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.matcher.validate()?;
        if !(self.position_std.is_finite() && self.position_std > 0.0) {
            return Err(ConfigError::NonPositive {
                name: "position_std",
                value: self.position_std,
            });
        }
        Ok(())
    }
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self::with_std(3.0)
    }
}

// ─── Top level ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavConfig {
    pub compass: CompassConfig,
    pub strategy: StrategyConfig,
    pub magnetic: LocatorConfig,
    pub radio: LocatorConfig,
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            compass: CompassConfig::default(),
            strategy: StrategyConfig::default(),
            magnetic: LocatorConfig::with_std(2.0),
            radio: LocatorConfig::with_std(4.0),
        }
    }
}

impl NavConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: NavConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.compass.validate()?;
        self.strategy.validate()?;
        self.magnetic.validate()?;
        self.radio.validate()
    }
}
