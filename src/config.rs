//! Engine configuration.
//!
//! Loaded from a JSON file; every field is optional and falls back to the
//! defaults of the control surface. Command-line flags of `arm-sim` override
//! whatever the file says.
//!
//! ```json
//! {
//!   "motor_speed": 50,
//!   "sample_period_ms": 100,
//!   "calibration_ms": 3000,
//!   "telemetry_buffer": 256,
//!   "powered": true
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::interpolate::clamp_speed;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Motor speed in percent (10..=100). Lower is slower.
    pub motor_speed: u8,
    /// Recorder sampling period.
    pub sample_period_ms: u64,
    /// How long a calibration run takes.
    pub calibration_ms: u64,
    /// Telemetry events buffered before new ones are dropped.
    pub telemetry_buffer: usize,
    /// Whether the arm starts powered.
    pub powered: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            motor_speed: 50,
            sample_period_ms: 100,
            calibration_ms: 3000,
            telemetry_buffer: 256,
            powered: true,
        }
    }
}

impl EngineConfig {
    /// Read a config file and normalize it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Parse a config from JSON text and normalize it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        Ok(config.normalized())
    }

    /// Clamp every field into its usable range.
    pub fn normalized(mut self) -> Self {
        let speed = clamp_speed(self.motor_speed);
        if speed != self.motor_speed {
            tracing::warn!("motor_speed {} clamped to {}", self.motor_speed, speed);
            self.motor_speed = speed;
        }
        if self.sample_period_ms == 0 {
            tracing::warn!("sample_period_ms must be positive, using 100");
            self.sample_period_ms = 100;
        }
        self.telemetry_buffer = self.telemetry_buffer.max(1);
        self
    }

    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }

    pub fn calibration_time(&self) -> Duration {
        Duration::from_millis(self.calibration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.motor_speed, 50);
        assert_eq!(config.sample_period(), Duration::from_millis(100));
        assert_eq!(config.calibration_time(), Duration::from_secs(3));
        assert!(config.powered);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = EngineConfig::from_json(r#"{"motor_speed": 80}"#).unwrap();
        assert_eq!(config.motor_speed, 80);
        assert_eq!(config.sample_period_ms, 100);
    }

    #[test]
    fn test_out_of_range_values_normalized() {
        let json = r#"{"motor_speed": 5, "sample_period_ms": 0, "telemetry_buffer": 0}"#;
        let config = EngineConfig::from_json(json).unwrap();
        assert_eq!(config.motor_speed, 10);
        assert_eq!(config.sample_period_ms, 100);
        assert_eq!(config.telemetry_buffer, 1);
    }

    #[test]
    fn test_bad_json_is_error() {
        assert!(EngineConfig::from_json("{").is_err());
        assert!(EngineConfig::load("/nonexistent/arm.json").is_err());
    }
}
