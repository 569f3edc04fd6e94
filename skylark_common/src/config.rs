//! Configuration loading and validation.
//!
//! One TOML file (`core.toml`) in the config directory deserializes into
//! [`CoreConfig`], a bundle of the settings records the rest of the system
//! consumes. Strict parsing: unknown fields are rejected, every section is
//! optional and falls back to its default.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::consts::STABILIZATION_BANKS;
use crate::objects::{
    ActuatorSettings, AttitudeSettings, FlightModeSettings, ManualControlSettings,
    PathFollowerSettings, StabilizationBank, StabilizationSettings, SystemSettings,
};

/// Name of the core configuration file inside the config directory.
pub const CORE_CONFIG_FILE: &str = "core.toml";

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parsing failed.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// All tunable settings, as loaded from disk.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    pub system: SystemSettings,
    pub attitude: AttitudeSettings,
    pub stabilization: StabilizationSettings,
    pub banks: [StabilizationBank; STABILIZATION_BANKS],
    pub flight_modes: FlightModeSettings,
    pub manual_control: ManualControlSettings,
    pub path_follower: PathFollowerSettings,
    pub actuator: ActuatorSettings,
}

impl CoreConfig {
    /// Load and validate `core.toml` from a config directory.
    ///
    /// A missing file yields the defaults (a bench setup needs no file);
    /// a present-but-broken file is an error.
    pub fn load_dir(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CORE_CONFIG_FILE);
        if !path.exists() {
            info!(dir = %dir.display(), "no core.toml, using default configuration");
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
        let config: Self =
            toml::from_str(&text).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Range checks that are cheap here and expensive to debug in the air.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.stabilization;
        if !(0.0..=10.0).contains(&self.attitude.accel_kp) {
            return Err(ConfigError::ValidationError(format!(
                "attitude.accel_kp {} outside [0, 10]",
                self.attitude.accel_kp
            )));
        }
        if s.rattitude_mode_transition > 100 {
            return Err(ConfigError::ValidationError(format!(
                "stabilization.rattitude_mode_transition {} outside [0, 100]",
                s.rattitude_mode_transition
            )));
        }
        for (i, map) in s.flight_mode_map.iter().enumerate() {
            if *map as usize >= STABILIZATION_BANKS {
                return Err(ConfigError::ValidationError(format!(
                    "stabilization.flight_mode_map[{i}] = {map} exceeds bank count"
                )));
            }
        }
        for bank in &self.actuator.banks {
            if !(50..=500).contains(&bank.rate_hz) {
                return Err(ConfigError::ValidationError(format!(
                    "actuator bank rate {} Hz outside [50, 500]",
                    bank.rate_hz
                )));
            }
        }
        for (i, b) in self.actuator.channel_bank.iter().enumerate() {
            if *b as usize >= self.actuator.banks.len() {
                return Err(ConfigError::ValidationError(format!(
                    "actuator.channel_bank[{i}] = {b} exceeds bank count"
                )));
            }
        }
        if self.flight_modes.arming_sequence_time_ms == 0 {
            return Err(ConfigError::ValidationError(
                "flight_modes.arming_sequence_time_ms must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        CoreConfig::default().validate().unwrap();
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoreConfig::load_dir(dir.path()).unwrap();
        assert_eq!(config, CoreConfig::default());
    }

    #[test]
    fn round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CoreConfig::default();
        config.attitude.accel_kp = 0.12;
        config.stabilization.rattitude_mode_transition = 55;
        let text = toml::to_string(&config).unwrap();
        std::fs::write(dir.path().join(CORE_CONFIG_FILE), text).unwrap();

        let loaded = CoreConfig::load_dir(dir.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn bad_bank_rate_is_rejected() {
        let mut config = CoreConfig::default();
        config.actuator.banks[0].rate_hz = 10_000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CORE_CONFIG_FILE),
            "[no_such_section]\nvalue = 1\n",
        )
        .unwrap();
        assert!(matches!(
            CoreConfig::load_dir(dir.path()),
            Err(ConfigError::ParseError(_))
        ));
    }
}
