//! Scanner service configuration.
//!
//! # TOML Example
//!
//! ```toml
//! model = "cis-flatbed"
//!
//! [shared]
//! service_name = "scanner-01"
//!
//! [timing]
//! poll_interval_ms = 100
//! data_poll_interval_ms = 10
//!
//! [calibration]
//! cache_file = "/var/lib/scan_hal/calibration.bin"
//! expiration_minutes = 60
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{ConfigError, SharedConfig};
use crate::hal::consts::{
    DEFAULT_CALIBRATION_EXPIRATION_MINUTES, DEFAULT_DATA_POLL_INTERVAL, DEFAULT_POLL_INTERVAL,
};

/// Sleep intervals of the polling loops.
///
/// Timeouts are iteration counts times these intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Sleep between status register polls, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Sleep between data availability polls, in milliseconds.
    #[serde(default = "default_data_poll_interval_ms")]
    pub data_poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_data_poll_interval_ms() -> u64 {
    DEFAULT_DATA_POLL_INTERVAL.as_millis() as u64
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            data_poll_interval_ms: default_data_poll_interval_ms(),
        }
    }
}

impl TimingConfig {
    /// Timing without sleeps, for simulated hardware.
    pub fn immediate() -> Self {
        Self {
            poll_interval_ms: 0,
            data_poll_interval_ms: 0,
        }
    }

    /// Status poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Data poll interval.
    pub fn data_poll_interval(&self) -> Duration {
        Duration::from_millis(self.data_poll_interval_ms)
    }
}

/// Calibration cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Cache file. No cache when absent.
    #[serde(default)]
    pub cache_file: Option<PathBuf>,
    /// Minutes after which a cached calibration is discarded. 0 keeps entries forever.
    #[serde(default = "default_expiration_minutes")]
    pub expiration_minutes: u32,
    /// Recalibrate even when a valid cache entry exists.
    #[serde(default)]
    pub force: bool,
}

fn default_expiration_minutes() -> u32 {
    DEFAULT_CALIBRATION_EXPIRATION_MINUTES
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            cache_file: None,
            expiration_minutes: default_expiration_minutes(),
            force: false,
        }
    }
}

/// Top level scanner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Fields common to every service.
    #[serde(default)]
    pub shared: SharedConfig,
    /// Model name, resolved through the model table.
    pub model: String,
    /// Polling intervals.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Calibration cache.
    #[serde(default)]
    pub calibration: CalibrationConfig,
}

impl ScannerConfig {
    /// Configuration for `model` with default settings.
    pub fn for_model(model: &str) -> Self {
        Self {
            shared: SharedConfig::default(),
            model: model.to_string(),
            timing: TimingConfig::default(),
            calibration: CalibrationConfig::default(),
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - the shared section is invalid
    /// - `model` is empty
    /// - the status poll interval exceeds one second
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        if self.model.is_empty() {
            return Err(ConfigError::ValidationError(
                "model cannot be empty".to_string(),
            ));
        }
        if self.timing.poll_interval_ms > 1000 {
            return Err(ConfigError::ValidationError(format!(
                "poll_interval_ms {} exceeds 1000",
                self.timing.poll_interval_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLoader;

    #[test]
    fn test_minimal_config_defaults() {
        let config = ScannerConfig::from_toml("model = \"ccd-flatbed\"").unwrap();
        assert_eq!(config.model, "ccd-flatbed");
        assert_eq!(config.timing.poll_interval(), DEFAULT_POLL_INTERVAL);
        assert_eq!(config.timing.data_poll_interval(), DEFAULT_DATA_POLL_INTERVAL);
        assert_eq!(config.calibration.expiration_minutes, 60);
        assert!(config.calibration.cache_file.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_config() {
        let config = ScannerConfig::from_toml(
            r#"model = "cis-flatbed"

[shared]
log_level = "debug"
service_name = "bench"

[timing]
poll_interval_ms = 5

[calibration]
cache_file = "/tmp/cal.bin"
expiration_minutes = 0
force = true
"#,
        )
        .unwrap();
        assert_eq!(config.timing.poll_interval(), Duration::from_millis(5));
        assert_eq!(config.timing.data_poll_interval_ms, 10);
        assert_eq!(
            config.calibration.cache_file,
            Some(PathBuf::from("/tmp/cal.bin"))
        );
        assert!(config.calibration.force);
    }

    #[test]
    fn test_validation_rejects_slow_polling() {
        let mut config = ScannerConfig::for_model("cis-flatbed");
        config.timing.poll_interval_ms = 5000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        config.timing.poll_interval_ms = 100;
        config.model.clear();
        assert!(config.validate().is_err());
    }
}
