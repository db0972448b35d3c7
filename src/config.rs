//! Configuration management for Tarifa
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files with support for environment variable overrides.

use crate::error::{Result, TarifaError};
use crate::holidays::HolidaySource;
use crate::levels::BetterPriceTarget;
use crate::periods::TariffZone;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

fn default_true() -> bool {
    true
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tariff zone selecting the period boundary table
    pub zone: TariffZone,

    /// Contracted power for the two power periods
    pub power: PowerConfig,

    /// Acceptance threshold for the better-price search
    pub better_price_target: BetterPriceTarget,

    /// Cadence for recomputing time-remaining style values
    pub fast_cadence: FastCadence,

    /// Holiday calendar configuration
    pub holidays: HolidaysConfig,

    /// ESIOS API configuration
    pub esios: EsiosConfig,

    /// Price refresh cadence
    pub refresh: RefreshConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Path of the persisted state file
    pub state_file: String,

    /// IANA timezone for local-day computations
    pub timezone: String,
}

/// Contracted power in kW per power period
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    /// Contracted power for P1 (punta/llano hours) in kW
    pub p1_kw: f64,

    /// Contracted power for P3 (valley hours) in kW
    pub p3_kw: f64,
}

/// Recompute cadence for fast-changing derived values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FastCadence {
    /// No background recomputation; values derive on demand only
    Off,
    /// Recompute once per hour
    Hourly,
    /// Recompute once per minute
    #[default]
    EveryMinute,
}

impl FastCadence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Hourly => "hourly",
            Self::EveryMinute => "every_minute",
        }
    }
}

/// Holiday calendar configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HolidaysConfig {
    /// Provider used to resolve the yearly holiday set
    pub source: HolidaySource,

    /// Download URL of the official working-calendar dataset (CSV)
    pub dataset_url: String,

    /// Dataset download timeout in seconds
    pub timeout_seconds: u64,
}

/// ESIOS API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EsiosConfig {
    /// Whether to call the token-gated API (enables the extra indicators)
    pub use_api_token: bool,

    /// Personal API token; required when `use_api_token` is set
    pub api_token: String,

    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

/// Price refresh cadence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Minutes between price fetch attempts
    pub price_interval_minutes: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console-specific level override
    pub console_level: Option<String>,

    /// Optional file-specific level override
    pub file_level: Option<String>,

    /// Path to log file (or directory for rotated files)
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    #[serde(default = "default_true")]
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            p1_kw: 3.3,
            p3_kw: 3.3,
        }
    }
}

impl Default for HolidaysConfig {
    fn default() -> Self {
        Self {
            source: HolidaySource::default(),
            dataset_url: crate::holidays::DEFAULT_DATASET_URL.to_string(),
            timeout_seconds: 20,
        }
    }
}

impl Default for EsiosConfig {
    fn default() -> Self {
        Self {
            use_api_token: false,
            api_token: String::new(),
            timeout_seconds: 10,
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            price_interval_minutes: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            file: "/tmp/tarifa.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            zone: TariffZone::Peninsula,
            power: PowerConfig::default(),
            better_price_target: BetterPriceTarget::Neutral,
            fast_cadence: FastCadence::default(),
            holidays: HolidaysConfig::default(),
            esios: EsiosConfig::default(),
            refresh: RefreshConfig::default(),
            logging: LoggingConfig::default(),
            state_file: "/data/tarifa_state.json".to_string(),
            timezone: "Europe/Madrid".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration with validation
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("TARIFA_CONFIG")
            && !path.is_empty()
        {
            return Self::from_file(path);
        }

        // Try to load from default locations
        let default_paths = [
            "tarifa_config.yaml",
            "/data/tarifa_config.yaml",
            "/etc/tarifa/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        // Contracted power is bounded by the regulated tariff (1..15 kW)
        if !(1.0..=15.0).contains(&self.power.p1_kw) {
            return Err(TarifaError::validation(
                "power.p1_kw",
                "Must be between 1.0 and 15.0 kW",
            ));
        }

        if !(1.0..=15.0).contains(&self.power.p3_kw) {
            return Err(TarifaError::validation(
                "power.p3_kw",
                "Must be between 1.0 and 15.0 kW",
            ));
        }

        if self.refresh.price_interval_minutes == 0 {
            return Err(TarifaError::validation(
                "refresh.price_interval_minutes",
                "Must be greater than 0",
            ));
        }

        if self.esios.use_api_token && self.esios.api_token.trim().is_empty() {
            return Err(TarifaError::validation(
                "esios.api_token",
                "Required when use_api_token is enabled",
            ));
        }

        if self.esios.timeout_seconds == 0 {
            return Err(TarifaError::validation(
                "esios.timeout_seconds",
                "Must be greater than 0",
            ));
        }

        if chrono_tz::Tz::from_str(&self.timezone).is_err() {
            return Err(TarifaError::validation(
                "timezone",
                "Not a valid IANA timezone name",
            ));
        }

        if self.holidays.dataset_url.is_empty() {
            return Err(TarifaError::validation(
                "holidays.dataset_url",
                "URL cannot be empty",
            ));
        }

        if self.holidays.timeout_seconds == 0 {
            return Err(TarifaError::validation(
                "holidays.timeout_seconds",
                "Must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Parsed timezone for local-day computations
    pub fn tz(&self) -> chrono_tz::Tz {
        chrono_tz::Tz::from_str(&self.timezone).unwrap_or(chrono_tz::Europe::Madrid)
    }

    /// Whether the token-gated indicator set is active
    pub fn using_private_api(&self) -> bool {
        self.esios.use_api_token && !self.esios.api_token.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.zone, TariffZone::Peninsula);
        assert_eq!(config.refresh.price_interval_minutes, 30);
        assert_eq!(config.timezone, "Europe/Madrid");
        assert!(!config.using_private_api());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        // Power outside the regulated range
        config.power.p1_kw = 0.5;
        assert!(config.validate().is_err());

        // Reset and test token requirement
        config = Config::default();
        config.esios.use_api_token = true;
        assert!(config.validate().is_err());
        config.esios.api_token = "secret".to_string();
        assert!(config.validate().is_ok());

        // Bad timezone
        config = Config::default();
        config.timezone = "Mars/Olympus".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let deserialized: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.zone, deserialized.zone);
        assert_eq!(
            config.refresh.price_interval_minutes,
            deserialized.refresh.price_interval_minutes
        );
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str("zone: ceuta_melilla\n").unwrap();
        assert_eq!(config.zone, TariffZone::CeutaMelilla);
        assert_eq!(config.refresh.price_interval_minutes, 30);
        assert_eq!(config.fast_cadence, FastCadence::EveryMinute);
    }
}
