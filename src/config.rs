//! Configuration management for Elspot
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files, with defensive normalization of the market
//! and pricing parameters regardless of where they came from.

use crate::error::{ElspotError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Lowest VAT percentage accepted before falling back to the default
pub const DEFAULT_VAT_PERCENT: f64 = 25.0;

/// Default fixed cost in minor currency units per kWh
pub const DEFAULT_FIXED_COST_MINOR_PER_KWH: f64 = 0.0;

/// Fixed cost values outside this bound are treated as garbage
pub const FIXED_COST_MINOR_PER_KWH_BOUND: f64 = 10_000.0;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Market query configuration (area, currency, resolution)
    pub market: MarketConfig,

    /// Consumer cost formula configuration
    pub pricing: PricingConfig,

    /// Fetch/resync schedule configuration
    pub schedule: ScheduleConfig,

    /// Durable blob storage configuration
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Polling interval of the orchestration loop in milliseconds
    pub poll_interval_ms: u64,

    /// IANA timezone the market area trades in (local slot times)
    pub timezone: String,
}

/// Market query parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Base URL of the day-ahead price index endpoint
    pub api_base_url: String,

    /// Delivery area / index name (e.g. SE3, FI, NO1)
    pub area: String,

    /// Currency code to request prices in
    pub currency: String,

    /// Slot resolution in minutes (15, 30 or 60)
    pub resolution_minutes: u16,
}

/// Consumer cost formula parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// VAT percentage applied on top of the raw energy price
    pub vat_percent: f64,

    /// Fixed cost in minor currency units per kWh (grid fee, margin)
    pub fixed_cost_minor_per_kwh: f64,
}

/// Fetch and clock-resync schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Local hour of the daily fetch (tomorrow's prices publish ~13:00 CET)
    pub daily_fetch_hour: u32,

    /// Local minute of the daily fetch
    pub daily_fetch_minute: u32,

    /// Retry interval when a fetch returned unchanged or reduced data
    pub retry_unchanged_secs: i64,

    /// Retry interval while the displayed state is an error state
    pub retry_on_error_secs: i64,

    /// Steady-state clock resync interval
    pub clock_resync_interval_secs: i64,

    /// Retry interval after a failed clock resync
    pub clock_resync_retry_secs: i64,
}

/// Durable storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the persisted blobs (history, snapshot cache)
    pub dir: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console-specific level override
    pub console_level: Option<String>,

    /// Optional file-specific level override
    pub file_level: Option<String>,

    /// Path to log file or log directory
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://dataportal-api.nordpoolgroup.com/api/DayAheadPriceIndices"
                .to_string(),
            area: "SE3".to_string(),
            currency: "SEK".to_string(),
            resolution_minutes: 60,
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            vat_percent: DEFAULT_VAT_PERCENT,
            fixed_cost_minor_per_kwh: DEFAULT_FIXED_COST_MINOR_PER_KWH,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_fetch_hour: 13,
            daily_fetch_minute: 0,
            retry_unchanged_secs: 10 * 60,
            retry_on_error_secs: 30,
            clock_resync_interval_secs: 6 * 60 * 60,
            clock_resync_retry_secs: 10 * 60,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: "/data/elspot".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            file: "/tmp/elspot.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            market: MarketConfig::default(),
            pricing: PricingConfig::default(),
            schedule: ScheduleConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            poll_interval_ms: 1000,
            timezone: "Europe/Stockholm".to_string(),
        }
    }
}

impl PricingConfig {
    /// VAT percentage with out-of-range or non-finite values replaced by the default
    pub fn normalized_vat_percent(&self) -> f64 {
        let v = self.vat_percent;
        if !v.is_finite() || !(0.0..=100.0).contains(&v) {
            return DEFAULT_VAT_PERCENT;
        }
        v
    }

    /// Fixed cost with out-of-range or non-finite values replaced by the default
    pub fn normalized_fixed_cost_minor_per_kwh(&self) -> f64 {
        let v = self.fixed_cost_minor_per_kwh;
        if !v.is_finite() || v.abs() > FIXED_COST_MINOR_PER_KWH_BOUND {
            return DEFAULT_FIXED_COST_MINOR_PER_KWH;
        }
        v
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from default locations, falling back to defaults
    pub fn load() -> Result<Self> {
        let default_paths = [
            "elspot_config.yaml",
            "/data/elspot_config.yaml",
            "/etc/elspot/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

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
        if self.market.area.is_empty() {
            return Err(ElspotError::validation(
                "market.area",
                "Area code cannot be empty",
            ));
        }

        if self.market.currency.len() != 3 {
            return Err(ElspotError::validation(
                "market.currency",
                "Currency must be a 3-letter code",
            ));
        }

        if self.schedule.daily_fetch_hour >= 24 {
            return Err(ElspotError::validation(
                "schedule.daily_fetch_hour",
                "Hour must be 0-23",
            ));
        }

        if self.schedule.daily_fetch_minute >= 60 {
            return Err(ElspotError::validation(
                "schedule.daily_fetch_minute",
                "Minute must be 0-59",
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(ElspotError::validation(
                "poll_interval_ms",
                "Must be greater than 0",
            ));
        }

        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(ElspotError::validation(
                "timezone",
                "Not a valid IANA timezone",
            ));
        }

        Ok(())
    }
}
