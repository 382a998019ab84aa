//! Layered configuration using Figment
//!
//! Values are resolved in this order (later wins):
//! 1. Built-in defaults
//! 2. TOML file (`config/bode.toml` unless `--config` says otherwise)
//! 3. Environment variables prefixed with `BODE_`, nested keys split on `__`
//! 4. Command-line overrides
//!
//! ```text
//! BODE_APPLICATION__LOG_LEVEL=debug
//! BODE_INSTRUMENTS__SCOPE__RESOURCE="TCPIP0::192.168.1.51::5555::SOCKET"
//! BODE_SWEEP__STOP_FREQUENCY_HZ=250000
//! BODE_TUNING__AUTO_RANGE_ENABLED=false
//! ```
//!
//! A missing TOML file is not an error; defaults and the other layers still
//! apply.

use crate::error::{AppResult, BodeError};
use crate::sweep::{ChannelMap, SweepConfiguration, SweepTuning};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/bode.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BodeConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Generator and scope connections
    pub instruments: InstrumentsConfig,
    /// Channel assignments
    pub channels: ChannelMap,
    /// Sweep parameters
    pub sweep: SweepConfiguration,
    /// Timing and scaling constants
    pub tuning: SweepTuning,
    /// Output location
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "bode_sweep".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Both instrument connections
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentsConfig {
    /// Signal generator
    pub generator: InstrumentConfig,
    /// Oscilloscope
    pub scope: InstrumentConfig,
}

/// One instrument connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// VISA or socket resource string
    pub resource: String,
    /// Transport timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            resource: String::new(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl InstrumentConfig {
    /// Transport timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory receiving `<timestamp>_Bode.csv`
    pub output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
        }
    }
}

fn default_timeout_ms() -> u64 {
    5000
}

// ============================================================================
// Command-line overrides
// ============================================================================

/// Values supplied on the command line. `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    /// Overrides for `[instruments]`
    pub instruments: InstrumentOverrides,
    /// Overrides for `[sweep]`
    pub sweep: SweepOverrides,
    /// Overrides for `[tuning]`
    pub tuning: TuningOverrides,
    /// Overrides for `[storage]`
    pub storage: StorageOverrides,
}

/// Resource overrides
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstrumentOverrides {
    /// Generator resource override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator: Option<ResourceOverride>,
    /// Scope resource override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<ResourceOverride>,
}

/// A single resource string override
#[derive(Debug, Clone, Serialize)]
pub struct ResourceOverride {
    /// Resource string
    pub resource: String,
}

/// Sweep parameter overrides
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepOverrides {
    /// Start frequency in Hz
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_frequency_hz: Option<f64>,
    /// Frequency multiplier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_multiplier: Option<f64>,
    /// Settle time in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settle_time_secs: Option<f64>,
    /// Stop frequency in Hz
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_frequency_hz: Option<f64>,
    /// Stop amplitude in V
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_vout_volts: Option<f64>,
}

/// Tuning overrides
#[derive(Debug, Clone, Default, Serialize)]
pub struct TuningOverrides {
    /// Vertical auto-ranging toggle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_range_enabled: Option<bool>,
}

/// Storage overrides
#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageOverrides {
    /// Output directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl BodeConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    ///
    /// # Errors
    ///
    /// `ConfigLoad` if a layer cannot be parsed, `Configuration` if the
    /// merged result is invalid.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH, &ConfigOverrides::default())
    }

    /// Load from a specific TOML file, the environment and CLI overrides.
    ///
    /// # Errors
    ///
    /// `ConfigLoad` if a layer cannot be parsed, `Configuration` if the
    /// merged result is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P, overrides: &ConfigOverrides) -> AppResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("BODE_").split("__"))
            .merge(Serialized::defaults(overrides))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Instrument timeouts are non-zero
    /// - Channel assignments fit the instruments
    /// - Sweep parameters and tuning constants
    ///
    /// Resource strings are checked separately by
    /// [`require_instruments`](Self::require_instruments) because simulated
    /// runs do not need them.
    ///
    /// # Errors
    ///
    /// `Configuration` with a descriptive message for the first failure.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(BodeError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        for (role, instrument) in self.instrument_roles() {
            if instrument.timeout_ms == 0 {
                return Err(BodeError::Configuration(format!(
                    "instruments.{role}.timeout_ms must be > 0"
                )));
            }
        }

        self.channels.validate()?;
        self.sweep.validate()?;
        self.tuning.validate()?;
        Ok(())
    }

    /// Check that both resource strings are set.
    ///
    /// # Errors
    ///
    /// `Configuration` naming the missing resource.
    pub fn require_instruments(&self) -> AppResult<()> {
        for (role, instrument) in self.instrument_roles() {
            if instrument.resource.trim().is_empty() {
                return Err(BodeError::Configuration(format!(
                    "instruments.{role}.resource is not set"
                )));
            }
        }
        Ok(())
    }

    fn instrument_roles(&self) -> [(&'static str, &InstrumentConfig); 2] {
        [
            ("generator", &self.instruments.generator),
            ("scope", &self.instruments.scope),
        ]
    }
}
