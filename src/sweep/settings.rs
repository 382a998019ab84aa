//! Sweep parameters, tuning constants and channel assignments.
//!
//! These are plain values supplied once at startup. [`SweepConfiguration`]
//! holds the five operator-facing parameters; [`SweepTuning`] holds the
//! empirically tuned constants that shape timebase, settle delay and vertical
//! auto-ranging. Both are overridable through the configuration file.

use crate::error::{AppResult, BodeError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Operator-facing sweep parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfiguration {
    /// First stimulus frequency in Hz
    pub start_frequency_hz: f64,
    /// Geometric step factor, e.g. 1.05 for +5% per step
    pub frequency_multiplier: f64,
    /// Fixed settle time added to every step, in seconds
    pub settle_time_secs: f64,
    /// Sweep ends once the next frequency exceeds this value
    pub stop_frequency_hz: f64,
    /// Sweep ends once the measured Vout falls below this value
    pub stop_vout_volts: f64,
}

impl Default for SweepConfiguration {
    fn default() -> Self {
        Self {
            start_frequency_hz: 100.0,
            frequency_multiplier: 1.05,
            settle_time_secs: 0.7,
            stop_frequency_hz: 1e6,
            stop_vout_volts: 5e-6,
        }
    }
}

impl SweepConfiguration {
    /// Check the sweep invariants.
    ///
    /// # Errors
    ///
    /// Returns [`BodeError::Configuration`] naming the offending parameter.
    pub fn validate(&self) -> AppResult<()> {
        if !(self.start_frequency_hz.is_finite() && self.start_frequency_hz > 0.0) {
            return Err(BodeError::Configuration(format!(
                "start_frequency_hz must be > 0, got {}",
                self.start_frequency_hz
            )));
        }
        if !(self.frequency_multiplier.is_finite() && self.frequency_multiplier > 1.0) {
            return Err(BodeError::Configuration(format!(
                "frequency_multiplier must be > 1, got {}",
                self.frequency_multiplier
            )));
        }
        if !(self.settle_time_secs.is_finite() && self.settle_time_secs >= 0.0) {
            return Err(BodeError::Configuration(format!(
                "settle_time_secs must be >= 0, got {}",
                self.settle_time_secs
            )));
        }
        if !(self.stop_frequency_hz.is_finite() && self.stop_frequency_hz > self.start_frequency_hz)
        {
            return Err(BodeError::Configuration(format!(
                "stop_frequency_hz ({}) must be greater than start_frequency_hz ({})",
                self.stop_frequency_hz, self.start_frequency_hz
            )));
        }
        if !self.stop_vout_volts.is_finite() {
            return Err(BodeError::Configuration(format!(
                "stop_vout_volts must be finite, got {}",
                self.stop_vout_volts
            )));
        }
        Ok(())
    }
}

/// Empirically tuned constants.
///
/// The defaults were tuned on a DS1000Z scope with a 10x probe. Nothing here is
/// derived from first principles; adjust per bench.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepTuning {
    /// Timebase (s/div) is `settle_factor / frequency`; 0.4 keeps a few periods on screen
    pub settle_factor: f64,
    /// Horizontal divisions on the scope display
    pub horizontal_divisions: f64,
    /// Acquisition/render wait per displayed division, as a multiple of the timebase
    pub per_division_settle_multiplier: f64,
    /// Vertical divisions on the scope display
    pub vertical_divisions: f64,
    /// RMS-to-full-scale factor; 2*sqrt(2) is the sine peak-to-peak, plus margin
    pub margin_factor: f64,
    /// Rescale both channels after every measurement
    pub auto_range_enabled: bool,
    /// With auto-ranging off, beep on the generator when Vout would clip
    pub beep_on_overrange: bool,
}

impl Default for SweepTuning {
    fn default() -> Self {
        Self {
            settle_factor: 0.4,
            horizontal_divisions: 12.0,
            per_division_settle_multiplier: 10.0,
            vertical_divisions: 8.0,
            margin_factor: 3.2,
            auto_range_enabled: true,
            beep_on_overrange: false,
        }
    }
}

impl SweepTuning {
    /// Horizontal scale in s/div for the given stimulus frequency.
    pub fn timebase_for(&self, frequency_hz: f64) -> f64 {
        self.settle_factor / frequency_hz
    }

    /// Wait between applying a timebase and measuring.
    ///
    /// Long timebases need proportionally longer waits because the scope's
    /// acquisition cycle scales with the displayed time span.
    ///
    /// # Errors
    ///
    /// Returns [`BodeError::Configuration`] when the wait does not fit in a
    /// [`Duration`], which happens for vanishingly small frequencies.
    pub fn settle_delay(&self, settle_time_secs: f64, timebase_secs: f64) -> AppResult<Duration> {
        let secs = settle_time_secs
            + timebase_secs * self.horizontal_divisions * self.per_division_settle_multiplier;
        Duration::try_from_secs_f64(secs.max(0.0)).map_err(|e| {
            BodeError::Configuration(format!("settle delay of {} s is out of range: {}", secs, e))
        })
    }

    /// Vertical scale in V/div that fits a signal of the given RMS value.
    pub fn vertical_scale_for(&self, rms_volts: f64) -> f64 {
        rms_volts * self.margin_factor / self.vertical_divisions
    }

    /// Check that every constant is positive and finite.
    ///
    /// # Errors
    ///
    /// Returns [`BodeError::Configuration`] naming the offending constant.
    pub fn validate(&self) -> AppResult<()> {
        let constants = [
            ("settle_factor", self.settle_factor),
            ("horizontal_divisions", self.horizontal_divisions),
            (
                "per_division_settle_multiplier",
                self.per_division_settle_multiplier,
            ),
            ("vertical_divisions", self.vertical_divisions),
            ("margin_factor", self.margin_factor),
        ];
        for (name, value) in constants {
            if !(value.is_finite() && value > 0.0) {
                return Err(BodeError::Configuration(format!(
                    "tuning.{name} must be > 0, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Instrument channel assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelMap {
    /// Generator output driving the DUT
    pub source: u8,
    /// Scope channel probing the DUT input
    pub vin: u8,
    /// Scope channel probing the DUT output
    pub vout: u8,
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self {
            source: 1,
            vin: 1,
            vout: 3,
        }
    }
}

impl ChannelMap {
    /// Check channel numbers against a two-output generator and four-channel scope.
    ///
    /// # Errors
    ///
    /// Returns [`BodeError::Configuration`] for out-of-range or clashing channels.
    pub fn validate(&self) -> AppResult<()> {
        if !(1..=2).contains(&self.source) {
            return Err(BodeError::Configuration(format!(
                "channels.source must be 1 or 2, got {}",
                self.source
            )));
        }
        for (name, channel) in [("vin", self.vin), ("vout", self.vout)] {
            if !(1..=4).contains(&channel) {
                return Err(BodeError::Configuration(format!(
                    "channels.{name} must be 1-4, got {channel}"
                )));
            }
        }
        if self.vin == self.vout {
            return Err(BodeError::Configuration(format!(
                "channels.vin and channels.vout must differ, both are {}",
                self.vin
            )));
        }
        Ok(())
    }
}
