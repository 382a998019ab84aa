//! Per-iteration values: the raw measurement triple and the emitted record.

use chrono::{DateTime, Local};

/// CSV/console header, in column order of [`Record::fields`].
pub const RECORD_HEADER: [&str; 8] = [
    "Time",
    "Milliseconds",
    "Index",
    "Freq",
    "Vin",
    "Vout",
    "dB",
    "Phase",
];

/// One scope query triple, taken at a single instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// RMS voltage at the DUT input
    pub vin_rms: f64,
    /// RMS voltage at the DUT output
    pub vout_rms: f64,
    /// Output-to-input phase in degrees
    pub phase_deg: f64,
}

impl Measurement {
    /// Gain of this measurement in dB.
    pub fn gain_db(&self) -> f64 {
        gain_db(self.vin_rms, self.vout_rms)
    }
}

/// `20 * log10(vout / vin)`.
///
/// Returns NaN when `vin_rms` is zero; the caller records it rather than
/// aborting since Vin, Vout and phase remain meaningful.
pub fn gain_db(vin_rms: f64, vout_rms: f64) -> f64 {
    if vin_rms == 0.0 {
        return f64::NAN;
    }
    20.0 * (vout_rms / vin_rms).log10()
}

/// Round to two decimal places (hundredths of a hertz).
///
/// Rounds the exact binary value, so `79978.184999...` goes down even though
/// `value * 100.0` would land on `.5`.
pub fn round_hundredths(value: f64) -> f64 {
    format!("{:.2}", value).parse().unwrap_or(value)
}

/// Next frequency in the geometric progression.
///
/// Rounded to 0.01 Hz at every step. At very low frequencies rounding can swallow
/// the increment, so the result is forced at least one hundredth above `current`.
pub fn next_frequency(current_hz: f64, multiplier: f64) -> f64 {
    let next = round_hundredths(current_hz * multiplier);
    if next > current_hz {
        next
    } else {
        round_hundredths(current_hz + 0.01)
    }
}

/// One completed sweep iteration, as handed to a record sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Local wall-clock time at measurement
    pub wall_clock_time: DateTime<Local>,
    /// Milliseconds since the sweep started
    pub elapsed_millis: u64,
    /// Zero-based iteration index
    pub step_index: u64,
    /// Stimulus frequency in Hz
    pub frequency_hz: f64,
    /// RMS voltage at the DUT input
    pub vin_rms: f64,
    /// RMS voltage at the DUT output
    pub vout_rms: f64,
    /// Gain in dB, NaN when `vin_rms` is zero
    pub gain_db: f64,
    /// Output-to-input phase in degrees
    pub phase_deg: f64,
}

impl Record {
    /// Build a record from a measurement.
    pub fn from_measurement(
        wall_clock_time: DateTime<Local>,
        elapsed_millis: u64,
        step_index: u64,
        frequency_hz: f64,
        measurement: &Measurement,
    ) -> Self {
        Self {
            wall_clock_time,
            elapsed_millis,
            step_index,
            frequency_hz,
            vin_rms: measurement.vin_rms,
            vout_rms: measurement.vout_rms,
            gain_db: measurement.gain_db(),
            phase_deg: measurement.phase_deg,
        }
    }

    /// Row values in [`RECORD_HEADER`] order.
    pub fn fields(&self) -> [String; 8] {
        [
            self.wall_clock_time
                .format("%Y-%m-%d %H:%M:%S%.6f")
                .to_string(),
            self.elapsed_millis.to_string(),
            self.step_index.to_string(),
            self.frequency_hz.to_string(),
            self.vin_rms.to_string(),
            self.vout_rms.to_string(),
            self.gain_db.to_string(),
            self.phase_deg.to_string(),
        ]
    }

    /// Comma-joined row, as echoed to the console.
    pub fn to_row(&self) -> String {
        self.fields().join(",")
    }
}
