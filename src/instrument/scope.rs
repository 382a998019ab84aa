//! Oscilloscope controller.

use super::parse_reply;
use crate::adapters::ScpiAdapter;
use crate::error::{AppResult, BodeError};
use tracing::debug;

/// Timebase, vertical scale and measurement queries on the scope.
pub struct ScopeController {
    id: String,
    adapter: Box<dyn ScpiAdapter>,
}

impl ScopeController {
    /// Wrap an open adapter.
    pub fn new(id: impl Into<String>, adapter: Box<dyn ScpiAdapter>) -> Self {
        Self {
            id: id.into(),
            adapter,
        }
    }

    /// Controller id used in errors and logs.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Query `*IDN?`.
    ///
    /// # Errors
    ///
    /// `InstrumentCommand` on transport failure.
    pub async fn identify(&mut self) -> AppResult<String> {
        self.query_raw("*IDN?").await
    }

    /// Set the horizontal scale in s/div.
    ///
    /// The scope rounds to its nearest supported timebase; the applied value
    /// is not read back.
    ///
    /// # Errors
    ///
    /// `InstrumentCommand` on transport failure.
    pub async fn set_timebase(&mut self, seconds: f64) -> AppResult<()> {
        self.write(&format!(":TIM:MAIN:SCAL {}", seconds)).await
    }

    /// Set a channel's vertical scale in V/div.
    ///
    /// # Errors
    ///
    /// `InstrumentCommand` on transport failure. Callers treat this as
    /// non-fatal.
    pub async fn set_vertical_scale(&mut self, channel: u8, volts_per_div: f64) -> AppResult<()> {
        self.write(&format!(":CHAN{}:SCAL {}", channel, volts_per_div))
            .await
    }

    /// Read a channel's current vertical scale in V/div.
    ///
    /// # Errors
    ///
    /// `InstrumentCommand` or `MeasurementParse`.
    pub async fn vertical_scale(&mut self, channel: u8) -> AppResult<f64> {
        self.query_number(&format!(":CHAN{}:SCAL?", channel)).await
    }

    /// Measure a channel's RMS voltage.
    ///
    /// # Errors
    ///
    /// `InstrumentCommand` or `MeasurementParse`.
    pub async fn measure_vrms(&mut self, channel: u8) -> AppResult<f64> {
        self.query_number(&format!(":MEAS:ITEM? VRMS,CHAN{}", channel))
            .await
    }

    /// Measure the phase of `channel_a` relative to `channel_b` in degrees.
    ///
    /// # Errors
    ///
    /// `InstrumentCommand` or `MeasurementParse`.
    pub async fn measure_phase(&mut self, channel_a: u8, channel_b: u8) -> AppResult<f64> {
        self.query_number(&format!(
            ":MEAS:ITEM? RPH,CHAN{},CHAN{}",
            channel_a, channel_b
        ))
        .await
    }

    /// Release the adapter.
    ///
    /// # Errors
    ///
    /// `InstrumentCommand` if the adapter fails to close.
    pub async fn close(&mut self) -> AppResult<()> {
        self.adapter
            .close()
            .await
            .map_err(|e| BodeError::instrument(&self.id, "close", e))
    }

    async fn write(&mut self, command: &str) -> AppResult<()> {
        self.adapter
            .write(command)
            .await
            .map_err(|e| BodeError::instrument(&self.id, command, e))
    }

    async fn query_raw(&mut self, query: &str) -> AppResult<String> {
        self.adapter
            .query(query)
            .await
            .map_err(|e| BodeError::instrument(&self.id, query, e))
    }

    async fn query_number(&mut self, query: &str) -> AppResult<f64> {
        let response = self.query_raw(query).await?;
        let value = parse_reply(&self.id, query, &response)?;
        debug!("{}: {} -> {}", self.id, query, value);
        Ok(value)
    }
}
