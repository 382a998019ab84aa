//! Signal generator controller.

use crate::adapters::ScpiAdapter;
use crate::error::{AppResult, BodeError};
use tracing::debug;

/// Drives the generator output feeding the DUT.
pub struct StimulusController {
    id: String,
    channel: u8,
    adapter: Box<dyn ScpiAdapter>,
}

impl StimulusController {
    /// Wrap an open adapter. `channel` is the generator output (1 or 2).
    pub fn new(id: impl Into<String>, channel: u8, adapter: Box<dyn ScpiAdapter>) -> Self {
        Self {
            id: id.into(),
            channel,
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
        let query = "*IDN?";
        self.adapter
            .query(query)
            .await
            .map_err(|e| BodeError::instrument(&self.id, query, e))
    }

    /// Set the output frequency in Hz.
    ///
    /// # Errors
    ///
    /// `InstrumentCommand` on transport failure. Not retried.
    pub async fn set_frequency(&mut self, hz: f64) -> AppResult<()> {
        let command = format!(":SOUR{}:FREQ {}", self.channel, hz);
        self.write(&command).await?;
        debug!("{}: frequency set to {} Hz", self.id, hz);
        Ok(())
    }

    /// Sound the front-panel beeper.
    ///
    /// # Errors
    ///
    /// `InstrumentCommand` on transport failure.
    pub async fn beep(&mut self) -> AppResult<()> {
        self.write(":SYST:BEEP:IMM").await
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
}
