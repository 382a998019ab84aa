//! The sweep loop.
//!
//! One iteration: set frequency, apply timebase, settle, measure, rescale,
//! emit, advance, evaluate stop. The engine moves through
//! `Initializing -> Stepping -> Terminated(reason)` exactly once and always
//! shuts its sink down on the way out.

use super::cancel::CancelSignal;
use super::record::{next_frequency, Measurement, Record};
use super::settings::{ChannelMap, SweepConfiguration, SweepTuning};
use crate::data::RecordSink;
use crate::error::{AppResult, BodeError};
use crate::instrument::{ScopeController, StimulusController};
use chrono::Local;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Why the sweep stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The next frequency would exceed the stop frequency.
    FrequencyLimitReached,
    /// Vout fell below the stop amplitude.
    AmplitudeLimitReached,
    /// The cancellation flag was set.
    ExternallyCancelled,
    /// An instrument or sink error ended the sweep.
    Fault,
}

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepPhase {
    /// Constructed, not yet running.
    Initializing,
    /// Iterating.
    Stepping,
    /// Finished.
    Terminated(TerminationReason),
}

/// Outcome of [`SweepEngine::run`].
#[derive(Debug)]
pub struct SweepReport {
    /// Why the sweep stopped
    pub reason: TerminationReason,
    /// Records accepted by the sink
    pub records_emitted: u64,
    /// Frequency of the last emitted record
    pub last_frequency_hz: Option<f64>,
    /// The error behind a `Fault`
    pub fault: Option<BodeError>,
}

/// Mutable loop state, owned by the running engine.
#[derive(Debug)]
struct SweepState {
    current_frequency_hz: f64,
    step_index: u64,
    started_at: Instant,
}

/// Runs one sweep against borrowed controllers.
pub struct SweepEngine<'a> {
    config: SweepConfiguration,
    tuning: SweepTuning,
    channels: ChannelMap,
    stimulus: &'a mut StimulusController,
    scope: &'a mut ScopeController,
    sink: Box<dyn RecordSink>,
    cancel: CancelSignal,
    phase: SweepPhase,
}

impl<'a> SweepEngine<'a> {
    /// Validate the configuration and assemble an engine.
    ///
    /// # Errors
    ///
    /// `Configuration` if any parameter is invalid. No instrument is touched.
    pub fn new(
        config: SweepConfiguration,
        tuning: SweepTuning,
        channels: ChannelMap,
        stimulus: &'a mut StimulusController,
        scope: &'a mut ScopeController,
        sink: Box<dyn RecordSink>,
        cancel: CancelSignal,
    ) -> AppResult<Self> {
        config.validate()?;
        tuning.validate()?;
        channels.validate()?;
        // Longest wait of the sweep is at the start frequency
        tuning.settle_delay(
            config.settle_time_secs,
            tuning.timebase_for(config.start_frequency_hz),
        )?;
        Ok(Self {
            config,
            tuning,
            channels,
            stimulus,
            scope,
            sink,
            cancel,
            phase: SweepPhase::Initializing,
        })
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SweepPhase {
        self.phase
    }

    /// Run until a stop condition, cancellation or fault.
    pub async fn run(mut self) -> SweepReport {
        self.set_phase(SweepPhase::Stepping);
        info!(
            "Sweep started: {} Hz x{} up to {} Hz, stop below {} V",
            self.config.start_frequency_hz,
            self.config.frequency_multiplier,
            self.config.stop_frequency_hz,
            self.config.stop_vout_volts
        );

        let mut state = SweepState {
            current_frequency_hz: self.config.start_frequency_hz,
            step_index: 0,
            started_at: Instant::now(),
        };
        let mut records_emitted = 0;
        let mut last_frequency_hz = None;

        let outcome = loop {
            if self.cancel.is_cancelled() {
                info!("Sweep cancelled before step {}", state.step_index);
                break Ok(TerminationReason::ExternallyCancelled);
            }
            match self.step(&mut state).await {
                Ok((frequency_hz, stop)) => {
                    records_emitted += 1;
                    last_frequency_hz = Some(frequency_hz);
                    if let Some(reason) = stop {
                        break Ok(reason);
                    }
                }
                Err(e) => break Err(e),
            }
        };

        let (mut reason, mut fault) = match outcome {
            Ok(reason) => (reason, None),
            Err(e) => {
                error!("Sweep fault at step {}: {}", state.step_index, e);
                (TerminationReason::Fault, Some(e))
            }
        };

        if let Err(e) = self.sink.shutdown().await {
            error!("Failed to close record sink: {}", e);
            if fault.is_none() {
                reason = TerminationReason::Fault;
                fault = Some(e);
            }
        }

        self.set_phase(SweepPhase::Terminated(reason));
        info!(
            "Sweep terminated: {:?} after {} records",
            reason, records_emitted
        );
        SweepReport {
            reason,
            records_emitted,
            last_frequency_hz,
            fault,
        }
    }

    /// One full iteration. Returns the frequency measured and, when the sweep
    /// should end, the reason.
    async fn step(
        &mut self,
        state: &mut SweepState,
    ) -> AppResult<(f64, Option<TerminationReason>)> {
        let frequency_hz = state.current_frequency_hz;
        self.stimulus.set_frequency(frequency_hz).await?;

        let timebase = self.tuning.timebase_for(frequency_hz);
        self.scope.set_timebase(timebase).await?;

        let delay = self
            .tuning
            .settle_delay(self.config.settle_time_secs, timebase)?;
        debug!(
            "Step {}: {} Hz, timebase {} s/div, settling {:?}",
            state.step_index, frequency_hz, timebase, delay
        );
        tokio::time::sleep(delay).await;

        let measurement = self.measure().await?;
        let wall_clock_time = Local::now();
        let elapsed_millis =
            u64::try_from(state.started_at.elapsed().as_millis()).unwrap_or(u64::MAX);

        if measurement.vin_rms == 0.0 {
            warn!(
                "Vin is zero at {} Hz; gain recorded as NaN",
                frequency_hz
            );
        }

        self.adjust_vertical_scale(&measurement).await;

        let record = Record::from_measurement(
            wall_clock_time,
            elapsed_millis,
            state.step_index,
            frequency_hz,
            &measurement,
        );
        self.sink.write(&record).await?;
        debug!(
            "Record {}: {} Hz, {:.3} dB, {:.2} deg",
            record.step_index, record.frequency_hz, record.gain_db, record.phase_deg
        );

        state.current_frequency_hz =
            next_frequency(frequency_hz, self.config.frequency_multiplier);
        state.step_index += 1;

        let stop = stop_reason(
            &self.config,
            state.current_frequency_hz,
            measurement.vout_rms,
        );
        Ok((frequency_hz, stop))
    }

    async fn measure(&mut self) -> AppResult<Measurement> {
        let vin_rms = self.scope.measure_vrms(self.channels.vin).await?;
        let vout_rms = self.scope.measure_vrms(self.channels.vout).await?;
        let phase_deg = self
            .scope
            .measure_phase(self.channels.vout, self.channels.vin)
            .await?;
        Ok(Measurement {
            vin_rms,
            vout_rms,
            phase_deg,
        })
    }

    /// Best-effort: failures here are logged and never end the sweep.
    async fn adjust_vertical_scale(&mut self, measurement: &Measurement) {
        if self.tuning.auto_range_enabled {
            let targets = [
                (self.channels.vin, measurement.vin_rms),
                (self.channels.vout, measurement.vout_rms),
            ];
            for (channel, rms) in targets {
                let scale = self.tuning.vertical_scale_for(rms);
                if let Err(e) = self.scope.set_vertical_scale(channel, scale).await {
                    warn!("Vertical scale on CH{} not applied: {}", channel, e);
                }
            }
        } else if self.tuning.beep_on_overrange {
            let channel = self.channels.vout;
            let needed = self.tuning.vertical_scale_for(measurement.vout_rms);
            match self.scope.vertical_scale(channel).await {
                Ok(current) if needed > current => {
                    warn!(
                        "CH{} over range: needs {} V/div, set to {} V/div",
                        channel, needed, current
                    );
                    if let Err(e) = self.stimulus.beep().await {
                        warn!("Over-range beep failed: {}", e);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Could not read CH{} scale: {}", channel, e),
            }
        }
    }

    fn set_phase(&mut self, phase: SweepPhase) {
        debug!("Sweep phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }
}

/// Stop test applied after each iteration.
///
/// Either limit ends the sweep. The frequency limit is checked first.
pub fn stop_reason(
    config: &SweepConfiguration,
    next_frequency_hz: f64,
    vout_rms: f64,
) -> Option<TerminationReason> {
    if next_frequency_hz > config.stop_frequency_hz {
        Some(TerminationReason::FrequencyLimitReached)
    } else if vout_rms < config.stop_vout_volts {
        Some(TerminationReason::AmplitudeLimitReached)
    } else {
        None
    }
}
