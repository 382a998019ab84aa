//! Common fixtures for bode_sweep integration tests
//!
//! Every test drives the engine against a `SimulatedBench` on a paused tokio
//! clock, so settle delays cost no wall time and elapsed times are exact to
//! the timer's 1 ms resolution.

#![allow(dead_code)] // Not every test file uses every helper

use bode_sweep::adapters::SimulatedBench;
use bode_sweep::data::RecordSink;
use bode_sweep::instrument::{ScopeController, StimulusController};
use bode_sweep::sweep::{
    cancel_pair, ChannelMap, SweepConfiguration, SweepEngine, SweepReport, SweepTuning,
};

/// Controllers wired to a simulated bench.
pub fn controllers(bench: &SimulatedBench) -> (StimulusController, ScopeController) {
    (
        StimulusController::new("generator", 1, Box::new(bench.generator())),
        ScopeController::new("scope", Box::new(bench.scope())),
    )
}

/// 100 Hz start, x1.05 per step, no extra settle time.
pub fn sweep(stop_frequency_hz: f64, stop_vout_volts: f64) -> SweepConfiguration {
    SweepConfiguration {
        start_frequency_hz: 100.0,
        frequency_multiplier: 1.05,
        settle_time_secs: 0.0,
        stop_frequency_hz,
        stop_vout_volts,
    }
}

/// Run a sweep to completion with no cancellation.
pub async fn run(
    bench: &SimulatedBench,
    config: SweepConfiguration,
    tuning: SweepTuning,
    sink: Box<dyn RecordSink>,
) -> SweepReport {
    let (mut stimulus, mut scope) = controllers(bench);
    let (_cancel, signal) = cancel_pair();
    let engine = SweepEngine::new(
        config,
        tuning,
        ChannelMap::default(),
        &mut stimulus,
        &mut scope,
        sink,
        signal,
    )
    .expect("valid sweep configuration");
    engine.run().await
}

/// Assert two millisecond counts agree within the timer's rounding.
pub fn assert_millis_near(actual: u64, expected: f64, context: &str) {
    let diff = (actual as f64 - expected).abs();
    assert!(
        diff <= 2.0,
        "{}: expected ~{} ms, got {} ms",
        context,
        expected,
        actual
    );
}
