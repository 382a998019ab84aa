//! End-to-end sweep behaviour against the simulated bench.

mod common;

use bode_sweep::adapters::sim_adapter::SimRole;
use bode_sweep::adapters::SimulatedBench;
use bode_sweep::data::MemorySink;
use bode_sweep::error::BodeError;
use bode_sweep::sweep::{
    cancel_pair, ChannelMap, SweepConfiguration, SweepEngine, SweepTuning, TerminationReason,
};
use common::{assert_millis_near, controllers, run, sweep};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_records_are_ordered_and_rounded() {
    let bench = SimulatedBench::new();
    let sink = MemorySink::new();

    let report = run(
        &bench,
        sweep(120.0, 0.0),
        SweepTuning::default(),
        Box::new(sink.clone()),
    )
    .await;

    // 100 -> 105 -> 110.25 -> 115.76 -> 121.55 (> 120)
    assert_eq!(report.reason, TerminationReason::FrequencyLimitReached);
    assert_eq!(report.records_emitted, 4);
    assert_eq!(report.last_frequency_hz, Some(115.76));
    assert!(report.fault.is_none());

    let records = sink.records();
    let indices: Vec<u64> = records.iter().map(|r| r.step_index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
    let frequencies: Vec<f64> = records.iter().map(|r| r.frequency_hz).collect();
    assert_eq!(frequencies, vec![100.0, 105.0, 110.25, 115.76]);
    assert!(sink.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_frequency_strictly_increases() {
    let bench = SimulatedBench::new();
    let sink = MemorySink::new();
    let config = SweepConfiguration {
        start_frequency_hz: 0.05,
        frequency_multiplier: 1.01,
        settle_time_secs: 0.0,
        stop_frequency_hz: 0.5,
        stop_vout_volts: 0.0,
    };

    let report = run(&bench, config, SweepTuning::default(), Box::new(sink.clone())).await;
    assert_eq!(report.reason, TerminationReason::FrequencyLimitReached);

    let records = sink.records();
    assert!(records.len() > 10);
    for pair in records.windows(2) {
        assert!(
            pair[1].frequency_hz > pair[0].frequency_hz,
            "{} did not advance past {}",
            pair[1].frequency_hz,
            pair[0].frequency_hz
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_amplitude_stop_after_first_record() {
    let bench = SimulatedBench::new();
    let sink = MemorySink::new();

    // Stop frequency is unreachable; the first Vout (~0.995 V) is below 2 V.
    let report = run(
        &bench,
        sweep(1e6, 2.0),
        SweepTuning::default(),
        Box::new(sink.clone()),
    )
    .await;

    assert_eq!(report.reason, TerminationReason::AmplitudeLimitReached);
    assert_eq!(sink.records().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_low_pass_rolls_off_to_amplitude_limit() {
    let bench = SimulatedBench::new().with_corner_frequency(1_000.0);
    let sink = MemorySink::new();

    let report = run(
        &bench,
        sweep(1e6, 0.1),
        SweepTuning::default(),
        Box::new(sink.clone()),
    )
    .await;

    assert_eq!(report.reason, TerminationReason::AmplitudeLimitReached);
    let records = sink.records();
    let last = records.last().unwrap();
    assert!(last.vout_rms < 0.1);
    // First order: about -20 dB and -84 degrees a decade past the corner
    assert!(last.frequency_hz > 9_000.0 && last.frequency_hz < 11_000.0);
    assert!((last.gain_db - (-20.0)).abs() < 0.5);
    assert!(last.phase_deg < -80.0);
    for pair in records.windows(2) {
        assert!(pair[1].gain_db < pair[0].gain_db);
    }
}

#[tokio::test(start_paused = true)]
async fn test_command_order_per_iteration() {
    let bench = SimulatedBench::new();
    let report = run(
        &bench,
        sweep(1e6, 2.0),
        SweepTuning::default(),
        Box::new(MemorySink::new()),
    )
    .await;
    assert_eq!(report.records_emitted, 1);

    let log = bench.call_log();
    assert_eq!(log.len(), 7, "{:?}", log);
    assert_eq!(log[0], "generator: :SOUR1:FREQ 100");
    assert!(log[1].starts_with("scope: :TIM:MAIN:SCAL "));
    assert_eq!(log[2], "scope: :MEAS:ITEM? VRMS,CHAN1");
    assert_eq!(log[3], "scope: :MEAS:ITEM? VRMS,CHAN3");
    assert_eq!(log[4], "scope: :MEAS:ITEM? RPH,CHAN3,CHAN1");
    assert!(log[5].starts_with("scope: :CHAN1:SCAL "));
    assert!(log[6].starts_with("scope: :CHAN3:SCAL "));

    assert!((bench.timebase().unwrap() - 0.004).abs() < 1e-12);
    assert!((bench.channel_scale(1).unwrap() - 0.4).abs() < 1e-6);
    let vout = 1.0 / (1.0f64 + 0.01).sqrt();
    assert!((bench.channel_scale(3).unwrap() - vout * 0.4).abs() < 1e-6);
}

#[tokio::test(start_paused = true)]
async fn test_settle_delay_follows_timebase() {
    let bench = SimulatedBench::new();
    let sink = MemorySink::new();
    let config = SweepConfiguration {
        settle_time_secs: 0.7,
        ..sweep(110.0, 0.0)
    };

    run(&bench, config, SweepTuning::default(), Box::new(sink.clone())).await;

    let records = sink.records();
    assert_eq!(records.len(), 2);
    // 0.7 + 0.4/f * 12 * 10
    let first = 700.0 + 0.4 / 100.0 * 120.0 * 1000.0;
    let second = 700.0 + 0.4 / 105.0 * 120.0 * 1000.0;
    assert_millis_near(records[0].elapsed_millis, first, "first settle");
    assert_millis_near(
        records[1].elapsed_millis - records[0].elapsed_millis,
        second,
        "second settle",
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_settle_completes_iteration() {
    let bench = SimulatedBench::new();
    let sink = MemorySink::new();
    let (mut stimulus, mut scope) = controllers(&bench);
    let (cancel, signal) = cancel_pair();
    let config = SweepConfiguration {
        settle_time_secs: 0.7,
        ..sweep(1e6, 0.0)
    };
    let engine = SweepEngine::new(
        config,
        SweepTuning::default(),
        ChannelMap::default(),
        &mut stimulus,
        &mut scope,
        Box::new(sink.clone()),
        signal,
    )
    .unwrap();

    // First settle lasts 1.18 s; cancel lands inside it.
    let (report, ()) = tokio::join!(engine.run(), async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();
    });

    assert_eq!(report.reason, TerminationReason::ExternallyCancelled);
    assert_eq!(report.records_emitted, 1);
    assert_eq!(sink.records().len(), 1);
    assert!(sink.is_closed());
    // Nothing was sent after the cancelled iteration
    assert_eq!(bench.call_log().len(), 7);
}

#[tokio::test(start_paused = true)]
async fn test_non_numeric_reply_faults_without_record() {
    let bench = SimulatedBench::new();
    bench.inject_reply(SimRole::Scope, "VRMS,CHAN3", 1, "****");
    let sink = MemorySink::new();

    let report = run(
        &bench,
        sweep(1e6, 0.0),
        SweepTuning::default(),
        Box::new(sink.clone()),
    )
    .await;

    assert_eq!(report.reason, TerminationReason::Fault);
    assert_eq!(report.records_emitted, 1);
    assert_eq!(sink.records().len(), 1);
    assert!(sink.is_closed());
    match report.fault {
        Some(BodeError::MeasurementParse {
            query, response, ..
        }) => {
            assert_eq!(query, ":MEAS:ITEM? VRMS,CHAN3");
            assert_eq!(response, "****");
        }
        other => panic!("unexpected fault: {:?}", other),
    }
    // Phase is never queried for the faulting iteration
    let log = bench.call_log();
    assert_eq!(log.last().unwrap(), "scope: :MEAS:ITEM? VRMS,CHAN3");
}

#[tokio::test(start_paused = true)]
async fn test_generator_failure_faults() {
    let bench = SimulatedBench::new();
    bench.inject_failure(SimRole::Generator, ":FREQ", 2, "VI_ERROR_TMO");
    let sink = MemorySink::new();

    let report = run(
        &bench,
        sweep(1e6, 0.0),
        SweepTuning::default(),
        Box::new(sink.clone()),
    )
    .await;

    assert_eq!(report.reason, TerminationReason::Fault);
    assert_eq!(sink.records().len(), 2);
    assert_eq!(report.last_frequency_hz, Some(105.0));
    match report.fault {
        Some(BodeError::InstrumentCommand {
            instrument,
            command,
            message,
        }) => {
            assert_eq!(instrument, "generator");
            assert_eq!(command, ":SOUR1:FREQ 110.25");
            assert!(message.contains("VI_ERROR_TMO"));
        }
        other => panic!("unexpected fault: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_sink_failure_is_fatal() {
    let bench = SimulatedBench::new();
    let sink = MemorySink::new().fail_after(2);

    let report = run(
        &bench,
        sweep(1e6, 0.0),
        SweepTuning::default(),
        Box::new(sink.clone()),
    )
    .await;

    assert_eq!(report.reason, TerminationReason::Fault);
    assert_eq!(report.records_emitted, 2);
    assert!(matches!(report.fault, Some(BodeError::Storage(_))));
    assert!(sink.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_zero_vin_records_nan_gain() {
    let bench = SimulatedBench::new();
    bench.inject_reply(SimRole::Scope, "VRMS,CHAN1", 0, "0.000000e0");
    let sink = MemorySink::new();

    let report = run(
        &bench,
        sweep(110.0, 0.0),
        SweepTuning::default(),
        Box::new(sink.clone()),
    )
    .await;

    assert_eq!(report.reason, TerminationReason::FrequencyLimitReached);
    let records = sink.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].vin_rms, 0.0);
    assert!(records[0].gain_db.is_nan());
    assert!(records[1].gain_db.is_finite());
}

#[tokio::test(start_paused = true)]
async fn test_auto_range_disabled_leaves_scales() {
    let bench = SimulatedBench::new();
    let tuning = SweepTuning {
        auto_range_enabled: false,
        ..SweepTuning::default()
    };

    run(&bench, sweep(110.0, 0.0), tuning, Box::new(MemorySink::new())).await;

    assert!(bench.call_log().iter().all(|c| !c.contains(":SCAL ")
        || c.contains(":TIM:MAIN:SCAL ")));
    assert_eq!(bench.channel_scale(3), Some(1.0));
    assert_eq!(bench.beeps(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_overrange_beeps_when_auto_range_disabled() {
    let tuning = SweepTuning {
        auto_range_enabled: false,
        beep_on_overrange: true,
        ..SweepTuning::default()
    };

    // 5 Vrms needs ~2 V/div on an 8-division screen; CH3 sits at 1 V/div.
    let loud = SimulatedBench::new().with_source_amplitude(5.0);
    run(&loud, sweep(1e6, 10.0), tuning.clone(), Box::new(MemorySink::new())).await;
    assert_eq!(loud.beeps(), 1);
    assert!(loud
        .call_log()
        .contains(&"scope: :CHAN3:SCAL?".to_string()));
    assert!(loud
        .call_log()
        .contains(&"generator: :SYST:BEEP:IMM".to_string()));

    let quiet = SimulatedBench::new();
    run(&quiet, sweep(1e6, 10.0), tuning, Box::new(MemorySink::new())).await;
    assert_eq!(quiet.beeps(), 0);
}
