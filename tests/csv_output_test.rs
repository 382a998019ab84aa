//! CSV persistence for complete and aborted sweeps.
#![cfg(feature = "storage_csv")]

mod common;

use bode_sweep::adapters::sim_adapter::SimRole;
use bode_sweep::adapters::SimulatedBench;
use bode_sweep::data::{CsvWriter, FanoutSink, MemorySink};
use bode_sweep::sweep::{SweepTuning, TerminationReason};
use common::{run, sweep};

fn read_rows(path: &std::path::Path) -> Vec<Vec<String>> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| line.split(',').map(str::to_string).collect())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_sweep_writes_header_and_one_row_per_step() {
    let dir = tempfile::tempdir().unwrap();
    let writer = CsvWriter::create(dir.path()).unwrap();
    let path = writer.path().to_path_buf();
    let memory = MemorySink::new();
    let sink = FanoutSink::new()
        .with_sink(Box::new(writer))
        .with_sink(Box::new(memory.clone()));

    let report = run(
        &SimulatedBench::new(),
        sweep(120.0, 0.0),
        SweepTuning::default(),
        Box::new(sink),
    )
    .await;
    assert_eq!(report.reason, TerminationReason::FrequencyLimitReached);

    let rows = read_rows(&path);
    assert_eq!(
        rows[0],
        vec!["Time", "Milliseconds", "Index", "Freq", "Vin", "Vout", "dB", "Phase"]
    );
    assert_eq!(rows.len(), 5);

    let indices: Vec<&str> = rows[1..].iter().map(|r| r[2].as_str()).collect();
    assert_eq!(indices, vec!["0", "1", "2", "3"]);
    let frequencies: Vec<&str> = rows[1..].iter().map(|r| r[3].as_str()).collect();
    assert_eq!(frequencies, vec!["100", "105", "110.25", "115.76"]);

    // Time column: YYYY-mm-dd HH:MM:SS.ffffff
    let time = &rows[1][0];
    assert_eq!(time.len(), 26);
    assert_eq!(&time[10..11], " ");
    assert_eq!(&time[19..20], ".");

    for (row, record) in rows[1..].iter().zip(memory.records()) {
        assert_eq!(row[1], record.elapsed_millis.to_string());
        assert_eq!(row[6].parse::<f64>().unwrap(), record.gain_db);
    }
}

#[tokio::test(start_paused = true)]
async fn test_rows_survive_a_fault() {
    let dir = tempfile::tempdir().unwrap();
    let writer = CsvWriter::create(dir.path()).unwrap();
    let path = writer.path().to_path_buf();
    let bench = SimulatedBench::new();
    bench.inject_failure(SimRole::Scope, "RPH", 2, "no reply");

    let report = run(
        &bench,
        sweep(1e6, 0.0),
        SweepTuning::default(),
        Box::new(writer),
    )
    .await;

    assert_eq!(report.reason, TerminationReason::Fault);
    let rows = read_rows(&path);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2][2], "1");
}

#[tokio::test(start_paused = true)]
async fn test_zero_vin_writes_nan() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("zero_Bode.csv");
    let writer = CsvWriter::create_at(&path).unwrap();
    let bench = SimulatedBench::new();
    bench.inject_reply(SimRole::Scope, "VRMS,CHAN1", 0, "0");

    run(
        &bench,
        sweep(1e6, 2.0),
        SweepTuning::default(),
        Box::new(writer),
    )
    .await;

    let rows = read_rows(&path);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1][4], "0");
    assert_eq!(rows[1][6], "NaN");
}
