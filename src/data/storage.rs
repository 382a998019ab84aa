//! Record sinks with clean feature flag handling.
use crate::error::{AppResult, BodeError};
use crate::sweep::record::{Record, RECORD_HEADER};
use async_trait::async_trait;
use std::io::{Stdout, Write};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Destination for sweep records.
///
/// The engine awaits every `write` before starting the next iteration, so
/// records arrive in strictly increasing `step_index` order. `shutdown` is
/// called exactly once, on every termination path.
#[async_trait]
pub trait RecordSink: Send {
    /// Persist one record.
    async fn write(&mut self, record: &Record) -> AppResult<()>;

    /// Flush and close. Further writes fail.
    async fn shutdown(&mut self) -> AppResult<()>;
}

// ============================================================================
// CSV Writer
// ============================================================================

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use std::fs::{File, OpenOptions};
    use std::path::{Path, PathBuf};

    /// One CSV file per sweep, flushed to disk after every row.
    pub struct CsvWriter {
        path: PathBuf,
        writer: Option<csv::Writer<File>>,
    }

    impl CsvWriter {
        /// Create `<output_dir>/<YYYYmmdd_HHMMSS>_Bode.csv`, creating the
        /// directory if needed.
        ///
        /// # Errors
        ///
        /// `Io` if the directory cannot be created or the file already exists.
        pub fn create(output_dir: &Path) -> AppResult<Self> {
            if !output_dir.exists() {
                std::fs::create_dir_all(output_dir)?;
            }
            let file_name = format!("{}_Bode.csv", chrono::Local::now().format("%Y%m%d_%H%M%S"));
            Self::create_at(output_dir.join(file_name))
        }

        /// Create the file at an explicit path and write the header.
        ///
        /// # Errors
        ///
        /// `Io` if the file exists or cannot be created; `Csv` if the header
        /// cannot be written.
        pub fn create_at(path: impl Into<PathBuf>) -> AppResult<Self> {
            let path = path.into();
            let file = OpenOptions::new().write(true).create_new(true).open(&path)?;
            let mut writer = csv::Writer::from_writer(file);
            writer.write_record(RECORD_HEADER)?;
            writer.flush()?;
            info!("CSV Writer initialized at '{}'.", path.display());
            Ok(Self {
                path,
                writer: Some(writer),
            })
        }

        /// Path of the file being written.
        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    #[async_trait]
    impl RecordSink for CsvWriter {
        async fn write(&mut self, record: &Record) -> AppResult<()> {
            let writer = self
                .writer
                .as_mut()
                .ok_or_else(|| BodeError::Storage("CSV writer already shut down".to_string()))?;
            writer.write_record(record.fields())?;
            writer.flush()?;
            writer.get_ref().sync_data()?;
            Ok(())
        }

        async fn shutdown(&mut self) -> AppResult<()> {
            if let Some(mut writer) = self.writer.take() {
                writer.flush()?;
                writer.get_ref().sync_all()?;
                info!("CSV Writer shut down ({}).", self.path.display());
            }
            Ok(())
        }
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;
    use std::path::{Path, PathBuf};

    /// Placeholder when CSV support is compiled out.
    pub struct CsvWriter;

    impl CsvWriter {
        /// # Errors
        ///
        /// Always `FeatureNotEnabled`.
        pub fn create(_output_dir: &Path) -> AppResult<Self> {
            Err(BodeError::FeatureNotEnabled("storage_csv".to_string()))
        }

        /// # Errors
        ///
        /// Always `FeatureNotEnabled`.
        pub fn create_at(_path: impl Into<PathBuf>) -> AppResult<Self> {
            Err(BodeError::FeatureNotEnabled("storage_csv".to_string()))
        }

        /// Never reached; construction always fails.
        pub fn path(&self) -> &Path {
            Path::new("")
        }
    }

    #[async_trait]
    impl RecordSink for CsvWriter {
        async fn write(&mut self, _record: &Record) -> AppResult<()> {
            Err(BodeError::FeatureNotEnabled("storage_csv".to_string()))
        }

        async fn shutdown(&mut self) -> AppResult<()> {
            Err(BodeError::FeatureNotEnabled("storage_csv".to_string()))
        }
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::CsvWriter;

#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::CsvWriter;

// ============================================================================
// Console echo
// ============================================================================

/// Echoes records as comma-separated lines.
///
/// The header goes out when the sink is created, so it is shown even if the
/// sweep faults before the first record.
pub struct ConsoleSink<W: Write + Send = Stdout> {
    out: W,
}

impl ConsoleSink<Stdout> {
    /// Console sink on standard output.
    ///
    /// # Errors
    ///
    /// `Io` if the header cannot be written.
    pub fn new() -> AppResult<Self> {
        Self::with_writer(std::io::stdout())
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    /// Console sink on any writer. Writes the header immediately.
    ///
    /// # Errors
    ///
    /// `Io` if the header cannot be written.
    pub fn with_writer(mut out: W) -> AppResult<Self> {
        writeln!(out, "{}", RECORD_HEADER.join(","))?;
        out.flush()?;
        Ok(Self { out })
    }
}

#[async_trait]
impl<W: Write + Send> RecordSink for ConsoleSink<W> {
    async fn write(&mut self, record: &Record) -> AppResult<()> {
        writeln!(self.out, "{}", record.to_row())?;
        self.out.flush()?;
        Ok(())
    }

    async fn shutdown(&mut self) -> AppResult<()> {
        self.out.flush()?;
        Ok(())
    }
}

// ============================================================================
// Fan-out
// ============================================================================

/// Forwards every record to each inner sink in order.
///
/// A write failure in any sink aborts the write. `shutdown` reaches every
/// sink and reports the first failure.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn RecordSink>>,
}

impl FanoutSink {
    /// Empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    pub fn with_sink(mut self, sink: Box<dyn RecordSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl RecordSink for FanoutSink {
    async fn write(&mut self, record: &Record) -> AppResult<()> {
        for sink in &mut self.sinks {
            sink.write(record).await?;
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> AppResult<()> {
        let mut first_error = None;
        for sink in &mut self.sinks {
            if let Err(e) = sink.shutdown().await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// ============================================================================
// In-memory collector
// ============================================================================

#[derive(Default)]
struct MemoryState {
    records: Vec<Record>,
    closed: bool,
    fail_after: Option<usize>,
}

/// Collects records in memory. Clones share the same buffer, so a test can
/// hand one clone to the engine and inspect the other.
#[derive(Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySink {
    /// Empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every write after the first `count` succeed.
    pub fn fail_after(self, count: usize) -> Self {
        self.lock().fail_after = Some(count);
        self
    }

    /// Snapshot of the collected records.
    pub fn records(&self) -> Vec<Record> {
        self.lock().records.clone()
    }

    /// Whether `shutdown` has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn write(&mut self, record: &Record) -> AppResult<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(BodeError::Storage("memory sink already shut down".to_string()));
        }
        if state.fail_after.is_some_and(|limit| state.records.len() >= limit) {
            return Err(BodeError::Storage("memory sink is full".to_string()));
        }
        state.records.push(record.clone());
        Ok(())
    }

    async fn shutdown(&mut self) -> AppResult<()> {
        self.lock().closed = true;
        Ok(())
    }
}
