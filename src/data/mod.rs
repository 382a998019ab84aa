//! Record persistence.

pub mod storage;

pub use storage::{ConsoleSink, CsvWriter, FanoutSink, MemorySink, RecordSink};
