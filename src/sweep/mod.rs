//! Bode sweep: configuration, loop engine and emitted records.

pub mod cancel;
pub mod engine;
pub mod record;
pub mod settings;

pub use cancel::{cancel_pair, relay_interrupts, CancelHandle, CancelSignal};
pub use engine::{stop_reason, SweepEngine, SweepPhase, SweepReport, TerminationReason};
pub use record::{gain_db, next_frequency, Measurement, Record, RECORD_HEADER};
pub use settings::{ChannelMap, SweepConfiguration, SweepTuning};
