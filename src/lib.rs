//! Core library for the bode_sweep application.
//!
//! Measures the gain and phase response of a device under test by stepping a
//! signal generator through a geometric frequency progression and reading
//! RMS amplitudes and relative phase off an oscilloscope, both driven over
//! SCPI. Each step produces one [`sweep::Record`] handed to a
//! [`data::RecordSink`].
//!
//! - [`adapters`]: command/query transports (VISA, raw socket, simulated bench)
//! - [`instrument`]: generator and scope controllers
//! - [`sweep`]: configuration, cancellation and the loop engine
//! - [`data`]: CSV, console and in-memory record sinks
//! - [`config`]: layered startup configuration
//! - [`error`]: the library error type

pub mod adapters;
pub mod config;
pub mod data;
pub mod error;
pub mod instrument;
pub mod sweep;
