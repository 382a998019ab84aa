//! Custom error types for the sweep.
//!
//! `BodeError` is the single error type surfaced by the library. Instrument
//! failures carry the instrument id and the exact command or query so that
//! wiring and addressing mistakes can be diagnosed from the log alone.
//!
//! ## Error Hierarchy
//!
//! - **`InstrumentCommand`**: the transport rejected a command or query, or the
//!   device did not answer before the transport timeout. Fatal to the sweep.
//! - **`MeasurementParse`**: a query was answered but the reply is not a number.
//!   Fatal to the sweep.
//! - **`Configuration`** / **`ConfigLoad`**: semantic and parse errors in the
//!   startup configuration. Raised before any instrument is touched.
//! - **`Io`** / **`Csv`** / **`Storage`**: record persistence failures.
//! - **`FeatureNotEnabled`**: functionality compiled out via feature flags.
//!
//! A zero input amplitude is deliberately *not* an error: the gain is recorded
//! as NaN and the sweep continues.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, BodeError>;

/// Errors raised while configuring or running a sweep.
#[derive(Error, Debug)]
pub enum BodeError {
    /// Transport or acknowledge failure on a command or query.
    #[error("Instrument '{instrument}' failed on '{command}': {message}")]
    InstrumentCommand {
        /// Instrument identifier (resource string or role name)
        instrument: String,
        /// The SCPI command or query that failed
        command: String,
        /// Underlying transport error, rendered with its context chain
        message: String,
    },

    /// A measurement reply could not be parsed as a number.
    #[error("Instrument '{instrument}' returned non-numeric reply to '{query}': {response:?}")]
    MeasurementParse {
        /// Instrument identifier
        instrument: String,
        /// The SCPI query that was sent
        query: String,
        /// Raw reply as received
        response: String,
    },

    /// Configuration loading error.
    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] Box<figment::Error>),

    /// Configuration validation error.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV serialization error.
    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Record sink error that is not plain I/O.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Functionality not compiled into this build.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl BodeError {
    /// Wrap an adapter error for the given instrument and command.
    pub fn instrument(instrument: &str, command: &str, err: anyhow::Error) -> Self {
        Self::InstrumentCommand {
            instrument: instrument.to_string(),
            command: command.to_string(),
            message: format!("{err:#}"),
        }
    }
}

impl From<figment::Error> for BodeError {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}
