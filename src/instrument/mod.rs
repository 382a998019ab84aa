//! Instrument controllers.
//!
//! Each controller owns one [`ScpiAdapter`](crate::adapters::ScpiAdapter) and
//! turns typed calls into the SCPI dialect of the Rigol DG1000Z generator and
//! DS1000Z scope families. Adapter failures become
//! [`BodeError::InstrumentCommand`] tagged with the controller id and the
//! exact command.

pub mod scope;
pub mod stimulus;

pub use scope::ScopeController;
pub use stimulus::StimulusController;

use crate::error::{AppResult, BodeError};

/// Parse a numeric instrument reply.
///
/// Accepts plain and scientific notation. `inf`/`NaN` spellings are rejected
/// along with anything else that is not a finite number.
pub(crate) fn parse_reply(instrument: &str, query: &str, response: &str) -> AppResult<f64> {
    response
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| BodeError::MeasurementParse {
            instrument: instrument.to_string(),
            query: query.to_string(),
            response: response.to_string(),
        })
}
