use crate::errors::{Error, Result};
use crate::model::SensorReading;

const PERSEN_MIN: f64 = 0.0;
const PERSEN_MAX: f64 = 100.0;

/// Parses a data-topic payload and returns the moisture percentage as sent.
///
/// Rounding to a whole percent is left to the caller, after admission.
pub fn parse_reading(payload: &[u8]) -> Result<f64> {
    let reading: SensorReading = serde_json::from_slice(payload)?;

    validate(&reading)?;

    Ok(reading.persen)
}

pub fn validate(reading: &SensorReading) -> Result<()> {
    if !reading.persen.is_finite() {
        return Err(Error::Payload(format!(
            "persen {} is not a finite number",
            reading.persen
        )));
    }

    if reading.persen < PERSEN_MIN || reading.persen > PERSEN_MAX {
        return Err(Error::Payload(format!(
            "persen {} out of range [{}, {}]",
            reading.persen, PERSEN_MIN, PERSEN_MAX
        )));
    }

    Ok(())
}
