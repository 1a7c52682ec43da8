use chrono::{DateTime, FixedOffset};
use serde::Deserialize;

use crate::mode::Mode;

/// Payload on the data topic. Only `persen` is read; other fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorReading {
    pub persen: f64,
}

/// One row of `kelembapan_tanah` as handed to the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMeasurement {
    pub nilai: i32,
    pub persen: i32,
    pub mode: Mode,
    pub waktu: DateTime<FixedOffset>,
}

