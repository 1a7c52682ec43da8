//! Soil moisture ingestion worker.
//!
//! Readings arrive over MQTT, are sampled by [`throttle::AdmissionPolicy`],
//! calibrated, stamped in WIB and appended to PostgreSQL. A control topic
//! switches the pump between `otomatis` and `manual`.

pub mod calibration;
pub mod clock;
pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod mode;
pub mod model;
pub mod mqtt;
pub mod retry;
pub mod throttle;
pub mod validate;
pub mod worker;
