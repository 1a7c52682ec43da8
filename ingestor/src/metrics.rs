use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};

use crate::errors::{Error, Result};
use crate::mode::Mode;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_messages_total",
        "Total messages received from MQTT"
    ))
    .unwrap();
    pub static ref CONTROL_COMMANDS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_control_commands_total",
        "Total recognised control commands applied"
    ))
    .unwrap();
    pub static ref UNKNOWN_CONTROL_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_unknown_control_total",
        "Total control payloads ignored as unknown tokens"
    ))
    .unwrap();
    pub static ref READINGS_ADMITTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "ingestor_readings_admitted_total",
            "Total readings admitted for storage"
        ),
        &["reason"]
    )
    .unwrap();
    pub static ref READINGS_SKIPPED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_readings_skipped_total",
        "Total readings skipped by the sampling interval"
    ))
    .unwrap();
    pub static ref INVALID_MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_invalid_messages_total",
        "Total malformed sensor payloads dropped"
    ))
    .unwrap();
    pub static ref DB_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_db_failures_total",
        "Total failed insert attempts"
    ))
    .unwrap();
    pub static ref READINGS_DISCARDED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_readings_discarded_total",
        "Total admitted readings lost after the retry failed"
    ))
    .unwrap();
    pub static ref INSERT_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "ingestor_insert_latency_seconds",
            "Time taken to store one reading, retries included"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0])
    )
    .unwrap();
    pub static ref PUMP_MODE: Gauge = Gauge::with_opts(Opts::new(
        "ingestor_pump_mode",
        "Current pump mode (0 = otomatis, 1 = manual)"
    ))
    .unwrap();
    pub static ref LAST_PERSEN: Gauge = Gauge::with_opts(Opts::new(
        "ingestor_last_persen",
        "Most recent valid soil moisture percentage"
    ))
    .unwrap();
}

pub fn init_metrics() -> Result<()> {
    REGISTRY.register(Box::new(MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CONTROL_COMMANDS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UNKNOWN_CONTROL_TOTAL.clone()))?;
    REGISTRY.register(Box::new(READINGS_ADMITTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(READINGS_SKIPPED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INVALID_MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DB_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(READINGS_DISCARDED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INSERT_LATENCY_SECONDS.clone()))?;
    REGISTRY.register(Box::new(PUMP_MODE.clone()))?;
    REGISTRY.register(Box::new(LAST_PERSEN.clone()))?;
    Ok(())
}

pub fn set_mode(mode: Mode) {
    PUMP_MODE.set(match mode {
        Mode::Otomatis => 0.0,
        Mode::Manual => 1.0,
    });
}

pub fn gather_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}
