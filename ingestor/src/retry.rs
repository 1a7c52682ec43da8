use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::db::MeasurementSink;
use crate::errors::Error;
use crate::metrics::{DB_FAILURES_TOTAL, INSERT_LATENCY_SECONDS, READINGS_DISCARDED_TOTAL};
use crate::model::NewMeasurement;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    /// One retry, one second apart.
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

#[derive(Debug)]
pub enum InsertOutcome {
    Stored { attempts: u32 },
    Discarded { attempts: u32, error: Error },
}

/// Inserts one row, rebuilding it before every attempt.
///
/// `build` receives the 1-based attempt number and must produce the row as it
/// should look *now*; time-dependent fields are recomputed rather than
/// replayed from the first attempt.
pub async fn insert_with_retry<S, F>(sink: &S, policy: RetryPolicy, mut build: F) -> InsertOutcome
where
    S: MeasurementSink,
    F: FnMut(u32) -> NewMeasurement,
{
    let start = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let row = build(attempt);

        match sink.insert(&row).await {
            Ok(()) => {
                INSERT_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
                if attempt > 1 {
                    info!("Reading stored on attempt {}", attempt);
                } else {
                    debug!("Reading stored");
                }
                return InsertOutcome::Stored { attempts: attempt };
            }
            Err(e) => {
                DB_FAILURES_TOTAL.inc();

                if attempt >= max_attempts {
                    error!(
                        "Failed to store reading after {} attempts, dropping persen={}: {}",
                        attempt, row.persen, e
                    );
                    READINGS_DISCARDED_TOTAL.inc();
                    return InsertOutcome::Discarded {
                        attempts: attempt,
                        error: e,
                    };
                }

                warn!(
                    "Insert failed (attempt {}/{}): {}. Retrying in {}ms...",
                    attempt,
                    max_attempts,
                    e,
                    policy.delay.as_millis()
                );
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}
