use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::calibration::Calibration;
use crate::clock::{format_wib, Clock};
use crate::db::MeasurementSink;
use crate::metrics::{
    CONTROL_COMMANDS_TOTAL, INVALID_MESSAGES_TOTAL, LAST_PERSEN, MESSAGES_TOTAL,
    READINGS_ADMITTED_TOTAL, READINGS_SKIPPED_TOTAL, UNKNOWN_CONTROL_TOTAL,
};
use crate::mode::{ControlCommand, Mode, ModeState};
use crate::model::NewMeasurement;
use crate::retry::{insert_with_retry, InsertOutcome, RetryPolicy};
use crate::throttle::{Admission, AdmissionPolicy};
use crate::validate::parse_reading;

/// A publish forwarded from the MQTT event loop.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Topics {
    pub data: String,
    pub control: String,
}

/// What happened to a single inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    ModeChanged(Mode),
    ModeUnchanged(Mode),
    UnknownCommand,
    Malformed,
    Skipped,
    Stored { admission: Admission, attempts: u32 },
    Discarded { admission: Admission, attempts: u32 },
    UnknownTopic,
}

/// Owns the mode and throttle state; fed by exactly one channel so handlers
/// never run concurrently.
pub struct Worker<S, C> {
    topics: Topics,
    mode: ModeState,
    admission: AdmissionPolicy,
    calibration: Calibration,
    retry: RetryPolicy,
    sink: S,
    clock: C,
}

impl<S, C> Worker<S, C>
where
    S: MeasurementSink,
    C: Clock,
{
    pub fn new(topics: Topics, admission: AdmissionPolicy, sink: S, clock: C) -> Self {
        Self {
            topics,
            mode: ModeState::default(),
            admission,
            calibration: Calibration::default(),
            retry: RetryPolicy::default(),
            sink,
            clock,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode.current()
    }

    pub fn admission(&self) -> &AdmissionPolicy {
        &self.admission
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Drains `rx` until every sender is dropped.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Inbound>) {
        info!(
            "Worker started: mode={}, insert interval={}s",
            self.mode(),
            self.admission.interval().as_secs()
        );

        while let Some(message) = rx.recv().await {
            self.handle(message).await;
        }

        info!("Inbound channel closed, worker stopped");
    }

    pub async fn handle(&mut self, message: Inbound) -> Handled {
        MESSAGES_TOTAL.inc();
        debug!(
            "Message received | topic: {} | payload: {}",
            message.topic,
            String::from_utf8_lossy(&message.payload)
        );

        if message.topic == self.topics.control {
            self.handle_control(&message.payload)
        } else if message.topic == self.topics.data {
            self.handle_data(&message.payload).await
        } else {
            debug!("Ignoring message on unexpected topic {}", message.topic);
            Handled::UnknownTopic
        }
    }

    fn handle_control(&mut self, payload: &[u8]) -> Handled {
        let Some(command) = ControlCommand::parse(payload) else {
            UNKNOWN_CONTROL_TOTAL.inc();
            debug!(
                "Unknown control token {:?}, mode stays {}",
                String::from_utf8_lossy(payload),
                self.mode()
            );
            return Handled::UnknownCommand;
        };

        CONTROL_COMMANDS_TOTAL.inc();
        let changed = self.mode.apply(command);
        let mode = self.mode();
        crate::metrics::set_mode(mode);

        if changed {
            info!("Mode changed to {} by {:?}", mode, command);
            Handled::ModeChanged(mode)
        } else {
            debug!("Mode already {} ({:?})", mode, command);
            Handled::ModeUnchanged(mode)
        }
    }

    async fn handle_data(&mut self, payload: &[u8]) -> Handled {
        let reading = match parse_reading(payload) {
            Ok(reading) => reading,
            Err(e) => {
                INVALID_MESSAGES_TOTAL.inc();
                warn!("Dropping sensor payload: {}", e);
                return Handled::Malformed;
            }
        };
        LAST_PERSEN.set(reading);

        let admission = self.admission.admit(Instant::now(), reading);
        match admission {
            Admission::Skipped => {
                READINGS_SKIPPED_TOTAL.inc();
                debug!("Skipping persen={}, interval not elapsed", reading);
                return Handled::Skipped;
            }
            Admission::Urgent => {
                READINGS_ADMITTED_TOTAL.with_label_values(&["urgent"]).inc();
                info!("Storing reading, low moisture: {}%", reading);
            }
            Admission::Scheduled => {
                READINGS_ADMITTED_TOTAL.with_label_values(&["scheduled"]).inc();
                info!("Storing reading: {}%", reading);
            }
        }

        // the column holds whole percents
        let persen = reading.round() as i32;
        let nilai = self.calibration.raw_from_percent(persen);
        let mode = &self.mode;
        let clock = &self.clock;
        let build = |attempt: u32| {
            // mode and waktu reflect the moment of this attempt
            let row = NewMeasurement {
                nilai,
                persen,
                mode: mode.current(),
                waktu: clock.now(),
            };
            debug!("Attempt {} timestamp: {}", attempt, format_wib(&row.waktu));
            row
        };

        match insert_with_retry(&self.sink, self.retry, build).await {
            InsertOutcome::Stored { attempts } => Handled::Stored {
                admission,
                attempts,
            },
            InsertOutcome::Discarded { attempts, .. } => Handled::Discarded {
                admission,
                attempts,
            },
        }
    }
}
