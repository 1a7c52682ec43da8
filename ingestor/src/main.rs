use anyhow::{Context, Result};
use axum::{http::StatusCode, routing::get, Router};
use clap::Parser;
use soil_ingestor::clock::SystemClock;
use soil_ingestor::config::Config;
use soil_ingestor::db::{self, PgSink};
use soil_ingestor::metrics;
use soil_ingestor::mode::Mode;
use soil_ingestor::mqtt;
use soil_ingestor::worker::Worker;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        error!("{:#}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn run() -> Result<()> {
    let config = Config::parse();

    info!("Starting soil moisture ingestor");
    info!(
        "MQTT broker: {}:{} (tls: {})",
        config.mqtt_host, config.mqtt_port, config.mqtt_tls
    );
    info!("Database: {}", config.database_display());
    info!(
        "Topics: data=\"{}\", control=\"{}\"",
        config.data_topic, config.control_topic
    );
    info!(
        "Readings stored every {}s, or immediately at <= {}%",
        config.insert_interval_secs, config.urgent_threshold
    );

    metrics::init_metrics().context("failed to register metrics")?;
    metrics::set_mode(Mode::default());

    // Without storage the worker has no purpose, so this is the one fatal step
    let pool = db::make_pool(&config.database_url, &config.db_timezone)
        .await
        .context("failed to prepare database")?;

    let (tx, rx) = mpsc::channel(config.channel_capacity);

    let worker = Worker::new(
        config.topics(),
        config.admission_policy(),
        PgSink::new(pool.clone()),
        SystemClock,
    );
    let mut worker_handle = tokio::spawn(worker.run(rx));

    let settings = config.mqtt_settings(mqtt::client_id(&config.client_id_prefix));
    info!("MQTT client id: {}", settings.client_id);
    let (client, eventloop) = mqtt::connect(&settings);
    let mut mqtt_handle = tokio::spawn(mqtt::run_mqtt(
        client.clone(),
        eventloop,
        config.topics(),
        tx,
    ));

    let server_handle = match config.metrics_addr {
        Some(addr) => Some(spawn_metrics_server(addr).await?),
        None => None,
    };

    tokio::select! {
        _ = &mut mqtt_handle => {
            error!("MQTT task terminated");
        }
        _ = &mut worker_handle => {
            error!("Worker task terminated");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal");
        }
    }

    info!("Closing MQTT connection...");
    if !mqtt_handle.is_finished() {
        if let Err(e) = mqtt::disconnect(&client).await {
            warn!("Failed to request MQTT disconnect: {}", e);
        }
        stop_task("MQTT loop", &mut mqtt_handle, SHUTDOWN_TIMEOUT).await;
    }

    // the MQTT task owned the only sender, so the worker now drains and exits
    info!("Waiting for worker to finish queued messages...");
    stop_task("Worker", &mut worker_handle, SHUTDOWN_TIMEOUT).await;

    if let Some(handle) = server_handle {
        handle.abort();
    }
    pool.close().await;

    info!("Shutting down");
    Ok(())
}

/// Waits up to `limit` for `handle`, aborting it after that. Returns whether
/// the task finished on its own.
async fn stop_task(name: &str, handle: &mut JoinHandle<()>, limit: Duration) -> bool {
    if handle.is_finished() {
        return true;
    }
    match tokio::time::timeout(limit, &mut *handle).await {
        Ok(_) => true,
        Err(_) => {
            warn!("{} did not stop within {:?}, aborting", name, limit);
            handle.abort();
            false
        }
    }
}

async fn spawn_metrics_server(addr: SocketAddr) -> Result<JoinHandle<()>> {
    let app = Router::new().route("/metrics", get(metrics_handler));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", addr))?;

    info!("Metrics server listening on {}", addr);

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    }))
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    metrics::gather_metrics().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soil_ingestor::db::MeasurementSink;
    use soil_ingestor::model::NewMeasurement;
    use soil_ingestor::throttle::AdmissionPolicy;
    use soil_ingestor::worker::{Inbound, Topics};
    use std::sync::{Arc, Mutex};

    /// Takes two seconds per insert, like a slow database.
    #[derive(Clone, Default)]
    struct SlowSink {
        rows: Arc<Mutex<Vec<NewMeasurement>>>,
    }

    impl MeasurementSink for SlowSink {
        async fn insert(&self, row: &NewMeasurement) -> soil_ingestor::errors::Result<()> {
            tokio::time::sleep(Duration::from_secs(2)).await;
            self.rows.lock().unwrap().push(row.clone());
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_task_lets_worker_finish_insert() {
        let sink = SlowSink::default();
        let topics = Topics {
            data: "sensor/tanah/data".to_string(),
            control: "kontrol/pompa".to_string(),
        };
        let worker = Worker::new(topics, AdmissionPolicy::default(), sink.clone(), SystemClock);

        let (tx, rx) = mpsc::channel(4);
        let mut handle = tokio::spawn(worker.run(rx));
        tx.send(Inbound {
            topic: "sensor/tanah/data".to_string(),
            payload: br#"{"persen": 55}"#.to_vec(),
        })
        .await
        .unwrap();
        drop(tx);

        assert!(stop_task("Worker", &mut handle, SHUTDOWN_TIMEOUT).await);
        assert_eq!(sink.rows.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_task_aborts_stuck_task() {
        let mut handle = tokio::spawn(std::future::pending::<()>());

        assert!(!stop_task("Stuck", &mut handle, SHUTDOWN_TIMEOUT).await);
        assert!(handle.await.unwrap_err().is_cancelled());
    }
}
