mod telemetry;

use clap::Parser;
use rand::Rng;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, QoS, Transport,
};
use std::time::Duration;
use telemetry::MoistureWalk;
use tracing::{error, info, warn};

const CONTROL_TOKENS: [&str; 4] = ["AUTO", "MANUAL_ON", "MANUAL_OFF", "STATUS"];
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Publishes synthetic soil moisture readings and pump commands.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    mqtt_host: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    mqtt_port: u16,

    #[arg(long, env = "MQTT_TLS", default_value_t = false, action = clap::ArgAction::Set)]
    mqtt_tls: bool,

    #[arg(long, env = "MQTT_USERNAME", requires = "mqtt_password")]
    mqtt_username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD", requires = "mqtt_username", hide_env_values = true)]
    mqtt_password: Option<String>,

    #[arg(long, env = "TOPIC_DATA", default_value = "sensor/tanah/data")]
    data_topic: String,

    #[arg(long, env = "TOPIC_CONTROL", default_value = "kontrol/pompa")]
    control_topic: String,

    /// Delay between readings.
    #[arg(long, env = "INTERVAL_MS", default_value_t = 1000)]
    interval_ms: u64,

    /// Publish a random control token after this many readings (0 disables).
    #[arg(long, env = "CONTROL_EVERY", default_value_t = 30)]
    control_every: u64,

    /// Share of readings replaced by a payload without a numeric `persen`.
    #[arg(long, env = "MALFORMED_RATIO", default_value_t = 0.02)]
    malformed_ratio: f64,

    #[arg(long, default_value_t = 60)]
    start_persen: u8,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("Starting soil sensor simulator");
    info!(
        "Broker: {}:{}, interval: {}ms, data topic: {}, control topic: {}",
        args.mqtt_host, args.mqtt_port, args.interval_ms, args.data_topic, args.control_topic
    );

    let client_id = format!("sim-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);

    let mut mqtt_options = MqttOptions::new(&client_id, &args.mqtt_host, args.mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);
    if let (Some(username), Some(password)) = (&args.mqtt_username, &args.mqtt_password) {
        mqtt_options.set_credentials(username, password);
    }
    if args.mqtt_tls {
        mqtt_options.set_transport(Transport::tls_with_default_config());
    }

    let (client, eventloop) = AsyncClient::new(mqtt_options, 100);
    let eventloop_handle = tokio::spawn(drive_eventloop(eventloop));

    let malformed_ratio = args.malformed_ratio.clamp(0.0, 1.0);
    let mut walk = MoistureWalk::new(args.start_persen);
    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let mut counter = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping after {} readings", counter);
                break;
            }
        }

        let (payload, command) = {
            let mut rng = rand::thread_rng();
            let payload = if rng.gen_bool(malformed_ratio) {
                r#"{"persen": "n/a"}"#.to_string()
            } else {
                let reading = walk.step(&mut rng);
                match serde_json::to_string(&reading) {
                    Ok(p) => p,
                    Err(e) => {
                        error!("Failed to serialize reading: {}", e);
                        continue;
                    }
                }
            };
            let command = (args.control_every > 0 && (counter + 1) % args.control_every == 0)
                .then(|| CONTROL_TOKENS[rng.gen_range(0..CONTROL_TOKENS.len())]);
            (payload, command)
        };

        match client
            .publish(&args.data_topic, QoS::AtLeastOnce, false, payload.clone())
            .await
        {
            Ok(()) => {
                counter += 1;
                info!("Published {}", payload);
            }
            Err(e) => warn!("Failed to publish reading: {}", e),
        }

        if let Some(token) = command {
            match client
                .publish(&args.control_topic, QoS::AtLeastOnce, false, token)
                .await
            {
                Ok(()) => info!("Published control token {}", token),
                Err(e) => warn!("Failed to publish control token: {}", e),
            }
        }
    }

    if let Err(e) = client.disconnect().await {
        warn!("Failed to disconnect: {}", e);
    }
    // the disconnect is only written once the event loop polls it
    if tokio::time::timeout(DISCONNECT_TIMEOUT, eventloop_handle)
        .await
        .is_err()
    {
        warn!("Event loop did not send DISCONNECT within {:?}", DISCONNECT_TIMEOUT);
    }
}

/// Polls until DISCONNECT has been written or every client handle is gone.
async fn drive_eventloop(mut eventloop: EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("Disconnected from broker");
                break;
            }
            Ok(_) => {}
            Err(ConnectionError::RequestsDone) => break,
            Err(e) => {
                error!("MQTT eventloop error: {}", e);
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}
