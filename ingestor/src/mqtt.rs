use crate::errors::{Error, Result};
use crate::worker::{Inbound, Topics};
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubAck,
    SubscribeReasonCode, Transport,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const REQUEST_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub credentials: Option<(String, String)>,
    pub client_id: String,
}

/// Builds a client id like `worker-server-1a2b3c` so restarts never collide
/// with a session the broker still holds.
pub fn client_id(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &suffix[..6])
}

pub fn connect(settings: &MqttSettings) -> (AsyncClient, EventLoop) {
    let mut mqtt_options =
        MqttOptions::new(settings.client_id.clone(), settings.host.clone(), settings.port);
    mqtt_options.set_keep_alive(KEEP_ALIVE);
    mqtt_options.set_clean_session(true);

    if let Some((username, password)) = &settings.credentials {
        mqtt_options.set_credentials(username.clone(), password.clone());
    }
    if settings.tls {
        mqtt_options.set_transport(Transport::tls_with_default_config());
    }

    AsyncClient::new(mqtt_options, REQUEST_CAPACITY)
}

/// Polls the event loop until a DISCONNECT has been sent or the worker side
/// of the channel is gone. Connection errors never end the loop.
pub async fn run_mqtt(
    client: AsyncClient,
    mut eventloop: EventLoop,
    topics: Topics,
    tx: mpsc::Sender<Inbound>,
) {
    info!(
        "Connecting to MQTT broker at {}:{}",
        eventloop.mqtt_options.broker_address().0,
        eventloop.mqtt_options.broker_address().1
    );

    loop {
        let event = tokio::select! {
            event = eventloop.poll() => event,
            _ = tx.closed() => {
                warn!("Worker stopped, closing MQTT loop");
                break;
            }
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!("Connected to MQTT broker ({:?})", ack.code);
                // clean sessions drop subscriptions, so renew them on every connect
                subscribe(&client, &topics.data, "data").await;
                subscribe(&client, &topics.control, "control").await;
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                log_suback(&ack);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = Inbound {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                };
                if let Err(e) = forward(&tx, message).await {
                    error!("Stopping MQTT loop: {}", e);
                    break;
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("Disconnect sent to MQTT broker");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(
                    "MQTT connection error: {}. Reconnecting in {}s",
                    e,
                    RECONNECT_DELAY.as_secs()
                );
                tokio::select! {
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    _ = tx.closed() => {
                        warn!("Worker stopped while reconnecting, closing MQTT loop");
                        break;
                    }
                }
            }
        }
    }

    info!("MQTT loop stopped");
}

/// Logs each granted or rejected filter and returns how many were rejected.
fn log_suback(ack: &SubAck) -> usize {
    let mut rejected = 0;
    for code in &ack.return_codes {
        match code {
            SubscribeReasonCode::Success(qos) => {
                debug!("Subscription {} granted with {:?}", ack.pkid, qos)
            }
            SubscribeReasonCode::Failure => {
                error!("Broker rejected subscription {}", ack.pkid);
                rejected += 1;
            }
        }
    }
    rejected
}

async fn subscribe(client: &AsyncClient, topic: &str, kind: &str) {
    match client.subscribe(topic, QoS::AtLeastOnce).await {
        Ok(()) => info!("Subscribing to {} topic \"{}\"", kind, topic),
        Err(e) => error!("Failed to subscribe to {} topic \"{}\": {}", kind, topic, e),
    }
}

async fn forward(tx: &mpsc::Sender<Inbound>, message: Inbound) -> Result<()> {
    match tx.try_send(message) {
        Ok(()) => Ok(()),
        Err(mpsc::error::TrySendError::Full(message)) => {
            // the worker is inside a storage retry; wait for it
            warn!("Inbound channel full, waiting for worker");
            tx.send(message).await.map_err(|_| Error::ChannelSend)
        }
        Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::ChannelSend),
    }
}

/// Requests a clean DISCONNECT; the event loop flushes it on its next poll.
pub async fn disconnect(client: &AsyncClient) -> Result<()> {
    client.disconnect().await.map_err(Error::Mqtt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics() -> Topics {
        Topics {
            data: "sensor/tanah/data".to_string(),
            control: "kontrol/pompa".to_string(),
        }
    }

    /// A local port with nothing listening on it.
    fn refused_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn plain_settings(port: u16) -> MqttSettings {
        MqttSettings {
            host: "127.0.0.1".to_string(),
            port,
            tls: false,
            credentials: None,
            client_id: "worker-server-test01".to_string(),
        }
    }

    fn inbound(topic: &str) -> Inbound {
        Inbound {
            topic: topic.to_string(),
            payload: b"AUTO".to_vec(),
        }
    }

    #[test]
    fn test_client_id_has_random_suffix() {
        let a = client_id("worker-server");
        let b = client_id("worker-server");

        assert!(a.starts_with("worker-server-"));
        assert_eq!(a.len(), "worker-server-".len() + 6);
        assert_ne!(a, b);
    }

    #[test]
    fn test_forward_waits_when_full() {
        tokio_test::block_on(async {
            let (tx, mut rx) = mpsc::channel(1);
            forward(&tx, inbound("a")).await.unwrap();

            let pending = tokio::spawn({
                let tx = tx.clone();
                async move { forward(&tx, inbound("b")).await }
            });

            assert_eq!(rx.recv().await.unwrap().topic, "a");
            assert_eq!(rx.recv().await.unwrap().topic, "b");
            assert!(pending.await.unwrap().is_ok());
        });
    }

    #[test]
    fn test_forward_fails_when_worker_gone() {
        tokio_test::block_on(async {
            let (tx, rx) = mpsc::channel(1);
            drop(rx);

            assert!(matches!(
                forward(&tx, inbound("a")).await,
                Err(Error::ChannelSend)
            ));
        });
    }

    #[test]
    fn test_connect_applies_settings() {
        let settings = MqttSettings {
            host: "broker.local".to_string(),
            port: 8883,
            tls: false,
            credentials: Some(("sensor".to_string(), "secret".to_string())),
            client_id: "worker-server-abc123".to_string(),
        };
        let (_client, eventloop) = connect(&settings);

        assert_eq!(eventloop.mqtt_options.client_id(), "worker-server-abc123");
        assert_eq!(
            eventloop.mqtt_options.broker_address(),
            ("broker.local".to_string(), 8883)
        );
        assert_eq!(
            eventloop.mqtt_options.credentials(),
            Some(("sensor".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn test_suback_counts_rejections() {
        let granted = SubAck {
            pkid: 1,
            return_codes: vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)],
        };
        assert_eq!(log_suback(&granted), 0);

        let mixed = SubAck {
            pkid: 2,
            return_codes: vec![
                SubscribeReasonCode::Success(QoS::AtLeastOnce),
                SubscribeReasonCode::Failure,
            ],
        };
        assert_eq!(log_suback(&mixed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_keeps_retrying_without_broker() {
        let (client, eventloop) = connect(&plain_settings(refused_port()));
        let (tx, _rx) = mpsc::channel(8);
        let handle = tokio::spawn(run_mqtt(client, eventloop, topics(), tx));

        tokio::time::sleep(RECONNECT_DELAY * 3 + Duration::from_secs(1)).await;
        assert!(!handle.is_finished());

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_stops_when_worker_gone() {
        let (client, eventloop) = connect(&plain_settings(refused_port()));
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(run_mqtt(client, eventloop, topics(), tx));

        tokio::time::sleep(RECONNECT_DELAY + Duration::from_secs(1)).await;
        assert!(!handle.is_finished());

        drop(rx);
        let stopped = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(matches!(stopped, Ok(Ok(()))));
    }
}
