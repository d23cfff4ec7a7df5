//! Bus adapter: the session's view of the publish/subscribe transport.
//!
//! The session controller only ever publishes frames and reacts to events;
//! everything inbound arrives through the event queue. [`Bus`] captures that
//! contract so the engine runs unchanged against the real MQTT client or an
//! in-memory test double.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use fleet_protocol::{topics, ExternalClient, ExternalServer};
use prost::Message;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rumqttc::mqttbytes::v4::{ConnectReturnCode, Packet};
use rumqttc::{
    AsyncClient, Event as MqttEvent, EventLoop, MqttOptions, QoS, TlsConfiguration, Transport,
};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::CarConfig;
use crate::error::BusError;
use crate::events::{EventQueue, SessionEvent};

/// Keepalive is half of the Fleet Protocol default timeout (30 s).
const KEEPALIVE: Duration = Duration::from_secs(15);

/// Outgoing request queue size; a session serves at most a few dozen
/// devices.
const OUTGOING_QUEUE_CAPACITY: usize = 20;

/// Length of the random MQTT client id.
const CLIENT_ID_LENGTH: usize = 20;

/// Transport seam of one car session.
#[async_trait]
pub trait Bus: Send {
    /// Opens the transport and subscribes to the inbound topic. Inbound
    /// frames and transport loss are delivered through `queue`; `cancel`
    /// stops the delivery.
    async fn connect(
        &mut self,
        queue: EventQueue,
        cancel: CancellationToken,
    ) -> Result<(), BusError>;

    /// Publishes one outbound frame.
    async fn publish(&mut self, frame: ExternalServer) -> Result<(), BusError>;

    /// Best-effort teardown of the transport.
    async fn disconnect(&mut self);
}

/// Client TLS material for mutual authentication with the broker.
#[derive(Debug, Clone)]
pub struct TlsFiles {
    /// CA bundle the broker certificate must chain to.
    pub ca: PathBuf,
    /// Client certificate.
    pub cert: PathBuf,
    /// Client private key.
    pub key: PathBuf,
}

impl TlsFiles {
    fn transport(&self) -> Result<Transport, BusError> {
        let read = |path: &PathBuf| {
            std::fs::read(path)
                .map_err(|error| BusError::Tls(format!("could not read '{}': {error}", path.display())))
        };
        let ca = read(&self.ca)?;
        let cert = read(&self.cert)?;
        let key = read(&self.key)?;
        Ok(Transport::Tls(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: Some((cert, key)),
        }))
    }
}

/// MQTT implementation of [`Bus`] over `rumqttc`.
pub struct MqttBus {
    options: MqttOptions,
    subscribe_topic: String,
    publish_topic: String,
    mqtt_timeout: Duration,
    client: Option<AsyncClient>,
    reader: Option<JoinHandle<()>>,
}

impl MqttBus {
    /// Builds the client options for one car session.
    pub fn new(config: &CarConfig, tls: Option<&TlsFiles>) -> Result<Self, BusError> {
        let client_id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(CLIENT_ID_LENGTH)
            .map(char::from)
            .collect();
        let mut options = MqttOptions::new(client_id, config.mqtt_address.as_str(), config.mqtt_port);
        options.set_keep_alive(KEEPALIVE);
        if let Some(tls) = tls {
            options.set_transport(tls.transport()?);
        }
        Ok(Self {
            options,
            subscribe_topic: topics::subscribe_topic(&config.company_name, &config.car_name),
            publish_topic: topics::publish_topic(&config.company_name, &config.car_name),
            mqtt_timeout: config.mqtt_timeout,
            client: None,
            reader: None,
        })
    }

    /// Topic this bus publishes on.
    #[must_use]
    pub fn publish_topic(&self) -> &str {
        &self.publish_topic
    }
}

#[async_trait]
impl Bus for MqttBus {
    async fn connect(
        &mut self,
        queue: EventQueue,
        cancel: CancellationToken,
    ) -> Result<(), BusError> {
        let (client, mut event_loop) = AsyncClient::new(self.options.clone(), OUTGOING_QUEUE_CAPACITY);

        // The connection only counts once the broker acknowledged it.
        let deadline = Instant::now() + self.mqtt_timeout;
        loop {
            let polled = tokio::time::timeout_at(deadline, event_loop.poll())
                .await
                .map_err(|_| BusError::ConnectTimeout)?;
            match polled {
                Ok(MqttEvent::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        break;
                    }
                    return Err(BusError::Connect(format!(
                        "broker rejected the connection: {:?}",
                        ack.code
                    )));
                }
                Ok(_) => {}
                Err(error) => return Err(BusError::Connect(error.to_string())),
            }
        }

        client
            .subscribe(self.subscribe_topic.as_str(), QoS::AtLeastOnce)
            .await
            .map_err(|error| BusError::Subscribe(error.to_string()))?;
        debug!(
            subscribe = %self.subscribe_topic,
            publish = %self.publish_topic,
            "connected to the MQTT broker"
        );

        self.reader = Some(tokio::spawn(read_loop(
            event_loop,
            self.subscribe_topic.clone(),
            queue,
            cancel,
        )));
        self.client = Some(client);
        Ok(())
    }

    async fn publish(&mut self, frame: ExternalServer) -> Result<(), BusError> {
        let Some(client) = &self.client else {
            return Err(BusError::Publish("not connected".to_string()));
        };
        client
            .publish(
                self.publish_topic.as_str(),
                QoS::AtLeastOnce,
                false,
                frame.encode_to_vec(),
            )
            .await
            .map_err(|error| BusError::Publish(error.to_string()))
    }

    async fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(error) = client.disconnect().await {
                debug!(%error, "MQTT disconnect request failed");
            }
        }
        if let Some(reader) = self.reader.take() {
            // The reader exits once the broker connection is gone; bound the
            // wait in case the disconnect request never reached it.
            let abort = reader.abort_handle();
            if tokio::time::timeout(Duration::from_secs(1), reader).await.is_err() {
                abort.abort();
            }
        }
    }
}

/// Decodes one inbound publish into a session event.
///
/// Malformed payloads are logged and dropped: the bus is shared with
/// arbitrary publishers, so garbage must not reach the session. A payload
/// that decodes to an envelope with no recognized frame kind yields
/// [`SessionEvent::UnknownFrame`], which the session treats as a protocol
/// violation.
#[must_use]
pub fn decode_inbound(payload: &[u8]) -> Option<SessionEvent> {
    match ExternalClient::decode(payload) {
        Ok(frame) => match frame.message_type {
            Some(kind) => Some(SessionEvent::CarMessage(kind)),
            None => Some(SessionEvent::UnknownFrame),
        },
        Err(error) => {
            warn!(%error, "dropping undecodable frame");
            None
        }
    }
}

/// Drives the MQTT event loop: decodes inbound frames into session events
/// and turns connection loss into `TransportDown`.
async fn read_loop(
    mut event_loop: EventLoop,
    subscribe_topic: String,
    queue: EventQueue,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            polled = event_loop.poll() => match polled {
                Ok(MqttEvent::Incoming(Packet::Publish(publish))) => {
                    if publish.topic != subscribe_topic {
                        continue;
                    }
                    if let Some(event) = decode_inbound(publish.payload.as_ref()) {
                        queue.push(event);
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(%error, "MQTT connection lost");
                    queue.push(SessionEvent::TransportDown);
                    break;
                }
            }
        }
    }
}
