//! MQTT broker connection.
//!
//! The connection is an explicitly owned object. Its event loop runs in a
//! dedicated task that pushes every received publish onto a bounded queue; a
//! single consumer (the ingest bridge) drains it. Nothing here reconnects on its
//! own: after a connection error the task records the failure and stops, and a
//! new connection is made only when [`BrokerHandle::reset`] is called.

use crate::{
    config::{MqttCredentials, MqttSettings},
    errors::{Error, Result},
};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the client's outgoing request channel
const REQUEST_CAPACITY: usize = 32;

/// How long a shutdown waits for the event loop before aborting it
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// A publish received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message arrived on
    pub topic: String,
    /// Raw payload bytes
    pub payload: Vec<u8>,
}

/// Connection state shown on the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Never connected in this process
    Idle,
    /// Waiting for the broker's CONNACK
    Connecting,
    /// Connected and subscribed
    Connected,
    /// Connection failed or dropped; no reconnect is attempted
    Failed {
        /// Error reported by the client
        reason: String,
    },
    /// Closed on request
    Closed,
}

impl ConnectionStatus {
    /// `true` while the broker link is usable.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Anything that can publish a text payload to a topic.
pub trait Publisher: Send + Sync {
    /// Publishes `payload` to `topic`, optionally with the retained flag.
    fn publish(
        &self,
        topic: &str,
        payload: String,
        retain: bool,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Everything needed to (re)open a connection.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    /// Broker settings
    pub settings: MqttSettings,
    /// Optional broker login
    pub credentials: Option<MqttCredentials>,
    /// Topics subscribed after every successful CONNACK
    pub subscriptions: Vec<String>,
}

impl ConnectParams {
    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.settings.client_id.clone(),
            self.settings.host.clone(),
            self.settings.port,
        );
        options.set_keep_alive(Duration::from_secs(self.settings.keep_alive_secs.max(5)));
        options.set_clean_session(true);
        if let Some(credentials) = &self.credentials {
            options.set_credentials(credentials.username.clone(), credentials.password.clone());
        }
        options
    }
}

/// One live broker session: the client plus the task driving its event loop.
struct BrokerConnection {
    client: AsyncClient,
    closing: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl BrokerConnection {
    fn open(
        params: &ConnectParams,
        inbound: mpsc::Sender<InboundMessage>,
        status: Arc<watch::Sender<ConnectionStatus>>,
    ) -> Self {
        let (client, eventloop) = AsyncClient::new(params.options(), REQUEST_CAPACITY);
        let closing = Arc::new(AtomicBool::new(false));

        status.send_replace(ConnectionStatus::Connecting);
        info!(
            "Connecting to MQTT broker {}:{}",
            params.settings.host, params.settings.port
        );

        let task = tokio::spawn(drive_event_loop(
            eventloop,
            client.clone(),
            params.subscriptions.clone(),
            inbound,
            status,
            Arc::clone(&closing),
        ));

        Self {
            client,
            closing,
            task,
        }
    }

    async fn close(self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnect request not sent: {e}");
        }

        let abort = self.task.abort_handle();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.task).await.is_err() {
            warn!("MQTT event loop did not stop in time, aborting");
            abort.abort();
        }
    }
}

async fn drive_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    subscriptions: Vec<String>,
    inbound: mpsc::Sender<InboundMessage>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    closing: Arc<AtomicBool>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    error!("MQTT connection refused: {:?}", ack.code);
                    status.send_replace(ConnectionStatus::Failed {
                        reason: format!("{:?}", ack.code),
                    });
                    break;
                }
                info!("Connected to MQTT broker");
                for topic in &subscriptions {
                    // try_subscribe: the request channel is drained by this very loop
                    if let Err(e) = client.try_subscribe(topic.clone(), QoS::AtMostOnce) {
                        error!("Failed to subscribe to {topic}: {e}");
                    } else {
                        info!("Listening on {topic}");
                    }
                }
                status.send_replace(ConnectionStatus::Connected);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                };
                if inbound.send(message).await.is_err() {
                    debug!("Inbound queue closed, stopping MQTT event loop");
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("Broker closed the connection");
                status.send_replace(ConnectionStatus::Failed {
                    reason: "disconnected by broker".to_string(),
                });
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if closing.load(Ordering::SeqCst) {
                    break;
                }
                error!("MQTT connection error: {e}");
                status.send_replace(ConnectionStatus::Failed {
                    reason: e.to_string(),
                });
                break;
            }
        }
    }

    if closing.load(Ordering::SeqCst) {
        status.send_replace(ConnectionStatus::Closed);
    }
}

/// Cloneable owner of the broker session.
///
/// The bridge, the relay and the dashboard all receive a clone. Resetting the
/// handle tears the current session down and opens a fresh one.
#[derive(Clone)]
pub struct BrokerHandle {
    params: Arc<ConnectParams>,
    inbound: mpsc::Sender<InboundMessage>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    connection: Arc<Mutex<Option<BrokerConnection>>>,
}

impl BrokerHandle {
    /// Creates a handle without connecting. Received publishes go to `inbound`.
    #[must_use]
    pub fn new(params: ConnectParams, inbound: mpsc::Sender<InboundMessage>) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Idle);
        Self {
            params: Arc::new(params),
            inbound,
            status: Arc::new(status),
            connection: Arc::new(Mutex::new(None)),
        }
    }

    /// Opens the connection, closing any previous one first.
    pub async fn connect(&self) {
        let mut slot = self.connection.lock().await;
        if let Some(previous) = slot.take() {
            previous.close().await;
        }
        *slot = Some(BrokerConnection::open(
            &self.params,
            self.inbound.clone(),
            Arc::clone(&self.status),
        ));
    }

    /// Drops the current session and connects again.
    pub async fn reset(&self) {
        info!("Resetting MQTT connection");
        self.connect().await;
    }

    /// Closes the connection. Safe to call more than once.
    pub async fn shutdown(&self) {
        let previous = self.connection.lock().await.take();
        if let Some(connection) = previous {
            connection.close().await;
            info!("MQTT connection closed");
        }
    }

    /// Subscribes to connection status changes.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }
}

impl Publisher for BrokerHandle {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<()> {
        let client = self
            .connection
            .lock()
            .await
            .as_ref()
            .map(|connection| connection.client.clone())
            .ok_or_else(|| Error::Broker {
                message: "not connected".to_string(),
            })?;

        client
            .publish(topic, QoS::AtMostOnce, retain, payload)
            .await
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_params() -> ConnectParams {
        ConnectParams {
            settings: MqttSettings {
                host: "127.0.0.1".to_string(),
                // nothing listens on port 1 in the test environment
                port: 1,
                ..MqttSettings::default()
            },
            credentials: None,
            subscriptions: vec!["esp32/sensor/temperatura".to_string()],
        }
    }

    #[tokio::test]
    async fn test_publish_without_connection_fails() {
        let (tx, _rx) = mpsc::channel(4);
        let handle = BrokerHandle::new(test_params(), tx);

        let result = handle.publish("t", "1".to_string(), false).await;
        assert!(matches!(result, Err(Error::Broker { message: _ })));
        assert_eq!(*handle.status().borrow(), ConnectionStatus::Idle);
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_reported_not_retried() {
        let (tx, _rx) = mpsc::channel(4);
        let handle = BrokerHandle::new(test_params(), tx);
        let mut status = handle.status();

        handle.connect().await;

        let failed = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if matches!(*status.borrow_and_update(), ConnectionStatus::Failed { .. }) {
                    return true;
                }
                if status.changed().await.is_err() {
                    return false;
                }
            }
        })
        .await;
        assert_eq!(failed.ok(), Some(true));

        handle.shutdown().await;
        handle.shutdown().await;
    }
}
