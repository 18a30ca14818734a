//! Persistent MQTT session shared by every gateway subsystem.
//!
//! One connection is opened at startup and driven by a background task for
//! the life of the process. Subscriptions are recorded next to the client so
//! a reconnect can restore the whole set, and every inbound publish lands on
//! a single channel for the router to classify.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::GatewayError;

/// Connection status of the broker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// A raw message delivered by the broker, before routing.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Cloneable handle to the broker session.
#[derive(Clone)]
pub struct BrokerHandle {
    client: AsyncClient,
    subscriptions: Arc<Mutex<HashSet<String>>>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl BrokerHandle {
    pub fn is_connected(&self) -> bool {
        *self.state_rx.borrow() == ConnectionState::Connected
    }

    /// Subscribes a topic at QoS 0 and records it for session restore.
    /// The topic goes into the restore set before the request is sent so a
    /// racing reconnect cannot miss it.
    pub async fn subscribe(&self, topic: impl Into<String>) -> Result<(), GatewayError> {
        let topic = topic.into();
        {
            let mut subscriptions = self.subscriptions.lock().await;
            subscriptions.insert(topic.clone());
        }
        if let Err(err) = self.client.subscribe(topic.clone(), QoS::AtMostOnce).await {
            let mut subscriptions = self.subscriptions.lock().await;
            subscriptions.remove(&topic);
            return Err(GatewayError::Transport(format!("subscribe {topic}: {err}")));
        }
        Ok(())
    }

    pub async fn unsubscribe(&self, topic: impl Into<String>) -> Result<(), GatewayError> {
        let topic = topic.into();
        {
            let mut subscriptions = self.subscriptions.lock().await;
            subscriptions.remove(&topic);
        }
        self.client
            .unsubscribe(topic.clone())
            .await
            .map_err(|err| GatewayError::Transport(format!("unsubscribe {topic}: {err}")))
    }

    /// Publishes at QoS 0, fire and forget. Refused while disconnected so
    /// callers fail fast instead of queueing into a dead session.
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: Vec<u8>,
    ) -> Result<(), GatewayError> {
        let topic = topic.into();
        if !self.is_connected() {
            return Err(GatewayError::Transport("broker disconnected".to_string()));
        }
        self.client
            .publish(topic.clone(), QoS::AtMostOnce, false, payload)
            .await
            .map_err(|err| GatewayError::Transport(format!("publish {topic}: {err}")))
    }

    /// Sorted snapshot of the topics the session restores on reconnect.
    pub async fn subscribed_topics(&self) -> Vec<String> {
        let subscriptions = self.subscriptions.lock().await;
        let mut topics: Vec<String> = subscriptions.iter().cloned().collect();
        topics.sort();
        topics
    }
}

/// Opens the broker session and waits for the first handshake. Startup is
/// the only place that gives up: once connected, the background task keeps
/// the session alive until the process exits.
pub async fn connect(
    config: &Config,
) -> Result<(BrokerHandle, mpsc::UnboundedReceiver<InboundMessage>), GatewayError> {
    let client_id = format!("vantage-gateway-{}", Uuid::new_v4());
    let mut options = MqttOptions::new(client_id, config.broker_host.clone(), config.broker_port);
    options.set_keep_alive(config.broker_keepalive);

    let (client, mut eventloop) = AsyncClient::new(options, 64);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    let reconnect_delay = config.broker_reconnect_delay;
    let handshake = tokio::time::timeout(config.broker_connect_timeout, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "broker handshake attempt failed, retrying");
                    tokio::time::sleep(reconnect_delay).await;
                }
            }
        }
    })
    .await;

    if handshake.is_err() {
        return Err(GatewayError::Transport(format!(
            "no broker handshake within {:?}",
            config.broker_connect_timeout
        )));
    }

    state_tx.send_replace(ConnectionState::Connected);
    info!(
        host = %config.broker_host,
        port = config.broker_port,
        "connected to broker"
    );

    let handle = BrokerHandle {
        client: client.clone(),
        subscriptions: Arc::new(Mutex::new(HashSet::new())),
        state_rx,
    };

    tokio::spawn(drive(
        eventloop,
        client,
        handle.subscriptions.clone(),
        state_tx,
        inbound_tx,
        reconnect_delay,
    ));

    Ok((handle, inbound_rx))
}

async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    subscriptions: Arc<Mutex<HashSet<String>>>,
    state_tx: watch::Sender<ConnectionState>,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    reconnect_delay: Duration,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                state_tx.send_replace(ConnectionState::Connected);
                let topics: Vec<String> = {
                    let subscriptions = subscriptions.lock().await;
                    subscriptions.iter().cloned().collect()
                };
                info!(
                    subscriptions = topics.len(),
                    "broker session established, restoring subscriptions"
                );
                for topic in topics {
                    if let Err(err) = client.subscribe(topic.clone(), QoS::AtMostOnce).await {
                        warn!(%topic, error = %err, "failed to restore subscription");
                    }
                }
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                let message = InboundMessage {
                    topic: publish.topic,
                    payload: publish.payload,
                };
                if inbound_tx.send(message).is_err() {
                    // Router gone, the gateway is shutting down.
                    return;
                }
            }
            Ok(_) => {}
            Err(err) => {
                state_tx.send_replace(ConnectionState::Disconnected);
                warn!(error = %err, "broker connection lost, reconnecting");
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}

#[cfg(test)]
impl BrokerHandle {
    /// Handle whose requests queue unseen by any broker. The event loop is
    /// kept alive but never driven, so client calls succeed without I/O.
    pub(crate) fn stub_for_tests() -> Self {
        Self::stub_with_state(ConnectionState::Connected)
    }

    pub(crate) fn stub_with_state(state: ConnectionState) -> Self {
        let options = MqttOptions::new("vantage-test", "127.0.0.1", 1883);
        let (client, eventloop) = AsyncClient::new(options, 128);
        std::mem::forget(eventloop);
        let (_state_tx, state_rx) = watch::channel(state);
        Self {
            client,
            subscriptions: Arc::new(Mutex::new(HashSet::new())),
            state_rx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_records_topics_for_session_restore() {
        let broker = BrokerHandle::stub_for_tests();
        broker.subscribe("/3ml/device/b/framed/out").await.unwrap();
        broker.subscribe("/3ml/device/a/framed/out").await.unwrap();
        broker.subscribe("/3ml/device/a/framed/out").await.unwrap();
        assert_eq!(
            broker.subscribed_topics().await,
            vec![
                "/3ml/device/a/framed/out".to_string(),
                "/3ml/device/b/framed/out".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn unsubscribe_drops_topic_from_restore_set() {
        let broker = BrokerHandle::stub_for_tests();
        broker.subscribe("/3ml/desk/d1/notification").await.unwrap();
        broker
            .unsubscribe("/3ml/desk/d1/notification")
            .await
            .unwrap();
        assert!(broker.subscribed_topics().await.is_empty());
    }

    #[tokio::test]
    async fn publish_is_refused_while_disconnected() {
        let broker = BrokerHandle::stub_with_state(ConnectionState::Disconnected);
        assert!(!broker.is_connected());
        let err = broker
            .publish("/3ml/rpc/op/request", b"{}".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
    }

    #[tokio::test]
    async fn publish_enqueues_while_connected() {
        let broker = BrokerHandle::stub_for_tests();
        broker
            .publish("/3ml/rpc/op/request", b"{}".to_vec())
            .await
            .unwrap();
    }
}
