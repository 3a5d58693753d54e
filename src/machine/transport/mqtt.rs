// SPDX-License-Identifier: MIT

//! MQTT transport adapter
//!
//! `MqttTransport` is the publish side handed to workflow contexts.
//! `MqttConnection` owns the event loop: it re-subscribes after every
//! successful connection, forwards inbound publishes and resolves pending
//! acknowledgments.

use super::{Message, QoS, Transport};
use crate::machine::error::TransportError;
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Connection settings for the broker
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
}

/// Tracks publishes waiting for the broker's acknowledgment.
///
/// Packet ids are only known once the event loop sends the packet, so
/// waiters are queued in request order and bound to a packet id when the
/// matching outgoing publish is observed.
#[derive(Default)]
struct PendingAcks {
    unassigned: VecDeque<oneshot::Sender<()>>,
    inflight: HashMap<u16, oneshot::Sender<()>>,
}

impl PendingAcks {
    fn sent(&mut self, pkid: u16) {
        // pkid 0 is QoS 0; a known pkid is a retransmission
        if pkid == 0 || self.inflight.contains_key(&pkid) {
            return;
        }
        // drop waiters whose publisher stopped waiting
        self.inflight.retain(|_, waiter| !waiter.is_closed());
        if let Some(waiter) = self.unassigned.pop_front() {
            self.inflight.insert(pkid, waiter);
        }
    }

    fn acknowledged(&mut self, pkid: u16) {
        if let Some(waiter) = self.inflight.remove(&pkid) {
            let _ = waiter.send(());
        }
    }
}

/// Publish side of the MQTT connection
pub struct MqttTransport {
    client: AsyncClient,
    pending: Arc<Mutex<PendingAcks>>,
    // Keeps waiter registration and request submission in the same order
    submit: tokio::sync::Mutex<()>,
}

/// Event loop side of the MQTT connection
pub struct MqttConnection {
    client: AsyncClient,
    eventloop: EventLoop,
    pending: Arc<Mutex<PendingAcks>>,
    inbound: mpsc::Sender<Message>,
}

/// Create the transport pair and the receiver of inbound messages.
///
/// Nothing happens on the network until `MqttConnection::run` is polled.
pub fn connect(
    settings: &MqttSettings,
) -> (Arc<MqttTransport>, MqttConnection, mpsc::Receiver<Message>) {
    let mut options = MqttOptions::new(
        settings.client_id.clone(),
        settings.host.clone(),
        settings.port,
    );
    options.set_keep_alive(Duration::from_secs(60));
    options.set_clean_session(true);

    let (client, eventloop) = AsyncClient::new(options, 64);
    let pending = Arc::new(Mutex::new(PendingAcks::default()));
    let (tx, rx) = mpsc::channel(64);

    let transport = Arc::new(MqttTransport {
        client: client.clone(),
        pending: pending.clone(),
        submit: tokio::sync::Mutex::new(()),
    });
    let connection = MqttConnection {
        client,
        eventloop,
        pending,
        inbound: tx,
    };

    (transport, connection, rx)
}

fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

fn from_mqtt_qos(qos: rumqttc::QoS) -> QoS {
    match qos {
        rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
        rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
        rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(&self, message: Message) -> Result<(), TransportError> {
        let qos = to_mqtt_qos(message.qos);
        let waiter = {
            let _guard = self.submit.lock().await;
            let waiter = if message.qos == QoS::AtMostOnce {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                if let Ok(mut pending) = self.pending.lock() {
                    pending.unassigned.push_back(tx);
                }
                Some(rx)
            };
            let submitted = self
                .client
                .publish(
                    message.topic,
                    qos,
                    message.retain,
                    message.payload.into_bytes(),
                )
                .await;
            if let Err(e) = submitted {
                if waiter.is_some() {
                    if let Ok(mut pending) = self.pending.lock() {
                        pending.unassigned.pop_back();
                    }
                }
                return Err(TransportError::Client(e.to_string()));
            }
            waiter
        };

        match waiter {
            Some(rx) => rx.await.map_err(|_| TransportError::Disconnected),
            None => Ok(()),
        }
    }
}

impl MqttConnection {
    /// Drive the event loop until the inbound receiver is dropped,
    /// subscribing to `subscriptions` on every connection
    pub async fn run(mut self, subscriptions: Vec<String>) {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    log::info!("Client is connected. rc={:?}", ack.code);
                    if ack.code == ConnectReturnCode::Success {
                        self.subscribe(&subscriptions);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let payload = match String::from_utf8(publish.payload.to_vec()) {
                        Ok(payload) => payload,
                        Err(_) => {
                            log::error!("Dropping non UTF-8 message. topic={}", publish.topic);
                            continue;
                        }
                    };
                    let message = Message {
                        topic: publish.topic,
                        payload,
                        qos: from_mqtt_qos(publish.qos),
                        retain: publish.retain,
                    };
                    if self.inbound.send(message).await.is_err() {
                        log::info!("Inbound receiver closed, stopping MQTT event loop");
                        return;
                    }
                }
                Ok(Event::Incoming(Packet::PubAck(ack))) => self.acknowledged(ack.pkid),
                Ok(Event::Incoming(Packet::PubComp(comp))) => self.acknowledged(comp.pkid),
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                    if let Ok(mut pending) = self.pending.lock() {
                        pending.sent(pkid);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    log::warn!("MQTT connection error: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    fn subscribe(&self, subscriptions: &[String]) {
        for filter in subscriptions {
            let subscribed = self
                .client
                .try_subscribe(filter.clone(), rumqttc::QoS::ExactlyOnce);
            match subscribed {
                Ok(()) => log::info!("Subscribed. topic={}", filter),
                Err(e) => log::error!("Failed to subscribe to {}: {}", filter, e),
            }
        }
    }

    fn acknowledged(&self, pkid: u16) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.acknowledged(pkid);
        }
    }
}
