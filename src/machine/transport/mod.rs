// SPDX-License-Identifier: MIT

//! Transport boundary
//!
//! The engine only needs to publish messages and to know when the broker has
//! taken responsibility for them. Connection handling lives behind this trait.

pub mod mqtt;

use crate::machine::error::TransportError;
use async_trait::async_trait;

/// Delivery guarantee requested for a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// A message exchanged with the broker
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

impl Message {
    /// A fire-and-forget, non-retained message
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    pub fn with_qos(self, qos: QoS) -> Self {
        Self { qos, ..self }
    }

    pub fn with_retain(self) -> Self {
        Self {
            retain: true,
            ..self
        }
    }
}

/// Publish capability handed to workflow contexts
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a message.
    ///
    /// For `AtMostOnce` this resolves once the message is queued; for the
    /// other levels it resolves when the broker acknowledges the message.
    async fn publish(&self, message: Message) -> Result<(), TransportError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every published message; optionally never acknowledges
    /// messages that require an acknowledgment.
    #[derive(Default)]
    pub struct RecordingTransport {
        messages: Mutex<Vec<Message>>,
        withhold_acks: bool,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn without_acks() -> Self {
            Self {
                withhold_acks: true,
                ..Self::default()
            }
        }

        pub fn messages(&self) -> Vec<Message> {
            self.messages.lock().unwrap().clone()
        }

        /// Payloads of retained messages, in publication order
        pub fn retained(&self) -> Vec<serde_json::Value> {
            self.messages()
                .into_iter()
                .filter(|m| m.retain)
                .map(|m| serde_json::from_str(&m.payload).unwrap())
                .collect()
        }

        /// Texts of the audit events, in publication order
        pub fn event_texts(&self) -> Vec<String> {
            self.messages()
                .into_iter()
                .filter(|m| !m.retain)
                .map(|m| {
                    let json: serde_json::Value = serde_json::from_str(&m.payload).unwrap();
                    json["text"].as_str().unwrap_or_default().to_string()
                })
                .collect()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn publish(&self, message: Message) -> Result<(), TransportError> {
            let needs_ack = message.qos != QoS::AtMostOnce;
            self.messages.lock().unwrap().push(message);
            if needs_ack && self.withhold_acks {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }
}
