// SPDX-License-Identifier: MIT

//! Transition publisher
//!
//! After every transition the root context is published twice: as an audit
//! event describing the edge, and as the retained status record of the
//! workflow that revival starts from.

use crate::machine::context::{Context, MachineContext};
use crate::machine::state::TERMINAL;
use crate::machine::transport::{Message, QoS};
use serde_json::{json, Value};
use std::time::Duration;

/// Default bound on the wait for a status acknowledgment
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// What happened to the retained status record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The broker acknowledged the record
    Acknowledged,
    /// No acknowledgment within the bound; durability may lag
    TimedOut,
    /// The transport rejected the record
    Failed,
    /// No record was written
    Skipped,
}

/// Publishes transition records for a state machine runner
#[derive(Debug, Clone)]
pub struct TransitionPublisher {
    events_topic: String,
    ack_timeout: Duration,
}

impl TransitionPublisher {
    pub fn new(events_topic: impl Into<String>, ack_timeout: Duration) -> Self {
        Self {
            events_topic: events_topic.into(),
            ack_timeout,
        }
    }

    /// The root context as a mapping, tagged with the status and owning machine
    pub fn status_payload(root: &Context, machine: &str, status: &str) -> Value {
        let mut map = root.to_map();
        map.insert("status".into(), Value::String(status.to_string()));
        map.insert("machine".into(), Value::String(machine.to_string()));
        Value::Object(map)
    }

    /// Text describing a transition edge
    pub fn transition_text(machine: &str, previous: &str, next: &str) -> String {
        format!("{} state machine: {} ➜ {}", machine, previous, next)
    }

    /// Record the transition `previous ➜ next` of `machine`.
    ///
    /// The terminal transition of a nested machine is only emitted as an
    /// event: the parent's record must not look finished.
    pub async fn publish<C: MachineContext + ?Sized>(
        &self,
        context: &C,
        machine: &str,
        next: &str,
        previous: &str,
    ) -> PublishOutcome {
        let root = context.root();
        let Some(client) = root.client.as_ref() else {
            log::debug!(
                "No transport attached, transition not published. id={}",
                root.id
            );
            return PublishOutcome::Skipped;
        };

        let status = Self::status_payload(root, machine, next);
        let event = json!({
            "text": Self::transition_text(machine, previous, next),
            "time": chrono::Utc::now().to_rfc3339(),
            "context": status.clone(),
        });
        if let Err(e) = client
            .publish(Message::new(self.events_topic.clone(), event.to_string()))
            .await
        {
            log::warn!("Failed to publish transition event: {}", e);
        }

        if next == TERMINAL && !context.is_root() {
            return PublishOutcome::Skipped;
        }
        self.publish_status(root, status).await
    }

    /// Publish a status record on the root context's topic and wait, bounded,
    /// for its acknowledgment
    pub async fn publish_status(&self, root: &Context, status: Value) -> PublishOutcome {
        let Some(client) = root.client.as_ref() else {
            return PublishOutcome::Skipped;
        };
        if root.topic.is_empty() {
            log::debug!("Context has no topic, status not persisted. id={}", root.id);
            return PublishOutcome::Skipped;
        }

        log::info!(
            "Publishing message: topic={}, payload={}",
            root.topic,
            status
        );
        let message = Message::new(root.topic.clone(), status.to_string())
            .with_qos(QoS::AtLeastOnce)
            .with_retain();

        match tokio::time::timeout(self.ack_timeout, client.publish(message)).await {
            Ok(Ok(())) => PublishOutcome::Acknowledged,
            Ok(Err(e)) => {
                log::error!("Failed to publish status. topic={}: {}", root.topic, e);
                PublishOutcome::Failed
            }
            Err(_) => {
                log::warn!(
                    "Status not acknowledged within {:?}, continuing. topic={}",
                    self.ack_timeout,
                    root.topic
                );
                PublishOutcome::TimedOut
            }
        }
    }
}

impl Default for TransitionPublisher {
    fn default() -> Self {
        Self::new("events/state_machine", DEFAULT_ACK_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::transport::testing::RecordingTransport;
    use std::sync::Arc;

    const TOPIC: &str = "operations/main/external/update/op-1";

    fn context(transport: &Arc<RecordingTransport>) -> Context {
        Context::new("op-1", TOPIC)
            .with_children(vec!["dev-1".into()])
            .with_client(transport.clone())
    }

    /// Nested context for exercising the nested-terminal rule
    #[derive(Debug)]
    struct Nested<'a>(&'a Context);

    impl MachineContext for Nested<'_> {
        fn root(&self) -> &Context {
            self.0
        }
    }

    #[tokio::test]
    async fn test_publishes_event_then_retained_status() {
        let transport = Arc::new(RecordingTransport::new());
        let publisher = TransitionPublisher::new("events/sm", Duration::from_secs(1));
        let ctx = context(&transport);

        let outcome = publisher
            .publish(&ctx, "ExternalUpdater", "UpdateChildren", "Prepare")
            .await;
        assert_eq!(outcome, PublishOutcome::Acknowledged);

        let messages = transport.messages();
        assert_eq!(messages.len(), 2);

        let event = &messages[0];
        assert_eq!(event.topic, "events/sm");
        assert!(!event.retain);
        assert_eq!(event.qos, QoS::AtMostOnce);
        let event: Value = serde_json::from_str(&event.payload).unwrap();
        assert_eq!(
            event["text"],
            "ExternalUpdater state machine: Prepare ➜ UpdateChildren"
        );
        assert_eq!(event["context"]["status"], "UpdateChildren");
        assert!(event["time"].is_string());

        let status = &messages[1];
        assert_eq!(status.topic, TOPIC);
        assert!(status.retain);
        assert_eq!(status.qos, QoS::AtLeastOnce);
        let status: Value = serde_json::from_str(&status.payload).unwrap();
        assert_eq!(status["status"], "UpdateChildren");
        assert_eq!(status["machine"], "ExternalUpdater");
        assert_eq!(status["id"], "op-1");
        assert_eq!(status["children"], json!(["dev-1"]));
    }

    #[tokio::test]
    async fn test_terminal_status_is_empty() {
        let transport = Arc::new(RecordingTransport::new());
        let ctx = context(&transport);

        TransitionPublisher::default()
            .publish(&ctx, "ExternalUpdater", TERMINAL, "Finalize")
            .await;

        assert_eq!(transport.retained()[0]["status"], "");
        assert_eq!(
            transport.event_texts()[0],
            "ExternalUpdater state machine: Finalize ➜ "
        );
    }

    #[tokio::test]
    async fn test_ack_timeout_is_not_an_error() {
        let transport = Arc::new(RecordingTransport::without_acks());
        let publisher = TransitionPublisher::new("events/sm", Duration::from_millis(20));
        let ctx = context(&transport);

        let outcome = publisher
            .publish(&ctx, "ExternalUpdater", "Reboot", "Rollback")
            .await;

        assert_eq!(outcome, PublishOutcome::TimedOut);
        assert_eq!(transport.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_without_client_nothing_is_published() {
        let ctx = Context::new("op-1", TOPIC);
        let outcome = TransitionPublisher::default()
            .publish(&ctx, "ExternalUpdater", "Reboot", "Rollback")
            .await;
        assert_eq!(outcome, PublishOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_nested_terminal_only_emits_event() {
        let transport = Arc::new(RecordingTransport::new());
        let ctx = context(&transport);
        let nested = Nested(&ctx);
        let publisher = TransitionPublisher::default();

        let outcome = publisher
            .publish(&nested, "ChildUpdater", "Install", "Prepare")
            .await;
        assert_eq!(outcome, PublishOutcome::Acknowledged);

        let outcome = publisher
            .publish(&nested, "ChildUpdater", TERMINAL, "Finalize")
            .await;
        assert_eq!(outcome, PublishOutcome::Skipped);

        let retained = transport.retained();
        assert_eq!(retained.len(), 1);
        assert_eq!(retained[0]["status"], "Install");
        assert_eq!(retained[0]["machine"], "ChildUpdater");
        assert_eq!(transport.event_texts().len(), 2);
    }
}
