// SPDX-License-Identifier: MIT

//! Message router
//!
//! Classifies inbound workflow messages: a request starts a new workflow,
//! a persisted state name revives the workflow at that state, anything
//! else is ignored.

use crate::machine::context::Context;
use crate::machine::error::MachineError;
use crate::machine::registry::WorkflowRegistry;
use crate::machine::state::TERMINAL;
use crate::machine::transport::Transport;
use crate::updater::external::{ExternalState, ExternalUpdater};
use crate::updater::status::Status;
use crate::updater::topic::{WorkflowTopic, EXTERNAL_UPDATE};
use serde_json::Value;
use std::sync::Arc;

/// How a dispatched workflow came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Request,
    Revival,
}

/// A workflow to be started by the registry
#[derive(Debug)]
pub struct Dispatch {
    pub identity: String,
    pub context: Context,
    pub initial_state: ExternalState,
    pub origin: Origin,
}

pub struct Router {
    topic_root: String,
    transport: Arc<dyn Transport>,
}

impl Router {
    pub fn new(topic_root: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            topic_root: topic_root.into(),
            transport,
        }
    }

    /// Decide what to do with an inbound message.
    ///
    /// Malformed messages are logged and dropped.
    pub async fn on_message(
        &self,
        topic: &str,
        payload: &str,
        registry: &WorkflowRegistry,
    ) -> Option<Dispatch> {
        match self.classify(topic, payload, registry).await {
            Ok(dispatch) => dispatch,
            Err(e) => {
                log::error!("Unknown message format. topic={}: {}", topic, e);
                None
            }
        }
    }

    async fn classify(
        &self,
        topic: &str,
        payload: &str,
        registry: &WorkflowRegistry,
    ) -> Result<Option<Dispatch>, MachineError> {
        let workflow_topic = WorkflowTopic::parse(&self.topic_root, topic)?;
        let payload: Value = serde_json::from_str(payload)?;
        if !payload.is_object() {
            return Err(MachineError::MalformedPayload(format!(
                "expected a JSON object, got {}",
                payload
            )));
        }
        log::info!("Received message: topic={}, payload={}", topic, payload);

        let category = workflow_topic.category();
        log::debug!("Detected message type: {}", category);
        if category != EXTERNAL_UPDATE {
            log::info!("Ignoring message of type {}", category);
            return Ok(None);
        }

        let identity = workflow_topic.identity;
        let status = payload
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or(TERMINAL)
            .to_string();

        if status == Status::Request.as_str() {
            let children = parse_children(&payload)?;
            let context = Context::new(identity.clone(), topic)
                .with_children(children)
                .with_client(self.transport.clone());
            return Ok(Some(Dispatch {
                identity,
                context,
                initial_state: ExternalState::Prepare,
                origin: Origin::Request,
            }));
        }

        if status == TERMINAL {
            log::debug!(
                "Ignoring {} workflow status. id={} (terminal)",
                category,
                identity
            );
            return Ok(None);
        }

        let machine = payload.get("machine").and_then(Value::as_str);
        let initial_state = match ExternalUpdater::resume_state(machine, &status) {
            Ok(state) => state,
            Err(_) => {
                log::debug!("Ignoring {} workflow status. {}", category, status);
                return Ok(None);
            }
        };

        if registry.is_active(&identity).await {
            log::info!(
                "Workflow is running, not reviving. id={} status={}",
                identity,
                status
            );
            return Ok(None);
        }

        log::info!("Reviving workflow. id={} state={}", identity, initial_state);
        let mut context = Context::from_value(payload)?.with_client(self.transport.clone());
        context.id = identity.clone();
        context.topic = topic.to_string();

        Ok(Some(Dispatch {
            identity,
            context,
            initial_state,
            origin: Origin::Revival,
        }))
    }
}

/// The child identifiers of a request; absent or null means none
fn parse_children(payload: &Value) -> Result<Vec<String>, MachineError> {
    let Some(children) = payload.get("children").filter(|c| !c.is_null()) else {
        return Ok(Vec::new());
    };
    serde_json::from_value(children.clone())
        .map_err(|e| MachineError::MalformedPayload(format!("children: {}", e)))
}
