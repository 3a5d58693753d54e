// SPDX-License-Identifier: MIT

//! Workflow context
//!
//! A `Context` is the mutable state threaded through a workflow and the
//! record persisted after every transition. Nested workflows use their own
//! context types that borrow the parent and resolve `root()` to it.

use crate::machine::error::MachineError;
use crate::machine::transport::Transport;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Any context a state machine can run over
pub trait MachineContext: Send + Sync + fmt::Debug {
    /// The top-level context, whatever the nesting depth
    fn root(&self) -> &Context;

    /// Whether this context is the top-level one
    fn is_root(&self) -> bool {
        false
    }
}

/// Top-level workflow context
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Context {
    /// Workflow identity, stable for the whole workflow lifetime
    pub id: String,
    /// Topic on which the workflow status is persisted
    pub topic: String,
    /// Publish capability, never persisted
    #[serde(skip)]
    pub client: Option<Arc<dyn Transport>>,
    pub successful: bool,
    pub reason: String,
    pub children: Vec<String>,
}

impl Context {
    pub fn new(id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            ..Self::default()
        }
    }

    /// Attach the live transport
    pub fn with_client(mut self, client: Arc<dyn Transport>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_children(mut self, children: Vec<String>) -> Self {
        self.children = children;
        self
    }

    /// Record the outcome of the run
    pub fn set_outcome(&mut self, successful: bool, reason: impl Into<String>) {
        self.successful = successful;
        self.reason = reason.into();
    }

    /// Serialize to a plain key/value mapping, without the transport
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("id".into(), Value::String(self.id.clone()));
        map.insert("topic".into(), Value::String(self.topic.clone()));
        map.insert("successful".into(), Value::Bool(self.successful));
        map.insert("reason".into(), Value::String(self.reason.clone()));
        map.insert(
            "children".into(),
            Value::Array(self.children.iter().cloned().map(Value::String).collect()),
        );
        map
    }

    /// Reconstruct from a persisted mapping.
    ///
    /// Unknown keys are ignored and missing keys keep their default. The
    /// transport has to be re-attached by the caller.
    pub fn from_value(value: Value) -> Result<Self, MachineError> {
        if !value.is_object() {
            return Err(MachineError::MalformedPayload(format!(
                "expected a JSON object, got {}",
                value
            )));
        }
        Ok(serde_json::from_value(value)?)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("successful", &self.successful)
            .field("reason", &self.reason)
            .field("children", &self.children)
            .finish()
    }
}

impl MachineContext for Context {
    fn root(&self) -> &Context {
        self
    }

    fn is_root(&self) -> bool {
        true
    }
}
