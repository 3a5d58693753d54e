// SPDX-License-Identifier: MIT

//! Typed error handling for the workflow engine
//!
//! Every failure in the engine is local: step failures are mapped to an
//! error state by the runner, malformed messages are dropped by the router.
//! These types carry the detail that ends up in the logs.

use thiserror::Error;

/// Top-level error type for the workflow engine
#[derive(Debug, Error)]
pub enum MachineError {
    /// A persisted status does not name a state of the machine
    #[error("Unknown state '{name}' for state machine {machine}")]
    UnknownState { machine: String, name: String },

    /// Business logic inside a state failed
    #[error("State {state} failed: {message}")]
    Step { state: String, message: String },

    /// The topic does not have the expected workflow shape
    #[error("Not a workflow topic: {0}")]
    MalformedTopic(String),

    /// The payload is not a workflow status record
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Invalid runtime configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Errors raised at the transport boundary
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection to the broker is gone
    #[error("Transport is disconnected")]
    Disconnected,

    /// The underlying client refused the request
    #[error("Client error: {0}")]
    Client(String),
}

impl MachineError {
    /// Create an unknown state error
    pub fn unknown_state(machine: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UnknownState {
            machine: machine.into(),
            name: name.into(),
        }
    }

    /// Create a step failure
    pub fn step(state: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Step {
            state: state.into(),
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
