// SPDX-License-Identifier: MIT

//! Workflow execution engine
//!
//! This module provides:
//! - `Context` / `MachineContext` - state threaded through a workflow
//! - `StateMachine` / `StateId` - state graphs dispatched by state name
//! - `Runner` - the transition loop with pacing and error-state mapping
//! - `TransitionPublisher` - audit events and retained status records
//! - `WorkflowRegistry` - at most one live execution per workflow identity
//! - `Transport` - the publish/subscribe boundary

pub mod context;
pub mod error;
pub mod publisher;
pub mod registry;
pub mod runner;
pub mod state;
pub mod transport;

pub use context::{Context, MachineContext};
pub use error::{MachineError, TransportError};
pub use publisher::{PublishOutcome, TransitionPublisher};
pub use registry::WorkflowRegistry;
pub use runner::Runner;
pub use state::{StateId, StateMachine, TERMINAL};
pub use transport::{Message, QoS, Transport};
