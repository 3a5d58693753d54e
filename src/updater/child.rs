// SPDX-License-Identifier: MIT

//! Child updater state machine
//!
//! Updates a single child device: Prepare → Install → Verify →
//! (Commit | Rollback) → Finalize. Runs nested inside the parent workflow
//! and publishes only through the parent's root context.

use crate::machine::context::{Context, MachineContext};
use crate::machine::error::MachineError;
use crate::machine::state::{StateId, StateMachine};
use async_trait::async_trait;
use std::fmt;

/// Context of one child update; borrows the parent context
#[derive(Debug)]
pub struct ChildContext<'a> {
    pub child_id: String,
    pub successful: bool,
    pub parent: &'a mut Context,
}

impl<'a> ChildContext<'a> {
    pub fn new(child_id: impl Into<String>, parent: &'a mut Context) -> Self {
        Self {
            child_id: child_id.into(),
            successful: false,
            parent,
        }
    }
}

impl MachineContext for ChildContext<'_> {
    fn root(&self) -> &Context {
        self.parent.root()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Prepare,
    Install,
    Verify,
    Commit,
    Rollback,
    Finalize,
}

impl ChildState {
    pub const ALL: [ChildState; 6] = [
        ChildState::Prepare,
        ChildState::Install,
        ChildState::Verify,
        ChildState::Commit,
        ChildState::Rollback,
        ChildState::Finalize,
    ];
}

impl StateId for ChildState {
    fn name(&self) -> &'static str {
        match self {
            ChildState::Prepare => "Prepare",
            ChildState::Install => "Install",
            ChildState::Verify => "Verify",
            ChildState::Commit => "Commit",
            ChildState::Rollback => "Rollback",
            ChildState::Finalize => "Finalize",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }
}

impl fmt::Display for ChildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-child update workflow
#[derive(Debug, Clone)]
pub struct ChildUpdater {
    fault_marker: String,
}

impl ChildUpdater {
    pub const NAME: &'static str = "ChildUpdater";

    /// Children whose id contains `fault_marker` fail verification.
    /// An empty marker disables fault injection.
    pub fn new(fault_marker: impl Into<String>) -> Self {
        Self {
            fault_marker: fault_marker.into(),
        }
    }

    fn verification_fails(&self, child_id: &str) -> bool {
        !self.fault_marker.is_empty() && child_id.contains(&self.fault_marker)
    }
}

impl Default for ChildUpdater {
    fn default() -> Self {
        Self::new("2")
    }
}

#[async_trait]
impl<'a> StateMachine<ChildContext<'a>> for ChildUpdater {
    type State = ChildState;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn initial_state(&self) -> ChildState {
        ChildState::Prepare
    }

    async fn step(
        &self,
        state: ChildState,
        context: &mut ChildContext<'a>,
    ) -> Result<Option<ChildState>, MachineError> {
        let next = match state {
            ChildState::Prepare => Some(ChildState::Install),
            ChildState::Install => Some(ChildState::Verify),
            ChildState::Verify => {
                if self.verification_fails(&context.child_id) {
                    log::warn!("Verification failed. child={}", context.child_id);
                    Some(ChildState::Rollback)
                } else {
                    Some(ChildState::Commit)
                }
            }
            ChildState::Commit => {
                context.successful = true;
                Some(ChildState::Finalize)
            }
            ChildState::Rollback => {
                log::info!("Rolling back child. child={}", context.child_id);
                Some(ChildState::Finalize)
            }
            ChildState::Finalize => None,
        };
        Ok(next)
    }
}
