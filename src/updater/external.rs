// SPDX-License-Identifier: MIT

//! External updater state machine
//!
//! Updates the main device and its children:
//! Prepare → UpdateChildren → (Finalize | Rollback → Reboot → Finalize).
//! `UpdateChildren` runs one nested child workflow per child, in order.

use crate::machine::context::Context;
use crate::machine::error::MachineError;
use crate::machine::publisher::{PublishOutcome, TransitionPublisher};
use crate::machine::runner::Runner;
use crate::machine::state::{resolve, StateId, StateMachine};
use crate::updater::child::{ChildContext, ChildState, ChildUpdater};
use crate::updater::status::Status;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalState {
    Prepare,
    UpdateChildren,
    Rollback,
    Reboot,
    Finalize,
}

static STATES: Lazy<HashMap<&'static str, ExternalState>> = Lazy::new(|| {
    [
        ExternalState::Prepare,
        ExternalState::UpdateChildren,
        ExternalState::Rollback,
        ExternalState::Reboot,
        ExternalState::Finalize,
    ]
    .into_iter()
    .map(|s| (s.name(), s))
    .collect()
});

impl StateId for ExternalState {
    fn name(&self) -> &'static str {
        match self {
            ExternalState::Prepare => "Prepare",
            ExternalState::UpdateChildren => "UpdateChildren",
            ExternalState::Rollback => "Rollback",
            ExternalState::Reboot => "Reboot",
            ExternalState::Finalize => "Finalize",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        STATES.get(name).copied()
    }
}

impl fmt::Display for ExternalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Main device update workflow
pub struct ExternalUpdater {
    child: ChildUpdater,
    child_runner: Runner,
    publisher: TransitionPublisher,
}

impl ExternalUpdater {
    pub const NAME: &'static str = "ExternalUpdater";

    pub fn new(child: ChildUpdater, child_runner: Runner, publisher: TransitionPublisher) -> Self {
        Self {
            child,
            child_runner,
            publisher,
        }
    }

    /// The state to resume from, given a persisted record's status and
    /// owning machine.
    ///
    /// A record written by the nested child machine resumes the parent at
    /// the state that runs the children.
    pub fn resume_state(
        machine: Option<&str>,
        status: &str,
    ) -> Result<ExternalState, MachineError> {
        match machine {
            Some(ChildUpdater::NAME) => ChildState::from_name(status)
                .map(|_| ExternalState::UpdateChildren)
                .ok_or_else(|| MachineError::unknown_state(ChildUpdater::NAME, status)),
            _ => resolve(Self::NAME, status),
        }
    }

    async fn update_children(&self, context: &mut Context) -> ExternalState {
        log::info!("Starting to update child devices");

        let mut child_errors = Vec::new();
        for child in context.children.clone() {
            let mut child_context = ChildContext::new(child.clone(), context);
            let initial = StateMachine::<ChildContext>::initial_state(&self.child);
            self.child_runner
                .run(&self.child, &mut child_context, Some(initial), None)
                .await;
            if !child_context.successful {
                child_errors.push(child);
            }
        }

        if child_errors.is_empty() {
            context.set_outcome(true, "");
            ExternalState::Finalize
        } else {
            log::info!("Rolling back version of children");
            context.set_outcome(
                false,
                format!("Some child devices failed to update. {:?}", child_errors),
            );
            ExternalState::Rollback
        }
    }

    async fn finalize(&self, context: &mut Context) -> Result<(), MachineError> {
        log::info!("Finished updating child devices. {:?}", context);

        let status = Status::Response.as_str();
        let response = TransitionPublisher::status_payload(context, Self::NAME, status);
        match self.publisher.publish_status(context, response).await {
            PublishOutcome::Failed => Err(MachineError::step(
                ExternalState::Finalize.name(),
                format!("could not publish response on {}", context.topic),
            )),
            _ => Ok(()),
        }
    }
}

impl Default for ExternalUpdater {
    fn default() -> Self {
        Self::new(
            ChildUpdater::default(),
            Runner::default(),
            TransitionPublisher::default(),
        )
    }
}

#[async_trait]
impl StateMachine<Context> for ExternalUpdater {
    type State = ExternalState;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn initial_state(&self) -> ExternalState {
        ExternalState::Prepare
    }

    async fn step(
        &self,
        state: ExternalState,
        context: &mut Context,
    ) -> Result<Option<ExternalState>, MachineError> {
        let next = match state {
            ExternalState::Prepare => {
                log::info!("Preparing update. children={:?}", context.children);
                Some(ExternalState::UpdateChildren)
            }
            ExternalState::UpdateChildren => Some(self.update_children(context).await),
            ExternalState::Rollback => {
                log::info!("Rolling back main device. {:?}", context);
                Some(ExternalState::Reboot)
            }
            ExternalState::Reboot => {
                log::info!("Restarting. {:?}", context);
                Some(ExternalState::Finalize)
            }
            ExternalState::Finalize => {
                self.finalize(context).await?;
                None
            }
        };
        Ok(next)
    }
}
