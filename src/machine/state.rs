// SPDX-License-Identifier: MIT

//! States and state machines
//!
//! A state is identified by name: the name is what gets persisted as
//! `status` and what revival matches against. Each machine declares its
//! states as a closed enum implementing `StateId`.

use crate::machine::context::MachineContext;
use crate::machine::error::MachineError;
use async_trait::async_trait;
use std::fmt;

/// Name used for the terminal marker in transition records
pub const TERMINAL: &str = "";

/// Identifier of one state of a machine
pub trait StateId: Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// The persisted name of the state
    fn name(&self) -> &'static str;

    /// Look a state up by its persisted name
    fn from_name(name: &str) -> Option<Self>;
}

/// Name of an optional state, `TERMINAL` for `None`
pub fn state_name<S: StateId>(state: Option<S>) -> &'static str {
    state.map(|s| s.name()).unwrap_or(TERMINAL)
}

/// Resolve a persisted name to a state of the given machine
pub fn resolve<S: StateId>(machine: &str, name: &str) -> Result<S, MachineError> {
    S::from_name(name).ok_or_else(|| MachineError::unknown_state(machine, name))
}

/// A state graph over a context type.
///
/// `step` is the body of one state: it mutates the context and returns the
/// next state, or `None` when the workflow is done.
#[async_trait]
pub trait StateMachine<C: MachineContext>: Send + Sync {
    type State: StateId;

    /// Returns the machine name
    fn name(&self) -> &str;

    /// The state a new workflow starts in
    fn initial_state(&self) -> Self::State;

    /// Run the given state over the context
    async fn step(
        &self,
        state: Self::State,
        context: &mut C,
    ) -> Result<Option<Self::State>, MachineError>;
}
