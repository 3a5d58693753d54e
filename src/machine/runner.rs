// SPDX-License-Identifier: MIT

//! Transition loop
//!
//! Drives a state machine from an initial state until it reaches the
//! terminal marker, persisting every transition on the way.

use crate::machine::context::MachineContext;
use crate::machine::publisher::TransitionPublisher;
use crate::machine::state::{state_name, StateId, StateMachine};
use std::time::Duration;

/// Runs state machines with a given pacing and publisher
#[derive(Debug, Clone)]
pub struct Runner {
    publisher: TransitionPublisher,
    step_delay: Duration,
}

impl Runner {
    pub fn new(publisher: TransitionPublisher, step_delay: Duration) -> Self {
        Self {
            publisher,
            step_delay,
        }
    }

    /// Run `machine` over `context` starting at `initial_state`.
    ///
    /// A failing step is replaced by `error_state`; with no error state the
    /// workflow ends right away. Failures never reach the caller.
    pub async fn run<C, M>(
        &self,
        machine: &M,
        context: &mut C,
        initial_state: Option<M::State>,
        error_state: Option<M::State>,
    ) where
        C: MachineContext,
        M: StateMachine<C> + ?Sized,
    {
        log::info!("Running state machine: {}", machine.name());

        let mut state = initial_state;
        while let Some(current) = state {
            log::info!(
                "Running state: {}::{} context={:?}",
                machine.name(),
                current,
                context
            );

            let next = match machine.step(current, context).await {
                Ok(next) => next,
                Err(e) => {
                    log::error!("State error. {}::{} {:?}", machine.name(), current, e);
                    error_state
                }
            };

            self.publisher
                .publish(&*context, machine.name(), state_name(next), current.name())
                .await;

            state = next;

            if !self.step_delay.is_zero() {
                tokio::time::sleep(self.step_delay).await;
            }
        }

        log::info!("State machine finished: {}", machine.name());
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new(TransitionPublisher::default(), Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::context::Context;
    use crate::machine::error::MachineError;
    use crate::machine::transport::testing::RecordingTransport;
    use async_trait::async_trait;
    use std::fmt;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Step {
        One,
        Two,
        Broken,
        Recover,
    }

    impl fmt::Display for Step {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.name())
        }
    }

    impl StateId for Step {
        fn name(&self) -> &'static str {
            match self {
                Step::One => "One",
                Step::Two => "Two",
                Step::Broken => "Broken",
                Step::Recover => "Recover",
            }
        }

        fn from_name(_name: &str) -> Option<Self> {
            None
        }
    }

    /// Records visited states; `Broken` always fails
    #[derive(Default)]
    struct Counter {
        visited: Mutex<Vec<Step>>,
    }

    #[async_trait]
    impl StateMachine<Context> for Counter {
        type State = Step;

        fn name(&self) -> &str {
            "Counter"
        }

        fn initial_state(&self) -> Step {
            Step::One
        }

        async fn step(
            &self,
            state: Step,
            context: &mut Context,
        ) -> Result<Option<Step>, MachineError> {
            self.visited.lock().unwrap().push(state);
            match state {
                Step::One => {
                    context.reason.push('1');
                    Ok(Some(Step::Two))
                }
                Step::Two => {
                    context.reason.push('2');
                    Ok(None)
                }
                Step::Broken => Err(MachineError::step("Broken", "boom")),
                Step::Recover => {
                    context.set_outcome(false, "recovered");
                    Ok(None)
                }
            }
        }
    }

    fn context(transport: &Arc<RecordingTransport>) -> Context {
        Context::new("op-1", "operations/main/external/update/op-1").with_client(transport.clone())
    }

    #[tokio::test]
    async fn test_runs_until_terminal() {
        let transport = Arc::new(RecordingTransport::new());
        let mut ctx = context(&transport);
        let machine = Counter::default();

        Runner::default()
            .run(&machine, &mut ctx, Some(Step::One), None)
            .await;

        assert_eq!(*machine.visited.lock().unwrap(), vec![Step::One, Step::Two]);
        assert_eq!(ctx.reason, "12");
        assert_eq!(
            transport.event_texts(),
            vec![
                "Counter state machine: One ➜ Two",
                "Counter state machine: Two ➜ ",
            ]
        );
        let statuses: Vec<_> = transport
            .retained()
            .iter()
            .map(|v| v["status"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(statuses, vec!["Two", ""]);
    }

    #[tokio::test]
    async fn test_failure_without_error_state_terminates() {
        let transport = Arc::new(RecordingTransport::new());
        let mut ctx = context(&transport);
        let machine = Counter::default();

        Runner::default()
            .run(&machine, &mut ctx, Some(Step::Broken), None)
            .await;

        assert_eq!(*machine.visited.lock().unwrap(), vec![Step::Broken]);
        assert_eq!(
            transport.event_texts(),
            vec!["Counter state machine: Broken ➜ "]
        );
    }

    #[tokio::test]
    async fn test_failure_moves_to_error_state() {
        let transport = Arc::new(RecordingTransport::new());
        let mut ctx = context(&transport);
        let machine = Counter::default();

        Runner::default()
            .run(&machine, &mut ctx, Some(Step::Broken), Some(Step::Recover))
            .await;

        assert_eq!(
            *machine.visited.lock().unwrap(),
            vec![Step::Broken, Step::Recover]
        );
        assert_eq!(ctx.reason, "recovered");
    }

    #[tokio::test]
    async fn test_no_initial_state_does_nothing() {
        let transport = Arc::new(RecordingTransport::new());
        let mut ctx = context(&transport);
        let machine = Counter::default();

        Runner::default().run(&machine, &mut ctx, None, None).await;

        assert!(machine.visited.lock().unwrap().is_empty());
        assert!(transport.messages().is_empty());
    }

    #[tokio::test]
    async fn test_step_delay_paces_transitions() {
        let transport = Arc::new(RecordingTransport::new());
        let mut ctx = context(&transport);
        let machine = Counter::default();
        let runner = Runner::new(TransitionPublisher::default(), Duration::from_millis(30));

        let started = std::time::Instant::now();
        runner.run(&machine, &mut ctx, Some(Step::One), None).await;

        assert!(started.elapsed() >= Duration::from_millis(60));
    }
}
