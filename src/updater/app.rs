// SPDX-License-Identifier: MIT

//! Application wiring
//!
//! Connects the router, the registry and the external updater machine, and
//! runs the blocking dispatch loop with graceful shutdown.

use crate::machine::publisher::TransitionPublisher;
use crate::machine::registry::WorkflowRegistry;
use crate::machine::runner::Runner;
use crate::machine::transport::mqtt::{self, MqttSettings};
use crate::machine::transport::{Message, Transport};
use crate::updater::child::ChildUpdater;
use crate::updater::config::Config;
use crate::updater::external::ExternalUpdater;
use crate::updater::router::{Dispatch, Router};
use crate::updater::topic::UPDATE_REQUESTS;
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct App {
    config: Config,
    router: Router,
    registry: WorkflowRegistry,
    runner: Runner,
    machine: Arc<ExternalUpdater>,
}

impl App {
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Self {
        let publisher = TransitionPublisher::new(config.events_topic(), config.ack_timeout);
        let machine = ExternalUpdater::new(
            ChildUpdater::new(config.fault_marker.clone()),
            Runner::new(publisher.clone(), config.child_step_delay),
            publisher.clone(),
        );

        Self {
            router: Router::new(config.topic_root.clone(), transport),
            registry: WorkflowRegistry::new(),
            runner: Runner::new(publisher, config.step_delay),
            machine: Arc::new(machine),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    /// Topic filters the application listens to
    pub fn subscriptions(&self) -> Vec<String> {
        vec![self.config.topic(UPDATE_REQUESTS)]
    }

    /// Route one inbound message; returns whether a workflow was started
    pub async fn handle_message(&self, topic: &str, payload: &str) -> bool {
        match self.router.on_message(topic, payload, &self.registry).await {
            Some(dispatch) => self.run_workflow(dispatch).await,
            None => false,
        }
    }

    async fn run_workflow(&self, dispatch: Dispatch) -> bool {
        let Dispatch {
            identity,
            context,
            initial_state,
            origin,
        } = dispatch;
        let machine = self.machine.clone();
        let runner = self.runner.clone();

        log::info!(
            "Starting {} from {}. id={} origin={:?}",
            ExternalUpdater::NAME,
            initial_state,
            identity,
            origin
        );
        self.registry
            .start(&identity, move || async move {
                let mut context = context;
                runner
                    .run(machine.as_ref(), &mut context, Some(initial_state), None)
                    .await;
            })
            .await
    }

    /// Wait for running workflows, bounded by the shutdown timeout.
    /// Returns the number of abandoned workflows.
    pub async fn wait_all_workflows(&self) -> usize {
        self.registry.join_all(self.config.shutdown_timeout).await
    }
}

/// Dispatch inbound messages until `shutdown` resolves or the transport
/// closes. A failing `shutdown` signal is logged and dispatching goes on.
async fn dispatch<S>(app: &App, inbound: &mut mpsc::Receiver<Message>, shutdown: S)
where
    S: Future<Output = io::Result<()>>,
{
    tokio::pin!(shutdown);
    let mut interruptible = true;
    loop {
        tokio::select! {
            message = inbound.recv() => match message {
                Some(message) => {
                    app.handle_message(&message.topic, &message.payload).await;
                }
                None => {
                    log::warn!("Transport closed, stopping");
                    break;
                }
            },
            signal = &mut shutdown, if interruptible => match signal {
                Ok(()) => {
                    log::info!("Termination requested");
                    break;
                }
                Err(e) => {
                    log::error!("Failed to listen for termination signal: {}", e);
                    interruptible = false;
                }
            },
        }
    }
}

/// Connect to the broker and dispatch messages until interrupted
pub async fn serve(config: Config) {
    let settings = MqttSettings {
        host: config.mqtt_host.clone(),
        port: config.mqtt_port,
        client_id: config.client_id.clone(),
    };
    let (transport, connection, mut inbound) = mqtt::connect(&settings);
    let app = App::new(config, transport);

    log::info!(
        "Connecting to broker. host={} port={}",
        settings.host,
        settings.port
    );
    let event_loop = tokio::spawn(connection.run(app.subscriptions()));

    dispatch(&app, &mut inbound, tokio::signal::ctrl_c()).await;

    // Stop accepting work but keep the connection alive for pending acks
    tokio::spawn(async move { while inbound.recv().await.is_some() {} });

    log::info!(
        "Waiting for workflows to finish. timeout={:?}",
        app.config().shutdown_timeout
    );
    let abandoned = app.wait_all_workflows().await;
    if abandoned > 0 {
        log::warn!("Abandoned {} unfinished workflows", abandoned);
    }

    event_loop.abort();
    log::info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::transport::testing::RecordingTransport;
    use std::time::Duration;

    const TOPIC: &str = "operations/main/external/update/op-1";

    fn quick_config() -> Config {
        Config {
            step_delay: Duration::ZERO,
            child_step_delay: Duration::ZERO,
            ..Config::default()
        }
    }

    #[test]
    fn test_subscriptions_follow_topic_root() {
        let transport = Arc::new(RecordingTransport::new());
        let app = App::new(quick_config(), transport.clone());
        assert_eq!(app.subscriptions(), vec!["operations/+/external/update/+"]);

        let config = Config {
            topic_root: "tedge".into(),
            ..quick_config()
        };
        let app = App::new(config, transport);
        assert_eq!(
            app.subscriptions(),
            vec!["tedge/operations/+/external/update/+"]
        );
    }

    #[tokio::test]
    async fn test_request_runs_to_completion() {
        let transport = Arc::new(RecordingTransport::new());
        let app = App::new(quick_config(), transport.clone());

        let started = app
            .handle_message(
                TOPIC,
                r#"{"status": "external_request", "children": ["dev-1"]}"#,
            )
            .await;
        assert!(started);
        assert_eq!(app.wait_all_workflows().await, 0);

        let last = transport.retained().pop().unwrap();
        assert_eq!(last["status"], "");
        assert_eq!(last["successful"], true);
        assert!(transport
            .messages()
            .iter()
            .filter(|m| !m.retain)
            .all(|m| m.topic == "events/state_machine"));
    }

    #[tokio::test]
    async fn test_dispatch_continues_when_signal_fails() {
        let transport = Arc::new(RecordingTransport::new());
        let app = App::new(quick_config(), transport.clone());
        let (tx, mut rx) = mpsc::channel(4);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let request = r#"{"status": "external_request", "children": ["dev-1"]}"#;
            tx.send(Message::new(TOPIC, request)).await.unwrap();
        });
        let failing = async { Err::<(), _>(io::Error::other("no handler")) };

        dispatch(&app, &mut rx, failing).await;
        assert_eq!(app.wait_all_workflows().await, 0);

        let last = transport.retained().pop().unwrap();
        assert_eq!(last["status"], "");
        assert_eq!(last["successful"], true);
    }

    #[tokio::test]
    async fn test_dispatch_stops_on_signal() {
        let app = App::new(quick_config(), Arc::new(RecordingTransport::new()));
        let (_tx, mut rx) = mpsc::channel::<Message>(4);

        dispatch(&app, &mut rx, async { Ok::<(), io::Error>(()) }).await;
        assert_eq!(app.registry().active_count().await, 0);
    }
}
