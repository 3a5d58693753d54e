// SPDX-License-Identifier: MIT

//! Workflow registry
//!
//! Maps a workflow identity to its running execution. At most one live
//! execution exists per identity; finished executions are evicted whenever a
//! new one is started.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

#[derive(Clone, Default)]
pub struct WorkflowRegistry {
    workers: Arc<RwLock<HashMap<String, JoinHandle<()>>>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an execution for `identity` unless one is still running.
    ///
    /// `factory` is only invoked when the execution is actually started.
    /// Returns whether a new execution was spawned.
    pub async fn start<F, Fut>(&self, identity: &str, factory: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut workers = self.workers.write().await;
        if let Some(worker) = workers.get(identity) {
            if !worker.is_finished() {
                log::info!(
                    "Workflow is already running, ignoring start. id={}",
                    identity
                );
                return false;
            }
        }

        let before = workers.len();
        workers.retain(|_, worker| !worker.is_finished());
        if workers.len() < before {
            log::debug!("Evicted {} finished workflows", before - workers.len());
        }

        log::info!("Queuing state machine. id={}", identity);
        let worker = tokio::spawn(factory());
        workers.insert(identity.to_string(), worker);
        true
    }

    /// Whether an execution for `identity` is still running
    pub async fn is_active(&self, identity: &str) -> bool {
        let workers = self.workers.read().await;
        workers
            .get(identity)
            .map(|worker| !worker.is_finished())
            .unwrap_or(false)
    }

    /// Number of executions still running
    pub async fn active_count(&self) -> usize {
        let workers = self.workers.read().await;
        workers.values().filter(|w| !w.is_finished()).count()
    }

    /// Wait for every registered execution, each bounded by `timeout`.
    ///
    /// Executions still running after the timeout are abandoned. Returns the
    /// number of abandoned executions.
    pub async fn join_all(&self, timeout: Duration) -> usize {
        let workers: Vec<(String, JoinHandle<()>)> = {
            let mut workers = self.workers.write().await;
            workers.drain().collect()
        };

        let waits = workers.into_iter().map(|(id, worker)| async move {
            match tokio::time::timeout(timeout, worker).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    log::error!("Workflow ended abnormally. id={}: {}", id, e);
                    true
                }
                Err(_) => {
                    log::warn!(
                        "Workflow did not finish within {:?}, abandoning. id={}",
                        timeout,
                        id
                    );
                    false
                }
            }
        });
        let results = futures::future::join_all(waits).await;

        results.into_iter().filter(|finished| !finished).count()
    }
}
