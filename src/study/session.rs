//! Per-node study state machine.
//!
//! An attempt runs two activities side by side:
//! - a **watcher** task polling the node's remote progress and publishing it
//!   over a `watch` channel (it is the only writer of that state), and
//! - the **submitter**, the session's own loop, sending heartbeats and
//!   reading the latest watcher state before each one.
//!
//! A watcher failure restarts the whole node from scratch; the loop in
//! [`StudySession::run`] counts restarts and optionally caps them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationSignal;
use crate::client::{CaptchaSolver, HeartbeatRequest, NodeId, StudyClient, StudyNode};
use crate::config::SessionConfig;
use crate::error::{ClientError, TaskError};

/// Study time claimed per accepted heartbeat, in seconds.
pub const HEARTBEAT_STEP_SECS: u64 = 10;

/// Study time sent with the first heartbeat of an attempt.
pub const INITIAL_STUDY_TIME: u64 = 1;

/// How a node session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    Completed,
    Cancelled,
    Aborted(String),
}

/// Latest remote state as published by the watcher.
#[derive(Debug, Clone, PartialEq)]
enum WatchState {
    Watching { progress: f64 },
    Complete,
    Failed(String),
}

/// Heartbeat sequence of one attempt; owned by the submitter alone.
#[derive(Debug, Clone, PartialEq, Eq)]
struct NodeStudyState {
    study_id: i64,
    study_time: u64,
    pending_captcha: Option<String>,
}

impl NodeStudyState {
    fn fresh() -> Self {
        Self {
            study_id: 0,
            study_time: INITIAL_STUDY_TIME,
            pending_captcha: None,
        }
    }

    fn request(&self, node_id: NodeId) -> HeartbeatRequest {
        HeartbeatRequest {
            node_id,
            study_time: self.study_time,
            study_id: self.study_id,
            captcha: self.pending_captcha.clone(),
        }
    }

    fn accept(&mut self, study_id: i64) {
        self.study_id = study_id;
        self.study_time += HEARTBEAT_STEP_SECS;
        self.pending_captcha = None;
    }
}

enum Attempt {
    Finished(NodeOutcome),
    Restart(String),
}

/// Collaborators shared by every session of a worker.
#[derive(Clone)]
pub struct SessionDeps {
    pub client: Arc<dyn StudyClient>,
    pub solver: Arc<dyn CaptchaSolver>,
    pub cancel: Arc<CancellationSignal>,
    pub config: SessionConfig,
}

/// Drives one study node until the platform reports it complete.
pub struct StudySession<'a> {
    deps: &'a SessionDeps,
    user: &'a str,
    node: &'a StudyNode,
}

impl<'a> StudySession<'a> {
    pub fn new(deps: &'a SessionDeps, user: &'a str, node: &'a StudyNode) -> Self {
        Self { deps, user, node }
    }

    /// Run the node to a terminal outcome.
    ///
    /// Returns `Completed` without any network call when the cached listing
    /// already shows the node watched.
    pub async fn run(&self) -> NodeOutcome {
        if self.node.is_watched() {
            debug!(
                user = %self.user,
                node_id = self.node.id,
                "Node already watched, skipping"
            );
            return NodeOutcome::Completed;
        }

        let mut restarts: u32 = 0;
        loop {
            if self.deps.cancel.is_set() {
                info!(user = %self.user, node_id = self.node.id, "Stop requested, not starting node");
                return NodeOutcome::Cancelled;
            }

            info!(
                user = %self.user,
                node_id = self.node.id,
                node = %self.node.name,
                restarts,
                "Studying node"
            );

            match self.attempt().await {
                Attempt::Finished(outcome) => return outcome,
                Attempt::Restart(reason) => {
                    restarts += 1;
                    if let Some(max) = self.deps.config.max_restarts {
                        if restarts > max {
                            let err = TaskError::RestartLimit {
                                node_id: self.node.id,
                                restarts: max,
                            };
                            error!(user = %self.user, node_id = self.node.id, "{err}");
                            return NodeOutcome::Aborted(err.to_string());
                        }
                    }
                    warn!(
                        user = %self.user,
                        node_id = self.node.id,
                        restarts,
                        "Progress watcher failed ({reason}), restarting node"
                    );
                    tokio::time::sleep(self.deps.config.retry_delay).await;
                }
            }
        }
    }

    async fn attempt(&self) -> Attempt {
        let (tx, mut rx) = watch::channel(WatchState::Watching { progress: 0.0 });
        // Detached: the watcher exits once `rx` is dropped with this attempt.
        let _watcher = spawn_watcher(
            Arc::clone(&self.deps.client),
            self.node.id,
            self.deps.config.poll_interval,
            tx,
        );
        let mut state = NodeStudyState::fresh();

        loop {
            let latest = rx.borrow_and_update().clone();
            let progress = match latest {
                WatchState::Complete => {
                    info!(user = %self.user, node_id = self.node.id, "Node complete");
                    return Attempt::Finished(NodeOutcome::Completed);
                }
                _ if self.deps.cancel.is_set() => {
                    info!(user = %self.user, node_id = self.node.id, "Stop requested, leaving node");
                    return Attempt::Finished(NodeOutcome::Cancelled);
                }
                WatchState::Failed(reason) => return Attempt::Restart(reason),
                WatchState::Watching { progress } => progress,
            };

            let request = state.request(self.node.id);
            match self.deps.client.submit_heartbeat(&request).await {
                Ok(receipt) => {
                    state.accept(receipt.study_id);
                    info!(
                        user = %self.user,
                        node_id = self.node.id,
                        study_id = state.study_id,
                        study_time = request.study_time,
                        "{} current progress: {:.0}%",
                        receipt.message,
                        progress * 100.0
                    );
                    tokio::time::sleep(self.deps.config.heartbeat_interval).await;
                }
                Err(e) if e.needs_captcha() => {
                    warn!(
                        user = %self.user,
                        node_id = self.node.id,
                        study_time = state.study_time,
                        "Heartbeat needs captcha: {e}"
                    );
                    match self.solve_captcha().await {
                        Ok(code) => {
                            info!(user = %self.user, "Captcha recognized: {code}");
                            state.pending_captcha = Some(code);
                        }
                        Err(e) => {
                            warn!(user = %self.user, "Captcha recognition failed: {e}");
                            state.pending_captcha = None;
                            tokio::time::sleep(self.deps.config.retry_delay).await;
                        }
                    }
                }
                Err(e) if e.is_transport() => {
                    warn!(
                        user = %self.user,
                        node_id = self.node.id,
                        study_id = state.study_id,
                        study_time = state.study_time,
                        "Heartbeat failed, retrying: {e}"
                    );
                    tokio::time::sleep(self.deps.config.retry_delay).await;
                }
                Err(e) => {
                    error!(
                        user = %self.user,
                        node_id = self.node.id,
                        study_id = state.study_id,
                        study_time = state.study_time,
                        "Heartbeat rejected: {e}"
                    );
                    return Attempt::Finished(NodeOutcome::Aborted(e.to_string()));
                }
            }
        }
    }

    async fn solve_captcha(&self) -> Result<String, ClientError> {
        let image = self.deps.client.captcha_image().await?;
        self.deps.solver.solve(&image).await
    }
}

/// Poll remote progress until the node completes, a query fails, or the
/// session stops listening.
fn spawn_watcher(
    client: Arc<dyn StudyClient>,
    node_id: NodeId,
    interval: Duration,
    tx: watch::Sender<WatchState>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match client.query_node_progress(node_id).await {
                Ok(progress) if progress.complete => {
                    let _ = tx.send(WatchState::Complete);
                    return;
                }
                Ok(progress) => {
                    let update = WatchState::Watching {
                        progress: progress.progress,
                    };
                    if tx.send(update).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!(node_id, "Progress query failed: {e}");
                    let _ = tx.send(WatchState::Failed(e.to_string()));
                    return;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = tx.closed() => return,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_starts_sequence() {
        let state = NodeStudyState::fresh();
        assert_eq!(state.study_id, 0);
        assert_eq!(state.study_time, INITIAL_STUDY_TIME);
        assert!(state.pending_captcha.is_none());
    }

    #[test]
    fn accept_advances_and_clears_captcha() {
        let mut state = NodeStudyState::fresh();
        state.pending_captcha = Some("ab12".into());
        let request = state.request(42);
        assert_eq!(request.captcha.as_deref(), Some("ab12"));
        assert_eq!(request.node_id, 42);

        state.accept(777);
        assert_eq!(state.study_id, 777);
        assert_eq!(state.study_time, INITIAL_STUDY_TIME + HEARTBEAT_STEP_SECS);
        assert!(state.pending_captcha.is_none());
    }
}
