/*
[INPUT]:  Session handle, UpdateSink, inbound Commands
[OUTPUT]: Running flow set (task-list watch, preview lock, command dispatcher) with bounded shutdown
[POS]:    Orchestration layer - unit of lifecycle for one engine session
[UPDATE]: When adding a flow or changing per-command concurrency semantics
*/

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, anyhow};
use serde::Serialize;
use taskpanel_session::{CreateTaskPayload, Session};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::preview_lock::{PreviewInput, run_preview_flow};
use crate::rpc::{self, RestartOutcome};
use crate::store::{StateUpdate, UpdateSink};
use crate::subscription::{watch_task_list, watch_test_task_status};

pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// A flow that ended in error, reported to the host for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowFailure {
    pub command: &'static str,
    pub message: String,
}

#[derive(Debug)]
struct ManagedFlow {
    name: &'static str,
    handle: JoinHandle<Result<()>>,
}

/// Composes every flow of one engine session and owns their lifetime.
///
/// Started flows:
/// - the task-list watch (one subscription for the whole session)
/// - the preview lock flow
/// - the command dispatcher, which services each command on its own task
///
/// `RUN_TEST_TASK` is latest-only: a newer request cancels the previous one
/// while its RPC is still outstanding. Every other command runs
/// concurrently and may complete out of order.
#[derive(Debug)]
pub struct TaskSessionCoordinator {
    session: Session,
    commands: mpsc::UnboundedSender<Command>,
    failures: Option<mpsc::UnboundedReceiver<FlowFailure>>,
    flows: Vec<ManagedFlow>,
    shutdown: CancellationToken,
    shutdown_timeout: Duration,
}

impl TaskSessionCoordinator {
    /// Launch every flow for `session`. Must be called inside a tokio runtime.
    pub fn start(session: Session, sink: UpdateSink) -> Self {
        Self::start_with_timeout(session, sink, SHUTDOWN_TIMEOUT)
    }

    pub fn start_with_timeout(session: Session, sink: UpdateSink, shutdown_timeout: Duration) -> Self {
        let shutdown = CancellationToken::new();
        let (snapshots_tx, snapshots_rx) = watch::channel(Arc::new(Vec::new()));
        let (peers_tx, peers_rx) = watch::channel(false);
        let (preview_tx, preview_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();

        let flows = vec![
            spawn_flow(
                "task-list-watch",
                watch_task_list(
                    session.clone(),
                    sink.clone(),
                    snapshots_tx,
                    peers_rx,
                    shutdown.child_token(),
                ),
            ),
            spawn_flow(
                "preview-lock",
                run_preview_flow(snapshots_rx, preview_rx, sink.clone(), shutdown.child_token()),
            ),
            spawn_flow(
                "command-dispatcher",
                Dispatcher {
                    session: session.clone(),
                    sink,
                    failures: failures_tx,
                    preview: preview_tx,
                    peers: peers_tx,
                    handlers: JoinSet::new(),
                    latest_test_run: None,
                    test_watch: None,
                    token: shutdown.child_token(),
                }
                .run(commands_rx),
            ),
        ];
        info!(flow_count = flows.len(), "task session coordinator started");

        Self {
            session,
            commands: commands_tx,
            failures: Some(failures_rx),
            flows,
            shutdown,
            shutdown_timeout,
        }
    }

    /// Queue a command for the dispatcher.
    pub fn dispatch(&self, command: Command) -> Result<()> {
        let kind = command.kind();
        self.commands
            .send(command)
            .map_err(|_| anyhow!("coordinator is shut down; dropped {kind}"))
    }

    /// Restart `task_id` and hand the classified outcome straight back.
    ///
    /// Unlike `RESTART_TASK`, nothing is sent to the store.
    pub async fn restart_task(&self, task_id: &str) -> RestartOutcome {
        rpc::restart_task(&self.session, task_id).await
    }

    /// Failures of command flows. Can be taken once.
    pub fn take_failures(&mut self) -> Option<mpsc::UnboundedReceiver<FlowFailure>> {
        self.failures.take()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel every flow and wait for them to finish their cleanup.
    ///
    /// Bounded by the configured timeout; stragglers are aborted, which still
    /// releases their subscriptions.
    pub async fn shutdown_and_wait(&mut self) -> Result<()> {
        self.shutdown.cancel();
        self.join_all_with_deadline(self.shutdown_timeout).await
    }

    async fn join_all_with_deadline(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut flows = std::mem::take(&mut self.flows);
        let mut first_error = None;

        while let Some(flow) = flows.pop() {
            let mut handle = flow.handle;
            let sleep = sleep_until_deadline(deadline);

            tokio::select! {
                res = &mut handle => {
                    if let Err(err) = flow_result(flow.name, res) {
                        warn!(flow = flow.name, error = %format!("{err:#}"), "flow ended with error");
                        first_error.get_or_insert(err);
                    }
                }
                _ = sleep => {
                    handle.abort();
                    abort_all(flows);
                    return Err(anyhow!("shutdown timed out after {timeout:?}"));
                }
            }
        }

        info!("task session coordinator stopped");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for TaskSessionCoordinator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn spawn_flow<F>(name: &'static str, flow: F) -> ManagedFlow
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    ManagedFlow {
        name,
        handle: tokio::spawn(flow),
    }
}

fn flow_result(name: &str, res: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    match res {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(err).with_context(|| format!("flow returned error flow={name}")),
        Err(join_err) if join_err.is_panic() => Err(anyhow!("flow panicked flow={name}: {join_err}")),
        Err(join_err) => Err(anyhow!("flow join error flow={name}: {join_err}")),
    }
}

fn abort_all(flows: Vec<ManagedFlow>) {
    for flow in flows {
        flow.handle.abort();
    }
}

fn sleep_until_deadline(deadline: Instant) -> std::pin::Pin<Box<Sleep>> {
    Box::pin(tokio::time::sleep_until(deadline))
}

/// Routes commands to flows. Owns the slots that give `RUN_TEST_TASK` and
/// the dry-run watch their supersede semantics.
struct Dispatcher {
    session: Session,
    sink: UpdateSink,
    failures: mpsc::UnboundedSender<FlowFailure>,
    preview: mpsc::UnboundedSender<PreviewInput>,
    peers: watch::Sender<bool>,
    handlers: JoinSet<()>,
    latest_test_run: Option<CancellationToken>,
    test_watch: Option<CancellationToken>,
    token: CancellationToken,
}

impl Dispatcher {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) -> Result<()> {
        let mut accepting = true;

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                command = commands.recv(), if accepting => match command {
                    Some(command) => self.dispatch(command),
                    // In-flight flows keep running until the session is torn down.
                    None => {
                        debug!("command stream closed");
                        accepting = false;
                    }
                },
                Some(joined) = self.handlers.join_next() => reap(joined),
            }
        }

        while let Some(joined) = self.handlers.join_next().await {
            reap(joined);
        }
        debug!("command dispatcher stopped");
        Ok(())
    }

    fn dispatch(&mut self, command: Command) {
        let kind = command.kind();
        debug!(command = kind, "command received");

        match command {
            Command::GetTaskPresets(Some(task_type)) => {
                let session = self.session.clone();
                self.spawn_update(kind, async move { rpc::task_presets(&session, &task_type).await });
            }
            Command::SaveTaskPreset(Some(request)) => {
                let session = self.session.clone();
                self.spawn_silent(kind, async move { rpc::save_task_preset(&session, request).await });
            }
            Command::DeleteTaskPreset(Some(name)) => {
                let session = self.session.clone();
                self.spawn_silent(kind, async move { rpc::delete_task_preset(&session, &name).await });
            }
            Command::GetTaskDetails(Some(task_id)) => {
                let session = self.session.clone();
                self.spawn_update(kind, async move { rpc::task_details(&session, &task_id).await });
            }
            Command::GetEstimatedCost(Some(payload)) => {
                let session = self.session.clone();
                self.spawn_update(kind, async move { rpc::estimated_cost(&session, payload).await });
            }
            Command::CreateTask(Some(payload)) => self.create_task(kind, payload),
            Command::DeleteTask(Some(task_id)) => {
                // Optimistic: selection and lock are released before the engine answers.
                let _ = self.preview.send(PreviewInput::Deleted);
                let session = self.session.clone();
                self.spawn_silent(kind, async move { rpc::delete_task(&session, &task_id).await });
            }
            Command::RunTestTask(Some(payload)) => {
                let token = self.token.child_token();
                if let Some(previous) = self.latest_test_run.replace(token.clone()) {
                    debug!("superseding previous test task run");
                    previous.cancel();
                }
                let session = self.session.clone();
                self.spawn_with_token(kind, token, async move {
                    rpc::run_test_task(&session, payload).await.map(|_| None)
                });
            }
            Command::RestartTask(Some(task_id)) => {
                let session = self.session.clone();
                self.spawn_with_token(kind, self.token.child_token(), async move {
                    match rpc::restart_task(&session, &task_id).await {
                        RestartOutcome::Success => Ok(None),
                        RestartOutcome::InsufficientFunds => {
                            Ok(Some(StateUpdate::InsufficientFunds { task_id }))
                        }
                        RestartOutcome::OtherFailure(message) => {
                            Err(anyhow!("restart failed task_id={task_id}: {message}"))
                        }
                    }
                });
            }
            Command::SelectTask(task_id) => {
                let _ = self.preview.send(PreviewInput::Select(task_id));
            }
            Command::SetConnectedPeers(connected) => {
                self.peers.send_replace(connected);
            }
            Command::GetTaskPresets(None)
            | Command::SaveTaskPreset(None)
            | Command::DeleteTaskPreset(None)
            | Command::GetTaskDetails(None)
            | Command::GetEstimatedCost(None)
            | Command::CreateTask(None)
            | Command::DeleteTask(None)
            | Command::RunTestTask(None)
            | Command::RestartTask(None) => {
                debug!(command = kind, "command without payload ignored");
            }
        }
    }

    /// A build replaces any dry-run watch; a dry run replaces the previous one.
    fn create_task(&mut self, kind: &'static str, payload: CreateTaskPayload) {
        if let Some(previous) = self.test_watch.take() {
            debug!("cancelling previous test task watch");
            previous.cancel();
        }

        if payload.is_build() {
            let session = self.session.clone();
            self.spawn_silent(kind, async move { rpc::create_task(&session, payload).await });
        } else if payload.is_dry_run() {
            let token = self.token.child_token();
            self.test_watch = Some(token.clone());
            let session = self.session.clone();
            self.spawn_silent(kind, watch_test_task_status(session, token));
        } else {
            debug!(command = kind, "create payload has neither options nor type");
        }
    }

    fn spawn_update<F>(&mut self, kind: &'static str, flow: F)
    where
        F: Future<Output = Result<StateUpdate>> + Send + 'static,
    {
        let token = self.token.child_token();
        self.spawn_with_token(kind, token, async move { flow.await.map(Some) });
    }

    fn spawn_silent<F>(&mut self, kind: &'static str, flow: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let token = self.token.child_token();
        self.spawn_with_token(kind, token, async move { flow.await.map(|()| None) });
    }

    /// Run `flow` until it finishes or `token` is cancelled. Cancellation
    /// drops the flow, including any outstanding RPC.
    fn spawn_with_token<F>(&mut self, kind: &'static str, token: CancellationToken, flow: F)
    where
        F: Future<Output = Result<Option<StateUpdate>>> + Send + 'static,
    {
        let sink = self.sink.clone();
        let failures = self.failures.clone();

        self.handlers.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => debug!(command = kind, "flow cancelled"),
                result = flow => match result {
                    Ok(Some(update)) => sink.send(update),
                    Ok(None) => debug!(command = kind, "flow completed"),
                    Err(err) => {
                        let message = format!("{err:#}");
                        warn!(command = kind, error = %message, "flow failed");
                        let _ = failures.send(FlowFailure { command: kind, message });
                    }
                },
            }
        });
    }
}

fn reap(joined: std::result::Result<(), JoinError>) {
    if let Err(join_err) = joined {
        if join_err.is_panic() {
            warn!(error = %join_err, "command flow panicked");
        }
    }
}
