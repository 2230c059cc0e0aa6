//! Dispatch loop and effect runner.
//!
//! The [`Runner`] owns the only [`State`]. Commands arrive on one ordered
//! channel; each action is reduced and its effects executed before the
//! next command is read. Follow-up [`Effect::Dispatch`] actions are
//! reduced immediately, in order, ahead of newer commands.
//!
//! Sends, archive loads, the flush timer and monitor subscriptions run as
//! separate tasks that report back through the same channel. They hold
//! only a weak sender, so the loop ends once every [`Courier`] handle is
//! gone.
//!
//! A cancelled send may already have reached the API, with its result
//! still queued behind newer commands. Cancelling only interrupts the
//! transport call, and the task is kept until the request is sent again;
//! the new send first waits for it and, if it succeeded, reports that
//! success instead of transmitting a second time.
//!
//! [`Courier`]: crate::Courier

use crate::archive::{Archive, ArchiveError};
use crate::monitor::{ConnectivityMonitor, LifecycleEvent, LifecycleMonitor};
use crate::transport::{Transport, TransportError};
use courier_core::{
    Action, ArchivedState, AttemptId, Effect, Environment, PipelineEvent, SendOutcome, State,
};
use courier_types::{Request, RequestId};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Messages accepted by the dispatch loop.
pub(crate) enum Command {
    /// Reduce an action.
    Dispatch(Action),
    /// Reply with a copy of the current state.
    Snapshot(oneshot::Sender<State>),
    /// Stop, write a final checkpoint and exit.
    Shutdown(oneshot::Sender<()>),
}

/// Everything the runner talks to.
pub(crate) struct Collaborators {
    pub environment: Arc<dyn Environment>,
    pub transport: Arc<dyn Transport>,
    pub archive: Arc<dyn Archive>,
    pub connectivity: ConnectivityMonitor,
    pub lifecycle: LifecycleMonitor,
    pub events: broadcast::Sender<PipelineEvent>,
    pub archive_timeout: Duration,
    pub transport_timeout: Duration,
}

/// A spawned send and the attempt it reports as.
///
/// The task resolves to the outcome it reported, or `None` if it was
/// cancelled before the transport answered.
struct SendTask {
    attempt: AttemptId,
    handle: JoinHandle<Option<SendOutcome>>,
    /// Dropping this interrupts the transport call.
    cancel: Option<oneshot::Sender<()>>,
}

pub(crate) struct Runner {
    state: State,
    rx: mpsc::UnboundedReceiver<Command>,
    weak: mpsc::WeakUnboundedSender<Command>,
    env: Arc<dyn Environment>,
    transport: Arc<dyn Transport>,
    archive: Arc<dyn Archive>,
    connectivity: ConnectivityMonitor,
    lifecycle: LifecycleMonitor,
    events: broadcast::Sender<PipelineEvent>,
    archive_timeout: Duration,
    transport_timeout: Duration,
    sends: HashMap<RequestId, SendTask>,
    /// Aborted sends whose result is not known yet.
    abandoned: HashMap<RequestId, SendTask>,
    flush_timer: Option<JoinHandle<()>>,
    monitor_tasks: Vec<JoinHandle<()>>,
    loader: Option<JoinHandle<()>>,
    archive_tx: Option<mpsc::UnboundedSender<ArchivedState>>,
    archive_writer: Option<JoinHandle<()>>,
}

impl Runner {
    /// Create a runner and the sender that feeds it.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn new(
        state: State,
        collaborators: Collaborators,
    ) -> (Self, mpsc::UnboundedSender<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (archive_tx, archive_writer) = spawn_archive_writer(
            collaborators.archive.clone(),
            collaborators.archive_timeout,
        );

        let runner = Self {
            state,
            rx,
            weak: tx.downgrade(),
            env: collaborators.environment,
            transport: collaborators.transport,
            archive: collaborators.archive,
            connectivity: collaborators.connectivity,
            lifecycle: collaborators.lifecycle,
            events: collaborators.events,
            archive_timeout: collaborators.archive_timeout,
            transport_timeout: collaborators.transport_timeout,
            sends: HashMap::new(),
            abandoned: HashMap::new(),
            flush_timer: None,
            monitor_tasks: Vec::new(),
            loader: None,
            archive_tx: Some(archive_tx),
            archive_writer: Some(archive_writer),
        };
        (runner, tx)
    }

    /// Process commands until shutdown or until every handle is dropped.
    pub(crate) async fn run(mut self) {
        tracing::info!("Dispatch loop started");

        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Dispatch(action) => self.dispatch(action),
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.state.clone());
                }
                Command::Shutdown(reply) => {
                    self.finish().await;
                    self.rx.close();
                    let _ = reply.send(());
                    return;
                }
            }
        }

        self.finish().await;
    }

    fn dispatch(&mut self, action: Action) {
        if let Action::DequeueCompletedResults { id, attempt, .. } = &action {
            self.settle(*id, *attempt);
        }

        let mut pending = VecDeque::from([action]);
        while let Some(action) = pending.pop_front() {
            match &action {
                Action::Start => tracing::info!("Starting pipeline"),
                Action::Stop => tracing::info!("Stopping pipeline"),
                other => tracing::trace!("Reducing {:?}", other),
            }

            for effect in self.state.reduce(action, self.env.as_ref()) {
                match effect {
                    Effect::Dispatch(next) => pending.push_back(next),
                    other => self.execute(other),
                }
            }
        }
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::LoadArchive { api_key } => self.load_archive(api_key),
            Effect::SubscribeMonitors => self.subscribe_monitors(),
            Effect::StartFlushTimer(period) => self.start_flush_timer(period),
            Effect::CancelFlushTimer => self.cancel_flush_timer(),
            Effect::Send { request, attempt } => self.send(request, attempt),
            Effect::CancelSends => self.cancel_sends(),
            Effect::Archive(checkpoint) => self.save_archive(checkpoint),
            Effect::Emit(event) => self.emit(event),
            // Reduced by the caller.
            Effect::Dispatch(_) => {}
        }
    }

    fn load_archive(&mut self, api_key: String) {
        let archive = self.archive.clone();
        let env = self.env.clone();
        let timeout = self.archive_timeout;
        let weak = self.weak.clone();

        tracing::debug!("Loading archive for key {}", api_key);
        let handle = tokio::spawn(async move {
            let loaded = match tokio::time::timeout(timeout, archive.load()).await {
                Ok(Ok(loaded)) => loaded,
                Ok(Err(e)) => {
                    tracing::warn!("Failed to load archive, starting fresh: {}", e);
                    None
                }
                Err(_) => {
                    tracing::warn!(
                        "Failed to load archive, starting fresh: {}",
                        ArchiveError::Timeout(timeout)
                    );
                    None
                }
            };

            let mut checkpoint = loaded.unwrap_or_default();
            if checkpoint.anonymous_id.is_empty() {
                checkpoint.anonymous_id = env.new_uuid().to_string();
            }

            if let Some(tx) = weak.upgrade() {
                let _ = tx.send(Command::Dispatch(Action::CompleteInitialization(checkpoint)));
            }
        });

        if let Some(previous) = self.loader.replace(handle) {
            previous.abort();
        }
    }

    fn subscribe_monitors(&mut self) {
        for task in self.monitor_tasks.drain(..) {
            task.abort();
        }

        self.monitor_tasks = vec![
            forward(
                self.connectivity.subscribe(),
                self.weak.clone(),
                Action::NetworkConnectivityChanged,
            ),
            forward(
                self.lifecycle.subscribe(),
                self.weak.clone(),
                LifecycleEvent::action,
            ),
        ];
        tracing::debug!("Subscribed to connectivity and lifecycle monitors");
    }

    fn start_flush_timer(&mut self, period: Duration) {
        self.cancel_flush_timer();

        let weak = self.weak.clone();
        tracing::debug!("Flush timer scheduled every {:?}", period);
        self.flush_timer = Some(tokio::spawn(async move {
            // Start already flushed, so the first tick is one period out.
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(tx) = weak.upgrade() else { break };
                if tx.send(Command::Dispatch(Action::FlushQueue)).is_err() {
                    break;
                }
            }
        }));
    }

    fn cancel_flush_timer(&mut self) {
        if let Some(timer) = self.flush_timer.take() {
            timer.abort();
            tracing::debug!("Flush timer cancelled");
        }
    }

    fn send(&mut self, request: Request, attempt: AttemptId) {
        let id = request.id;
        let previous = self.abandoned.remove(&id);
        let transport = self.transport.clone();
        let timeout = self.transport_timeout;
        let weak = self.weak.clone();
        let (cancel, mut cancelled) = oneshot::channel::<()>();

        tracing::debug!("Sending {} request {} ({})", request.kind(), id, attempt);
        let handle = tokio::spawn(async move {
            let earlier = match previous {
                Some(previous) => previous.handle.await.ok().flatten(),
                None => None,
            };
            let outcome = if earlier == Some(SendOutcome::Success) {
                tracing::debug!("Request {} already delivered by an earlier attempt", id);
                SendOutcome::Success
            } else {
                tokio::select! {
                    biased;
                    _ = &mut cancelled => return None,
                    result = tokio::time::timeout(timeout, transport.send(&request)) => {
                        match result {
                            Ok(Ok(())) => SendOutcome::Success,
                            Ok(Err(e)) => e.classify(),
                            Err(_) => TransportError::Timeout.classify(),
                        }
                    }
                }
            };
            if let Some(tx) = weak.upgrade() {
                let _ = tx.send(Command::Dispatch(Action::DequeueCompletedResults {
                    id,
                    attempt,
                    outcome: outcome.clone(),
                }));
            }
            Some(outcome)
        });

        let task = SendTask {
            attempt,
            handle,
            cancel: Some(cancel),
        };
        if let Some(mut replaced) = self.sends.insert(id, task) {
            replaced.cancel.take();
        }
    }

    /// Forget the task that produced this result, if it is still tracked.
    fn settle(&mut self, id: RequestId, attempt: AttemptId) {
        for tasks in [&mut self.sends, &mut self.abandoned] {
            if tasks.get(&id).is_some_and(|task| task.attempt == attempt) {
                tasks.remove(&id);
            }
        }
    }

    fn cancel_sends(&mut self) {
        let count = self.sends.len();
        for (id, mut task) in self.sends.drain() {
            task.cancel.take();
            self.abandoned.insert(id, task);
        }
        let state = &self.state;
        self.abandoned.retain(|id, _| state.contains(*id));
        if count > 0 {
            tracing::debug!("Cancelled {} outstanding sends", count);
        }
    }

    fn save_archive(&mut self, checkpoint: ArchivedState) {
        let Some(tx) = &self.archive_tx else {
            tracing::warn!("Archive writer closed, checkpoint discarded");
            return;
        };
        if tx.send(checkpoint).is_err() {
            tracing::error!("Archive writer stopped unexpectedly, checkpoint discarded");
        }
    }

    fn emit(&self, event: PipelineEvent) {
        match &event {
            PipelineEvent::Initialized {
                anonymous_id,
                restored,
            } => tracing::info!(
                "Initialized as {} ({} requests restored)",
                anonymous_id,
                restored
            ),
            PipelineEvent::Delivered { id, kind } => {
                tracing::debug!("Delivered {} request {}", kind, id)
            }
            PipelineEvent::Retrying { id, reason, retry } => {
                tracing::warn!("Request {} failed, will retry: {} ({:?})", id, reason, retry)
            }
            PipelineEvent::Dropped { id, kind, reason } => {
                tracing::warn!("Dropped {} request {}: {:?}", kind, id, reason)
            }
            PipelineEvent::AttributeRejected { key, value } => {
                tracing::warn!("Discarded profile attribute {}: unusable value {}", key, value)
            }
            PipelineEvent::NotBuilt { kind, reason } => {
                tracing::error!("Could not build {} request: {}", kind, reason)
            }
        }
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Stop the pipeline, abort background tasks and wait for the archive
    /// writer to drain.
    async fn finish(&mut self) {
        self.dispatch(Action::Stop);

        self.cancel_flush_timer();
        self.cancel_sends();
        for (_, task) in self.abandoned.drain() {
            task.handle.abort();
        }
        for task in self.monitor_tasks.drain(..) {
            task.abort();
        }
        if let Some(loader) = self.loader.take() {
            loader.abort();
        }

        // Closing the channel lets the writer exit after its last save.
        self.archive_tx = None;
        if let Some(writer) = self.archive_writer.take() {
            if let Err(e) = writer.await {
                tracing::error!("Archive writer failed: {}", e);
            }
        }

        tracing::info!("Dispatch loop stopped");
    }
}

/// Forward monitor notifications into the dispatch loop as actions.
fn forward<T, F>(
    mut rx: broadcast::Receiver<T>,
    weak: mpsc::WeakUnboundedSender<Command>,
    to_action: F,
) -> JoinHandle<()>
where
    T: Clone + Send + 'static,
    F: Fn(T) -> Action + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(value) => {
                    let Some(tx) = weak.upgrade() else { break };
                    if tx.send(Command::Dispatch(to_action(value))).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Monitor lagged, skipped {} notifications", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Serialize checkpoint writes on one task.
///
/// Only the newest pending checkpoint is written; older ones queued behind
/// a slow save are skipped.
fn spawn_archive_writer(
    archive: Arc<dyn Archive>,
    timeout: Duration,
) -> (mpsc::UnboundedSender<ArchivedState>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ArchivedState>();

    let handle = tokio::spawn(async move {
        while let Some(mut checkpoint) = rx.recv().await {
            while let Ok(newer) = rx.try_recv() {
                checkpoint = newer;
            }

            match tokio::time::timeout(timeout, archive.save(&checkpoint)).await {
                Ok(Ok(())) => tracing::info!(
                    "Archived state ({} queued requests)",
                    checkpoint.queue.len()
                ),
                Ok(Err(e)) => tracing::warn!("Failed to archive state: {}", e),
                Err(_) => tracing::warn!(
                    "Failed to archive state: {}",
                    ArchiveError::Timeout(timeout)
                ),
            }
        }
    });

    (tx, handle)
}
