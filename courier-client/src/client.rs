//! Courier client handle.
//!
//! [`Courier`] is the application-facing API. Every call turns into an
//! action on the dispatch loop's channel and returns immediately; calls
//! made before [`Courier::initialize`] are buffered by the pipeline, not
//! rejected.

use crate::archive::{Archive, FileArchive, MemoryArchive};
use crate::config::{ClientConfig, ConfigError};
use crate::environment::SystemEnvironment;
use crate::monitor::{ConnectivityMonitor, LifecycleEvent, LifecycleMonitor};
use crate::runner::{Collaborators, Command, Runner};
use crate::transport::Transport;
use courier_core::{Action, Environment, PipelineEvent, Reachability, State};
use courier_types::{Event, Profile, ProfileKey, PushEnablement};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Pipeline events buffered per subscriber before the oldest are dropped.
const EVENT_CAPACITY: usize = 256;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The dispatch loop has shut down.
    #[error("dispatch loop closed")]
    Closed,

    /// No transport was supplied to the builder.
    #[error("no transport configured")]
    MissingTransport,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Builder for [`Courier`].
#[derive(Default)]
pub struct CourierBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    archive: Option<Arc<dyn Archive>>,
    environment: Option<Arc<dyn Environment>>,
}

impl CourierBuilder {
    /// Use this configuration (default: [`ClientConfig::default`]).
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Deliver requests through this transport. Required.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Persist checkpoints here.
    ///
    /// Defaults to a [`FileArchive`] at `archive.path` if configured,
    /// otherwise a [`MemoryArchive`].
    pub fn archive(mut self, archive: impl Archive + 'static) -> Self {
        self.archive = Some(Arc::new(archive));
        self
    }

    /// Source identifiers, time and device metadata here.
    ///
    /// Defaults to a [`SystemEnvironment`] built from the `[device]`
    /// configuration.
    pub fn environment(mut self, environment: impl Environment + 'static) -> Self {
        self.environment = Some(Arc::new(environment));
        self
    }

    /// Validate the configuration and spawn the dispatch loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self) -> Result<Courier, ClientError> {
        self.config.validate()?;
        let transport = self.transport.ok_or(ClientError::MissingTransport)?;

        let archive: Arc<dyn Archive> = match (self.archive, &self.config.archive.path) {
            (Some(archive), _) => archive,
            (None, Some(path)) => Arc::new(FileArchive::new(path.clone())),
            (None, None) => {
                tracing::info!("No archive path configured, archiving in memory");
                Arc::new(MemoryArchive::new())
            }
        };
        let environment: Arc<dyn Environment> = match self.environment {
            Some(environment) => environment,
            None => {
                let device_id = uuid::Uuid::new_v4().to_string();
                Arc::new(SystemEnvironment::new(self.config.device.context(device_id)))
            }
        };

        let connectivity = ConnectivityMonitor::new();
        let lifecycle = LifecycleMonitor::new();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let (runner, tx) = Runner::new(
            State::new(self.config.queue_settings()),
            Collaborators {
                environment,
                transport,
                archive,
                connectivity: connectivity.clone(),
                lifecycle: lifecycle.clone(),
                events: events.clone(),
                archive_timeout: self.config.archive_timeout(),
                transport_timeout: self.config.transport_timeout(),
            },
        );
        tokio::spawn(runner.run());

        Ok(Courier {
            tx,
            events,
            connectivity,
            lifecycle,
        })
    }
}

/// Handle to a running pipeline.
///
/// Cloning is cheap; all clones drive the same pipeline. The pipeline
/// stops and writes a final checkpoint when [`Courier::shutdown`] is
/// called or the last handle is dropped.
#[derive(Debug, Clone)]
pub struct Courier {
    tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<PipelineEvent>,
    connectivity: ConnectivityMonitor,
    lifecycle: LifecycleMonitor,
}

impl Courier {
    /// Start building a pipeline.
    pub fn builder() -> CourierBuilder {
        CourierBuilder::default()
    }

    fn dispatch(&self, action: Action) -> Result<(), ClientError> {
        self.tx
            .send(Command::Dispatch(action))
            .map_err(|_| ClientError::Closed)
    }

    /// Initialize with a public API key. Only the first call has an effect.
    pub fn initialize(&self, api_key: impl Into<String>) -> Result<(), ClientError> {
        self.dispatch(Action::Initialize {
            api_key: api_key.into(),
        })
    }

    /// Set the user's email.
    pub fn set_email(&self, email: impl Into<String>) -> Result<(), ClientError> {
        self.dispatch(Action::SetEmail(email.into()))
    }

    /// Set the user's phone number.
    pub fn set_phone_number(&self, phone_number: impl Into<String>) -> Result<(), ClientError> {
        self.dispatch(Action::SetPhoneNumber(phone_number.into()))
    }

    /// Set the application-assigned user id.
    pub fn set_external_id(&self, external_id: impl Into<String>) -> Result<(), ClientError> {
        self.dispatch(Action::SetExternalId(external_id.into()))
    }

    /// Stage one profile attribute; it is sent with the next flush.
    pub fn set_profile_property(
        &self,
        key: ProfileKey,
        value: impl Into<Value>,
    ) -> Result<(), ClientError> {
        self.dispatch(Action::SetProfileProperty(key, value.into()))
    }

    /// Replace the identity with `profile` and send it.
    pub fn enqueue_profile(&self, profile: Profile) -> Result<(), ClientError> {
        self.dispatch(Action::EnqueueProfile(profile))
    }

    /// Register a push token.
    pub fn set_push_token(
        &self,
        token: impl Into<String>,
        enablement: PushEnablement,
    ) -> Result<(), ClientError> {
        self.dispatch(Action::SetPushToken {
            token: token.into(),
            enablement,
        })
    }

    /// Track an event.
    pub fn enqueue_event(&self, event: Event) -> Result<(), ClientError> {
        self.dispatch(Action::EnqueueEvent(event))
    }

    /// Flush the queue now instead of waiting for the next tick.
    pub fn flush(&self) -> Result<(), ClientError> {
        self.dispatch(Action::FlushQueue)
    }

    /// Resume the flush cadence after [`Courier::stop`].
    pub fn start(&self) -> Result<(), ClientError> {
        self.dispatch(Action::Start)
    }

    /// Cancel in-flight sends and write a checkpoint.
    pub fn stop(&self) -> Result<(), ClientError> {
        self.dispatch(Action::Stop)
    }

    /// Report a reachability change directly, in order with other calls.
    pub fn report_connectivity(&self, reachability: Reachability) -> Result<(), ClientError> {
        self.dispatch(Action::NetworkConnectivityChanged(reachability))
    }

    /// Report an app lifecycle transition directly, in order with other
    /// calls.
    pub fn report_lifecycle(&self, event: LifecycleEvent) -> Result<(), ClientError> {
        self.dispatch(event.action())
    }

    /// Monitor a platform integration can report reachability into.
    ///
    /// Notifications are forwarded once the pipeline has initialized.
    pub fn connectivity_monitor(&self) -> ConnectivityMonitor {
        self.connectivity.clone()
    }

    /// Monitor a platform integration can report lifecycle transitions into.
    ///
    /// Notifications are forwarded once the pipeline has initialized.
    pub fn lifecycle_monitor(&self) -> LifecycleMonitor {
        self.lifecycle.clone()
    }

    /// Observe pipeline events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Copy of the current state, after every earlier call has been applied.
    pub async fn snapshot(&self) -> Result<State, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot(reply))
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    /// Stop the pipeline, write a final checkpoint and end the dispatch loop.
    ///
    /// Other handles fail with [`ClientError::Closed`] afterwards.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown(reply))
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)
    }
}
