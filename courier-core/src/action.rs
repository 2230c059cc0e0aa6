//! Inputs to and outputs from the reducer.
//!
//! [`Action`]s are the only way pipeline state changes. [`Effect`]s are
//! instructions, not side effects: the client runtime interprets them and
//! performs the actual I/O, feeding results back in as further actions.

use std::fmt;
use std::time::Duration;

use courier_types::{EndpointKind, Event, Profile, ProfileKey, PushEnablement, Request, RequestId};
use serde_json::Value;

use crate::{ArchivedState, RetryState};

/// Network reachability reported by the connectivity monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reachability {
    /// No route to the API.
    NotReachable,
    /// Reachable over Wi-Fi or another unmetered link.
    ReachableViaWiFi,
    /// Reachable over a cellular link.
    ReachableViaCellular,
}

/// Identifies one transmission of a request.
///
/// A request can be sent more than once (after a retry or a cancelled
/// flush); only the result carrying the live attempt answers the current
/// send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttemptId(pub u64);

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a single send finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The API accepted the request.
    Success,
    /// Transient failure; the request stays queued.
    RetryableFailure {
        /// Human-readable cause.
        reason: String,
        /// Server-requested delay in seconds, if any.
        retry_after: Option<u64>,
    },
    /// The request can never succeed and is dropped.
    PermanentFailure {
        /// Human-readable cause.
        reason: String,
    },
}

/// Every input the reducer understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Begin initialization with a public API key. Ignored after the first call.
    Initialize {
        /// Public API key.
        api_key: String,
    },
    /// The archived state has been loaded (or freshly created).
    CompleteInitialization(ArchivedState),
    /// Start the flush cadence.
    Start,
    /// Cancel in-flight work and checkpoint.
    Stop,
    /// Set the user's email.
    SetEmail(String),
    /// Set the user's phone number.
    SetPhoneNumber(String),
    /// Set the application-assigned user id.
    SetExternalId(String),
    /// Stage a single profile attribute for the next flush.
    SetProfileProperty(ProfileKey, Value),
    /// Replace the identity with this profile and send it.
    EnqueueProfile(Profile),
    /// Register a push token.
    SetPushToken {
        /// Hex-encoded token.
        token: String,
        /// Current notification authorization.
        enablement: PushEnablement,
    },
    /// Track a custom event.
    EnqueueEvent(Event),
    /// Flush tick: move the queue in flight if the retry state allows it.
    FlushQueue,
    /// Send the head of the in-flight list.
    SendRequest,
    /// A send finished.
    DequeueCompletedResults {
        /// The request that was sent.
        id: RequestId,
        /// The transmission this result belongs to.
        attempt: AttemptId,
        /// How it finished.
        outcome: SendOutcome,
    },
    /// Reachability changed.
    NetworkConnectivityChanged(Reachability),
    /// Abort outstanding sends and requeue everything in flight.
    CancelInFlightRequests,
    /// Persist a checkpoint.
    ArchiveCurrentState,
}

/// An intent recorded before initialization finished, replayed afterwards.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingRequest {
    /// Deferred [`Action::EnqueueEvent`].
    Event(Event),
    /// Deferred [`Action::SetEmail`].
    Email(String),
    /// Deferred [`Action::SetPhoneNumber`].
    PhoneNumber(String),
    /// Deferred [`Action::SetExternalId`].
    ExternalId(String),
    /// Deferred [`Action::EnqueueProfile`].
    Profile(Profile),
    /// Deferred [`Action::SetPushToken`].
    PushToken {
        /// Hex-encoded token.
        token: String,
        /// Notification authorization at the time of the call.
        enablement: PushEnablement,
    },
}

impl PendingRequest {
    /// The action that replays this intent.
    pub fn into_action(self) -> Action {
        match self {
            Self::Event(event) => Action::EnqueueEvent(event),
            Self::Email(email) => Action::SetEmail(email),
            Self::PhoneNumber(phone) => Action::SetPhoneNumber(phone),
            Self::ExternalId(id) => Action::SetExternalId(id),
            Self::Profile(profile) => Action::EnqueueProfile(profile),
            Self::PushToken { token, enablement } => Action::SetPushToken { token, enablement },
        }
    }
}

/// Instructions for the client runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Load the archived state for this key (or create a fresh one), then
    /// dispatch [`Action::CompleteInitialization`].
    LoadArchive {
        /// Key the archive must belong to.
        api_key: String,
    },
    /// Start forwarding connectivity and lifecycle notifications.
    SubscribeMonitors,
    /// Feed another action through the reducer.
    Dispatch(Action),
    /// Replace the periodic flush timer with one at this cadence.
    StartFlushTimer(Duration),
    /// Stop the periodic flush timer.
    CancelFlushTimer,
    /// Transmit a request and report back with
    /// [`Action::DequeueCompletedResults`] tagged with `attempt`.
    Send {
        /// Request to transmit.
        request: Request,
        /// Token the result must carry.
        attempt: AttemptId,
    },
    /// Abort every outstanding send.
    CancelSends,
    /// Persist this checkpoint.
    Archive(ArchivedState),
    /// Notify observers.
    Emit(PipelineEvent),
}

/// Why a request left the pipeline without being delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The API rejected it permanently.
    Rejected(String),
    /// It failed more times than the retry policy allows.
    RetriesExhausted,
    /// The queue was at capacity when it was created.
    QueueFull,
}

/// Observable pipeline milestones.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Initialization finished.
    Initialized {
        /// Installation identifier in use.
        anonymous_id: String,
        /// Requests restored from the archive.
        restored: usize,
    },
    /// A request was accepted by the API.
    Delivered {
        /// Request id.
        id: RequestId,
        /// Endpoint kind.
        kind: EndpointKind,
    },
    /// A send failed and will be retried.
    Retrying {
        /// Request id.
        id: RequestId,
        /// Failure cause.
        reason: String,
        /// Retry state after the failure.
        retry: RetryState,
    },
    /// A request was discarded.
    Dropped {
        /// Request id.
        id: RequestId,
        /// Endpoint kind.
        kind: EndpointKind,
        /// Why it was discarded.
        reason: DropReason,
    },
    /// A staged profile attribute had a value its field cannot hold and
    /// was left out of the profile.
    AttributeRejected {
        /// Attribute that was discarded.
        key: ProfileKey,
        /// The rejected value.
        value: Value,
    },
    /// A request could not be built from the current state.
    NotBuilt {
        /// Endpoint kind that was being built.
        kind: EndpointKind,
        /// Build error.
        reason: String,
    },
}
