//! Pipeline state.
//!
//! [`State`] is the single source of truth for identity, the request queue
//! and retry bookkeeping. It is only ever mutated by
//! [`State::reduce`](crate::State::reduce); everything else reads it.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use courier_types::{Identifiers, PushToken, ProfileKey, Request, RequestId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AttemptId, PendingRequest, RetryPolicy, RetryState};

/// Tunables for the queue and flush cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    /// Flush cadence while on Wi-Fi.
    pub wifi_flush_interval: Duration,
    /// Flush cadence while on cellular.
    pub cellular_flush_interval: Duration,
    /// Maximum number of queued plus in-flight requests.
    pub max_queue_size: usize,
    /// Retry limits.
    pub retry: RetryPolicy,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            wifi_flush_interval: Duration::from_secs(10),
            cellular_flush_interval: Duration::from_secs(30),
            max_queue_size: 200,
            retry: RetryPolicy::default(),
        }
    }
}

/// Flush cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushInterval {
    /// Flush on this period.
    Every(Duration),
    /// No periodic flushing (network unreachable).
    Paused,
}

impl FlushInterval {
    /// Whole seconds per tick, or `None` when paused.
    pub fn as_secs(&self) -> Option<u64> {
        match self {
            Self::Every(period) => Some(period.as_secs()),
            Self::Paused => None,
        }
    }

    /// True when periodic flushing is suspended.
    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }
}

/// Initialization lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitializationState {
    /// No API key yet.
    #[default]
    Uninitialized,
    /// API key known, archive being loaded.
    Initializing,
    /// Ready to build and send requests.
    Initialized,
}

/// The durable subset of [`State`].
///
/// In-flight requests are folded back into the front of the queue so a
/// restart resends them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ArchivedState {
    /// Key the queued requests belong to.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Installation identifier.
    pub anonymous_id: String,
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
    /// Phone number.
    #[serde(default)]
    pub phone_number: Option<String>,
    /// Application-assigned user id.
    #[serde(default)]
    pub external_id: Option<String>,
    /// Last push token the API accepted.
    #[serde(default)]
    pub push_token_data: Option<PushToken>,
    /// Staged profile attributes.
    #[serde(default)]
    pub pending_profile: Option<BTreeMap<ProfileKey, Value>>,
    /// Unsent requests, oldest first.
    #[serde(default)]
    pub queue: Vec<Request>,
}

impl ArchivedState {
    /// A first-launch checkpoint with nothing but an installation id.
    pub fn fresh(anonymous_id: impl Into<String>) -> Self {
        Self {
            anonymous_id: anonymous_id.into(),
            ..Self::default()
        }
    }
}

/// Complete pipeline state.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    /// Public API key, set by the first `Initialize`.
    pub api_key: Option<String>,
    /// Installation identifier, known once initialized.
    pub anonymous_id: Option<String>,
    /// Email address.
    pub email: Option<String>,
    /// Phone number.
    pub phone_number: Option<String>,
    /// Application-assigned user id.
    pub external_id: Option<String>,
    /// Last push token the API accepted, with the permission state it was
    /// registered under. Cleared whenever identity changes.
    pub push_token_data: Option<PushToken>,
    /// Profile attributes staged for the next flush.
    pub pending_profile: Option<BTreeMap<ProfileKey, Value>>,
    /// Requests waiting to be sent, oldest first.
    pub queue: VecDeque<Request>,
    /// Requests taken by the current flush cycle, send order first.
    pub requests_in_flight: VecDeque<Request>,
    /// Intents recorded before initialization finished.
    pub pending_requests: Vec<PendingRequest>,
    /// Retry bookkeeping.
    pub retry_info: RetryState,
    /// A flush cycle is in progress.
    pub flushing: bool,
    /// Transmission of the in-flight head whose result is awaited.
    pub sending: Option<AttemptId>,
    /// Attempt counter; never reused within a process.
    pub attempts_issued: u64,
    /// Current flush cadence.
    pub flush_interval: FlushInterval,
    /// Between `Start` and `Stop`; the flush timer follows connectivity only
    /// while started.
    pub started: bool,
    /// Initialization lifecycle.
    pub initialization_state: InitializationState,
    /// Tunables.
    pub settings: QueueSettings,
}

impl State {
    /// A fresh, uninitialized state.
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            api_key: None,
            anonymous_id: None,
            email: None,
            phone_number: None,
            external_id: None,
            push_token_data: None,
            pending_profile: None,
            queue: VecDeque::new(),
            requests_in_flight: VecDeque::new(),
            pending_requests: Vec::new(),
            retry_info: RetryState::NoRetry,
            flushing: false,
            sending: None,
            attempts_issued: 0,
            flush_interval: FlushInterval::Every(settings.wifi_flush_interval),
            started: false,
            initialization_state: InitializationState::Uninitialized,
            settings,
        }
    }

    /// True once requests can be built.
    pub fn is_initialized(&self) -> bool {
        self.initialization_state == InitializationState::Initialized
    }

    /// Current identity as event identifiers.
    pub fn identifiers(&self) -> Identifiers {
        Identifiers {
            email: self.email.clone(),
            phone_number: self.phone_number.clone(),
            external_id: self.external_id.clone(),
        }
    }

    /// Queued plus in-flight request count.
    pub fn pending_len(&self) -> usize {
        self.queue.len() + self.requests_in_flight.len()
    }

    /// True if a request with this id is queued or in flight.
    pub fn contains(&self, id: RequestId) -> bool {
        self.queue
            .iter()
            .chain(self.requests_in_flight.iter())
            .any(|r| r.id == id)
    }

    /// Checkpoint of the durable fields, or `None` before an installation
    /// id exists.
    pub fn archived(&self) -> Option<ArchivedState> {
        let anonymous_id = self.anonymous_id.clone()?;
        Some(ArchivedState {
            api_key: self.api_key.clone(),
            anonymous_id,
            email: self.email.clone(),
            phone_number: self.phone_number.clone(),
            external_id: self.external_id.clone(),
            push_token_data: self.push_token_data.clone(),
            pending_profile: self.pending_profile.clone(),
            queue: self
                .requests_in_flight
                .iter()
                .chain(self.queue.iter())
                .cloned()
                .collect(),
        })
    }

    /// Queue and in-flight list are disjoint, requests are only in flight
    /// during a flush cycle, and a send is only awaited for an in-flight
    /// request.
    pub fn is_consistent(&self) -> bool {
        let disjoint = self
            .requests_in_flight
            .iter()
            .all(|r| !self.queue.iter().any(|q| q.id == r.id));
        let flushing_matches = self.requests_in_flight.is_empty() || self.flushing;
        let sending_matches = self.sending.is_none() || !self.requests_in_flight.is_empty();
        disjoint && flushing_matches && sending_matches
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new(QueueSettings::default())
    }
}
