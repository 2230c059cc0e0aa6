//! The transition function.
//!
//! [`State::reduce`] takes one [`Action`] and returns the [`Effect`]s the
//! runtime must execute. It never performs I/O; ids, time and jitter come
//! from the supplied [`Environment`].

use std::collections::BTreeMap;

use courier_types::{
    EndpointKind, Event, Profile, PushEnablement, PushToken, Request, RequestId, TypesError,
};

use crate::{
    Action, ArchivedState, AttemptId, DropReason, Effect, Environment, FailureVerdict, FlushGate,
    FlushInterval, InitializationState, PendingRequest, PipelineEvent, Reachability, SendOutcome,
    State,
};

#[derive(Clone, Copy)]
enum IdentityField {
    Email,
    PhoneNumber,
    ExternalId,
}

impl State {
    /// Process an action and return the new state plus effects to execute.
    ///
    /// This is a pure function - no side effects. The caller is
    /// responsible for executing the returned effects.
    pub fn on_action(mut self, action: Action, env: &dyn Environment) -> (Self, Vec<Effect>) {
        let effects = self.reduce(action, env);
        (self, effects)
    }

    /// In-place form of [`State::on_action`].
    pub fn reduce(&mut self, action: Action, env: &dyn Environment) -> Vec<Effect> {
        match action {
            Action::Initialize { api_key } => self.initialize(api_key),
            Action::CompleteInitialization(archived) => self.complete_initialization(archived),
            Action::Start => self.start(),
            Action::Stop => {
                self.started = false;
                vec![
                    Effect::CancelFlushTimer,
                    Effect::Dispatch(Action::CancelInFlightRequests),
                    Effect::Dispatch(Action::ArchiveCurrentState),
                ]
            }
            Action::SetEmail(email) => self.set_identity(IdentityField::Email, email, env),
            Action::SetPhoneNumber(phone) => {
                self.set_identity(IdentityField::PhoneNumber, phone, env)
            }
            Action::SetExternalId(id) => self.set_identity(IdentityField::ExternalId, id, env),
            Action::SetProfileProperty(key, value) => {
                self.pending_profile
                    .get_or_insert_with(BTreeMap::new)
                    .insert(key, value);
                vec![]
            }
            Action::EnqueueProfile(profile) => self.enqueue_profile(profile, env),
            Action::SetPushToken { token, enablement } => {
                self.set_push_token(token, enablement, env)
            }
            Action::EnqueueEvent(event) => self.enqueue_event(event, env),
            Action::FlushQueue => self.flush_queue(env),
            Action::SendRequest => self.send_request(),
            Action::DequeueCompletedResults {
                id,
                attempt,
                outcome,
            } => self.complete(id, attempt, outcome, env),
            Action::NetworkConnectivityChanged(reachability) => {
                self.connectivity_changed(reachability)
            }
            Action::CancelInFlightRequests => {
                self.requeue_in_flight();
                vec![Effect::CancelSends]
            }
            Action::ArchiveCurrentState => {
                self.archived().map(Effect::Archive).into_iter().collect()
            }
        }
    }

    fn initialize(&mut self, api_key: String) -> Vec<Effect> {
        if self.initialization_state != InitializationState::Uninitialized {
            return vec![];
        }
        self.api_key = Some(api_key.clone());
        self.initialization_state = InitializationState::Initializing;
        vec![Effect::LoadArchive { api_key }, Effect::SubscribeMonitors]
    }

    fn complete_initialization(&mut self, archived: ArchivedState) -> Vec<Effect> {
        if self.initialization_state != InitializationState::Initializing {
            return vec![];
        }

        // Identity comes from the archive; intents recorded meanwhile are
        // replayed on top of it below.
        self.anonymous_id = Some(archived.anonymous_id.clone());
        self.email = archived.email;
        self.phone_number = archived.phone_number;
        self.external_id = archived.external_id;
        self.push_token_data = archived.push_token_data;

        let mut pending = archived.pending_profile.unwrap_or_default();
        if let Some(staged) = self.pending_profile.take() {
            pending.extend(staged);
        }
        self.pending_profile = (!pending.is_empty()).then_some(pending);

        let restored = if archived.api_key == self.api_key {
            archived.queue.len()
        } else {
            0
        };
        if restored > 0 {
            self.queue = archived.queue.into();
        }

        self.initialization_state = InitializationState::Initialized;

        let mut effects = vec![Effect::Emit(PipelineEvent::Initialized {
            anonymous_id: archived.anonymous_id,
            restored,
        })];
        effects.extend(
            self.pending_requests
                .drain(..)
                .map(|pending| Effect::Dispatch(pending.into_action())),
        );
        effects.push(Effect::Dispatch(Action::Start));
        effects
    }

    fn start(&mut self) -> Vec<Effect> {
        if !self.is_initialized() {
            return vec![];
        }
        self.started = true;
        vec![
            self.flush_timer_effect(),
            Effect::Dispatch(Action::FlushQueue),
        ]
    }

    fn flush_timer_effect(&self) -> Effect {
        match self.flush_interval {
            FlushInterval::Every(period) => Effect::StartFlushTimer(period),
            FlushInterval::Paused => Effect::CancelFlushTimer,
        }
    }

    fn connectivity_changed(&mut self, reachability: Reachability) -> Vec<Effect> {
        let period = match reachability {
            Reachability::NotReachable => {
                self.flush_interval = FlushInterval::Paused;
                return vec![
                    Effect::CancelFlushTimer,
                    Effect::Dispatch(Action::CancelInFlightRequests),
                ];
            }
            Reachability::ReachableViaWiFi => self.settings.wifi_flush_interval,
            Reachability::ReachableViaCellular => self.settings.cellular_flush_interval,
        };

        self.flush_interval = FlushInterval::Every(period);
        let mut effects = Vec::with_capacity(2);
        if self.started {
            effects.push(Effect::StartFlushTimer(period));
        }
        effects.push(Effect::Dispatch(Action::FlushQueue));
        effects
    }

    fn identity_mut(&mut self, field: IdentityField) -> &mut Option<String> {
        match field {
            IdentityField::Email => &mut self.email,
            IdentityField::PhoneNumber => &mut self.phone_number,
            IdentityField::ExternalId => &mut self.external_id,
        }
    }

    fn set_identity(
        &mut self,
        field: IdentityField,
        value: String,
        env: &dyn Environment,
    ) -> Vec<Effect> {
        if !self.is_initialized() {
            *self.identity_mut(field) = Some(value.clone());
            self.pending_requests.push(match field {
                IdentityField::Email => PendingRequest::Email(value),
                IdentityField::PhoneNumber => PendingRequest::PhoneNumber(value),
                IdentityField::ExternalId => PendingRequest::ExternalId(value),
            });
            return vec![];
        }

        let slot = self.identity_mut(field);
        if slot.as_deref() == Some(value.as_str()) {
            return vec![];
        }
        *slot = Some(value);
        self.enqueue_profile_or_token_request(Profile::default(), env)
    }

    fn enqueue_profile(&mut self, profile: Profile, env: &dyn Environment) -> Vec<Effect> {
        self.email = profile.email.clone();
        self.phone_number = profile.phone_number.clone();
        self.external_id = profile.external_id.clone();

        if !self.is_initialized() {
            self.pending_requests.push(PendingRequest::Profile(profile));
            return vec![];
        }
        self.enqueue_profile_or_token_request(profile, env)
    }

    /// Build a request carrying the current identity, staged attributes and
    /// `explicit` on top. Re-registers the push token if one is known,
    /// otherwise sends a plain profile update. Either way the recorded push
    /// token is cleared until the API confirms the new binding.
    fn enqueue_profile_or_token_request(
        &mut self,
        explicit: Profile,
        env: &dyn Environment,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        let mut profile = Profile::default();
        for (key, value) in self.pending_profile.take().unwrap_or_default() {
            if !profile.apply(&key, value.clone()) {
                effects.push(Effect::Emit(PipelineEvent::AttributeRejected { key, value }));
            }
        }
        profile.overlay(explicit);
        profile.email = self.email.clone();
        profile.phone_number = self.phone_number.clone();
        profile.external_id = self.external_id.clone();

        let id = env.request_id();
        match self.push_token_data.take() {
            Some(push_token) => {
                let built = Request::register_push_token(
                    id,
                    self.api_key.as_deref(),
                    self.anonymous_id.as_deref(),
                    push_token,
                    profile,
                );
                effects.extend(self.enqueue(built, EndpointKind::RegisterPushToken));
            }
            None => {
                let built = Request::create_profile(
                    id,
                    self.api_key.as_deref(),
                    self.anonymous_id.as_deref(),
                    profile,
                );
                effects.extend(self.enqueue(built, EndpointKind::CreateProfile));
            }
        }
        effects
    }

    fn set_push_token(
        &mut self,
        token: String,
        enablement: PushEnablement,
        env: &dyn Environment,
    ) -> Vec<Effect> {
        if !self.is_initialized() {
            self.pending_requests
                .push(PendingRequest::PushToken { token, enablement });
            return vec![];
        }

        let push_token = PushToken {
            token,
            enablement,
            background: env.push_background(),
            device: env.device_context(),
        };
        if self.push_token_data.as_ref() == Some(&push_token) {
            return vec![];
        }

        let profile = Profile {
            email: self.email.clone(),
            phone_number: self.phone_number.clone(),
            external_id: self.external_id.clone(),
            ..Profile::default()
        };
        let built = Request::register_push_token(
            env.request_id(),
            self.api_key.as_deref(),
            self.anonymous_id.as_deref(),
            push_token,
            profile,
        );
        self.enqueue(built, EndpointKind::RegisterPushToken)
    }

    fn enqueue_event(&mut self, mut event: Event, env: &dyn Environment) -> Vec<Effect> {
        if !self.is_initialized() {
            self.pending_requests.push(PendingRequest::Event(event));
            return vec![];
        }

        event.identifiers = event.identifiers.or(&self.identifiers());
        let built = Request::create_event(
            env.request_id(),
            self.api_key.as_deref(),
            self.anonymous_id.as_deref(),
            event,
            env.now(),
        );
        self.enqueue(built, EndpointKind::CreateEvent)
    }

    fn enqueue(&mut self, built: Result<Request, TypesError>, kind: EndpointKind) -> Vec<Effect> {
        let request = match built {
            Ok(request) => request,
            Err(e) => {
                return vec![Effect::Emit(PipelineEvent::NotBuilt {
                    kind,
                    reason: e.to_string(),
                })]
            }
        };

        if self.pending_len() >= self.settings.max_queue_size {
            return vec![Effect::Emit(PipelineEvent::Dropped {
                id: request.id,
                kind,
                reason: DropReason::QueueFull,
            })];
        }

        self.queue.push_back(request);
        vec![]
    }

    fn flush_queue(&mut self, env: &dyn Environment) -> Vec<Effect> {
        if !self.is_initialized() || self.flushing {
            return vec![];
        }

        let mut effects = Vec::new();
        if self.pending_profile.is_some() {
            effects.extend(self.enqueue_profile_or_token_request(Profile::default(), env));
        }
        if self.queue.is_empty() {
            return effects;
        }

        match self.settings.retry.next(self.retry_info, self.flush_interval) {
            FlushGate::Wait(retry) => {
                self.retry_info = retry;
            }
            FlushGate::Transmit(retry) => {
                self.retry_info = retry;
                self.requests_in_flight = std::mem::take(&mut self.queue);
                self.flushing = true;
                effects.push(Effect::Dispatch(Action::SendRequest));
            }
        }
        effects
    }

    fn send_request(&mut self) -> Vec<Effect> {
        if !self.flushing {
            return vec![];
        }
        let Some(request) = self.requests_in_flight.front().cloned() else {
            self.flushing = false;
            return vec![];
        };
        let attempt = AttemptId(self.attempts_issued);
        self.attempts_issued += 1;
        self.sending = Some(attempt);
        vec![Effect::Send { request, attempt }]
    }

    fn complete(
        &mut self,
        id: RequestId,
        attempt: AttemptId,
        outcome: SendOutcome,
        env: &dyn Environment,
    ) -> Vec<Effect> {
        if self.sending != Some(attempt) {
            return self.complete_stale(id, outcome);
        }
        let Some(position) = self.requests_in_flight.iter().position(|r| r.id == id) else {
            return self.complete_stale(id, outcome);
        };
        let Some(request) = self.requests_in_flight.remove(position) else {
            return vec![];
        };
        self.sending = None;
        let kind = request.kind();

        match outcome {
            SendOutcome::Success => {
                self.record_delivery(&request);
                let mut effects = vec![Effect::Emit(PipelineEvent::Delivered { id, kind })];
                effects.extend(self.continue_cycle());
                effects
            }
            SendOutcome::PermanentFailure { reason } => {
                let mut effects = vec![Effect::Emit(PipelineEvent::Dropped {
                    id,
                    kind,
                    reason: DropReason::Rejected(reason),
                })];
                effects.extend(self.continue_cycle());
                effects
            }
            SendOutcome::RetryableFailure {
                reason,
                retry_after,
            } => {
                let policy = self.settings.retry;
                let jitter = env.jitter(policy.max_jitter);
                match policy.on_failure(self.retry_info, retry_after, jitter) {
                    FailureVerdict::Retry(retry) => {
                        self.retry_info = retry;
                        self.requests_in_flight.insert(position, request);
                        self.requeue_in_flight();
                        vec![Effect::Emit(PipelineEvent::Retrying { id, reason, retry })]
                    }
                    FailureVerdict::Exhausted(retry) => {
                        self.retry_info = retry;
                        self.requeue_in_flight();
                        vec![Effect::Emit(PipelineEvent::Dropped {
                            id,
                            kind,
                            reason: DropReason::RetriesExhausted,
                        })]
                    }
                }
            }
        }
    }

    /// A result from a send that is no longer awaited. Only a success for a
    /// request that is back in the queue matters: it was delivered before
    /// its cancellation took effect, so it must not be sent again. A request
    /// already re-sent is answered by its newer attempt.
    fn complete_stale(&mut self, id: RequestId, outcome: SendOutcome) -> Vec<Effect> {
        if outcome != SendOutcome::Success {
            return vec![];
        }
        let Some(position) = self.queue.iter().position(|r| r.id == id) else {
            return vec![];
        };
        let Some(request) = self.queue.remove(position) else {
            return vec![];
        };
        self.record_delivery(&request);
        vec![Effect::Emit(PipelineEvent::Delivered {
            id,
            kind: request.kind(),
        })]
    }

    fn record_delivery(&mut self, request: &Request) {
        if let Some(push_token) = request.push_token() {
            self.push_token_data = Some(push_token.clone());
        }
        self.retry_info = self.settings.retry.on_success();
    }

    fn continue_cycle(&mut self) -> Vec<Effect> {
        if self.requests_in_flight.is_empty() {
            self.flushing = false;
            vec![]
        } else {
            vec![Effect::Dispatch(Action::SendRequest)]
        }
    }

    /// Move everything in flight back to the front of the queue, in order.
    fn requeue_in_flight(&mut self) {
        while let Some(request) = self.requests_in_flight.pop_back() {
            self.queue.push_front(request);
        }
        self.flushing = false;
        self.sending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{QueueSettings, RetryState, TestEnvironment};
    use courier_types::{Endpoint, EventName, ProfileKey, PushBackground};
    use serde_json::json;
    use std::time::Duration;

    const API_KEY: &str = "fake-key";

    fn uninitialized() -> State {
        State::default()
    }

    /// A state that has gone through initialization with a fresh archive.
    fn initialized(env: &TestEnvironment) -> State {
        let (state, _) = uninitialized().on_action(
            Action::Initialize {
                api_key: API_KEY.into(),
            },
            env,
        );
        let (state, _) = state.on_action(
            Action::CompleteInitialization(ArchivedState::fresh("anon-id")),
            env,
        );
        state
    }

    fn dispatched(effects: &[Effect]) -> Vec<&Action> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Dispatch(action) => Some(action),
                _ => None,
            })
            .collect()
    }

    /// Reduce `SendRequest` and return the attempt of the send it issued.
    fn send_next(state: &mut State, env: &TestEnvironment) -> AttemptId {
        match &state.reduce(Action::SendRequest, env)[..] {
            [Effect::Send { attempt, .. }] => *attempt,
            other => panic!("expected a send, got {:?}", other),
        }
    }

    fn success(id: RequestId, attempt: AttemptId) -> Action {
        Action::DequeueCompletedResults {
            id,
            attempt,
            outcome: SendOutcome::Success,
        }
    }

    fn retryable(id: RequestId, attempt: AttemptId) -> Action {
        Action::DequeueCompletedResults {
            id,
            attempt,
            outcome: SendOutcome::RetryableFailure {
                reason: "503".into(),
                retry_after: None,
            },
        }
    }

    fn queue_ids(state: &State) -> Vec<RequestId> {
        state.queue.iter().map(|r| r.id).collect()
    }

    #[test]
    fn initialize_moves_to_initializing() {
        let env = TestEnvironment::default();
        let (state, effects) = uninitialized().on_action(
            Action::Initialize {
                api_key: API_KEY.into(),
            },
            &env,
        );

        assert_eq!(state.api_key.as_deref(), Some(API_KEY));
        assert_eq!(
            state.initialization_state,
            InitializationState::Initializing
        );
        assert_eq!(
            effects,
            vec![
                Effect::LoadArchive {
                    api_key: API_KEY.into()
                },
                Effect::SubscribeMonitors,
            ]
        );
    }

    #[test]
    fn complete_initialization_starts_with_empty_queue() {
        let env = TestEnvironment::default();
        let (state, _) = uninitialized().on_action(
            Action::Initialize {
                api_key: API_KEY.into(),
            },
            &env,
        );
        let (state, effects) = state.on_action(
            Action::CompleteInitialization(ArchivedState::fresh("anon-id")),
            &env,
        );

        assert!(state.is_initialized());
        assert_eq!(state.anonymous_id.as_deref(), Some("anon-id"));
        assert!(state.queue.is_empty());
        assert_eq!(dispatched(&effects), vec![&Action::Start]);

        let (state, effects) = state.on_action(Action::Start, &env);
        assert_eq!(
            effects,
            vec![
                Effect::StartFlushTimer(Duration::from_secs(10)),
                Effect::Dispatch(Action::FlushQueue),
            ]
        );

        let (state, effects) = state.on_action(Action::FlushQueue, &env);
        assert!(effects.is_empty());
        assert!(!state.flushing);
    }

    #[test]
    fn initialize_is_idempotent() {
        let env = TestEnvironment::default();
        let (once, _) = uninitialized().on_action(
            Action::Initialize {
                api_key: "first".into(),
            },
            &env,
        );
        let (twice, effects) = once.clone().on_action(
            Action::Initialize {
                api_key: "second".into(),
            },
            &env,
        );

        assert_eq!(twice, once);
        assert!(effects.is_empty());

        let ready = initialized(&env);
        let (again, effects) = ready.clone().on_action(
            Action::Initialize {
                api_key: "other".into(),
            },
            &env,
        );
        assert_eq!(again, ready);
        assert!(effects.is_empty());
    }

    #[test]
    fn complete_initialization_is_ignored_unless_initializing() {
        let env = TestEnvironment::default();
        let (state, effects) = uninitialized().on_action(
            Action::CompleteInitialization(ArchivedState::fresh("anon")),
            &env,
        );
        assert_eq!(state, uninitialized());
        assert!(effects.is_empty());
    }

    #[test]
    fn archived_queue_is_restored_for_same_key() {
        let env = TestEnvironment::default();
        let previous = initialized(&env);
        let (previous, _) =
            previous.on_action(Action::EnqueueEvent(Event::new(EventName::OpenedPush)), &env);
        let archived = previous.archived().unwrap();

        let (state, _) = uninitialized().on_action(
            Action::Initialize {
                api_key: API_KEY.into(),
            },
            &env,
        );
        let (state, effects) = state.on_action(Action::CompleteInitialization(archived), &env);

        assert_eq!(queue_ids(&state), queue_ids(&previous));
        assert!(effects.contains(&Effect::Emit(PipelineEvent::Initialized {
            anonymous_id: "anon-id".into(),
            restored: 1,
        })));
    }

    #[test]
    fn archived_queue_is_discarded_for_other_key() {
        let env = TestEnvironment::default();
        let previous = initialized(&env);
        let (previous, _) =
            previous.on_action(Action::EnqueueEvent(Event::new(EventName::OpenedPush)), &env);
        let mut archived = previous.archived().unwrap();
        archived.email = Some("kept@example.com".into());

        let (state, _) = uninitialized().on_action(
            Action::Initialize {
                api_key: "new-key".into(),
            },
            &env,
        );
        let (state, _) = state.on_action(Action::CompleteInitialization(archived), &env);

        assert!(state.queue.is_empty());
        assert_eq!(state.anonymous_id.as_deref(), Some("anon-id"));
        assert_eq!(state.email.as_deref(), Some("kept@example.com"));
    }

    #[test]
    fn event_before_initialization_is_buffered_and_replayed() {
        let env = TestEnvironment::default();
        let event = Event::new(EventName::ViewedProduct);

        let (state, _) = uninitialized().on_action(
            Action::Initialize {
                api_key: API_KEY.into(),
            },
            &env,
        );
        let (state, effects) = state.on_action(Action::EnqueueEvent(event.clone()), &env);

        assert!(effects.is_empty());
        assert!(state.queue.is_empty());
        assert_eq!(
            state.pending_requests,
            vec![PendingRequest::Event(event.clone())]
        );

        let (state, effects) = state.on_action(
            Action::CompleteInitialization(ArchivedState::fresh("anon-id")),
            &env,
        );
        assert!(state.pending_requests.is_empty());
        let replayed = dispatched(&effects);
        assert_eq!(
            replayed,
            vec![&Action::EnqueueEvent(event.clone()), &Action::Start]
        );

        // Replaying yields the same request a post-init call would.
        let (replayed_state, _) = state
            .clone()
            .on_action(Action::EnqueueEvent(event.clone()), &env);
        assert_eq!(replayed_state.queue.len(), 1);
        assert_eq!(
            replayed_state.queue[0].kind(),
            EndpointKind::CreateEvent
        );
    }

    #[test]
    fn pending_requests_replay_in_order() {
        let env = TestEnvironment::default();
        let mut state = uninitialized();
        for action in [
            Action::SetEmail("a@example.com".into()),
            Action::EnqueueEvent(Event::new(EventName::AddedToCart)),
            Action::SetPushToken {
                token: "blobtoken".into(),
                enablement: PushEnablement::Authorized,
            },
        ] {
            state.reduce(action, &env);
        }
        // Identity setters mutate state immediately even before init.
        assert_eq!(state.email.as_deref(), Some("a@example.com"));

        state.reduce(
            Action::Initialize {
                api_key: API_KEY.into(),
            },
            &env,
        );
        let effects = state.reduce(
            Action::CompleteInitialization(ArchivedState::fresh("anon")),
            &env,
        );

        assert_eq!(
            dispatched(&effects),
            vec![
                &Action::SetEmail("a@example.com".into()),
                &Action::EnqueueEvent(Event::new(EventName::AddedToCart)),
                &Action::SetPushToken {
                    token: "blobtoken".into(),
                    enablement: PushEnablement::Authorized,
                },
                &Action::Start,
            ]
        );
    }

    #[test]
    fn set_email_enqueues_profile_request() {
        let env = TestEnvironment::default();
        let (state, effects) =
            initialized(&env).on_action(Action::SetEmail("a@example.com".into()), &env);

        assert!(effects.is_empty());
        assert_eq!(state.email.as_deref(), Some("a@example.com"));
        assert_eq!(state.queue.len(), 1);
        let Endpoint::CreateProfile(payload) = &state.queue[0].endpoint else {
            panic!("expected profile request, got {:?}", state.queue[0]);
        };
        assert_eq!(payload.profile.email.as_deref(), Some("a@example.com"));
        assert_eq!(payload.anonymous_id, "anon-id");
        assert_eq!(state.queue[0].api_key, API_KEY);
    }

    #[test]
    fn unchanged_identity_is_a_no_op() {
        let env = TestEnvironment::default();
        let (state, _) =
            initialized(&env).on_action(Action::SetPhoneNumber("+15555555555".into()), &env);
        let (state, _) = state.on_action(Action::SetPhoneNumber("+15555555555".into()), &env);
        assert_eq!(state.queue.len(), 1);
    }

    #[test]
    fn identity_change_rebinds_known_push_token() {
        let env = TestEnvironment::default();
        let mut state = initialized(&env);
        state.push_token_data = Some(PushToken {
            token: "blob_token".into(),
            enablement: PushEnablement::Authorized,
            background: PushBackground::Available,
            device: env.device_context(),
        });

        let (state, _) = state.on_action(Action::SetExternalId("user-1".into()), &env);

        assert!(state.push_token_data.is_none());
        let Endpoint::RegisterPushToken(payload) = &state.queue[0].endpoint else {
            panic!("expected token request, got {:?}", state.queue[0]);
        };
        assert_eq!(payload.push_token.token, "blob_token");
        assert_eq!(payload.profile.external_id.as_deref(), Some("user-1"));
    }

    #[test]
    fn profile_properties_are_staged_until_flush() {
        let env = TestEnvironment::default();
        let (state, effects) = initialized(&env).on_action(
            Action::SetProfileProperty(ProfileKey::City, json!("Boston")),
            &env,
        );
        assert!(effects.is_empty());
        assert!(state.queue.is_empty());
        assert!(state.pending_profile.is_some());

        let (state, effects) = state.on_action(Action::FlushQueue, &env);
        assert!(state.pending_profile.is_none());
        assert!(state.flushing);
        assert_eq!(dispatched(&effects), vec![&Action::SendRequest]);
        let Endpoint::CreateProfile(payload) = &state.requests_in_flight[0].endpoint else {
            panic!("expected profile request");
        };
        assert_eq!(
            payload.profile.location.as_ref().unwrap().city.as_deref(),
            Some("Boston")
        );
    }

    #[test]
    fn numeric_string_coordinates_reach_the_profile() {
        let env = TestEnvironment::default();
        let mut state = initialized(&env);
        state.reduce(
            Action::SetProfileProperty(ProfileKey::Latitude, json!("40.7")),
            &env,
        );

        let effects = state.reduce(Action::FlushQueue, &env);

        assert_eq!(dispatched(&effects), vec![&Action::SendRequest]);
        let Endpoint::CreateProfile(payload) = &state.requests_in_flight[0].endpoint else {
            panic!("expected profile request");
        };
        assert_eq!(
            payload.profile.location.as_ref().and_then(|l| l.latitude),
            Some(40.7)
        );
    }

    #[test]
    fn unusable_attribute_is_reported_not_silently_dropped() {
        let env = TestEnvironment::default();
        let mut state = initialized(&env);
        state.reduce(
            Action::SetProfileProperty(ProfileKey::Longitude, json!("east")),
            &env,
        );
        state.reduce(
            Action::SetProfileProperty(ProfileKey::FirstName, json!("Ada")),
            &env,
        );

        let effects = state.reduce(Action::FlushQueue, &env);

        assert!(effects.contains(&Effect::Emit(PipelineEvent::AttributeRejected {
            key: ProfileKey::Longitude,
            value: json!("east"),
        })));
        let Endpoint::CreateProfile(payload) = &state.requests_in_flight[0].endpoint else {
            panic!("expected profile request");
        };
        assert_eq!(payload.profile.first_name.as_deref(), Some("Ada"));
        assert!(payload.profile.location.is_none());
    }

    #[test]
    fn profile_properties_before_init_are_kept() {
        let env = TestEnvironment::default();
        let mut state = uninitialized();
        state.reduce(
            Action::SetProfileProperty(ProfileKey::Custom("plan".into()), json!("pro")),
            &env,
        );
        state.reduce(
            Action::Initialize {
                api_key: API_KEY.into(),
            },
            &env,
        );
        state.reduce(
            Action::CompleteInitialization(ArchivedState::fresh("anon")),
            &env,
        );
        assert_eq!(
            state
                .pending_profile
                .as_ref()
                .and_then(|p| p.get(&ProfileKey::Custom("plan".into()))),
            Some(&json!("pro"))
        );
    }

    #[test]
    fn enqueue_profile_overwrites_identity_and_merges_staged_attributes() {
        let env = TestEnvironment::default();
        let mut state = initialized(&env);
        state.email = Some("old@example.com".into());
        state.phone_number = Some("+15555555555".into());
        state.reduce(
            Action::SetProfileProperty(ProfileKey::Title, json!("Engineer")),
            &env,
        );

        let mut profile = Profile::with_email("new@example.com");
        profile.first_name = Some("Ada".into());
        state.reduce(Action::EnqueueProfile(profile), &env);

        assert_eq!(state.email.as_deref(), Some("new@example.com"));
        assert!(state.phone_number.is_none());
        assert!(state.pending_profile.is_none());
        let Endpoint::CreateProfile(payload) = &state.queue[0].endpoint else {
            panic!("expected profile request");
        };
        assert_eq!(payload.profile.first_name.as_deref(), Some("Ada"));
        assert_eq!(payload.profile.title.as_deref(), Some("Engineer"));
        assert!(payload.profile.phone_number.is_none());
    }

    #[test]
    fn set_push_token_then_flush_and_succeed() {
        let env = TestEnvironment::default();
        let (state, effects) = initialized(&env).on_action(
            Action::SetPushToken {
                token: "blobtoken".into(),
                enablement: PushEnablement::Authorized,
            },
            &env,
        );
        assert!(effects.is_empty());
        assert_eq!(state.queue.len(), 1);
        assert!(state.push_token_data.is_none());
        let id = state.queue[0].id;

        let (state, effects) = state.on_action(Action::FlushQueue, &env);
        assert!(state.flushing);
        assert!(state.queue.is_empty());
        assert_eq!(state.requests_in_flight.len(), 1);
        assert_eq!(effects, vec![Effect::Dispatch(Action::SendRequest)]);

        let (state, effects) = state.on_action(Action::SendRequest, &env);
        let [Effect::Send { request, attempt }] = &effects[..] else {
            panic!("expected a send, got {:?}", effects);
        };
        assert_eq!(request.id, id);
        assert_eq!(state.sending, Some(*attempt));

        let (state, effects) = state.on_action(success(id, *attempt), &env);
        assert!(state.sending.is_none());
        assert!(!state.flushing);
        assert!(state.requests_in_flight.is_empty());
        assert_eq!(
            state.push_token_data.as_ref().map(|t| t.token.as_str()),
            Some("blobtoken")
        );
        assert_eq!(state.retry_info, RetryState::Retry { count: 0 });
        assert_eq!(
            effects,
            vec![Effect::Emit(PipelineEvent::Delivered {
                id,
                kind: EndpointKind::RegisterPushToken,
            })]
        );
    }

    #[test]
    fn duplicate_push_token_is_a_no_op() {
        let env = TestEnvironment::default();
        let mut state = initialized(&env);
        state.push_token_data = Some(PushToken {
            token: "blobtoken".into(),
            enablement: PushEnablement::Authorized,
            background: env.push_background(),
            device: env.device_context(),
        });

        let effects = state.reduce(
            Action::SetPushToken {
                token: "blobtoken".into(),
                enablement: PushEnablement::Authorized,
            },
            &env,
        );
        assert!(effects.is_empty());
        assert!(state.queue.is_empty());

        state.reduce(
            Action::SetPushToken {
                token: "blobtoken".into(),
                enablement: PushEnablement::Denied,
            },
            &env,
        );
        assert_eq!(state.queue.len(), 1);
    }

    #[test]
    fn event_merges_identity_at_enqueue_time() {
        let env = TestEnvironment::new(1_234);
        let mut state = initialized(&env);
        state.phone_number = Some("+15555555555".into());

        let mut event = Event::new(EventName::StartedCheckout);
        event.identifiers.email = Some("caller@example.com".into());
        state.reduce(Action::EnqueueEvent(event), &env);
        state.phone_number = Some("+16666666666".into());

        let Endpoint::CreateEvent(payload) = &state.queue[0].endpoint else {
            panic!("expected event request");
        };
        assert_eq!(
            payload.event.identifiers.phone_number.as_deref(),
            Some("+15555555555")
        );
        assert_eq!(
            payload.event.identifiers.email.as_deref(),
            Some("caller@example.com")
        );
        assert_eq!(payload.time, 1_234);
    }

    #[test]
    fn flush_is_a_no_op_when_not_initialized_or_already_flushing() {
        let env = TestEnvironment::default();
        let (state, effects) = uninitialized().on_action(Action::FlushQueue, &env);
        assert!(effects.is_empty());
        assert_eq!(state, uninitialized());

        let mut state = initialized(&env);
        state.reduce(Action::EnqueueEvent(Event::new(EventName::OpenedPush)), &env);
        state.reduce(Action::FlushQueue, &env);
        state.reduce(Action::EnqueueEvent(Event::new(EventName::OpenedPush)), &env);
        let before = state.clone();
        let effects = state.reduce(Action::FlushQueue, &env);
        assert!(effects.is_empty());
        assert_eq!(state, before);
    }

    #[test]
    fn requests_are_sent_serially_in_order() {
        let env = TestEnvironment::default();
        let mut state = initialized(&env);
        state.reduce(Action::EnqueueEvent(Event::new(EventName::OpenedPush)), &env);
        state.reduce(Action::EnqueueEvent(Event::new(EventName::AddedToCart)), &env);
        let ids = queue_ids(&state);

        state.reduce(Action::FlushQueue, &env);
        let effects = state.reduce(Action::SendRequest, &env);
        let [Effect::Send { request, attempt }] = &effects[..] else {
            panic!("expected a send, got {:?}", effects);
        };
        assert_eq!(request.id, ids[0]);
        let first = *attempt;

        let effects = state.reduce(success(ids[0], first), &env);
        assert!(state.flushing);
        assert!(effects.contains(&Effect::Dispatch(Action::SendRequest)));

        let effects = state.reduce(Action::SendRequest, &env);
        let [Effect::Send { request, attempt }] = &effects[..] else {
            panic!("expected a send, got {:?}", effects);
        };
        assert_eq!(request.id, ids[1]);
        assert_ne!(*attempt, first);
        let second = *attempt;

        state.reduce(success(ids[1], second), &env);
        assert!(!state.flushing);
        assert!(state.requests_in_flight.is_empty());
    }

    #[test]
    fn retryable_failure_requeues_ahead_of_newer_requests() {
        let env = TestEnvironment::default();
        let mut state = initialized(&env);
        state.reduce(Action::EnqueueEvent(Event::new(EventName::OpenedPush)), &env);
        state.reduce(Action::EnqueueEvent(Event::new(EventName::AddedToCart)), &env);
        let flushed = queue_ids(&state);
        state.reduce(Action::FlushQueue, &env);
        let attempt = send_next(&mut state, &env);
        state.reduce(Action::EnqueueEvent(Event::new(EventName::ViewedProduct)), &env);
        let newer = queue_ids(&state);

        let effects = state.reduce(retryable(flushed[0], attempt), &env);

        assert!(!state.flushing);
        assert!(state.requests_in_flight.is_empty());
        assert_eq!(
            queue_ids(&state),
            vec![flushed[0], flushed[1], newer[0]]
        );
        assert_eq!(state.retry_info, RetryState::Retry { count: 1 });
        assert!(matches!(
            &effects[..],
            [Effect::Emit(PipelineEvent::Retrying { id, .. })] if *id == flushed[0]
        ));
    }

    #[test]
    fn permanent_failure_drops_and_continues() {
        let env = TestEnvironment::default();
        let mut state = initialized(&env);
        state.reduce(Action::EnqueueEvent(Event::new(EventName::OpenedPush)), &env);
        state.reduce(Action::EnqueueEvent(Event::new(EventName::AddedToCart)), &env);
        let ids = queue_ids(&state);
        state.reduce(Action::FlushQueue, &env);
        let attempt = send_next(&mut state, &env);

        let effects = state.reduce(
            Action::DequeueCompletedResults {
                id: ids[0],
                attempt,
                outcome: SendOutcome::PermanentFailure {
                    reason: "400".into(),
                },
            },
            &env,
        );

        assert!(!state.contains(ids[0]));
        assert!(state.flushing);
        assert_eq!(state.retry_info, RetryState::NoRetry);
        assert!(effects.contains(&Effect::Emit(PipelineEvent::Dropped {
            id: ids[0],
            kind: EndpointKind::CreateEvent,
            reason: DropReason::Rejected("400".into()),
        })));
        assert!(effects.contains(&Effect::Dispatch(Action::SendRequest)));
    }

    #[test]
    fn exhausted_retries_drop_the_request() {
        let env = TestEnvironment::default();
        let mut state = initialized(&env);
        state.settings.retry.max_retries = 2;
        state.reduce(Action::EnqueueEvent(Event::new(EventName::OpenedPush)), &env);
        state.reduce(Action::EnqueueEvent(Event::new(EventName::AddedToCart)), &env);
        let ids = queue_ids(&state);

        for _ in 0..2 {
            state.reduce(Action::FlushQueue, &env);
            let attempt = send_next(&mut state, &env);
            state.reduce(retryable(ids[0], attempt), &env);
        }
        state.reduce(Action::FlushQueue, &env);
        let attempt = send_next(&mut state, &env);
        let effects = state.reduce(retryable(ids[0], attempt), &env);

        assert!(!state.contains(ids[0]));
        assert_eq!(queue_ids(&state), vec![ids[1]]);
        assert_eq!(state.retry_info, RetryState::Retry { count: 0 });
        assert!(effects.contains(&Effect::Emit(PipelineEvent::Dropped {
            id: ids[0],
            kind: EndpointKind::CreateEvent,
            reason: DropReason::RetriesExhausted,
        })));
    }

    #[test]
    fn backoff_ticks_hold_the_queue() {
        let env = TestEnvironment::default();
        let mut state = initialized(&env);
        state.reduce(Action::EnqueueEvent(Event::new(EventName::OpenedPush)), &env);
        state.retry_info = RetryState::RetryWithBackoff {
            request_count: 23,
            total_retry_count: 23,
            current_backoff: 200,
        };

        let effects = state.reduce(Action::FlushQueue, &env);

        assert!(effects.is_empty());
        assert!(!state.flushing);
        assert_eq!(state.queue.len(), 1);
        assert_eq!(
            state.retry_info,
            RetryState::RetryWithBackoff {
                request_count: 23,
                total_retry_count: 23,
                current_backoff: 190,
            }
        );
    }

    #[test]
    fn backoff_expiring_transmits_on_same_tick() {
        let env = TestEnvironment::default();
        let mut state = initialized(&env);
        state.reduce(Action::EnqueueEvent(Event::new(EventName::OpenedPush)), &env);
        state.retry_info = RetryState::RetryWithBackoff {
            request_count: 23,
            total_retry_count: 23,
            current_backoff: 5,
        };

        let effects = state.reduce(Action::FlushQueue, &env);

        assert!(state.flushing);
        assert_eq!(state.retry_info, RetryState::Retry { count: 23 });
        assert_eq!(effects, vec![Effect::Dispatch(Action::SendRequest)]);
    }

    #[test]
    fn rate_limit_seeds_backoff() {
        let env = TestEnvironment::default();
        let mut state = initialized(&env);
        state.reduce(Action::EnqueueEvent(Event::new(EventName::OpenedPush)), &env);
        let id = state.queue[0].id;
        state.reduce(Action::FlushQueue, &env);
        let attempt = send_next(&mut state, &env);

        state.reduce(
            Action::DequeueCompletedResults {
                id,
                attempt,
                outcome: SendOutcome::RetryableFailure {
                    reason: "429".into(),
                    retry_after: Some(60),
                },
            },
            &env,
        );

        assert_eq!(
            state.retry_info,
            RetryState::RetryWithBackoff {
                request_count: 1,
                total_retry_count: 1,
                current_backoff: 60,
            }
        );
    }

    #[test]
    fn going_offline_pauses_and_cancels() {
        let env = TestEnvironment::default();
        let mut state = initialized(&env);
        state.reduce(Action::Start, &env);
        state.reduce(Action::EnqueueEvent(Event::new(EventName::OpenedPush)), &env);
        state.reduce(Action::EnqueueEvent(Event::new(EventName::AddedToCart)), &env);
        let ids = queue_ids(&state);
        state.reduce(Action::FlushQueue, &env);

        let effects = state.reduce(
            Action::NetworkConnectivityChanged(Reachability::NotReachable),
            &env,
        );
        assert_eq!(state.flush_interval, FlushInterval::Paused);
        assert_eq!(
            effects,
            vec![
                Effect::CancelFlushTimer,
                Effect::Dispatch(Action::CancelInFlightRequests),
            ]
        );

        let effects = state.reduce(Action::CancelInFlightRequests, &env);
        assert_eq!(effects, vec![Effect::CancelSends]);
        assert!(!state.flushing);
        assert!(state.requests_in_flight.is_empty());
        assert_eq!(queue_ids(&state), ids);

        let effects = state.reduce(
            Action::NetworkConnectivityChanged(Reachability::ReachableViaWiFi),
            &env,
        );
        assert_eq!(
            state.flush_interval,
            FlushInterval::Every(Duration::from_secs(10))
        );
        assert_eq!(
            effects,
            vec![
                Effect::StartFlushTimer(Duration::from_secs(10)),
                Effect::Dispatch(Action::FlushQueue),
            ]
        );
    }

    #[test]
    fn cellular_uses_cellular_cadence() {
        let env = TestEnvironment::default();
        let mut state = State::new(QueueSettings {
            cellular_flush_interval: Duration::from_secs(45),
            ..QueueSettings::default()
        });
        state.reduce(
            Action::NetworkConnectivityChanged(Reachability::ReachableViaCellular),
            &env,
        );
        assert_eq!(
            state.flush_interval,
            FlushInterval::Every(Duration::from_secs(45))
        );
    }

    #[test]
    fn connectivity_does_not_restart_a_stopped_timer() {
        let env = TestEnvironment::default();
        let mut state = initialized(&env);
        state.reduce(Action::Start, &env);
        state.reduce(Action::Stop, &env);

        let effects = state.reduce(
            Action::NetworkConnectivityChanged(Reachability::ReachableViaWiFi),
            &env,
        );
        assert_eq!(effects, vec![Effect::Dispatch(Action::FlushQueue)]);
    }

    #[test]
    fn cancel_with_nothing_in_flight_is_harmless() {
        let env = TestEnvironment::default();
        let before = initialized(&env);
        let (after, effects) = before.clone().on_action(Action::CancelInFlightRequests, &env);
        assert_eq!(after, before);
        assert_eq!(effects, vec![Effect::CancelSends]);
    }

    #[test]
    fn stop_cancels_then_archives() {
        let env = TestEnvironment::default();
        let mut state = initialized(&env);
        state.reduce(Action::EnqueueEvent(Event::new(EventName::OpenedPush)), &env);
        state.reduce(Action::FlushQueue, &env);

        let effects = state.reduce(Action::Stop, &env);
        assert_eq!(
            dispatched(&effects),
            vec![&Action::CancelInFlightRequests, &Action::ArchiveCurrentState]
        );

        state.reduce(Action::CancelInFlightRequests, &env);
        let effects = state.reduce(Action::ArchiveCurrentState, &env);
        let [Effect::Archive(archived)] = &effects[..] else {
            panic!("expected archive effect, got {:?}", effects);
        };
        assert_eq!(archived.queue.len(), 1);
        assert_eq!(archived.api_key.as_deref(), Some(API_KEY));
    }

    #[test]
    fn archive_before_initialization_is_skipped() {
        let env = TestEnvironment::default();
        let (_, effects) = uninitialized().on_action(Action::ArchiveCurrentState, &env);
        assert!(effects.is_empty());
    }

    #[test]
    fn stale_success_removes_requeued_request() {
        let env = TestEnvironment::default();
        let mut state = initialized(&env);
        state.reduce(Action::EnqueueEvent(Event::new(EventName::OpenedPush)), &env);
        let id = state.queue[0].id;
        state.reduce(Action::FlushQueue, &env);
        let attempt = send_next(&mut state, &env);
        state.reduce(Action::CancelInFlightRequests, &env);
        assert!(state.sending.is_none());

        let effects = state.reduce(success(id, attempt), &env);

        assert!(state.queue.is_empty());
        assert!(matches!(
            &effects[..],
            [Effect::Emit(PipelineEvent::Delivered { .. })]
        ));
    }

    #[test]
    fn success_from_a_superseded_attempt_does_not_answer_the_resend() {
        let env = TestEnvironment::default();
        let mut state = initialized(&env);
        state.reduce(Action::EnqueueEvent(Event::new(EventName::OpenedPush)), &env);
        state.reduce(Action::EnqueueEvent(Event::new(EventName::AddedToCart)), &env);
        let ids = queue_ids(&state);
        state.reduce(Action::FlushQueue, &env);
        let old = send_next(&mut state, &env);
        state.reduce(Action::CancelInFlightRequests, &env);
        state.reduce(Action::FlushQueue, &env);
        let resend = send_next(&mut state, &env);
        assert_ne!(old, resend);
        let before = state.clone();

        let effects = state.reduce(success(ids[0], old), &env);

        assert!(effects.is_empty());
        assert_eq!(state, before);
        assert_eq!(state.sending, Some(resend));

        let effects = state.reduce(success(ids[0], resend), &env);
        assert_eq!(
            effects,
            vec![
                Effect::Emit(PipelineEvent::Delivered {
                    id: ids[0],
                    kind: EndpointKind::CreateEvent,
                }),
                Effect::Dispatch(Action::SendRequest),
            ]
        );
        assert_eq!(state.requests_in_flight.len(), 1);
    }

    #[test]
    fn stale_failure_is_ignored() {
        let env = TestEnvironment::default();
        let mut state = initialized(&env);
        state.reduce(Action::EnqueueEvent(Event::new(EventName::OpenedPush)), &env);
        let id = state.queue[0].id;
        state.reduce(Action::FlushQueue, &env);
        let attempt = send_next(&mut state, &env);
        state.reduce(Action::CancelInFlightRequests, &env);
        let before = state.clone();

        let effects = state.reduce(retryable(id, attempt), &env);
        assert!(effects.is_empty());
        assert_eq!(state, before);
    }

    #[test]
    fn full_queue_drops_new_requests() {
        let env = TestEnvironment::default();
        let mut state = initialized(&env);
        state.settings.max_queue_size = 2;
        state.reduce(Action::EnqueueEvent(Event::new(EventName::OpenedPush)), &env);
        state.reduce(Action::FlushQueue, &env);
        state.reduce(Action::EnqueueEvent(Event::new(EventName::OpenedPush)), &env);

        let effects = state.reduce(Action::EnqueueEvent(Event::new(EventName::OpenedPush)), &env);

        assert_eq!(state.pending_len(), 2);
        assert!(matches!(
            &effects[..],
            [Effect::Emit(PipelineEvent::Dropped {
                reason: DropReason::QueueFull,
                ..
            })]
        ));
    }

    #[test]
    fn build_failure_skips_enqueue_but_keeps_field() {
        let env = TestEnvironment::default();
        let mut state = initialized(&env);
        state.anonymous_id = None;

        let effects = state.reduce(Action::SetEmail("a@example.com".into()), &env);

        assert_eq!(state.email.as_deref(), Some("a@example.com"));
        assert!(state.queue.is_empty());
        assert!(matches!(
            &effects[..],
            [Effect::Emit(PipelineEvent::NotBuilt {
                kind: EndpointKind::CreateProfile,
                ..
            })]
        ));
    }
}
