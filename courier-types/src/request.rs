//! Outbound API requests.
//!
//! A [`Request`] is an immutable description of one API call. The body
//! layout is owned by the remote API; this crate only guarantees that the
//! request id and endpoint variant survive serialization.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::{Event, Profile, PushToken, RequestId, TypesError};

/// One outbound API call.
///
/// Equality and hashing use the id only: two requests with identical
/// payloads are still different requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Unique identifier for deduplication and logging
    pub id: RequestId,
    /// Public API key the request is sent with
    pub api_key: String,
    /// Target endpoint and its payload
    pub endpoint: Endpoint,
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Request {}

impl Hash for Request {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// All supported endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Endpoint {
    /// Create or update a profile
    CreateProfile(ProfilePayload),
    /// Record a custom event
    CreateEvent(EventPayload),
    /// Register a push token for a profile
    RegisterPushToken(PushTokenPayload),
}

/// Payload for [`Endpoint::CreateProfile`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilePayload {
    /// Profile snapshot at enqueue time
    pub profile: Profile,
    /// Installation identifier
    pub anonymous_id: String,
}

/// Payload for [`Endpoint::CreateEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    /// The event, with identifiers already merged from pipeline state
    pub event: Event,
    /// Installation identifier
    pub anonymous_id: String,
    /// Unix timestamp (seconds) at which the event was enqueued
    pub time: u64,
}

/// Payload for [`Endpoint::RegisterPushToken`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushTokenPayload {
    /// Token and permission state being registered
    pub push_token: PushToken,
    /// Profile the token is bound to
    pub profile: Profile,
    /// Installation identifier
    pub anonymous_id: String,
}

/// Fieldless discriminant of [`Endpoint`], used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    /// Profile create/update
    CreateProfile,
    /// Custom event
    CreateEvent,
    /// Push-token registration
    RegisterPushToken,
}

impl EndpointKind {
    /// Relative API path of this endpoint.
    pub fn path(&self) -> &'static str {
        match self {
            Self::CreateProfile => "client/profiles/",
            Self::CreateEvent => "client/events/",
            Self::RegisterPushToken => "client/push-tokens/",
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CreateProfile => "create_profile",
            Self::CreateEvent => "create_event",
            Self::RegisterPushToken => "register_push_token",
        };
        f.write_str(name)
    }
}

impl Endpoint {
    /// Discriminant of this endpoint.
    pub fn kind(&self) -> EndpointKind {
        match self {
            Self::CreateProfile(_) => EndpointKind::CreateProfile,
            Self::CreateEvent(_) => EndpointKind::CreateEvent,
            Self::RegisterPushToken(_) => EndpointKind::RegisterPushToken,
        }
    }
}

fn require<'a>(value: Option<&'a str>, field: &'static str) -> Result<&'a str, TypesError> {
    value.ok_or(TypesError::MissingField(field))
}

impl Request {
    /// Build a profile request.
    ///
    /// Fails if the api key or anonymous id is not yet known.
    pub fn create_profile(
        id: RequestId,
        api_key: Option<&str>,
        anonymous_id: Option<&str>,
        profile: Profile,
    ) -> Result<Self, TypesError> {
        let api_key = require(api_key, "api_key")?;
        let anonymous_id = require(anonymous_id, "anonymous_id")?;
        Ok(Self {
            id,
            api_key: api_key.to_string(),
            endpoint: Endpoint::CreateProfile(ProfilePayload {
                profile,
                anonymous_id: anonymous_id.to_string(),
            }),
        })
    }

    /// Build an event request.
    pub fn create_event(
        id: RequestId,
        api_key: Option<&str>,
        anonymous_id: Option<&str>,
        event: Event,
        time: u64,
    ) -> Result<Self, TypesError> {
        let api_key = require(api_key, "api_key")?;
        let anonymous_id = require(anonymous_id, "anonymous_id")?;
        Ok(Self {
            id,
            api_key: api_key.to_string(),
            endpoint: Endpoint::CreateEvent(EventPayload {
                event,
                anonymous_id: anonymous_id.to_string(),
                time,
            }),
        })
    }

    /// Build a push-token registration request.
    pub fn register_push_token(
        id: RequestId,
        api_key: Option<&str>,
        anonymous_id: Option<&str>,
        push_token: PushToken,
        profile: Profile,
    ) -> Result<Self, TypesError> {
        let api_key = require(api_key, "api_key")?;
        let anonymous_id = require(anonymous_id, "anonymous_id")?;
        if push_token.token.is_empty() {
            return Err(TypesError::MissingField("push_token"));
        }
        Ok(Self {
            id,
            api_key: api_key.to_string(),
            endpoint: Endpoint::RegisterPushToken(PushTokenPayload {
                push_token,
                profile,
                anonymous_id: anonymous_id.to_string(),
            }),
        })
    }

    /// Discriminant of the endpoint.
    pub fn kind(&self) -> EndpointKind {
        self.endpoint.kind()
    }

    /// The push token this request registers, if any.
    pub fn push_token(&self) -> Option<&PushToken> {
        match &self.endpoint {
            Endpoint::RegisterPushToken(payload) => Some(&payload.push_token),
            _ => None,
        }
    }

    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        serde_json::to_vec(self).map_err(TypesError::Serialization)
    }

    /// Deserialize from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        serde_json::from_slice(bytes).map_err(TypesError::Deserialization)
    }
}
