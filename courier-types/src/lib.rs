//! # courier-types
//!
//! Request model for the Courier event pipeline.
//!
//! This crate provides the foundational types used across all Courier crates:
//! - [`RequestId`] - Identity of a single outbound API call
//! - [`Request`] / [`Endpoint`] - What gets sent, one variant per API endpoint
//! - [`Profile`], [`Event`], [`PushToken`] - Payload building blocks
//! - [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod event;
mod ids;
mod profile;
mod push;
mod request;

pub use error::TypesError;
pub use event::{Event, EventName, Identifiers};
pub use ids::RequestId;
pub use profile::{Location, Profile, ProfileKey, Properties};
pub use push::{DeviceContext, PushBackground, PushEnablement, PushToken};
pub use request::{Endpoint, EndpointKind, EventPayload, ProfilePayload, PushTokenPayload, Request};
