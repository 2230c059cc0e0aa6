//! # courier-core
//!
//! Pure logic for the Courier event pipeline (no I/O, instant tests).
//!
//! This crate implements the reducer, retry policy and pipeline state
//! without any network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! The reducer is **pure** - it takes the current [`State`] and one
//! [`Action`] and produces the next state plus a list of [`Effect`]s,
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input and [`Environment`] → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (network, disk, timers) is performed by `courier-client`,
//! which interprets the effects and feeds results back as actions.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod action;
pub mod environment;
pub mod reducer;
pub mod retry;
pub mod state;

pub use action::{
    Action, AttemptId, DropReason, Effect, PendingRequest, PipelineEvent, Reachability, SendOutcome,
};
pub use environment::{random_jitter, Environment, TestEnvironment};
pub use retry::{FailureVerdict, FlushGate, RetryPolicy, RetryState, BACKOFF_FLOOR};
pub use state::{ArchivedState, FlushInterval, InitializationState, QueueSettings, State};
