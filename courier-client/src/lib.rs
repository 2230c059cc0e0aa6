//! # courier-client
//!
//! Async runtime for the Courier event pipeline.
//!
//! This is the library applications use to send profile updates, events
//! and push-token registrations to the API.
//!
//! ## Features
//!
//! - **Single-Writer Dispatch Loop**: one task owns the pipeline state
//! - **Transport Abstraction**: pluggable HTTP layer (mock included)
//! - **Best-Effort Archive**: checkpoints survive restarts (file, memory)
//! - **Pure State Machine**: uses courier-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use courier_client::{Courier, MockTransport};
//! use courier_types::{Event, EventName};
//!
//! let courier = Courier::builder().transport(MockTransport::new()).spawn()?;
//! courier.initialize("public-api-key")?;
//! courier.set_email("user@example.com")?;
//! courier.enqueue_event(Event::new(EventName::OpenedPush))?;
//!
//! // Writes a final checkpoint
//! courier.shutdown().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod archive;
pub mod client;
pub mod config;
pub mod environment;
pub mod monitor;
mod runner;
pub mod transport;

pub use archive::{Archive, ArchiveError, FileArchive, MemoryArchive};
pub use client::{ClientError, Courier, CourierBuilder};
pub use config::{ClientConfig, ConfigError};
pub use environment::SystemEnvironment;
pub use monitor::{ConnectivityMonitor, LifecycleEvent, LifecycleMonitor, Monitor};
pub use transport::{MockTransport, Transport, TransportError};
