//! Transport abstraction for Courier.
//!
//! This module provides a pluggable transport layer that abstracts the
//! underlying HTTP client (a platform networking stack, mock for testing).
//!
//! # Design
//!
//! The transport trait is async and request-oriented: `send()` delivers
//! one [`Request`] and reports success or a [`TransportError`]. The
//! dispatch loop runs every send as its own task and aborts it to cancel,
//! so implementations need no cancellation support of their own.
//!
//! Errors are classified into retryable and permanent failures by
//! [`TransportError::classify`]; only the former count against the retry
//! policy.
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! transport.fail_next(TransportError::Status { status: 503, retry_after: None });
//! assert!(transport.send(&request).await.is_err());
//! transport.send(&request).await?;
//! ```

mod mock;

pub use mock::MockTransport;

use async_trait::async_trait;
use courier_core::SendOutcome;
use courier_types::Request;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No network route to the API.
    #[error("network unreachable: {0}")]
    Unreachable(String),

    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The API answered with a non-success status.
    #[error("HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Value of the `Retry-After` header in seconds, if present.
        retry_after: Option<u64>,
    },

    /// The request body could not be encoded.
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// The platform cancelled the request before it completed.
    #[error("request cancelled")]
    Cancelled,
}

impl TransportError {
    /// Map this error onto a send outcome.
    ///
    /// Unreachable, timeouts, cancellations, 5xx and 429 are retryable.
    /// Every other status and encoding failures are permanent.
    pub fn classify(&self) -> SendOutcome {
        let reason = self.to_string();
        match self {
            Self::Unreachable(_) | Self::Timeout | Self::Cancelled => {
                SendOutcome::RetryableFailure {
                    reason,
                    retry_after: None,
                }
            }
            Self::Status {
                status: 429,
                retry_after,
            } => SendOutcome::RetryableFailure {
                reason,
                retry_after: *retry_after,
            },
            Self::Status { status, .. } if (500..=599).contains(status) => {
                SendOutcome::RetryableFailure {
                    reason,
                    retry_after: None,
                }
            }
            Self::Status { .. } | Self::Encoding(_) => SendOutcome::PermanentFailure { reason },
        }
    }
}

/// Transport trait for delivering requests to the API.
///
/// Implementations handle the underlying HTTP mechanism. The request body
/// is derived from [`Request::endpoint`]; its exact layout is the API's
/// contract, not this crate's.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one request.
    ///
    /// Resolves once the API has accepted or rejected it.
    async fn send(&self, request: &Request) -> Result<(), TransportError>;
}
