//! Mock transport for testing.
//!
//! Allows scripting failures and capturing delivered requests for
//! verification.

use super::{Transport, TransportError};
use async_trait::async_trait;
use courier_types::{Request, RequestId};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Mock transport for testing.
///
/// Clones share state, so a test can keep one handle while the pipeline
/// owns another.
#[derive(Debug, Default, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    delivered: Vec<Request>,
    attempts: usize,
    scripted_failures: VecDeque<TransportError>,
    latency: Option<Duration>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cause the next `send()` to fail with the given error.
    pub fn fail_next(&self, error: TransportError) {
        self.lock().scripted_failures.push_back(error);
    }

    /// Cause the next `count` sends to fail with the given error.
    pub fn fail_next_n(&self, count: usize, error: TransportError) {
        let mut inner = self.lock();
        for _ in 0..count {
            inner.scripted_failures.push_back(error.clone());
        }
    }

    /// Delay every send by `latency` before it resolves.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    /// All requests the mock accepted, in acceptance order.
    pub fn delivered(&self) -> Vec<Request> {
        self.lock().delivered.clone()
    }

    /// Ids of all accepted requests, in acceptance order.
    pub fn delivered_ids(&self) -> Vec<RequestId> {
        self.lock().delivered.iter().map(|r| r.id).collect()
    }

    /// Number of sends that ran to completion, successful or not.
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    /// Clear all state (deliveries, scripted failures, latency).
    pub fn reset(&self) {
        *self.lock() = MockTransportInner::default();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &Request) -> Result<(), TransportError> {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.lock();
        inner.attempts += 1;

        // Check for forced failure
        if let Some(error) = inner.scripted_failures.pop_front() {
            return Err(error);
        }

        inner.delivered.push(request.clone());
        Ok(())
    }
}
