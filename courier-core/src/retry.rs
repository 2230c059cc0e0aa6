//! Retry bookkeeping and backoff.
//!
//! The policy never owns a timer. Backoff is expressed as a number of
//! seconds that the regular flush cadence counts down: each flush tick
//! subtracts the flush interval, and transmission resumes once the
//! remaining backoff reaches the floor.

use serde::{Deserialize, Serialize};

use crate::FlushInterval;

/// Lowest value `current_backoff` can reach.
pub const BACKOFF_FLOOR: u64 = 0;

/// Retry state of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RetryState {
    /// Nothing has been sent yet.
    #[default]
    NoRetry,
    /// Sending normally; `count` consecutive retryable failures so far.
    Retry {
        /// Consecutive failures of the current head request.
        count: u32,
    },
    /// Cooling down; flush ticks count `current_backoff` down instead of sending.
    RetryWithBackoff {
        /// Consecutive failures of the current head request.
        request_count: u32,
        /// Failures since the last success, across requests.
        total_retry_count: u32,
        /// Seconds left before the next transmission.
        current_backoff: u64,
    },
}

impl RetryState {
    fn counts(self) -> (u32, u32) {
        match self {
            Self::NoRetry => (0, 0),
            Self::Retry { count } => (count, count),
            Self::RetryWithBackoff {
                request_count,
                total_retry_count,
                ..
            } => (request_count, total_retry_count),
        }
    }

    /// True while flush ticks are being spent on backoff.
    pub fn is_backing_off(&self) -> bool {
        matches!(
            self,
            Self::RetryWithBackoff { current_backoff, .. } if *current_backoff > BACKOFF_FLOOR
        )
    }
}

/// What a flush tick may do under the current retry state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushGate {
    /// Send now, continuing with this retry state.
    Transmit(RetryState),
    /// Skip this tick; the backoff has been counted down to this state.
    Wait(RetryState),
}

/// Result of recording one retryable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    /// Keep the request and retry later.
    Retry(RetryState),
    /// The request has used up its retries and must be dropped.
    Exhausted(RetryState),
}

/// Retry limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failures tolerated before switching to backoff.
    pub backoff_threshold: u32,
    /// Failures after which a request is dropped.
    pub max_retries: u32,
    /// Upper bound on a seeded backoff, in seconds.
    pub max_backoff: u64,
    /// Upper bound on the random jitter added to a seeded backoff, in seconds.
    pub max_jitter: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_threshold: 3,
            max_retries: 50,
            max_backoff: 180,
            max_jitter: 10,
        }
    }
}

impl RetryPolicy {
    /// Decide whether a flush tick transmits, counting backoff down by the
    /// flush interval.
    ///
    /// Sub-second intervals count as one second per tick. A paused cadence
    /// does not count the backoff down.
    pub fn next(&self, retry: RetryState, interval: FlushInterval) -> FlushGate {
        let RetryState::RetryWithBackoff {
            request_count,
            total_retry_count,
            current_backoff,
        } = retry
        else {
            return FlushGate::Transmit(retry);
        };

        if current_backoff <= BACKOFF_FLOOR {
            return FlushGate::Transmit(RetryState::Retry {
                count: request_count,
            });
        }

        let Some(step) = interval.as_secs() else {
            return FlushGate::Wait(retry);
        };

        let remaining = current_backoff.saturating_sub(step.max(1));
        if remaining <= BACKOFF_FLOOR {
            FlushGate::Transmit(RetryState::Retry {
                count: request_count,
            })
        } else {
            FlushGate::Wait(RetryState::RetryWithBackoff {
                request_count,
                total_retry_count,
                current_backoff: remaining,
            })
        }
    }

    /// Record a retryable failure.
    ///
    /// `retry_after` (from a rate-limit response) seeds the backoff
    /// directly; otherwise the backoff starts once the failure count
    /// crosses the threshold and grows as `2^total_retry_count`.
    pub fn on_failure(
        &self,
        retry: RetryState,
        retry_after: Option<u64>,
        jitter: u64,
    ) -> FailureVerdict {
        let (request_count, total_retry_count) = retry.counts();
        let request_count = request_count.saturating_add(1);
        let total_retry_count = total_retry_count.saturating_add(1);

        if request_count > self.max_retries {
            return FailureVerdict::Exhausted(RetryState::Retry { count: 0 });
        }

        let base = match retry_after {
            Some(secs) => secs,
            None if request_count > self.backoff_threshold => {
                2u64.checked_pow(total_retry_count).unwrap_or(u64::MAX)
            }
            None => {
                return FailureVerdict::Retry(RetryState::Retry {
                    count: request_count,
                })
            }
        };

        let current_backoff = base
            .saturating_add(jitter.min(self.max_jitter))
            .min(self.max_backoff);

        FailureVerdict::Retry(RetryState::RetryWithBackoff {
            request_count,
            total_retry_count,
            current_backoff,
        })
    }

    /// Retry state after a successful send.
    pub fn on_success(&self) -> RetryState {
        RetryState::Retry { count: 0 }
    }
}
